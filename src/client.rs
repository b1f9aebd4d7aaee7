// TLS/DTLS 1.2 Client Handshake Flow:
//
// 1. Client sends ClientHello (optionally offering a cached session id)
// 2. Full handshake: Server sends ServerHello, [SupplementalData],
//    Certificate, [ServerKeyExchange], [CertificateRequest], ServerHelloDone
// 3. Client sends [SupplementalData], [Certificate], ClientKeyExchange,
//    [CertificateVerify], ChangeCipherSpec, Finished
// 4. Server sends ChangeCipherSpec, Finished
// 5. Handshake complete, application data can flow
//
// Abbreviated handshake: the server echoes the offered session id, then
// both sides go straight to ChangeCipherSpec/Finished with the cached
// master secret. The server sends its CCS and Finished first.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, trace};

use crate::buffer::Buf;
use crate::crypto::{encrypt_pre_master, rsa_pre_master_secret, verify_signature, KeyExchange};
use crate::engine::Engine;
use crate::message::{
    Asn1Cert, Body, Certificate, CertificateVerify, CipherSuite, CipherSuiteVec, ClientHello,
    ClientKeyExchange, DigitallySigned, ECPointFormatsExtension, Extension, ExtensionType,
    Finished, HeartbeatExtension, KeyExchangeAlgorithm, MaxFragmentLengthExtension, MessageType,
    Random, ServerNameExtension, SessionId, SignatureAlgorithmsExtension, SupplementalData,
    SupplementalDataEntry, SupportedGroupsExtension, UserMappingExtension,
};
use crate::session::SessionParameters;
use crate::types::{CompressionMethod, ContentType, HashAlgorithm};
use crate::types::{SignatureAndHashAlgorithm, WireFormat};
use crate::{Config, Error, Output};

/// TLS/DTLS 1.2 client endpoint.
pub struct Client {
    /// Our hello random. Also input to signature checks.
    random: Random,

    /// Current client state.
    state: ClientState,

    /// Engine in common between client and server.
    engine: Engine,

    /// Server random. Set by ServerHello.
    server_random: Option<Random>,

    /// The session id the server assigned (possibly empty).
    session_id: SessionId,

    /// Cached parameters we offer for resumption.
    resume: Option<SessionParameters>,

    /// Whether the server accepted our resumption offer.
    abbreviated: bool,

    /// Ephemeral key agreement, created when ServerKeyExchange arrives.
    key_exchange: Option<KeyExchange>,

    /// The server's ephemeral public key from ServerKeyExchange.
    server_public_key: Option<Vec<u8>>,

    /// Server certificate chain in DER, leaf first.
    server_certificates: Vec<Vec<u8>>,

    /// Signature algorithms the server accepts for CertificateVerify.
    /// Set by CertificateRequest; `None` means no certificate requested.
    cert_request_algs: Option<Vec<SignatureAndHashAlgorithm>>,

    /// Whether the server echoed our user_mapping offer.
    peer_user_mapping: bool,

    /// Buffer for defragmenting handshakes.
    defragment_buffer: Buf,
}

/// Current state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Send the initial ClientHello.
    SendClientHello,

    /// Await the ServerHello.
    AwaitServerHello,

    /// Await the rest of the server's first flight, up to ServerHelloDone.
    AwaitServerFlight,

    /// Send SupplementalData/Certificate/ClientKeyExchange/
    /// CertificateVerify/CCS/Finished.
    SendSecondFlight,

    /// Await the server's ChangeCipherSpec.
    AwaitServerChangeCipherSpec,

    /// Await and verify the server's Finished.
    AwaitServerFinished,

    /// Send and receive encrypted application data.
    Running,

    /// Closed, locally or by the peer. Terminal.
    Closed,
}

impl Client {
    /// Create a new client endpoint.
    pub fn new(config: Arc<Config>, wire: WireFormat) -> Client {
        Self::with_resume(config, wire, None)
    }

    /// Create a client that offers `session` for an abbreviated handshake.
    ///
    /// The server may still decline and run a full handshake.
    pub fn resume(config: Arc<Config>, wire: WireFormat, session: SessionParameters) -> Client {
        Self::with_resume(config, wire, Some(session))
    }

    fn with_resume(
        config: Arc<Config>,
        wire: WireFormat,
        resume: Option<SessionParameters>,
    ) -> Client {
        let mut engine = Engine::new(config, wire, true);

        let gmt_unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let random = Random::new(gmt_unix_time, &mut engine.rng);

        Client {
            random,
            state: ClientState::SendClientHello,
            engine,
            server_random: None,
            session_id: SessionId::empty(),
            resume,
            abbreviated: false,
            key_exchange: None,
            server_public_key: None,
            server_certificates: Vec::with_capacity(3),
            cert_request_algs: None,
            defragment_buffer: Buf::new(),
            peer_user_mapping: false,
        }
    }

    /// Feed one incoming packet (datagram) or byte chunk (stream).
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == ClientState::Closed {
            return Err(Error::Closed);
        }
        let result = self
            .engine
            .parse_packet(packet)
            .and_then(|_| self.process_input());
        self.maybe_fail(result)
    }

    /// Drive time-based behavior (connect timeout, flight retransmits).
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.state == ClientState::Closed {
            return Err(Error::Closed);
        }
        let result = self
            .engine
            .handle_timeout(now)
            .and_then(|_| self.process_input());
        self.maybe_fail(result)
    }

    /// Poll for the next thing to do.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8], now: Instant) -> Output<'a> {
        self.engine.poll_output(buf, now)
    }

    /// Queue application data for encrypted transmission.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state != ClientState::Running {
            return Err(Error::UnexpectedMessage(
                "Not connected: cannot send application data".to_string(),
            ));
        }
        self.engine.create_application_data(data)
    }

    /// Send a heartbeat request. The peer must have advertised that we
    /// are allowed to send.
    pub fn send_heartbeat_request(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.engine.send_heartbeat_request(payload)
    }

    /// Initiate an orderly shutdown by sending close_notify.
    pub fn close(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        let _ = self.engine.send_close_notify();
        self.state = ClientState::Closed;
    }

    /// The negotiated session, exportable for resumption.
    ///
    /// `None` until the handshake completes or when the server assigned
    /// no session id.
    pub fn session(&self) -> Option<SessionParameters> {
        if self.state != ClientState::Running || self.session_id.is_empty() {
            return None;
        }
        self.export_session()
    }

    /// On error: queue the mapped fatal alert, invalidate the session and
    /// close. The error still propagates to the caller.
    fn maybe_fail(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        let Err(e) = result else {
            return Ok(());
        };
        if let Some(alert) = e.to_alert() {
            let _ = self.engine.send_alert(alert);
        }
        self.invalidate_session();
        self.state = ClientState::Closed;
        Err(e)
    }

    fn invalidate_session(&mut self) {
        let Some(cache) = self.engine.config().session_cache() else {
            return;
        };
        if !self.session_id.is_empty() {
            cache.invalidate(&self.session_id);
        }
        // Never re-offer a session that died with a fatal alert.
        if let Some(resume) = &self.resume {
            cache.invalidate(&resume.id);
        }
    }

    fn process_input(&mut self) -> Result<(), Error> {
        self.engine.process_protocol_records()?;

        loop {
            let prev_state = self.state;
            self.do_process_input()?;
            if prev_state == self.state {
                break;
            }
        }
        Ok(())
    }

    fn do_process_input(&mut self) -> Result<(), Error> {
        match self.state {
            ClientState::SendClientHello => self.send_client_hello(),
            ClientState::AwaitServerHello => self.process_server_hello(),
            ClientState::AwaitServerFlight => self.process_server_flight(),
            ClientState::SendSecondFlight => self.send_second_flight(),
            ClientState::AwaitServerChangeCipherSpec => self.process_server_ccs(),
            ClientState::AwaitServerFinished => self.process_server_finished(),
            ClientState::Running => {
                // Resends of the server's final flight leave duplicate
                // ChangeCipherSpec records behind.
                self.engine.drop_pending_ccs();
                Ok(())
            }
            ClientState::Closed => Ok(()),
        }
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        debug!("Sending ClientHello (flight 1)");
        self.engine.flight_begin(1);

        self.engine
            .security_mut()
            .set_client_random(self.random.to_bytes());

        let random = self.random;
        let session_id = self
            .resume
            .as_ref()
            .map(|p| p.id)
            .unwrap_or_else(SessionId::empty);

        self.engine
            .create_handshake(MessageType::ClientHello, move |body, engine| {
                handshake_create_client_hello(body, engine, random, session_id)
            })?;

        self.state = ClientState::AwaitServerHello;
        Ok(())
    }

    fn process_server_hello(&mut self) -> Result<(), Error> {
        if !self.engine.has_complete_handshake(MessageType::ServerHello) {
            return self.reject_unexpected(MessageType::ServerHello);
        }

        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::ServerHello, &mut self.defragment_buffer)?
        else {
            return Ok(());
        };

        let Body::ServerHello(sh) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "ServerHello parse error".to_string(),
            ));
        };

        if sh.server_version != self.engine.wire().version() {
            return Err(Error::SecurityError(format!(
                "Unsupported server version: {}",
                sh.server_version
            )));
        }

        if sh.compression_method != CompressionMethod::Null {
            return Err(Error::SecurityError(
                "Server selected non-Null compression".to_string(),
            ));
        }

        if !self.engine.is_cipher_suite_allowed(sh.cipher_suite) {
            return Err(Error::SecurityError(format!(
                "Server selected a suite we did not offer: {:?}",
                sh.cipher_suite
            )));
        }

        let server_random = sh.random;
        self.server_random = Some(server_random);
        self.session_id = sh.session_id;
        self.engine.set_cipher_suite(sh.cipher_suite);
        self.engine
            .security_mut()
            .set_server_random(server_random.to_bytes());

        // The server accepts resumption by echoing the offered id.
        let resumed = match &self.resume {
            Some(p) => !p.id.is_empty() && p.id == sh.session_id,
            None => false,
        };

        self.process_server_hello_extensions(sh)?;

        if resumed {
            let p = self.resume.as_ref().unwrap();
            if p.cipher_suite != sh.cipher_suite {
                return Err(Error::SecurityError(
                    "Resumed session with a different cipher suite".to_string(),
                ));
            }
            debug!("Server accepted session resumption");
            self.abbreviated = true;
            let master_secret = p.master_secret;
            self.engine.security_mut().set_master_secret(master_secret);
            self.engine.derive_record_ciphers()?;
            // Server continues with CCS + Finished directly.
            self.state = ClientState::AwaitServerChangeCipherSpec;
        } else {
            self.state = ClientState::AwaitServerFlight;
        }

        Ok(())
    }

    fn process_server_hello_extensions(
        &mut self,
        sh: &crate::message::ServerHello,
    ) -> Result<(), Error> {
        if let Some(ext) = sh.extension(ExtensionType::Heartbeat) {
            let (_, hb) = HeartbeatExtension::parse(&ext.extension_data)?;
            self.engine.set_peer_heartbeat(Some(hb.mode));
        }

        if let Some(ext) = sh.extension(ExtensionType::MaxFragmentLength) {
            let offered = self.engine.config().max_fragment_length();
            let (_, mfl) = MaxFragmentLengthExtension::parse(&ext.extension_data)?;
            if offered != Some(mfl.length) {
                return Err(Error::SecurityError(
                    "Server echoed a max_fragment_length we did not offer".to_string(),
                ));
            }
            self.engine.set_max_fragment_length(mfl.length.len());
        }

        if let Some(ext) = sh.extension(ExtensionType::UserMapping) {
            let (_, _um) = UserMappingExtension::parse(&ext.extension_data)?;
            let offered = !self.engine.config().supplemental_data().is_empty();
            if !offered {
                return Err(Error::SecurityError(
                    "Server echoed user_mapping without an offer".to_string(),
                ));
            }
            self.peer_user_mapping = true;
        }

        Ok(())
    }

    /// Drain the server's first flight message by message. The optional
    /// messages make this a dispatch on the incoming type rather than a
    /// fixed sequence.
    fn process_server_flight(&mut self) -> Result<(), Error> {
        loop {
            let Some(msg_type) = self.engine.incoming_handshake_type() else {
                return Ok(());
            };

            match msg_type {
                MessageType::SupplementalData => {
                    if !self.process_supplemental_data()? {
                        return Ok(());
                    }
                }
                MessageType::Certificate => {
                    if !self.process_server_certificate()? {
                        return Ok(());
                    }
                }
                MessageType::ServerKeyExchange => {
                    if !self.process_server_key_exchange()? {
                        return Ok(());
                    }
                }
                MessageType::CertificateRequest => {
                    if !self.process_certificate_request()? {
                        return Ok(());
                    }
                }
                MessageType::ServerHelloDone => {
                    let Some(_) = self
                        .engine
                        .next_handshake(MessageType::ServerHelloDone, &mut self.defragment_buffer)?
                    else {
                        return Ok(());
                    };
                    self.state = ClientState::SendSecondFlight;
                    return Ok(());
                }
                other => {
                    return Err(Error::UnexpectedMessage(format!(
                        "Unexpected message in server flight: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Returns false when the message is not yet complete.
    fn process_supplemental_data(&mut self) -> Result<bool, Error> {
        if !self.peer_user_mapping {
            return Err(Error::UnexpectedMessage(
                "SupplementalData without negotiation".to_string(),
            ));
        }

        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::SupplementalData, &mut self.defragment_buffer)?
        else {
            return Ok(false);
        };

        let Body::SupplementalData(sd) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "SupplementalData parse error".to_string(),
            ));
        };

        for entry in &sd.entries {
            trace!(
                "Server supplemental data type {} ({} bytes)",
                entry.data_type,
                entry.data.len()
            );
            self.engine
                .push_supplemental_data(entry.data_type, &entry.data);
        }

        Ok(true)
    }

    fn process_server_certificate(&mut self) -> Result<bool, Error> {
        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::Certificate, &mut self.defragment_buffer)?
        else {
            return Ok(false);
        };

        let Body::Certificate(certificate) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "Certificate parse error".to_string(),
            ));
        };

        if certificate.certificate_list.is_empty() {
            return Err(Error::CertificateError(
                "Server sent an empty certificate chain".to_string(),
            ));
        }

        for (i, cert) in certificate.certificate_list.iter().enumerate() {
            trace!("Server certificate #{} size: {} bytes", i + 1, cert.len());
            self.server_certificates.push(cert.0.clone());
        }

        if let Some(verifier) = self.engine.config().cert_verifier() {
            let chain: Vec<&[u8]> = self.server_certificates.iter().map(|c| &c[..]).collect();
            verifier
                .verify_certificate(&chain)
                .map_err(Error::CertificateError)?;
        }
        self.engine.push_peer_cert(&self.server_certificates[0]);

        Ok(true)
    }

    fn process_server_key_exchange(&mut self) -> Result<bool, Error> {
        let suite = self.cipher_suite()?;
        if suite.as_key_exchange_algorithm() != KeyExchangeAlgorithm::Ecdhe {
            return Err(Error::UnexpectedMessage(
                "ServerKeyExchange for a non-ephemeral suite".to_string(),
            ));
        }

        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::ServerKeyExchange, &mut self.defragment_buffer)?
        else {
            return Ok(false);
        };

        let Body::ServerKeyExchange(ske) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "ServerKeyExchange parse error".to_string(),
            ));
        };

        let crate::message::ServerKeyExchangeParams::Ecdh(params) = &ske.params;
        if !params.named_curve.is_supported() {
            return Err(Error::SecurityError(format!(
                "Unsupported curve in ServerKeyExchange: {:?}",
                params.named_curve
            )));
        }

        let Some(signed) = ske.signature() else {
            return Err(Error::SecurityError(
                "ServerKeyExchange without a signature".to_string(),
            ));
        };

        let Some(expected_sig_alg) = suite.signature_algorithm() else {
            return Err(Error::SecurityError(
                "Ephemeral suite without a signature algorithm".to_string(),
            ));
        };
        if signed.algorithm.signature != expected_sig_alg {
            return Err(Error::SecurityError(
                "ServerKeyExchange signature algorithm does not match the suite".to_string(),
            ));
        }

        let Some(leaf) = self.server_certificates.first() else {
            return Err(Error::UnexpectedMessage(
                "ServerKeyExchange before Certificate".to_string(),
            ));
        };

        // signed_data = client_random || server_random || params
        let server_random = self
            .server_random
            .ok_or_else(|| Error::UnexpectedMessage("No server random".to_string()))?;
        let mut signed_data = self.engine.pop_buffer();
        self.random.serialize(&mut signed_data);
        server_random.serialize(&mut signed_data);
        ske.signed_params(&mut signed_data);

        let verified = verify_signature(
            leaf,
            &signed_data,
            &signed.signature,
            signed.algorithm.hash,
            signed.algorithm.signature,
        );
        self.engine.push_buffer(signed_data);
        verified.map_err(Error::CryptoError)?;

        let key_exchange = KeyExchange::new(params.named_curve).map_err(Error::CryptoError)?;
        self.key_exchange = Some(key_exchange);
        self.server_public_key = Some(params.public_key.clone());

        Ok(true)
    }

    fn process_certificate_request(&mut self) -> Result<bool, Error> {
        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::CertificateRequest, &mut self.defragment_buffer)?
        else {
            return Ok(false);
        };

        let Body::CertificateRequest(cr) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "CertificateRequest parse error".to_string(),
            ));
        };

        debug!("Server requests a client certificate");
        self.cert_request_algs = Some(cr.supported_signature_algorithms.to_vec());

        Ok(true)
    }

    fn send_second_flight(&mut self) -> Result<(), Error> {
        debug!("Sending client second flight (flight 5)");
        self.engine.flight_begin(5);

        if self.peer_user_mapping {
            let entries = self.engine.config().supplemental_data().to_vec();
            self.engine
                .create_handshake(MessageType::SupplementalData, move |body, _| {
                    handshake_create_supplemental_data(body, &entries)
                })?;
        }

        // Certificate (possibly empty) when the server asked for one.
        let mut sent_client_cert = false;
        if self.cert_request_algs.is_some() {
            let chain: Vec<Vec<u8>> = self
                .engine
                .config()
                .credential()
                .map(|c| c.chain().to_vec())
                .unwrap_or_default();
            sent_client_cert = !chain.is_empty();

            self.engine
                .create_handshake(MessageType::Certificate, move |body, _| {
                    let certs = chain.into_iter().map(Asn1Cert).collect();
                    Certificate::new(certs).serialize(body);
                    Ok(())
                })?;
        }

        self.send_client_key_exchange()?;

        if sent_client_cert {
            self.send_certificate_verify()?;
        }

        self.send_ccs_and_finished()?;

        self.state = ClientState::AwaitServerChangeCipherSpec;
        Ok(())
    }

    fn send_client_key_exchange(&mut self) -> Result<(), Error> {
        let suite = self.cipher_suite()?;

        let ckx = match suite.as_key_exchange_algorithm() {
            KeyExchangeAlgorithm::Ecdhe => {
                let key_exchange = self.key_exchange.take().ok_or_else(|| {
                    Error::UnexpectedMessage("No ServerKeyExchange received".to_string())
                })?;
                let server_public = self.server_public_key.take().ok_or_else(|| {
                    Error::UnexpectedMessage("No server public key".to_string())
                })?;

                let public_key = key_exchange.public_key().to_vec();

                let mut pre_master = self.engine.pop_buffer();
                let completed = key_exchange
                    .complete(&server_public, &mut pre_master)
                    .map_err(Error::CryptoError);
                let derived = completed.and_then(|_| {
                    self.engine
                        .security_mut()
                        .derive_master_secret(&pre_master)
                        .map_err(Error::CryptoError)
                });
                self.engine.push_buffer(pre_master);
                derived?;

                ClientKeyExchange::ecdh(public_key)
            }
            KeyExchangeAlgorithm::Rsa => {
                let leaf = self.server_certificates.first().ok_or_else(|| {
                    Error::UnexpectedMessage("No server certificate".to_string())
                })?;

                let version = self.engine.wire().version();
                let pre_master = rsa_pre_master_secret(version, &mut self.engine.rng);
                let encrypted = encrypt_pre_master(leaf, &pre_master).map_err(Error::CryptoError)?;

                self.engine
                    .security_mut()
                    .derive_master_secret(&pre_master)
                    .map_err(Error::CryptoError)?;

                ClientKeyExchange::rsa(encrypted)
            }
            KeyExchangeAlgorithm::Unknown => {
                return Err(Error::SecurityError(
                    "Unknown key exchange algorithm".to_string(),
                ));
            }
        };

        self.engine
            .create_handshake(MessageType::ClientKeyExchange, move |body, _| {
                ckx.serialize(body);
                Ok(())
            })?;

        // Keys must be in place before our own Finished is encrypted.
        self.engine.derive_record_ciphers()?;

        Ok(())
    }

    fn send_certificate_verify(&mut self) -> Result<(), Error> {
        let credential = self
            .engine
            .config()
            .credential()
            .cloned()
            .ok_or_else(|| Error::ConfigError("No client credential".to_string()))?;
        let Some(key) = credential.signing_key() else {
            // A decrypt-only credential cannot produce CertificateVerify.
            return Err(Error::ConfigError(
                "Client credential cannot sign".to_string(),
            ));
        };

        let algorithm = SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, key.algorithm());
        if let Some(algs) = &self.cert_request_algs {
            if !algs.is_empty() && !algs.contains(&algorithm) {
                return Err(Error::SecurityError(
                    "Server does not accept our signature algorithm".to_string(),
                ));
            }
        }

        // The signature covers the transcript up to (excluding) this
        // message; create_handshake appends the message afterwards.
        self.engine
            .create_handshake(MessageType::CertificateVerify, move |body, engine| {
                let mut signature = Buf::new();
                key.sign(engine.transcript_bytes(), algorithm.hash, &mut signature)
                    .map_err(Error::CryptoError)?;

                let signed = DigitallySigned::new(algorithm, signature.into_vec());
                CertificateVerify::new(signed).serialize(body);
                Ok(())
            })?;

        Ok(())
    }

    fn send_ccs_and_finished(&mut self) -> Result<(), Error> {
        self.engine
            .create_record(ContentType::ChangeCipherSpec, 0, true, |body| {
                body.push(1);
            })?;
        self.engine.enable_local_encryption();

        self.engine
            .create_handshake(MessageType::Finished, |body, engine| {
                let verify_data = engine.generate_verify_data(true)?;
                Finished::new(&verify_data).serialize(body);
                Ok(())
            })?;
        Ok(())
    }

    fn process_server_ccs(&mut self) -> Result<(), Error> {
        if self.engine.next_record(ContentType::ChangeCipherSpec).is_none() {
            return self.reject_unexpected_record();
        }

        self.engine.enable_peer_encryption()?;
        self.state = ClientState::AwaitServerFinished;
        Ok(())
    }

    fn process_server_finished(&mut self) -> Result<(), Error> {
        if !self.engine.has_complete_handshake(MessageType::Finished) {
            return self.reject_unexpected(MessageType::Finished);
        }

        // The expected value covers the transcript excluding the peer's
        // Finished, so compute before next_handshake appends it.
        let expected = self.engine.generate_verify_data(false)?;

        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::Finished, &mut self.defragment_buffer)?
        else {
            return Ok(());
        };

        let Body::Finished(finished) = &handshake.body else {
            return Err(Error::UnexpectedMessage("Finished parse error".to_string()));
        };

        if *finished.verify_data != expected {
            return Err(Error::CryptoError(
                "Server Finished verification failed".to_string(),
            ));
        }
        debug!("Server Finished verified");

        if self.abbreviated {
            // Abbreviated: our CCS + Finished answer the server's.
            debug!("Sending client CCS and Finished (flight 3)");
            self.engine.flight_begin(3);
            self.send_ccs_and_finished()?;
        }

        self.complete_handshake();
        Ok(())
    }

    fn complete_handshake(&mut self) {
        self.engine.flight_stop_resend_timers();
        self.engine.push_connected();
        self.engine.release_application_data();
        self.state = ClientState::Running;

        if let Some(parameters) = self.export_session() {
            if let Some(cache) = self.engine.config().session_cache() {
                cache.insert(parameters);
            }
        }
    }

    fn export_session(&self) -> Option<SessionParameters> {
        if self.session_id.is_empty() {
            return None;
        }
        let suite = self.engine.cipher_suite()?;
        let master_secret = *self.engine.security().master_secret()?;

        Some(SessionParameters {
            id: self.session_id,
            cipher_suite: suite,
            compression: CompressionMethod::Null,
            master_secret,
            peer_certificate: self.server_certificates.first().cloned(),
        })
    }

    fn cipher_suite(&self) -> Result<CipherSuite, Error> {
        self.engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("No cipher suite selected".to_string()))
    }

    /// A complete handshake message of the wrong type at the expected
    /// position is a protocol violation, not something to wait out.
    fn reject_unexpected(&self, wanted: MessageType) -> Result<(), Error> {
        if let Some(t) = self.engine.incoming_handshake_type() {
            if t != wanted {
                return Err(Error::UnexpectedMessage(format!(
                    "Expected {:?}, peer sent {:?}",
                    wanted, t
                )));
            }
        }
        Ok(())
    }

    fn reject_unexpected_record(&self) -> Result<(), Error> {
        if let Some(t) = self.engine.incoming_handshake_type() {
            return Err(Error::UnexpectedMessage(format!(
                "Expected ChangeCipherSpec, peer sent {:?}",
                t
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("abbreviated", &self.abbreviated)
            .finish_non_exhaustive()
    }
}

fn handshake_create_client_hello(
    body: &mut Buf,
    engine: &mut Engine,
    random: Random,
    session_id: SessionId,
) -> Result<(), Error> {
    let config = engine.config();

    let mut suites = CipherSuiteVec::new();
    for s in config.cipher_suites() {
        suites.push(*s);
    }

    let mut ch = ClientHello::new(engine.wire().version(), random, session_id, suites);

    let mut scratch = Buf::new();
    let mut push_extension = |extension_type: ExtensionType, scratch: &mut Buf| {
        let data = std::mem::take(scratch).into_vec();
        ch.extensions.push(Extension::new(extension_type, data));
    };

    if let Some(name) = config.server_name() {
        ServerNameExtension::new(name).serialize(&mut scratch);
        push_extension(ExtensionType::ServerName, &mut scratch);
    }

    if let Some(length) = config.max_fragment_length() {
        MaxFragmentLengthExtension::new(length).serialize(&mut scratch);
        push_extension(ExtensionType::MaxFragmentLength, &mut scratch);
    }

    if !config.supplemental_data().is_empty() {
        let types: Vec<u8> = config
            .supplemental_data()
            .iter()
            .map(|(t, _)| *t as u8)
            .collect();
        UserMappingExtension::new(&types).serialize(&mut scratch);
        push_extension(ExtensionType::UserMapping, &mut scratch);
    }

    SupportedGroupsExtension::default().serialize(&mut scratch);
    push_extension(ExtensionType::SupportedGroups, &mut scratch);

    ECPointFormatsExtension::default().serialize(&mut scratch);
    push_extension(ExtensionType::EcPointFormats, &mut scratch);

    SignatureAlgorithmsExtension::default().serialize(&mut scratch);
    push_extension(ExtensionType::SignatureAlgorithms, &mut scratch);

    if let Some(mode) = config.heartbeat() {
        HeartbeatExtension::new(mode).serialize(&mut scratch);
        push_extension(ExtensionType::Heartbeat, &mut scratch);
    }

    let wire = engine.wire();
    ch.serialize(wire, body);
    Ok(())
}

fn handshake_create_supplemental_data(
    body: &mut Buf,
    entries: &[(u16, Vec<u8>)],
) -> Result<(), Error> {
    let entries = entries
        .iter()
        .map(|(t, data)| SupplementalDataEntry::new(*t, data.clone()))
        .collect();
    SupplementalData::new(entries).serialize(body);
    Ok(())
}
