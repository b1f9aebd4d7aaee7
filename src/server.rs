// TLS/DTLS 1.2 Server Handshake Flow:
//
// 1. Client sends ClientHello
// 2. Full handshake: Server sends ServerHello, [SupplementalData],
//    Certificate, [ServerKeyExchange], [CertificateRequest], ServerHelloDone
// 3. Client sends [SupplementalData], [Certificate], ClientKeyExchange,
//    [CertificateVerify], ChangeCipherSpec, Finished
// 4. Server verifies Finished, then sends ChangeCipherSpec, Finished
// 5. Handshake complete, application data can flow
//
// Abbreviated handshake: a ClientHello offering a cached session id the
// server still has makes the server echo the id and answer with
// ServerHello, ChangeCipherSpec, Finished in one flight; the client
// replies with its own ChangeCipherSpec and Finished.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, trace};

use crate::buffer::Buf;
use crate::crypto::{verify_signature, KeyExchange};
use crate::engine::Engine;
use crate::message::{
    Asn1Cert, Body, Certificate, CertificateRequest, CipherSuite, ClientHello,
    ECPointFormatsExtension, EcdhParams, ExchangeKeys, Extension, ExtensionType, Finished,
    HeartbeatExtension, KeyExchangeAlgorithm, MaxFragmentLengthExtension, MessageType, Random,
    ServerHello, ServerKeyExchange, ServerKeyExchangeParams, ServerNameExtension, SessionId,
    SupportedGroupsExtension, UserMappingExtension,
};
use crate::message::{DigitallySigned, SupplementalData, SupplementalDataEntry};
use crate::session::SessionParameters;
use crate::types::{CompressionMethod, ContentType, HashAlgorithm, HeartbeatMode};
use crate::types::{MaxFragmentLength, NamedCurve, SignatureAndHashAlgorithm, WireFormat};
use crate::{Config, Error, Output};

/// TLS/DTLS 1.2 server endpoint.
pub struct Server {
    /// Our hello random. Also input to signature checks.
    random: Random,

    /// Current server state.
    state: ServerState,

    /// Engine in common between server and client.
    engine: Engine,

    /// Client random. Set by ClientHello.
    client_random: Option<Random>,

    /// The session id we assigned or resumed (possibly empty).
    session_id: SessionId,

    /// Whether we accepted a resumption offer.
    abbreviated: bool,

    /// ECDHE curve picked from the client's supported groups.
    curve: NamedCurve,

    /// Ephemeral key agreement, created with ServerKeyExchange.
    key_exchange: Option<KeyExchange>,

    /// Client certificate chain in DER, leaf first.
    client_certificates: Vec<Vec<u8>>,

    /// Whether we sent a CertificateRequest.
    cert_requested: bool,

    /// Which of the client's second-flight messages we have seen.
    certificate_seen: bool,
    key_exchange_seen: bool,
    cert_verify_seen: bool,

    /// Whether we echoed the client's user_mapping offer.
    peer_user_mapping: bool,

    /// Heartbeat mode to echo in ServerHello, when negotiated.
    echo_heartbeat: Option<HeartbeatMode>,

    /// max_fragment_length to echo in ServerHello, when negotiated.
    echo_max_fragment: Option<MaxFragmentLength>,

    /// Buffer for defragmenting handshakes.
    defragment_buffer: Buf,
}

/// Current state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    /// Await a ClientHello.
    AwaitClientHello,

    /// Send ServerHello..ServerHelloDone (full) or
    /// ServerHello/CCS/Finished (abbreviated).
    SendServerFlight,

    /// Await the client's second flight up to its ChangeCipherSpec.
    AwaitSecondFlight,

    /// Await and verify the client's Finished.
    AwaitClientFinished,

    /// Send and receive encrypted application data.
    Running,

    /// Closed, locally or by the peer. Terminal.
    Closed,
}

impl Server {
    /// Create a new server endpoint.
    pub fn new(config: Arc<Config>, wire: WireFormat) -> Server {
        let mut engine = Engine::new(config, wire, false);

        let gmt_unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let random = Random::new(gmt_unix_time, &mut engine.rng);

        Server {
            random,
            state: ServerState::AwaitClientHello,
            engine,
            client_random: None,
            session_id: SessionId::empty(),
            abbreviated: false,
            curve: NamedCurve::Secp256r1,
            key_exchange: None,
            client_certificates: Vec::with_capacity(3),
            cert_requested: false,
            certificate_seen: false,
            key_exchange_seen: false,
            cert_verify_seen: false,
            peer_user_mapping: false,
            echo_heartbeat: None,
            echo_max_fragment: None,
            defragment_buffer: Buf::new(),
        }
    }

    /// Feed one incoming packet (datagram) or byte chunk (stream).
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == ServerState::Closed {
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
        if self.state == ServerState::Closed {
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
        if self.state != ServerState::Running {
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
        if self.state == ServerState::Closed {
            return;
        }
        let _ = self.engine.send_close_notify();
        self.state = ServerState::Closed;
    }

    /// The negotiated session, exportable for resumption.
    pub fn session(&self) -> Option<SessionParameters> {
        if self.state != ServerState::Running || self.session_id.is_empty() {
            return None;
        }
        self.export_session()
    }

    fn maybe_fail(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        let Err(e) = result else {
            return Ok(());
        };
        if let Some(alert) = e.to_alert() {
            let _ = self.engine.send_alert(alert);
        }
        if let Some(cache) = self.engine.config().session_cache() {
            if !self.session_id.is_empty() {
                cache.invalidate(&self.session_id);
            }
        }
        self.state = ServerState::Closed;
        Err(e)
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
            ServerState::AwaitClientHello => self.process_client_hello(),
            ServerState::SendServerFlight => self.send_server_flight(),
            ServerState::AwaitSecondFlight => self.process_second_flight(),
            ServerState::AwaitClientFinished => self.process_client_finished(),
            ServerState::Running => {
                // Resends of the client's final flight leave duplicate
                // ChangeCipherSpec records behind.
                self.engine.drop_pending_ccs();
                Ok(())
            }
            ServerState::Closed => Ok(()),
        }
    }

    fn process_client_hello(&mut self) -> Result<(), Error> {
        if !self.engine.has_complete_handshake(MessageType::ClientHello) {
            return self.reject_unexpected(MessageType::ClientHello);
        }

        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::ClientHello, &mut self.defragment_buffer)?
        else {
            return Ok(());
        };

        let Body::ClientHello(ch) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "ClientHello parse error".to_string(),
            ));
        };

        if ch.client_version != self.engine.wire().version() {
            return Err(Error::SecurityError(format!(
                "Unsupported client version: {}",
                ch.client_version
            )));
        }

        if !ch
            .compression_methods
            .iter()
            .any(|m| *m == CompressionMethod::Null)
        {
            return Err(Error::SecurityError(
                "Client did not offer Null compression".to_string(),
            ));
        }

        if !ch.has_supported_suite() {
            return Err(Error::SecurityError(
                "No mutually acceptable cipher suite".to_string(),
            ));
        }

        self.client_random = Some(ch.random);
        self.engine
            .security_mut()
            .set_client_random(ch.random.to_bytes());
        let server_random = self.random;
        self.engine
            .security_mut()
            .set_server_random(server_random.to_bytes());

        self.process_client_hello_extensions(ch)?;

        // Resumption: an offered id we still have wins over a full
        // handshake, as long as the cached suite is still acceptable.
        if let Some(parameters) = self.lookup_resumable(ch) {
            debug!("Resuming session {}", parameters.id);
            self.abbreviated = true;
            self.session_id = parameters.id;
            self.engine.set_cipher_suite(parameters.cipher_suite);
            self.engine
                .security_mut()
                .set_master_secret(parameters.master_secret);
            self.state = ServerState::SendServerFlight;
            return Ok(());
        }

        let suite = self.select_cipher_suite(ch)?;
        debug!("Selected cipher suite: {:?}", suite);
        self.engine.set_cipher_suite(suite);

        // Only hand out session ids when there is a cache to resume from.
        self.session_id = if self.engine.config().session_cache().is_some() {
            SessionId::random(32, &mut self.engine.rng)
        } else {
            SessionId::empty()
        };

        self.state = ServerState::SendServerFlight;
        Ok(())
    }

    fn process_client_hello_extensions(&mut self, ch: &ClientHello) -> Result<(), Error> {
        if let Some(ext) = ch.extension(ExtensionType::ServerName) {
            let (_, sni) = ServerNameExtension::parse(&ext.extension_data)?;
            debug!("Client server_name: {}", sni.host_name);
        }

        if let Some(ext) = ch.extension(ExtensionType::SupportedGroups) {
            let (_, groups) = SupportedGroupsExtension::parse(&ext.extension_data)?;
            let picked = NamedCurve::supported()
                .iter()
                .find(|c| groups.groups.contains(c));
            let Some(curve) = picked else {
                return Err(Error::SecurityError(
                    "No mutually supported ECDHE group".to_string(),
                ));
            };
            self.curve = *curve;
        }

        if let Some(ext) = ch.extension(ExtensionType::EcPointFormats) {
            let (_, formats) = ECPointFormatsExtension::parse(&ext.extension_data)?;
            if !formats.has_uncompressed() {
                return Err(Error::SecurityError(
                    "Client does not accept uncompressed EC points".to_string(),
                ));
            }
        }

        if let Some(ext) = ch.extension(ExtensionType::Heartbeat) {
            let (_, hb) = HeartbeatExtension::parse(&ext.extension_data)?;
            self.engine.set_peer_heartbeat(Some(hb.mode));
            self.echo_heartbeat = self.engine.config().heartbeat();
        }

        if let Some(ext) = ch.extension(ExtensionType::MaxFragmentLength) {
            let (_, mfl) = MaxFragmentLengthExtension::parse(&ext.extension_data)?;
            self.engine.set_max_fragment_length(mfl.length.len());
            self.echo_max_fragment = Some(mfl.length);
        }

        if let Some(ext) = ch.extension(ExtensionType::UserMapping) {
            let (_, um) = UserMappingExtension::parse(&ext.extension_data)?;
            // Negotiated only when both sides carry supplemental data.
            if !self.engine.config().supplemental_data().is_empty() && !um.types.is_empty() {
                self.peer_user_mapping = true;
            }
        }

        Ok(())
    }

    fn lookup_resumable(&self, ch: &ClientHello) -> Option<SessionParameters> {
        let cache = self.engine.config().session_cache()?;
        if ch.session_id.is_empty() {
            return None;
        }
        let parameters = cache.lookup(&ch.session_id)?;

        let suite = parameters.cipher_suite;
        let acceptable = ch.cipher_suites.contains(&suite)
            && self.engine.is_cipher_suite_allowed(suite)
            && parameters.compression == CompressionMethod::Null;
        if !acceptable {
            debug!("Cached session no longer acceptable; full handshake");
            return None;
        }

        Some(parameters)
    }

    /// Pick the first client-offered suite we allow and can serve with
    /// the configured credential.
    fn select_cipher_suite(&self, ch: &ClientHello) -> Result<CipherSuite, Error> {
        let credential = self
            .engine
            .config()
            .credential()
            .ok_or_else(|| Error::ConfigError("Server requires a credential".to_string()))?;

        for s in &ch.cipher_suites {
            if self.engine.is_cipher_suite_allowed(*s) && credential.supported_suites().contains(s)
            {
                return Ok(*s);
            }
        }

        Err(Error::SecurityError(
            "No mutually acceptable cipher suite".to_string(),
        ))
    }

    fn send_server_flight(&mut self) -> Result<(), Error> {
        let flight_no = if self.abbreviated { 2 } else { 4 };
        debug!("Sending ServerHello flight (flight {})", flight_no);
        self.engine.flight_begin(flight_no);

        let random = self.random;
        let session_id = self.session_id;
        let echo_heartbeat = self.echo_heartbeat;
        let echo_max_fragment = self.echo_max_fragment;
        let echo_user_mapping = self.peer_user_mapping;

        self.engine
            .create_handshake(MessageType::ServerHello, move |body, engine| {
                handshake_create_server_hello(
                    body,
                    engine,
                    random,
                    session_id,
                    echo_heartbeat,
                    echo_max_fragment,
                    echo_user_mapping,
                )
            })?;

        if self.abbreviated {
            self.engine.derive_record_ciphers()?;
            self.send_ccs_and_finished()?;
            self.state = ServerState::AwaitSecondFlight;
            return Ok(());
        }

        if self.peer_user_mapping {
            let entries = self.engine.config().supplemental_data().to_vec();
            self.engine
                .create_handshake(MessageType::SupplementalData, move |body, _| {
                    handshake_create_supplemental_data(body, &entries)
                })?;
        }

        self.engine
            .create_handshake(MessageType::Certificate, handshake_create_certificate)?;

        let suite = self.cipher_suite()?;
        if suite.as_key_exchange_algorithm() == KeyExchangeAlgorithm::Ecdhe {
            let client_random = self
                .client_random
                .ok_or_else(|| Error::UnexpectedMessage("No client random".to_string()))?;
            let curve = self.curve;

            let mut key_exchange = None;
            self.engine
                .create_handshake(MessageType::ServerKeyExchange, |body, engine| {
                    handshake_create_server_key_exchange(
                        body,
                        engine,
                        client_random,
                        random,
                        curve,
                        &mut key_exchange,
                    )
                })?;
            self.key_exchange = key_exchange;
        }

        let config = self.engine.config();
        if config.require_client_certificate() || config.cert_verifier().is_some() {
            self.cert_requested = true;
            self.engine
                .create_handshake(MessageType::CertificateRequest, |body, _| {
                    CertificateRequest::new().serialize(body);
                    Ok(())
                })?;
        }

        self.engine
            .create_handshake(MessageType::ServerHelloDone, |_body, _| Ok(()))?;

        self.state = ServerState::AwaitSecondFlight;
        Ok(())
    }

    /// Drain the client's second flight, then switch read direction at
    /// its ChangeCipherSpec.
    fn process_second_flight(&mut self) -> Result<(), Error> {
        loop {
            let Some(msg_type) = self.engine.incoming_handshake_type() else {
                break;
            };

            if self.abbreviated {
                return Err(Error::UnexpectedMessage(format!(
                    "Unexpected message in abbreviated handshake: {:?}",
                    msg_type
                )));
            }

            match msg_type {
                MessageType::SupplementalData => {
                    if self.certificate_seen || self.key_exchange_seen {
                        return Err(Error::UnexpectedMessage(
                            "SupplementalData out of order".to_string(),
                        ));
                    }
                    if !self.process_supplemental_data()? {
                        return Ok(());
                    }
                }
                MessageType::Certificate => {
                    if !self.cert_requested || self.certificate_seen || self.key_exchange_seen {
                        return Err(Error::UnexpectedMessage(
                            "Unsolicited client Certificate".to_string(),
                        ));
                    }
                    if !self.process_client_certificate()? {
                        return Ok(());
                    }
                }
                MessageType::ClientKeyExchange => {
                    if self.key_exchange_seen {
                        return Err(Error::UnexpectedMessage(
                            "Duplicate ClientKeyExchange".to_string(),
                        ));
                    }
                    if self.cert_requested && !self.certificate_seen {
                        return Err(Error::UnexpectedMessage(
                            "ClientKeyExchange before Certificate".to_string(),
                        ));
                    }
                    if !self.process_client_key_exchange()? {
                        return Ok(());
                    }
                }
                MessageType::CertificateVerify => {
                    if !self.key_exchange_seen || self.client_certificates.is_empty() {
                        return Err(Error::UnexpectedMessage(
                            "CertificateVerify out of order".to_string(),
                        ));
                    }
                    if !self.process_certificate_verify()? {
                        return Ok(());
                    }
                }
                other => {
                    return Err(Error::UnexpectedMessage(format!(
                        "Unexpected message in client flight: {:?}",
                        other
                    )));
                }
            }
        }

        let switch_ready = self.abbreviated || self.key_exchange_seen;
        if switch_ready
            && self
                .engine
                .next_record(ContentType::ChangeCipherSpec)
                .is_some()
        {
            self.engine.enable_peer_encryption()?;
            self.state = ServerState::AwaitClientFinished;
        }

        Ok(())
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
                "Client supplemental data type {} ({} bytes)",
                entry.data_type,
                entry.data.len()
            );
            self.engine
                .push_supplemental_data(entry.data_type, &entry.data);
        }

        Ok(true)
    }

    fn process_client_certificate(&mut self) -> Result<bool, Error> {
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

        self.certificate_seen = true;

        if certificate.certificate_list.is_empty() {
            if self.engine.config().require_client_certificate() {
                return Err(Error::CertificateError(
                    "Client certificate required but not provided".to_string(),
                ));
            }
            debug!("Client declined to send a certificate");
            return Ok(true);
        }

        for (i, cert) in certificate.certificate_list.iter().enumerate() {
            trace!("Client certificate #{} size: {} bytes", i + 1, cert.len());
            self.client_certificates.push(cert.0.clone());
        }

        if let Some(verifier) = self.engine.config().cert_verifier() {
            let chain: Vec<&[u8]> = self.client_certificates.iter().map(|c| &c[..]).collect();
            verifier
                .verify_certificate(&chain)
                .map_err(Error::CertificateError)?;
        }
        self.engine.push_peer_cert(&self.client_certificates[0]);

        Ok(true)
    }

    fn process_client_key_exchange(&mut self) -> Result<bool, Error> {
        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::ClientKeyExchange, &mut self.defragment_buffer)?
        else {
            return Ok(false);
        };

        let Body::ClientKeyExchange(ckx) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "ClientKeyExchange parse error".to_string(),
            ));
        };

        match &ckx.exchange_keys {
            ExchangeKeys::Ecdh(client_public) => {
                let key_exchange = self.key_exchange.take().ok_or_else(|| {
                    Error::UnexpectedMessage(
                        "ClientKeyExchange for a suite without ServerKeyExchange".to_string(),
                    )
                })?;

                let mut pre_master = self.engine.pop_buffer();
                let completed = key_exchange
                    .complete(client_public, &mut pre_master)
                    .map_err(Error::CryptoError);
                let derived = completed.and_then(|_| {
                    self.engine
                        .security_mut()
                        .derive_master_secret(&pre_master)
                        .map_err(Error::CryptoError)
                });
                self.engine.push_buffer(pre_master);
                derived?;
            }
            ExchangeKeys::EncryptedPreMasterSecret(ciphertext) => {
                let suite = self.cipher_suite()?;
                if suite.as_key_exchange_algorithm() != KeyExchangeAlgorithm::Rsa {
                    return Err(Error::UnexpectedMessage(
                        "RSA premaster for a non-RSA suite".to_string(),
                    ));
                }

                let credential = self
                    .engine
                    .config()
                    .credential()
                    .cloned()
                    .ok_or_else(|| Error::ConfigError("Server requires a credential".to_string()))?;

                // Bad padding silently yields a random premaster; the
                // handshake then fails at Finished (anti-Bleichenbacher).
                let version = self.engine.wire().version();
                let pre_master = credential
                    .decrypt_pre_master(ciphertext, version, &mut self.engine.rng)
                    .map_err(Error::CryptoError)?;

                self.engine
                    .security_mut()
                    .derive_master_secret(&pre_master)
                    .map_err(Error::CryptoError)?;
            }
        }

        // Keys must exist before the client's Finished can be decrypted.
        self.engine.derive_record_ciphers()?;
        self.key_exchange_seen = true;

        Ok(true)
    }

    fn process_certificate_verify(&mut self) -> Result<bool, Error> {
        if !self
            .engine
            .has_complete_handshake(MessageType::CertificateVerify)
        {
            return Ok(false);
        }

        // The signature covers the transcript up to (excluding) the
        // CertificateVerify itself; snapshot before consuming appends it.
        let mut transcript = self.engine.pop_buffer();
        transcript.extend_from_slice(self.engine.transcript_bytes());

        let result = self.process_certificate_verify_inner(&transcript);
        self.engine.push_buffer(transcript);

        result?;
        Ok(true)
    }

    fn process_certificate_verify_inner(&mut self, transcript: &[u8]) -> Result<(), Error> {
        let Some(handshake) = self
            .engine
            .next_handshake(MessageType::CertificateVerify, &mut self.defragment_buffer)?
        else {
            // has_complete_handshake was checked by the caller
            return Ok(());
        };

        let Body::CertificateVerify(cv) = &handshake.body else {
            return Err(Error::UnexpectedMessage(
                "CertificateVerify parse error".to_string(),
            ));
        };

        let leaf = &self.client_certificates[0];
        verify_signature(
            leaf,
            transcript,
            &cv.signed.signature,
            cv.signed.algorithm.hash,
            cv.signed.algorithm.signature,
        )
        .map_err(Error::CryptoError)?;

        debug!("Client CertificateVerify verified");
        self.cert_verify_seen = true;
        Ok(())
    }

    fn process_client_finished(&mut self) -> Result<(), Error> {
        if !self.engine.has_complete_handshake(MessageType::Finished) {
            return self.reject_unexpected(MessageType::Finished);
        }

        // A client that presented a certificate must prove possession.
        if !self.abbreviated && !self.client_certificates.is_empty() && !self.cert_verify_seen {
            return Err(Error::SecurityError(
                "Client certificate without CertificateVerify".to_string(),
            ));
        }

        // The expected value covers the transcript excluding the peer's
        // Finished, so compute before next_handshake appends it.
        let expected = self.engine.generate_verify_data(true)?;

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
                "Client Finished verification failed".to_string(),
            ));
        }
        debug!("Client Finished verified");

        if !self.abbreviated {
            debug!("Sending server CCS and Finished (flight 6)");
            self.engine.flight_begin(6);
            self.send_ccs_and_finished()?;
        }

        self.complete_handshake();
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
                let verify_data = engine.generate_verify_data(false)?;
                Finished::new(&verify_data).serialize(body);
                Ok(())
            })?;
        Ok(())
    }

    fn complete_handshake(&mut self) {
        self.engine.flight_stop_resend_timers();
        self.engine.push_connected();
        self.engine.release_application_data();
        self.state = ServerState::Running;

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
            peer_certificate: self.client_certificates.first().cloned(),
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
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("abbreviated", &self.abbreviated)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::too_many_arguments)]
fn handshake_create_server_hello(
    body: &mut Buf,
    engine: &mut Engine,
    random: Random,
    session_id: SessionId,
    echo_heartbeat: Option<HeartbeatMode>,
    echo_max_fragment: Option<MaxFragmentLength>,
    echo_user_mapping: bool,
) -> Result<(), Error> {
    let cs = engine
        .cipher_suite()
        .ok_or_else(|| Error::UnexpectedMessage("No cipher suite selected".to_string()))?;

    let mut sh = ServerHello::new(engine.wire().version(), random, session_id, cs);

    let mut scratch = Buf::new();

    if let Some(length) = echo_max_fragment {
        MaxFragmentLengthExtension::new(length).serialize(&mut scratch);
        let data = std::mem::take(&mut scratch).into_vec();
        sh.extensions
            .push(Extension::new(ExtensionType::MaxFragmentLength, data));
    }

    if echo_user_mapping {
        let types: Vec<u8> = engine
            .config()
            .supplemental_data()
            .iter()
            .map(|(t, _)| *t as u8)
            .collect();
        UserMappingExtension::new(&types).serialize(&mut scratch);
        let data = std::mem::take(&mut scratch).into_vec();
        sh.extensions
            .push(Extension::new(ExtensionType::UserMapping, data));
    }

    if let Some(mode) = echo_heartbeat {
        HeartbeatExtension::new(mode).serialize(&mut scratch);
        let data = std::mem::take(&mut scratch).into_vec();
        sh.extensions
            .push(Extension::new(ExtensionType::Heartbeat, data));
    }

    sh.serialize(body);
    Ok(())
}

fn handshake_create_certificate(body: &mut Buf, engine: &mut Engine) -> Result<(), Error> {
    let credential = engine
        .config()
        .credential()
        .ok_or_else(|| Error::ConfigError("Server requires a credential".to_string()))?;

    let certs = credential.chain().iter().cloned().map(Asn1Cert).collect();
    Certificate::new(certs).serialize(body);
    Ok(())
}

fn handshake_create_server_key_exchange(
    body: &mut Buf,
    engine: &mut Engine,
    client_random: Random,
    server_random: Random,
    curve: NamedCurve,
    key_exchange_out: &mut Option<KeyExchange>,
) -> Result<(), Error> {
    let credential = engine
        .config()
        .credential()
        .cloned()
        .ok_or_else(|| Error::ConfigError("Server requires a credential".to_string()))?;
    let key = credential.signing_key().ok_or_else(|| {
        Error::ConfigError("Credential cannot sign ServerKeyExchange".to_string())
    })?;

    let key_exchange = KeyExchange::new(curve).map_err(Error::CryptoError)?;
    let mut params = EcdhParams::new(curve, key_exchange.public_key().to_vec());

    // signed_data = client_random || server_random || params
    let mut signed_data = Buf::new();
    client_random.serialize(&mut signed_data);
    server_random.serialize(&mut signed_data);
    params.serialize(&mut signed_data, false);

    let algorithm = SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, key.algorithm());
    let mut signature = Buf::new();
    key.sign(&signed_data, algorithm.hash, &mut signature)
        .map_err(Error::CryptoError)?;
    params.signature = Some(DigitallySigned::new(algorithm, signature.into_vec()));

    let ske = ServerKeyExchange {
        params: ServerKeyExchangeParams::Ecdh(params),
    };
    ske.serialize(body);

    *key_exchange_out = Some(key_exchange);
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
