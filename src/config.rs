use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{CertVerifier, Credential};
use crate::message::{CipherSuite, CipherSuiteVec};
use crate::session::SessionCache;
use crate::types::{HeartbeatMode, MaxFragmentLength};
use crate::Error;

/// Connection configuration, shared between client and server.
#[derive(Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    require_client_certificate: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    cipher_suites: CipherSuiteVec,
    credential: Option<Arc<Credential>>,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    session_cache: Option<SessionCache>,
    server_name: Option<String>,
    max_fragment_length: Option<MaxFragmentLength>,
    heartbeat: Option<HeartbeatMode>,
    supplemental_data: Vec<(u16, Vec<u8>)>,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 30,
            max_queue_tx: 10,
            require_client_certificate: false,
            flight_start_rto: Duration::from_secs(1),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            cipher_suites: CipherSuite::supported().iter().copied().collect(),
            credential: None,
            cert_verifier: None,
            session_cache: None,
            server_name: None,
            max_fragment_length: None,
            heartbeat: None,
            supplemental_data: Vec::new(),
            rng_seed: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest size datagrams we will produce. Not used for stream
    /// transports.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max amount of incoming packets to buffer before rejecting more input.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of outgoing packets to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// For a server, require a client certificate.
    ///
    /// This will cause the server to send a CertificateRequest message.
    /// Makes the server fail if the client does not send a certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry with a ±25% jitter.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Cipher suites to offer (client) or accept (server), in preference
    /// order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Local credential, when one is configured.
    #[inline(always)]
    pub fn credential(&self) -> Option<&Arc<Credential>> {
        self.credential.as_ref()
    }

    /// Peer certificate verifier, when one is configured.
    ///
    /// Without a verifier, peer certificates are surfaced to the caller
    /// but not checked for trust.
    #[inline(always)]
    pub fn cert_verifier(&self) -> Option<&Arc<dyn CertVerifier>> {
        self.cert_verifier.as_ref()
    }

    /// Session cache for resumption, when one is configured.
    #[inline(always)]
    pub fn session_cache(&self) -> Option<&SessionCache> {
        self.session_cache.as_ref()
    }

    /// Host name for the server_name extension (client only).
    #[inline(always)]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Maximum fragment length to negotiate (client only).
    #[inline(always)]
    pub fn max_fragment_length(&self) -> Option<MaxFragmentLength> {
        self.max_fragment_length
    }

    /// Heartbeat mode to negotiate, if any.
    #[inline(always)]
    pub fn heartbeat(&self) -> Option<HeartbeatMode> {
        self.heartbeat
    }

    /// Supplemental data entries to send, as (type, data) pairs.
    #[inline(always)]
    pub fn supplemental_data(&self) -> &[(u16, Vec<u8>)] {
        &self.supplemental_data
    }

    /// Seed for deterministic protocol randomness in tests.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mtu", &self.mtu)
            .field("cipher_suites", &self.cipher_suites)
            .field("credential", &self.credential)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Builder for connection configuration.
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    require_client_certificate: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    cipher_suites: CipherSuiteVec,
    credential: Option<Arc<Credential>>,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    session_cache: Option<SessionCache>,
    server_name: Option<String>,
    max_fragment_length: Option<MaxFragmentLength>,
    heartbeat: Option<HeartbeatMode>,
    supplemental_data: Vec<(u16, Vec<u8>)>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// The largest size datagrams we will produce.
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the max amount of incoming packets to buffer before rejecting more input.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max amount of outgoing packets to buffer.
    ///
    /// Defaults to 10.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set whether to require a client certificate (for servers).
    ///
    /// This will cause the server to send a CertificateRequest message.
    /// Makes the server fail if the client does not send a certificate.
    /// Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Set the time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry with a ±25% jitter.
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the cipher suites to offer/accept, in preference order.
    ///
    /// Defaults to all supported suites.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.iter().copied().collect();
        self
    }

    /// Set the local credential (certificate chain plus private key).
    ///
    /// Required for servers. For clients, used when the server requests
    /// a certificate.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(Arc::new(credential));
        self
    }

    /// Set the peer certificate verifier.
    pub fn cert_verifier(mut self, verifier: Arc<dyn CertVerifier>) -> Self {
        self.cert_verifier = Some(verifier);
        self
    }

    /// Set the session cache used for resumption.
    pub fn session_cache(mut self, cache: SessionCache) -> Self {
        self.session_cache = Some(cache);
        self
    }

    /// Set the host name sent in the server_name extension (client only).
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    /// Set the maximum fragment length to negotiate (client only).
    pub fn max_fragment_length(mut self, length: MaxFragmentLength) -> Self {
        self.max_fragment_length = Some(length);
        self
    }

    /// Set the heartbeat mode to negotiate.
    pub fn heartbeat(mut self, mode: HeartbeatMode) -> Self {
        self.heartbeat = Some(mode);
        self
    }

    /// Add a supplemental data entry to send after the hello exchange.
    ///
    /// Requires the peer to negotiate the user_mapping extension.
    pub fn supplemental_data(mut self, data_type: u16, data: Vec<u8>) -> Self {
        self.supplemental_data.push((data_type, data));
        self
    }

    /// Seed protocol randomness for deterministic tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Validates that the configured credential can serve at least one of
    /// the configured cipher suites. A key-agreement-only credential is
    /// rejected here rather than failing mid-handshake.
    pub fn build(self) -> Result<Config, Error> {
        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigError("No cipher suites configured".into()));
        }

        if let Some(credential) = &self.credential {
            let servable = credential.supported_suites();
            if servable.is_empty() {
                return Err(Error::ConfigError(
                    "Credential has key agreement capability only, which no supported cipher suite uses".into(),
                ));
            }
            if !self.cipher_suites.iter().any(|s| servable.contains(s)) {
                return Err(Error::ConfigError(format!(
                    "Credential cannot serve any configured cipher suite (can serve {:?})",
                    servable
                )));
            }
        }

        Ok(Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            require_client_certificate: self.require_client_certificate,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            cipher_suites: self.cipher_suites,
            credential: self.credential,
            cert_verifier: self.cert_verifier,
            session_cache: self.session_cache,
            server_name: self.server_name,
            max_fragment_length: self.max_fragment_length,
            heartbeat: self.heartbeat,
            supplemental_data: self.supplemental_data,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert_eq!(config.mtu(), 1150);
        assert_eq!(config.flight_retries(), 4);
        assert_eq!(config.cipher_suites(), CipherSuite::supported());
    }

    #[test]
    fn agreement_credential_rejected_at_build() {
        let result = Config::builder()
            .credential(Credential::Agreement { chain: vec![vec![]] })
            .build();
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn credential_must_match_offered_suites() {
        let cred = Credential::self_signed("test").unwrap();
        let result = Config::builder()
            .credential(cred)
            .cipher_suites(&[CipherSuite::RSA_AES128_GCM_SHA256])
            .build();
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn ecdsa_credential_with_default_suites_builds() {
        let cred = Credential::self_signed("test").unwrap();
        let config = Config::builder().credential(cred).build().unwrap();
        assert!(config.credential().is_some());
    }
}
