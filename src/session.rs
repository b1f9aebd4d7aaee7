//! Session export and the cross-connection resumption cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use zeroize::Zeroize;

use crate::message::{CipherSuite, SessionId};
use crate::types::CompressionMethod;

/// Exportable snapshot of a completed negotiation, sufficient to attempt
/// an abbreviated handshake on a new connection.
#[derive(Clone)]
pub struct SessionParameters {
    pub id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression: CompressionMethod,
    pub master_secret: [u8; 48],
    /// DER of the peer's leaf certificate, when one was presented.
    pub peer_certificate: Option<Vec<u8>>,
}

impl Drop for SessionParameters {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl std::fmt::Debug for SessionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParameters")
            .field("id", &self.id)
            .field("cipher_suite", &self.cipher_suite)
            .field("compression", &self.compression)
            .field("peer_certificate", &self.peer_certificate.is_some())
            .finish_non_exhaustive()
    }
}

/// Shared resumption cache, keyed by session id.
///
/// The cache is the only cross-connection shared state; a mutex serializes
/// insert/lookup/invalidate so concurrent connections can share one cache.
#[derive(Debug, Default, Clone)]
pub struct SessionCache {
    inner: Arc<Mutex<HashMap<SessionId, SessionParameters>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        SessionCache::default()
    }

    pub fn insert(&self, parameters: SessionParameters) {
        if parameters.id.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(parameters.id, parameters);
    }

    pub fn lookup(&self, id: &SessionId) -> Option<SessionParameters> {
        if id.is_empty() {
            return None;
        }
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(id).cloned()
    }

    pub fn invalidate(&self, id: &SessionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeededRng;

    fn params(id: SessionId) -> SessionParameters {
        SessionParameters {
            id,
            cipher_suite: CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            compression: CompressionMethod::Null,
            master_secret: [0x42; 48],
            peer_certificate: None,
        }
    }

    #[test]
    fn cache_lookup_after_insert() {
        let mut rng = SeededRng::new(Some(1));
        let id = SessionId::random(32, &mut rng);

        let cache = SessionCache::new();
        cache.insert(params(id));

        let found = cache.lookup(&id).unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.master_secret, [0x42; 48]);
    }

    #[test]
    fn invalidate_removes_entry() {
        let mut rng = SeededRng::new(Some(2));
        let id = SessionId::random(16, &mut rng);

        let cache = SessionCache::new();
        cache.insert(params(id));
        cache.invalidate(&id);

        assert!(cache.lookup(&id).is_none());
    }

    #[test]
    fn empty_id_is_never_cached() {
        let cache = SessionCache::new();
        cache.insert(params(SessionId::empty()));
        assert!(cache.lookup(&SessionId::empty()).is_none());
    }

}
