//! Cipher suite key sizing and record cipher construction.

use crate::error::Error;
use crate::message::CipherSuite;

use super::cipher::{Iv, RecordCipher};
use super::secrets::KeyBlock;

/// (enc_key_len, fixed_iv_len) for a suite. AEAD suites have no MAC key.
pub fn key_lengths(suite: CipherSuite) -> (usize, usize) {
    match suite {
        CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => (32, 4),
        CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
        | CipherSuite::ECDHE_RSA_AES128_GCM_SHA256
        | CipherSuite::RSA_AES128_GCM_SHA256 => (16, 4),
        CipherSuite::Unknown(_) => (0, 0),
    }
}

/// One direction's fully built cipher state. Constructed complete so the
/// change-cipher-spec swap is all-or-nothing.
pub struct DirectionCipher {
    pub cipher: RecordCipher,
    pub fixed_iv: Iv,
}

impl std::fmt::Debug for DirectionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionCipher")
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// Both directions' cipher states for a negotiated suite.
pub struct CipherPair {
    pub client_write: DirectionCipher,
    pub server_write: DirectionCipher,
}

/// Build both record ciphers from a key block.
///
/// An unsupported suite here is an internal error: negotiation must only
/// ever pick from [`CipherSuite::supported()`].
pub fn create_record_ciphers(suite: CipherSuite, keys: &KeyBlock) -> Result<CipherPair, Error> {
    if !suite.is_supported() {
        return Err(Error::CryptoError(format!(
            "No cipher implementation for suite {:?}",
            suite
        )));
    }

    let client = RecordCipher::new(&keys.client_write_key)
        .map_err(|e| Error::CryptoError(format!("Client write cipher: {}", e)))?;
    let server = RecordCipher::new(&keys.server_write_key)
        .map_err(|e| Error::CryptoError(format!("Server write cipher: {}", e)))?;

    Ok(CipherPair {
        client_write: DirectionCipher {
            cipher: client,
            fixed_iv: keys.client_write_iv,
        },
        server_write: DirectionCipher {
            cipher: server,
            fixed_iv: keys.server_write_iv,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_lengths_per_suite() {
        assert_eq!(
            key_lengths(CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384),
            (32, 4)
        );
        assert_eq!(key_lengths(CipherSuite::RSA_AES128_GCM_SHA256), (16, 4));
    }

    #[test]
    fn unsupported_suite_is_internal_error() {
        let keys = KeyBlock {
            client_write_key: vec![0; 16],
            server_write_key: vec![0; 16],
            client_write_iv: Iv([0; 4]),
            server_write_iv: Iv([0; 4]),
        };
        let result = create_record_ciphers(CipherSuite::Unknown(0x1234), &keys);
        assert!(result.is_err());
    }

    #[test]
    fn supported_suite_builds_both_directions() {
        let keys = KeyBlock {
            client_write_key: vec![1; 16],
            server_write_key: vec![2; 16],
            client_write_iv: Iv([1; 4]),
            server_write_iv: Iv([2; 4]),
        };
        let pair = create_record_ciphers(CipherSuite::ECDHE_RSA_AES128_GCM_SHA256, &keys).unwrap();
        assert_ne!(pair.client_write.fixed_iv, pair.server_write.fixed_iv);
    }
}
