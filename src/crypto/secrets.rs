//! Negotiated security parameters and key material derivation.

use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::message::CipherSuite;
use crate::types::CompressionMethod;

use super::cipher::Iv;
use super::prf;
use super::suites;

/// Per-direction key material split out of the key block.
pub struct KeyBlock {
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Iv,
    pub server_write_iv: Iv,
}

impl Drop for KeyBlock {
    fn drop(&mut self) {
        self.client_write_key.zeroize();
        self.server_write_key.zeroize();
    }
}

/// The parameters negotiated for a connection.
///
/// The master secret is immutable once derived. Renegotiation is not
/// supported, so a second derivation on the same parameters is a logic
/// error.
pub struct SecurityParameters {
    cipher_suite: Option<CipherSuite>,
    compression: CompressionMethod,
    client_random: [u8; 32],
    server_random: [u8; 32],
    master_secret: MasterSecret,
}

struct MasterSecret(Option<[u8; 48]>);

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl SecurityParameters {
    pub fn new() -> Self {
        SecurityParameters {
            cipher_suite: None,
            compression: CompressionMethod::Null,
            client_random: [0; 32],
            server_random: [0; 32],
            master_secret: MasterSecret(None),
        }
    }

    pub fn set_cipher_suite(&mut self, suite: CipherSuite) {
        self.cipher_suite = Some(suite);
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    pub fn set_compression(&mut self, compression: CompressionMethod) {
        self.compression = compression;
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    pub fn set_client_random(&mut self, random: [u8; 32]) {
        self.client_random = random;
    }

    pub fn set_server_random(&mut self, random: [u8; 32]) {
        self.server_random = random;
    }

    pub fn client_random(&self) -> &[u8; 32] {
        &self.client_random
    }

    pub fn server_random(&self) -> &[u8; 32] {
        &self.server_random
    }

    pub fn has_master_secret(&self) -> bool {
        self.master_secret.0.is_some()
    }

    pub fn master_secret(&self) -> Option<&[u8; 48]> {
        self.master_secret.0.as_ref()
    }

    /// Derive the master secret from a premaster secret.
    pub fn derive_master_secret(&mut self, pre_master_secret: &[u8]) -> Result<(), String> {
        assert!(
            self.master_secret.0.is_none(),
            "Master secret already derived"
        );

        let suite = self
            .cipher_suite
            .ok_or_else(|| "No cipher suite selected".to_string())?;

        let mut out = Buf::new();
        let mut scratch = Buf::new();
        prf::calculate_master_secret(
            pre_master_secret,
            &self.client_random,
            &self.server_random,
            &mut out,
            &mut scratch,
            suite.hash_algorithm(),
        )?;

        let mut secret = [0u8; 48];
        secret.copy_from_slice(&out);
        self.master_secret = MasterSecret(Some(secret));

        out.zeroize();
        scratch.zeroize();

        Ok(())
    }

    /// Install an already-derived master secret (session resumption).
    pub fn set_master_secret(&mut self, secret: [u8; 48]) {
        assert!(
            self.master_secret.0.is_none(),
            "Master secret already derived"
        );
        self.master_secret = MasterSecret(Some(secret));
    }

    /// Expand the master secret into the per-direction key block.
    pub fn derive_key_block(&self) -> Result<KeyBlock, String> {
        let suite = self
            .cipher_suite
            .ok_or_else(|| "No cipher suite selected".to_string())?;
        let master = self
            .master_secret
            .0
            .as_ref()
            .ok_or_else(|| "No master secret derived".to_string())?;

        let (enc_key_len, fixed_iv_len) = suites::key_lengths(suite);
        let total = 2 * enc_key_len + 2 * fixed_iv_len;

        let mut out = Buf::new();
        let mut scratch = Buf::new();
        prf::key_expansion(
            master,
            &self.client_random,
            &self.server_random,
            &mut out,
            &mut scratch,
            total,
            suite.hash_algorithm(),
        )?;

        // AEAD suites have no MAC keys; the block is
        // client_key || server_key || client_iv || server_iv
        let (client_key, rest) = out.split_at(enc_key_len);
        let (server_key, rest) = rest.split_at(enc_key_len);
        let (client_iv, server_iv) = rest.split_at(fixed_iv_len);

        let block = KeyBlock {
            client_write_key: client_key.to_vec(),
            server_write_key: server_key.to_vec(),
            client_write_iv: Iv::new(client_iv),
            server_write_iv: Iv::new(server_iv),
        };

        out.zeroize();
        scratch.zeroize();

        Ok(block)
    }
}

impl Default for SecurityParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SecurityParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityParameters")
            .field("cipher_suite", &self.cipher_suite)
            .field("compression", &self.compression)
            .field("has_master_secret", &self.master_secret.0.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(suite: CipherSuite) -> SecurityParameters {
        let mut p = SecurityParameters::new();
        p.set_cipher_suite(suite);
        p.set_client_random([1u8; 32]);
        p.set_server_random([2u8; 32]);
        p
    }

    #[test]
    fn key_block_split_aes128() {
        let mut p = params(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);
        p.derive_master_secret(&[9u8; 32]).unwrap();

        let block = p.derive_key_block().unwrap();
        assert_eq!(block.client_write_key.len(), 16);
        assert_eq!(block.server_write_key.len(), 16);
        assert_ne!(block.client_write_key, block.server_write_key);
        assert_ne!(block.client_write_iv, block.server_write_iv);
    }

    #[test]
    fn key_block_split_aes256_sha384() {
        let mut p = params(CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384);
        p.derive_master_secret(&[9u8; 32]).unwrap();

        let block = p.derive_key_block().unwrap();
        assert_eq!(block.client_write_key.len(), 32);
        assert_eq!(block.server_write_key.len(), 32);
    }

    #[test]
    fn both_sides_derive_same_keys() {
        let mut a = params(CipherSuite::ECDHE_RSA_AES128_GCM_SHA256);
        let mut b = params(CipherSuite::ECDHE_RSA_AES128_GCM_SHA256);
        a.derive_master_secret(&[9u8; 32]).unwrap();
        b.derive_master_secret(&[9u8; 32]).unwrap();

        assert_eq!(a.master_secret().unwrap(), b.master_secret().unwrap());

        let block_a = a.derive_key_block().unwrap();
        let block_b = b.derive_key_block().unwrap();
        assert_eq!(block_a.client_write_key, block_b.client_write_key);
        assert_eq!(block_a.server_write_iv, block_b.server_write_iv);
    }

    #[test]
    #[should_panic]
    fn second_derivation_panics() {
        let mut p = params(CipherSuite::RSA_AES128_GCM_SHA256);
        p.derive_master_secret(&[9u8; 48]).unwrap();
        p.derive_master_secret(&[9u8; 48]).unwrap();
    }
}
