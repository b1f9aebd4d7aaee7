//! Cryptographic primitives: AEAD record protection, the TLS 1.2 PRF,
//! key agreement, and credential handling.

mod cipher;
mod credentials;
mod key_exchange;
mod prf;
mod secrets;
mod suites;

pub(crate) use cipher::{Aad, Iv, Nonce, RecordCipher};
pub(crate) use cipher::{AEAD_OVERHEAD, EXPLICIT_NONCE_LEN, GCM_TAG_LEN};
pub(crate) use key_exchange::{rsa_pre_master_secret, KeyExchange};
pub(crate) use prf::verify_data;
pub(crate) use secrets::SecurityParameters;
pub(crate) use suites::{create_record_ciphers, CipherPair, DirectionCipher};

pub use credentials::{
    calculate_fingerprint, encrypt_pre_master, verify_signature, CertVerifier, Credential,
    FingerprintVerifier, SigningKey,
};
