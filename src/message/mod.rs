//! Wire codecs for the record layer and handshake messages.
//!
//! Every type follows the same pattern: a nom `parse` and a `serialize`
//! writing to a [`Buf`]. The handshake [`Body`] owns its payload bytes;
//! only [`Body::Fragment`] keeps a range into the source record buffer so
//! defragmentation can run without copying twice.
//!
//! [`Buf`]: crate::buffer::Buf
//! [`Body`]: handshake::Body
//! [`Body::Fragment`]: handshake::Body::Fragment

mod alert;
mod certificate;
mod certificate_request;
mod certificate_verify;
mod client_hello;
mod client_key_exchange;
mod digitally_signed;
mod extension;
mod extensions;
mod finished;
mod handshake;
mod heartbeat;
mod id;
mod random;
mod record;
mod server_hello;
mod server_key_exchange;
mod supplemental_data;

use arrayvec::ArrayVec;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use certificate::{Asn1Cert, Certificate};
pub use certificate_request::CertificateRequest;
pub use certificate_verify::CertificateVerify;
pub use client_hello::ClientHello;
pub use client_key_exchange::{ClientKeyExchange, ExchangeKeys};
pub use digitally_signed::DigitallySigned;
pub use extension::{parse_extensions, Extension, ExtensionType, ExtensionVec};
pub use extensions::ec_point_formats::ECPointFormatsExtension;
pub use extensions::heartbeat::HeartbeatExtension;
pub use extensions::max_fragment_length::MaxFragmentLengthExtension;
pub use extensions::server_name::ServerNameExtension;
pub use extensions::signature_algorithms::SignatureAlgorithmsExtension;
pub use extensions::supported_groups::SupportedGroupsExtension;
pub use extensions::user_mapping::UserMappingExtension;
pub use finished::Finished;
pub use handshake::{Body, Handshake, Header, MessageType};
pub use heartbeat::{Heartbeat, HeartbeatMessageType};
pub use id::SessionId;
pub use random::Random;
pub use record::Record;
pub use server_hello::ServerHello;
pub use server_key_exchange::{EcdhParams, ServerKeyExchange, ServerKeyExchangeParams};
pub use supplemental_data::{SupplementalData, SupplementalDataEntry};

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::types::{HashAlgorithm, SignatureAlgorithm};

pub type CipherSuiteVec = ArrayVec<CipherSuite, { CipherSuite::supported().len() }>;

/// TLS 1.2 cipher suites understood by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    /// ECDHE with ECDSA authentication, AES-256-GCM, SHA-384
    ECDHE_ECDSA_AES256_GCM_SHA384, // 0xC02C
    /// ECDHE with ECDSA authentication, AES-128-GCM, SHA-256
    ECDHE_ECDSA_AES128_GCM_SHA256, // 0xC02B
    /// ECDHE with RSA authentication, AES-128-GCM, SHA-256
    ECDHE_RSA_AES128_GCM_SHA256, // 0xC02F
    /// Static RSA key transport, AES-128-GCM, SHA-256
    RSA_AES128_GCM_SHA256, // 0x009C

    /// Unknown or unsupported cipher suite by its IANA value
    Unknown(u16),
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl CipherSuite {
    /// Convert the 16-bit IANA value to a `CipherSuite`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02F => CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
            0x009C => CipherSuite::RSA_AES128_GCM_SHA256,
            _ => CipherSuite::Unknown(value),
        }
    }

    /// Return the 16-bit IANA value for this cipher suite.
    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256 => 0xC02F,
            CipherSuite::RSA_AES128_GCM_SHA256 => 0x009C,
            CipherSuite::Unknown(value) => *value,
        }
    }

    /// Parse a `CipherSuite` from network byte order.
    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    /// Length in bytes of verify_data for Finished MACs.
    pub fn verify_data_length(&self) -> usize {
        12
    }

    /// The key exchange algorithm family for this cipher suite.
    pub fn as_key_exchange_algorithm(&self) -> KeyExchangeAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
            | CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
            | CipherSuite::ECDHE_RSA_AES128_GCM_SHA256 => KeyExchangeAlgorithm::Ecdhe,
            CipherSuite::RSA_AES128_GCM_SHA256 => KeyExchangeAlgorithm::Rsa,
            CipherSuite::Unknown(_) => KeyExchangeAlgorithm::Unknown,
        }
    }

    /// Whether this cipher suite uses ECC-based key exchange.
    pub fn has_ecc(&self) -> bool {
        self.as_key_exchange_algorithm() == KeyExchangeAlgorithm::Ecdhe
    }

    /// The hash algorithm sealed into the PRF at master secret derivation.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => HashAlgorithm::SHA384,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
            | CipherSuite::ECDHE_RSA_AES128_GCM_SHA256
            | CipherSuite::RSA_AES128_GCM_SHA256 => HashAlgorithm::SHA256,
            CipherSuite::Unknown(_) => HashAlgorithm::Unknown(0),
        }
    }

    /// The signature algorithm the server credential must carry, or `None`
    /// for suites that authenticate via key transport.
    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
            | CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => Some(SignatureAlgorithm::ECDSA),
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256 => Some(SignatureAlgorithm::RSA),
            CipherSuite::RSA_AES128_GCM_SHA256 => None,
            CipherSuite::Unknown(_) => None,
        }
    }

    /// Returns true if this cipher suite is supported by this implementation.
    pub fn is_supported(&self) -> bool {
        Self::supported().contains(self)
    }

    /// All supported cipher suites in server preference order.
    pub const fn supported() -> &'static [CipherSuite; 4] {
        &[
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
            CipherSuite::RSA_AES128_GCM_SHA256,
        ]
    }

    /// Cipher suites compatible with a credential carrying the given
    /// signature algorithm.
    pub fn compatible_with_signature(sig: SignatureAlgorithm) -> &'static [CipherSuite] {
        match sig {
            SignatureAlgorithm::ECDSA => &[
                CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            ],
            SignatureAlgorithm::RSA => &[CipherSuite::ECDHE_RSA_AES128_GCM_SHA256],
            SignatureAlgorithm::Unknown(_) => &[],
        }
    }
}

/// Key exchange algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    Ecdhe,
    Rsa,
    Unknown,
}

pub type CertificateTypeVec =
    ArrayVec<ClientCertificateType, { ClientCertificateType::supported().len() }>;

/// Client certificate types carried in CertificateRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum ClientCertificateType {
    RSA_SIGN,
    ECDSA_SIGN,
    Unknown(u8),
}

impl Default for ClientCertificateType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ClientCertificateType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ClientCertificateType::RSA_SIGN,
            64 => ClientCertificateType::ECDSA_SIGN,
            _ => ClientCertificateType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ClientCertificateType::RSA_SIGN => 1,
            ClientCertificateType::ECDSA_SIGN => 64,
            ClientCertificateType::Unknown(value) => *value,
        }
    }

    /// Supported client certificate types.
    pub const fn supported() -> &'static [ClientCertificateType; 2] {
        &[
            ClientCertificateType::ECDSA_SIGN,
            ClientCertificateType::RSA_SIGN,
        ]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientCertificateType> {
        let (input, value) = be_u8(input)?;
        Ok((input, ClientCertificateType::from_u8(value)))
    }
}
