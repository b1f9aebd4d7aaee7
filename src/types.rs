//! Shared wire-level enums and numeric types.
//!
//! These are used by both the stream (TLS) and datagram (DTLS) record
//! layers as well as the handshake message codecs.

use std::fmt;

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;

/// TLS record content types (RFC 5246 §6.2.1, RFC 6520).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Heartbeat,
    Unknown(u8),
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Unknown(0)
    }
}

impl ContentType {
    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Heartbeat => 24,
            ContentType::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, value) = be_u8(input)?;
        let ctype = match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            24 => ContentType::Heartbeat,
            _ => ContentType::Unknown(value),
        };
        Ok((input, ctype))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.as_u8());
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Protocol versions understood by the engine.
///
/// The record layer carries either the stream (TLS) or datagram (DTLS)
/// encoding of version 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    TLS1_2,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        let protocol_version = match version {
            0x0303 => ProtocolVersion::TLS1_2,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(version),
        };
        Ok((input, protocol_version))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Whether records are framed for a byte stream or for datagrams.
///
/// Datagram records carry an explicit epoch and 48-bit sequence number in
/// the header; stream records keep both implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Stream,
    Datagram,
}

impl WireFormat {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            WireFormat::Stream => ProtocolVersion::TLS1_2,
            WireFormat::Datagram => ProtocolVersion::DTLS1_2,
        }
    }

    /// Record header length on the wire.
    pub fn header_len(&self) -> usize {
        match self {
            WireFormat::Stream => 5,
            WireFormat::Datagram => 13,
        }
    }

    /// Handshake message header length on the wire.
    pub fn handshake_header_len(&self) -> usize {
        match self {
            WireFormat::Stream => 4,
            WireFormat::Datagram => 12,
        }
    }
}

/// Epoch + sequence number for a record.
///
/// The epoch is a generation counter bumped on every ChangeCipherSpec.
/// For stream transports the epoch never appears on the wire but still
/// scopes the implicit sequence numbering.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sequence {
    pub epoch: u16,
    pub sequence_number: u64,
}

impl Sequence {
    pub fn new(epoch: u16) -> Self {
        Sequence {
            epoch,
            sequence_number: 0,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.sequence_number)
    }
}

/// Record-layer compression methods. Only Null is implemented; the
/// transform hook remains in the record path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Null,
    Unknown(u8),
}

impl Default for CompressionMethod {
    fn default() -> Self {
        CompressionMethod::Null
    }
}

impl CompressionMethod {
    pub fn as_u8(&self) -> u8 {
        match self {
            CompressionMethod::Null => 0,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CompressionMethod> {
        let (input, value) = be_u8(input)?;
        let method = match value {
            0 => CompressionMethod::Null,
            _ => CompressionMethod::Unknown(value),
        };
        Ok((input, method))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.as_u8());
    }
}

/// Hash algorithms used by the PRF and signatures (RFC 5246 §7.4.1.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
    Unknown(u8),
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Unknown(0)
    }
}

impl HashAlgorithm {
    pub fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::SHA256 => 4,
            HashAlgorithm::SHA384 => 5,
            HashAlgorithm::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HashAlgorithm> {
        let (input, value) = be_u8(input)?;
        let hash = match value {
            4 => HashAlgorithm::SHA256,
            5 => HashAlgorithm::SHA384,
            _ => HashAlgorithm::Unknown(value),
        };
        Ok((input, hash))
    }

    /// Digest output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
            HashAlgorithm::Unknown(_) => 0,
        }
    }
}

/// Signature algorithms (RFC 5246 §7.4.1.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RSA,
    ECDSA,
    Unknown(u8),
}

impl SignatureAlgorithm {
    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureAlgorithm::RSA => 1,
            SignatureAlgorithm::ECDSA => 3,
            SignatureAlgorithm::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAlgorithm> {
        let (input, value) = be_u8(input)?;
        let sig = match value {
            1 => SignatureAlgorithm::RSA,
            3 => SignatureAlgorithm::ECDSA,
            _ => SignatureAlgorithm::Unknown(value),
        };
        Ok((input, sig))
    }
}

/// A (hash, signature) pair as advertised in signature_algorithms and
/// carried in DigitallySigned structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAndHashAlgorithm {
    pub hash: HashAlgorithm,
    pub signature: SignatureAlgorithm,
}

impl SignatureAndHashAlgorithm {
    pub fn new(hash: HashAlgorithm, signature: SignatureAlgorithm) -> Self {
        SignatureAndHashAlgorithm { hash, signature }
    }

    /// The pairs this engine can produce or verify, in preference order.
    pub fn supported() -> &'static [SignatureAndHashAlgorithm] {
        &[
            SignatureAndHashAlgorithm {
                hash: HashAlgorithm::SHA256,
                signature: SignatureAlgorithm::ECDSA,
            },
            SignatureAndHashAlgorithm {
                hash: HashAlgorithm::SHA256,
                signature: SignatureAlgorithm::RSA,
            },
            SignatureAndHashAlgorithm {
                hash: HashAlgorithm::SHA384,
                signature: SignatureAlgorithm::ECDSA,
            },
            SignatureAndHashAlgorithm {
                hash: HashAlgorithm::SHA384,
                signature: SignatureAlgorithm::RSA,
            },
        ]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAndHashAlgorithm> {
        let (input, hash) = HashAlgorithm::parse(input)?;
        let (input, signature) = SignatureAlgorithm::parse(input)?;
        Ok((input, SignatureAndHashAlgorithm { hash, signature }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.hash.as_u8());
        output.push(self.signature.as_u8());
    }
}

/// Named groups for ECDHE (RFC 8422).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedCurve {
    Secp256r1,
    X25519,
    Unknown(u16),
}

impl Default for NamedCurve {
    fn default() -> Self {
        NamedCurve::Unknown(0)
    }
}

impl NamedCurve {
    pub fn as_u16(&self) -> u16 {
        match self {
            NamedCurve::Secp256r1 => 0x0017,
            NamedCurve::X25519 => 0x001D,
            NamedCurve::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedCurve> {
        let (input, value) = be_u16(input)?;
        let curve = match value {
            0x0017 => NamedCurve::Secp256r1,
            0x001D => NamedCurve::X25519,
            _ => NamedCurve::Unknown(value),
        };
        Ok((input, curve))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, NamedCurve::Unknown(_))
    }

    /// Groups this engine offers, in preference order.
    pub fn supported() -> &'static [NamedCurve] {
        &[NamedCurve::X25519, NamedCurve::Secp256r1]
    }
}

/// Negotiable maximum fragment lengths (RFC 6066 §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxFragmentLength {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
}

impl MaxFragmentLength {
    pub fn as_u8(&self) -> u8 {
        match self {
            MaxFragmentLength::Bits9 => 1,
            MaxFragmentLength::Bits10 => 2,
            MaxFragmentLength::Bits11 => 3,
            MaxFragmentLength::Bits12 => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<MaxFragmentLength> {
        match value {
            1 => Some(MaxFragmentLength::Bits9),
            2 => Some(MaxFragmentLength::Bits10),
            3 => Some(MaxFragmentLength::Bits11),
            4 => Some(MaxFragmentLength::Bits12),
            _ => None,
        }
    }

    /// The fragment length in bytes.
    pub fn len(&self) -> usize {
        match self {
            MaxFragmentLength::Bits9 => 512,
            MaxFragmentLength::Bits10 => 1024,
            MaxFragmentLength::Bits11 => 2048,
            MaxFragmentLength::Bits12 => 4096,
        }
    }
}

/// Default (unnegotiated) maximum plaintext fragment length.
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 16_384;

/// Heartbeat modes (RFC 6520 §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    PeerAllowedToSend,
    PeerNotAllowedToSend,
}

impl HeartbeatMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            HeartbeatMode::PeerAllowedToSend => 1,
            HeartbeatMode::PeerNotAllowedToSend => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<HeartbeatMode> {
        match value {
            1 => Some(HeartbeatMode::PeerAllowedToSend),
            2 => Some(HeartbeatMode::PeerNotAllowedToSend),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn content_type_wire_values() {
        assert_eq!(ContentType::ChangeCipherSpec.as_u8(), 20);
        assert_eq!(ContentType::Alert.as_u8(), 21);
        assert_eq!(ContentType::Handshake.as_u8(), 22);
        assert_eq!(ContentType::ApplicationData.as_u8(), 23);
        assert_eq!(ContentType::Heartbeat.as_u8(), 24);
    }

    #[test]
    fn protocol_version_roundtrip() {
        for v in [ProtocolVersion::TLS1_2, ProtocolVersion::DTLS1_2] {
            let mut buf = Buf::new();
            v.serialize(&mut buf);
            let (rest, parsed) = ProtocolVersion::parse(&buf).unwrap();
            assert!(rest.is_empty());
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn max_fragment_length_values() {
        assert_eq!(MaxFragmentLength::Bits9.len(), 512);
        assert_eq!(MaxFragmentLength::Bits12.len(), 4096);
        assert_eq!(MaxFragmentLength::from_u8(5), None);
    }
}
