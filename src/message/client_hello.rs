use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{CompressionMethod, ProtocolVersion, WireFormat};

use super::extension::{parse_extensions, serialize_extensions};
use super::{CipherSuite, CipherSuiteVec, Extension, ExtensionType, ExtensionVec, Random, SessionId};

/// The ClientHello handshake message (RFC 5246 §7.4.1.2).
///
/// The datagram encoding inserts a cookie field after the session id
/// (RFC 6347 §4.2.1). We never demand cookies of peers, but a received
/// one is carried through so the message reserializes byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<CompressionMethod>,
    pub extensions: ExtensionVec,
}

impl ClientHello {
    pub fn new(
        client_version: ProtocolVersion,
        random: Random,
        session_id: SessionId,
        cipher_suites: CipherSuiteVec,
    ) -> Self {
        ClientHello {
            client_version,
            random,
            session_id,
            cookie: Vec::new(),
            cipher_suites: cipher_suites.to_vec(),
            compression_methods: vec![CompressionMethod::Null],
            extensions: ExtensionVec::new(),
        }
    }

    pub fn extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        self.extensions
            .iter()
            .find(|e| e.extension_type == extension_type)
    }

    /// Whether the client offers any suite we implement.
    pub fn has_supported_suite(&self) -> bool {
        self.cipher_suites.iter().any(|s| s.is_supported())
    }

    pub fn parse(input: &[u8], wire: WireFormat) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;

        let (input, cookie) = match wire {
            WireFormat::Stream => (input, Vec::new()),
            WireFormat::Datagram => {
                let (input, cookie_len) = be_u8(input)?;
                let (input, cookie) = take(cookie_len)(input)?;
                (input, cookie.to_vec())
            }
        };

        let (input, cipher_suites_len) = be_u16(input)?;
        let (input, mut suites_data) = take(cipher_suites_len)(input)?;
        let mut cipher_suites = Vec::new();
        while !suites_data.is_empty() {
            let (rest, suite) = CipherSuite::parse(suites_data)?;
            cipher_suites.push(suite);
            suites_data = rest;
        }

        let (input, compression_methods_len) = be_u8(input)?;
        let (input, mut compression_data) = take(compression_methods_len)(input)?;
        let mut compression_methods = Vec::new();
        while !compression_data.is_empty() {
            let (rest, method) = CompressionMethod::parse(compression_data)?;
            compression_methods.push(method);
            compression_data = rest;
        }

        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, wire: WireFormat, output: &mut Buf) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);

        if wire == WireFormat::Datagram {
            output.push(self.cookie.len() as u8);
            output.extend_from_slice(&self.cookie);
        }

        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            output.extend_from_slice(&suite.as_u16().to_be_bytes());
        }

        output.push(self.compression_methods.len() as u8);
        for method in &self.compression_methods {
            method.serialize(output);
        }

        serialize_extensions(&self.extensions, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeededRng;

    fn hello() -> ClientHello {
        let mut rng = SeededRng::new(Some(3));
        let mut suites = CipherSuiteVec::new();
        suites.push(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);
        suites.push(CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384);

        let mut hello = ClientHello::new(
            ProtocolVersion::TLS1_2,
            Random::new(0x5F37A94B, &mut rng),
            SessionId::try_new(&[0xAA]).unwrap(),
            suites,
        );
        hello
            .extensions
            .push(Extension::new(ExtensionType::Heartbeat, vec![0x01]));
        hello
    }

    #[test]
    fn roundtrip_stream() {
        let hello = hello();

        let mut serialized = Buf::new();
        hello.serialize(WireFormat::Stream, &mut serialized);

        let (rest, parsed) = ClientHello::parse(&serialized, WireFormat::Stream).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }

    #[test]
    fn roundtrip_datagram_with_cookie_field() {
        let hello = hello();

        let mut serialized = Buf::new();
        hello.serialize(WireFormat::Datagram, &mut serialized);

        let (rest, parsed) = ClientHello::parse(&serialized, WireFormat::Datagram).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
        assert!(parsed.cookie.is_empty());

        // The datagram encoding is one byte longer (empty cookie).
        let mut stream = Buf::new();
        hello.serialize(WireFormat::Stream, &mut stream);
        assert_eq!(serialized.len(), stream.len() + 1);
    }

    #[test]
    fn extension_lookup() {
        let hello = hello();
        assert!(hello.extension(ExtensionType::Heartbeat).is_some());
        assert!(hello.extension(ExtensionType::ServerName).is_none());
        assert!(hello.has_supported_suite());
    }
}
