use nom::IResult;

use crate::buffer::Buf;
use crate::types::{CompressionMethod, ProtocolVersion};

use super::extension::{parse_extensions, serialize_extensions};
use super::{CipherSuite, Extension, ExtensionType, ExtensionVec, Random, SessionId};

/// The ServerHello handshake message (RFC 5246 §7.4.1.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: CompressionMethod,
    pub extensions: ExtensionVec,
}

impl ServerHello {
    pub fn new(
        server_version: ProtocolVersion,
        random: Random,
        session_id: SessionId,
        cipher_suite: CipherSuite,
    ) -> Self {
        ServerHello {
            server_version,
            random,
            session_id,
            cipher_suite,
            compression_method: CompressionMethod::Null,
            extensions: ExtensionVec::new(),
        }
    }

    pub fn extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        self.extensions
            .iter()
            .find(|e| e.extension_type == extension_type)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = CompressionMethod::parse(input)?;
        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        output.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        self.compression_method.serialize(output);
        serialize_extensions(&self.extensions, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeededRng;

    #[test]
    fn roundtrip() {
        let mut rng = SeededRng::new(Some(4));
        let mut hello = ServerHello::new(
            ProtocolVersion::DTLS1_2,
            Random::new(0x11223344, &mut rng),
            SessionId::random(16, &mut rng),
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
        );
        hello
            .extensions
            .push(Extension::new(ExtensionType::RenegotiationInfo, vec![0x00]));

        let mut serialized = Buf::new();
        hello.serialize(&mut serialized);

        let (rest, parsed) = ServerHello::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
        assert!(parsed.extension(ExtensionType::RenegotiationInfo).is_some());
    }

    #[test]
    fn no_extensions() {
        let mut rng = SeededRng::new(Some(4));
        let hello = ServerHello::new(
            ProtocolVersion::TLS1_2,
            Random::new(0, &mut rng),
            SessionId::empty(),
            CipherSuite::RSA_AES128_GCM_SHA256,
        );

        let mut serialized = Buf::new();
        hello.serialize(&mut serialized);
        // version(2) + random(32) + session_id(1) + suite(2) + compression(1)
        assert_eq!(serialized.len(), 38);

        let (rest, parsed) = ServerHello::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }
}
