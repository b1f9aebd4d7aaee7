use nom::IResult;

use crate::buffer::Buf;

use super::DigitallySigned;

/// The CertificateVerify handshake message (RFC 5246 §7.4.8): a signature
/// over the transcript up to (excluding) this message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signed: DigitallySigned,
}

impl CertificateVerify {
    pub fn new(signed: DigitallySigned) -> Self {
        CertificateVerify { signed }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, signed) = DigitallySigned::parse(input)?;
        Ok((input, CertificateVerify { signed }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.signed.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HashAlgorithm, SignatureAlgorithm, SignatureAndHashAlgorithm};

    #[test]
    fn roundtrip() {
        let algorithm =
            SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA);
        let verify = CertificateVerify::new(DigitallySigned::new(algorithm, vec![0x01, 0x02]));

        let mut serialized = Buf::new();
        verify.serialize(&mut serialized);

        let (rest, parsed) = CertificateVerify::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, verify);
    }
}
