use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::types::SignatureAndHashAlgorithm;

use super::{CertificateTypeVec, ClientCertificateType};

/// The CertificateRequest handshake message (RFC 5246 §7.4.4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateRequest {
    pub certificate_types: CertificateTypeVec,
    pub supported_signature_algorithms: ArrayVec<SignatureAndHashAlgorithm, 16>,
    /// DER-encoded distinguished names of acceptable CAs. Empty means
    /// the client may send any chain.
    pub certificate_authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn new() -> Self {
        let mut certificate_types = CertificateTypeVec::new();
        for t in ClientCertificateType::supported() {
            certificate_types.push(*t);
        }

        let mut supported_signature_algorithms = ArrayVec::new();
        for alg in SignatureAndHashAlgorithm::supported() {
            supported_signature_algorithms.push(*alg);
        }

        CertificateRequest {
            certificate_types,
            supported_signature_algorithms,
            certificate_authorities: Vec::new(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types_len) = be_u8(input)?;
        let (input, mut types_data) = take(types_len)(input)?;
        let mut certificate_types = CertificateTypeVec::new();
        while !types_data.is_empty() {
            let (rest, t) = ClientCertificateType::parse(types_data)?;
            if ClientCertificateType::supported().contains(&t) && !certificate_types.is_full() {
                certificate_types.push(t);
            }
            types_data = rest;
        }

        let (input, algs_len) = be_u16(input)?;
        let (input, mut algs_data) = take(algs_len)(input)?;
        let mut supported_signature_algorithms = ArrayVec::new();
        while !algs_data.is_empty() {
            let (rest, alg) = SignatureAndHashAlgorithm::parse(algs_data)?;
            if !supported_signature_algorithms.is_full() {
                supported_signature_algorithms.push(alg);
            }
            algs_data = rest;
        }

        let (input, cas_len) = be_u16(input)?;
        let (input, mut cas_data) = take(cas_len)(input)?;
        let mut certificate_authorities = Vec::new();
        while !cas_data.is_empty() {
            let (rest, dn_len) = be_u16(cas_data)?;
            let (rest, dn) = take(dn_len)(rest)?;
            certificate_authorities.push(dn.to_vec());
            cas_data = rest;
        }

        Ok((
            input,
            CertificateRequest {
                certificate_types,
                supported_signature_algorithms,
                certificate_authorities,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.certificate_types.len() as u8);
        for t in &self.certificate_types {
            output.push(t.as_u8());
        }

        output
            .extend_from_slice(&((self.supported_signature_algorithms.len() * 2) as u16).to_be_bytes());
        for alg in &self.supported_signature_algorithms {
            alg.serialize(output);
        }

        let cas_len: usize = self
            .certificate_authorities
            .iter()
            .map(|dn| 2 + dn.len())
            .sum();
        output.extend_from_slice(&(cas_len as u16).to_be_bytes());
        for dn in &self.certificate_authorities {
            output.extend_from_slice(&(dn.len() as u16).to_be_bytes());
            output.extend_from_slice(dn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut request = CertificateRequest::new();
        request.certificate_authorities.push(vec![0x30, 0x03, 0xAA]);

        let mut serialized = Buf::new();
        request.serialize(&mut serialized);

        let (rest, parsed) = CertificateRequest::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn skips_unsupported_types() {
        // DSS_SIGN (2) is dropped, ECDSA_SIGN (64) kept.
        let bytes: &[u8] = &[
            0x02, 0x02, 0x40, // types
            0x00, 0x02, 0x04, 0x03, // algorithms
            0x00, 0x00, // no CAs
        ];

        let (rest, parsed) = CertificateRequest::parse(bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            parsed.certificate_types.as_slice(),
            &[ClientCertificateType::ECDSA_SIGN]
        );
    }
}
