use std::ops::Deref;

use nom::bytes::complete::take;
use nom::number::complete::be_u24;
use nom::IResult;

use crate::buffer::Buf;

/// A single DER-encoded certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asn1Cert(pub Vec<u8>);

impl Deref for Asn1Cert {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The Certificate handshake message: a chain of DER certificates,
/// leaf first (RFC 5246 §7.4.2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub certificate_list: Vec<Asn1Cert>,
}

impl Certificate {
    pub fn new(certificate_list: Vec<Asn1Cert>) -> Self {
        Certificate { certificate_list }
    }

    /// The end-entity certificate, if the chain is non-empty.
    pub fn leaf(&self) -> Option<&Asn1Cert> {
        self.certificate_list.first()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (input, total_len) = be_u24(input)?;
        let (input, mut list) = take(total_len)(input)?;

        let mut certificate_list = Vec::new();
        while !list.is_empty() {
            let (rest, cert_len) = be_u24(list)?;
            let (rest, cert_data) = take(cert_len)(rest)?;
            certificate_list.push(Asn1Cert(cert_data.to_vec()));
            list = rest;
        }

        Ok((input, Certificate { certificate_list }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let total_len: usize = self
            .certificate_list
            .iter()
            .map(|cert| 3 + cert.len())
            .sum();
        output.extend_from_slice(&(total_len as u32).to_be_bytes()[1..]);

        for cert in &self.certificate_list {
            output.extend_from_slice(&(cert.len() as u32).to_be_bytes()[1..]);
            output.extend_from_slice(cert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x00, 0x0C, // Total length
        0x00, 0x00, 0x04, // Certificate 1 length
        0x01, 0x02, 0x03, 0x04, // Certificate 1 data
        0x00, 0x00, 0x02, // Certificate 2 length
        0x05, 0x06, // Certificate 2 data
    ];

    #[test]
    fn roundtrip() {
        let certificate = Certificate::new(vec![
            Asn1Cert(MESSAGE[6..10].to_vec()),
            Asn1Cert(MESSAGE[13..15].to_vec()),
        ]);

        let mut serialized = Buf::new();
        certificate.serialize(&mut serialized);
        assert_eq!(&*serialized, MESSAGE);

        let (rest, parsed) = Certificate::parse(&serialized).unwrap();
        assert_eq!(parsed, certificate);
        assert_eq!(&**parsed.leaf().unwrap(), &MESSAGE[6..10]);

        assert!(rest.is_empty());
    }

    #[test]
    fn empty_chain() {
        let certificate = Certificate::default();

        let mut serialized = Buf::new();
        certificate.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x00, 0x00, 0x00]);

        let (_, parsed) = Certificate::parse(&serialized).unwrap();
        assert!(parsed.leaf().is_none());
    }
}
