use arrayvec::ArrayVec;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::SignatureAndHashAlgorithm;

/// signature_algorithms extension (RFC 5246 §7.4.1.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureAlgorithmsExtension {
    pub algorithms: ArrayVec<SignatureAndHashAlgorithm, 16>,
}

impl Default for SignatureAlgorithmsExtension {
    fn default() -> Self {
        let mut algorithms = ArrayVec::new();
        for alg in SignatureAndHashAlgorithm::supported() {
            algorithms.push(*alg);
        }
        SignatureAlgorithmsExtension { algorithms }
    }
}

impl SignatureAlgorithmsExtension {
    pub fn contains(&self, alg: &SignatureAndHashAlgorithm) -> bool {
        self.algorithms.contains(alg)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAlgorithmsExtension> {
        let (mut input, list_len) = be_u16(input)?;
        let mut algorithms = ArrayVec::new();
        let mut remaining = list_len as usize;

        while remaining >= 2 {
            let (rest, alg) = SignatureAndHashAlgorithm::parse(input)?;
            input = rest;
            remaining -= 2;
            if !algorithms.is_full() {
                algorithms.push(alg);
            }
        }

        Ok((input, SignatureAlgorithmsExtension { algorithms }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&((self.algorithms.len() * 2) as u16).to_be_bytes());

        for alg in &self.algorithms {
            alg.serialize(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HashAlgorithm, SignatureAlgorithm};

    #[test]
    fn roundtrip() {
        let ext = SignatureAlgorithmsExtension::default();

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);

        let (rest, parsed) = SignatureAlgorithmsExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);

        assert!(parsed.contains(&SignatureAndHashAlgorithm::new(
            HashAlgorithm::SHA256,
            SignatureAlgorithm::ECDSA,
        )));
    }
}
