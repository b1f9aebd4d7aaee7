use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::NamedCurve;

use super::{DigitallySigned, KeyExchangeAlgorithm};

/// ECCurveType for ECDHE params. Only named_curve (3) is valid in 1.2.
const CURVE_TYPE_NAMED: u8 = 3;

/// The ServerKeyExchange handshake message.
///
/// Only sent for ephemeral key exchanges; static RSA suites carry no
/// server key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: ServerKeyExchangeParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyExchangeParams {
    Ecdh(EcdhParams),
}

impl ServerKeyExchange {
    pub fn parse(
        input: &[u8],
        key_exchange_algorithm: KeyExchangeAlgorithm,
    ) -> IResult<&[u8], ServerKeyExchange> {
        let (input, params) = match key_exchange_algorithm {
            KeyExchangeAlgorithm::Ecdhe => {
                let (input, ecdh_params) = EcdhParams::parse(input)?;
                (input, ServerKeyExchangeParams::Ecdh(ecdh_params))
            }
            _ => return Err(Err::Failure(Error::new(input, ErrorKind::Tag))),
        };

        Ok((input, ServerKeyExchange { params }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        match &self.params {
            ServerKeyExchangeParams::Ecdh(ecdh_params) => ecdh_params.serialize(output, true),
        }
    }

    pub fn signature(&self) -> Option<&DigitallySigned> {
        match &self.params {
            ServerKeyExchangeParams::Ecdh(ecdh_params) => ecdh_params.signature.as_ref(),
        }
    }

    /// The bytes covered by the signature: the params without the
    /// trailing DigitallySigned.
    pub fn signed_params(&self, output: &mut Buf) {
        match &self.params {
            ServerKeyExchangeParams::Ecdh(ecdh_params) => ecdh_params.serialize(output, false),
        }
    }
}

/// ECDHE parameters: named curve + ephemeral public key, optionally
/// followed by a signature over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhParams {
    pub named_curve: NamedCurve,
    pub public_key: Vec<u8>,
    pub signature: Option<DigitallySigned>,
}

impl EcdhParams {
    pub fn new(named_curve: NamedCurve, public_key: Vec<u8>) -> Self {
        EcdhParams {
            named_curve,
            public_key,
            signature: None,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], EcdhParams> {
        let (input, curve_type) = be_u8(input)?;
        if curve_type != CURVE_TYPE_NAMED {
            return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
        }
        let (input, named_curve) = NamedCurve::parse(input)?;

        let (input, public_key_len) = be_u8(input)?;
        let (input, public_key) = take(public_key_len as usize)(input)?;

        // Optionally parse a trailing DigitallySigned structure.
        let (input, signature) = if !input.is_empty() {
            let (rest, signed) = DigitallySigned::parse(input)?;
            (rest, Some(signed))
        } else {
            (input, None)
        };

        Ok((
            input,
            EcdhParams {
                named_curve,
                public_key: public_key.to_vec(),
                signature,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf, with_signature: bool) {
        output.push(CURVE_TYPE_NAMED);
        self.named_curve.serialize(output);
        output.push(self.public_key.len() as u8);
        output.extend_from_slice(&self.public_key);

        if with_signature {
            if let Some(signed) = &self.signature {
                signed.serialize(output);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{HashAlgorithm, SignatureAlgorithm, SignatureAndHashAlgorithm};

    const MESSAGE_ECDH_PUBKEY: &[u8] = &[
        0x03, // curve_type named_curve
        0x00, 0x17, // secp256r1
        0x04, // public_key length
        0x01, 0x02, 0x03, 0x04, // public_key
    ];

    #[test]
    fn roundtrip_ecdh() {
        let algorithm =
            SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA);

        let mut expected = Buf::new();
        expected.extend_from_slice(MESSAGE_ECDH_PUBKEY);
        expected.push(algorithm.hash.as_u8());
        expected.push(algorithm.signature.as_u8());
        expected.extend_from_slice(&[0x00, 0x04, 0x05, 0x06, 0x07, 0x08]);

        let (rest, parsed) =
            ServerKeyExchange::parse(&expected, KeyExchangeAlgorithm::Ecdhe).unwrap();
        assert!(rest.is_empty());
        assert!(parsed.signature().is_some());

        let mut serialized = Buf::new();
        parsed.serialize(&mut serialized);
        assert_eq!(&*serialized, &*expected);

        // signed_params excludes the signature.
        let mut params_only = Buf::new();
        parsed.signed_params(&mut params_only);
        assert_eq!(&*params_only, MESSAGE_ECDH_PUBKEY);
    }

    #[test]
    fn rejects_unnamed_curve_type() {
        let bytes = [0x01, 0x00, 0x17, 0x00];
        assert!(ServerKeyExchange::parse(&bytes, KeyExchangeAlgorithm::Ecdhe).is_err());
    }

    #[test]
    fn rejects_static_rsa() {
        assert!(ServerKeyExchange::parse(MESSAGE_ECDH_PUBKEY, KeyExchangeAlgorithm::Rsa).is_err());
    }
}
