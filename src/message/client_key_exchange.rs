use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;

use super::KeyExchangeAlgorithm;

/// The ClientKeyExchange handshake message (RFC 5246 §7.4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub exchange_keys: ExchangeKeys,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKeys {
    /// Ephemeral ECDH public key, uncompressed point.
    Ecdh(Vec<u8>),
    /// RSA-encrypted premaster secret (RFC 5246 §7.4.7.1).
    EncryptedPreMasterSecret(Vec<u8>),
}

impl ClientKeyExchange {
    pub fn ecdh(public_key: Vec<u8>) -> Self {
        ClientKeyExchange {
            exchange_keys: ExchangeKeys::Ecdh(public_key),
        }
    }

    pub fn rsa(encrypted_pre_master_secret: Vec<u8>) -> Self {
        ClientKeyExchange {
            exchange_keys: ExchangeKeys::EncryptedPreMasterSecret(encrypted_pre_master_secret),
        }
    }

    pub fn parse(
        input: &[u8],
        key_exchange_algorithm: KeyExchangeAlgorithm,
    ) -> IResult<&[u8], ClientKeyExchange> {
        let (input, exchange_keys) = match key_exchange_algorithm {
            KeyExchangeAlgorithm::Ecdhe => {
                let (input, public_key_len) = be_u8(input)?;
                let (input, public_key) = take(public_key_len as usize)(input)?;
                (input, ExchangeKeys::Ecdh(public_key.to_vec()))
            }
            KeyExchangeAlgorithm::Rsa => {
                let (input, encrypted_len) = be_u16(input)?;
                let (input, encrypted) = take(encrypted_len)(input)?;
                (
                    input,
                    ExchangeKeys::EncryptedPreMasterSecret(encrypted.to_vec()),
                )
            }
            KeyExchangeAlgorithm::Unknown => {
                return Err(Err::Failure(Error::new(input, ErrorKind::Tag)))
            }
        };

        Ok((input, ClientKeyExchange { exchange_keys }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        match &self.exchange_keys {
            ExchangeKeys::Ecdh(public_key) => {
                output.push(public_key.len() as u8);
                output.extend_from_slice(public_key);
            }
            ExchangeKeys::EncryptedPreMasterSecret(encrypted) => {
                output.extend_from_slice(&(encrypted.len() as u16).to_be_bytes());
                output.extend_from_slice(encrypted);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_ecdh() {
        let cke = ClientKeyExchange::ecdh(vec![0x04, 0x01, 0x02, 0x03]);

        let mut serialized = Buf::new();
        cke.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x04, 0x04, 0x01, 0x02, 0x03]);

        let (rest, parsed) =
            ClientKeyExchange::parse(&serialized, KeyExchangeAlgorithm::Ecdhe).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }

    #[test]
    fn roundtrip_rsa() {
        let cke = ClientKeyExchange::rsa(vec![0xAA; 64]);

        let mut serialized = Buf::new();
        cke.serialize(&mut serialized);
        assert_eq!(serialized.len(), 2 + 64);

        let (rest, parsed) =
            ClientKeyExchange::parse(&serialized, KeyExchangeAlgorithm::Rsa).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }
}
