use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;

const NAME_TYPE_HOST_NAME: u8 = 0;

/// server_name extension (RFC 6066 §3), host_name entries only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNameExtension {
    pub host_name: String,
}

impl ServerNameExtension {
    pub fn new(host_name: &str) -> Self {
        ServerNameExtension {
            host_name: host_name.to_string(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerNameExtension> {
        let (input, list_len) = be_u16(input)?;
        let (input, mut list) = take(list_len)(input)?;

        while !list.is_empty() {
            let (rest, name_type) = be_u8(list)?;
            let (rest, name_len) = be_u16(rest)?;
            let (rest, name) = take(name_len)(rest)?;

            if name_type == NAME_TYPE_HOST_NAME {
                let host_name = std::str::from_utf8(name)
                    .map_err(|_| Err::Failure(Error::new(name, ErrorKind::Char)))?
                    .to_string();
                return Ok((input, ServerNameExtension { host_name }));
            }

            list = rest;
        }

        Err(Err::Failure(Error::new(input, ErrorKind::Tag)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let name = self.host_name.as_bytes();
        output.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        output.push(NAME_TYPE_HOST_NAME);
        output.extend_from_slice(&(name.len() as u16).to_be_bytes());
        output.extend_from_slice(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = ServerNameExtension::new("example.com");

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);

        let (rest, parsed) = ServerNameExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn rejects_list_without_host_name() {
        // One entry of unknown name type 7.
        let bytes = [0x00, 0x05, 0x07, 0x00, 0x02, 0xAA, 0xBB];
        assert!(ServerNameExtension::parse(&bytes).is_err());
    }
}
