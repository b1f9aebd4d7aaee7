use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::MaxFragmentLength;

/// max_fragment_length extension (RFC 6066 §4).
///
/// A code outside 1..=4 is an illegal_parameter per the RFC, so parsing
/// fails hard instead of skipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxFragmentLengthExtension {
    pub length: MaxFragmentLength,
}

impl MaxFragmentLengthExtension {
    pub fn new(length: MaxFragmentLength) -> Self {
        MaxFragmentLengthExtension { length }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MaxFragmentLengthExtension> {
        let (input, code) = be_u8(input)?;
        let length = MaxFragmentLength::from_u8(code)
            .ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Tag)))?;
        Ok((input, MaxFragmentLengthExtension { length }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.length.as_u8());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = MaxFragmentLengthExtension::new(MaxFragmentLength::Bits10);

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x02]);

        let (rest, parsed) = MaxFragmentLengthExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn rejects_invalid_code() {
        assert!(MaxFragmentLengthExtension::parse(&[0x05]).is_err());
    }
}
