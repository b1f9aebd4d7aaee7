use arrayvec::ArrayVec;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;

/// user_mapping extension (RFC 4681 §3).
///
/// Advertises which supplemental data entry types a side is willing to
/// exchange. An empty intersection means no SupplementalData message is
/// sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserMappingExtension {
    pub types: ArrayVec<u8, 8>,
}

impl UserMappingExtension {
    pub fn new(types: &[u8]) -> Self {
        let mut list = ArrayVec::new();
        for t in types {
            list.push(*t);
        }
        UserMappingExtension { types: list }
    }

    pub fn contains(&self, t: u8) -> bool {
        self.types.contains(&t)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], UserMappingExtension> {
        let (mut input, list_len) = be_u8(input)?;
        let mut types = ArrayVec::new();
        let mut remaining = list_len as usize;

        while remaining > 0 {
            let (rest, t) = be_u8(input)?;
            if !types.is_full() {
                types.push(t);
            }
            input = rest;
            remaining -= 1;
        }

        Ok((input, UserMappingExtension { types }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.types.len() as u8);
        for t in &self.types {
            output.push(*t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = UserMappingExtension::new(&[0x40, 0x41]);

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x02, 0x40, 0x41]);

        let (rest, parsed) = UserMappingExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
        assert!(parsed.contains(0x40));
        assert!(!parsed.contains(0x42));
    }
}
