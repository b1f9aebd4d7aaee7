use arrayvec::ArrayVec;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;

/// EC point format (RFC 8422 §5.1.2). Only uncompressed survives in 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ECPointFormat {
    #[default]
    Uncompressed,
    Unknown(u8),
}

impl ECPointFormat {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ECPointFormat::Uncompressed,
            _ => ECPointFormat::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ECPointFormat::Uncompressed => 0x00,
            ECPointFormat::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ECPointFormat> {
        let (input, value) = be_u8(input)?;
        Ok((input, ECPointFormat::from_u8(value)))
    }
}

/// ec_point_formats extension (RFC 8422).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ECPointFormatsExtension {
    pub formats: ArrayVec<ECPointFormat, 4>,
}

impl Default for ECPointFormatsExtension {
    fn default() -> Self {
        let mut formats = ArrayVec::new();
        formats.push(ECPointFormat::Uncompressed);
        ECPointFormatsExtension { formats }
    }
}

impl ECPointFormatsExtension {
    /// Whether the peer accepts uncompressed points. A list without it is
    /// a protocol violation.
    pub fn has_uncompressed(&self) -> bool {
        self.formats.contains(&ECPointFormat::Uncompressed)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ECPointFormatsExtension> {
        let (mut input, list_len) = be_u8(input)?;
        let mut formats = ArrayVec::new();
        let mut remaining = list_len as usize;

        while remaining > 0 {
            let (rest, format) = ECPointFormat::parse(input)?;
            if !formats.is_full() {
                formats.push(format);
            }
            input = rest;
            remaining -= 1;
        }

        Ok((input, ECPointFormatsExtension { formats }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.formats.len() as u8);

        for format in &self.formats {
            output.push(format.as_u8());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = ECPointFormatsExtension::default();

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x01, 0x00]);

        let (rest, parsed) = ECPointFormatsExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
        assert!(parsed.has_uncompressed());
    }

    #[test]
    fn detects_missing_uncompressed() {
        let bytes = [0x01, 0x01];
        let (_, parsed) = ECPointFormatsExtension::parse(&bytes).unwrap();
        assert!(!parsed.has_uncompressed());
    }
}
