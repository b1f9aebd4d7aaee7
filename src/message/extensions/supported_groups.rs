use arrayvec::ArrayVec;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::NamedCurve;

/// Supported Groups extension (RFC 8422 §5.1.1).
///
/// Unknown groups in a received list are skipped, not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedGroupsExtension {
    pub groups: ArrayVec<NamedCurve, 16>,
}

impl Default for SupportedGroupsExtension {
    fn default() -> Self {
        let mut groups = ArrayVec::new();
        for curve in NamedCurve::supported() {
            groups.push(*curve);
        }
        SupportedGroupsExtension { groups }
    }
}

impl SupportedGroupsExtension {
    pub fn parse(input: &[u8]) -> IResult<&[u8], SupportedGroupsExtension> {
        let (mut input, list_len) = be_u16(input)?;
        let mut groups = ArrayVec::new();
        let mut remaining = list_len as usize;

        while remaining >= 2 {
            let (rest, curve) = NamedCurve::parse(input)?;
            input = rest;
            remaining -= 2;
            if curve.is_supported() && !groups.is_full() {
                groups.push(curve);
            }
        }

        Ok((input, SupportedGroupsExtension { groups }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&((self.groups.len() * 2) as u16).to_be_bytes());

        for group in &self.groups {
            group.serialize(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = SupportedGroupsExtension::default();

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);

        let expected = [
            0x00, 0x04, // Groups length
            0x00, 0x1D, // X25519
            0x00, 0x17, // secp256r1
        ];
        assert_eq!(&*serialized, expected);

        let (rest, parsed) = SupportedGroupsExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn skips_unknown_groups() {
        // 0x0018 (P-384) and 0x0100 are not supported here.
        let bytes = [0, 8, 0, 29, 0, 24, 1, 0, 0, 23];

        let (rest, parsed) = SupportedGroupsExtension::parse(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            parsed.groups.as_slice(),
            &[NamedCurve::X25519, NamedCurve::Secp256r1]
        );
    }
}
