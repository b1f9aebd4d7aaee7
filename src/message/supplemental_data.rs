use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24};
use nom::IResult;

use crate::buffer::Buf;

/// One typed entry in a SupplementalData handshake message (RFC 4680 §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplementalDataEntry {
    pub data_type: u16,
    pub data: Vec<u8>,
}

impl SupplementalDataEntry {
    pub fn new(data_type: u16, data: Vec<u8>) -> Self {
        SupplementalDataEntry { data_type, data }
    }
}

/// The SupplementalData handshake message (RFC 4680).
///
/// Carried between hello exchange and Certificate, only when both sides
/// negotiated it. The engine surfaces entries to the application and
/// never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SupplementalData {
    pub entries: Vec<SupplementalDataEntry>,
}

impl SupplementalData {
    pub fn new(entries: Vec<SupplementalDataEntry>) -> Self {
        SupplementalData { entries }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SupplementalData> {
        let (input, total_len) = be_u24(input)?;
        let (input, mut list) = take(total_len)(input)?;

        let mut entries = Vec::new();
        while !list.is_empty() {
            let (rest, data_type) = be_u16(list)?;
            let (rest, data_len) = be_u16(rest)?;
            let (rest, data) = take(data_len)(rest)?;
            entries.push(SupplementalDataEntry {
                data_type,
                data: data.to_vec(),
            });
            list = rest;
        }

        Ok((input, SupplementalData { entries }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let total: usize = self.entries.iter().map(|e| 4 + e.data.len()).sum();
        output.extend_from_slice(&(total as u32).to_be_bytes()[1..]);

        for entry in &self.entries {
            output.extend_from_slice(&entry.data_type.to_be_bytes());
            output.extend_from_slice(&(entry.data.len() as u16).to_be_bytes());
            output.extend_from_slice(&entry.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x00, 0x08, // total length
        0x00, 0x40, // data_type
        0x00, 0x04, // data length
        0x01, 0x02, 0x03, 0x04, // data
    ];

    #[test]
    fn roundtrip() {
        let data = SupplementalData::new(vec![SupplementalDataEntry::new(
            0x40,
            vec![0x01, 0x02, 0x03, 0x04],
        )]);

        let mut serialized = Buf::new();
        data.serialize(&mut serialized);
        assert_eq!(&*serialized, MESSAGE);

        let (rest, parsed) = SupplementalData::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, data);
    }

    #[test]
    fn empty_message() {
        let data = SupplementalData::default();

        let mut serialized = Buf::new();
        data.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x00, 0x00, 0x00]);

        let (_, parsed) = SupplementalData::parse(&serialized).unwrap();
        assert!(parsed.entries.is_empty());
    }
}
