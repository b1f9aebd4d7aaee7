//! Record layer framing for both wire formats.
//!
//! A stream record header is 5 bytes: type, version, length. A datagram
//! record header is 13 bytes, adding the explicit epoch and 48-bit
//! sequence number. The fragment itself stays in the source buffer; the
//! parsed record only keeps a range into it.

use std::fmt;
use std::ops::Range;

use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::{ContentType, ProtocolVersion, Sequence, WireFormat};
use crate::util::be_u48;

#[derive(PartialEq, Eq, Default, Clone)]
pub struct Record {
    /// The content type of this record.
    pub content_type: ContentType,
    /// The protocol version.
    pub version: ProtocolVersion,
    /// The epoch and sequence number.
    ///
    /// Parsed from the header for datagrams. For streams both are
    /// implicit and the caller fills this in from its receive counter.
    pub sequence: Sequence,
    /// The length of the fragment.
    pub length: u16,
    /// The range of the fragment in the source buffer.
    pub fragment_range: Range<usize>,
}

impl Record {
    /// Length of the explicit nonce prefix in AEAD ciphers (AES-GCM).
    pub const EXPLICIT_NONCE_LEN: usize = 8;

    /// Parse a record from the input buffer.
    ///
    /// When decrypting in place, `skip_offset` skips the explicit nonce
    /// so the fragment range covers only the plaintext.
    pub fn parse(
        input: &[u8],
        wire: WireFormat,
        base_offset: usize,
        skip_offset: usize,
    ) -> IResult<&[u8], Record> {
        let original_input = input;
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;

        if version != wire.version() {
            return Err(Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }

        let (input, sequence) = match wire {
            WireFormat::Stream => (input, Sequence::default()),
            WireFormat::Datagram => {
                let (input, epoch) = be_u16(input)?;
                let (input, sequence_number) = be_u48(input)?;
                (
                    input,
                    Sequence {
                        epoch,
                        sequence_number,
                    },
                )
            }
        };

        let (input, length) = be_u16(input)?;

        // When encrypted, skip_offset is 0 and this has the explicit nonce.
        // When decrypted, skip_offset is > 0 to skip the explicit nonce.
        let input = &input[skip_offset..];

        let (rest, fragment_slice) = take(length as usize)(input)?;

        // Calculate absolute range in root buffer.
        let relative_offset = fragment_slice.as_ptr() as usize - original_input.as_ptr() as usize;
        let start = base_offset + relative_offset;
        let end = start + fragment_slice.len();

        Ok((
            rest,
            Record {
                content_type,
                version,
                sequence,
                length,
                fragment_range: start..end,
            },
        ))
    }

    /// Get the fragment data from the source buffer.
    pub fn fragment<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.fragment_range.clone()]
    }

    /// Serialize this record to the output buffer.
    pub fn serialize(&self, wire: WireFormat, buf: &[u8], output: &mut Buf) {
        self.serialize_header(wire, output);
        output.extend_from_slice(self.fragment(buf));
    }

    /// Serialize only the header.
    pub fn serialize_header(&self, wire: WireFormat, output: &mut Buf) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        if wire == WireFormat::Datagram {
            output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
            output.extend_from_slice(&self.sequence.sequence_number.to_be_bytes()[2..]);
        }
        output.extend_from_slice(&self.length.to_be_bytes());
    }

    /// Get the explicit nonce from the fragment.
    pub fn nonce<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let fragment = self.fragment(buf);
        &fragment[..Self::EXPLICIT_NONCE_LEN]
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("content_type", &self.content_type)
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .field("length", &self.length)
            .field("fragment_range", &self.fragment_range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATAGRAM_RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // sequence_number
        0x00, 0x04, // length
        0x01, 0x02, 0x03, 0x04, // fragment
    ];

    const STREAM_RECORD: &[u8] = &[
        0x17, // ContentType::ApplicationData
        0x03, 0x03, // ProtocolVersion::TLS1_2
        0x00, 0x04, // length
        0x01, 0x02, 0x03, 0x04, // fragment
    ];

    #[test]
    fn roundtrip_datagram() {
        let (rest, parsed) = Record::parse(DATAGRAM_RECORD, WireFormat::Datagram, 0, 0).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.sequence.epoch, 1);
        assert_eq!(parsed.sequence.sequence_number, 1);

        let mut serialized = Buf::new();
        parsed.serialize(WireFormat::Datagram, DATAGRAM_RECORD, &mut serialized);
        assert_eq!(&*serialized, DATAGRAM_RECORD);
    }

    #[test]
    fn roundtrip_stream() {
        let (rest, parsed) = Record::parse(STREAM_RECORD, WireFormat::Stream, 0, 0).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.content_type, ContentType::ApplicationData);
        assert_eq!(parsed.sequence, Sequence::default());

        let mut serialized = Buf::new();
        parsed.serialize(WireFormat::Stream, STREAM_RECORD, &mut serialized);
        assert_eq!(&*serialized, STREAM_RECORD);
    }

    #[test]
    fn wrong_version_fails() {
        assert!(Record::parse(STREAM_RECORD, WireFormat::Datagram, 0, 0).is_err());
        assert!(Record::parse(DATAGRAM_RECORD, WireFormat::Stream, 0, 0).is_err());
    }

    #[test]
    fn skip_offset_drops_nonce() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x17, 0xFE, 0xFD, 0x00, 0x01]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x02]);
        data.extend_from_slice(&[0x00, 0x04]); // plaintext length after decrypt
        data.extend_from_slice(&[0xAA; 8]); // explicit nonce
        data.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);

        let (rest, parsed) = Record::parse(&data, WireFormat::Datagram, 0, 8).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.fragment(&data), &[0x01, 0x02, 0x03, 0x04]);
    }
}
