use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::WireFormat;

use super::{
    Certificate, CertificateRequest, CertificateVerify, CipherSuite, ClientHello,
    ClientKeyExchange, Finished, ServerHello, ServerKeyExchange, SupplementalData,
};

/// Handshake message header.
///
/// The stream encoding is 4 bytes (type + u24 length); the datagram
/// encoding is 12 bytes, adding message_seq, fragment_offset and
/// fragment_length (RFC 6347 §4.2.2). For stream messages the fragment
/// fields mirror the full length.
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct Header {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

#[derive(Debug, Default)]
pub struct Handshake {
    pub header: Header,
    pub body: Body,
    pub handled: AtomicBool,
}

impl PartialEq for Handshake {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.body == other.body
            && self.handled.load(Ordering::Relaxed) == other.handled.load(Ordering::Relaxed)
    }
}

impl Eq for Handshake {}

impl Handshake {
    pub fn new(msg_type: MessageType, length: u32, message_seq: u16, body: Body) -> Self {
        Handshake {
            header: Header {
                msg_type,
                length,
                message_seq,
                fragment_offset: 0,
                fragment_length: length,
            },
            body,
            handled: AtomicBool::new(false),
        }
    }

    pub fn parse_header(input: &[u8], wire: WireFormat) -> IResult<&[u8], Header> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;

        let (input, message_seq, fragment_offset, fragment_length) = match wire {
            WireFormat::Stream => (input, 0, 0, length),
            WireFormat::Datagram => {
                let (input, message_seq) = be_u16(input)?;
                let (input, fragment_offset) = be_u24(input)?;
                let (input, fragment_length) = be_u24(input)?;
                (input, message_seq, fragment_offset, fragment_length)
            }
        };

        Ok((
            input,
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize_header(header: &Header, wire: WireFormat, output: &mut Buf) {
        output.push(header.msg_type.as_u8());
        output.extend_from_slice(&header.length.to_be_bytes()[1..]);
        if wire == WireFormat::Datagram {
            output.extend_from_slice(&header.message_seq.to_be_bytes());
            output.extend_from_slice(&header.fragment_offset.to_be_bytes()[1..]);
            output.extend_from_slice(&header.fragment_length.to_be_bytes()[1..]);
        }
    }

    pub fn parse(
        input: &[u8],
        wire: WireFormat,
        base_offset: usize,
        c: Option<CipherSuite>,
        as_fragment: bool,
    ) -> IResult<&[u8], Handshake> {
        let original_input = input;
        let (input, header) = Self::parse_header(input, wire)?;

        let is_fragment = header.fragment_offset > 0 || header.fragment_length < header.length;

        if !as_fragment && is_fragment {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, body) = if as_fragment {
            let (input, fragment_slice) = take(header.fragment_length as usize)(input)?;
            let relative_offset =
                fragment_slice.as_ptr() as usize - original_input.as_ptr() as usize;
            let start = base_offset + relative_offset;
            let end = start + fragment_slice.len();
            (input, Body::Fragment(start..end))
        } else {
            let (input, body_bytes) = take(header.length as usize)(input)?;
            let (_, body) = Body::parse_wire(body_bytes, wire, header.msg_type, c)?;
            (input, body)
        };

        Ok((
            input,
            Handshake {
                header,
                body,
                handled: AtomicBool::new(false),
            },
        ))
    }

    pub fn serialize(&self, wire: WireFormat, source_buf: &[u8], output: &mut Buf) {
        Self::serialize_header(&self.header, wire, output);
        self.body.serialize_wire(wire, source_buf, output);
    }

    /// Reassemble a full handshake from consecutive fragments.
    ///
    /// The iterator yields fragments of the same message in offset order
    /// together with their source record buffers. When `transcript` is
    /// given, the reconstructed message (header with fragment_offset 0)
    /// is appended to it before the body parse.
    pub fn defragment<'b>(
        mut iter: impl Iterator<Item = (&'b Handshake, &'b [u8])>,
        buffer: &mut Buf,
        wire: WireFormat,
        cipher_suite: Option<CipherSuite>,
        transcript: Option<&mut Buf>,
    ) -> Result<Handshake, crate::Error> {
        buffer.clear();

        // Invariant is upheld by the caller.
        let (first_handshake, first_buffer) = iter.next().unwrap();

        let Body::Fragment(range) = &first_handshake.body else {
            unreachable!("Non-Fragment body in defragment()")
        };
        buffer.extend_from_slice(&first_buffer[range.clone()]);
        first_handshake.set_handled();

        for (handshake, source_buf) in iter {
            if handshake.header.msg_type != first_handshake.header.msg_type {
                break;
            }

            let Body::Fragment(range) = &handshake.body else {
                unreachable!("Non-Fragment body in defragment()")
            };

            handshake.set_handled();

            buffer.extend_from_slice(&source_buf[range.clone()]);
        }

        if buffer.len() != first_handshake.header.length as usize {
            debug!("Defragmentation failed. Fragment length mismatch");
            return Err(crate::Error::ParseIncomplete);
        }

        let header = Header {
            msg_type: first_handshake.header.msg_type,
            length: first_handshake.header.length,
            message_seq: first_handshake.header.message_seq,
            fragment_offset: 0,
            fragment_length: first_handshake.header.length,
        };

        if let Some(transcript) = transcript {
            Self::serialize_header(&header, wire, transcript);
            transcript.extend_from_slice(&buffer[..header.length as usize]);
        }

        let (rest, body) = Body::parse_wire(buffer, wire, header.msg_type, cipher_suite)?;

        if !rest.is_empty() {
            debug!("Defragmentation failed. Body::parse() did not consume the entire buffer");
            return Err(crate::Error::ParseIncomplete);
        }

        Ok(Handshake {
            header,
            body,
            handled: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    pub fn fragment<'b>(
        &self,
        max: usize,
        buffer: &'b mut Buf,
    ) -> impl Iterator<Item = Handshake> + 'b {
        // Must be called with an empty buffer.
        assert!(buffer.is_empty());

        self.body.serialize(&[], buffer);

        // If this is wrong, the serialize has not produced the same output as we parsed.
        assert_eq!(buffer.len(), self.header.length as usize);

        let header = self.header;

        buffer.chunks(max).enumerate().map(move |(i, chunk)| {
            let offset = i * max;
            let fragment_range = offset..(offset + chunk.len());

            Handshake {
                header: Header {
                    msg_type: header.msg_type,
                    length: header.length,
                    message_seq: header.message_seq,
                    fragment_offset: offset as u32,
                    fragment_length: chunk.len() as u32,
                },
                body: Body::Fragment(fragment_range),
                handled: AtomicBool::new(false),
            }
        })
    }

    // These are (unencrypted) handshakes that, when detected as
    // duplicates, trigger a resend of the entire flight.
    pub fn dupe_triggers_resend(&self) -> Option<u16> {
        // Only trigger on the first fragment of a handshake message to avoid
        // multiple resends caused by fragmented duplicates of the same message.
        if self.header.fragment_offset != 0 {
            return None;
        }

        let qualifies = matches!(
            self.header.msg_type,
            MessageType::ClientHello |     // flight 1
            MessageType::ServerHelloDone | // flight 2
            MessageType::ClientKeyExchange // flight 3
        );

        qualifies.then_some(self.header.message_seq)
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn set_handled(&self) {
        self.handled.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HelloRequest, // empty
    ClientHello,
    ServerHello,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone, // empty
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    SupplementalData,
    Unknown(u8),
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::HelloRequest, // empty
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            11 => MessageType::Certificate,
            12 => MessageType::ServerKeyExchange,
            13 => MessageType::CertificateRequest,
            14 => MessageType::ServerHelloDone, // empty
            15 => MessageType::CertificateVerify,
            16 => MessageType::ClientKeyExchange,
            20 => MessageType::Finished,
            23 => MessageType::SupplementalData,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::HelloRequest => 0,
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::Certificate => 11,
            MessageType::ServerKeyExchange => 12,
            MessageType::CertificateRequest => 13,
            MessageType::ServerHelloDone => 14,
            MessageType::CertificateVerify => 15,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::SupplementalData => 23,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }

    /// The epoch a message of this type is sent in. Only Finished goes
    /// out under the new cipher state.
    pub fn epoch(&self) -> u16 {
        if matches!(self, MessageType::Finished) {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Body {
    HelloRequest, // empty
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone, // empty
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
    SupplementalData(SupplementalData),
    Unknown(u8),
    Fragment(Range<usize>),
}

impl Default for Body {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl Body {
    /// The wire format only matters for ClientHello (cookie field).
    const WIRE_FOR_BODY: WireFormat = WireFormat::Datagram;

    pub fn parse(input: &[u8], m: MessageType, c: Option<CipherSuite>) -> IResult<&[u8], Body> {
        Self::parse_wire(input, Self::WIRE_FOR_BODY, m, c)
    }

    pub fn parse_wire(
        input: &[u8],
        wire: WireFormat,
        m: MessageType,
        c: Option<CipherSuite>,
    ) -> IResult<&[u8], Body> {
        match m {
            MessageType::HelloRequest => Ok((input, Body::HelloRequest)),
            MessageType::ClientHello => {
                let (input, client_hello) = ClientHello::parse(input, wire)?;
                Ok((input, Body::ClientHello(client_hello)))
            }
            MessageType::ServerHello => {
                let (input, server_hello) = ServerHello::parse(input)?;
                Ok((input, Body::ServerHello(server_hello)))
            }
            MessageType::Certificate => {
                let (input, certificate) = Certificate::parse(input)?;
                Ok((input, Body::Certificate(certificate)))
            }
            MessageType::ServerKeyExchange => {
                let cipher_suite =
                    c.ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Fail)))?;
                let algo = cipher_suite.as_key_exchange_algorithm();
                let (input, server_key_exchange) = ServerKeyExchange::parse(input, algo)?;
                Ok((input, Body::ServerKeyExchange(server_key_exchange)))
            }
            MessageType::CertificateRequest => {
                let (input, certificate_request) = CertificateRequest::parse(input)?;
                Ok((input, Body::CertificateRequest(certificate_request)))
            }
            MessageType::ServerHelloDone => Ok((input, Body::ServerHelloDone)),
            MessageType::CertificateVerify => {
                let (input, certificate_verify) = CertificateVerify::parse(input)?;
                Ok((input, Body::CertificateVerify(certificate_verify)))
            }
            MessageType::ClientKeyExchange => {
                let cipher_suite =
                    c.ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Fail)))?;
                let algo = cipher_suite.as_key_exchange_algorithm();
                let (input, client_key_exchange) = ClientKeyExchange::parse(input, algo)?;
                Ok((input, Body::ClientKeyExchange(client_key_exchange)))
            }
            MessageType::Finished => {
                let cipher_suite =
                    c.ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Fail)))?;
                let (input, finished) = Finished::parse(input, cipher_suite)?;
                Ok((input, Body::Finished(finished)))
            }
            MessageType::SupplementalData => {
                let (input, supplemental_data) = SupplementalData::parse(input)?;
                Ok((input, Body::SupplementalData(supplemental_data)))
            }
            MessageType::Unknown(value) => Ok((input, Body::Unknown(value))),
        }
    }

    pub fn serialize(&self, source_buf: &[u8], output: &mut Buf) {
        self.serialize_wire(Self::WIRE_FOR_BODY, source_buf, output);
    }

    pub fn serialize_wire(&self, wire: WireFormat, source_buf: &[u8], output: &mut Buf) {
        match self {
            Body::HelloRequest => {
                // Empty body.
            }
            Body::ClientHello(client_hello) => {
                client_hello.serialize(wire, output);
            }
            Body::ServerHello(server_hello) => {
                server_hello.serialize(output);
            }
            Body::Certificate(certificate) => {
                certificate.serialize(output);
            }
            Body::ServerKeyExchange(server_key_exchange) => {
                server_key_exchange.serialize(output);
            }
            Body::CertificateRequest(certificate_request) => {
                certificate_request.serialize(output);
            }
            Body::ServerHelloDone => {
                // Empty body.
            }
            Body::CertificateVerify(certificate_verify) => {
                certificate_verify.serialize(output);
            }
            Body::ClientKeyExchange(client_key_exchange) => {
                client_key_exchange.serialize(output);
            }
            Body::Finished(finished) => {
                finished.serialize(output);
            }
            Body::SupplementalData(supplemental_data) => {
                supplemental_data.serialize(output);
            }
            Body::Unknown(value) => {
                output.push(*value);
            }
            Body::Fragment(range) => {
                output.extend_from_slice(&source_buf[range.clone()]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::message::{CipherSuiteVec, Random, SessionId};
    use crate::types::ProtocolVersion;
    use crate::SeededRng;

    fn client_hello() -> ClientHello {
        let mut rng = SeededRng::new(Some(9));
        let mut suites = CipherSuiteVec::new();
        suites.push(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);
        ClientHello::new(
            ProtocolVersion::DTLS1_2,
            Random::new(0x01020304, &mut rng),
            SessionId::empty(),
            suites,
        )
    }

    #[test]
    fn handshake_header_sizes() {
        let h = Handshake::new(MessageType::ServerHelloDone, 0, 0, Body::ServerHelloDone);

        let mut v = Buf::new();
        h.serialize(WireFormat::Datagram, &[], &mut v);
        assert_eq!(v.len(), 12);

        let mut v = Buf::new();
        h.serialize(WireFormat::Stream, &[], &mut v);
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn roundtrip_datagram() {
        let hello = client_hello();
        let mut body_buf = Buf::new();
        hello.serialize(WireFormat::Datagram, &mut body_buf);

        let handshake = Handshake::new(
            MessageType::ClientHello,
            body_buf.len() as u32,
            0,
            Body::ClientHello(hello),
        );

        let mut serialized = Buf::new();
        handshake.serialize(WireFormat::Datagram, &[], &mut serialized);

        let (rest, parsed) =
            Handshake::parse(&serialized, WireFormat::Datagram, 0, None, false).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn roundtrip_fragmented() {
        let hello = client_hello();
        let mut body_buf = Buf::new();
        hello.serialize(WireFormat::Datagram, &mut body_buf);
        let length = body_buf.len() as u32;

        let handshake =
            Handshake::new(MessageType::ClientHello, length, 0, Body::ClientHello(hello));

        let mut buffer = Buf::new();
        let fragments: VecDeque<_> = handshake.fragment(10, &mut buffer).collect();
        assert!(fragments.len() > 1);
        for f in &fragments {
            assert_eq!(f.header.message_seq, 0);
        }

        let mut defragmented_buffer = Buf::new();
        let defragmented = Handshake::defragment(
            fragments.iter().map(|h| (h, &buffer[..])),
            &mut defragmented_buffer,
            WireFormat::Datagram,
            None,
            None,
        )
        .unwrap();

        assert_eq!(defragmented, handshake);
    }

    #[test]
    fn incomplete_fragments_fail() {
        let hello = client_hello();
        let mut body_buf = Buf::new();
        hello.serialize(WireFormat::Datagram, &mut body_buf);
        let length = body_buf.len() as u32;

        let handshake =
            Handshake::new(MessageType::ClientHello, length, 0, Body::ClientHello(hello));

        let mut buffer = Buf::new();
        let mut fragments: Vec<_> = handshake.fragment(10, &mut buffer).collect();
        fragments.pop();

        let mut defragmented_buffer = Buf::new();
        let result = Handshake::defragment(
            fragments.iter().map(|h| (h, &buffer[..])),
            &mut defragmented_buffer,
            WireFormat::Datagram,
            None,
            None,
        );
        assert!(result.is_err());
    }
}
