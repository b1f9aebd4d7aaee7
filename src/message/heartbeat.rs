use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::SeededRng;

/// Minimum padding on a heartbeat message (RFC 6520 §4).
pub const HEARTBEAT_PADDING_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMessageType {
    Request,
    Response,
    Unknown(u8),
}

impl HeartbeatMessageType {
    pub fn as_u8(&self) -> u8 {
        match self {
            HeartbeatMessageType::Request => 1,
            HeartbeatMessageType::Response => 2,
            HeartbeatMessageType::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HeartbeatMessageType> {
        let (input, value) = be_u8(input)?;
        let t = match value {
            1 => HeartbeatMessageType::Request,
            2 => HeartbeatMessageType::Response,
            _ => HeartbeatMessageType::Unknown(value),
        };
        Ok((input, t))
    }
}

/// A heartbeat message (RFC 6520 §4).
///
/// The payload is echoed verbatim in a response. Parsing enforces that
/// the claimed payload length plus the minimum padding fits the message,
/// so an over-claiming request never reads beyond the actual payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub message_type: HeartbeatMessageType,
    pub payload: Vec<u8>,
}

impl Heartbeat {
    pub fn request(payload: Vec<u8>) -> Self {
        Heartbeat {
            message_type: HeartbeatMessageType::Request,
            payload,
        }
    }

    pub fn response_to(&self) -> Heartbeat {
        Heartbeat {
            message_type: HeartbeatMessageType::Response,
            payload: self.payload.clone(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Heartbeat> {
        let total = input.len();
        let (input, message_type) = HeartbeatMessageType::parse(input)?;
        let (input, payload_length) = be_u16(input)?;

        // type(1) + length(2) + payload + padding(>=16) must fit.
        if payload_length as usize + 3 + HEARTBEAT_PADDING_LEN > total {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, payload) = take(payload_length)(input)?;

        // Remaining bytes are padding, ignored.
        Ok((
            &input[input.len()..],
            Heartbeat {
                message_type,
                payload: payload.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf, rng: &mut SeededRng) {
        output.push(self.message_type.as_u8());
        output.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.payload);

        let mut padding = [0u8; HEARTBEAT_PADDING_LEN];
        rng.fill_bytes(&mut padding);
        output.extend_from_slice(&padding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut rng = SeededRng::new(Some(1));
        let hb = Heartbeat::request(vec![0x01, 0x02, 0x03]);

        let mut serialized = Buf::new();
        hb.serialize(&mut serialized, &mut rng);
        assert_eq!(serialized.len(), 3 + 3 + HEARTBEAT_PADDING_LEN);

        let (rest, parsed) = Heartbeat::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hb);
    }

    #[test]
    fn response_echoes_payload() {
        let hb = Heartbeat::request(vec![0xAA, 0xBB]);
        let response = hb.response_to();
        assert_eq!(response.message_type, HeartbeatMessageType::Response);
        assert_eq!(response.payload, hb.payload);
    }

    #[test]
    fn rejects_overclaimed_payload_length() {
        // Claims 100 bytes of payload but carries only 2 + padding.
        let mut data = vec![0x01, 0x00, 0x64, 0xAA, 0xBB];
        data.extend_from_slice(&[0u8; HEARTBEAT_PADDING_LEN]);
        assert!(Heartbeat::parse(&data).is_err());
    }
}
