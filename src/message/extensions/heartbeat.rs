use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::HeartbeatMode;

/// heartbeat extension (RFC 6520 §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatExtension {
    pub mode: HeartbeatMode,
}

impl HeartbeatExtension {
    pub fn new(mode: HeartbeatMode) -> Self {
        HeartbeatExtension { mode }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HeartbeatExtension> {
        let (input, code) = be_u8(input)?;
        let mode = HeartbeatMode::from_u8(code)
            .ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Tag)))?;
        Ok((input, HeartbeatExtension { mode }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.mode.as_u8());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = HeartbeatExtension::new(HeartbeatMode::PeerAllowedToSend);

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);
        assert_eq!(&*serialized, [0x01]);

        let (rest, parsed) = HeartbeatExtension::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn rejects_invalid_mode() {
        assert!(HeartbeatExtension::parse(&[0x03]).is_err());
    }
}
