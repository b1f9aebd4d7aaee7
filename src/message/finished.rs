use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::IResult;

use crate::buffer::Buf;

use super::CipherSuite;

/// The Finished handshake message: 12 bytes of verify_data binding the
/// transcript (RFC 5246 §7.4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: ArrayVec<u8, 12>,
}

impl Finished {
    pub fn new(verify_data: &[u8]) -> Self {
        let mut vd = ArrayVec::new();
        vd.try_extend_from_slice(verify_data)
            .expect("verify_data fits 12 bytes");
        Finished { verify_data: vd }
    }

    pub fn parse(input: &[u8], cipher_suite: CipherSuite) -> IResult<&[u8], Finished> {
        let verify_data_length = cipher_suite.verify_data_length();
        let (input, verify_data) = take(verify_data_length)(input)?;
        Ok((input, Finished::new(verify_data)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.verify_data);
    }
}
