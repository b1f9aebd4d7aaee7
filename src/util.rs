use std::ops::RangeFrom;

use nom::error::{make_error, ErrorKind, ParseError};
use nom::{Err, IResult, InputIter, InputLength, Slice};

/// Parse a 48-bit big-endian sequence number.
pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_u48() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0xFF];
        let (rest, value) = be_u48::<_, nom::error::Error<&[u8]>>(&data[..]).unwrap();
        assert_eq!(value, 0x0102);
        assert_eq!(rest, &[0xFF]);
    }

    #[test]
    fn too_short_fails() {
        let data = [0x00, 0x00];
        assert!(be_u48::<_, nom::error::Error<&[u8]>>(&data[..]).is_err());
    }
}
