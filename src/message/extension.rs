use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::buffer::Buf;

pub type ExtensionVec = ArrayVec<Extension, 8>;

/// A raw hello extension: type + opaque data.
///
/// Typed views over the data live in [`super::extensions`].
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub extension_data: Vec<u8>,
}

impl Extension {
    pub fn new(extension_type: ExtensionType, extension_data: Vec<u8>) -> Self {
        Extension {
            extension_type,
            extension_data,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, extension_type) = ExtensionType::parse(input)?;
        let (input, extension_length) = be_u16(input)?;
        let (input, extension_data) = take(extension_length)(input)?;

        Ok((
            input,
            Extension {
                extension_type,
                extension_data: extension_data.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.extension_type.as_u16().to_be_bytes());
        output.extend_from_slice(&(self.extension_data.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.extension_data);
    }
}

/// Parse the extensions block that optionally trails a hello message.
///
/// Unknown extension types are retained so callers can log them; they are
/// never acted upon.
pub fn parse_extensions(input: &[u8]) -> IResult<&[u8], ExtensionVec> {
    let mut extensions = ExtensionVec::new();

    if input.is_empty() {
        return Ok((input, extensions));
    }

    let (input, extensions_len) = be_u16(input)?;
    let (input, mut ext_data) = take(extensions_len)(input)?;

    while !ext_data.is_empty() {
        if extensions.is_full() {
            // Skip extensions beyond our capacity rather than failing.
            break;
        }
        let (rest, extension) = Extension::parse(ext_data)?;
        extensions.push(extension);
        ext_data = rest;
    }

    Ok((input, extensions))
}

/// Serialize an extensions block with its u16 length prefix.
///
/// An empty vec writes nothing, matching a hello without extensions.
pub fn serialize_extensions(extensions: &[Extension], output: &mut Buf) {
    if extensions.is_empty() {
        return;
    }

    let total: usize = extensions
        .iter()
        .map(|e| 4 + e.extension_data.len())
        .sum();
    output.extend_from_slice(&(total as u16).to_be_bytes());

    for extension in extensions {
        extension.serialize(output);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName,
    MaxFragmentLength,
    UserMapping,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    Heartbeat,
    RenegotiationInfo,
    Unknown(u16),
}

impl Default for ExtensionType {
    fn default() -> Self {
        ExtensionType::Unknown(0)
    }
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => ExtensionType::ServerName,
            0x0001 => ExtensionType::MaxFragmentLength,
            0x0006 => ExtensionType::UserMapping,
            0x000A => ExtensionType::SupportedGroups,
            0x000B => ExtensionType::EcPointFormats,
            0x000D => ExtensionType::SignatureAlgorithms,
            0x000F => ExtensionType::Heartbeat,
            0xFF01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0x0000,
            ExtensionType::MaxFragmentLength => 0x0001,
            ExtensionType::UserMapping => 0x0006,
            ExtensionType::SupportedGroups => 0x000A,
            ExtensionType::EcPointFormats => 0x000B,
            ExtensionType::SignatureAlgorithms => 0x000D,
            ExtensionType::Heartbeat => 0x000F,
            ExtensionType::RenegotiationInfo => 0xFF01,
            ExtensionType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ExtensionType> {
        let (input, value) = be_u16(input)?;
        Ok((input, ExtensionType::from_u16(value)))
    }
}

pub(crate) fn length_value_error(input: &[u8]) -> Err<Error<&[u8]>> {
    Err::Failure(Error::new(input, ErrorKind::LengthValue))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0x00, 0x0A, // ExtensionType::SupportedGroups
        0x00, 0x08, // Extension length
        0x00, 0x06, 0x00, 0x17, 0x00, 0x18, 0x00, 0x19, // Extension data
    ];

    #[test]
    fn roundtrip() {
        let extension = Extension::new(ExtensionType::SupportedGroups, MESSAGE[4..].to_vec());

        let mut serialized = Buf::new();
        extension.serialize(&mut serialized);
        assert_eq!(&*serialized, MESSAGE);

        let (rest, parsed) = Extension::parse(&serialized).unwrap();
        assert_eq!(parsed, extension);

        assert!(rest.is_empty());
    }

    #[test]
    fn extensions_block_roundtrip() {
        let extension = Extension::new(ExtensionType::Heartbeat, vec![0x01]);

        let mut serialized = Buf::new();
        serialize_extensions(&[extension.clone()], &mut serialized);

        let (rest, parsed) = parse_extensions(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], extension);
    }

    #[test]
    fn empty_extensions_block_is_absent() {
        let mut serialized = Buf::new();
        serialize_extensions(&[], &mut serialized);
        assert!(serialized.is_empty());

        let (_, parsed) = parse_extensions(&serialized).unwrap();
        assert!(parsed.is_empty());
    }
}
