use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::ExtensionValue;
use crate::error::{Error, Result};

/// RFC 6066 §4 fragment length codepoints. A server receiving this in
/// ClientHello clamps its own `Config::max_fragment_length` down to the
/// requested size for the rest of the handshake and echoes the same
/// code back in ServerHello; a client applies whatever the server
/// actually echoes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FragmentLengthCode {
    Bits512 = 1,
    Bits1024 = 2,
    Bits2048 = 3,
    Bits4096 = 4,
}

impl FragmentLengthCode {
    fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(FragmentLengthCode::Bits512),
            2 => Ok(FragmentLengthCode::Bits1024),
            3 => Ok(FragmentLengthCode::Bits2048),
            4 => Ok(FragmentLengthCode::Bits4096),
            _ => Err(Error::DecodeError),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExtensionMaxFragmentLength {
    pub code: FragmentLengthCode,
}

impl ExtensionMaxFragmentLength {
    pub fn extension_value(&self) -> ExtensionValue {
        ExtensionValue::MaxFragmentLength
    }

    pub fn size(&self) -> usize {
        2 + 1
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(1)?;
        writer.write_u8(self.code as u8)?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let _ = reader.read_u16::<BigEndian>()?;
        let code = FragmentLengthCode::from_u8(reader.read_u8()?)?;
        Ok(ExtensionMaxFragmentLength { code })
    }
}
