use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::HandshakeType;
use crate::error::Result;

pub const HANDSHAKE_HEADER_LENGTH: usize = 12;

/// Framing shared by every handshake message, including the
/// fragmentation fields from RFC 6347 §4.2.2. `length` is the full
/// message length; `fragment_offset`/`fragment_length` describe the
/// slice carried by this particular record when a message has been
/// split across several.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct HandshakeHeader {
    pub handshake_type: HandshakeType,
    pub length: u32,
    pub message_sequence: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    pub fn size(&self) -> usize {
        HANDSHAKE_HEADER_LENGTH
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.handshake_type as u8)?;
        writer.write_u24::<BigEndian>(self.length)?;
        writer.write_u16::<BigEndian>(self.message_sequence)?;
        writer.write_u24::<BigEndian>(self.fragment_offset)?;
        writer.write_u24::<BigEndian>(self.fragment_length)?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let handshake_type = reader.read_u8()?.into();
        let length = reader.read_u24::<BigEndian>()?;
        let message_sequence = reader.read_u16::<BigEndian>()?;
        let fragment_offset = reader.read_u24::<BigEndian>()?;
        let fragment_length = reader.read_u24::<BigEndian>()?;

        Ok(HandshakeHeader {
            handshake_type,
            length,
            message_sequence,
            fragment_offset,
            fragment_length,
        })
    }
}
