use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::ExtensionValue;
use crate::error::{Error, Result};

/// RFC 9146 connection_id extension. An empty `cid` signals willingness
/// to use CIDs without requesting one of a particular value; the peer
/// picks the actual id it wants to receive on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionConnectionId {
    pub cid: Vec<u8>,
}

impl ExtensionConnectionId {
    pub fn extension_value(&self) -> ExtensionValue {
        ExtensionValue::ConnectionId
    }

    pub fn size(&self) -> usize {
        2 + 1 + self.cid.len()
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.cid.len() > 255 {
            return Err(Error::ErrConnectionIdTooLong);
        }
        writer.write_u16::<BigEndian>(1 + self.cid.len() as u16)?;
        writer.write_u8(self.cid.len() as u8)?;
        writer.write_all(&self.cid)?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let _ = reader.read_u16::<BigEndian>()?;
        let len = reader.read_u8()? as usize;
        let mut cid = vec![0u8; len];
        reader.read_exact(&mut cid)?;
        Ok(ExtensionConnectionId { cid })
    }
}
