use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::ExtensionValue;
use crate::error::{Error, Result};

const SERVER_NAME_TYPE_DNS_HOST_NAME: u8 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionServerName {
    pub server_name: String,
}

impl ExtensionServerName {
    pub fn extension_value(&self) -> ExtensionValue {
        ExtensionValue::ServerName
    }

    pub fn size(&self) -> usize {
        2 + 2 + 1 + 2 + self.server_name.len()
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.size() as u16)?;
        writer.write_u16::<BigEndian>(1 + 2 + self.server_name.len() as u16)?;
        writer.write_u8(SERVER_NAME_TYPE_DNS_HOST_NAME)?;
        writer.write_u16::<BigEndian>(self.server_name.len() as u16)?;
        writer.write_all(self.server_name.as_bytes())?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let _extension_len = reader.read_u16::<BigEndian>()?;
        let _list_len = reader.read_u16::<BigEndian>()?;

        let name_type = reader.read_u8()?;
        if name_type != SERVER_NAME_TYPE_DNS_HOST_NAME {
            return Err(Error::ErrInvalidSniFormat);
        }

        let name_len = reader.read_u16::<BigEndian>()? as usize;
        let mut buf = vec![0u8; name_len];
        reader.read_exact(&mut buf)?;

        Ok(ExtensionServerName {
            server_name: String::from_utf8(buf)?,
        })
    }
}
