use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::named_group::NamedGroup;
use super::ExtensionValue;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionSupportedGroups {
    pub groups: Vec<NamedGroup>,
}

impl ExtensionSupportedGroups {
    pub fn extension_value(&self) -> ExtensionValue {
        ExtensionValue::SupportedGroups
    }

    pub fn size(&self) -> usize {
        2 + 2 + self.groups.len() * 2
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(2 + 2 * self.groups.len() as u16)?;
        writer.write_u16::<BigEndian>(2 * self.groups.len() as u16)?;
        for g in &self.groups {
            writer.write_u16::<BigEndian>(*g as u16)?;
        }
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let _ = reader.read_u16::<BigEndian>()?;
        let count = reader.read_u16::<BigEndian>()? as usize / 2;
        let mut groups = vec![];
        for _ in 0..count {
            groups.push(reader.read_u16::<BigEndian>()?.into());
        }
        Ok(ExtensionSupportedGroups { groups })
    }
}
