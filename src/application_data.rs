use std::io::{Read, Write};

use crate::content::ContentType;
use crate::error::Result;

/// Opaque application payload, carried only at epoch >= 1. Epoch-0
/// ApplicationData is rejected by the record layer before it ever
/// reaches this type (`Error::ErrApplicationDataEpochZero`).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApplicationData {
    pub data: Vec<u8>,
}

impl ApplicationData {
    pub fn content_type(&self) -> ContentType {
        ContentType::ApplicationData
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.data)?;
        Ok(())
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let mut data = vec![];
        reader.read_to_end(&mut data)?;
        Ok(ApplicationData { data })
    }
}
