use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::content::ContentType;
use crate::error::{Error, Result};

/// The single-byte ChangeCipherSpec message. Its arrival marks the epoch
/// boundary: every record after it on that connection uses the next
/// epoch's keys.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ChangeCipherSpec;

impl ChangeCipherSpec {
    pub fn content_type(&self) -> ContentType {
        ContentType::ChangeCipherSpec
    }

    pub fn size(&self) -> usize {
        1
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(1)?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let val = reader.read_u8()?;
        if val != 1 {
            return Err(Error::DecodeError);
        }
        Ok(ChangeCipherSpec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut buf = vec![];
        ChangeCipherSpec.marshal(&mut buf).unwrap();
        assert_eq!(buf, vec![1]);
        ChangeCipherSpec::unmarshal(&mut buf.as_slice()).unwrap();
    }

    #[test]
    fn rejects_bad_value() {
        let buf = vec![0u8];
        assert!(ChangeCipherSpec::unmarshal(&mut buf.as_slice()).is_err());
    }
}
