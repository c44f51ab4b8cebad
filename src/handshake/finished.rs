use std::io::{Read, Write};

use super::HandshakeType;
use crate::error::Result;

/// `verify_data`, the PRF output over the full transcript hash (RFC
/// 5246 §7.4.9). The handshaker compares this byte-for-byte against
/// its own computed value; any mismatch is `ErrVerifyDataMismatch`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::Finished
    }

    pub fn size(&self) -> usize {
        self.verify_data.len()
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.verify_data)?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let mut verify_data = vec![];
        reader.read_to_end(&mut verify_data)?;
        Ok(Finished { verify_data })
    }
}
