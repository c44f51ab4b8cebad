use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use super::HandshakeType;
use crate::error::{Error, Result};
use crate::record_layer::header::ProtocolVersion;

/// Sent by the server in response to a cookie-less ClientHello, per
/// RFC 6347 §4.2.1. The client must retransmit its ClientHello with the
/// returned cookie attached before the server commits any state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::HelloVerifyRequest
    }

    pub fn size(&self) -> usize {
        2 + 1 + self.cookie.len()
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.cookie.len() > 255 {
            return Err(Error::ErrCookieTooLong);
        }
        writer.write_u8(self.version.major)?;
        writer.write_u8(self.version.minor)?;
        writer.write_u8(self.cookie.len() as u8)?;
        writer.write_all(&self.cookie)?;
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;
        let cookie_len = reader.read_u8()? as usize;
        let mut cookie = vec![0u8; cookie_len];
        reader.read_exact(&mut cookie)?;

        Ok(HelloVerifyRequest {
            version: ProtocolVersion { major, minor },
            cookie,
        })
    }
}
