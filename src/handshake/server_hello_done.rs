use std::io::{Read, Write};

use super::HandshakeType;
use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ServerHelloDone;

impl ServerHelloDone {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::ServerHelloDone
    }

    pub fn size(&self) -> usize {
        0
    }

    pub fn marshal<W: Write>(&self, _writer: &mut W) -> Result<()> {
        Ok(())
    }

    pub fn unmarshal<R: Read>(_reader: &mut R) -> Result<Self> {
        Ok(ServerHelloDone)
    }
}
