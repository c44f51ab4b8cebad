use std::io::{Read, Write};

use byteorder::{BigEndian, WriteBytesExt};

use super::HandshakeType;
use crate::error::{Error, Result};

/// Carries either a PSK identity (the client's chosen key) or its
/// ECDHE public key, per RFC 4279 §2 / RFC 4492 §5.7.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientKeyExchange {
    Psk { identity_hint: Vec<u8> },
    PublicKey(Vec<u8>),
}

impl ClientKeyExchange {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::ClientKeyExchange
    }

    pub fn size(&self) -> usize {
        match self {
            ClientKeyExchange::PublicKey(pk) => 1 + pk.len(),
            ClientKeyExchange::Psk { identity_hint } => 2 + identity_hint.len(),
        }
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            ClientKeyExchange::PublicKey(pk) => {
                writer.write_u8(pk.len() as u8)?;
                writer.write_all(pk)?;
            }
            ClientKeyExchange::Psk { identity_hint } => {
                writer.write_u16::<BigEndian>(identity_hint.len() as u16)?;
                writer.write_all(identity_hint)?;
            }
        }
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let mut data = vec![];
        reader.read_to_end(&mut data)?;
        if data.len() < 2 {
            return Err(Error::DecodeError);
        }

        let psk_length = u16::from_be_bytes([data[0], data[1]]) as usize;
        if data.len() == psk_length + 2 {
            return Ok(ClientKeyExchange::Psk {
                identity_hint: data[2..].to_vec(),
            });
        }

        let public_key_length = data[0] as usize;
        if data.len() != public_key_length + 1 {
            return Err(Error::DecodeError);
        }

        Ok(ClientKeyExchange::PublicKey(data[1..].to_vec()))
    }
}
