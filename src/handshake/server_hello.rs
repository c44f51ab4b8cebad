use std::io::{BufReader, BufWriter, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::random::HandshakeRandom;
use super::HandshakeType;
use crate::cipher_suite::CipherSuiteId;
use crate::compression_methods::CompressionMethodId;
use crate::error::Result;
use crate::extension::Extension;
use crate::record_layer::header::ProtocolVersion;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: HandshakeRandom,
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuiteId,
    pub compression_method: CompressionMethodId,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::ServerHello
    }

    pub fn size(&self) -> usize {
        let mut len = 2 + self.random.size();
        len += 1 + self.session_id.len();
        len += 2;
        len += 1;
        len += 2;
        for extension in &self.extensions {
            len += extension.size();
        }
        len
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.version.major)?;
        writer.write_u8(self.version.minor)?;
        writer.write_all(&self.random.marshal_fixed())?;

        writer.write_u8(self.session_id.len() as u8)?;
        writer.write_all(&self.session_id)?;

        writer.write_u16::<BigEndian>(self.cipher_suite as u16)?;
        writer.write_u8(self.compression_method as u8)?;

        let mut extension_buffer = vec![];
        {
            let mut extension_writer = BufWriter::<&mut Vec<u8>>::new(extension_buffer.as_mut());
            for extension in &self.extensions {
                extension.marshal(&mut extension_writer)?;
            }
        }
        writer.write_u16::<BigEndian>(extension_buffer.len() as u16)?;
        writer.write_all(&extension_buffer)?;

        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;

        let mut random_buf = [0u8; super::random::HANDSHAKE_RANDOM_LENGTH];
        reader.read_exact(&mut random_buf)?;
        let random = HandshakeRandom::unmarshal_fixed(&random_buf);

        let session_id_len = reader.read_u8()? as usize;
        let mut session_id = vec![0u8; session_id_len];
        reader.read_exact(&mut session_id)?;

        let cipher_suite = reader.read_u16::<BigEndian>()?.into();
        let compression_method = reader.read_u8()?.into();

        let mut extensions = vec![];
        let extension_buffer_len = reader.read_u16::<BigEndian>()? as usize;
        let mut extension_buffer = vec![0u8; extension_buffer_len];
        reader.read_exact(&mut extension_buffer)?;

        let mut offset = 0;
        while offset + 4 <= extension_buffer_len {
            let mut extension_reader = BufReader::new(&extension_buffer[offset..]);
            if let Ok(extension) = Extension::unmarshal(&mut extension_reader) {
                extensions.push(extension);
            } else {
                log::warn!("unsupported extension type at offset {offset}");
            }
            let extension_len = u16::from_be_bytes([
                extension_buffer[offset + 2],
                extension_buffer[offset + 3],
            ]) as usize;
            offset += 4 + extension_len;
        }

        Ok(ServerHello {
            version: ProtocolVersion { major, minor },
            random,
            session_id,
            cipher_suite,
            compression_method,
            extensions,
        })
    }
}
