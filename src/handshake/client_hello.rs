use std::io::{BufReader, BufWriter, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::random::HandshakeRandom;
use super::HandshakeType;
use crate::cipher_suite::CipherSuiteId;
use crate::compression_methods::CompressionMethods;
use crate::error::{Error, Result};
use crate::extension::Extension;
use crate::record_layer::header::ProtocolVersion;

#[derive(Clone, Debug, PartialEq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: HandshakeRandom,
    pub session_id: Vec<u8>,
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<CipherSuiteId>,
    pub compression_methods: CompressionMethods,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::ClientHello
    }

    pub fn size(&self) -> usize {
        let mut len = 2 + self.random.size();
        len += 1 + self.session_id.len();
        len += 1 + self.cookie.len();
        len += 2 + 2 * self.cipher_suites.len();
        len += self.compression_methods.size();
        len += 2;
        for extension in &self.extensions {
            len += extension.size();
        }
        len
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.cookie.len() > 255 {
            return Err(Error::ErrCookieTooLong);
        }

        writer.write_u8(self.version.major)?;
        writer.write_u8(self.version.minor)?;
        writer.write_all(&self.random.marshal_fixed())?;

        writer.write_u8(self.session_id.len() as u8)?;
        writer.write_all(&self.session_id)?;

        writer.write_u8(self.cookie.len() as u8)?;
        writer.write_all(&self.cookie)?;

        writer.write_u16::<BigEndian>(2 * self.cipher_suites.len() as u16)?;
        for cipher_suite in &self.cipher_suites {
            writer.write_u16::<BigEndian>(*cipher_suite as u16)?;
        }

        self.compression_methods.marshal(writer)?;

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

        let cookie_len = reader.read_u8()? as usize;
        let mut cookie = vec![0u8; cookie_len];
        reader.read_exact(&mut cookie)?;

        let cipher_suites_len = reader.read_u16::<BigEndian>()? as usize / 2;
        let mut cipher_suites = vec![];
        for _ in 0..cipher_suites_len {
            cipher_suites.push(reader.read_u16::<BigEndian>()?.into());
        }

        let compression_methods = CompressionMethods::unmarshal(reader)?;

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

        Ok(ClientHello {
            version: ProtocolVersion { major, minor },
            random,
            session_id,
            cookie,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }
}
