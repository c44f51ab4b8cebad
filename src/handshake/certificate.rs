use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::HandshakeType;
use crate::error::Result;

const CERTIFICATE_LENGTH_FIELD_SIZE: usize = 3;

/// A chain of DER-encoded certificates (or, with raw public keys
/// negotiated, a single SubjectPublicKeyInfo blob standing in the first
/// slot). Verification is the `CertificateVerifier`/`RawKeyVerifier`
/// collaborator's job; this core only frames the bytes.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Certificate {
    pub certificate_chain: Vec<Vec<u8>>,
}

impl Certificate {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::Certificate
    }

    pub fn size(&self) -> usize {
        let mut len = 3;
        for r in &self.certificate_chain {
            len += CERTIFICATE_LENGTH_FIELD_SIZE + r.len();
        }
        len
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut payload_size = 0;
        for r in &self.certificate_chain {
            payload_size += CERTIFICATE_LENGTH_FIELD_SIZE + r.len();
        }
        writer.write_u24::<BigEndian>(payload_size as u32)?;
        for r in &self.certificate_chain {
            writer.write_u24::<BigEndian>(r.len() as u32)?;
            writer.write_all(r)?;
        }
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let mut certificate_chain = vec![];
        let payload_size = reader.read_u24::<BigEndian>()? as usize;
        let mut offset = 0;
        while offset < payload_size {
            let cert_len = reader.read_u24::<BigEndian>()? as usize;
            offset += CERTIFICATE_LENGTH_FIELD_SIZE;
            let mut buf = vec![0u8; cert_len];
            reader.read_exact(&mut buf)?;
            offset += cert_len;
            certificate_chain.push(buf);
        }
        Ok(Certificate { certificate_chain })
    }
}
