use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::HandshakeType;
use crate::client_certificate_type::ClientCertificateType;
use crate::error::Result;
use crate::signature_hash_algorithm::SignatureHashAlgorithm;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<ClientCertificateType>,
    pub signature_hash_algorithms: Vec<SignatureHashAlgorithm>,
}

impl CertificateRequest {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::CertificateRequest
    }

    pub fn size(&self) -> usize {
        1 + self.certificate_types.len() + 2 + self.signature_hash_algorithms.len() * 2 + 2
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.certificate_types.len() as u8)?;
        for t in &self.certificate_types {
            writer.write_u8(*t as u8)?;
        }
        writer.write_u16::<BigEndian>(2 * self.signature_hash_algorithms.len() as u16)?;
        for a in &self.signature_hash_algorithms {
            writer.write_u8(a.hash as u8)?;
            writer.write_u8(a.signature as u8)?;
        }
        writer.write_all(&[0x00, 0x00])?; // distinguished names, unused
        Ok(writer.flush()?)
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let certificate_types_len = reader.read_u8()?;
        let mut certificate_types = vec![];
        for _ in 0..certificate_types_len {
            certificate_types.push(reader.read_u8()?.into());
        }

        let sig_len = reader.read_u16::<BigEndian>()?;
        let mut signature_hash_algorithms = vec![];
        for _ in (0..sig_len).step_by(2) {
            let hash = reader.read_u8()?.into();
            let signature = reader.read_u8()?.into();
            signature_hash_algorithms.push(SignatureHashAlgorithm { hash, signature });
        }

        let mut dn = [0u8; 2];
        reader.read_exact(&mut dn)?;

        Ok(CertificateRequest {
            certificate_types,
            signature_hash_algorithms,
        })
    }
}
