use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::HandshakeType;
use crate::error::{Error, Result};
use crate::extension::named_group::NamedGroup;
use crate::signature_hash_algorithm::SignatureHashAlgorithm;

const ELLIPTIC_CURVE_TYPE_NAMED_CURVE: u8 = 3;

/// Carries either a PSK identity hint or an ECDHE public key plus its
/// signature over (client_random || server_random || params), per
/// RFC 4492 §5.4. The signature is opaque here — verifying it is the
/// `CertificateVerifier`/`CipherSuite` collaborator's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerKeyExchange {
    Psk { identity_hint: Vec<u8> },
    Ecdhe {
        named_group: NamedGroup,
        public_key: Vec<u8>,
        algorithm: SignatureHashAlgorithm,
        signature: Vec<u8>,
    },
}

impl ServerKeyExchange {
    pub fn handshake_type(&self) -> HandshakeType {
        HandshakeType::ServerKeyExchange
    }

    pub fn size(&self) -> usize {
        match self {
            ServerKeyExchange::Psk { identity_hint } => 2 + identity_hint.len(),
            ServerKeyExchange::Ecdhe {
                public_key,
                signature,
                ..
            } => 1 + 2 + 1 + public_key.len() + 2 + 2 + signature.len(),
        }
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            ServerKeyExchange::Psk { identity_hint } => {
                writer.write_u16::<BigEndian>(identity_hint.len() as u16)?;
                writer.write_all(identity_hint)?;
            }
            ServerKeyExchange::Ecdhe {
                named_group,
                public_key,
                algorithm,
                signature,
            } => {
                writer.write_u8(ELLIPTIC_CURVE_TYPE_NAMED_CURVE)?;
                writer.write_u16::<BigEndian>(*named_group as u16)?;
                writer.write_u8(public_key.len() as u8)?;
                writer.write_all(public_key)?;
                writer.write_u8(algorithm.hash as u8)?;
                writer.write_u8(algorithm.signature as u8)?;
                writer.write_u16::<BigEndian>(signature.len() as u16)?;
                writer.write_all(signature)?;
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
            return Ok(ServerKeyExchange::Psk {
                identity_hint: data[2..].to_vec(),
            });
        }

        if data.len() < 4 {
            return Err(Error::DecodeError);
        }
        let named_group: NamedGroup = u16::from_be_bytes([data[1], data[2]]).into();
        let public_key_length = data[3] as usize;
        let mut offset = 4 + public_key_length;
        if data.len() < offset + 4 {
            return Err(Error::DecodeError);
        }
        let public_key = data[4..offset].to_vec();

        let hash = data[offset].into();
        let signature_algo = data[offset + 1].into();
        let signature_length =
            u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        offset += 4;
        if data.len() < offset + signature_length {
            return Err(Error::DecodeError);
        }
        let signature = data[offset..offset + signature_length].to_vec();

        Ok(ServerKeyExchange::Ecdhe {
            named_group,
            public_key,
            algorithm: SignatureHashAlgorithm {
                hash,
                signature: signature_algo,
            },
            signature,
        })
    }
}
