use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::ExtensionValue;
use crate::error::Result;

/// RFC 7250 raw-public-key negotiation. `X509` is the only type this
/// core assumed before RFC 7250; `RawPublicKey` lets a `RawKeyVerifier`
/// collaborator stand in for a full `CertificateVerifier`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CertificateType {
    X509 = 0,
    RawPublicKey = 2,
}

impl From<u8> for CertificateType {
    fn from(val: u8) -> Self {
        match val {
            2 => CertificateType::RawPublicKey,
            _ => CertificateType::X509,
        }
    }
}

macro_rules! certificate_type_extension {
    ($name:ident, $value:expr) => {
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            pub types: Vec<CertificateType>,
        }

        impl $name {
            pub fn extension_value(&self) -> ExtensionValue {
                $value
            }

            pub fn size(&self) -> usize {
                2 + 1 + self.types.len()
            }

            pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
                writer.write_u16::<BigEndian>(1 + self.types.len() as u16)?;
                writer.write_u8(self.types.len() as u8)?;
                for t in &self.types {
                    writer.write_u8(*t as u8)?;
                }
                Ok(writer.flush()?)
            }

            pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
                let _ = reader.read_u16::<BigEndian>()?;
                let count = reader.read_u8()? as usize;
                let mut types = vec![];
                for _ in 0..count {
                    types.push(reader.read_u8()?.into());
                }
                Ok($name { types })
            }
        }
    };
}

certificate_type_extension!(ExtensionClientCertificateType, ExtensionValue::ClientCertificateType);
certificate_type_extension!(ExtensionServerCertificateType, ExtensionValue::ServerCertificateType);
