pub mod certificate_type;
pub mod connection_id;
pub mod max_fragment_length;
pub mod named_group;
pub mod server_name;
pub mod supported_groups;

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use certificate_type::{ExtensionClientCertificateType, ExtensionServerCertificateType};
use connection_id::ExtensionConnectionId;
use max_fragment_length::ExtensionMaxFragmentLength;
use server_name::ExtensionServerName;
use supported_groups::ExtensionSupportedGroups;

use crate::error::{Error, Result};

/// The extension codepoints this core negotiates. Point formats,
/// signature algorithms, renegotiation_info, extended_master_secret and
/// use_srtp are not implemented here; they belong to the collaborator
/// that performs the actual key exchange and certificate verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExtensionValue {
    ServerName = 0,
    SupportedGroups = 10,
    MaxFragmentLength = 1,
    ClientCertificateType = 19,
    ServerCertificateType = 20,
    ConnectionId = 54,
    Unsupported,
}

impl From<u16> for ExtensionValue {
    fn from(val: u16) -> Self {
        match val {
            0 => ExtensionValue::ServerName,
            1 => ExtensionValue::MaxFragmentLength,
            10 => ExtensionValue::SupportedGroups,
            19 => ExtensionValue::ClientCertificateType,
            20 => ExtensionValue::ServerCertificateType,
            54 => ExtensionValue::ConnectionId,
            _ => ExtensionValue::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extension {
    ServerName(ExtensionServerName),
    SupportedGroups(ExtensionSupportedGroups),
    MaxFragmentLength(ExtensionMaxFragmentLength),
    ClientCertificateType(ExtensionClientCertificateType),
    ServerCertificateType(ExtensionServerCertificateType),
    ConnectionId(ExtensionConnectionId),
}

impl Extension {
    pub fn extension_value(&self) -> ExtensionValue {
        match self {
            Extension::ServerName(e) => e.extension_value(),
            Extension::SupportedGroups(e) => e.extension_value(),
            Extension::MaxFragmentLength(e) => e.extension_value(),
            Extension::ClientCertificateType(e) => e.extension_value(),
            Extension::ServerCertificateType(e) => e.extension_value(),
            Extension::ConnectionId(e) => e.extension_value(),
        }
    }

    pub fn size(&self) -> usize {
        2 + match self {
            Extension::ServerName(e) => e.size(),
            Extension::SupportedGroups(e) => e.size(),
            Extension::MaxFragmentLength(e) => e.size(),
            Extension::ClientCertificateType(e) => e.size(),
            Extension::ServerCertificateType(e) => e.size(),
            Extension::ConnectionId(e) => e.size(),
        }
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.extension_value() as u16)?;
        match self {
            Extension::ServerName(e) => e.marshal(writer),
            Extension::SupportedGroups(e) => e.marshal(writer),
            Extension::MaxFragmentLength(e) => e.marshal(writer),
            Extension::ClientCertificateType(e) => e.marshal(writer),
            Extension::ServerCertificateType(e) => e.marshal(writer),
            Extension::ConnectionId(e) => e.marshal(writer),
        }
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let value: ExtensionValue = reader.read_u16::<BigEndian>()?.into();
        match value {
            ExtensionValue::ServerName => {
                Ok(Extension::ServerName(ExtensionServerName::unmarshal(reader)?))
            }
            ExtensionValue::SupportedGroups => Ok(Extension::SupportedGroups(
                ExtensionSupportedGroups::unmarshal(reader)?,
            )),
            ExtensionValue::MaxFragmentLength => Ok(Extension::MaxFragmentLength(
                ExtensionMaxFragmentLength::unmarshal(reader)?,
            )),
            ExtensionValue::ClientCertificateType => Ok(Extension::ClientCertificateType(
                ExtensionClientCertificateType::unmarshal(reader)?,
            )),
            ExtensionValue::ServerCertificateType => Ok(Extension::ServerCertificateType(
                ExtensionServerCertificateType::unmarshal(reader)?,
            )),
            ExtensionValue::ConnectionId => {
                Ok(Extension::ConnectionId(ExtensionConnectionId::unmarshal(reader)?))
            }
            ExtensionValue::Unsupported => Err(Error::ErrInvalidExtensionType),
        }
    }
}
