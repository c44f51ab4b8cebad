use std::io::{Read, Write};

use crate::alert::Alert;
use crate::application_data::ApplicationData;
use crate::change_cipher_spec::ChangeCipherSpec;
use crate::error::{Error, Result};
use crate::handshake::Handshake;

/// The four DTLS record content types, per RFC 6347 §4.1. `Invalid`
/// is retained as a catch-all for a type byte no variant claims.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Invalid = 255,
}

impl From<u8> for ContentType {
    fn from(val: u8) -> Self {
        match val {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Invalid,
        }
    }
}

/// The plaintext payload of one record, after decryption (or directly,
/// for epoch-0 records). Each record carries exactly one `Content`.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    ChangeCipherSpec(ChangeCipherSpec),
    Alert(Alert),
    Handshake(Handshake),
    ApplicationData(ApplicationData),
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::ChangeCipherSpec(_) => ContentType::ChangeCipherSpec,
            Content::Alert(_) => ContentType::Alert,
            Content::Handshake(_) => ContentType::Handshake,
            Content::ApplicationData(_) => ContentType::ApplicationData,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Content::ChangeCipherSpec(c) => c.size(),
            Content::Alert(a) => a.size(),
            Content::Handshake(h) => h.size(),
            Content::ApplicationData(a) => a.size(),
        }
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Content::ChangeCipherSpec(c) => c.marshal(writer),
            Content::Alert(a) => a.marshal(writer),
            Content::Handshake(h) => h.marshal(writer),
            Content::ApplicationData(a) => a.marshal(writer),
        }
    }

    pub fn unmarshal<R: Read>(content_type: ContentType, reader: &mut R) -> Result<Self> {
        match content_type {
            ContentType::ChangeCipherSpec => {
                Ok(Content::ChangeCipherSpec(ChangeCipherSpec::unmarshal(reader)?))
            }
            ContentType::Alert => Ok(Content::Alert(Alert::unmarshal(reader)?)),
            ContentType::Handshake => Ok(Content::Handshake(Handshake::unmarshal(reader)?)),
            ContentType::ApplicationData => {
                Ok(Content::ApplicationData(ApplicationData::unmarshal(reader)?))
            }
            ContentType::Invalid => Err(Error::DecodeError),
        }
    }
}
