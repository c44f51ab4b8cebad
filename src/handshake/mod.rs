pub mod certificate;
pub mod certificate_request;
pub mod certificate_verify;
pub mod client_hello;
pub mod client_key_exchange;
pub mod finished;
pub mod header;
pub mod hello_verify_request;
pub mod random;
pub mod server_hello;
pub mod server_hello_done;
pub mod server_key_exchange;
pub mod transcript;

use std::fmt;
use std::io::{Read, Write};

use certificate::Certificate;
use certificate_request::CertificateRequest;
use certificate_verify::CertificateVerify;
use client_hello::ClientHello;
use client_key_exchange::ClientKeyExchange;
use finished::Finished;
use header::HandshakeHeader;
use hello_verify_request::HelloVerifyRequest;
use server_hello::ServerHello;
use server_hello_done::ServerHelloDone;
use server_key_exchange::ServerKeyExchange;

use crate::content::ContentType;
use crate::error::{Error, Result};

/// The handshake message types this core negotiates, per RFC 5246
/// §7.4. `HelloRequest` is not implemented: renegotiation is out of
/// scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    HelloVerifyRequest = 3,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    #[default]
    Invalid,
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<u8> for HandshakeType {
    fn from(val: u8) -> Self {
        match val {
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            _ => HandshakeType::Invalid,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HandshakeMessage {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest(HelloVerifyRequest),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone(ServerHelloDone),
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
}

impl HandshakeMessage {
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::ClientHello(m) => m.handshake_type(),
            HandshakeMessage::ServerHello(m) => m.handshake_type(),
            HandshakeMessage::HelloVerifyRequest(m) => m.handshake_type(),
            HandshakeMessage::Certificate(m) => m.handshake_type(),
            HandshakeMessage::ServerKeyExchange(m) => m.handshake_type(),
            HandshakeMessage::CertificateRequest(m) => m.handshake_type(),
            HandshakeMessage::ServerHelloDone(m) => m.handshake_type(),
            HandshakeMessage::CertificateVerify(m) => m.handshake_type(),
            HandshakeMessage::ClientKeyExchange(m) => m.handshake_type(),
            HandshakeMessage::Finished(m) => m.handshake_type(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            HandshakeMessage::ClientHello(m) => m.size(),
            HandshakeMessage::ServerHello(m) => m.size(),
            HandshakeMessage::HelloVerifyRequest(m) => m.size(),
            HandshakeMessage::Certificate(m) => m.size(),
            HandshakeMessage::ServerKeyExchange(m) => m.size(),
            HandshakeMessage::CertificateRequest(m) => m.size(),
            HandshakeMessage::ServerHelloDone(m) => m.size(),
            HandshakeMessage::CertificateVerify(m) => m.size(),
            HandshakeMessage::ClientKeyExchange(m) => m.size(),
            HandshakeMessage::Finished(m) => m.size(),
        }
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            HandshakeMessage::ClientHello(m) => m.marshal(writer),
            HandshakeMessage::ServerHello(m) => m.marshal(writer),
            HandshakeMessage::HelloVerifyRequest(m) => m.marshal(writer),
            HandshakeMessage::Certificate(m) => m.marshal(writer),
            HandshakeMessage::ServerKeyExchange(m) => m.marshal(writer),
            HandshakeMessage::CertificateRequest(m) => m.marshal(writer),
            HandshakeMessage::ServerHelloDone(m) => m.marshal(writer),
            HandshakeMessage::CertificateVerify(m) => m.marshal(writer),
            HandshakeMessage::ClientKeyExchange(m) => m.marshal(writer),
            HandshakeMessage::Finished(m) => m.marshal(writer),
        }
    }
}

/// A complete handshake message: header plus body. Flight assembly
/// works in terms of `Handshake`s, fragmenting the marshalled body
/// across as many records as `max_fragment_length` requires.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshake {
    pub header: HandshakeHeader,
    pub message: HandshakeMessage,
}

impl Handshake {
    pub fn new(message: HandshakeMessage, message_sequence: u16) -> Self {
        Handshake {
            header: HandshakeHeader {
                handshake_type: message.handshake_type(),
                length: message.size() as u32,
                message_sequence,
                fragment_offset: 0,
                fragment_length: message.size() as u32,
            },
            message,
        }
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::Handshake
    }

    pub fn size(&self) -> usize {
        self.header.size() + self.message.size()
    }

    pub fn marshal<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.header.marshal(writer)?;
        self.message.marshal(writer)?;
        Ok(())
    }

    pub fn unmarshal<R: Read>(reader: &mut R) -> Result<Self> {
        let header = HandshakeHeader::unmarshal(reader)?;

        let message = match header.handshake_type {
            HandshakeType::ClientHello => HandshakeMessage::ClientHello(ClientHello::unmarshal(reader)?),
            HandshakeType::ServerHello => HandshakeMessage::ServerHello(ServerHello::unmarshal(reader)?),
            HandshakeType::HelloVerifyRequest => {
                HandshakeMessage::HelloVerifyRequest(HelloVerifyRequest::unmarshal(reader)?)
            }
            HandshakeType::Certificate => HandshakeMessage::Certificate(Certificate::unmarshal(reader)?),
            HandshakeType::ServerKeyExchange => {
                HandshakeMessage::ServerKeyExchange(ServerKeyExchange::unmarshal(reader)?)
            }
            HandshakeType::CertificateRequest => {
                HandshakeMessage::CertificateRequest(CertificateRequest::unmarshal(reader)?)
            }
            HandshakeType::ServerHelloDone => {
                HandshakeMessage::ServerHelloDone(ServerHelloDone::unmarshal(reader)?)
            }
            HandshakeType::CertificateVerify => {
                HandshakeMessage::CertificateVerify(CertificateVerify::unmarshal(reader)?)
            }
            HandshakeType::ClientKeyExchange => {
                HandshakeMessage::ClientKeyExchange(ClientKeyExchange::unmarshal(reader)?)
            }
            HandshakeType::Finished => HandshakeMessage::Finished(Finished::unmarshal(reader)?),
            HandshakeType::Invalid => return Err(Error::DecodeError),
        };

        Ok(Handshake { header, message })
    }

    /// Reads one raw fragment off the wire: the 12-byte handshake header
    /// plus exactly `fragment_length` bytes, without attempting to parse
    /// those bytes as a complete message. This is the form a fragmented
    /// ClientHello/Certificate/etc. actually takes on the wire; only
    /// once a `Reassembler` has the full message back does
    /// `HandshakeMessage::unmarshal_body` make sense to call.
    pub fn unmarshal_fragment<R: Read>(reader: &mut R) -> Result<(HandshakeHeader, Vec<u8>)> {
        let header = HandshakeHeader::unmarshal(reader)?;
        let mut fragment = vec![0u8; header.fragment_length as usize];
        reader.read_exact(&mut fragment)?;
        Ok((header, fragment))
    }
}

impl HandshakeMessage {
    /// Parses a message body once its type is already known and its
    /// bytes have been fully reassembled from fragments. Used by the
    /// handshaker, which reads raw fragments off the wire itself
    /// (fragment bytes are not independently parseable) rather than
    /// going through `Handshake::unmarshal`.
    pub fn unmarshal_body<R: Read>(handshake_type: HandshakeType, reader: &mut R) -> Result<Self> {
        Ok(match handshake_type {
            HandshakeType::ClientHello => HandshakeMessage::ClientHello(ClientHello::unmarshal(reader)?),
            HandshakeType::ServerHello => HandshakeMessage::ServerHello(ServerHello::unmarshal(reader)?),
            HandshakeType::HelloVerifyRequest => {
                HandshakeMessage::HelloVerifyRequest(HelloVerifyRequest::unmarshal(reader)?)
            }
            HandshakeType::Certificate => HandshakeMessage::Certificate(Certificate::unmarshal(reader)?),
            HandshakeType::ServerKeyExchange => {
                HandshakeMessage::ServerKeyExchange(ServerKeyExchange::unmarshal(reader)?)
            }
            HandshakeType::CertificateRequest => {
                HandshakeMessage::CertificateRequest(CertificateRequest::unmarshal(reader)?)
            }
            HandshakeType::ServerHelloDone => {
                HandshakeMessage::ServerHelloDone(ServerHelloDone::unmarshal(reader)?)
            }
            HandshakeType::CertificateVerify => {
                HandshakeMessage::CertificateVerify(CertificateVerify::unmarshal(reader)?)
            }
            HandshakeType::ClientKeyExchange => {
                HandshakeMessage::ClientKeyExchange(ClientKeyExchange::unmarshal(reader)?)
            }
            HandshakeType::Finished => HandshakeMessage::Finished(Finished::unmarshal(reader)?),
            HandshakeType::Invalid => return Err(Error::DecodeError),
        })
    }
}
