pub mod assembler;

use std::fmt;

use crate::handshake::HandshakeType;

/// The full-handshake flights (F1-F6) and resumption flights (R1-R3)
/// from the handshake's flight diagram. Flights are the retransmission
/// unit: everything in one flight ships or is resent together, never
/// message-by-message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flight {
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    R1,
    R2,
    R3,
}

impl fmt::Display for Flight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Flight {
    /// The terminal flight of a role never retransmits on timeout —
    /// once it ships, the sender moves to ESTABLISHED and answers
    /// retransmits of the peer's last flight by replaying from cache
    /// instead of re-deriving (RFC 6347 §4.2.4).
    pub fn is_terminal_send(&self) -> bool {
        matches!(self, Flight::F6 | Flight::R3)
    }

    pub fn expected_client_types(&self) -> &'static [HandshakeType] {
        match self {
            Flight::F3 => &[HandshakeType::ClientHello],
            Flight::F5 => &[
                HandshakeType::Certificate,
                HandshakeType::ClientKeyExchange,
                HandshakeType::CertificateVerify,
                HandshakeType::Finished,
            ],
            Flight::R1 => &[HandshakeType::ClientHello],
            Flight::R3 => &[HandshakeType::Finished],
            _ => &[],
        }
    }
}
