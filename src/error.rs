use std::string::FromUtf8Error;

use thiserror::Error;

use crate::alert::AlertDescription;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure mode from the error-handling table, plus the wire-decode
/// failures a record/handshake parser needs. Mirrors the shape of
/// `webrtc_dtls::error::Error`: one flat, `#[non_exhaustive]` enum rather
/// than a tree of module-local error types.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("peer offered a protocol version older than DTLS 1.2")]
    ProtocolVersion,
    #[error("no common cipher suite, named group, or certificate type")]
    HandshakeFailure,
    #[error("message is not legal in the current handshake state")]
    UnexpectedMessage,
    #[error("malformed record or handshake message")]
    DecodeError,
    #[error("AEAD or signature verification failed")]
    DecryptError,
    #[error("PSK identity not recognised")]
    UnknownPskIdentity,
    #[error("retransmissions exhausted without progress")]
    RetransmissionExhausted,
    #[error("resource limit reached; dropping silently")]
    ResourceExhausted,

    #[error("client+server do not share a cipher suite")]
    ErrCipherSuiteNoIntersection,
    #[error("no cipher suite has been selected yet")]
    ErrCipherSuiteUnset,
    #[error("client sent a certificate but no CertificateVerify")]
    ErrCertificateVerifyNoCertificate,
    #[error("server required client certificate, client sent none")]
    ErrClientCertificateRequired,
    #[error("client certificate was not verified")]
    ErrClientCertificateNotVerified,
    #[error("client+server cookie does not match")]
    ErrCookieMismatch,
    #[error("cookie must not exceed 255 bytes")]
    ErrCookieTooLong,
    #[error("connection ID must not exceed 255 bytes")]
    ErrConnectionIdTooLong,
    #[error("PSK identity hint provided but no PSK callback configured")]
    ErrIdentityNoPsk,
    #[error("invalid or unknown cipher suite")]
    ErrInvalidCipherSuite,
    #[error("invalid or unknown compression method")]
    ErrInvalidCompressionMethod,
    #[error("invalid extension type")]
    ErrInvalidExtensionType,
    #[error("invalid named group")]
    ErrInvalidNamedGroup,
    #[error("invalid server name format")]
    ErrInvalidSniFormat,
    #[error("expected and actual verify_data do not match")]
    ErrVerifyDataMismatch,
    #[error("invalid flight number")]
    ErrInvalidFlight,
    #[error("packet length and declared length do not match")]
    ErrInvalidPacketLength,
    #[error("sequence number would overflow 48 bits")]
    ErrSequenceNumberOverflow,
    #[error("fragment buffer overflow: new size {new_size} exceeds max {max_size}")]
    ErrFragmentBufferOverflow { new_size: usize, max_size: usize },
    #[error("overlapping handshake fragments carry conflicting bytes")]
    ErrConflictingFragment,
    #[error("ApplicationData received at epoch 0")]
    ErrApplicationDataEpochZero,
    #[error("handshake is already in progress")]
    ErrHandshakeInProgress,
    #[error("export_keying_material used with a reserved label")]
    ErrReservedExportKeyingMaterial,
    #[error("export_keying_material context is not supported")]
    ErrContextUnsupported,
    #[error("connection store is at capacity")]
    ErrStoreFull,
    #[error("connection not found")]
    ErrConnectionNotFound,

    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("utf8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Error {
    /// Maps an internal failure to the alert the peer should see, if any.
    /// `None` means the failure is handled locally and silently (spec.md
    /// §7's "propagation policy": replay violations, unrecognised epochs,
    /// cookie-less first ClientHellos, and resource exhaustion never
    /// produce an alert).
    pub fn fatal_alert(&self) -> Option<AlertDescription> {
        use Error::*;
        match self {
            ProtocolVersion => Some(AlertDescription::ProtocolVersion),
            HandshakeFailure
            | ErrCipherSuiteNoIntersection
            | ErrClientCertificateRequired
            | ErrIdentityNoPsk => Some(AlertDescription::HandshakeFailure),
            UnexpectedMessage => Some(AlertDescription::UnexpectedMessage),
            DecodeError
            | ErrInvalidPacketLength
            | ErrInvalidExtensionType
            | ErrInvalidCompressionMethod
            | ErrInvalidSniFormat
            | ErrConflictingFragment
            | ErrApplicationDataEpochZero => Some(AlertDescription::DecodeError),
            DecryptError | ErrVerifyDataMismatch | ErrCookieMismatch => {
                Some(AlertDescription::DecryptError)
            }
            UnknownPskIdentity => Some(AlertDescription::UnknownPskIdentity),
            ErrCertificateVerifyNoCertificate => Some(AlertDescription::NoCertificate),
            ErrClientCertificateNotVerified => Some(AlertDescription::BadCertificate),
            ErrInvalidCipherSuite | ErrInvalidNamedGroup | ErrCipherSuiteUnset => {
                Some(AlertDescription::HandshakeFailure)
            }
            RetransmissionExhausted | ResourceExhausted | ErrStoreFull
            | ErrConnectionNotFound => None,
            _ => Some(AlertDescription::InternalError),
        }
    }
}
