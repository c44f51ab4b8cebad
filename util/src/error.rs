use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport-adjacent utilities (`Conn`, replay
/// detection). Kept separate from the core `dtls12::Error` so that this
/// crate can be reused by things other than the DTLS core, the same
/// split `webrtc-util` draws from `webrtc-dtls`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("conn is closed")]
    ConnClosed,
    #[error("read/write timeout")]
    DeadlineExceeded,
    #[error("buffer is too small")]
    BufferTooSmall,
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn from_std<T>(err: T) -> Self
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(err.to_string())
    }
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
