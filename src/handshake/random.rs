use rand::Rng;

use std::time::{Duration, SystemTime};

const RANDOM_BYTES_LENGTH: usize = 28;
pub const HANDSHAKE_RANDOM_LENGTH: usize = RANDOM_BYTES_LENGTH + 4;

/// gmt_unix_time + 28 random bytes, per RFC 4346 §7.4.1.2. Used in both
/// ClientHello and ServerHello and folded into the transcript hash, so
/// it has to be fixed-width and byte-exact on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandshakeRandom {
    pub gmt_unix_time: u32,
    pub random_bytes: [u8; RANDOM_BYTES_LENGTH],
}

impl HandshakeRandom {
    pub fn generate() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let mut random_bytes = [0u8; RANDOM_BYTES_LENGTH];
        rand::thread_rng().fill(&mut random_bytes);
        HandshakeRandom {
            gmt_unix_time: secs,
            random_bytes,
        }
    }

    pub fn size(&self) -> usize {
        HANDSHAKE_RANDOM_LENGTH
    }

    pub fn marshal_fixed(&self) -> [u8; HANDSHAKE_RANDOM_LENGTH] {
        let mut out = [0u8; HANDSHAKE_RANDOM_LENGTH];
        out[0..4].copy_from_slice(&self.gmt_unix_time.to_be_bytes());
        out[4..].copy_from_slice(&self.random_bytes);
        out
    }

    pub fn unmarshal_fixed(data: &[u8; HANDSHAKE_RANDOM_LENGTH]) -> Self {
        let mut secs_bytes = [0u8; 4];
        secs_bytes.copy_from_slice(&data[0..4]);
        let mut random_bytes = [0u8; RANDOM_BYTES_LENGTH];
        random_bytes.copy_from_slice(&data[4..]);
        HandshakeRandom {
            gmt_unix_time: u32::from_be_bytes(secs_bytes),
            random_bytes,
        }
    }
}

impl Default for HandshakeRandom {
    fn default() -> Self {
        HandshakeRandom {
            gmt_unix_time: 0,
            random_bytes: [0u8; RANDOM_BYTES_LENGTH],
        }
    }
}
