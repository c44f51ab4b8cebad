use sha2::{Digest, Sha256};

use super::{Handshake, HandshakeType};
use crate::cipher_suite::CipherSuiteHash;

#[derive(Clone, Debug)]
struct TranscriptItem {
    typ: HandshakeType,
    is_client: bool,
    message_sequence: u16,
    data: Vec<u8>,
}

/// An append-only record of every handshake message sent or received
/// this handshake, in wire form. The Finished verify_data is computed
/// over a hash of this buffer; because each peer's own Finished is
/// itself part of the other side's transcript, the handshaker takes a
/// snapshot before appending the peer's Finished and another after, to
/// get the two different transcript hashes RFC 5246 §7.4.9 requires.
#[derive(Clone, Default)]
pub struct Transcript {
    items: Vec<TranscriptItem>,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript { items: vec![] }
    }

    /// Returns `false` if a message at this (type, is_client,
    /// message_sequence) was already recorded — used to make flight
    /// retransmission reprocessing idempotent.
    pub fn push(&mut self, handshake: &Handshake, is_client: bool) -> bool {
        let mut buf = vec![];
        if handshake.marshal(&mut buf).is_err() {
            return false;
        }

        for item in &self.items {
            if item.message_sequence == handshake.header.message_sequence && item.is_client == is_client {
                return false;
            }
        }

        self.items.push(TranscriptItem {
            typ: handshake.header.handshake_type,
            is_client,
            message_sequence: handshake.header.message_sequence,
            data: buf,
        });
        true
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.items.iter().flat_map(|i| i.data.clone()).collect()
    }

    pub fn hash(&self, hf: CipherSuiteHash) -> Vec<u8> {
        hash_bytes(hf, &self.snapshot())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn hash_bytes(hf: CipherSuiteHash, data: &[u8]) -> Vec<u8> {
    match hf {
        CipherSuiteHash::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        CipherSuiteHash::Sha384 => {
            // SHA-384 suites are negotiable but this core ships only a
            // SHA-256 transcript hasher; a CipherSuite requiring
            // SHA-384 must hash the snapshot itself.
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::client_hello::ClientHello;
    use crate::handshake::random::HandshakeRandom;
    use crate::compression_methods::default_compression_methods;
    use crate::handshake::HandshakeMessage;
    use crate::record_layer::header::DTLS1_2;

    fn sample_hello(seq: u16) -> Handshake {
        Handshake::new(
            HandshakeMessage::ClientHello(ClientHello {
                version: DTLS1_2,
                random: HandshakeRandom::generate(),
                session_id: vec![],
                cookie: vec![],
                cipher_suites: vec![],
                compression_methods: default_compression_methods(),
                extensions: vec![],
            }),
            seq,
        )
    }

    #[test]
    fn rejects_duplicate_sequence() {
        let mut t = Transcript::new();
        assert!(t.push(&sample_hello(0), true));
        assert!(!t.push(&sample_hello(0), true));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn hash_changes_as_messages_accumulate() {
        let mut t = Transcript::new();
        let h0 = t.hash(CipherSuiteHash::Sha256);
        t.push(&sample_hello(0), true);
        let h1 = t.hash(CipherSuiteHash::Sha256);
        assert_ne!(h0, h1);
    }
}
