use serde::{Deserialize, Serialize};

use crate::cipher_suite::CipherSuiteId;
use crate::error::{Error, Result};

/// Labels RFC 5705 §4 reserves for the TLS/DTLS protocol itself; an
/// embedder asking `export_keying_material` for one of these is almost
/// certainly confusing this core's exported material with the
/// handshake's own key schedule.
const RESERVED_EXPORTER_LABELS: &[&str] = &[
    "client finished",
    "server finished",
    "master secret",
    "key expansion",
];

/// The negotiated state a resumed handshake needs, serialized into a
/// ticket an embedder can stash in a `SessionCache` or hand back to the
/// peer. Holds no transport state (epoch, sequence numbers) — those
/// belong to the `Connection`, not the session.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Vec<u8>,
    pub cipher_suite: CipherSuiteId,
    pub master_secret: Vec<u8>,
    pub client_random: Vec<u8>,
    pub server_random: Vec<u8>,
    pub extended_master_secret: bool,
}

impl Session {
    pub fn to_ticket(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Other(e.to_string()))
    }

    pub fn from_ticket(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Other(e.to_string()))
    }

    /// RFC 5705 keying material export. `context` is only supported when
    /// empty: this core never implements the use_srtp/application
    /// context-negotiation extension a full stack would need to decide
    /// whether a non-empty context is safe to honour.
    pub fn export_keying_material(
        &self,
        prf: &dyn crate::cipher_suite::CipherSuite,
        label: &str,
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>> {
        if RESERVED_EXPORTER_LABELS.contains(&label) {
            return Err(Error::ErrReservedExportKeyingMaterial);
        }
        if !context.is_empty() {
            return Err(Error::ErrContextUnsupported);
        }

        let mut seed = Vec::with_capacity(self.client_random.len() + self.server_random.len());
        seed.extend_from_slice(&self.client_random);
        seed.extend_from_slice(&self.server_random);

        Ok(prf.prf(&self.master_secret, label.as_bytes(), &seed, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session {
            id: vec![1, 2, 3],
            cipher_suite: CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256,
            master_secret: vec![9; 48],
            client_random: vec![1; 32],
            server_random: vec![2; 32],
            extended_master_secret: true,
        }
    }

    #[test]
    fn ticket_roundtrips() {
        let session = sample();
        let ticket = session.to_ticket().unwrap();
        let restored = Session::from_ticket(&ticket).unwrap();
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.master_secret, session.master_secret);
    }

    struct FakeSuite;
    impl crate::cipher_suite::CipherSuite for FakeSuite {
        fn id(&self) -> CipherSuiteId {
            CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256
        }
        fn hash_func(&self) -> crate::cipher_suite::CipherSuiteHash {
            crate::cipher_suite::CipherSuiteHash::Sha256
        }
        fn is_psk(&self) -> bool {
            true
        }
        fn is_initialized(&self) -> bool {
            true
        }
        fn init(&mut self, _: &[u8], _: &[u8], _: &[u8], _: bool) -> Result<()> {
            Ok(())
        }
        fn encrypt(&self, _: &crate::record_layer::header::RecordLayerHeader, pt: &[u8]) -> Result<Vec<u8>> {
            Ok(pt.to_vec())
        }
        fn decrypt(&self, pkt: &[u8]) -> Result<Vec<u8>> {
            Ok(pkt.to_vec())
        }
        fn prf(&self, secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
            let mut out = vec![0u8; out_len];
            let mix: Vec<u8> = secret.iter().chain(label).chain(seed).copied().collect();
            for (i, b) in out.iter_mut().enumerate() {
                *b = mix[i % mix.len()];
            }
            out
        }
        fn generate_ecdhe_keypair(
            &mut self,
            _group: crate::extension::named_group::NamedGroup,
        ) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        fn compute_ecdhe_shared_secret(&self, _peer_public_key: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    #[test]
    fn rejects_reserved_label() {
        let session = sample();
        let err = session.export_keying_material(&FakeSuite, "master secret", &[], 16);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_nonempty_context() {
        let session = sample();
        let err = session.export_keying_material(&FakeSuite, "EXTRACTOR", b"ctx", 16);
        assert!(err.is_err());
    }

    #[test]
    fn exports_material() {
        let session = sample();
        let out = session
            .export_keying_material(&FakeSuite, "EXTRACTOR", &[], 16)
            .unwrap();
        assert_eq!(out.len(), 16);
    }
}
