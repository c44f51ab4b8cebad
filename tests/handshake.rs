//! End-to-end handshake and application-data exercise over an in-memory
//! `Conn` pipe, the way a production deployment would drive two
//! `Connector`s over real sockets. Crypto math is supplied by a fake
//! `CipherSuite`: both sides derive the same "shared secret" by XOR-ing
//! their own ephemeral public bytes with the peer's (XOR is its own
//! inverse, so the two sides agree without real ECDH), which is enough
//! to exercise negotiation, framing, and the Finished verify_data
//! check without pulling in a real AEAD implementation.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use dtls12::cipher_suite::{CipherSuite, CipherSuiteFactory, CipherSuiteHash, CipherSuiteId};
use dtls12::config::Config;
use dtls12::error::{Error, Result};
use dtls12::extension::named_group::NamedGroup;
use dtls12::record_layer::header::RecordLayerHeader;
use dtls12::services::{EventSink, PskStore};
use dtls12::{Connector, Inbound};

struct FakeSuite {
    own_public: Option<Vec<u8>>,
}

impl CipherSuite for FakeSuite {
    fn id(&self) -> CipherSuiteId {
        CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256
    }

    fn hash_func(&self) -> CipherSuiteHash {
        CipherSuiteHash::Sha256
    }

    fn is_psk(&self) -> bool {
        true
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn init(&mut self, _master_secret: &[u8], _client_random: &[u8], _server_random: &[u8], _is_client: bool) -> Result<()> {
        Ok(())
    }

    fn encrypt(&self, header: &RecordLayerHeader, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut buf = vec![];
        header.marshal(&mut buf)?;
        buf.extend_from_slice(plaintext);
        Ok(buf)
    }

    fn decrypt(&self, packet: &[u8]) -> Result<Vec<u8>> {
        let header = RecordLayerHeader::unmarshal(&mut &packet[..], 0)?;
        Ok(packet[header.size()..].to_vec())
    }

    fn prf(&self, secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(out_len);
        let mut counter: u8 = 0;
        while out.len() < out_len {
            let mut hasher = Sha256::new();
            hasher.update(secret);
            hasher.update(label);
            hasher.update(seed);
            hasher.update([counter]);
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(out_len);
        out
    }

    fn generate_ecdhe_keypair(&mut self, _group: NamedGroup) -> Result<Vec<u8>> {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        self.own_public = Some(key.clone());
        Ok(key)
    }

    fn compute_ecdhe_shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>> {
        let own = self.own_public.as_ref().ok_or(Error::ErrCipherSuiteUnset)?;
        Ok(own.iter().zip(peer_public_key).map(|(a, b)| a ^ b).collect())
    }
}

struct FakeFactory;

impl CipherSuiteFactory for FakeFactory {
    fn create(&self, _id: CipherSuiteId) -> Result<Box<dyn CipherSuite + Send + Sync>> {
        Ok(Box::new(FakeSuite { own_public: None }))
    }
}

struct FakePskStore {
    key: Vec<u8>,
}

#[async_trait]
impl PskStore for FakePskStore {
    async fn get_key(&self, _identity_hint: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.clone())
    }
}

#[derive(Default)]
struct TestSink {
    established: Notify,
    failures: Mutex<Vec<String>>,
}

impl EventSink for TestSink {
    fn session_established(&self, _peer: SocketAddr) {
        self.established.notify_one();
    }

    fn session_failed(&self, _peer: SocketAddr, reason: &str) {
        self.failures.lock().unwrap().push(reason.to_string());
    }
}

fn shared_config(sink: Arc<TestSink>) -> Arc<Config> {
    Arc::new(Config {
        supported_cipher_suites: vec![CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256],
        cipher_suite_factory: Some(Arc::new(FakeFactory)),
        psk_store: Some(Arc::new(FakePskStore { key: b"shared-secret".to_vec() })),
        psk_identity_hint: b"client-one".to_vec(),
        event_sink: Some(sink),
        ..Config::default()
    })
}

#[tokio::test]
async fn full_handshake_and_application_data_round_trip() {
    let (pipe_a, pipe_b) = util::conn::conn_pipe::pipe();
    let client_sink = Arc::new(TestSink::default());
    let server_sink = Arc::new(TestSink::default());

    let (client, _client_inbound) = Connector::new(Arc::new(pipe_a), shared_config(client_sink.clone()), [1u8; 32]);
    let (server, mut server_inbound) = Connector::new(Arc::new(pipe_b), shared_config(server_sink.clone()), [2u8; 32]);

    tokio::spawn({
        let client = client.clone();
        async move {
            let _ = client.run().await;
        }
    });
    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.run().await;
        }
    });

    let server_addr: SocketAddr = "127.0.0.1:2".parse().unwrap();
    client.connect(server_addr).await.expect("dial");

    tokio::time::timeout(Duration::from_secs(2), client_sink.established.notified())
        .await
        .expect("client handshake timed out");
    tokio::time::timeout(Duration::from_secs(2), server_sink.established.notified())
        .await
        .expect("server handshake timed out");

    assert!(client_sink.failures.lock().unwrap().is_empty());
    assert!(server_sink.failures.lock().unwrap().is_empty());

    client
        .send_application_data(server_addr, b"hello over dtls")
        .await
        .expect("send application data");

    let Inbound { data, .. } = tokio::time::timeout(Duration::from_secs(2), server_inbound.recv())
        .await
        .expect("no application data received")
        .expect("inbound channel closed");
    assert_eq!(data, b"hello over dtls");
}

#[derive(Default)]
struct FakeSessionCache {
    sessions: Mutex<std::collections::HashMap<Vec<u8>, dtls12::Session>>,
}

#[async_trait]
impl dtls12::services::SessionCache for FakeSessionCache {
    async fn get(&self, session_id: &[u8]) -> Option<dtls12::Session> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }
    async fn put(&self, session_id: Vec<u8>, session: dtls12::Session) {
        self.sessions.lock().unwrap().insert(session_id, session);
    }
    async fn remove(&self, session_id: &[u8]) {
        self.sessions.lock().unwrap().remove(session_id);
    }
}

/// A `Connector` with a configured `SessionCache` stores every session it
/// establishes, keyed by the id the handshake negotiated — the bookkeeping
/// half of resumption (`Handshaker::server_resume` does the lookup half,
/// exercised directly against a cached `Session` in connection.rs's tests).
#[tokio::test]
async fn established_session_is_stored_in_the_session_cache() {
    let (pipe_a, pipe_b) = util::conn::conn_pipe::pipe();
    let client_sink = Arc::new(TestSink::default());
    let server_sink = Arc::new(TestSink::default());
    let cache = Arc::new(FakeSessionCache::default());

    let server_config = Arc::new(Config {
        session_cache: Some(cache.clone()),
        ..(*shared_config(server_sink.clone())).clone()
    });

    let (client, _client_inbound) = Connector::new(Arc::new(pipe_a), shared_config(client_sink.clone()), [1u8; 32]);
    let (server, _server_inbound) = Connector::new(Arc::new(pipe_b), server_config, [2u8; 32]);

    tokio::spawn({
        let client = client.clone();
        async move {
            let _ = client.run().await;
        }
    });
    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.run().await;
        }
    });

    let server_addr: SocketAddr = "127.0.0.1:2".parse().unwrap();
    client.connect(server_addr).await.expect("dial");

    tokio::time::timeout(Duration::from_secs(2), server_sink.established.notified())
        .await
        .expect("server handshake timed out");

    assert!(
        !cache.sessions.lock().unwrap().is_empty(),
        "server should cache the session it just established"
    );
}

