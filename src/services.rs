use async_trait::async_trait;

use crate::error::Result;
use crate::extension::certificate_type::CertificateType;
use crate::session::Session;

/// Looks up the pre-shared key for an identity a ClientHello/ServerKeyExchange
/// advertised. Returning `Err` fails the handshake with UnknownPskIdentity.
#[async_trait]
pub trait PskStore: Send + Sync {
    async fn get_key(&self, identity_hint: &[u8]) -> Result<Vec<u8>>;
}

/// Validates a peer's X.509 certificate chain. The core never parses
/// certificates itself; it only asks whether a chain should be trusted
/// for a given server name.
#[async_trait]
pub trait CertificateVerifier: Send + Sync {
    async fn verify(&self, chain: &[Vec<u8>], server_name: &str) -> Result<()>;
}

/// Validates a peer's raw public key (RFC 7250) against an
/// application-supplied trust policy (e.g. pinning).
#[async_trait]
pub trait RawKeyVerifier: Send + Sync {
    async fn verify(&self, raw_public_key: &[u8]) -> Result<()>;
}

/// Stores and retrieves resumption tickets keyed by session id, so a
/// later ClientHello offering that id can skip the full handshake.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, session_id: &[u8]) -> Option<Session>;
    async fn put(&self, session_id: Vec<u8>, session: Session);
    async fn remove(&self, session_id: &[u8]);
}

/// Notifications a `Connector`/`Connection` raises as a handshake
/// progresses, so an embedder can drive metrics/logging without the
/// core depending on any particular observability stack.
pub trait EventSink: Send + Sync {
    fn handshake_started(&self, _peer: std::net::SocketAddr) {}
    fn session_established(&self, _peer: std::net::SocketAddr) {}
    fn session_failed(&self, _peer: std::net::SocketAddr, _reason: &str) {}
    fn inbound_application_data(&self, _peer: std::net::SocketAddr, _len: usize) {}
}

/// Which certificate types a peer offered/supports, used to pick a
/// mutually acceptable `CertificateType` during negotiation.
pub fn preferred_certificate_type(
    trusted: &[CertificateType],
    offered: &[CertificateType],
) -> Option<CertificateType> {
    trusted.iter().find(|t| offered.contains(t)).copied()
}
