pub mod conn_pipe;
pub mod conn_udp;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// Abstraction over a datagram endpoint. The DTLS core never touches a
/// socket directly: the Connector is handed a `dyn Conn` and is
/// indifferent to whether it is a real UDP socket, an in-memory pipe used
/// by tests, or some other pluggable transport. Mirrors
/// `webrtc_util::Conn`.
#[async_trait]
pub trait Conn {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
    async fn send(&self, buf: &[u8]) -> Result<usize>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;
    fn local_addr(&self) -> Result<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    async fn close(&self) -> Result<()>;
}
