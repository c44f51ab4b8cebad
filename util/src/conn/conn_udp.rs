use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::Conn;
use crate::error::{Error, Result};

/// `Conn` over a bound `tokio::net::UdpSocket`. This is the one first-party
/// implementation the crate ships; the Connector is otherwise transport-
/// agnostic. Binding the socket itself (choosing the local address,
/// reuse-addr, etc.) stays the caller's concern.
pub struct UdpConn {
    socket: UdpSocket,
}

impl UdpConn {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpConn { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        UdpConn { socket }
    }
}

#[async_trait]
impl Conn for UdpConn {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.socket.recv(buf).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.socket.send(buf).await?)
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(buf, target).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn close(&self) -> Result<()> {
        Err(Error::Other(
            "UdpConn does not own a closeable handle".to_owned(),
        ))
    }
}
