use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::Conn;
use crate::error::{Error, Result};

/// An in-memory, lossless, ordered duplex `Conn` pair, used by tests that
/// want to drive a full handshake without a real socket. Mirrors
/// `webrtc_util::conn::conn_pipe::pipe`.
pub fn pipe() -> (ConnPipe, ConnPipe) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let addr_a = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1);
    let addr_b = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 2);

    (
        ConnPipe {
            tx: tx_b,
            rx: Mutex::new(rx_a),
            local_addr: addr_a,
            remote_addr: addr_b,
        },
        ConnPipe {
            tx: tx_a,
            rx: Mutex::new(rx_b),
            local_addr: addr_b,
            remote_addr: addr_a,
        },
    )
}

pub struct ConnPipe {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

#[async_trait]
impl Conn for ConnPipe {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut rx = self.rx.lock().await;
        let datagram = rx.recv().await.ok_or(Error::ConnClosed)?;
        if datagram.len() > buf.len() {
            return Err(Error::BufferTooSmall);
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let n = self.recv(buf).await?;
        Ok((n, self.remote_addr))
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| Error::ConnClosed)?;
        Ok(buf.len())
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
