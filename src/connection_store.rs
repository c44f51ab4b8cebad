use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::error::{Error, Result};

struct Entry {
    connection: Connection,
    connection_id: Option<Vec<u8>>,
    last_touched: Instant,
}

/// Owns every live `Connection`, keyed by peer address and, once RFC
/// 9146 negotiation gives one, by connection id too. Bounds memory two
/// ways: a hard cap on live connections (`ErrStoreFull`) and a stale
/// timeout sweep a `Connector` runs periodically.
pub struct ConnectionStore {
    by_address: HashMap<SocketAddr, Entry>,
    address_by_cid: HashMap<Vec<u8>, SocketAddr>,
    max_connections: usize,
    stale_timeout: Duration,
}

impl ConnectionStore {
    pub fn new(max_connections: usize, stale_timeout: Duration) -> Self {
        ConnectionStore {
            by_address: HashMap::new(),
            address_by_cid: HashMap::new(),
            max_connections,
            stale_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.max_connections.saturating_sub(self.by_address.len())
    }

    pub fn insert(&mut self, addr: SocketAddr, connection: Connection) -> Result<()> {
        if !self.by_address.contains_key(&addr) && self.by_address.len() >= self.max_connections {
            self.evict_lru_stale_entry().ok_or(Error::ErrStoreFull)?;
        }
        self.by_address.insert(
            addr,
            Entry {
                connection,
                connection_id: None,
                last_touched: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn get_by_address(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let entry = self.by_address.get_mut(addr)?;
        entry.last_touched = Instant::now();
        Some(&mut entry.connection)
    }

    pub fn get_by_cid(&mut self, cid: &[u8]) -> Option<&mut Connection> {
        let addr = *self.address_by_cid.get(cid)?;
        self.get_by_address(&addr)
    }

    /// Registers the connection id a connection negotiated, once its
    /// handshake reaches that point. A connection may only register one
    /// cid for its lifetime.
    pub fn bind_connection_id(&mut self, addr: &SocketAddr, cid: Vec<u8>) {
        if let Some(entry) = self.by_address.get_mut(addr) {
            self.address_by_cid.insert(cid.clone(), *addr);
            entry.connection_id = Some(cid);
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) {
        if let Some(entry) = self.by_address.remove(addr) {
            if let Some(cid) = entry.connection_id {
                self.address_by_cid.remove(&cid);
            }
        }
    }

    /// Makes room for an insert at capacity by evicting the
    /// least-recently-used connection that has already gone past the
    /// stale timeout. Returns its address on success, `None` if every
    /// connection is still within the timeout -- the caller should
    /// treat that as genuinely full, not silently drop something live.
    fn evict_lru_stale_entry(&mut self) -> Option<SocketAddr> {
        let now = Instant::now();
        let lru = self
            .by_address
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_touched) > self.stale_timeout)
            .min_by_key(|(_, e)| e.last_touched)
            .map(|(addr, _)| *addr)?;
        self.remove(&lru);
        Some(lru)
    }

    /// Evicts every connection untouched for longer than the configured
    /// stale timeout. Returns the addresses removed, so a `Connector`
    /// can log or otherwise account for them.
    pub fn evict_stale(&mut self) -> Vec<SocketAddr> {
        let now = Instant::now();
        let stale: Vec<SocketAddr> = self
            .by_address
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_touched) > self.stale_timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.remove(addr);
        }
        stale
    }

    pub fn addresses(&self) -> impl Iterator<Item = &SocketAddr> {
        self.by_address.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn client_conn(addr: SocketAddr) -> Connection {
        let config = Arc::new(Config::default());
        Connection::new_client(config, addr).unwrap().0
    }

    #[test]
    fn rejects_insert_past_capacity() {
        let mut store = ConnectionStore::new(1, Duration::from_secs(60));
        store.insert(addr(1), client_conn(addr(1))).unwrap();
        assert!(store.insert(addr(2), client_conn(addr(2))).is_err());
    }

    #[test]
    fn insert_past_capacity_evicts_stale_entry_instead_of_failing() {
        let mut store = ConnectionStore::new(1, Duration::from_secs(0));
        store.insert(addr(1), client_conn(addr(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.insert(addr(2), client_conn(addr(2))).unwrap();
        assert!(store.get_by_address(&addr(1)).is_none());
        assert!(store.get_by_address(&addr(2)).is_some());
    }

    #[test]
    fn get_by_address_touches_last_seen() {
        let mut store = ConnectionStore::new(4, Duration::from_secs(60));
        store.insert(addr(1), client_conn(addr(1))).unwrap();
        assert!(store.get_by_address(&addr(1)).is_some());
        assert!(store.get_by_address(&addr(2)).is_none());
    }

    #[test]
    fn evict_stale_respects_timeout() {
        let mut store = ConnectionStore::new(4, Duration::from_secs(0));
        store.insert(addr(1), client_conn(addr(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let evicted = store.evict_stale();
        assert_eq!(evicted, vec![addr(1)]);
        assert!(store.is_empty());
    }

    #[test]
    fn remove_clears_cid_binding() {
        let mut store = ConnectionStore::new(4, Duration::from_secs(60));
        store.insert(addr(1), client_conn(addr(1))).unwrap();
        store.bind_connection_id(&addr(1), vec![1, 2, 3]);
        assert!(store.get_by_cid(&[1, 2, 3]).is_some());
        store.remove(&addr(1));
        assert!(store.get_by_cid(&[1, 2, 3]).is_none());
    }
}
