use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use util::conn::Conn;

use crate::cipher_suite::CipherSuite;
use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent};
use crate::connection_store::ConnectionStore;
use crate::content::Content;
use crate::cookie::CookieGenerator;
use crate::error::{Error, Result};
use crate::flight::assembler::Packet;
use crate::handshake::client_hello::ClientHello;
use crate::handshake::hello_verify_request::HelloVerifyRequest;
use crate::handshake::{Handshake, HandshakeMessage};
use crate::record_layer::header::{RecordLayerHeader, DTLS1_2};
use crate::record_layer::{self, RecordLayer};

const INBOUND_BUFFER_SIZE: usize = 8192;

/// One received application-data payload, tagged with who sent it.
pub struct Inbound {
    pub peer_addr: SocketAddr,
    pub data: Vec<u8>,
}

/// The server/client-agnostic datagram loop: reads off a `Conn`, demuxes
/// by peer address, drives each `Connection`'s state machine, and writes
/// back whatever flight that produced. Owns the retransmission ticker
/// and the stale-connection sweep; everything else lives in
/// `Connection`. Splits the receive loop from the retransmission ticker
/// the same way a fixed-peer connection would, generalised from one
/// fixed peer to many.
pub struct Connector {
    conn: Arc<dyn Conn + Send + Sync>,
    config: Arc<Config>,
    cookie_gen: Arc<CookieGenerator>,
    store: Mutex<ConnectionStore>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Connector {
    /// `cookie_secret` seeds the stateless HelloVerifyRequest HMAC; it
    /// must stay fixed for the life of the listener so a cookie issued
    /// before a restart does not get rejected after one.
    pub fn new(
        conn: Arc<dyn Conn + Send + Sync>,
        config: Arc<Config>,
        cookie_secret: [u8; 32],
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Connector {
            conn,
            store: Mutex::new(ConnectionStore::new(config.max_connections, config.stale_session_timeout)),
            cookie_gen: Arc::new(CookieGenerator::new(cookie_secret)),
            config,
            inbound_tx,
        });
        (connector, inbound_rx)
    }

    /// Dials out as a client, registers the resulting `Connection`, and
    /// sends its first flight.
    pub async fn connect(self: &Arc<Self>, peer_addr: SocketAddr) -> Result<()> {
        let (connection, packets) = Connection::new_client(self.config.clone(), peer_addr)?;
        {
            let mut store = self.store.lock().await;
            store.insert(peer_addr, connection)?;
        }
        if let Some(sink) = &self.config.event_sink {
            sink.handshake_started(peer_addr);
        }
        self.send_packets(peer_addr, None, &packets).await?;
        Ok(())
    }

    pub async fn send_application_data(&self, peer_addr: SocketAddr, data: &[u8]) -> Result<()> {
        let mut store = self.store.lock().await;
        let connection = store
            .get_by_address(&peer_addr)
            .ok_or(Error::ErrConnectionNotFound)?;
        let packet = connection.send_application_data(data)?;
        let suite_bytes = encode_packet(connection.suite(), &packet)?;
        drop(store);
        self.conn.send_to(&suite_bytes, peer_addr).await?;
        Ok(())
    }

    /// Runs the receive loop and the retransmission/stale-eviction
    /// ticker concurrently until the underlying `Conn` errors out.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let recv_task = {
            let this = self.clone();
            tokio::spawn(async move { this.recv_loop().await })
        };
        let tick_task = {
            let this = self.clone();
            tokio::spawn(async move { this.tick_loop().await })
        };

        tokio::select! {
            res = recv_task => res.map_err(|e| Error::Other(e.to_string()))?,
            res = tick_task => res.map_err(|e| Error::Other(e.to_string()))?,
        }
    }

    async fn recv_loop(&self) -> Result<()> {
        let mut buf = vec![0u8; INBOUND_BUFFER_SIZE];
        loop {
            let (n, peer_addr) = self.conn.recv_from(&mut buf).await?;
            if let Err(e) = self.handle_datagram(peer_addr, &buf[..n]).await {
                warn!("dropping datagram from {}: {}", peer_addr, e);
            }
        }
    }

    async fn handle_datagram(&self, peer_addr: SocketAddr, datagram: &[u8]) -> Result<()> {
        let mut store = self.store.lock().await;

        if store.get_by_address(&peer_addr).is_none() {
            match self.first_contact(peer_addr, datagram) {
                FirstContact::SendHelloVerifyRequest(bytes) => {
                    drop(store);
                    self.conn.send_to(&bytes, peer_addr).await?;
                    return Ok(());
                }
                FirstContact::Drop => return Ok(()),
                FirstContact::CookieVerified => {
                    if store.remaining_capacity() == 0 {
                        return Err(Error::ErrStoreFull);
                    }
                    let connection = Connection::new_server(self.config.clone(), self.cookie_gen.clone(), peer_addr);
                    store.insert(peer_addr, connection)?;
                    if let Some(sink) = &self.config.event_sink {
                        sink.handshake_started(peer_addr);
                    }
                }
            }
        }

        let connection = store.get_by_address(&peer_addr).expect("just inserted");
        let (events, packets) = connection.handle_datagram(datagram).await?;
        let outbound = encode_packets(connection.suite(), &packets)?;

        let should_remove = events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Closed(_)));

        for event in events {
            match event {
                ConnectionEvent::ApplicationData(payloads) => {
                    for data in payloads {
                        if let Some(sink) = &self.config.event_sink {
                            sink.inbound_application_data(peer_addr, data.len());
                        }
                        let _ = self.inbound_tx.send(Inbound { peer_addr, data });
                    }
                }
                ConnectionEvent::Established(session) => {
                    debug!("handshake with {} established, cipher suite {:?}", peer_addr, session.cipher_suite);
                    if let Some(cache) = &self.config.session_cache {
                        if !session.id.is_empty() {
                            cache.put(session.id.clone(), session.clone()).await;
                        }
                    }
                    if let Some(sink) = &self.config.event_sink {
                        sink.session_established(peer_addr);
                    }
                }
                ConnectionEvent::Closed(desc) => {
                    debug!("connection with {} closed: {:?}", peer_addr, desc);
                    if let Some(sink) = &self.config.event_sink {
                        sink.session_failed(peer_addr, &format!("{:?}", desc));
                    }
                }
                ConnectionEvent::None => {}
            }
        }

        if should_remove {
            store.remove(&peer_addr);
        }
        drop(store);

        for bytes in outbound {
            self.conn.send_to(&bytes, peer_addr).await?;
        }

        Ok(())
    }

    async fn tick_loop(&self) -> Result<()> {
        let mut ticker = interval(self.config.retransmission_timeout);
        loop {
            ticker.tick().await;

            let mut store = self.store.lock().await;
            let stale = store.evict_stale();
            for addr in &stale {
                debug!("evicting stale connection with {}", addr);
            }

            let addrs: Vec<SocketAddr> = store.addresses().copied().collect();
            let mut resends = vec![];
            for addr in addrs {
                let connection = match store.get_by_address(&addr) {
                    Some(c) => c,
                    None => continue,
                };
                match connection.retransmit() {
                    Ok(Some(packets)) => {
                        let suite = connection.suite();
                        if let Ok(bytes_list) = encode_packets(suite, &packets) {
                            resends.push((addr, bytes_list));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        if let Some(sink) = &self.config.event_sink {
                            sink.session_failed(addr, &e.to_string());
                        }
                        store.remove(&addr);
                    }
                }
            }
            drop(store);

            for (addr, bytes_list) in resends {
                for bytes in bytes_list {
                    let _ = self.conn.send_to(&bytes, addr).await;
                }
            }
        }
    }

    async fn send_packets(&self, peer_addr: SocketAddr, suite: Option<&(dyn CipherSuite + Send + Sync)>, packets: &[Packet]) -> Result<()> {
        for bytes in encode_packets(suite, packets)? {
            self.conn.send_to(&bytes, peer_addr).await?;
        }
        Ok(())
    }

    /// Decides what to do about a datagram from an address with no
    /// `Connection` yet, without allocating one. Per RFC 6347 §4.2.1 the
    /// server commits no per-peer state until the client has echoed back
    /// a cookie this function can verify against nothing but its own HMAC
    /// secret and the datagram bytes in hand.
    fn first_contact(&self, peer_addr: SocketAddr, datagram: &[u8]) -> FirstContact {
        let client_hello = match parse_client_hello(datagram) {
            Some(ch) => ch,
            None => return FirstContact::Drop,
        };

        let addr_bytes = peer_addr.to_string().into_bytes();

        if client_hello.cookie.is_empty() {
            let cookie = self.cookie_gen.generate(&addr_bytes, &client_hello.random.marshal_fixed());
            let hvr = HelloVerifyRequest {
                version: DTLS1_2,
                cookie,
            };
            let handshake = Handshake::new(HandshakeMessage::HelloVerifyRequest(hvr), 0);
            let record = RecordLayer::new(DTLS1_2, 0, 0, Content::Handshake(handshake));
            let mut bytes = vec![];
            return match record.marshal(&mut bytes) {
                Ok(()) => FirstContact::SendHelloVerifyRequest(bytes),
                Err(_) => FirstContact::Drop,
            };
        }

        match self
            .cookie_gen
            .verify(&client_hello.cookie, &addr_bytes, &client_hello.random.marshal_fixed())
        {
            Ok(()) => FirstContact::CookieVerified,
            Err(_) => FirstContact::Drop,
        }
    }
}

/// What a `Connector` should do about a datagram from an address it has
/// no `Connection` for yet.
enum FirstContact {
    /// Reply with this stateless HelloVerifyRequest; allocate nothing.
    SendHelloVerifyRequest(Vec<u8>),
    /// The client echoed back a cookie this listener issued; safe to
    /// allocate a `Connection` and hand the datagram to it.
    CookieVerified,
    /// Not a plausible first ClientHello (wrong shape, bad cookie,
    /// malformed); drop without allocating or replying.
    Drop,
}

/// Parses a fresh datagram's first record as an unfragmented ClientHello
/// -- the only shape RFC 6347 §4.2.1 permits before any per-peer state
/// exists. A fragmented, wrong-content-type, or malformed first record
/// is not a valid first contact.
fn parse_client_hello(datagram: &[u8]) -> Option<ClientHello> {
    let raw_records = record_layer::unpack_datagram(datagram, 0).ok()?;
    let first = raw_records.first()?;
    let record = RecordLayer::unmarshal(&mut &first[..], 0).ok()?;
    if record.header.epoch != 0 {
        return None;
    }
    match record.content {
        Content::Handshake(handshake) => match handshake.message {
            HandshakeMessage::ClientHello(ch) => Some(ch),
            _ => None,
        },
        _ => None,
    }
}

/// Marshals one `Packet`, encrypting its content through `suite` first
/// when `should_encrypt` is set. `suite.encrypt` is handed the would-be
/// plaintext record header (content_len already correct) so it can
/// build the right AEAD associated data/nonce; it returns the full
/// on-wire record bytes (header plus ciphertext).
fn encode_packet(suite: Option<&(dyn CipherSuite + Send + Sync)>, packet: &Packet) -> Result<Vec<u8>> {
    if !packet.should_encrypt {
        let mut buf = vec![];
        packet.record.marshal(&mut buf)?;
        return Ok(buf);
    }

    let suite = suite.ok_or(Error::ErrCipherSuiteUnset)?;
    let mut plaintext = vec![];
    packet.record.content.marshal(&mut plaintext)?;
    let header: &RecordLayerHeader = &packet.record.header;
    suite.encrypt(header, &plaintext)
}

fn encode_packets(suite: Option<&(dyn CipherSuite + Send + Sync)>, packets: &[Packet]) -> Result<Vec<Vec<u8>>> {
    packets.iter().map(|p| encode_packet(suite, p)).collect()
}
