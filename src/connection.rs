use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use util::replay_detector::{ReplayDetector, SlidingWindowDetector};

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::cipher_suite::CipherSuite;
use crate::config::Config;
use crate::content::{Content, ContentType};
use crate::cookie::CookieGenerator;
use crate::error::{Error, Result};
use crate::flight::assembler::{FlightAssembler, Packet};
use crate::flight::Flight;
use crate::handshake::{Handshake, HandshakeMessage};
use crate::handshaker::{Handshaker, Role, State, StepOutput};
use crate::reassembler::{PushOutcome, Reassembler};
use crate::record_layer::header::{RecordLayerHeader, DTLS1_2};
use crate::record_layer::{unpack_datagram, RecordLayer};
use crate::session::Session;

/// What handling one inbound datagram produced, for a `Connector` to
/// act on.
pub enum ConnectionEvent {
    /// Decrypted application-data payloads, in arrival order.
    ApplicationData(Vec<Vec<u8>>),
    /// The handshake just reached ESTABLISHED.
    Established(Session),
    /// A fatal alert was received; the connection is now closed.
    Closed(AlertDescription),
    /// Nothing externally visible happened (a mid-flight fragment, a
    /// retransmitted record already seen, a HelloVerifyRequest round).
    None,
}

/// Per-peer protocol state: the handshake engine, the record layer's
/// epoch/sequence bookkeeping and replay window, and the last flight
/// sent (kept for RFC 6347 §4.2.4 retransmission on timeout). A
/// `Connector` owns one `Connection` per peer and is the only thing
/// that touches a socket; this type only turns bytes into events and
/// events into bytes, encrypting/decrypting through whatever
/// `CipherSuite` the handshake has negotiated.
pub struct Connection {
    pub peer_addr: SocketAddr,
    config: Arc<Config>,
    handshaker: Handshaker,
    reassembler: Reassembler,
    pending_flight: Vec<Handshake>,
    flight_assembler: FlightAssembler,

    local_epoch: u16,
    local_sequence: u64,
    remote_epoch: u16,
    /// The epoch a ChangeCipherSpec record just announced the peer is
    /// about to switch to. A record arriving at a higher epoch than
    /// `remote_epoch` without this having been set to match first means
    /// the peer skipped ChangeCipherSpec -- RFC 5246 §7.1 makes it the
    /// only valid signal for an epoch bump, not implicit from content.
    ccs_seen_for_epoch: u16,
    replay: Box<dyn ReplayDetector>,

    last_flight: Vec<Packet>,
    current_flight: Flight,
    retransmit_count: u32,
    current_retransmit_timeout: Duration,
    next_retransmit_deadline: Instant,

    session: Option<Session>,
    closed: bool,
}

impl Connection {
    pub fn new_client(config: Arc<Config>, peer_addr: SocketAddr) -> Result<(Self, Vec<Packet>)> {
        let mut handshaker = Handshaker::new_client(config.clone());
        let step = handshaker.start_client()?;
        let mut conn = Connection {
            peer_addr,
            config: config.clone(),
            handshaker,
            reassembler: Reassembler::new(config.max_deferred_processed_incoming_records_size),
            pending_flight: vec![],
            flight_assembler: FlightAssembler::new(config.max_fragment_length, DTLS1_2),
            local_epoch: 0,
            local_sequence: 0,
            remote_epoch: 0,
            ccs_seen_for_epoch: 0,
            replay: Box::new(SlidingWindowDetector::new(config.replay_protection_window)),
            last_flight: vec![],
            current_flight: Flight::F1,
            retransmit_count: 0,
            current_retransmit_timeout: config.retransmission_timeout,
            next_retransmit_deadline: Instant::now() + config.retransmission_timeout,
            session: None,
            closed: false,
        };
        let packets = conn.emit(step)?;
        conn.last_flight = packets.clone();
        conn.reset_retransmit_timer();
        Ok((conn, packets))
    }

    /// Like `new_client`, but offers `session` for abbreviated resumption.
    /// The peer may still decline it and drive a full handshake instead;
    /// the `Connection` doesn't need to know which happened ahead of time.
    pub fn new_client_resuming(config: Arc<Config>, peer_addr: SocketAddr, session: Session) -> Result<(Self, Vec<Packet>)> {
        let mut handshaker = Handshaker::new_client_resuming(config.clone(), session);
        let step = handshaker.start_client()?;
        let mut conn = Connection {
            peer_addr,
            config: config.clone(),
            handshaker,
            reassembler: Reassembler::new(config.max_deferred_processed_incoming_records_size),
            pending_flight: vec![],
            flight_assembler: FlightAssembler::new(config.max_fragment_length, DTLS1_2),
            local_epoch: 0,
            local_sequence: 0,
            remote_epoch: 0,
            ccs_seen_for_epoch: 0,
            replay: Box::new(SlidingWindowDetector::new(config.replay_protection_window)),
            last_flight: vec![],
            current_flight: Flight::R1,
            retransmit_count: 0,
            current_retransmit_timeout: config.retransmission_timeout,
            next_retransmit_deadline: Instant::now() + config.retransmission_timeout,
            session: None,
            closed: false,
        };
        let packets = conn.emit(step)?;
        conn.last_flight = packets.clone();
        conn.reset_retransmit_timer();
        Ok((conn, packets))
    }

    pub fn new_server(config: Arc<Config>, cookie_gen: Arc<CookieGenerator>, peer_addr: SocketAddr) -> Self {
        let handshaker = Handshaker::new_server(config.clone(), cookie_gen);
        Connection {
            peer_addr,
            config: config.clone(),
            handshaker,
            reassembler: Reassembler::new(config.max_deferred_processed_incoming_records_size),
            pending_flight: vec![],
            flight_assembler: FlightAssembler::new(config.max_fragment_length, DTLS1_2),
            local_epoch: 0,
            local_sequence: 0,
            remote_epoch: 0,
            ccs_seen_for_epoch: 0,
            replay: Box::new(SlidingWindowDetector::new(config.replay_protection_window)),
            last_flight: vec![],
            current_flight: Flight::F2,
            retransmit_count: 0,
            current_retransmit_timeout: config.retransmission_timeout,
            next_retransmit_deadline: Instant::now() + config.retransmission_timeout,
            session: None,
            closed: false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    /// The negotiated session, once established — an embedder keeps this
    /// around to offer for resumption on a later `new_client_resuming` call.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// RFC 5705 keying material export. There is no master secret and
    /// no client/server random pair to derive from until the handshake
    /// reaches ESTABLISHED, so a call made any earlier is refused
    /// outright rather than being left to panic on `self.session`.
    pub fn export_keying_material(&self, label: &str, context: &[u8], length: usize) -> Result<Vec<u8>> {
        let session = self.session.as_ref().ok_or(Error::ErrHandshakeInProgress)?;
        let suite = self.handshaker.suite().ok_or(Error::ErrCipherSuiteUnset)?;
        session.export_keying_material(suite, label, context, length)
    }

    /// Who the handshake identified the peer as (PSK identity hint,
    /// client certificate chain, or neither).
    pub fn peer_identity(&self) -> crate::handshaker::PeerIdentity {
        self.handshaker.peer_identity()
    }

    pub fn suite(&self) -> Option<&(dyn CipherSuite + Send + Sync)> {
        self.handshaker.suite()
    }

    /// Resets the backoff schedule to `T0` for the flight just sent --
    /// called whenever a fresh flight ships, so the next retransmission
    /// (if the peer's reply never arrives) waits a full `T0` again
    /// rather than firing on whatever deadline the previous flight left
    /// behind.
    fn reset_retransmit_timer(&mut self) {
        self.retransmit_count = 0;
        self.current_retransmit_timeout = self.config.retransmission_timeout;
        self.next_retransmit_deadline = Instant::now() + self.current_retransmit_timeout;
    }

    /// Cached records of the last flight sent, for a `Connector` to
    /// resend verbatim once its backoff deadline passes. Per RFC 6347
    /// §4.2.4, each miss doubles the wait before the next one
    /// (`T0, 2*T0, 4*T0, ...`) rather than retrying on a fixed period.
    /// `None` once the handshake's terminal flight (F6/R3) has shipped,
    /// the deadline hasn't arrived yet, or once retransmissions are
    /// exhausted (which also closes the connection).
    pub fn retransmit(&mut self) -> Result<Option<Vec<Packet>>> {
        if self.closed || self.current_flight.is_terminal_send() {
            return Ok(None);
        }
        if Instant::now() < self.next_retransmit_deadline {
            return Ok(None);
        }
        if self.retransmit_count >= self.config.max_retransmissions {
            self.closed = true;
            return Err(Error::RetransmissionExhausted);
        }
        self.retransmit_count += 1;
        self.current_retransmit_timeout *= 2;
        self.next_retransmit_deadline = Instant::now() + self.current_retransmit_timeout;
        Ok(Some(self.last_flight.clone()))
    }

    /// Frames one application-data payload for sending. The caller
    /// encrypts it through `suite()` before writing it to the wire.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<Packet> {
        if self.local_epoch == 0 {
            return Err(Error::ErrApplicationDataEpochZero);
        }
        let mut record = RecordLayer::new(
            DTLS1_2,
            self.local_epoch,
            self.local_sequence,
            Content::ApplicationData(crate::application_data::ApplicationData { data: data.to_vec() }),
        );
        if let Some(cid) = self.handshaker.peer_connection_id() {
            record.header.connection_id = Some(cid.to_vec());
        }
        self.local_sequence += 1;
        Ok(Packet {
            record,
            should_encrypt: true,
        })
    }

    /// The connection id length expected on inbound records: the
    /// negotiated value once RFC 9146 negotiation has completed for
    /// this direction, falling back to `Config::connection_id_length`
    /// while the handshake is still in progress.
    fn inbound_cid_len(&self) -> usize {
        self.handshaker
            .local_connection_id()
            .map(|cid| cid.len())
            .unwrap_or(self.config.connection_id_length)
    }

    /// Processes one inbound datagram, returning both the externally
    /// visible events it produced and any new outbound flight this
    /// advanced the handshake into (already epoch/sequence-framed, not
    /// yet encrypted — the caller encrypts through `suite()` before
    /// writing to the wire).
    pub async fn handle_datagram(&mut self, buf: &[u8]) -> Result<(Vec<ConnectionEvent>, Vec<Packet>)> {
        if self.closed {
            return Err(Error::ErrConnectionNotFound);
        }

        let cid_len = self.inbound_cid_len();
        let raw_records = unpack_datagram(buf, cid_len)?;

        let mut events = vec![];
        let mut outbound = vec![];
        for raw in raw_records {
            match self.handle_record(&raw).await {
                Ok((event, mut packets)) => {
                    events.push(event);
                    outbound.append(&mut packets);
                }
                Err(e) => {
                    if let Some(desc) = e.fatal_alert() {
                        self.closed = true;
                        events.push(ConnectionEvent::Closed(desc));
                        return Ok((events, outbound));
                    }
                    // Silent-drop failures (duplicate/too-old record,
                    // exhausted resources) just skip this one record.
                }
            }
        }
        Ok((events, outbound))
    }

    async fn handle_record(&mut self, raw: &[u8]) -> Result<(ConnectionEvent, Vec<Packet>)> {
        let cid_len = self.inbound_cid_len();
        let header = RecordLayerHeader::unmarshal(&mut &raw[..], cid_len)?;

        if header.epoch < self.remote_epoch {
            return Err(Error::ResourceExhausted);
        }
        if header.epoch > self.remote_epoch {
            // A record at a new epoch is only valid once its
            // ChangeCipherSpec has actually been seen -- RFC 5246 §7.1
            // makes CCS the only valid signal for a bump, not something
            // implicit from a record just showing up at a higher epoch.
            // Not fatal: a CCS that is merely reordered behind the record
            // announcing it resolves itself once the flight's inevitable
            // retransmission puts them back in the right order: only a
            // peer that never sends CCS at all keeps failing this check,
            // and that shows up as retransmission exhaustion instead.
            if header.epoch != self.ccs_seen_for_epoch {
                return Err(Error::ResourceExhausted);
            }
            self.replay = Box::new(SlidingWindowDetector::new(self.config.replay_protection_window));
            self.remote_epoch = header.epoch;
        }
        if !self.replay.check(header.sequence_number) {
            return Err(Error::ResourceExhausted);
        }

        let content_bytes: Vec<u8> = if header.epoch == 0 {
            raw[header.size()..].to_vec()
        } else {
            let suite = self.handshaker.suite().ok_or(Error::ErrCipherSuiteUnset)?;
            suite.decrypt(raw)?
        };

        if header.content_type == ContentType::Handshake {
            return self.handle_handshake_fragment(&content_bytes).await;
        }

        let content = Content::unmarshal(header.content_type, &mut content_bytes.as_slice())?;
        match content {
            Content::Alert(alert) => {
                if alert.level == AlertLevel::Fatal {
                    return Err(Error::HandshakeFailure);
                }
                Ok((ConnectionEvent::None, vec![]))
            }
            Content::ChangeCipherSpec(_) => {
                self.ccs_seen_for_epoch = header.epoch + 1;
                Ok((ConnectionEvent::None, vec![]))
            }
            Content::ApplicationData(data) => {
                if self.session.is_none() {
                    return Err(Error::ErrApplicationDataEpochZero);
                }
                Ok((ConnectionEvent::ApplicationData(vec![data.data]), vec![]))
            }
            Content::Handshake(_) => unreachable!("handshake content is routed before this match"),
        }
    }

    async fn handle_handshake_fragment(&mut self, content_bytes: &[u8]) -> Result<(ConnectionEvent, Vec<Packet>)> {
        let (hh, fragment) = Handshake::unmarshal_fragment(&mut &content_bytes[..])?;

        let message = match self.reassembler.push(&hh, &fragment)? {
            PushOutcome::Complete(_, body) => HandshakeMessage::unmarshal_body(hh.handshake_type, &mut body.as_slice())?,
            PushOutcome::Pending => return Ok((ConnectionEvent::None, vec![])),
            PushOutcome::Retransmit => {
                // The peer never saw our reply to this message and is
                // retransmitting its side of the flight; resend ours
                // rather than waiting out a fresh timeout.
                return Ok((ConnectionEvent::None, self.last_flight.clone()));
            }
        };

        // Messages complete in whatever order their fragments finish
        // arriving, not necessarily the order the flight defines them
        // in; keep `pending_flight` sorted by message_sequence so flight
        // completion and `Handshaker::step` see them the way the wire
        // protocol defines the flight, not arrival order.
        let completed = Handshake { header: hh, message };
        let insert_at = self
            .pending_flight
            .partition_point(|h| h.header.message_sequence < completed.header.message_sequence);
        self.pending_flight.insert(insert_at, completed);

        // The server must initialize its cipher suite's key material as
        // soon as ClientKeyExchange is reassembled, not after the whole
        // flight: the Finished record right behind it on the wire is
        // already epoch-1 encrypted and `handle_record` needs the suite
        // keyed before it can decrypt that record at all.
        if self.handshaker.role == Role::Server && self.handshaker.state == State::WaitClientFlight5 {
            let just_completed = &self.pending_flight[insert_at];
            if !matches!(just_completed.message, HandshakeMessage::Finished(_)) {
                self.handshaker.observe_flight5_message(just_completed).await?;
            }
        }

        if !self.flight_is_complete() {
            return Ok((ConnectionEvent::None, vec![]));
        }

        let messages = std::mem::take(&mut self.pending_flight);
        let peer_addr = self.peer_addr.to_string().into_bytes();
        let step = self.handshaker.step(messages, &peer_addr).await?;

        if let Some(negotiated) = self.handshaker.negotiated_max_fragment_length() {
            self.flight_assembler.max_fragment_length = negotiated;
        }

        let established = step.established.clone();
        let packets = self.emit(step)?;
        self.last_flight = packets.clone();
        self.reset_retransmit_timer();

        let event = match established {
            Some(session) => {
                self.session = Some(session.clone());
                ConnectionEvent::Established(session)
            }
            None => ConnectionEvent::None,
        };
        Ok((event, packets))
    }

    /// Whether every message the current expected flight requires has
    /// arrived. Flights 4 and 5 are variable-length (PSK suites omit the
    /// certificate messages; client auth adds a CertificateVerify) so
    /// completion is detected by the terminal message type rather than a
    /// fixed count.
    fn flight_is_complete(&self) -> bool {
        match self.handshaker.role {
            Role::Server => matches!(
                self.pending_flight.last().map(|h| &h.message),
                Some(HandshakeMessage::Finished(_))
            ),
            Role::Client => matches!(
                self.pending_flight.last().map(|h| &h.message),
                Some(HandshakeMessage::ServerHelloDone(_))
                    | Some(HandshakeMessage::Finished(_))
                    | Some(HandshakeMessage::HelloVerifyRequest(_))
            ),
        }
    }

    fn emit(&mut self, step: StepOutput) -> Result<Vec<Packet>> {
        self.current_flight = step.flight;

        let mut packets = self
            .flight_assembler
            .assemble(&step.messages, self.local_epoch, self.local_sequence)?;
        if let Some(last) = packets.last() {
            self.local_sequence = last.record.header.sequence_number + 1;
        }

        if step.change_cipher_spec_before_last && !packets.is_empty() {
            let ccs_index = packets.len() - 1;
            let ccs = self
                .flight_assembler
                .change_cipher_spec_packet(self.local_epoch, self.local_sequence);
            self.local_sequence += 1;
            self.local_epoch += 1;
            // Re-epoch everything from the last message onward: it ships
            // encrypted, after the ChangeCipherSpec that precedes it.
            for p in &mut packets[ccs_index..] {
                p.record.header.epoch = self.local_epoch;
            }
            packets.insert(ccs_index, ccs);
        }

        Ok(packets)
    }

    pub fn close_alert(&mut self) -> Packet {
        self.closed = true;
        Packet {
            record: RecordLayer::new(
                DTLS1_2,
                self.local_epoch,
                self.local_sequence,
                Content::Alert(Alert {
                    level: AlertLevel::Warning,
                    description: AlertDescription::CloseNotify,
                }),
            ),
            should_encrypt: self.local_epoch > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher_suite::{CipherSuiteFactory, CipherSuiteHash, CipherSuiteId};
    use crate::services::{PskStore, SessionCache};
    use async_trait::async_trait;

    struct FakeSuite;

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
        fn init(&mut self, _: &[u8], _: &[u8], _: &[u8], _: bool) -> Result<()> {
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
            let mix: Vec<u8> = secret.iter().chain(label).chain(seed).copied().collect();
            (0..out_len).map(|i| mix[i % mix.len()]).collect()
        }
        fn generate_ecdhe_keypair(&mut self, _group: crate::extension::named_group::NamedGroup) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        fn compute_ecdhe_shared_secret(&self, _peer_public_key: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    struct FakeFactory;
    impl CipherSuiteFactory for FakeFactory {
        fn create(&self, _id: CipherSuiteId) -> Result<Box<dyn CipherSuite + Send + Sync>> {
            Ok(Box::new(FakeSuite))
        }
    }

    struct FakePskStore;
    #[async_trait]
    impl PskStore for FakePskStore {
        async fn get_key(&self, _identity_hint: &[u8]) -> Result<Vec<u8>> {
            Ok(b"shared-secret".to_vec())
        }
    }

    fn psk_config() -> Arc<Config> {
        Arc::new(Config {
            supported_cipher_suites: vec![CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256],
            cipher_suite_factory: Some(Arc::new(FakeFactory)),
            psk_store: Some(Arc::new(FakePskStore)),
            psk_identity_hint: b"test-identity".to_vec(),
            ..Config::default()
        })
    }

    fn encode(suite: Option<&(dyn CipherSuite + Send + Sync)>, packet: &Packet) -> Vec<u8> {
        if !packet.should_encrypt {
            let mut buf = vec![];
            packet.record.marshal(&mut buf).unwrap();
            return buf;
        }
        let mut plaintext = vec![];
        packet.record.content.marshal(&mut plaintext).unwrap();
        suite.unwrap().encrypt(&packet.record.header, &plaintext).unwrap()
    }

    struct FakeSessionCache {
        sessions: tokio::sync::Mutex<std::collections::HashMap<Vec<u8>, Session>>,
    }

    impl FakeSessionCache {
        fn new() -> Self {
            FakeSessionCache {
                sessions: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl crate::services::SessionCache for FakeSessionCache {
        async fn get(&self, session_id: &[u8]) -> Option<Session> {
            self.sessions.lock().await.get(session_id).cloned()
        }
        async fn put(&self, session_id: Vec<u8>, session: Session) {
            self.sessions.lock().await.insert(session_id, session);
        }
        async fn remove(&self, session_id: &[u8]) {
            self.sessions.lock().await.remove(session_id);
        }
    }

    /// Drives a client and a server `Connection` against each other over
    /// an in-memory byte exchange (no `Connector`/socket involved),
    /// starting from `first_flight`, until both reach ESTABLISHED.
    async fn drive(mut client: Connection, mut server: Connection, first_flight: Vec<Packet>) -> (Connection, Connection) {
        let mut to_server: Vec<Vec<u8>> = first_flight.iter().map(|p| encode(client.suite(), p)).collect();
        let mut to_client: Vec<Vec<u8>> = vec![];

        for _ in 0..10 {
            if client.is_established() && server.is_established() {
                break;
            }
            for datagram in to_server.drain(..) {
                let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
                to_client.extend(packets.iter().map(|p| encode(server.suite(), p)));
            }
            for datagram in to_client.drain(..) {
                let (_, packets) = client.handle_datagram(&datagram).await.unwrap();
                to_server.extend(packets.iter().map(|p| encode(client.suite(), p)));
            }
        }

        assert!(client.is_established(), "client never reached ESTABLISHED");
        assert!(server.is_established(), "server never reached ESTABLISHED");
        (client, server)
    }

    async fn drive_to_established(addr: SocketAddr) -> (Connection, Connection) {
        let client_config = psk_config();
        let server_config = psk_config();
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));

        let (client, first_flight) = Connection::new_client(client_config, addr).unwrap();
        let server = Connection::new_server(server_config, cookie_gen, addr);
        drive(client, server, first_flight).await
    }

    #[tokio::test]
    async fn full_psk_handshake_reaches_established_on_both_sides() {
        let addr: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        let (client, server) = drive_to_established(addr).await;
        assert_eq!(client.suite().unwrap().id(), CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256);
        assert!(server.suite().is_some());
    }

    #[tokio::test]
    async fn server_learns_the_client_psk_identity_hint() {
        let addr: SocketAddr = "127.0.0.1:4436".parse().unwrap();
        let (_client, server) = drive_to_established(addr).await;
        match server.peer_identity() {
            crate::handshaker::PeerIdentity::Psk(hint) => assert_eq!(hint, b"test-identity"),
            other => panic!("expected a PSK identity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_application_data_record_is_dropped_silently() {
        let addr: SocketAddr = "127.0.0.1:4434".parse().unwrap();
        let (mut client, mut server) = drive_to_established(addr).await;

        let packet = client.send_application_data(b"hello").unwrap();
        let datagram = encode(client.suite(), &packet);

        let (events, _) = server.handle_datagram(&datagram).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ConnectionEvent::ApplicationData(_)));

        // Replaying the exact same record must be dropped, not delivered
        // twice or treated as a fatal error.
        let (events_again, packets_again) = server.handle_datagram(&datagram).await.unwrap();
        assert!(events_again.is_empty());
        assert!(packets_again.is_empty());
    }

    #[tokio::test]
    async fn export_keying_material_is_refused_before_established() {
        let addr: SocketAddr = "127.0.0.1:4438".parse().unwrap();
        let (client, _first_flight) = Connection::new_client(psk_config(), addr).unwrap();
        let err = client.export_keying_material("EXTRACTOR", &[], 16).unwrap_err();
        assert!(matches!(err, Error::ErrHandshakeInProgress));
    }

    #[tokio::test]
    async fn export_keying_material_succeeds_once_established() {
        let addr: SocketAddr = "127.0.0.1:4439".parse().unwrap();
        let (client, _server) = drive_to_established(addr).await;
        let material = client.export_keying_material("EXTRACTOR", &[], 16).unwrap();
        assert_eq!(material.len(), 16);
    }

    #[tokio::test]
    async fn retransmit_backs_off_exponentially_rather_than_on_a_fixed_period() {
        let addr: SocketAddr = "127.0.0.1:4437".parse().unwrap();
        let mut config = (*psk_config()).clone();
        config.retransmission_timeout = Duration::from_millis(20);
        let (mut client, _first_flight) = Connection::new_client(Arc::new(config), addr).unwrap();

        // T0 hasn't elapsed yet.
        assert!(client.retransmit().unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(client.retransmit().unwrap().is_some(), "T0 elapsed, should fire");
        // Backoff just doubled to 2*T0 (40ms); firing again immediately is premature.
        assert!(client.retransmit().unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(client.retransmit().unwrap().is_none(), "only 30ms of the 40ms wait has passed");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.retransmit().unwrap().is_some(), "2*T0 has now elapsed");
    }

    #[tokio::test]
    async fn resumption_reuses_master_secret_without_key_exchange() {
        let addr: SocketAddr = "127.0.0.1:4435".parse().unwrap();
        let cache = Arc::new(FakeSessionCache::new());
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));

        let client_config = psk_config();
        let server_config = {
            let mut cfg = (*psk_config()).clone();
            cfg.session_cache = Some(cache.clone());
            Arc::new(cfg)
        };

        let (client, first_flight) = Connection::new_client(client_config.clone(), addr).unwrap();
        let server = Connection::new_server(server_config.clone(), cookie_gen.clone(), addr);
        let (first_client, first_server) = drive(client, server, first_flight).await;

        let session = first_client.session().expect("established").clone();
        assert!(!session.id.is_empty(), "PSK handshake assigns a session id by default");

        // Raw `Connection`s never touch a `SessionCache` themselves (only
        // `Connector::handle_datagram` does, on the `Established` event);
        // populate it the way that embedder would between the two dials.
        cache.put(session.id.clone(), session.clone()).await;
        assert!(cache.get(&session.id).await.is_some());

        let (resuming_client, resume_first_flight) =
            Connection::new_client_resuming(client_config, addr, session.clone()).unwrap();
        let resuming_server = Connection::new_server(server_config, cookie_gen, addr);

        let (resumed_client, _resumed_server) = drive(resuming_client, resuming_server, resume_first_flight).await;

        let resumed_session = resumed_client.session().expect("resumed session established");
        assert_eq!(resumed_session.id, session.id);
        assert_eq!(resumed_session.master_secret, session.master_secret);
        // Fresh randoms per RFC 5246 §7.3, even though the secret is reused.
        assert_ne!(resumed_session.client_random, first_server.session().unwrap().client_random);
    }

    // S1: full handshake, in order, with the server assigning a connection
    // id. The client never asks for one of its own but still has to attach
    // the server's when it sends application data.
    #[tokio::test]
    async fn established_connection_attaches_server_assigned_connection_id() {
        let addr: SocketAddr = "127.0.0.1:4440".parse().unwrap();
        let client_config = psk_config();
        let server_config = Arc::new(Config {
            connection_id_length: 6,
            ..(*psk_config()).clone()
        });
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));

        let (client, first_flight) = Connection::new_client(client_config, addr).unwrap();
        let server = Connection::new_server(server_config, cookie_gen, addr);
        let (mut client, mut server) = drive(client, server, first_flight).await;

        let packet = client.send_application_data(b"ping").unwrap();
        let cid = packet
            .record
            .header
            .connection_id
            .clone()
            .expect("client attaches the cid the server assigned it");
        assert_eq!(cid.len(), 6);

        let datagram = encode(client.suite(), &packet);
        let (events, _) = server.handle_datagram(&datagram).await.unwrap();
        assert!(matches!(events[0], ConnectionEvent::ApplicationData(_)));
    }

    // S2: the server's flight 4 (ServerHello, Certificate, ServerKeyExchange,
    // ServerHelloDone) arrives at the client in reverse order. The client
    // must still reassemble `pending_flight` in message_seq order and
    // complete the handshake.
    #[tokio::test]
    async fn reordered_server_flight_still_reassembles_in_sequence_order() {
        let addr: SocketAddr = "127.0.0.1:4441".parse().unwrap();
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));
        let (mut client, first_flight) = Connection::new_client(psk_config(), addr).unwrap();
        let mut server = Connection::new_server(psk_config(), cookie_gen, addr);

        let mut to_server: Vec<Vec<u8>> = first_flight.iter().map(|p| encode(client.suite(), p)).collect();
        let mut to_client: Vec<Vec<u8>> = vec![];
        let mut reordered_once = false;

        for _ in 0..10 {
            if client.is_established() && server.is_established() {
                break;
            }
            for datagram in to_server.drain(..) {
                let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
                let mut encoded: Vec<Vec<u8>> = packets.iter().map(|p| encode(server.suite(), p)).collect();
                if !reordered_once && encoded.len() > 1 {
                    encoded.reverse();
                    reordered_once = true;
                }
                to_client.extend(encoded);
            }
            for datagram in to_client.drain(..) {
                let (_, packets) = client.handle_datagram(&datagram).await.unwrap();
                to_server.extend(packets.iter().map(|p| encode(client.suite(), p)));
            }
        }

        assert!(reordered_once, "test sanity: flight 4 should have shipped as more than one record");
        assert!(client.is_established(), "client never reached ESTABLISHED");
        assert!(server.is_established(), "server never reached ESTABLISHED");
    }

    // S3: flight 5 arrives at the server reordered, and the server's
    // deferred-message budget is too small to hold all of it at once. The
    // first delivery can't complete; the client has to retransmit flight 5
    // (the same cached records, not re-derived) more than once before the
    // server's reassembler has freed enough room to finish.
    #[tokio::test]
    async fn small_deferred_buffer_forces_flight5_retransmits() {
        let addr: SocketAddr = "127.0.0.1:4442".parse().unwrap();
        let server_config = Arc::new(Config {
            max_deferred_processed_incoming_records_size: 128,
            ..(*psk_config()).clone()
        });
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));
        let (mut client, first_flight) = Connection::new_client(psk_config(), addr).unwrap();
        let mut server = Connection::new_server(server_config, cookie_gen, addr);

        let mut to_server: Vec<Vec<u8>> = first_flight.iter().map(|p| encode(client.suite(), p)).collect();
        let mut to_client: Vec<Vec<u8>> = vec![];
        let mut flight5: Option<Vec<Vec<u8>>> = None;

        // Drive the cookie round and flights 3/4 normally; capture flight 5
        // the moment the client ships it.
        while flight5.is_none() {
            for datagram in to_server.drain(..) {
                let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
                to_client.extend(packets.iter().map(|p| encode(server.suite(), p)));
            }
            for datagram in to_client.drain(..) {
                let (_, packets) = client.handle_datagram(&datagram).await.unwrap();
                if !packets.is_empty() {
                    let encoded: Vec<Vec<u8>> = packets.iter().map(|p| encode(client.suite(), p)).collect();
                    if packets.len() > 1 {
                        flight5 = Some(encoded.clone());
                    }
                    to_server.extend(encoded);
                }
            }
        }
        let flight5 = flight5.expect("flight 5 carries more than one message for a fresh PSK handshake");

        // First delivery, reordered: the small buffer can't hold every
        // message at once, so this alone can't finish the flight.
        let mut reversed = flight5.clone();
        reversed.reverse();
        for datagram in reversed {
            let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
            to_client.extend(packets.iter().map(|p| encode(server.suite(), p)));
        }
        assert!(
            !server.is_established(),
            "a 128-byte deferred buffer should not have fit the whole reordered flight"
        );

        let mut explicit_retransmits = 0;
        while !server.is_established() && explicit_retransmits < 5 {
            explicit_retransmits += 1;
            for datagram in flight5.clone() {
                let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
                to_client.extend(packets.iter().map(|p| encode(server.suite(), p)));
            }
        }

        assert!(server.is_established(), "server never finished reassembling flight 5");
        assert!(
            explicit_retransmits >= 2,
            "expected at least two flight 5 retransmits, saw {}",
            explicit_retransmits
        );
    }

    // S4: the client never sees flight 6 (there's no ACK for it to wait on)
    // and retransmits flight 5 instead. The server must recognize that
    // retransmit and resend flight 6 from cache rather than waiting out its
    // own timer.
    #[tokio::test]
    async fn server_resends_flight6_on_flight5_retransmit_without_waiting_for_a_timeout() {
        let addr: SocketAddr = "127.0.0.1:4443".parse().unwrap();
        let (client, first_flight) = Connection::new_client(psk_config(), addr).unwrap();
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));
        let server = Connection::new_server(psk_config(), cookie_gen, addr);
        let (client, mut server) = drive(client, server, first_flight).await;
        assert!(client.is_established() && server.is_established());

        // Simulate the client's retransmit by resending its cached flight 5
        // straight at the already-ESTABLISHED server -- DTLS
        // retransmissions are the identical records, never re-derived.
        let datagram_batches: Vec<Vec<u8>> = client
            .last_flight
            .iter()
            .map(|p| encode(client.suite(), p))
            .collect();
        let mut resent_flight6 = false;
        for datagram in datagram_batches {
            let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
            if !packets.is_empty() {
                resent_flight6 = true;
            }
        }

        assert!(resent_flight6, "server should resend flight 6 when flight 5 arrives again");
        assert!(server.is_established(), "resending flight 6 must not disturb an already-established server");
    }

    // S5: the peer's reply never arrives. A connection's own
    // retransmission backoff (used identically for a client waiting on
    // flight 6 or a server waiting on Finished) eventually exhausts and it
    // reports the connection as failed rather than waiting forever.
    #[tokio::test]
    async fn retransmission_exhaustion_closes_the_connection() {
        let addr: SocketAddr = "127.0.0.1:4444".parse().unwrap();
        let mut config = (*psk_config()).clone();
        config.retransmission_timeout = Duration::from_millis(5);
        config.max_retransmissions = 3;
        let (mut conn, _first_flight) = Connection::new_client(Arc::new(config), addr).unwrap();

        let mut resends = 0;
        let mut exhausted = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(6)).await;
            match conn.retransmit() {
                Ok(Some(_)) => resends += 1,
                Ok(None) => {}
                Err(Error::RetransmissionExhausted) => {
                    exhausted = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }

        assert!(exhausted, "retransmission should eventually exhaust and fail the connection");
        assert_eq!(resends, 3, "should resend exactly max_retransmissions times before failing");
    }

    // S7: a client sends Certificate .. Finished without a ChangeCipherSpec
    // in between. The server must not establish, and since the missing CCS
    // alone isn't distinguishable from ordinary reordering it can't be a
    // fatal reject -- the server just keeps waiting for a properly
    // announced epoch bump that never comes, and its own retransmission
    // backoff is what eventually gives up on the connection.
    #[tokio::test]
    async fn flight5_without_change_cipher_spec_never_establishes() {
        let addr: SocketAddr = "127.0.0.1:4445".parse().unwrap();
        let (mut client, first_flight) = Connection::new_client(psk_config(), addr).unwrap();
        let cookie_gen = Arc::new(CookieGenerator::new([7u8; 32]));
        let mut server_config = (*psk_config()).clone();
        server_config.retransmission_timeout = Duration::from_millis(5);
        server_config.max_retransmissions = 3;
        let mut server = Connection::new_server(Arc::new(server_config), cookie_gen, addr);

        let mut to_server: Vec<Vec<u8>> = first_flight.iter().map(|p| encode(client.suite(), p)).collect();
        let mut to_client: Vec<Vec<u8>> = vec![];
        let mut flight5: Option<Vec<Packet>> = None;

        while flight5.is_none() {
            for datagram in to_server.drain(..) {
                let (_, packets) = server.handle_datagram(&datagram).await.unwrap();
                to_client.extend(packets.iter().map(|p| encode(server.suite(), p)));
            }
            for datagram in to_client.drain(..) {
                let (_, packets) = client.handle_datagram(&datagram).await.unwrap();
                if packets.len() > 1 {
                    flight5 = Some(packets.clone());
                }
                to_server.extend(packets.iter().map(|p| encode(client.suite(), p)));
            }
        }
        let flight5 = flight5.unwrap();

        // Drop the ChangeCipherSpec record, keep everything else -- the
        // epoch-1 Finished arrives with no announcement it was coming.
        let suite = client.suite();
        for packet in flight5.iter().filter(|p| !matches!(p.record.content, Content::ChangeCipherSpec(_))) {
            let datagram = encode(suite, packet);
            let (events, _) = server.handle_datagram(&datagram).await.unwrap();
            assert!(events.iter().all(|e| !matches!(e, ConnectionEvent::Established(_))));
        }
        assert!(!server.is_established(), "server must not establish without a valid ChangeCipherSpec");

        let mut exhausted = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(6)).await;
            if matches!(server.retransmit(), Err(Error::RetransmissionExhausted)) {
                exhausted = true;
                break;
            }
        }
        assert!(exhausted, "server should give up once retransmissions of flight 4 are exhausted");
        assert!(!server.is_established(), "server must still not be established after giving up");
    }
}
