use std::sync::Arc;

use rand::Rng;

use crate::alert::AlertDescription;
use crate::cipher_suite::{parse_cipher_suite_ids, CipherSuite, CipherSuiteId};
use crate::compression_methods::{default_compression_methods, CompressionMethodId};
use crate::config::Config;
use crate::cookie::CookieGenerator;
use crate::error::{Error, Result};
use crate::extension::certificate_type::{CertificateType, ExtensionClientCertificateType, ExtensionServerCertificateType};
use crate::extension::connection_id::ExtensionConnectionId;
use crate::extension::max_fragment_length::{ExtensionMaxFragmentLength, FragmentLengthCode};
use crate::extension::named_group::NamedGroup;
use crate::extension::server_name::ExtensionServerName;
use crate::extension::supported_groups::ExtensionSupportedGroups;
use crate::extension::Extension;
use crate::flight::Flight;
use crate::handshake::certificate::Certificate;
use crate::handshake::certificate_request::CertificateRequest;
use crate::handshake::certificate_verify::CertificateVerify;
use crate::handshake::client_hello::ClientHello;
use crate::handshake::client_key_exchange::ClientKeyExchange;
use crate::handshake::finished::Finished;
use crate::handshake::hello_verify_request::HelloVerifyRequest;
use crate::handshake::random::HandshakeRandom;
use crate::handshake::server_hello::ServerHello;
use crate::handshake::server_hello_done::ServerHelloDone;
use crate::handshake::server_key_exchange::ServerKeyExchange;
use crate::handshake::transcript::Transcript;
use crate::handshake::{Handshake, HandshakeMessage};
use crate::record_layer::header::DTLS1_2;
use crate::session::Session;

const VERIFY_DATA_LENGTH: usize = 12;

/// Who the negotiated peer was, surfaced after a handshake completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerIdentity {
    None,
    Psk(Vec<u8>),
    Certificate(Vec<Vec<u8>>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Where a handshake currently sits. Progressing through these states
/// never changes the concrete type driving the handshake: one
/// `Handshaker` carries a client or server through its entire life, and
/// `state` is just data rather than a swapped-out trait object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Start,
    WaitServerHello,
    WaitServerFinished,
    WaitClientHello,
    WaitClientFlight5,
    WaitClientFinishedResume,
    Established,
    Failed,
}

/// Everything a flight of inbound messages produced: records to send
/// back (already epoch/should_encrypt tagged at the `Handshake` level,
/// the `FlightAssembler` fragments and frames them), whether a
/// ChangeCipherSpec must precede the final message, and the completed
/// session once the handshake reaches ESTABLISHED.
pub struct StepOutput {
    pub messages: Vec<(Handshake, bool)>,
    pub change_cipher_spec_before_last: bool,
    pub established: Option<Session>,
    pub flight: Flight,
}

/// The message-driven handshake engine. One instance per connection;
/// `role` never changes but `state` advances `Start -> ... ->
/// Established | Failed`. Crypto math (AEAD, ECDH, PRF, certificate/PSK
/// lookups) is delegated to `CipherSuite`/`PskStore`/
/// `CertificateVerifier`/`RawKeyVerifier` collaborators supplied through
/// `Config`; this type only sequences messages and enforces protocol
/// invariants.
pub struct Handshaker {
    pub role: Role,
    config: Arc<Config>,
    pub state: State,
    transcript: Transcript,
    cookie_gen: Option<Arc<CookieGenerator>>,
    suite_id: Option<CipherSuiteId>,
    suite: Option<Box<dyn CipherSuite + Send + Sync>>,
    client_random: Option<HandshakeRandom>,
    server_random: Option<HandshakeRandom>,
    session_id: Vec<u8>,
    local_message_seq: u16,
    psk_identity_hint: Vec<u8>,
    client_certificate_chain: Option<Vec<Vec<u8>>>,
    request_client_cert: bool,
    pending_session: Option<Session>,
    resume_session: Option<Session>,
    /// Set as soon as the server has processed the client's
    /// ClientKeyExchange, independent of the rest of flight 5 -- the
    /// Finished record right behind it on the wire is already epoch-1
    /// encrypted and needs this before it can be decrypted.
    master_secret: Option<Vec<u8>>,
    /// RFC 9146: the connection id this side wants the peer to attach
    /// when sending to it. `None` until negotiated, and reset to `None`
    /// if the peer's side of the handshake never acknowledges it.
    local_cid: Option<Vec<u8>>,
    /// The connection id the peer wants attached to records sent to it.
    peer_cid: Option<Vec<u8>>,
    negotiated_max_fragment_length: Option<usize>,
}

impl Handshaker {
    pub fn new_client(config: Arc<Config>) -> Self {
        Handshaker {
            role: Role::Client,
            config,
            state: State::Start,
            transcript: Transcript::new(),
            cookie_gen: None,
            suite_id: None,
            suite: None,
            client_random: None,
            server_random: None,
            session_id: vec![],
            local_message_seq: 0,
            psk_identity_hint: vec![],
            client_certificate_chain: None,
            request_client_cert: false,
            pending_session: None,
            resume_session: None,
            master_secret: None,
            local_cid: None,
            peer_cid: None,
            negotiated_max_fragment_length: None,
        }
    }

    /// Like `new_client`, but offers `session` for abbreviated resumption
    /// (RFC 5246 §7.3 / R1-R3 below). The server may still decline and
    /// fall back to a full handshake, in which case this behaves exactly
    /// like `new_client`.
    pub fn new_client_resuming(config: Arc<Config>, session: Session) -> Self {
        let mut handshaker = Self::new_client(config);
        handshaker.resume_session = Some(session);
        handshaker
    }

    pub fn new_server(config: Arc<Config>, cookie_gen: Arc<CookieGenerator>) -> Self {
        Handshaker {
            role: Role::Server,
            config,
            state: State::WaitClientHello,
            transcript: Transcript::new(),
            cookie_gen: Some(cookie_gen),
            suite_id: None,
            suite: None,
            client_random: None,
            server_random: None,
            session_id: vec![],
            local_message_seq: 0,
            psk_identity_hint: vec![],
            client_certificate_chain: None,
            request_client_cert: false,
            pending_session: None,
            resume_session: None,
            master_secret: None,
            local_cid: None,
            peer_cid: None,
            negotiated_max_fragment_length: None,
        }
    }

    /// The negotiated cipher suite, once flight 4 (client) or flight 5
    /// (server) has picked one. `None` before negotiation and never
    /// reset afterward.
    pub fn suite(&self) -> Option<&(dyn CipherSuite + Send + Sync)> {
        self.suite.as_deref()
    }

    /// The connection id this side has asked the peer to attach to
    /// records sent to it, once RFC 9146 negotiation for this direction
    /// has completed.
    pub fn local_connection_id(&self) -> Option<&[u8]> {
        self.local_cid.as_deref()
    }

    /// The connection id the peer asked this side to attach to records
    /// sent to it.
    pub fn peer_connection_id(&self) -> Option<&[u8]> {
        self.peer_cid.as_deref()
    }

    pub fn negotiated_max_fragment_length(&self) -> Option<usize> {
        self.negotiated_max_fragment_length
    }

    fn generate_connection_id(&self) -> Vec<u8> {
        let mut cid = vec![0u8; self.config.connection_id_length];
        rand::thread_rng().fill(cid.as_mut_slice());
        cid
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.local_message_seq;
        self.local_message_seq += 1;
        seq
    }

    fn push_local(&mut self, message: HandshakeMessage) -> Handshake {
        let seq = self.next_seq();
        let handshake = Handshake::new(message, seq);
        self.transcript.push(&handshake, self.role == Role::Client);
        handshake
    }

    fn push_remote(&mut self, handshake: &Handshake) {
        self.transcript.push(handshake, self.role != Role::Client);
    }

    /// Flight 1: the client's first (cookie-less) ClientHello. Per RFC
    /// 6347 §4.2.1 this message never enters the transcript — only the
    /// cookie-bearing retry in flight 3 does, under the same
    /// message_sequence.
    pub fn start_client(&mut self) -> Result<StepOutput> {
        let random = HandshakeRandom::generate();
        self.client_random = Some(random.clone());
        if let Some(resume) = &self.resume_session {
            self.session_id = resume.id.clone();
        }

        let handshake = self.build_client_hello(random, vec![]);
        self.state = State::WaitServerHello;

        Ok(StepOutput {
            messages: vec![(handshake, false)],
            change_cipher_spec_before_last: false,
            established: None,
            flight: if self.resume_session.is_some() { Flight::R1 } else { Flight::F1 },
        })
    }

    fn build_client_hello(&mut self, random: HandshakeRandom, cookie: Vec<u8>) -> Handshake {
        let has_cookie = !cookie.is_empty();
        let hello = ClientHello {
            version: DTLS1_2,
            random,
            session_id: self.session_id.clone(),
            cookie,
            cipher_suites: self.config.supported_cipher_suites.clone(),
            compression_methods: default_compression_methods(),
            extensions: self.client_hello_extensions(),
        };
        let handshake = Handshake::new(HandshakeMessage::ClientHello(hello), 0);
        if has_cookie {
            self.transcript.push(&handshake, true);
        }
        self.local_message_seq = 1;
        handshake
    }

    fn client_hello_extensions(&mut self) -> Vec<Extension> {
        let mut extensions = vec![];
        if self.config.sni_enabled && !self.config.server_name.is_empty() {
            extensions.push(Extension::ServerName(ExtensionServerName {
                server_name: self.config.server_name.clone(),
            }));
        }
        // RFC 9146 §3: sent even with an empty value, so the server
        // knows this side supports the extension and may assign a cid
        // of its own for us to attach to records we send it, even when
        // we don't want a cid of our own in return.
        let cid = if self.config.connection_id_length > 0 {
            let cid = self.local_cid.clone().unwrap_or_else(|| self.generate_connection_id());
            self.local_cid = Some(cid.clone());
            cid
        } else {
            vec![]
        };
        extensions.push(Extension::ConnectionId(ExtensionConnectionId { cid }));
        extensions
    }

    /// The client's side of negotiation: the server's echo is what
    /// actually took effect, regardless of what was requested.
    fn apply_server_hello_extensions(&mut self, extensions: &[Extension]) {
        match extensions.iter().find(|e| matches!(e, Extension::ConnectionId(_))) {
            Some(Extension::ConnectionId(ExtensionConnectionId { cid })) => {
                self.peer_cid = Some(cid.clone());
            }
            _ => {
                // Server didn't echo connection ids at all: per RFC 9146
                // §3, neither direction uses them on this connection.
                self.local_cid = None;
            }
        }

        if let Some(Extension::MaxFragmentLength(ExtensionMaxFragmentLength { code })) =
            extensions.iter().find(|e| matches!(e, Extension::MaxFragmentLength(_)))
        {
            self.negotiated_max_fragment_length = Some(fragment_code_bytes(*code));
        }
    }

    /// Dispatches one reassembled flight of handshake messages through
    /// the state machine. `peer_addr` is only consulted for cookie
    /// verification (server, WaitClientHello).
    pub async fn step(&mut self, messages: Vec<Handshake>, peer_addr: &[u8]) -> Result<StepOutput> {
        match (self.role, self.state) {
            (Role::Server, State::WaitClientHello) => self.server_handle_client_hello(messages, peer_addr).await,
            (Role::Client, State::WaitServerHello) => self.client_handle_flight4(messages).await,
            (Role::Server, State::WaitClientFlight5) => {
                self.server_handle_flight5(messages).await
            }
            (Role::Client, State::WaitServerFinished) => self.client_handle_flight6(messages).await,
            (Role::Server, State::WaitClientFinishedResume) => {
                self.server_handle_resume_finished(messages).await
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// Validates the client's requests against what this server actually
    /// offers (named group, certificate type) and negotiates what it can
    /// (max fragment length, connection id), returning the extensions to
    /// echo back in ServerHello. RFC 6066 §3/§4, RFC 9146 §3.
    fn negotiate_extensions(&mut self, client_hello: &ClientHello, suite_id: CipherSuiteId) -> Result<Vec<Extension>> {
        let mut response = vec![];

        if client_hello.extensions.iter().any(|e| matches!(e, Extension::ServerName(_))) {
            // RFC 6066 §3: the server confirms it used the name with an
            // empty extension rather than repeating the value.
            response.push(Extension::ServerName(ExtensionServerName {
                server_name: String::new(),
            }));
        }

        if suite_id.is_certificate() {
            if let Some(Extension::SupportedGroups(ExtensionSupportedGroups { groups })) =
                client_hello.extensions.iter().find(|e| matches!(e, Extension::SupportedGroups(_)))
            {
                if !groups.contains(&NamedGroup::X25519) {
                    return Err(Error::ErrInvalidNamedGroup);
                }
            }

            if let Some(Extension::ServerCertificateType(ExtensionServerCertificateType { types })) =
                client_hello.extensions.iter().find(|e| matches!(e, Extension::ServerCertificateType(_)))
            {
                if !types.contains(&CertificateType::X509) {
                    return Err(Error::ErrInvalidCipherSuite);
                }
                response.push(Extension::ServerCertificateType(ExtensionServerCertificateType {
                    types: vec![CertificateType::X509],
                }));
            }

            if self.request_client_cert {
                if let Some(Extension::ClientCertificateType(ExtensionClientCertificateType { types })) =
                    client_hello.extensions.iter().find(|e| matches!(e, Extension::ClientCertificateType(_)))
                {
                    if !types.contains(&CertificateType::X509) {
                        return Err(Error::ErrInvalidCipherSuite);
                    }
                    response.push(Extension::ClientCertificateType(ExtensionClientCertificateType {
                        types: vec![CertificateType::X509],
                    }));
                }
            }
        }

        if let Some(Extension::MaxFragmentLength(ExtensionMaxFragmentLength { code })) =
            client_hello.extensions.iter().find(|e| matches!(e, Extension::MaxFragmentLength(_)))
        {
            let requested = fragment_code_bytes(*code);
            self.negotiated_max_fragment_length = Some(requested.min(self.config.max_fragment_length));
            response.push(Extension::MaxFragmentLength(ExtensionMaxFragmentLength { code: *code }));
        }

        if let Some(Extension::ConnectionId(ExtensionConnectionId { cid })) =
            client_hello.extensions.iter().find(|e| matches!(e, Extension::ConnectionId(_)))
        {
            if !cid.is_empty() {
                self.peer_cid = Some(cid.clone());
            }
            if self.config.connection_id_length > 0 {
                let own_cid = self.generate_connection_id();
                self.local_cid = Some(own_cid.clone());
                response.push(Extension::ConnectionId(ExtensionConnectionId { cid: own_cid }));
            }
        }

        Ok(response)
    }

    async fn server_handle_client_hello(
        &mut self,
        mut messages: Vec<Handshake>,
        peer_addr: &[u8],
    ) -> Result<StepOutput> {
        if messages.len() != 1 {
            return Err(Error::UnexpectedMessage);
        }
        let handshake = messages.remove(0);
        let client_hello = match &handshake.message {
            HandshakeMessage::ClientHello(ch) => ch.clone(),
            _ => return Err(Error::UnexpectedMessage),
        };

        let cookie_gen = self.cookie_gen.as_ref().expect("server always has a cookie generator");

        if client_hello.cookie.is_empty() {
            let cookie = cookie_gen.generate(peer_addr, &client_hello.random.marshal_fixed());
            let hvr = HelloVerifyRequest {
                version: DTLS1_2,
                cookie,
            };
            // The stateless HelloVerifyRequest flight never enters the
            // transcript; RFC 6347 requires only the second, cookie-bearing
            // ClientHello to count toward the handshake hash.
            let seq = self.next_seq();
            let out = Handshake::new(HandshakeMessage::HelloVerifyRequest(hvr), seq);
            return Ok(StepOutput {
                messages: vec![(out, false)],
                change_cipher_spec_before_last: false,
                established: None,
                flight: Flight::F2,
            });
        }

        cookie_gen.verify(&client_hello.cookie, peer_addr, &client_hello.random.marshal_fixed())?;

        self.client_random = Some(client_hello.random.clone());

        if !client_hello.session_id.is_empty() {
            if let Some(cache) = &self.config.session_cache {
                if let Some(cached) = cache.get(&client_hello.session_id).await {
                    if self.config.supported_cipher_suites.contains(&cached.cipher_suite) {
                        return self.server_resume(handshake, client_hello, cached).await;
                    }
                }
            }
        }

        let suite_id = parse_cipher_suite_ids(&self.config.supported_cipher_suites, &client_hello.cipher_suites)?;
        self.suite_id = Some(suite_id);
        let factory = self
            .config
            .cipher_suite_factory
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?;
        let mut suite = factory.create(suite_id)?;

        use crate::config::ClientAuthType;
        self.request_client_cert = !matches!(self.config.client_auth, ClientAuthType::NoClientCert);

        let response_extensions = self.negotiate_extensions(&client_hello, suite_id)?;

        self.push_remote(&handshake);

        self.session_id = if self.config.use_no_server_session_id {
            vec![]
        } else {
            client_hello.random.random_bytes.to_vec()
        };

        let server_random = HandshakeRandom::generate();
        self.server_random = Some(server_random.clone());

        let mut out_messages = vec![];

        let server_hello = ServerHello {
            version: DTLS1_2,
            random: server_random,
            session_id: self.session_id.clone(),
            cipher_suite: suite_id,
            compression_method: CompressionMethodId::Null,
            extensions: response_extensions,
        };
        out_messages.push(self.push_local(HandshakeMessage::ServerHello(server_hello)));

        if suite_id.is_certificate() {
            out_messages.push(self.push_local(HandshakeMessage::Certificate(Certificate {
                certificate_chain: self.config.own_certificate_chain.clone(),
            })));

            let public_key = suite.generate_ecdhe_keypair(NamedGroup::X25519)?;
            out_messages.push(self.push_local(HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Ecdhe {
                named_group: NamedGroup::X25519,
                public_key,
                algorithm: crate::signature_hash_algorithm::SignatureHashAlgorithm {
                    hash: crate::signature_hash_algorithm::HashAlgorithm::Sha256,
                    signature: crate::signature_hash_algorithm::SignatureAlgorithm::Ecdsa,
                },
                signature: vec![],
            })));
        } else {
            out_messages.push(self.push_local(HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Psk {
                identity_hint: self.config.psk_identity_hint.clone(),
            })));
        }

        if self.request_client_cert {
            out_messages.push(self.push_local(HandshakeMessage::CertificateRequest(CertificateRequest {
                certificate_types: vec![crate::client_certificate_type::ClientCertificateType::EcdsaSign],
                signature_hash_algorithms: vec![crate::signature_hash_algorithm::SignatureHashAlgorithm {
                    hash: crate::signature_hash_algorithm::HashAlgorithm::Sha256,
                    signature: crate::signature_hash_algorithm::SignatureAlgorithm::Ecdsa,
                }],
            })));
        }

        out_messages.push(self.push_local(HandshakeMessage::ServerHelloDone(ServerHelloDone)));

        self.suite = Some(suite);
        self.state = State::WaitClientFlight5;

        let tagged = out_messages.into_iter().map(|h| (h, false)).collect();
        Ok(StepOutput {
            messages: tagged,
            change_cipher_spec_before_last: false,
            established: None,
            flight: Flight::F4,
        })
    }

    /// R2: resumes a cached session instead of running the full
    /// Certificate/KeyExchange exchange. `master_secret` is reused
    /// verbatim; only the randoms (and thus the key block and Finished
    /// verify_data) are fresh, per RFC 5246 §7.3.
    async fn server_resume(&mut self, handshake: Handshake, client_hello: ClientHello, cached: Session) -> Result<StepOutput> {
        self.push_remote(&handshake);
        self.session_id = cached.id.clone();
        self.suite_id = Some(cached.cipher_suite);

        let factory = self
            .config
            .cipher_suite_factory
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?;
        let mut suite = factory.create(cached.cipher_suite)?;

        let server_random = HandshakeRandom::generate();
        self.server_random = Some(server_random.clone());

        let server_hello = ServerHello {
            version: DTLS1_2,
            random: server_random.clone(),
            session_id: self.session_id.clone(),
            cipher_suite: cached.cipher_suite,
            compression_method: CompressionMethodId::Null,
            extensions: vec![],
        };
        let sh_handshake = self.push_local(HandshakeMessage::ServerHello(server_hello));

        let client_random_bytes = client_hello.random.marshal_fixed().to_vec();
        let server_random_bytes = server_random.marshal_fixed().to_vec();
        let master_secret = cached.master_secret.clone();
        suite.init(&master_secret, &client_random_bytes, &server_random_bytes, false)?;

        let own_verify_data = {
            let hash = self.transcript.hash(suite.hash_func());
            suite.prf(&master_secret, b"server finished", &hash, VERIFY_DATA_LENGTH)
        };
        let finished_handshake = self.push_local(HandshakeMessage::Finished(Finished {
            verify_data: own_verify_data,
        }));

        self.suite = Some(suite);
        self.pending_session = Some(Session {
            id: self.session_id.clone(),
            cipher_suite: cached.cipher_suite,
            master_secret,
            client_random: client_random_bytes,
            server_random: server_random_bytes,
            extended_master_secret: cached.extended_master_secret,
        });
        self.state = State::WaitClientFinishedResume;

        Ok(StepOutput {
            messages: vec![(sh_handshake, false), (finished_handshake, true)],
            change_cipher_spec_before_last: true,
            established: None,
            flight: Flight::R2,
        })
    }

    /// R3: the client's CCS+Finished confirming it derived the same
    /// master secret. Terminal for the client; the server only now
    /// reports the session established.
    async fn server_handle_resume_finished(&mut self, messages: Vec<Handshake>) -> Result<StepOutput> {
        if messages.len() != 1 {
            return Err(Error::UnexpectedMessage);
        }
        let handshake = &messages[0];
        let finished = match &handshake.message {
            HandshakeMessage::Finished(f) => f.clone(),
            _ => return Err(Error::UnexpectedMessage),
        };

        let session = self.pending_session.take().ok_or(Error::ErrCipherSuiteUnset)?;
        let suite = self.suite.as_ref().ok_or(Error::ErrCipherSuiteUnset)?;

        let expected = {
            let hash = self.transcript.hash(suite.hash_func());
            suite.prf(&session.master_secret, b"client finished", &hash, VERIFY_DATA_LENGTH)
        };
        if expected != finished.verify_data {
            return Err(Error::ErrVerifyDataMismatch);
        }
        self.push_remote(handshake);

        self.state = State::Established;

        Ok(StepOutput {
            messages: vec![],
            change_cipher_spec_before_last: false,
            established: Some(session),
            flight: Flight::R3,
        })
    }

    /// Pushes one individually-reassembled flight-5 message into the
    /// transcript as soon as it arrives, rather than waiting for the
    /// whole flight. ClientKeyExchange additionally triggers key
    /// derivation right away: the Finished message right behind it on
    /// the wire is already epoch-1 encrypted, so the cipher suite must
    /// be initialized before `Connection` can even decrypt that record.
    /// Callers must not invoke this for a Finished message -- its
    /// verify_data covers the transcript hash excluding itself, so
    /// `server_handle_flight5` pushes it separately once that hash is
    /// taken.
    pub async fn observe_flight5_message(&mut self, handshake: &Handshake) -> Result<()> {
        match &handshake.message {
            HandshakeMessage::Certificate(cert) => {
                if cert.certificate_chain.is_empty() && self.request_client_cert {
                    use crate::config::ClientAuthType;
                    if matches!(
                        self.config.client_auth,
                        ClientAuthType::RequireAnyClientCert | ClientAuthType::RequireAndVerifyClientCert
                    ) {
                        return Err(Error::ErrClientCertificateRequired);
                    }
                }
                self.client_certificate_chain = Some(cert.certificate_chain.clone());
                self.push_remote(handshake);
                Ok(())
            }
            HandshakeMessage::ClientKeyExchange(cke) => {
                let cke = cke.clone();
                self.push_remote(handshake);
                self.init_suite_from_client_key_exchange(&cke).await
            }
            HandshakeMessage::CertificateVerify(_) => {
                self.push_remote(handshake);
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    async fn init_suite_from_client_key_exchange(&mut self, cke: &ClientKeyExchange) -> Result<()> {
        let pre_master_secret = self.derive_pre_master_secret(cke).await?;

        let client_random_bytes = self
            .client_random
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?
            .marshal_fixed()
            .to_vec();
        let server_random_bytes = self
            .server_random
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?
            .marshal_fixed()
            .to_vec();

        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(&client_random_bytes);
        seed.extend_from_slice(&server_random_bytes);

        let suite = self.suite.as_mut().ok_or(Error::ErrCipherSuiteUnset)?;
        let master_secret = suite.prf(&pre_master_secret, b"master secret", &seed, 48);
        suite.init(&master_secret, &client_random_bytes, &server_random_bytes, false)?;
        self.master_secret = Some(master_secret);
        Ok(())
    }

    async fn server_handle_flight5(&mut self, messages: Vec<Handshake>) -> Result<StepOutput> {
        let mut saw_client_key_exchange = false;
        let mut finished: Option<Finished> = None;
        let mut finished_handshake: Option<&Handshake> = None;

        for handshake in &messages {
            match &handshake.message {
                HandshakeMessage::Certificate(_) | HandshakeMessage::CertificateVerify(_) => {}
                HandshakeMessage::ClientKeyExchange(_) => saw_client_key_exchange = true,
                HandshakeMessage::Finished(f) => {
                    // Held back: verify_data covers the transcript hash
                    // *excluding* this Finished message, so it must not
                    // be pushed until after that hash is taken below.
                    finished = Some(f.clone());
                    finished_handshake = Some(handshake);
                }
                _ => return Err(Error::UnexpectedMessage),
            }
        }

        if !saw_client_key_exchange {
            return Err(Error::UnexpectedMessage);
        }
        let finished = finished.ok_or(Error::UnexpectedMessage)?;
        let finished_handshake = finished_handshake.ok_or(Error::UnexpectedMessage)?.clone();

        let client_random_bytes = self
            .client_random
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?
            .marshal_fixed()
            .to_vec();
        let server_random_bytes = self
            .server_random
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?
            .marshal_fixed()
            .to_vec();

        // Already derived and used to initialize the suite as soon as
        // ClientKeyExchange was reassembled, via `observe_flight5_message`.
        let master_secret = self.master_secret.clone().ok_or(Error::ErrCipherSuiteUnset)?;

        let expected = {
            let suite = self.suite.as_ref().ok_or(Error::ErrCipherSuiteUnset)?;
            let hash_before_finished = self.transcript.hash(suite.hash_func());
            suite.prf(&master_secret, b"client finished", &hash_before_finished, VERIFY_DATA_LENGTH)
        };
        if expected != finished.verify_data {
            return Err(Error::ErrVerifyDataMismatch);
        }

        // Only now does the client's Finished join the transcript: its
        // own verify_data was computed over the transcript without it.
        self.push_remote(&finished_handshake);

        let own_verify_data = {
            let suite = self.suite.as_ref().ok_or(Error::ErrCipherSuiteUnset)?;
            let hash_after_finished = self.transcript.hash(suite.hash_func());
            suite.prf(&master_secret, b"server finished", &hash_after_finished, VERIFY_DATA_LENGTH)
        };
        let own_finished = self.push_local(HandshakeMessage::Finished(Finished {
            verify_data: own_verify_data,
        }));

        self.state = State::Established;

        let session = Session {
            id: self.session_id.clone(),
            cipher_suite: self.suite_id.expect("cipher suite negotiated before flight 5"),
            master_secret,
            client_random: client_random_bytes,
            server_random: server_random_bytes,
            extended_master_secret: false,
        };

        Ok(StepOutput {
            messages: vec![(own_finished, true)],
            change_cipher_spec_before_last: true,
            established: Some(session),
            flight: Flight::F6,
        })
    }

    async fn client_handle_flight4(&mut self, messages: Vec<Handshake>) -> Result<StepOutput> {
        if messages.len() == 1 {
            if let HandshakeMessage::HelloVerifyRequest(hvr) = &messages[0].message {
                return self.client_resend_with_cookie(hvr.clone());
            }
        }

        // R2: the server accepted resumption and answered with just
        // ServerHello + Finished (no ServerHelloDone, no key exchange).
        // A server that declines falls through to the full F4 path below.
        if self.resume_session.is_some()
            && messages.len() == 2
            && matches!(messages[0].message, HandshakeMessage::ServerHello(_))
            && matches!(messages[1].message, HandshakeMessage::Finished(_))
        {
            return self.client_handle_resume_reply(messages).await;
        }

        let last = messages.last().ok_or(Error::UnexpectedMessage)?;
        if !matches!(last.message, HandshakeMessage::ServerHelloDone(_)) {
            return Err(Error::UnexpectedMessage);
        }

        let mut server_hello: Option<ServerHello> = None;
        let mut server_key_exchange: Option<ServerKeyExchange> = None;
        let mut certificate: Option<Certificate> = None;
        let mut cert_requested = false;

        for handshake in &messages {
            match &handshake.message {
                HandshakeMessage::ServerHello(sh) => server_hello = Some(sh.clone()),
                HandshakeMessage::Certificate(c) => certificate = Some(c.clone()),
                HandshakeMessage::ServerKeyExchange(ske) => server_key_exchange = Some(ske.clone()),
                HandshakeMessage::CertificateRequest(_) => cert_requested = true,
                HandshakeMessage::ServerHelloDone(_) => {}
                _ => return Err(Error::UnexpectedMessage),
            }
            self.push_remote(handshake);
        }

        let server_hello = server_hello.ok_or(Error::UnexpectedMessage)?;
        self.server_random = Some(server_hello.random.clone());
        self.session_id = server_hello.session_id.clone();
        self.suite_id = Some(server_hello.cipher_suite);
        self.apply_server_hello_extensions(&server_hello.extensions);

        let factory = self
            .config
            .cipher_suite_factory
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?;
        let mut suite = factory.create(server_hello.cipher_suite)?;

        if let Some(cert) = &certificate {
            if let Some(verifier) = &self.config.certificate_verifier {
                verifier.verify(&cert.certificate_chain, &self.config.server_name).await?;
            }
        }

        let mut out_messages = vec![];

        if cert_requested {
            out_messages.push(self.push_local(HandshakeMessage::Certificate(Certificate {
                certificate_chain: self.config.own_certificate_chain.clone(),
            })));
        }

        let (cke_message, pre_master_secret) = match server_key_exchange {
            Some(ServerKeyExchange::Ecdhe { public_key, named_group, .. }) => {
                let own_public = suite.generate_ecdhe_keypair(named_group)?;
                let shared = suite.compute_ecdhe_shared_secret(&public_key)?;
                (ClientKeyExchange::PublicKey(own_public), shared)
            }
            Some(ServerKeyExchange::Psk { identity_hint }) => {
                let psk = match &self.config.psk_store {
                    Some(store) => store.get_key(&identity_hint).await?,
                    None => return Err(Error::UnknownPskIdentity),
                };
                self.psk_identity_hint = identity_hint.clone();
                (
                    ClientKeyExchange::Psk {
                        identity_hint,
                    },
                    psk_pre_master_secret(&psk),
                )
            }
            None => return Err(Error::ErrCipherSuiteUnset),
        };

        out_messages.push(self.push_local(HandshakeMessage::ClientKeyExchange(cke_message)));

        if cert_requested {
            out_messages.push(self.push_local(HandshakeMessage::CertificateVerify(CertificateVerify {
                algorithm: crate::signature_hash_algorithm::SignatureHashAlgorithm {
                    hash: crate::signature_hash_algorithm::HashAlgorithm::Sha256,
                    signature: crate::signature_hash_algorithm::SignatureAlgorithm::Ecdsa,
                },
                signature: vec![],
            })));
        }

        let client_random = self.client_random.clone().ok_or(Error::ErrCipherSuiteUnset)?;
        let server_random = self.server_random.clone().ok_or(Error::ErrCipherSuiteUnset)?;

        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(&client_random.marshal_fixed());
        seed.extend_from_slice(&server_random.marshal_fixed());
        let master_secret = suite.prf(&pre_master_secret, b"master secret", &seed, 48);
        suite.init(&master_secret, &client_random.marshal_fixed(), &server_random.marshal_fixed(), true)?;

        let hash = self.transcript.hash(suite.hash_func());
        let verify_data = suite.prf(&master_secret, b"client finished", &hash, VERIFY_DATA_LENGTH);
        out_messages.push(self.push_local(HandshakeMessage::Finished(Finished { verify_data })));

        self.suite = Some(suite);
        self.state = State::WaitServerFinished;

        self.pending_session = Some(Session {
            id: self.session_id.clone(),
            cipher_suite: self.suite_id.expect("set above"),
            master_secret,
            client_random: client_random.marshal_fixed().to_vec(),
            server_random: server_random.marshal_fixed().to_vec(),
            extended_master_secret: false,
        });

        let last_index = out_messages.len() - 1;
        let tagged = out_messages
            .into_iter()
            .enumerate()
            .map(|(i, h)| (h, i == last_index))
            .collect();

        Ok(StepOutput {
            messages: tagged,
            change_cipher_spec_before_last: true,
            established: None,
            flight: Flight::F5,
        })
    }

    fn client_resend_with_cookie(&mut self, hvr: HelloVerifyRequest) -> Result<StepOutput> {
        let random = self.client_random.clone().ok_or(Error::ErrCipherSuiteUnset)?;
        // Same message_sequence (0) as the cookie-less send: the two
        // share one logical "message 0" slot, only the second of which
        // counts toward the transcript.
        let handshake = self.build_client_hello(random, hvr.cookie);
        Ok(StepOutput {
            messages: vec![(handshake, false)],
            change_cipher_spec_before_last: false,
            established: None,
            flight: if self.resume_session.is_some() { Flight::R1 } else { Flight::F3 },
        })
    }

    /// The client side of R2/R3: verify the server's resumed Finished,
    /// then answer with CCS+Finished (R3, terminal for the client).
    async fn client_handle_resume_reply(&mut self, mut messages: Vec<Handshake>) -> Result<StepOutput> {
        let finished_handshake = messages.pop().expect("checked len == 2 by caller");
        let finished = match &finished_handshake.message {
            HandshakeMessage::Finished(f) => f.clone(),
            _ => return Err(Error::UnexpectedMessage),
        };
        let server_hello_handshake = messages.pop().expect("checked len == 2 by caller");
        let server_hello = match &server_hello_handshake.message {
            HandshakeMessage::ServerHello(sh) => sh.clone(),
            _ => return Err(Error::UnexpectedMessage),
        };

        let resume = self.resume_session.clone().ok_or(Error::UnexpectedMessage)?;
        if server_hello.session_id != resume.id || server_hello.cipher_suite != resume.cipher_suite {
            return Err(Error::UnexpectedMessage);
        }

        self.push_remote(&server_hello_handshake);
        self.server_random = Some(server_hello.random.clone());
        self.session_id = server_hello.session_id.clone();
        self.suite_id = Some(server_hello.cipher_suite);

        let factory = self
            .config
            .cipher_suite_factory
            .as_ref()
            .ok_or(Error::ErrCipherSuiteUnset)?;
        let mut suite = factory.create(server_hello.cipher_suite)?;

        let client_random = self.client_random.clone().ok_or(Error::ErrCipherSuiteUnset)?;
        let server_random_bytes = server_hello.random.marshal_fixed().to_vec();
        let master_secret = resume.master_secret.clone();
        suite.init(&master_secret, &client_random.marshal_fixed(), &server_random_bytes, true)?;

        let expected = {
            let hash_before_finished = self.transcript.hash(suite.hash_func());
            suite.prf(&master_secret, b"server finished", &hash_before_finished, VERIFY_DATA_LENGTH)
        };
        if expected != finished.verify_data {
            return Err(Error::ErrVerifyDataMismatch);
        }
        self.push_remote(&finished_handshake);

        let own_verify_data = {
            let hash_after_finished = self.transcript.hash(suite.hash_func());
            suite.prf(&master_secret, b"client finished", &hash_after_finished, VERIFY_DATA_LENGTH)
        };
        let own_finished = self.push_local(HandshakeMessage::Finished(Finished {
            verify_data: own_verify_data,
        }));

        self.suite = Some(suite);
        self.state = State::Established;

        let session = Session {
            id: self.session_id.clone(),
            cipher_suite: server_hello.cipher_suite,
            master_secret,
            client_random: client_random.marshal_fixed().to_vec(),
            server_random: server_random_bytes,
            extended_master_secret: resume.extended_master_secret,
        };

        Ok(StepOutput {
            messages: vec![(own_finished, true)],
            change_cipher_spec_before_last: true,
            established: Some(session),
            flight: Flight::R3,
        })
    }

    async fn client_handle_flight6(&mut self, messages: Vec<Handshake>) -> Result<StepOutput> {
        if messages.len() != 1 {
            return Err(Error::UnexpectedMessage);
        }
        let finished = match &messages[0].message {
            HandshakeMessage::Finished(f) => f.clone(),
            _ => return Err(Error::UnexpectedMessage),
        };

        let session = self.pending_session.take().ok_or(Error::ErrCipherSuiteUnset)?;
        let suite = self.suite.as_ref().ok_or(Error::ErrCipherSuiteUnset)?;

        let hash = self.transcript.hash(suite.hash_func());
        let expected = suite.prf(&session.master_secret, b"server finished", &hash, VERIFY_DATA_LENGTH);
        if expected != finished.verify_data {
            return Err(Error::ErrVerifyDataMismatch);
        }
        self.push_remote(&messages[0]);

        self.state = State::Established;

        Ok(StepOutput {
            messages: vec![],
            change_cipher_spec_before_last: false,
            established: Some(session),
            flight: Flight::F6,
        })
    }

    async fn derive_pre_master_secret(&mut self, cke: &ClientKeyExchange) -> Result<Vec<u8>> {
        match cke {
            ClientKeyExchange::PublicKey(peer_public) => {
                let suite = self.suite.as_ref().ok_or(Error::ErrCipherSuiteUnset)?;
                suite.compute_ecdhe_shared_secret(peer_public)
            }
            ClientKeyExchange::Psk { identity_hint } => {
                let store = self.config.psk_store.as_ref().ok_or(Error::UnknownPskIdentity)?;
                let psk = store.get_key(identity_hint).await?;
                self.psk_identity_hint = identity_hint.clone();
                Ok(psk_pre_master_secret(&psk))
            }
        }
    }

    pub fn fatal_alert(&self) -> AlertDescription {
        AlertDescription::HandshakeFailure
    }

    /// Whoever the peer turned out to be, once negotiated: a PSK identity
    /// hint, a certificate chain, or neither (resumption reuses whatever
    /// the original handshake established, so callers on that path should
    /// consult the cached `Session`/ticket instead).
    pub fn peer_identity(&self) -> PeerIdentity {
        if let Some(chain) = &self.client_certificate_chain {
            PeerIdentity::Certificate(chain.clone())
        } else if !self.psk_identity_hint.is_empty() {
            PeerIdentity::Psk(self.psk_identity_hint.clone())
        } else {
            PeerIdentity::None
        }
    }
}

fn fragment_code_bytes(code: FragmentLengthCode) -> usize {
    match code {
        FragmentLengthCode::Bits512 => 512,
        FragmentLengthCode::Bits1024 => 1024,
        FragmentLengthCode::Bits2048 => 2048,
        FragmentLengthCode::Bits4096 => 4096,
    }
}

/// RFC 4279 §2: `uint16 len(psk) || psk_len zero bytes || uint16 len(psk) || psk`.
fn psk_pre_master_secret(psk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2 * psk.len());
    out.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    out.extend(std::iter::repeat(0u8).take(psk.len()));
    out.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    out.extend_from_slice(psk);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psk_pre_master_secret_has_expected_shape() {
        let pms = psk_pre_master_secret(b"secret");
        assert_eq!(pms.len(), 4 + 2 * 6);
        assert_eq!(&pms[0..2], &6u16.to_be_bytes());
        assert!(pms[2..8].iter().all(|&b| b == 0));
        assert_eq!(&pms[8..10], &6u16.to_be_bytes());
        assert_eq!(&pms[10..], b"secret");
    }
}
