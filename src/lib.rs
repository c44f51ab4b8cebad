#![warn(rust_2018_idioms)]

//! A pure Rust DTLS 1.2 endpoint core (RFC 6347), scoped to the
//! handshake, record layer, and connection management. AEAD/PRF/ECDHE
//! math, certificate verification, and PSK lookup are supplied by an
//! embedder through the traits in [`cipher_suite`] and [`services`];
//! this crate negotiates, frames, fragments, retransmits, and replay-
//! protects around them.

pub mod alert;
pub mod application_data;
pub mod change_cipher_spec;
pub mod cipher_suite;
pub mod client_certificate_type;
pub mod compression_methods;
pub mod config;
pub mod connection;
pub mod connection_store;
pub mod connector;
pub mod content;
pub mod cookie;
pub mod error;
pub mod extension;
pub mod flight;
pub mod handshake;
pub mod handshaker;
pub mod reassembler;
pub mod record_layer;
pub mod services;
pub mod session;
pub mod signature_hash_algorithm;

pub use config::{ClientAuthType, Config};
pub use connection::{Connection, ConnectionEvent};
pub use connector::{Connector, Inbound};
pub use error::{Error, Result};
pub use handshaker::PeerIdentity;
pub use session::Session;
