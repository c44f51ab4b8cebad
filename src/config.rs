use std::sync::Arc;
use std::time::Duration;

use crate::cipher_suite::{CipherSuiteFactory, CipherSuiteId};
use crate::error::{Error, Result};
use crate::extension::certificate_type::CertificateType;
use crate::services::{CertificateVerifier, EventSink, PskStore, RawKeyVerifier, SessionCache};

/// Server policy for requesting a client certificate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientAuthType {
    NoClientCert,
    RequestClientCert,
    RequireAnyClientCert,
    VerifyClientCertIfGiven,
    RequireAndVerifyClientCert,
}

/// Configuration shared by every connection a `Connector` manages.
/// Once handed to a `Connector` it is not mutated again.
#[derive(Clone)]
pub struct Config {
    pub supported_cipher_suites: Vec<CipherSuiteId>,
    pub cipher_suite_factory: Option<Arc<dyn CipherSuiteFactory>>,
    pub client_auth: ClientAuthType,
    pub trust_certificate_types: Vec<CertificateType>,
    pub identity_certificate_types: Vec<CertificateType>,
    pub own_certificate_chain: Vec<Vec<u8>>,
    pub psk_store: Option<Arc<dyn PskStore>>,
    pub psk_identity_hint: Vec<u8>,
    pub certificate_verifier: Option<Arc<dyn CertificateVerifier>>,
    pub raw_key_verifier: Option<Arc<dyn RawKeyVerifier>>,
    pub session_cache: Option<Arc<dyn SessionCache>>,
    pub event_sink: Option<Arc<dyn EventSink>>,
    pub server_name: String,
    pub sni_enabled: bool,
    pub use_no_server_session_id: bool,

    pub retransmission_timeout: Duration,
    pub max_retransmissions: u32,
    pub max_connections: usize,
    pub max_fragment_length: usize,
    pub max_deferred_processed_incoming_records_size: usize,
    pub replay_protection_window: usize,
    pub stale_session_timeout: Duration,
    pub connection_id_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            supported_cipher_suites: vec![],
            cipher_suite_factory: None,
            client_auth: ClientAuthType::NoClientCert,
            trust_certificate_types: vec![CertificateType::X509],
            identity_certificate_types: vec![CertificateType::X509],
            own_certificate_chain: vec![],
            psk_store: None,
            psk_identity_hint: vec![],
            certificate_verifier: None,
            raw_key_verifier: None,
            session_cache: None,
            event_sink: None,
            server_name: String::new(),
            sni_enabled: false,
            use_no_server_session_id: false,

            retransmission_timeout: Duration::from_secs(1),
            max_retransmissions: 10,
            max_connections: 4096,
            max_fragment_length: 1200,
            max_deferred_processed_incoming_records_size: 64 * 1024,
            replay_protection_window: 64,
            stale_session_timeout: Duration::from_secs(300),
            connection_id_length: 0,
        }
    }
}

/// Checks the cross-field invariants a `Connector` needs before it can
/// run (PSK callback present whenever a PSK identity hint is configured,
/// a non-empty usable cipher suite set) plus this core's connection-id
/// length bound.
pub fn validate_config(config: &Config) -> Result<()> {
    if !config.psk_identity_hint.is_empty() && config.psk_store.is_none() {
        return Err(Error::ErrIdentityNoPsk);
    }

    let exclude_psk = config.psk_store.is_none();
    let exclude_non_psk = !config.psk_identity_hint.is_empty() && config.psk_store.is_some()
        && config.trust_certificate_types.is_empty();

    let usable = config
        .supported_cipher_suites
        .iter()
        .any(|id| !((exclude_psk && id.is_psk()) || (exclude_non_psk && !id.is_psk())));
    if !config.supported_cipher_suites.is_empty() && !usable {
        return Err(Error::ErrCipherSuiteNoIntersection);
    }

    if config.connection_id_length > 255 {
        return Err(Error::ErrConnectionIdTooLong);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identity_hint_without_psk_store() {
        let mut cfg = Config::default();
        cfg.psk_identity_hint = vec![1, 2, 3];
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&Config::default()).is_ok());
    }
}
