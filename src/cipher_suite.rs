use std::fmt;

use crate::error::{Error, Result};
use crate::record_layer::header::RecordLayerHeader;

/// IANA cipher suite codepoints this core recognises on the wire. The
/// actual key schedule, AEAD, and PRF math are supplied externally
/// through `CipherSuite`; this crate only negotiates and frames.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CipherSuiteId {
    Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256 = 0xc02b,
    Tls_Ecdhe_Rsa_With_Aes_128_Gcm_Sha256 = 0xc02f,
    Tls_Ecdhe_Ecdsa_With_Aes_256_Cbc_Sha = 0xc00a,
    Tls_Ecdhe_Rsa_With_Aes_256_Cbc_Sha = 0xc014,
    Tls_Psk_With_Aes_128_Ccm = 0xc0a4,
    Tls_Psk_With_Aes_128_Ccm_8 = 0xc0a8,
    Tls_Psk_With_Aes_128_Gcm_Sha256 = 0x00a8,
    Unsupported,
}

impl fmt::Display for CipherSuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<u16> for CipherSuiteId {
    fn from(val: u16) -> Self {
        match val {
            0xc02b => CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256,
            0xc02f => CipherSuiteId::Tls_Ecdhe_Rsa_With_Aes_128_Gcm_Sha256,
            0xc00a => CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_256_Cbc_Sha,
            0xc014 => CipherSuiteId::Tls_Ecdhe_Rsa_With_Aes_256_Cbc_Sha,
            0xc0a4 => CipherSuiteId::Tls_Psk_With_Aes_128_Ccm,
            0xc0a8 => CipherSuiteId::Tls_Psk_With_Aes_128_Ccm_8,
            0x00a8 => CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256,
            _ => CipherSuiteId::Unsupported,
        }
    }
}

impl CipherSuiteId {
    pub fn is_psk(&self) -> bool {
        matches!(
            self,
            CipherSuiteId::Tls_Psk_With_Aes_128_Ccm
                | CipherSuiteId::Tls_Psk_With_Aes_128_Ccm_8
                | CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256
        )
    }

    pub fn is_ecdhe(&self) -> bool {
        matches!(
            self,
            CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256
                | CipherSuiteId::Tls_Ecdhe_Rsa_With_Aes_128_Gcm_Sha256
                | CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_256_Cbc_Sha
                | CipherSuiteId::Tls_Ecdhe_Rsa_With_Aes_256_Cbc_Sha
        )
    }

    pub fn is_certificate(&self) -> bool {
        self.is_ecdhe()
    }
}

#[derive(Copy, Clone, Debug)]
pub enum CipherSuiteHash {
    Sha256,
    Sha384,
}

impl CipherSuiteHash {
    pub fn size(&self) -> usize {
        match self {
            CipherSuiteHash::Sha256 => 32,
            CipherSuiteHash::Sha384 => 48,
        }
    }
}

/// Everything epoch >= 1 framing needs from the negotiated crypto: the
/// AEAD/CBC record transform, the transcript hash, and the PRF used to
/// derive `verify_data`. An external collaborator supplies the concrete
/// math (key exchange, AEAD implementation, PRF) behind this trait; the
/// handshaker only calls through it.
pub trait CipherSuite {
    fn id(&self) -> CipherSuiteId;
    fn hash_func(&self) -> CipherSuiteHash;
    fn is_psk(&self) -> bool;
    fn is_initialized(&self) -> bool;

    /// Derives the record-layer keys from the master secret and the two
    /// hello randoms, per RFC 5246 §6.3's key_block expansion.
    fn init(
        &mut self,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        is_client: bool,
    ) -> Result<()>;

    fn encrypt(&self, header: &RecordLayerHeader, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, packet: &[u8]) -> Result<Vec<u8>>;

    /// PRF(master_secret, label, seed) used for both key_block expansion
    /// and the Finished message's verify_data (RFC 5246 §5).
    fn prf(&self, secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8>;

    /// Generates an ephemeral key pair for `group`, keeping the private
    /// half internally, and returns the public key bytes to place on the
    /// wire in ServerKeyExchange/ClientKeyExchange. Only called for
    /// ECDHE suites.
    fn generate_ecdhe_keypair(&mut self, group: crate::extension::named_group::NamedGroup) -> Result<Vec<u8>>;

    /// Performs ECDH against the peer's public key and this suite's own
    /// previously generated ephemeral private key, returning the raw
    /// shared secret (the pre_master_secret for ECDHE suites).
    fn compute_ecdhe_shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>>;
}

/// Builds the concrete `CipherSuite` implementation for a negotiated id.
/// Kept separate from the trait itself so a handshaker can ask for a
/// fresh, uninitialized instance once negotiation has picked an id.
pub trait CipherSuiteFactory: Send + Sync {
    fn create(&self, id: CipherSuiteId) -> Result<Box<dyn CipherSuite + Send + Sync>>;
}

/// Picks the negotiated cipher suite: the first entry in the client's
/// `offered` list, in the client's own preference order, that also
/// appears in the server's configured `supported` set (RFC 5246 §7.4.1.2).
/// Preference is the client's, not the server's.
pub(crate) fn parse_cipher_suite_ids(
    supported: &[CipherSuiteId],
    offered: &[CipherSuiteId],
) -> Result<CipherSuiteId> {
    for id in offered {
        if supported.contains(id) {
            return Ok(*id);
        }
    }
    Err(Error::ErrCipherSuiteNoIntersection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_client_preference_in_intersection() {
        let supported = vec![
            CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256,
            CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256,
        ];
        let offered = vec![
            CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256,
            CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256,
        ];
        assert_eq!(
            parse_cipher_suite_ids(&supported, &offered).unwrap(),
            CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256
        );
    }

    #[test]
    fn no_intersection_errors() {
        let supported = vec![CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256];
        let offered = vec![CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_256_Cbc_Sha];
        assert!(parse_cipher_suite_ids(&supported, &offered).is_err());
    }
}
