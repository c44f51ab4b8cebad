use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Stateless HelloVerifyRequest cookies, generated from an HMAC over
/// the client's address and ClientHello contents (RFC 6347 §4.2.1's
/// "technique of [PHOTURIS]"). This is the one crypto primitive kept
/// in-core rather than pushed to a `CipherSuite` collaborator, since
/// it has to work before any cipher suite is negotiated.
pub struct CookieGenerator {
    secret: [u8; 32],
}

impl CookieGenerator {
    pub fn new(secret: [u8; 32]) -> Self {
        CookieGenerator { secret }
    }

    pub fn generate(&self, client_addr: &[u8], client_hello_random: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_varkey(&self.secret).expect("hmac accepts any key length");
        mac.update(client_addr);
        mac.update(client_hello_random);
        mac.finalize().into_bytes().to_vec()
    }

    pub fn verify(&self, cookie: &[u8], client_addr: &[u8], client_hello_random: &[u8]) -> Result<()> {
        let expected = self.generate(client_addr, client_hello_random);
        if subtle::ConstantTimeEq::ct_eq(expected.as_slice(), cookie).into() {
            Ok(())
        } else {
            Err(Error::ErrCookieMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let gen = CookieGenerator::new([7u8; 32]);
        let cookie = gen.generate(b"127.0.0.1:1234", b"random-bytes");
        assert!(gen.verify(&cookie, b"127.0.0.1:1234", b"random-bytes").is_ok());
    }

    #[test]
    fn rejects_mismatched_address() {
        let gen = CookieGenerator::new([7u8; 32]);
        let cookie = gen.generate(b"127.0.0.1:1234", b"random-bytes");
        assert!(gen.verify(&cookie, b"127.0.0.1:5555", b"random-bytes").is_err());
    }
}
