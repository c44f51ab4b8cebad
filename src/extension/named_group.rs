/// Named elliptic curve groups a peer may offer for ECDHE, per RFC 8422
/// §5.1.1. The actual key exchange math lives with the `CipherSuite`
/// collaborator; this core only negotiates the identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NamedGroup {
    P256 = 0x0017,
    P384 = 0x0018,
    X25519 = 0x001d,
    Unsupported,
}

impl From<u16> for NamedGroup {
    fn from(val: u16) -> Self {
        match val {
            0x0017 => NamedGroup::P256,
            0x0018 => NamedGroup::P384,
            0x001d => NamedGroup::X25519,
            _ => NamedGroup::Unsupported,
        }
    }
}
