//! Ephemeral ECDHE key agreement.

use p256::ecdh::EphemeralSecret as P256Secret;
use p256::PublicKey as P256PublicKey;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret as X25519Secret, PublicKey as X25519PublicKey};

use crate::buffer::Buf;
use crate::types::{NamedCurve, ProtocolVersion};
use crate::SeededRng;

/// An in-progress ephemeral key agreement.
///
/// Completing the agreement consumes the secret; there is no way to reuse
/// an ephemeral key for a second peer.
pub enum KeyExchange {
    P256 {
        secret: P256Secret,
        public_key: Vec<u8>,
    },
    X25519 {
        secret: X25519Secret,
        public_key: Vec<u8>,
    },
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyExchange::P256 { public_key, .. } => f
                .debug_struct("KeyExchange::P256")
                .field("public_key_len", &public_key.len())
                .finish_non_exhaustive(),
            KeyExchange::X25519 { public_key, .. } => f
                .debug_struct("KeyExchange::X25519")
                .field("public_key_len", &public_key.len())
                .finish_non_exhaustive(),
        }
    }
}

impl KeyExchange {
    pub fn new(curve: NamedCurve) -> Result<Self, String> {
        match curve {
            NamedCurve::Secp256r1 => {
                let secret = P256Secret::random(&mut OsRng);
                let public_key = P256PublicKey::from(&secret).to_sec1_bytes().to_vec();
                Ok(KeyExchange::P256 { secret, public_key })
            }
            NamedCurve::X25519 => {
                let secret = X25519Secret::random_from_rng(OsRng);
                let public_key = X25519PublicKey::from(&secret).as_bytes().to_vec();
                Ok(KeyExchange::X25519 { secret, public_key })
            }
            NamedCurve::Unknown(v) => Err(format!("Unsupported curve: {}", v)),
        }
    }

    pub fn public_key(&self) -> &[u8] {
        match self {
            KeyExchange::P256 { public_key, .. } => public_key,
            KeyExchange::X25519 { public_key, .. } => public_key,
        }
    }

    pub fn curve(&self) -> NamedCurve {
        match self {
            KeyExchange::P256 { .. } => NamedCurve::Secp256r1,
            KeyExchange::X25519 { .. } => NamedCurve::X25519,
        }
    }

    /// Complete the agreement with the peer's public key, writing the
    /// shared secret into `out`.
    pub fn complete(self, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        match self {
            KeyExchange::P256 { secret, .. } => {
                let peer_key = P256PublicKey::from_sec1_bytes(peer_pub)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let shared_secret = secret.diffie_hellman(&peer_key);
                out.clear();
                out.extend_from_slice(shared_secret.raw_secret_bytes().as_slice());
                Ok(())
            }
            KeyExchange::X25519 { secret, .. } => {
                let peer_bytes: [u8; 32] = peer_pub
                    .try_into()
                    .map_err(|_| "Invalid X25519 public key".to_string())?;
                let peer_key = X25519PublicKey::from(peer_bytes);
                let shared_secret = secret.diffie_hellman(&peer_key);
                if !shared_secret.was_contributory() {
                    return Err("X25519 peer key is a low-order point".to_string());
                }
                out.clear();
                out.extend_from_slice(shared_secret.as_bytes());
                Ok(())
            }
        }
    }
}

/// Premaster secret for static RSA key exchange (RFC 5246 Section 7.4.7.1).
///
/// The first two bytes carry the client's offered protocol version, checked
/// by the server against the ClientHello to detect rollback.
pub fn rsa_pre_master_secret(client_version: ProtocolVersion, rng: &mut SeededRng) -> [u8; 48] {
    let mut pms = [0u8; 48];
    rng.fill_bytes(&mut pms);
    let version = client_version.as_u16().to_be_bytes();
    pms[0] = version[0];
    pms[1] = version[1];
    pms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p256_agreement_matches() {
        let a = KeyExchange::new(NamedCurve::Secp256r1).unwrap();
        let b = KeyExchange::new(NamedCurve::Secp256r1).unwrap();

        let a_pub = a.public_key().to_vec();
        let b_pub = b.public_key().to_vec();
        assert_eq!(a_pub.len(), 65);

        let mut secret_a = Buf::new();
        let mut secret_b = Buf::new();
        a.complete(&b_pub, &mut secret_a).unwrap();
        b.complete(&a_pub, &mut secret_b).unwrap();

        assert_eq!(&secret_a[..], &secret_b[..]);
        assert_eq!(secret_a.len(), 32);
    }

    #[test]
    fn x25519_agreement_matches() {
        let a = KeyExchange::new(NamedCurve::X25519).unwrap();
        let b = KeyExchange::new(NamedCurve::X25519).unwrap();

        let a_pub = a.public_key().to_vec();
        let b_pub = b.public_key().to_vec();
        assert_eq!(a_pub.len(), 32);

        let mut secret_a = Buf::new();
        let mut secret_b = Buf::new();
        a.complete(&b_pub, &mut secret_a).unwrap();
        b.complete(&a_pub, &mut secret_b).unwrap();

        assert_eq!(&secret_a[..], &secret_b[..]);
    }

    #[test]
    fn rsa_premaster_carries_version() {
        let mut rng = SeededRng::new(Some(1));
        let pms = rsa_pre_master_secret(ProtocolVersion::TLS1_2, &mut rng);
        assert_eq!(&pms[..2], &[0x03, 0x03]);

        let pms = rsa_pre_master_secret(ProtocolVersion::DTLS1_2, &mut rng);
        assert_eq!(&pms[..2], &[0xfe, 0xfd]);
    }
}
