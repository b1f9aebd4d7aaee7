//! Local credentials (certificate chain plus private key) and peer
//! certificate operations.

use std::str;

use der::{Decode, Encode};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey as EcdsaKey, VerifyingKey};
use pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::buffer::Buf;
use crate::message::CipherSuite;
use crate::types::{HashAlgorithm, ProtocolVersion, SignatureAlgorithm};
use crate::SeededRng;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// A private key we can produce signatures with.
pub enum SigningKey {
    Ecdsa(EcdsaKey),
    Rsa(Box<RsaPrivateKey>),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKey::Ecdsa(_) => f.debug_tuple("SigningKey::Ecdsa").finish(),
            SigningKey::Rsa(_) => f.debug_tuple("SigningKey::Rsa").finish(),
        }
    }
}

impl SigningKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SigningKey::Ecdsa(_) => SignatureAlgorithm::ECDSA,
            SigningKey::Rsa(_) => SignatureAlgorithm::RSA,
        }
    }

    /// Sign `data`, writing the signature into `out` in the wire encoding
    /// (DER for ECDSA, PKCS#1 v1.5 block for RSA).
    pub fn sign(&self, data: &[u8], hash: HashAlgorithm, out: &mut Buf) -> Result<(), String> {
        match self {
            SigningKey::Ecdsa(key) => {
                use signature::hazmat::PrehashSigner;

                let digest: Box<[u8]> = match hash {
                    HashAlgorithm::SHA256 => Box::from(Sha256::digest(data).as_slice()),
                    HashAlgorithm::SHA384 => Box::from(Sha384::digest(data).as_slice()),
                    HashAlgorithm::Unknown(v) => {
                        return Err(format!("Unsupported hash algorithm: {}", v))
                    }
                };

                let signature: EcdsaSignature = key
                    .sign_prehash(&digest)
                    .map_err(|_| "Signing failed".to_string())?;
                let sig_der = signature.to_der();
                out.clear();
                out.extend_from_slice(sig_der.as_bytes());
                Ok(())
            }
            SigningKey::Rsa(key) => {
                let (digest, padding): (Box<[u8]>, _) = match hash {
                    HashAlgorithm::SHA256 => (
                        Box::from(Sha256::digest(data).as_slice()),
                        Pkcs1v15Sign::new::<Sha256>(),
                    ),
                    HashAlgorithm::SHA384 => (
                        Box::from(Sha384::digest(data).as_slice()),
                        Pkcs1v15Sign::new::<Sha384>(),
                    ),
                    HashAlgorithm::Unknown(v) => {
                        return Err(format!("Unsupported hash algorithm: {}", v))
                    }
                };

                let signature = key
                    .sign(padding, &digest)
                    .map_err(|_| "Signing failed".to_string())?;
                out.clear();
                out.extend_from_slice(&signature);
                Ok(())
            }
        }
    }
}

/// The local certificate chain and the private key capability it carries.
///
/// The variant determines which cipher suites the credential can serve:
/// a signing key authenticates ECDHE suites (and, for RSA keys, also
/// static RSA key transport), a decryption-only key serves static RSA
/// exclusively, and an agreement key serves no supported suite at all.
pub enum Credential {
    /// Certificate chain with a key that can sign.
    Signing {
        chain: Vec<Vec<u8>>,
        key: SigningKey,
    },
    /// Certificate chain with an RSA key restricted to decryption.
    Decryption {
        chain: Vec<Vec<u8>>,
        key: Box<RsaPrivateKey>,
    },
    /// Certificate chain with a static (EC)DH key. No supported suite
    /// can be served with this; rejected at configuration time.
    Agreement { chain: Vec<Vec<u8>> },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (name, chain) = match self {
            Credential::Signing { chain, .. } => ("Credential::Signing", chain),
            Credential::Decryption { chain, .. } => ("Credential::Decryption", chain),
            Credential::Agreement { chain } => ("Credential::Agreement", chain),
        };
        f.debug_struct(name)
            .field("chain_len", &chain.len())
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Load a signing credential from a certificate chain and a private key.
    ///
    /// The key may be PKCS#8 DER (EC P-256 or RSA) or PEM wrapping either.
    pub fn load(chain: Vec<Vec<u8>>, key_der: &[u8]) -> Result<Credential, String> {
        if chain.is_empty() {
            return Err("Certificate chain is empty".to_string());
        }

        if let Ok(key) = EcdsaKey::from_pkcs8_der(key_der) {
            return Ok(Credential::Signing {
                chain,
                key: SigningKey::Ecdsa(key),
            });
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(key_der) {
            return Ok(Credential::Signing {
                chain,
                key: SigningKey::Rsa(Box::new(key)),
            });
        }

        // PEM encoded key
        if let Ok(pem_str) = str::from_utf8(key_der) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return Self::load(chain, doc.as_bytes());
                }
            }
        }

        Err("Failed to parse private key in any supported format".to_string())
    }

    /// Generate a self-signed ECDSA P-256 credential.
    pub fn self_signed(common_name: &str) -> Result<Credential, String> {
        use rcgen::{
            Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa,
            KeyPair, PKCS_ECDSA_P256_SHA256,
        };

        let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|_| "Key generation failed".to_string())?;

        let mut params = CertificateParams::new(vec![common_name.to_string()]);

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name.to_string());
        params.distinguished_name = distinguished_name;

        params.is_ca = IsCa::NoCa;
        params.key_pair = Some(key_pair);

        let not_before = time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::days(365);

        let cert = RcgenCertificate::from_params(params)
            .map_err(|_| "Certificate generation failed".to_string())?;
        let cert_der = cert
            .serialize_der()
            .map_err(|_| "Certificate serialization failed".to_string())?;
        let key_der = cert.serialize_private_key_der();

        Credential::load(vec![cert_der], &key_der)
    }

    pub fn chain(&self) -> &[Vec<u8>] {
        match self {
            Credential::Signing { chain, .. } => chain,
            Credential::Decryption { chain, .. } => chain,
            Credential::Agreement { chain } => chain,
        }
    }

    pub fn signing_key(&self) -> Option<&SigningKey> {
        match self {
            Credential::Signing { key, .. } => Some(key),
            _ => None,
        }
    }

    /// The cipher suites this credential can serve, in preference order.
    pub fn supported_suites(&self) -> &'static [CipherSuite] {
        match self {
            Credential::Signing {
                key: SigningKey::Ecdsa(_),
                ..
            } => &[
                CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            ],
            // An RSA signing key can also decrypt a key transport premaster.
            Credential::Signing {
                key: SigningKey::Rsa(_),
                ..
            } => &[
                CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
                CipherSuite::RSA_AES128_GCM_SHA256,
            ],
            Credential::Decryption { .. } => &[CipherSuite::RSA_AES128_GCM_SHA256],
            Credential::Agreement { .. } => &[],
        }
    }

    /// Decrypt a key transport premaster (RFC 5246 Section 7.4.7.1).
    ///
    /// Bad padding or a version mismatch must not be observable to the
    /// peer, so both are replaced with a freshly random premaster and the
    /// handshake proceeds to fail at Finished verification instead.
    pub fn decrypt_pre_master(
        &self,
        ciphertext: &[u8],
        client_version: ProtocolVersion,
        rng: &mut SeededRng,
    ) -> Result<[u8; 48], String> {
        let key = match self {
            Credential::Signing {
                key: SigningKey::Rsa(key),
                ..
            } => key,
            Credential::Decryption { key, .. } => key,
            _ => return Err("Credential cannot decrypt premaster".to_string()),
        };

        let mut random = super::key_exchange::rsa_pre_master_secret(client_version, rng);

        let version = client_version.as_u16().to_be_bytes();
        match key.decrypt(Pkcs1v15Encrypt, ciphertext) {
            Ok(plain) if plain.len() == 48 && plain[0] == version[0] && plain[1] == version[1] => {
                random.copy_from_slice(&plain);
            }
            _ => {
                // keep the random premaster
            }
        }

        Ok(random)
    }
}

/// Encrypt a premaster to the RSA public key in `cert_der`.
pub fn encrypt_pre_master(cert_der: &[u8], pre_master: &[u8; 48]) -> Result<Vec<u8>, String> {
    let public_key = rsa_public_key(cert_der)?;
    public_key
        .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, pre_master)
        .map_err(|_| "RSA encryption failed".to_string())
}

/// Verify a signature against the public key in `cert_der`.
pub fn verify_signature(
    cert_der: &[u8],
    data: &[u8],
    signature: &[u8],
    hash_alg: HashAlgorithm,
    sig_alg: SignatureAlgorithm,
) -> Result<(), String> {
    let digest: Box<[u8]> = match hash_alg {
        HashAlgorithm::SHA256 => Box::from(Sha256::digest(data).as_slice()),
        HashAlgorithm::SHA384 => Box::from(Sha384::digest(data).as_slice()),
        HashAlgorithm::Unknown(v) => return Err(format!("Unsupported hash algorithm: {}", v)),
    };

    match sig_alg {
        SignatureAlgorithm::ECDSA => {
            use signature::hazmat::PrehashVerifier;

            let pubkey_bytes = ec_public_key(cert_der)?;
            let verifying_key = VerifyingKey::from_sec1_bytes(&pubkey_bytes)
                .map_err(|_| "Invalid P-256 public key".to_string())?;
            let sig = EcdsaSignature::from_der(signature)
                .map_err(|_| "Invalid signature format".to_string())?;
            verifying_key
                .verify_prehash(&digest, &sig)
                .map_err(|_| format!("ECDSA signature verification failed for {:?}", hash_alg))
        }
        SignatureAlgorithm::RSA => {
            let padding = match hash_alg {
                HashAlgorithm::SHA256 => Pkcs1v15Sign::new::<Sha256>(),
                HashAlgorithm::SHA384 => Pkcs1v15Sign::new::<Sha384>(),
                // unreachable: digest computation above already rejected
                HashAlgorithm::Unknown(_) => unreachable!(),
            };
            let public_key = rsa_public_key(cert_der)?;
            public_key
                .verify(padding, &digest, signature)
                .map_err(|_| format!("RSA signature verification failed for {:?}", hash_alg))
        }
        SignatureAlgorithm::Unknown(v) => Err(format!("Unsupported signature algorithm: {}", v)),
    }
}

/// Extract the raw SEC1 EC public key point from a certificate.
fn ec_public_key(cert_der: &[u8]) -> Result<Vec<u8>, String> {
    let cert = X509Certificate::from_der(cert_der)
        .map_err(|e| format!("Failed to parse certificate: {e}"))?;
    let spki = &cert.tbs_certificate.subject_public_key_info;

    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(format!(
            "Unsupported public key algorithm: {}",
            spki.algorithm.oid
        ));
    }

    let curve_oid: ObjectIdentifier = spki
        .algorithm
        .parameters
        .as_ref()
        .ok_or("Missing EC curve parameter in certificate")?
        .decode_as()
        .map_err(|_| "Invalid EC curve parameter in certificate".to_string())?;
    if curve_oid != OID_P256 {
        return Err(format!("Unsupported EC curve: {}", curve_oid));
    }

    let pubkey_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| "Invalid EC subject_public_key bitstring".to_string())?;
    Ok(pubkey_bytes.to_vec())
}

/// Extract the RSA public key from a certificate.
fn rsa_public_key(cert_der: &[u8]) -> Result<RsaPublicKey, String> {
    let cert = X509Certificate::from_der(cert_der)
        .map_err(|e| format!("Failed to parse certificate: {e}"))?;
    let spki = &cert.tbs_certificate.subject_public_key_info;

    if spki.algorithm.oid != OID_RSA {
        return Err(format!(
            "Unsupported public key algorithm: {}",
            spki.algorithm.oid
        ));
    }

    let spki_der = spki
        .to_der()
        .map_err(|_| "Failed to re-encode public key".to_string())?;
    RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|_| "Invalid RSA public key".to_string())
}

/// Calculate a SHA-256 certificate fingerprint.
pub fn calculate_fingerprint(cert_der: &[u8]) -> [u8; 32] {
    Sha256::digest(cert_der).into()
}

/// Hook for deciding whether a peer certificate chain is acceptable.
///
/// The engine performs proof-of-possession checks itself (ServerKeyExchange
/// and CertificateVerify signatures); this trait decides trust.
pub trait CertVerifier: std::fmt::Debug + Send + Sync {
    fn verify_certificate(&self, chain: &[&[u8]]) -> Result<(), String>;
}

/// Accepts a leaf certificate whose SHA-256 fingerprint matches a pinned
/// value.
#[derive(Debug)]
pub struct FingerprintVerifier {
    fingerprint: [u8; 32],
}

impl FingerprintVerifier {
    pub fn new(fingerprint: [u8; 32]) -> Self {
        FingerprintVerifier { fingerprint }
    }
}

impl CertVerifier for FingerprintVerifier {
    fn verify_certificate(&self, chain: &[&[u8]]) -> Result<(), String> {
        let leaf = chain.first().ok_or("Certificate chain is empty")?;
        if calculate_fingerprint(leaf) == self.fingerprint {
            Ok(())
        } else {
            Err("Certificate fingerprint mismatch".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_is_ecdsa_signing() {
        let cred = Credential::self_signed("test").unwrap();
        assert_eq!(cred.chain().len(), 1);
        assert!(matches!(
            cred,
            Credential::Signing {
                key: SigningKey::Ecdsa(_),
                ..
            }
        ));
        assert_eq!(
            cred.supported_suites(),
            &[
                CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            ]
        );
    }

    #[test]
    fn sign_then_verify_against_own_cert() {
        let cred = Credential::self_signed("test").unwrap();
        let key = cred.signing_key().unwrap();

        let data = b"server ecdh params and randoms";
        let mut sig = Buf::new();
        key.sign(data, HashAlgorithm::SHA256, &mut sig).unwrap();

        verify_signature(
            &cred.chain()[0],
            data,
            &sig,
            HashAlgorithm::SHA256,
            SignatureAlgorithm::ECDSA,
        )
        .unwrap();
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let cred = Credential::self_signed("test").unwrap();
        let key = cred.signing_key().unwrap();

        let mut sig = Buf::new();
        key.sign(b"original", HashAlgorithm::SHA256, &mut sig)
            .unwrap();

        let result = verify_signature(
            &cred.chain()[0],
            b"tampered",
            &sig,
            HashAlgorithm::SHA256,
            SignatureAlgorithm::ECDSA,
        );
        assert!(result.is_err());
    }

    #[test]
    fn premaster_roundtrip_with_rsa_key() {
        let mut rng = SeededRng::new(Some(7));
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let cred = Credential::Decryption {
            chain: vec![vec![]],
            key: Box::new(key.clone()),
        };

        let pms = super::super::key_exchange::rsa_pre_master_secret(
            ProtocolVersion::DTLS1_2,
            &mut rng,
        );
        let ciphertext = RsaPublicKey::from(&key)
            .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, &pms)
            .unwrap();

        let decrypted = cred
            .decrypt_pre_master(&ciphertext, ProtocolVersion::DTLS1_2, &mut rng)
            .unwrap();
        assert_eq!(decrypted, pms);
    }

    #[test]
    fn bad_premaster_yields_random_not_error() {
        let mut rng = SeededRng::new(Some(7));
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let cred = Credential::Decryption {
            chain: vec![vec![]],
            key: Box::new(key),
        };

        let garbage = vec![0xAB; 256];
        let result = cred.decrypt_pre_master(&garbage, ProtocolVersion::DTLS1_2, &mut rng);
        let pms = result.unwrap();
        assert_eq!(&pms[..2], &[0xfe, 0xfd]);
    }

    #[test]
    fn fingerprint_verifier_pins_leaf() {
        let cred = Credential::self_signed("test").unwrap();
        let leaf = &cred.chain()[0];

        let verifier = FingerprintVerifier::new(calculate_fingerprint(leaf));
        verifier.verify_certificate(&[leaf.as_slice()]).unwrap();

        let other = Credential::self_signed("other").unwrap();
        assert!(verifier
            .verify_certificate(&[other.chain()[0].as_slice()])
            .is_err());
    }
}
