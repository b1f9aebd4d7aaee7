//! TLS 1.2 PRF as specified in RFC 5246 Section 5.
//!
//! PRF(secret, label, seed) = P_<hash>(secret, label + seed)

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::buffer::Buf;
use crate::types::HashAlgorithm;

pub const MASTER_SECRET_LEN: usize = 48;

/// Run the PRF into `out`.
///
/// The seed parameter here is the actual seed data WITHOUT the label.
/// The label will be prepended to form the full seed used in the PRF
/// calculation.
pub fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    out: &mut Buf,
    output_len: usize,
    scratch: &mut Buf,
    hash: HashAlgorithm,
) -> Result<(), String> {
    assert!(label.is_ascii(), "Label must be ASCII");

    // full_seed = label + seed
    scratch.clear();
    scratch.extend_from_slice(label.as_bytes());
    scratch.extend_from_slice(seed);

    p_hash(hash, secret, scratch, out, output_len)
}

fn p_hash(
    hash_alg: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    out: &mut Buf,
    output_len: usize,
) -> Result<(), String> {
    out.clear();

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    match hash_alg {
        HashAlgorithm::SHA256 => {
            let mut a_hmac = Hmac::<Sha256>::new_from_slice(secret)
                .map_err(|_| "Invalid HMAC key length".to_string())?;
            a_hmac.update(full_seed);
            let mut a = a_hmac.finalize().into_bytes();

            while out.len() < output_len {
                // HMAC_hash(secret, A(i) + seed)
                let mut ctx = Hmac::<Sha256>::new_from_slice(secret)
                    .map_err(|_| "Invalid HMAC key length".to_string())?;
                ctx.update(&a);
                ctx.update(full_seed);
                let output = ctx.finalize().into_bytes();

                let remaining = output_len - out.len();
                let to_copy = std::cmp::min(remaining, output.len());
                out.extend_from_slice(&output[..to_copy]);

                if out.len() < output_len {
                    // A(i+1) = HMAC_hash(secret, A(i))
                    let mut next_a = Hmac::<Sha256>::new_from_slice(secret)
                        .map_err(|_| "Invalid HMAC key length".to_string())?;
                    next_a.update(&a);
                    a = next_a.finalize().into_bytes();
                }
            }
        }
        HashAlgorithm::SHA384 => {
            let mut a_hmac = Hmac::<Sha384>::new_from_slice(secret)
                .map_err(|_| "Invalid HMAC key length".to_string())?;
            a_hmac.update(full_seed);
            let mut a = a_hmac.finalize().into_bytes();

            while out.len() < output_len {
                let mut ctx = Hmac::<Sha384>::new_from_slice(secret)
                    .map_err(|_| "Invalid HMAC key length".to_string())?;
                ctx.update(&a);
                ctx.update(full_seed);
                let output = ctx.finalize().into_bytes();

                let remaining = output_len - out.len();
                let to_copy = std::cmp::min(remaining, output.len());
                out.extend_from_slice(&output[..to_copy]);

                if out.len() < output_len {
                    let mut next_a = Hmac::<Sha384>::new_from_slice(secret)
                        .map_err(|_| "Invalid HMAC key length".to_string())?;
                    next_a.update(&a);
                    a = next_a.finalize().into_bytes();
                }
            }
        }
        _ => return Err(format!("Unsupported PRF hash: {:?}", hash_alg)),
    }

    Ok(())
}

/// Master secret calculation for TLS 1.2 (RFC 5246 Section 8.1)
///
/// master_secret = PRF(pre_master_secret, "master secret",
///                     client_random + server_random, 48)
pub fn calculate_master_secret(
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    out: &mut Buf,
    scratch: &mut Buf,
    hash: HashAlgorithm,
) -> Result<(), String> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);

    prf_tls12(
        pre_master_secret,
        "master secret",
        &seed,
        out,
        MASTER_SECRET_LEN,
        scratch,
        hash,
    )
}

/// Key expansion for TLS 1.2 (RFC 5246 Section 6.3)
///
/// key_block = PRF(master_secret, "key expansion",
///                 server_random + client_random, length)
pub fn key_expansion(
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    out: &mut Buf,
    scratch: &mut Buf,
    key_material_length: usize,
    hash: HashAlgorithm,
) -> Result<(), String> {
    // For key expansion, the seed is server_random + client_random
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);

    prf_tls12(
        master_secret,
        "key expansion",
        &seed,
        out,
        key_material_length,
        scratch,
        hash,
    )
}

/// Finished verify_data (RFC 5246 Section 7.4.9), always 12 bytes.
pub fn verify_data(
    master_secret: &[u8],
    transcript_hash: &[u8],
    is_client: bool,
    hash: HashAlgorithm,
) -> Result<[u8; 12], String> {
    let label = if is_client {
        "client finished"
    } else {
        "server finished"
    };

    let mut out = Buf::new();
    let mut scratch = Buf::new();
    prf_tls12(
        master_secret,
        label,
        transcript_hash,
        &mut out,
        12,
        &mut scratch,
        hash,
    )?;

    let mut result = [0u8; 12];
    result.copy_from_slice(&out);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vector from the TLS 1.2 PRF reference computation with SHA-256:
    // secret = 0x9b be 43 6b a9 40 f0 17 b1 76 52 84 9a 71 db 35
    // seed   = 0xa0 ba 9f 93 6c da 31 18 27 a6 f7 96 ff d5 19 8c
    // label  = "test label"
    #[test]
    fn prf_sha256_known_answer() {
        let secret = [
            0x9b, 0xbe, 0x43, 0x6b, 0xa9, 0x40, 0xf0, 0x17, 0xb1, 0x76, 0x52, 0x84, 0x9a, 0x71,
            0xdb, 0x35,
        ];
        let seed = [
            0xa0, 0xba, 0x9f, 0x93, 0x6c, 0xda, 0x31, 0x18, 0x27, 0xa6, 0xf7, 0x96, 0xff, 0xd5,
            0x19, 0x8c,
        ];
        let expected: [u8; 100] = [
            0xe3, 0xf2, 0x29, 0xba, 0x72, 0x7b, 0xe1, 0x7b, 0x8d, 0x12, 0x26, 0x20, 0x55, 0x7c,
            0xd4, 0x53, 0xc2, 0xaa, 0xb2, 0x1d, 0x07, 0xc3, 0xd4, 0x95, 0x32, 0x9b, 0x52, 0xd4,
            0xe6, 0x1e, 0xdb, 0x5a, 0x6b, 0x30, 0x17, 0x91, 0xe9, 0x0d, 0x35, 0xc9, 0xc9, 0xa4,
            0x6b, 0x4e, 0x14, 0xba, 0xf9, 0xaf, 0x0f, 0xa0, 0x22, 0xf7, 0x07, 0x7d, 0xef, 0x17,
            0xab, 0xfd, 0x37, 0x97, 0xc0, 0x56, 0x4b, 0xab, 0x4f, 0xbc, 0x91, 0x66, 0x6e, 0x9d,
            0xef, 0x9b, 0x97, 0xfc, 0xe3, 0x4f, 0x79, 0x67, 0x89, 0xba, 0xa4, 0x80, 0x82, 0xd1,
            0x22, 0xee, 0x42, 0xc5, 0xa7, 0x2e, 0x5a, 0x51, 0x10, 0xff, 0xf7, 0x01, 0x87, 0x34,
            0x7b, 0x66,
        ];

        let mut out = Buf::new();
        let mut scratch = Buf::new();
        prf_tls12(
            &secret,
            "test label",
            &seed,
            &mut out,
            100,
            &mut scratch,
            HashAlgorithm::SHA256,
        )
        .unwrap();

        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn master_secret_is_48_bytes() {
        let mut out = Buf::new();
        let mut scratch = Buf::new();
        calculate_master_secret(
            &[1u8; 32],
            &[2u8; 32],
            &[3u8; 32],
            &mut out,
            &mut scratch,
            HashAlgorithm::SHA256,
        )
        .unwrap();
        assert_eq!(out.len(), MASTER_SECRET_LEN);
    }

    #[test]
    fn verify_data_differs_per_role() {
        let master = [5u8; 48];
        let hash = [6u8; 32];
        let client = verify_data(&master, &hash, true, HashAlgorithm::SHA256).unwrap();
        let server = verify_data(&master, &hash, false, HashAlgorithm::SHA256).unwrap();
        assert_ne!(client, server);
    }

    #[test]
    fn sha384_prf_produces_requested_length() {
        let mut out = Buf::new();
        let mut scratch = Buf::new();
        prf_tls12(
            &[1u8; 48],
            "key expansion",
            &[2u8; 64],
            &mut out,
            72,
            &mut scratch,
            HashAlgorithm::SHA384,
        )
        .unwrap();
        assert_eq!(out.len(), 72);
    }
}
