//! AEAD record protection and the associated data / nonce formats.

use std::ops::Deref;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key};
use arrayvec::ArrayVec;

use crate::buffer::{Buf, TmpBuf};
use crate::types::{ContentType, ProtocolVersion, Sequence};

/// Explicit nonce length transmitted with each AEAD record.
pub(crate) const EXPLICIT_NONCE_LEN: usize = 8;

/// GCM authentication tag length, appended to the ciphertext.
pub(crate) const GCM_TAG_LEN: usize = 16;

/// Overhead per AEAD record (explicit nonce + tag). 24 bytes for AES-GCM.
pub(crate) const AEAD_OVERHEAD: usize = EXPLICIT_NONCE_LEN + GCM_TAG_LEN;

/// Fixed IV portion of the AEAD nonce, from the key block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv(pub [u8; 4]);

impl Iv {
    pub(crate) fn new(iv: &[u8]) -> Self {
        // invariant: the iv is 4 bytes.
        Self(iv.try_into().unwrap())
    }
}

/// Full AEAD nonce (fixed IV + explicit nonce).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 12]);

impl Nonce {
    pub(crate) fn new(iv: Iv, explicit_nonce: &[u8]) -> Self {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&iv.0);
        nonce[4..].copy_from_slice(explicit_nonce);
        Self(nonce)
    }
}

impl Deref for Nonce {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Additional Authenticated Data for a record.
///
/// 13 bytes: sequence (epoch + 48-bit counter in datagram mode, a plain
/// 64-bit counter in stream mode) || content type || version || length,
/// where length is the plaintext length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(pub ArrayVec<u8, 13>);

impl Aad {
    pub(crate) fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        length: u16,
    ) -> Self {
        let mut aad = ArrayVec::new();

        // First set the full 8-byte sequence number
        let seq_bytes = sequence.sequence_number.to_be_bytes();
        aad.try_extend_from_slice(&seq_bytes).unwrap();

        // In datagram mode the first 2 bytes carry the epoch
        if version == ProtocolVersion::DTLS1_2 {
            let epoch_bytes = sequence.epoch.to_be_bytes();
            aad[0] = epoch_bytes[0];
            aad[1] = epoch_bytes[1];
        }

        aad.push(content_type.as_u8());

        let version_bytes = version.as_u16().to_be_bytes();
        aad.push(version_bytes[0]);
        aad.push(version_bytes[1]);

        aad.try_extend_from_slice(&length.to_be_bytes()).unwrap();

        Aad(aad)
    }
}

impl Deref for Aad {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// AES-GCM record cipher for one direction.
pub enum RecordCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordCipher::Aes128(_) => f.debug_tuple("RecordCipher::Aes128").finish(),
            RecordCipher::Aes256(_) => f.debug_tuple("RecordCipher::Aes256").finish(),
        }
    }
}

impl RecordCipher {
    pub fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => {
                let key = Key::<Aes128Gcm>::from_slice(key);
                Ok(RecordCipher::Aes128(Box::new(Aes128Gcm::new(key))))
            }
            32 => {
                let key = Key::<Aes256Gcm>::from_slice(key);
                Ok(RecordCipher::Aes256(Box::new(Aes256Gcm::new(key))))
            }
            _ => Err(format!("Invalid key size for AES-GCM: {}", key.len())),
        }
    }

    /// Encrypt in place, appending the 16-byte tag.
    pub fn encrypt(&mut self, data: &mut Buf, aad: &Aad, nonce: Nonce) -> Result<(), String> {
        let aes_nonce = GenericArray::from_slice(&nonce.0);

        match self {
            RecordCipher::Aes128(cipher) => cipher
                .encrypt_in_place(aes_nonce, aad, data)
                .map_err(|_| "AES-GCM encryption failed".to_string()),
            RecordCipher::Aes256(cipher) => cipher
                .encrypt_in_place(aes_nonce, aad, data)
                .map_err(|_| "AES-GCM encryption failed".to_string()),
        }
    }

    /// Decrypt in place. The buffer is shortened by the tag length.
    pub fn decrypt(
        &mut self,
        ciphertext: &mut TmpBuf,
        aad: &Aad,
        nonce: Nonce,
    ) -> Result<(), String> {
        if ciphertext.len() < GCM_TAG_LEN {
            return Err(format!("Ciphertext too short: {}", ciphertext.len()));
        }

        let aes_nonce = GenericArray::from_slice(&nonce.0);

        match self {
            RecordCipher::Aes128(cipher) => cipher
                .decrypt_in_place(aes_nonce, aad, ciphertext)
                .map_err(|_| "AES-GCM decryption failed".to_string()),
            RecordCipher::Aes256(cipher) => cipher
                .decrypt_in_place(aes_nonce, aad, ciphertext)
                .map_err(|_| "AES-GCM decryption failed".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WireFormat;

    fn aad() -> Aad {
        Aad::new(
            ContentType::ApplicationData,
            ProtocolVersion::DTLS1_2,
            Sequence {
                epoch: 1,
                sequence_number: 7,
            },
            5,
        )
    }

    #[test]
    fn aad_layout_datagram() {
        let aad = aad();
        assert_eq!(aad.len(), 13);
        assert_eq!(&aad[..2], &[0, 1]); // epoch
        assert_eq!(&aad[2..8], &[0, 0, 0, 0, 0, 7]); // 48-bit seq
        assert_eq!(aad[8], 23); // content type
        assert_eq!(&aad[9..11], &[0xfe, 0xfd]); // version
        assert_eq!(&aad[11..], &[0, 5]); // plaintext length
    }

    #[test]
    fn aad_layout_stream() {
        let aad = Aad::new(
            ContentType::Handshake,
            WireFormat::Stream.version(),
            Sequence {
                epoch: 0,
                sequence_number: 3,
            },
            10,
        );
        assert_eq!(&aad[..8], &[0, 0, 0, 0, 0, 0, 0, 3]); // full 64-bit seq
        assert_eq!(&aad[9..11], &[0x03, 0x03]);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [7u8; 16];
        let mut cipher = RecordCipher::new(&key).unwrap();
        let nonce = Nonce::new(Iv([1, 2, 3, 4]), &[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut data = Buf::new();
        data.extend_from_slice(b"hello");
        cipher.encrypt(&mut data, &aad(), nonce).unwrap();
        assert_eq!(data.len(), 5 + GCM_TAG_LEN);

        let mut storage = data.to_vec();
        let mut tmp = TmpBuf::new(&mut storage);
        cipher.decrypt(&mut tmp, &aad(), nonce).unwrap();
        assert_eq!(&tmp[..], b"hello");
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let key = [7u8; 32];
        let mut cipher = RecordCipher::new(&key).unwrap();
        let nonce = Nonce::new(Iv([1, 2, 3, 4]), &[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut data = Buf::new();
        data.extend_from_slice(b"hello");
        cipher.encrypt(&mut data, &aad(), nonce).unwrap();

        let mut storage = data.to_vec();
        storage[0] ^= 0x01;
        let mut tmp = TmpBuf::new(&mut storage);
        assert!(cipher.decrypt(&mut tmp, &aad(), nonce).is_err());
    }

    #[test]
    fn wrong_aad_rejected() {
        let key = [7u8; 16];
        let mut cipher = RecordCipher::new(&key).unwrap();
        let nonce = Nonce::new(Iv([1, 2, 3, 4]), &[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut data = Buf::new();
        data.extend_from_slice(b"hello");
        cipher.encrypt(&mut data, &aad(), nonce).unwrap();

        let other_aad = Aad::new(
            ContentType::Alert,
            ProtocolVersion::DTLS1_2,
            Sequence {
                epoch: 1,
                sequence_number: 7,
            },
            5,
        );
        let mut storage = data.to_vec();
        let mut tmp = TmpBuf::new(&mut storage);
        assert!(cipher.decrypt(&mut tmp, &other_aad, nonce).is_err());
    }
}
