use sha2::{Digest, Sha256, Sha384};

use crate::buffer::Buf;
use crate::types::HashAlgorithm;

/// Append-only log of the raw handshake messages (header + body) in the
/// order both sides process them.
///
/// Until the cipher suite is negotiated the digest algorithm is unknown,
/// so the raw bytes are retained and `seal()` fixes the algorithm once
/// the suite is picked. Hashing before `seal()` is a logic error.
#[derive(Debug, Default)]
pub struct Transcript {
    raw: Buf,
    sealed: Option<HashAlgorithm>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
    }

    /// Fix the digest algorithm. Later calls must pass the same algorithm.
    pub fn seal(&mut self, algorithm: HashAlgorithm) {
        if let Some(existing) = self.sealed {
            assert_eq!(existing, algorithm, "Transcript already sealed");
            return;
        }
        self.sealed = Some(algorithm);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Digest over everything appended so far.
    pub fn hash(&self, out: &mut Buf) {
        let algorithm = self.sealed.expect("Transcript::hash() before seal()");
        out.clear();
        match algorithm {
            HashAlgorithm::SHA256 => {
                out.extend_from_slice(&Sha256::digest(&self.raw));
            }
            HashAlgorithm::SHA384 => {
                out.extend_from_slice(&Sha384::digest(&self.raw));
            }
            HashAlgorithm::Unknown(_) => unreachable!("seal() only accepts known algorithms"),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }
}
