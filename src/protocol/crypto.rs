//! Digest and signature primitives for directory documents
//!
//! The merge engine never touches key material directly. It goes through
//! the `DirectoryCrypto` trait, so a deployment can route signing to an
//! HSM or a test can inject failures. `Ed25519Crypto` is the stock
//! implementation.

use crate::error::{Result, VoteError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{DIGEST256_LEN, DIGEST_LEN};

/// Digest algorithms a document signature can be computed over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha1,
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    /// Keyword used on `directory-signature` lines
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(DigestAlgorithm::Sha1),
            "sha256" => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => DIGEST_LEN,
            DigestAlgorithm::Sha256 => DIGEST256_LEN,
        }
    }
}

/// Hash `data` with the given algorithm
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
    }
}

/// Signing/verification service used by the signature collector.
pub trait DirectoryCrypto: Send + Sync {
    /// Digest a document body
    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        Ok(digest_bytes(algorithm, data))
    }

    /// Sign a digest
    fn sign(&self, digest: &[u8], key: &SigningKey) -> Result<Vec<u8>>;

    /// Check a signature over a digest.
    ///
    /// `Ok(false)` means the signature is wrong; `Err` means the check
    /// itself could not be carried out.
    fn verify(&self, digest: &[u8], signature: &[u8], key: &VerifyingKey) -> Result<bool>;
}

/// Ed25519 signatures over document digests
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Crypto;

impl DirectoryCrypto for Ed25519Crypto {
    fn sign(&self, digest: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
        Ok(key.sign(digest).to_bytes().to_vec())
    }

    fn verify(&self, digest: &[u8], signature: &[u8], key: &VerifyingKey) -> Result<bool> {
        // A signature of the wrong shape is simply a bad signature
        let sig = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        Ok(key.verify(digest, &sig).is_ok())
    }
}

/// Both digests of a finalized document body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDigests {
    pub sha1: [u8; DIGEST_LEN],
    pub sha256: [u8; DIGEST256_LEN],
}

impl DocumentDigests {
    /// Digest `body` with every supported algorithm
    pub fn compute(crypto: &dyn DirectoryCrypto, body: &[u8]) -> Result<Self> {
        let sha1 = crypto.digest(DigestAlgorithm::Sha1, body)?;
        let sha256 = crypto.digest(DigestAlgorithm::Sha256, body)?;
        Ok(Self {
            sha1: sha1
                .as_slice()
                .try_into()
                .map_err(|_| VoteError::Crypto(format!("SHA-1 digest has {} bytes", sha1.len())))?,
            sha256: sha256
                .as_slice()
                .try_into()
                .map_err(|_| {
                    VoteError::Crypto(format!("SHA-256 digest has {} bytes", sha256.len()))
                })?,
        })
    }

    pub fn get(&self, algorithm: DigestAlgorithm) -> &[u8] {
        match algorithm {
            DigestAlgorithm::Sha1 => &self.sha1,
            DigestAlgorithm::Sha256 => &self.sha256,
        }
    }

    /// Constant-time equality on both digests
    pub fn matches(&self, other: &DocumentDigests) -> bool {
        let sha1_eq = self.sha1[..].ct_eq(&other.sha1[..]);
        let sha256_eq = self.sha256[..].ct_eq(&other.sha256[..]);
        bool::from(sha1_eq & sha256_eq)
    }
}
