//! Directory protocol documents
//!
//! This module holds everything the merge engine exchanges with the
//! outside world:
//! - Network-status documents (votes, consensuses, detached signatures)
//! - Relay status entries and flag vocabularies
//! - Authority certificates and signing keys
//! - Digest/signature primitives
//! - The textual document format
//! - Signature collection on a finalized consensus

mod certs;
mod crypto;
mod document;
pub mod netdoc;
mod relay;
mod signatures;

pub use certs::{AuthorityCert, AuthorityKeys, AuthoritySigner, CertificateSet, CertificateStore};
pub use crypto::{digest_bytes, DigestAlgorithm, DirectoryCrypto, DocumentDigests, Ed25519Crypto};
pub use document::{
    DetachedSignatures, DocumentKind, DocumentSignature, NetworkStatus, SignatureState,
    SignatureStatus, VoterInfo, VotingSchedule,
};
pub use relay::{
    apply_measured_bandwidth, DescriptorDigest, Fingerprint, FlagMask, KnownFlags,
    MeasuredBandwidth, RouterStatus, FLAG_RUNNING,
};
pub use signatures::{SharedConsensus, SignatureCollector, SignatureSummary};

/// Length of a SHA-1 digest (fingerprints, descriptor digests)
pub const DIGEST_LEN: usize = 20;

/// Length of a SHA-256 digest
pub const DIGEST256_LEN: usize = 32;

/// Width of a flag bitmask
pub const MAX_KNOWN_FLAGS: usize = 64;

/// Oldest consensus method this implementation can compute
pub const MIN_SUPPORTED_METHOD: u32 = 1;

/// Newest consensus method this implementation can compute
pub const MAX_SUPPORTED_METHOD: u32 = 6;

/// First method that lists legacy-key pseudo-voters
pub const MIN_METHOD_FOR_LEGACY_ID: u32 = 3;

/// First method that drops relays without a consensus Running flag
pub const MIN_METHOD_TO_CUT_NON_RUNNING: u32 = 4;

/// First method that carries bandwidth on merged entries
pub const MIN_METHOD_FOR_BANDWIDTH: u32 = 5;

/// First method that prefers measured over self-reported bandwidth
pub const MIN_METHOD_FOR_MEASURED_BW: u32 = 6;

/// Whether `method` is one we can compute
pub fn is_supported_method(method: u32) -> bool {
    (MIN_SUPPORTED_METHOD..=MAX_SUPPORTED_METHOD).contains(&method)
}
