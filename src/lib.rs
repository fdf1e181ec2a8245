//! # Tor Directory Voting
//!
//! The authority side of the v3 directory protocol: a small set of
//! directory authorities each publish a vote describing the relays they
//! see, and every authority independently merges the same votes into the
//! same consensus, which is then signed by as many authorities as possible.
//!
//! ## Architecture
//!
//! ```text
//! votes (parsed, signature-checked)
//!   ↓
//! ConsensusBuilder
//!   ├─ ParameterVoter  (low-median schedule, params, versions)
//!   ├─ FlagAggregator  (flag vocabulary, majority flags)
//!   └─ RouterStatusMerger (quorum, canonical descriptor)
//!   ↓
//! finalized consensus (body + digests)
//!   ↓
//! SignatureCollector (sign, attach, merge detached, verify)
//! ```
//!
//! ## Features
//!
//! - **Deterministic**: the same votes always give byte-identical bodies
//! - **Strict**: malformed or inconsistent input is rejected, never patched
//! - **Pluggable crypto**: signing goes through `DirectoryCrypto`
//! - **Shareable**: `SharedConsensus` serializes signature updates

pub mod config;
pub mod dirvote;
mod error;
pub mod protocol;

pub use config::VotingConfig;
pub use dirvote::{ConsensusBuilder, FlagAggregator, RouterStatusMerger};
pub use error::{ErrorCode, ErrorKind, Result, VoteError};
pub use protocol::netdoc::{
    parse_consensus, parse_detached_signatures, parse_vote, render_consensus, render_detached,
    render_vote,
};
pub use protocol::{
    AuthorityCert, AuthorityKeys, AuthoritySigner, CertificateSet, CertificateStore,
    DetachedSignatures, DigestAlgorithm, DirectoryCrypto, DocumentDigests, DocumentKind,
    DocumentSignature, Ed25519Crypto, Fingerprint, FlagMask, KnownFlags, MeasuredBandwidth,
    NetworkStatus, RouterStatus, SharedConsensus, SignatureCollector, SignatureState,
    SignatureStatus, SignatureSummary, VoterInfo, VotingSchedule,
};
