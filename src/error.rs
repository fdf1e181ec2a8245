//! Error types for directory vote merging
//!
//! This module provides the error taxonomy used across the crate:
//! - Detailed variants for each way a document can be rejected
//! - Error classification (parse / protocol / crypto)
//! - Error codes for programmatic handling
//!
//! Nothing in this crate recovers silently. A document that violates an
//! invariant is rejected and the error names the invariant that failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoteError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Parse errors (1xx)
    MalformedDocument = 100,

    // Protocol errors (2xx)
    ProtocolViolation = 200,
    TooFewVotes = 201,
    UnsupportedMethod = 202,
    DigestMismatch = 203,
    UnknownVoter = 204,
    NotFinalized = 205,

    // Cryptographic errors (3xx)
    CryptoError = 300,

    // Configuration errors (8xx)
    ConfigError = 800,

    // Internal errors (9xx)
    InternalError = 900,
}

/// Broad error category, mirroring the three ways a merge can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input document
    Parse,
    /// Well-formed documents that break a consensus precondition
    Protocol,
    /// Failure reported by the signing/digest service
    Crypto,
    /// Invalid voting configuration
    Config,
    /// Bug or poisoned state inside this crate
    Internal,
}

/// Main error type for vote merging and consensus signing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    // ===== Parse Errors =====
    #[error("Parse error: {0}")]
    Parse(String),

    // ===== Protocol Errors =====
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Too few votes: got {got}, need at least {need}")]
    TooFewVotes { got: usize, need: usize },

    #[error("Unsupported consensus method {0}")]
    UnsupportedMethod(u32),

    #[error("Detached signatures do not match this consensus digest")]
    DigestMismatch,

    #[error("Signature from unknown voter {0}")]
    UnknownVoter(String),

    #[error("Consensus body has not been finalized (no digest)")]
    NotFinalized,

    // ===== Cryptographic Errors =====
    #[error("Crypto error: {0}")]
    Crypto(String),

    // ===== Configuration Errors =====
    #[error("Config error: {0}")]
    Config(String),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VoteError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            VoteError::Parse(_) => ErrorCode::MalformedDocument,

            VoteError::Protocol(_) => ErrorCode::ProtocolViolation,
            VoteError::TooFewVotes { .. } => ErrorCode::TooFewVotes,
            VoteError::UnsupportedMethod(_) => ErrorCode::UnsupportedMethod,
            VoteError::DigestMismatch => ErrorCode::DigestMismatch,
            VoteError::UnknownVoter(_) => ErrorCode::UnknownVoter,
            VoteError::NotFinalized => ErrorCode::NotFinalized,

            VoteError::Crypto(_) => ErrorCode::CryptoError,

            VoteError::Config(_) => ErrorCode::ConfigError,

            VoteError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the broad category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoteError::Parse(_) => ErrorKind::Parse,
            VoteError::Protocol(_)
            | VoteError::TooFewVotes { .. }
            | VoteError::UnsupportedMethod(_)
            | VoteError::DigestMismatch
            | VoteError::UnknownVoter(_)
            | VoteError::NotFinalized => ErrorKind::Protocol,
            VoteError::Crypto(_) => ErrorKind::Crypto,
            VoteError::Config(_) => ErrorKind::Config,
            VoteError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller should reject the document that caused this error.
    ///
    /// Parse and protocol failures always condemn the offending document.
    /// Crypto failures come from the signing service and say nothing about
    /// the document itself.
    pub fn is_document_rejection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Parse | ErrorKind::Protocol)
    }

    /// Shorthand for a parse error
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        VoteError::Parse(msg.into())
    }

    /// Shorthand for a protocol error
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        VoteError::Protocol(msg.into())
    }
}

impl From<base64::DecodeError> for VoteError {
    fn from(err: base64::DecodeError) -> Self {
        VoteError::Parse(format!("Invalid base64: {}", err))
    }
}

impl From<hex::FromHexError> for VoteError {
    fn from(err: hex::FromHexError) -> Self {
        VoteError::Parse(format!("Invalid hex: {}", err))
    }
}

impl From<serde_json::Error> for VoteError {
    fn from(err: serde_json::Error) -> Self {
        VoteError::Config(format!("Invalid JSON: {}", err))
    }
}

impl From<ed25519_dalek::SignatureError> for VoteError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        VoteError::Crypto(err.to_string())
    }
}
