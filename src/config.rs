//! Voting configuration
//!
//! Knobs an authority operator can set for consensus computation. Loaded
//! from JSON, every field optional.

use crate::error::{Result, VoteError};
use crate::protocol::{DigestAlgorithm, MAX_KNOWN_FLAGS};
use serde::{Deserialize, Serialize};

/// Configuration for building and signing consensuses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Fewest votes a consensus may be built from
    pub min_votes: usize,

    /// Digest algorithm used when signing the consensus
    pub signature_digest: DigestAlgorithm,

    /// Largest flag vocabulary accepted in a vote or consensus
    pub max_known_flags: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            min_votes: 2,
            signature_digest: DigestAlgorithm::Sha256,
            max_known_flags: MAX_KNOWN_FLAGS,
        }
    }
}

impl VotingConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: VotingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Config requiring at least `min_votes` votes
    pub fn with_min_votes(min_votes: usize) -> Self {
        Self {
            min_votes,
            ..Default::default()
        }
    }

    /// Use `algorithm` for new signatures
    pub fn with_signature_digest(mut self, algorithm: DigestAlgorithm) -> Self {
        self.signature_digest = algorithm;
        self
    }

    pub fn with_max_known_flags(mut self, max_known_flags: usize) -> Self {
        self.max_known_flags = max_known_flags;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_votes == 0 {
            return Err(VoteError::Config("min_votes must be at least 1".into()));
        }
        if self.max_known_flags == 0 || self.max_known_flags > MAX_KNOWN_FLAGS {
            return Err(VoteError::Config(format!(
                "max_known_flags must be between 1 and {}, got {}",
                MAX_KNOWN_FLAGS, self.max_known_flags
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VotingConfig::default();
        assert_eq!(config.min_votes, 2);
        assert_eq!(config.signature_digest, DigestAlgorithm::Sha256);
        assert_eq!(config.max_known_flags, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let json = r#"{"min_votes": 3, "signature_digest": "sha1"}"#;
        let config = VotingConfig::from_json(json).unwrap();
        assert_eq!(config.min_votes, 3);
        assert_eq!(config.signature_digest, DigestAlgorithm::Sha1);
        assert_eq!(config.max_known_flags, 64);

        assert_eq!(VotingConfig::from_json("{}").unwrap(), VotingConfig::default());
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(matches!(
            VotingConfig::from_json(r#"{"min_votes": 0}"#),
            Err(VoteError::Config(_))
        ));
        assert!(matches!(
            VotingConfig::from_json(r#"{"max_known_flags": 65}"#),
            Err(VoteError::Config(_))
        ));
        assert!(matches!(
            VotingConfig::from_json(r#"{"signature_digest": "md5"}"#),
            Err(VoteError::Config(_))
        ));
        assert!(VotingConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let config = VotingConfig::with_min_votes(5)
            .with_signature_digest(DigestAlgorithm::Sha1)
            .with_max_known_flags(16);
        assert_eq!(config.min_votes, 5);
        assert_eq!(config.max_known_flags, 16);
        assert!(config.validate().is_ok());
    }
}
