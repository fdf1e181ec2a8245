//! Consensus construction
//!
//! `ConsensusBuilder::build` turns a set of votes into an unsigned,
//! finalized consensus: body computed, rendered and digested. The result
//! depends only on the multiset of votes and the consensus method, never
//! on vote order or on which authority runs it.

use super::flags::FlagAggregator;
use super::merge::RouterStatusMerger;
use super::params;
use crate::config::VotingConfig;
use crate::error::{Result, VoteError};
use crate::protocol::netdoc::{param_name, render_body};
use crate::protocol::{
    apply_measured_bandwidth, is_supported_method, DigestAlgorithm, DirectoryCrypto,
    DocumentDigests, Fingerprint, MeasuredBandwidth, NetworkStatus, VoterInfo,
    MIN_METHOD_FOR_LEGACY_ID,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Builds consensus documents from votes
#[derive(Clone)]
pub struct ConsensusBuilder {
    config: VotingConfig,
    crypto: Arc<dyn DirectoryCrypto>,
    measured: Vec<MeasuredBandwidth>,
}

impl ConsensusBuilder {
    pub fn new(config: VotingConfig, crypto: Arc<dyn DirectoryCrypto>) -> Self {
        Self {
            config,
            crypto,
            measured: Vec::new(),
        }
    }

    /// Override merged bandwidths with out-of-band measurements.
    ///
    /// Applied after merging, in order; the last value for a relay wins.
    pub fn with_measured_bandwidths<I>(mut self, measured: I) -> Self
    where
        I: IntoIterator<Item = MeasuredBandwidth>,
    {
        self.measured.extend(measured);
        self
    }

    /// Build with the method the votes agree on
    pub fn build_with_agreed_method(&self, votes: &[NetworkStatus]) -> Result<NetworkStatus> {
        let refs: Vec<&NetworkStatus> = votes.iter().collect();
        let method = params::consensus_method(&refs);
        self.build(votes, method)
    }

    /// Compute the consensus for `votes` under `method`.
    ///
    /// The returned document is finalized (its digests are set) and carries
    /// no signatures.
    pub fn build(&self, votes: &[NetworkStatus], method: u32) -> Result<NetworkStatus> {
        if !is_supported_method(method) {
            return Err(VoteError::UnsupportedMethod(method));
        }
        let need = self.config.min_votes.max(1);
        if votes.len() < need {
            return Err(VoteError::TooFewVotes {
                got: votes.len(),
                need,
            });
        }

        let votes = self.check_votes(votes)?;

        let schedule = params::compute_schedule(&votes)?;
        let flags = FlagAggregator::new(&votes, self.config.max_known_flags)?;
        let mut routers = RouterStatusMerger::new(&votes, &flags, method).merge()?;
        for line in &self.measured {
            apply_measured_bandwidth(&mut routers, line);
        }

        let mut consensus = NetworkStatus::new_consensus(schedule, method);
        consensus.known_flags = flags.known_flags().clone();
        consensus.client_versions =
            params::compute_versions(&votes, |v| v.client_versions.as_deref());
        consensus.server_versions =
            params::compute_versions(&votes, |v| v.server_versions.as_deref());
        consensus.net_params = params::compute_net_params(&votes);
        consensus.voters = self.voter_entries(&votes, method)?;
        consensus.routerstatus_list = routers;

        let body = render_body(&consensus)?;
        consensus.digests = Some(DocumentDigests::compute(self.crypto.as_ref(), body.as_bytes())?);

        log::info!(
            "Built consensus (method {}) from {} votes: {} relays, {} voters",
            method,
            votes.len(),
            consensus.routerstatus_list.len(),
            consensus.voters.len()
        );
        Ok(consensus)
    }

    /// Validate every vote and order them by voter identity
    fn check_votes<'a>(&self, votes: &'a [NetworkStatus]) -> Result<Vec<&'a NetworkStatus>> {
        let mut seen = HashSet::with_capacity(votes.len());
        let mut sorted = Vec::with_capacity(votes.len());

        for vote in votes {
            if !vote.is_vote() {
                return Err(VoteError::protocol("Consensus supplied where a vote was expected"));
            }
            if vote.voters.len() != 1 {
                return Err(VoteError::protocol(format!(
                    "Vote must have exactly one voter, found {}",
                    vote.voters.len()
                )));
            }
            let identity = vote.voters[0].identity;
            if !seen.insert(identity) {
                return Err(VoteError::protocol(format!(
                    "Two votes from authority {}",
                    identity
                )));
            }
            vote.schedule().validate()?;
            if vote.known_flags.len() > self.config.max_known_flags {
                return Err(VoteError::protocol(format!(
                    "Vote from {} knows {} flags, limit is {}",
                    identity,
                    vote.known_flags.len(),
                    self.config.max_known_flags
                )));
            }
            for name in vote.net_params.keys() {
                param_name(name)?;
            }
            sorted.push(vote);
        }

        sorted.sort_by_key(|v| v.voters[0].identity);
        Ok(sorted)
    }

    /// SHA-1 digest of a vote's body, reusing the parsed one when present
    fn vote_digest(&self, vote: &NetworkStatus) -> Result<Fingerprint> {
        if let Some(ref digests) = vote.digests {
            return Ok(Fingerprint::new(digests.sha1));
        }
        let body = render_body(vote)?;
        let digest = self.crypto.digest(DigestAlgorithm::Sha1, body.as_bytes())?;
        Fingerprint::from_slice(&digest)
    }

    /// One entry per vote, plus legacy-key pseudo-voters, sorted by identity
    fn voter_entries(&self, votes: &[&NetworkStatus], method: u32) -> Result<Vec<VoterInfo>> {
        let mut voters = Vec::with_capacity(votes.len() + 1);

        for vote in votes {
            let source = &vote.voters[0];
            let digest = self.vote_digest(vote)?;
            let entry = VoterInfo {
                legacy_identity: None,
                vote_digest: Some(digest),
                ..source.clone()
            };

            if method >= MIN_METHOD_FOR_LEGACY_ID {
                if let Some(legacy) = source.legacy_identity {
                    voters.push(VoterInfo {
                        nickname: format!("{}-legacy", source.nickname),
                        identity: legacy,
                        ..entry.clone()
                    });
                }
            }
            voters.push(entry);
        }

        voters.sort_by_key(|v| v.identity);
        if voters.windows(2).any(|w| w[0].identity == w[1].identity) {
            return Err(VoteError::protocol("Legacy identity collides with a voter identity"));
        }
        Ok(voters)
    }
}

impl std::fmt::Debug for ConsensusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusBuilder")
            .field("config", &self.config)
            .field("measured", &self.measured.len())
            .finish()
    }
}
