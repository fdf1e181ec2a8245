//! Network-status documents
//!
//! A vote and a consensus share one schema, `NetworkStatus`, tagged by
//! `DocumentKind`. Fields that only make sense for one kind are optional:
//! a vote has `published` and a `cert`, a consensus has a
//! `consensus_method`, per-voter vote digests and (eventually) a set of
//! signatures over its finalized body.

use super::certs::AuthorityCert;
use super::crypto::{DigestAlgorithm, DocumentDigests};
use super::relay::{Fingerprint, KnownFlags, RouterStatus};
use crate::error::{Result, VoteError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Which kind of network-status document this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Vote,
    Consensus,
}

impl DocumentKind {
    /// Keyword used on the `vote-status` line
    pub fn keyword(&self) -> &'static str {
        match self {
            DocumentKind::Vote => "vote",
            DocumentKind::Consensus => "consensus",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "vote" => Some(DocumentKind::Vote),
            "consensus" => Some(DocumentKind::Consensus),
            _ => None,
        }
    }
}

/// The five timing values every vote supplies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSchedule {
    pub valid_after: u64,
    pub fresh_until: u64,
    pub valid_until: u64,
    pub vote_seconds: u32,
    pub dist_seconds: u32,
}

impl VotingSchedule {
    /// Check `valid_after < fresh_until <= valid_until` and that both
    /// interval hints are positive.
    pub fn validate(&self) -> Result<()> {
        if self.valid_after >= self.fresh_until {
            return Err(VoteError::protocol(format!(
                "valid-after ({}) is not before fresh-until ({})",
                self.valid_after, self.fresh_until
            )));
        }
        if self.fresh_until > self.valid_until {
            return Err(VoteError::protocol(format!(
                "fresh-until ({}) is after valid-until ({})",
                self.fresh_until, self.valid_until
            )));
        }
        if self.vote_seconds == 0 || self.dist_seconds == 0 {
            return Err(VoteError::protocol("voting-delay values must be positive"));
        }
        Ok(())
    }
}

/// One authority's entry in the voter list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterInfo {
    /// Authority nickname
    pub nickname: String,
    /// Identity fingerprint (v3ident)
    pub identity: Fingerprint,
    /// Hostname or address string as configured
    pub address: String,
    /// Address the authority listens on
    pub ip: IpAddr,
    pub dir_port: u16,
    pub or_port: u16,
    /// Operator contact line
    pub contact: String,
    /// Previous identity still used for signing during a key rollover
    pub legacy_identity: Option<Fingerprint>,
    /// Digest of the vote this entry was taken from (consensus only)
    pub vote_digest: Option<Fingerprint>,
}

/// Verification state of a stored signature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureState {
    #[default]
    Unchecked,
    Good,
    Bad,
}

/// Result of checking one voter's signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStatus {
    Good,
    Bad,
    Absent,
}

/// A `directory-signature` over a document digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSignature {
    /// Digest algorithm the signature covers
    pub algorithm: DigestAlgorithm,
    /// Identity the signature is attributed to
    pub identity: Fingerprint,
    /// Digest of the signing key that made it
    pub signing_key_digest: Fingerprint,
    /// Raw signature bytes
    pub signature: Vec<u8>,
    /// Outcome of the last verification
    #[serde(default)]
    pub state: SignatureState,
}

/// A vote or a consensus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub kind: DocumentKind,

    /// When the authority generated the vote (votes only)
    pub published: Option<u64>,

    pub valid_after: u64,
    pub fresh_until: u64,
    pub valid_until: u64,
    pub vote_seconds: u32,
    pub dist_seconds: u32,

    /// Consensus methods the voting authority can compute (votes only)
    pub supported_methods: Vec<u32>,

    /// Method used to compute this document (consensus only)
    pub consensus_method: Option<u32>,

    /// Comma-separated recommended client versions
    pub client_versions: Option<String>,

    /// Comma-separated recommended server versions
    pub server_versions: Option<String>,

    pub known_flags: KnownFlags,

    pub net_params: BTreeMap<String, i32>,

    pub voters: Vec<VoterInfo>,

    /// Signing certificate of the voting authority (votes only)
    pub cert: Option<AuthorityCert>,

    pub routerstatus_list: Vec<RouterStatus>,

    pub signatures: Vec<DocumentSignature>,

    /// Digests of the finalized body, once there is one
    pub digests: Option<DocumentDigests>,
}

impl NetworkStatus {
    /// An empty vote with the given schedule
    pub fn new_vote(published: u64, schedule: VotingSchedule) -> Self {
        Self::empty(DocumentKind::Vote, Some(published), schedule)
    }

    /// An empty consensus with the given schedule and method
    pub fn new_consensus(schedule: VotingSchedule, consensus_method: u32) -> Self {
        let mut ns = Self::empty(DocumentKind::Consensus, None, schedule);
        ns.consensus_method = Some(consensus_method);
        ns
    }

    fn empty(kind: DocumentKind, published: Option<u64>, schedule: VotingSchedule) -> Self {
        Self {
            kind,
            published,
            valid_after: schedule.valid_after,
            fresh_until: schedule.fresh_until,
            valid_until: schedule.valid_until,
            vote_seconds: schedule.vote_seconds,
            dist_seconds: schedule.dist_seconds,
            supported_methods: Vec::new(),
            consensus_method: None,
            client_versions: None,
            server_versions: None,
            known_flags: KnownFlags::default(),
            net_params: BTreeMap::new(),
            voters: Vec::new(),
            cert: None,
            routerstatus_list: Vec::new(),
            signatures: Vec::new(),
            digests: None,
        }
    }

    pub fn is_vote(&self) -> bool {
        self.kind == DocumentKind::Vote
    }

    pub fn is_consensus(&self) -> bool {
        self.kind == DocumentKind::Consensus
    }

    pub fn schedule(&self) -> VotingSchedule {
        VotingSchedule {
            valid_after: self.valid_after,
            fresh_until: self.fresh_until,
            valid_until: self.valid_until,
            vote_seconds: self.vote_seconds,
            dist_seconds: self.dist_seconds,
        }
    }

    /// The authority that cast this vote
    pub fn voter(&self) -> Option<&VoterInfo> {
        self.voters.first()
    }

    pub fn find_voter(&self, identity: &Fingerprint) -> Option<&VoterInfo> {
        self.voters.iter().find(|v| v.identity == *identity)
    }

    pub fn signature_by(&self, identity: &Fingerprint) -> Option<&DocumentSignature> {
        self.signatures.iter().find(|s| s.identity == *identity)
    }

    pub(crate) fn signature_by_mut(
        &mut self,
        identity: &Fingerprint,
    ) -> Option<&mut DocumentSignature> {
        self.signatures.iter_mut().find(|s| s.identity == *identity)
    }

    pub fn router(&self, identity: &Fingerprint) -> Option<&RouterStatus> {
        self.routerstatus_list.iter().find(|rs| rs.identity == *identity)
    }

    /// Check a relay flag against this document's vocabulary
    pub fn has_flag(&self, rs: &RouterStatus, name: &str) -> bool {
        rs.has_flag(&self.known_flags, name)
    }

    /// Value of a network parameter, or `default` if it is not set
    pub fn get_param(&self, name: &str, default: i32) -> i32 {
        self.net_params.get(name).copied().unwrap_or(default)
    }

    /// Digests of the finalized body
    pub fn digest(&self) -> Result<&DocumentDigests> {
        self.digests.as_ref().ok_or(VoteError::NotFinalized)
    }

    /// Whether the document is still fresh at `now`
    pub fn is_fresh(&self, now: u64) -> bool {
        now < self.fresh_until
    }

    /// Whether the document is still usable at `now`
    pub fn is_valid(&self, now: u64) -> bool {
        self.valid_after <= now && now < self.valid_until
    }
}

/// A signature-only document referencing a consensus by digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSignatures {
    pub digests: DocumentDigests,
    pub valid_after: u64,
    pub fresh_until: u64,
    pub valid_until: u64,
    pub signatures: Vec<DocumentSignature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> VotingSchedule {
        VotingSchedule {
            valid_after: 1000,
            fresh_until: 2000,
            valid_until: 3000,
            vote_seconds: 100,
            dist_seconds: 200,
        }
    }

    #[test]
    fn test_schedule_validation() {
        assert!(schedule().validate().is_ok());

        let mut s = schedule();
        s.fresh_until = s.valid_after;
        assert!(s.validate().is_err());

        let mut s = schedule();
        s.fresh_until = s.valid_until;
        assert!(s.validate().is_ok());
        s.fresh_until = s.valid_until + 1;
        assert!(s.validate().is_err());

        let mut s = schedule();
        s.dist_seconds = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_vote_and_consensus_shape() {
        let vote = NetworkStatus::new_vote(900, schedule());
        assert!(vote.is_vote());
        assert_eq!(vote.published, Some(900));
        assert_eq!(vote.schedule(), schedule());
        assert!(matches!(vote.digest(), Err(VoteError::NotFinalized)));

        let con = NetworkStatus::new_consensus(schedule(), 7);
        assert!(con.is_consensus());
        assert_eq!(con.published, None);
        assert_eq!(con.consensus_method, Some(7));
        assert!(con.cert.is_none());
    }

    #[test]
    fn test_get_param() {
        let mut vote = NetworkStatus::new_vote(900, schedule());
        vote.net_params.insert("x-yz".into(), 100);
        assert_eq!(vote.get_param("x-yz", 50), 100);
        assert_eq!(vote.get_param("foobar", 222), 222);
    }

    #[test]
    fn test_freshness() {
        let con = NetworkStatus::new_consensus(schedule(), 1);
        assert!(con.is_fresh(1500));
        assert!(!con.is_fresh(2000));
        assert!(con.is_valid(2500));
        assert!(!con.is_valid(999));
        assert!(!con.is_valid(3000));
    }

    #[test]
    fn test_document_kind_keywords() {
        assert_eq!(DocumentKind::from_keyword("vote"), Some(DocumentKind::Vote));
        assert_eq!(DocumentKind::Consensus.keyword(), "consensus");
        assert_eq!(DocumentKind::from_keyword("status"), None);
    }
}
