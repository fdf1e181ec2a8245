//! Relay list merging
//!
//! Groups every vote's entries by relay identity and decides, per relay:
//! - whether it is in the consensus at all (listed by more than half of
//!   the votes)
//! - which descriptor is canonical (plurality digest, smallest on a tie)
//! - which flags it gets (see `FlagAggregator`)
//! - what bandwidth it carries, depending on the consensus method
//!
//! Output is ordered by identity digest.

use super::flags::FlagAggregator;
use super::params::low_median;
use crate::error::{Result, VoteError};
use crate::protocol::{
    DescriptorDigest, Fingerprint, NetworkStatus, RouterStatus, FLAG_RUNNING,
    MIN_METHOD_FOR_BANDWIDTH, MIN_METHOD_FOR_MEASURED_BW, MIN_METHOD_TO_CUT_NON_RUNNING,
};
use std::collections::{BTreeMap, HashSet};

/// One relay as listed by each vote that lists it, in vote order
type Listing<'a> = Vec<(usize, &'a RouterStatus)>;

/// Merges the relay lists of a set of votes
pub struct RouterStatusMerger<'a> {
    votes: &'a [&'a NetworkStatus],
    flags: &'a FlagAggregator,
    method: u32,
}

impl<'a> RouterStatusMerger<'a> {
    pub fn new(votes: &'a [&'a NetworkStatus], flags: &'a FlagAggregator, method: u32) -> Self {
        Self {
            votes,
            flags,
            method,
        }
    }

    /// Every vote's entries grouped by identity, identities ascending.
    ///
    /// An identity listed twice by one vote is rejected.
    fn group(&self) -> Result<BTreeMap<Fingerprint, Listing<'a>>> {
        let mut groups: BTreeMap<Fingerprint, Listing<'a>> = BTreeMap::new();
        for (idx, vote) in self.votes.iter().enumerate() {
            let mut seen = HashSet::with_capacity(vote.routerstatus_list.len());
            for rs in &vote.routerstatus_list {
                if !seen.insert(rs.identity) {
                    return Err(VoteError::parse(format!(
                        "Relay {} listed twice in one vote",
                        rs.identity
                    )));
                }
                groups.entry(rs.identity).or_default().push((idx, rs));
            }
        }
        Ok(groups)
    }

    /// Produce the consensus relay list
    pub fn merge(&self) -> Result<Vec<RouterStatus>> {
        let groups = self.group()?;
        let n_votes = self.votes.len();
        let running = self.flags.known_flags().index_of(FLAG_RUNNING);

        let mut merged = Vec::new();
        let mut excluded_quorum = 0usize;
        let mut excluded_running = 0usize;

        for (identity, listing) in &groups {
            if listing.len() * 2 <= n_votes {
                excluded_quorum += 1;
                continue;
            }

            let rs = self.merge_one(listing)?;
            if self.method >= MIN_METHOD_TO_CUT_NON_RUNNING
                && !running.map_or(false, |bit| rs.flags.is_set(bit))
            {
                log::debug!("Omitting {}: not Running", identity);
                excluded_running += 1;
                continue;
            }
            merged.push(rs);
        }

        log::debug!(
            "Merged {} relays ({} below quorum, {} not running) from {} votes",
            merged.len(),
            excluded_quorum,
            excluded_running,
            n_votes
        );
        Ok(merged)
    }

    fn merge_one(&self, listing: &Listing<'a>) -> Result<RouterStatus> {
        let digest = canonical_digest(listing)
            .ok_or_else(|| VoteError::Internal("empty relay listing".into()))?;
        let (_, source) = listing
            .iter()
            .find(|(_, rs)| rs.descriptor_digest == digest)
            .ok_or_else(|| VoteError::Internal("canonical digest has no source".into()))?;

        let mut rs = RouterStatus::new(
            source.identity,
            digest,
            source.nickname.clone(),
            source.address,
            source.or_port,
        );
        rs.published_on = source.published_on;
        rs.dir_port = source.dir_port;
        rs.version = source.version.clone();
        rs.flags = self.flags.aggregate(listing);
        rs.bandwidth = self.bandwidth(listing);
        Ok(rs)
    }

    /// Low-median bandwidth for the consensus entry, if the method carries one
    fn bandwidth(&self, listing: &Listing<'a>) -> Option<u32> {
        if self.method < MIN_METHOD_FOR_BANDWIDTH {
            return None;
        }
        if self.method >= MIN_METHOD_FOR_MEASURED_BW {
            let measured: Vec<u32> = listing
                .iter()
                .filter_map(|(_, rs)| rs.measured_bandwidth)
                .collect();
            if let Some(bw) = low_median(&measured) {
                return Some(bw);
            }
        }
        let reported: Vec<u32> = listing.iter().filter_map(|(_, rs)| rs.bandwidth).collect();
        low_median(&reported)
    }
}

/// Most common descriptor digest, the smallest one among equals
pub fn canonical_digest(listing: &[(usize, &RouterStatus)]) -> Option<DescriptorDigest> {
    let mut counts: BTreeMap<DescriptorDigest, usize> = BTreeMap::new();
    for (_, rs) in listing {
        *counts.entry(rs.descriptor_digest).or_default() += 1;
    }

    let mut best: Option<(DescriptorDigest, usize)> = None;
    for (digest, count) in counts {
        match best {
            Some((_, top)) if top >= count => {}
            _ => best = Some((digest, count)),
        }
    }
    best.map(|(digest, _)| digest)
}
