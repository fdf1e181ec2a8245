//! Flag vocabulary and per-relay flag voting
//!
//! The consensus vocabulary is the sorted union of every vote's
//! `known-flags`. Each vote's bitmasks are re-indexed into that vocabulary
//! through an explicit name-to-bit table before any counting happens.
//!
//! A relay gets a flag when more than half of the votes that list the
//! relay *and* know the flag set it. Votes that do not know a flag abstain.

use crate::error::{Result, VoteError};
use crate::protocol::{FlagMask, KnownFlags, NetworkStatus, RouterStatus};

/// Consensus flag vocabulary plus the per-vote re-indexing tables
#[derive(Debug, Clone)]
pub struct FlagAggregator {
    known_flags: KnownFlags,
    /// Consensus flags each vote knows, as a consensus-indexed mask
    vote_known: Vec<FlagMask>,
    /// Per vote: vote bit position -> consensus bit position
    index_maps: Vec<Vec<Option<usize>>>,
}

impl FlagAggregator {
    /// Build the consensus vocabulary for `votes`.
    ///
    /// Fails if the union has more than `max_known_flags` names.
    pub fn new(votes: &[&NetworkStatus], max_known_flags: usize) -> Result<Self> {
        let known_flags = KnownFlags::union(votes.iter().map(|v| &v.known_flags))?;
        if known_flags.len() > max_known_flags {
            return Err(VoteError::protocol(format!(
                "Votes know {} flags between them, limit is {}",
                known_flags.len(),
                max_known_flags
            )));
        }

        let index_maps: Vec<Vec<Option<usize>>> = votes
            .iter()
            .map(|v| v.known_flags.index_map(&known_flags))
            .collect();
        let vote_known = index_maps
            .iter()
            .map(|map| {
                let mut mask = FlagMask::EMPTY;
                for idx in map.iter().flatten() {
                    mask.set(*idx);
                }
                mask
            })
            .collect();

        log::debug!("Consensus known-flags: {}", known_flags.names().join(" "));

        Ok(Self {
            known_flags,
            vote_known,
            index_maps,
        })
    }

    /// Sorted consensus vocabulary
    pub fn known_flags(&self) -> &KnownFlags {
        &self.known_flags
    }

    /// Re-index a mask from vote `vote`'s vocabulary into the consensus one
    pub fn remap(&self, vote: usize, mask: FlagMask) -> FlagMask {
        let mut out = FlagMask::EMPTY;
        if let Some(map) = self.index_maps.get(vote) {
            for (from, to) in map.iter().enumerate() {
                if let Some(to) = to {
                    if mask.is_set(from) {
                        out.set(*to);
                    }
                }
            }
        }
        out
    }

    /// Majority flags for one relay.
    ///
    /// `entries` holds `(vote index, that vote's entry)` for every vote
    /// that listed the relay.
    pub fn aggregate(&self, entries: &[(usize, &RouterStatus)]) -> FlagMask {
        let remapped: Vec<(usize, FlagMask)> = entries
            .iter()
            .map(|(vote, rs)| (*vote, self.remap(*vote, rs.flags)))
            .collect();

        let mut flags = FlagMask::EMPTY;
        for bit in 0..self.known_flags.len() {
            let mut knowing = 0usize;
            let mut setting = 0usize;
            for (vote, mask) in &remapped {
                let knows = self
                    .vote_known
                    .get(*vote)
                    .map_or(false, |known| known.is_set(bit));
                if !knows {
                    continue;
                }
                knowing += 1;
                if mask.is_set(bit) {
                    setting += 1;
                }
            }
            if setting * 2 > knowing {
                flags.set(bit);
            }
        }
        flags
    }
}
