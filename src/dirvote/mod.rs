//! Vote merging
//!
//! Computes a consensus from a set of votes. Pure functions over borrowed
//! votes; nothing here holds state between rounds.
//!
//! - `params`: low-median timing, network parameters, versions, method
//! - `flags`: flag vocabulary union and per-relay majority flags
//! - `merge`: relay inclusion, canonical descriptor, merged entries
//! - `builder`: orchestration, voter list, finalization

pub mod builder;
pub mod flags;
pub mod merge;
pub mod params;

pub use builder::ConsensusBuilder;
pub use flags::FlagAggregator;
pub use merge::{canonical_digest, RouterStatusMerger};
pub use params::{
    compare_versions, compute_net_params, compute_schedule, compute_versions, consensus_method,
    low_median,
};
