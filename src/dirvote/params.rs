//! Consensus-wide scalar values
//!
//! Every value here is computed from the whole vote list with the
//! low-median, so any authority running this over the same votes gets the
//! same answer. Covers the voting schedule, network parameters, recommended
//! versions and the consensus method.

use crate::error::{Result, VoteError};
use crate::protocol::{is_supported_method, NetworkStatus, VotingSchedule, MIN_SUPPORTED_METHOD};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Element at index `(n-1)/2` of the sorted values: the middle one for an
/// odd count, the lower middle one for an even count.
pub fn low_median<T: Ord + Copy>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[(sorted.len() - 1) / 2])
}

fn median_of<T, F>(votes: &[&NetworkStatus], field: F) -> Result<T>
where
    T: Ord + Copy,
    F: Fn(&NetworkStatus) -> T,
{
    let values: Vec<T> = votes.iter().map(|v| field(v)).collect();
    low_median(&values).ok_or_else(|| VoteError::protocol("No votes to take a median over"))
}

/// Low-median of each timing field over all votes.
///
/// Order statistics keep `valid_after < fresh_until <= valid_until` when
/// every input window satisfies it; the result is checked regardless.
pub fn compute_schedule(votes: &[&NetworkStatus]) -> Result<VotingSchedule> {
    let schedule = VotingSchedule {
        valid_after: median_of(votes, |v| v.valid_after)?,
        fresh_until: median_of(votes, |v| v.fresh_until)?,
        valid_until: median_of(votes, |v| v.valid_until)?,
        vote_seconds: median_of(votes, |v| v.vote_seconds)?,
        dist_seconds: median_of(votes, |v| v.dist_seconds)?,
    };
    schedule.validate()?;
    log::debug!(
        "Consensus schedule: valid-after {} fresh-until {} valid-until {} delays {}/{}",
        schedule.valid_after,
        schedule.fresh_until,
        schedule.valid_until,
        schedule.vote_seconds,
        schedule.dist_seconds
    );
    Ok(schedule)
}

/// Low-median of each parameter over the votes that set it.
///
/// A parameter set by a single vote passes through unchanged.
pub fn compute_net_params(votes: &[&NetworkStatus]) -> BTreeMap<String, i32> {
    let mut values: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for vote in votes {
        for (name, value) in &vote.net_params {
            values.entry(name.as_str()).or_default().push(*value);
        }
    }

    values
        .into_iter()
        .filter_map(|(name, vals)| low_median(&vals).map(|m| (name.to_string(), m)))
        .collect()
}

/// Order version strings numerically on their dotted prefix.
///
/// `0.1.2.9 < 0.1.2.10`. Anything after a `-` is a status tag compared
/// as text once the numbers agree. Strings with non-numeric components
/// sort after all numeric ones.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn split(v: &str) -> (Option<Vec<u64>>, &str) {
        let (main, tag) = v.split_once('-').unwrap_or((v, ""));
        let numbers = main
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>();
        (numbers, tag)
    }

    let (a_num, a_tag) = split(a);
    let (b_num, b_tag) = split(b);
    match (a_num, b_num) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a_tag.cmp(b_tag)).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Versions recommended by more than half of the votes that recommend any.
///
/// `select` picks the comma-separated list out of a vote. Returns `None`
/// if no vote lists versions or no version reaches a majority.
pub fn compute_versions<F>(votes: &[&NetworkStatus], select: F) -> Option<String>
where
    F: Fn(&NetworkStatus) -> Option<&str>,
{
    let mut listing = 0usize;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

    for vote in votes {
        let list = match select(vote) {
            Some(list) if !list.trim().is_empty() => list,
            _ => continue,
        };
        listing += 1;
        let versions: BTreeSet<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        for version in versions {
            *counts.entry(version).or_default() += 1;
        }
    }

    let mut recommended: Vec<&str> = counts
        .into_iter()
        .filter(|(_, n)| n * 2 > listing)
        .map(|(v, _)| v)
        .collect();
    if recommended.is_empty() {
        return None;
    }
    recommended.sort_by(|a, b| compare_versions(a, b));
    Some(recommended.join(","))
}

/// Highest supported method listed by more than two thirds of the votes.
///
/// Falls back to the oldest method when there is no such agreement.
pub fn consensus_method(votes: &[&NetworkStatus]) -> u32 {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for vote in votes {
        let methods: BTreeSet<u32> = vote.supported_methods.iter().copied().collect();
        for method in methods {
            *counts.entry(method).or_default() += 1;
        }
    }

    let n = votes.len();
    let method = counts
        .into_iter()
        .rev()
        .find(|(m, count)| is_supported_method(*m) && count * 3 > n * 2)
        .map(|(m, _)| m)
        .unwrap_or(MIN_SUPPORTED_METHOD);
    log::debug!("Agreed consensus method {} from {} votes", method, n);
    method
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(params: &[(&str, i32)]) -> NetworkStatus {
        let mut v = NetworkStatus::new_vote(
            0,
            VotingSchedule {
                valid_after: 1000,
                fresh_until: 2000,
                valid_until: 3000,
                vote_seconds: 100,
                dist_seconds: 200,
            },
        );
        for (k, val) in params {
            v.net_params.insert(k.to_string(), *val);
        }
        v
    }

    #[test]
    fn test_low_median() {
        assert_eq!(low_median::<u32>(&[]), None);
        assert_eq!(low_median(&[7]), Some(7));
        assert_eq!(low_median(&[3, 1, 2]), Some(2));
        assert_eq!(low_median(&[4, 1, 3, 2]), Some(2));
        assert_eq!(low_median(&[-99, 88, -9, 100]), Some(-9));
    }

    #[test]
    fn test_net_params_median() {
        let votes = [
            vote(&[("ab", 90), ("abcd", 20), ("cw", 50), ("x-yz", -99)]),
            vote(&[("ab", 27), ("cw", 5), ("x-yz", 88)]),
            vote(&[("abcd", 20), ("c", 60), ("cw", 500), ("x-yz", -9), ("zzzzz", 101)]),
            vote(&[("ab", 900), ("abcd", 200), ("c", 1), ("cw", 51), ("x-yz", 100)]),
        ];
        let refs: Vec<&NetworkStatus> = votes.iter().collect();
        let params = compute_net_params(&refs);
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        assert_eq!(rendered.join(" "), "ab=90 abcd=20 c=1 cw=50 x-yz=-9 zzzzz=101");
    }

    #[test]
    fn test_schedule_median() {
        let mut a = vote(&[]);
        let mut b = vote(&[]);
        let mut c = vote(&[]);
        a.fresh_until = 2000;
        b.fresh_until = 3005;
        c.fresh_until = 2003;
        a.dist_seconds = 200;
        b.dist_seconds = 300;
        c.dist_seconds = 250;
        let schedule = compute_schedule(&[&a, &b, &c]).unwrap();
        assert_eq!(schedule.fresh_until, 2003);
        assert_eq!(schedule.dist_seconds, 250);
        assert_eq!(schedule.valid_after, 1000);
        assert_eq!(schedule.vote_seconds, 100);
    }

    #[test]
    fn test_versions() {
        let mut a = vote(&[]);
        let b = vote(&[]);
        let mut c = vote(&[]);
        a.client_versions = Some("0.1.2.14,0.1.2.15".into());
        a.server_versions = Some("0.1.2.14,0.1.2.15,0.1.2.16".into());
        c.client_versions = Some("0.1.2.14,0.1.2.17".into());
        c.server_versions = Some("0.1.2.10,0.1.2.15,0.1.2.16".into());
        let votes = [&a, &b, &c];

        assert_eq!(
            compute_versions(&votes, |v| v.client_versions.as_deref()).as_deref(),
            Some("0.1.2.14")
        );
        assert_eq!(
            compute_versions(&votes, |v| v.server_versions.as_deref()).as_deref(),
            Some("0.1.2.15,0.1.2.16")
        );
        assert_eq!(compute_versions(&[&b], |v| v.client_versions.as_deref()), None);
    }

    #[test]
    fn test_version_order() {
        assert_eq!(compare_versions("0.1.2.9", "0.1.2.10"), Ordering::Less);
        assert_eq!(compare_versions("0.2.0.5", "0.1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("0.2.0.5-alpha", "0.2.0.5-rc"), Ordering::Less);
        assert_eq!(compare_versions("0.2.0.5", "Tor-dev"), Ordering::Less);
    }

    #[test]
    fn test_consensus_method() {
        let mut a = vote(&[]);
        let mut b = vote(&[]);
        let mut c = vote(&[]);
        a.supported_methods = vec![1, 2, 3];
        b.supported_methods = vec![1, 2, 3];
        c.supported_methods = vec![1, 2, 3, 4];
        assert_eq!(consensus_method(&[&a, &b, &c]), 3);

        b.supported_methods = vec![1, 2, 3, 4];
        a.supported_methods = vec![1, 2, 3, 4, 99];
        // 3 of 3 list 4; 99 is beyond what we can compute
        assert_eq!(consensus_method(&[&a, &b, &c]), 4);

        a.supported_methods.clear();
        b.supported_methods = vec![5];
        c.supported_methods = vec![6];
        assert_eq!(consensus_method(&[&a, &b, &c]), MIN_SUPPORTED_METHOD);
    }
}
