//! Relay status entries and flag vocabularies
//!
//! Defines the per-relay `RouterStatus` record carried by votes and by the
//! consensus, the identity/descriptor digest type, and the flag vocabulary
//! (`KnownFlags`) that gives meaning to a relay's flag bitmask.

use crate::error::{Result, VoteError};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::net::IpAddr;

use super::{DIGEST_LEN, MAX_KNOWN_FLAGS};

/// Flag the merge engine gives a fixed meaning
pub const FLAG_RUNNING: &str = "Running";

/// A fixed-length (SHA-1 sized) digest: relay identity fingerprints,
/// descriptor digests, and authority key digests all use this shape.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; DIGEST_LEN]);

/// Content digest of a relay's self-published descriptor
pub type DescriptorDigest = Fingerprint;

impl Fingerprint {
    /// Wrap raw digest bytes
    pub const fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, rejecting anything that is not exactly
    /// `DIGEST_LEN` bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            VoteError::parse(format!(
                "Digest has wrong length: {} bytes, expected {}",
                bytes.len(),
                DIGEST_LEN
            ))
        })?;
        Ok(Self(arr))
    }

    /// Parse a hex fingerprint (either case)
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_slice(&hex::decode(s)?)
    }

    /// Parse an unpadded base64 digest, as found on `r` lines
    pub fn from_base64(s: &str) -> Result<Self> {
        Self::from_slice(&STANDARD_NO_PAD.decode(s)?)
    }

    /// SHA-1 of arbitrary bytes (used for key fingerprints)
    pub fn digest_of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Uppercase hex, the form used in `dir-source` and signature lines
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// A set of flags, as bit positions into some `KnownFlags` vocabulary.
///
/// A mask means nothing on its own: bit `i` is the `i`th name of the
/// vocabulary of the document that owns it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagMask(u64);

impl FlagMask {
    pub const EMPTY: FlagMask = FlagMask(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub fn is_set(&self, index: usize) -> bool {
        index < 64 && self.0 & (1u64 << index) != 0
    }

    pub fn set(&mut self, index: usize) {
        if index < 64 {
            self.0 |= 1u64 << index;
        }
    }
}

/// The lexically sorted, duplicate-free flag vocabulary of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFlags(Vec<String>);

impl KnownFlags {
    /// Build a vocabulary from flag names in any order.
    ///
    /// Names are sorted and de-duplicated. Fails if a name is empty or
    /// contains whitespace, or if there are more than 64 names (the width
    /// of a `FlagMask`).
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut flags: Vec<String> = names.into_iter().map(Into::into).collect();
        for name in &flags {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(VoteError::parse(format!("Invalid flag name {:?}", name)));
            }
        }
        flags.sort();
        flags.dedup();
        if flags.len() > MAX_KNOWN_FLAGS {
            return Err(VoteError::parse(format!(
                "Too many known flags: {} (max {})",
                flags.len(),
                MAX_KNOWN_FLAGS
            )));
        }
        Ok(Self(flags))
    }

    /// Union of several vocabularies
    pub fn union<'a, I>(sets: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a KnownFlags>,
    {
        Self::new(sets.into_iter().flat_map(|k| k.0.iter().cloned()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Bit position of `name`, if this vocabulary knows it
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.binary_search_by(|f| f.as_str().cmp(name)).ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Turn flag names into a mask. Unknown names are a parse error.
    pub fn mask_of<'a, I>(&self, names: I) -> Result<FlagMask>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut mask = FlagMask::EMPTY;
        for name in names {
            let idx = self
                .index_of(name)
                .ok_or_else(|| VoteError::parse(format!("Flag {:?} is not in known-flags", name)))?;
            mask.set(idx);
        }
        Ok(mask)
    }

    /// Names of the flags set in `mask`, in vocabulary order
    pub fn names_in(&self, mask: FlagMask) -> Vec<&str> {
        self.0
            .iter()
            .enumerate()
            .filter(|(i, _)| mask.is_set(*i))
            .map(|(_, n)| n.as_str())
            .collect()
    }

    /// For every bit of this vocabulary, its position in `target`.
    pub fn index_map(&self, target: &KnownFlags) -> Vec<Option<usize>> {
        self.0.iter().map(|name| target.index_of(name)).collect()
    }

    /// Re-index a mask from this vocabulary into `target`.
    ///
    /// Flags that `target` does not know are dropped.
    pub fn remap(&self, mask: FlagMask, target: &KnownFlags) -> FlagMask {
        let mut out = FlagMask::EMPTY;
        for (from, to) in self.index_map(target).into_iter().enumerate() {
            if let Some(to) = to {
                if mask.is_set(from) {
                    out.set(to);
                }
            }
        }
        out
    }
}

/// One relay as described by a vote or by the consensus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStatus {
    /// Identity fingerprint (the match key across votes)
    pub identity: Fingerprint,

    /// Digest of the relay's self-published descriptor
    pub descriptor_digest: DescriptorDigest,

    /// Relay nickname
    pub nickname: String,

    /// When the descriptor was published (unix seconds)
    pub published_on: u64,

    /// IPv4/IPv6 address
    pub address: IpAddr,

    /// OR (Onion Router) port
    pub or_port: u16,

    /// Directory port (0 if none)
    pub dir_port: u16,

    /// Software version string
    pub version: Option<String>,

    /// Flags, relative to the owning document's `known_flags`
    pub flags: FlagMask,

    /// Self-reported bandwidth (kilobytes/sec)
    pub bandwidth: Option<u32>,

    /// Bandwidth measured out-of-band by the voting authority
    pub measured_bandwidth: Option<u32>,
}

impl RouterStatus {
    /// Create an entry with no flags, version or bandwidth
    pub fn new(
        identity: Fingerprint,
        descriptor_digest: DescriptorDigest,
        nickname: impl Into<String>,
        address: IpAddr,
        or_port: u16,
    ) -> Self {
        Self {
            identity,
            descriptor_digest,
            nickname: nickname.into(),
            published_on: 0,
            address,
            or_port,
            dir_port: 0,
            version: None,
            flags: FlagMask::EMPTY,
            bandwidth: None,
            measured_bandwidth: None,
        }
    }

    /// Check a flag by name against the owning document's vocabulary
    pub fn has_flag(&self, known: &KnownFlags, name: &str) -> bool {
        known.index_of(name).map_or(false, |i| self.flags.is_set(i))
    }

    /// Measured bandwidth if we have one, otherwise the self-reported value
    pub fn effective_bandwidth(&self) -> Option<u32> {
        self.measured_bandwidth.or(self.bandwidth)
    }

    /// Record an out-of-band measurement; the last one applied wins.
    pub fn apply_measured(&mut self, bandwidth: u32) {
        self.measured_bandwidth = Some(bandwidth);
    }
}

/// One line of a bandwidth-measurement file: a relay and its measured bw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredBandwidth {
    pub identity: Fingerprint,
    pub bandwidth: u32,
}

impl MeasuredBandwidth {
    /// Parse a measurement line.
    ///
    /// Format: whitespace-separated `key=value` tokens including
    /// `node_id=$<40 hex>` and `bw=<unsigned integer>`, terminated by a
    /// newline. Unknown tokens are ignored. A line without its newline is
    /// treated as a partial write and rejected.
    pub fn parse_line(line: &str) -> Result<Self> {
        if !line.ends_with('\n') {
            return Err(VoteError::parse("Measured bandwidth line is incomplete"));
        }

        let mut identity = None;
        let mut bandwidth = None;

        for token in line.split_whitespace() {
            if let Some(value) = token.strip_prefix("node_id=") {
                if identity.is_some() {
                    return Err(VoteError::parse("Duplicate node_id in bandwidth line"));
                }
                let hex = value
                    .strip_prefix('$')
                    .ok_or_else(|| VoteError::parse(format!("Bad node_id {:?}", value)))?;
                identity = Some(Fingerprint::from_hex(hex)?);
            } else if let Some(value) = token.strip_prefix("bw=") {
                if bandwidth.is_some() {
                    return Err(VoteError::parse("Duplicate bw in bandwidth line"));
                }
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VoteError::parse(format!("Bad bw value {:?}", value)));
                }
                let bw = value
                    .parse::<u32>()
                    .map_err(|e| VoteError::parse(format!("Bad bw value {:?}: {}", value, e)))?;
                bandwidth = Some(bw);
            }
        }

        match (identity, bandwidth) {
            (Some(identity), Some(bandwidth)) => Ok(Self { identity, bandwidth }),
            (None, _) => Err(VoteError::parse("Bandwidth line has no node_id")),
            (_, None) => Err(VoteError::parse("Bandwidth line has no bw")),
        }
    }
}

/// Apply a measurement to the matching entry of a vote's status list.
///
/// Returns the number of entries updated (0 or 1).
pub fn apply_measured_bandwidth(list: &mut [RouterStatus], line: &MeasuredBandwidth) -> usize {
    match list.iter_mut().find(|rs| rs.identity == line.identity) {
        Some(rs) => {
            rs.apply_measured(line.bandwidth);
            1
        }
        None => 0,
    }
}
