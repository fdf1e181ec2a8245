//! Textual network-status documents
//!
//! Renders and parses votes, consensuses and detached-signature documents
//! in a line-oriented `keyword args` format modelled on dir-spec v3.
//!
//! Rendering is canonical: the same document always produces the same
//! bytes, which is what lets independent authorities sign the same
//! consensus digest. The signed body of a vote or consensus runs from
//! `network-status-version` through the `directory-footer` line;
//! `directory-signature` blocks follow it.
//!
//! The parser is strict. Unknown keywords, duplicated single-use fields,
//! bad lengths and unknown flags are all parse errors; nothing is skipped.

use super::certs::{AuthorityCert, AuthoritySigner};
use super::crypto::{DigestAlgorithm, DirectoryCrypto, DocumentDigests, Ed25519Crypto};
use super::document::{
    DetachedSignatures, DocumentKind, DocumentSignature, NetworkStatus, SignatureState, VoterInfo,
};
use super::relay::{Fingerprint, FlagMask, KnownFlags, RouterStatus};
use crate::error::{Result, VoteError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{NaiveDateTime, TimeZone, Utc};
use ed25519_dalek::VerifyingKey;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FOOTER: &str = "directory-footer";
const SIG_BEGIN: &str = "-----BEGIN SIGNATURE-----";
const SIG_END: &str = "-----END SIGNATURE-----";
const SIG_LINE_WIDTH: usize = 64;

// ===== Timestamps =====

/// Format unix seconds as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn format_timestamp(secs: u64) -> Result<String> {
    let secs = i64::try_from(secs)
        .map_err(|_| VoteError::protocol(format!("Timestamp {} out of range", secs)))?;
    let dt = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| VoteError::protocol(format!("Timestamp {} out of range", secs)))?;
    Ok(dt.format(TIME_FORMAT).to_string())
}

/// Parse `YYYY-MM-DD HH:MM:SS` (UTC) into unix seconds
pub fn parse_timestamp(s: &str) -> Result<u64> {
    let naive = NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| VoteError::parse(format!("Bad timestamp {:?}: {}", s, e)))?;
    let secs = Utc.from_utc_datetime(&naive).timestamp();
    u64::try_from(secs).map_err(|_| VoteError::parse(format!("Timestamp {:?} before 1970", s)))
}

// ===== Rendering =====

/// A single whitespace-free token, or a render error
fn token<'a>(what: &str, s: &'a str) -> Result<&'a str> {
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return Err(VoteError::protocol(format!("{} {:?} is not a single token", what, s)));
    }
    Ok(s)
}

/// A `params` entry name: one token with no `=` in it
pub(crate) fn param_name(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains('=') || name.chars().any(char::is_whitespace) {
        return Err(VoteError::parse(format!(
            "Parameter name {:?} cannot be written on a params line",
            name
        )));
    }
    Ok(name)
}

/// Free text that must stay on one line
fn one_line<'a>(what: &str, s: &'a str) -> Result<&'a str> {
    if s.contains('\n') || s.contains('\r') {
        return Err(VoteError::protocol(format!("{} spans several lines", what)));
    }
    Ok(s)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Render the signed body of a vote or consensus, through `directory-footer`.
pub fn render_body(ns: &NetworkStatus) -> Result<String> {
    let mut out = String::with_capacity(256 + ns.routerstatus_list.len() * 160);

    push_line(&mut out, "network-status-version 3");
    push_line(&mut out, &format!("vote-status {}", ns.kind.keyword()));

    match ns.kind {
        DocumentKind::Vote => {
            let methods: Vec<String> = ns.supported_methods.iter().map(u32::to_string).collect();
            push_line(&mut out, format!("consensus-methods {}", methods.join(" ")).trim_end());
            let published = ns
                .published
                .ok_or_else(|| VoteError::protocol("Vote has no published time"))?;
            push_line(&mut out, &format!("published {}", format_timestamp(published)?));
        }
        DocumentKind::Consensus => {
            let method = ns
                .consensus_method
                .ok_or_else(|| VoteError::protocol("Consensus has no consensus method"))?;
            push_line(&mut out, &format!("consensus-method {}", method));
        }
    }

    push_line(&mut out, &format!("valid-after {}", format_timestamp(ns.valid_after)?));
    push_line(&mut out, &format!("fresh-until {}", format_timestamp(ns.fresh_until)?));
    push_line(&mut out, &format!("valid-until {}", format_timestamp(ns.valid_until)?));
    push_line(&mut out, &format!("voting-delay {} {}", ns.vote_seconds, ns.dist_seconds));

    if let Some(ref versions) = ns.client_versions {
        push_line(&mut out, &format!("client-versions {}", token("client-versions", versions)?));
    }
    if let Some(ref versions) = ns.server_versions {
        push_line(&mut out, &format!("server-versions {}", token("server-versions", versions)?));
    }

    let flags: Vec<&str> = ns.known_flags.iter().collect();
    push_line(&mut out, format!("known-flags {}", flags.join(" ")).trim_end());

    if !ns.net_params.is_empty() {
        let params = ns
            .net_params
            .iter()
            .map(|(k, v)| Ok(format!("{}={}", param_name(k)?, v)))
            .collect::<Result<Vec<String>>>()?;
        push_line(&mut out, &format!("params {}", params.join(" ")));
    }

    for voter in &ns.voters {
        render_voter(&mut out, voter)?;
    }

    if let Some(ref cert) = ns.cert {
        render_cert(&mut out, cert)?;
    }

    for rs in &ns.routerstatus_list {
        render_routerstatus(&mut out, rs, &ns.known_flags)?;
    }

    push_line(&mut out, FOOTER);
    Ok(out)
}

fn render_voter(out: &mut String, voter: &VoterInfo) -> Result<()> {
    push_line(
        out,
        &format!(
            "dir-source {} {} {} {} {} {}",
            token("nickname", &voter.nickname)?,
            voter.identity.to_hex(),
            token("address", &voter.address)?,
            voter.ip,
            voter.dir_port,
            voter.or_port
        ),
    );
    let contact = one_line("contact", &voter.contact)?;
    if contact.is_empty() {
        push_line(out, "contact");
    } else {
        push_line(out, &format!("contact {}", contact));
    }
    if let Some(legacy) = voter.legacy_identity {
        push_line(out, &format!("legacy-dir-key {}", legacy.to_hex()));
    }
    if let Some(digest) = voter.vote_digest {
        push_line(out, &format!("vote-digest {}", digest.to_hex()));
    }
    Ok(())
}

fn render_cert(out: &mut String, cert: &AuthorityCert) -> Result<()> {
    push_line(out, "dir-key-certificate-version 3");
    push_line(out, &format!("dir-identity-key {}", STANDARD.encode(cert.identity_key.as_bytes())));
    push_line(out, &format!("dir-signing-key {}", STANDARD.encode(cert.signing_key.as_bytes())));
    push_line(out, &format!("dir-key-published {}", format_timestamp(cert.published)?));
    push_line(out, &format!("dir-key-expires {}", format_timestamp(cert.expires)?));
    Ok(())
}

fn render_routerstatus(out: &mut String, rs: &RouterStatus, known: &KnownFlags) -> Result<()> {
    push_line(
        out,
        &format!(
            "r {} {} {} {} {} {} {}",
            token("nickname", &rs.nickname)?,
            rs.identity.to_base64(),
            rs.descriptor_digest.to_base64(),
            format_timestamp(rs.published_on)?,
            rs.address,
            rs.or_port,
            rs.dir_port
        ),
    );

    if known.len() < 64 && rs.flags.bits() >> known.len() != 0 {
        return Err(VoteError::protocol(format!(
            "Relay {} has flag bits outside known-flags",
            rs.identity
        )));
    }
    push_line(out, format!("s {}", known.names_in(rs.flags).join(" ")).trim_end());

    if let Some(ref version) = rs.version {
        push_line(out, &format!("v {}", one_line("version", version)?));
    }

    let mut weights = Vec::new();
    if let Some(bw) = rs.bandwidth {
        weights.push(format!("Bandwidth={}", bw));
    }
    if let Some(bw) = rs.measured_bandwidth {
        weights.push(format!("Measured={}", bw));
    }
    if !weights.is_empty() {
        push_line(out, &format!("w {}", weights.join(" ")));
    }
    Ok(())
}

/// Render signature blocks
pub fn render_signatures(signatures: &[DocumentSignature]) -> String {
    let mut out = String::new();
    for sig in signatures {
        push_line(
            &mut out,
            &format!(
                "directory-signature {} {} {}",
                sig.algorithm.name(),
                sig.identity.to_hex(),
                sig.signing_key_digest.to_hex()
            ),
        );
        push_line(&mut out, SIG_BEGIN);
        let encoded = STANDARD.encode(&sig.signature);
        for chunk in encoded.as_bytes().chunks(SIG_LINE_WIDTH) {
            // base64 output is ASCII, so every chunk is valid UTF-8
            push_line(&mut out, &String::from_utf8_lossy(chunk));
        }
        push_line(&mut out, SIG_END);
    }
    out
}

/// Render a consensus: its body followed by every collected signature
pub fn render_consensus(consensus: &NetworkStatus) -> Result<String> {
    if !consensus.is_consensus() {
        return Err(VoteError::protocol("render_consensus called on a vote"));
    }
    let mut out = render_body(consensus)?;
    out.push_str(&render_signatures(&consensus.signatures));
    Ok(out)
}

/// Render and sign a vote.
///
/// The signer must be the vote's own voter, and the key must match the
/// vote's certificate.
pub fn render_vote(
    vote: &NetworkStatus,
    signer: &AuthoritySigner,
    algorithm: DigestAlgorithm,
    crypto: &dyn DirectoryCrypto,
) -> Result<String> {
    if !vote.is_vote() {
        return Err(VoteError::protocol("render_vote called on a consensus"));
    }
    let voter = vote
        .voter()
        .ok_or_else(|| VoteError::protocol("Vote has no voter entry"))?;
    if voter.identity != signer.identity() {
        return Err(VoteError::protocol(format!(
            "Vote from {} cannot be signed by {}",
            voter.identity,
            signer.identity()
        )));
    }
    let cert = vote
        .cert
        .as_ref()
        .ok_or_else(|| VoteError::protocol("Vote has no certificate"))?;
    if cert.signing_key_digest() != signer.signing_key_digest() {
        return Err(VoteError::protocol("Signing key does not match the vote certificate"));
    }

    let body = render_body(vote)?;
    let digest = crypto.digest(algorithm, body.as_bytes())?;
    let signature = DocumentSignature {
        algorithm,
        identity: signer.identity(),
        signing_key_digest: signer.signing_key_digest(),
        signature: crypto.sign(&digest, signer.signing_key())?,
        state: SignatureState::Unchecked,
    };

    let mut out = body;
    out.push_str(&render_signatures(std::slice::from_ref(&signature)));
    Ok(out)
}

/// Render a detached-signature document
pub fn render_detached(detached: &DetachedSignatures) -> Result<String> {
    let mut out = String::new();
    push_line(&mut out, &format!("consensus-digest {}", hex::encode_upper(detached.digests.sha1)));
    push_line(
        &mut out,
        &format!("additional-digest sha256 {}", hex::encode_upper(detached.digests.sha256)),
    );
    push_line(&mut out, &format!("valid-after {}", format_timestamp(detached.valid_after)?));
    push_line(&mut out, &format!("fresh-until {}", format_timestamp(detached.fresh_until)?));
    push_line(&mut out, &format!("valid-until {}", format_timestamp(detached.valid_until)?));
    out.push_str(&render_signatures(&detached.signatures));
    Ok(out)
}

// ===== Parsing =====

/// One `keyword args` line
struct Line<'a> {
    number: usize,
    keyword: &'a str,
    args: &'a str,
}

impl<'a> Line<'a> {
    fn new(number: usize, text: &'a str) -> Self {
        let (keyword, args) = text.split_once(' ').unwrap_or((text, ""));
        Self {
            number,
            keyword,
            args,
        }
    }

    fn err(&self, msg: impl std::fmt::Display) -> VoteError {
        VoteError::parse(format!("line {} ({}): {}", self.number, self.keyword, msg))
    }

    fn fields(&self, n: usize) -> Result<Vec<&'a str>> {
        let fields: Vec<&str> = self.args.split_whitespace().collect();
        if fields.len() != n {
            return Err(self.err(format!("expected {} fields, got {}", n, fields.len())));
        }
        Ok(fields)
    }

    fn number<T: std::str::FromStr>(&self, s: &str) -> Result<T> {
        s.parse::<T>()
            .map_err(|_| self.err(format!("bad number {:?}", s)))
    }

    fn timestamp(&self) -> Result<u64> {
        parse_timestamp(self.args).map_err(|e| self.err(e))
    }
}

/// Store a single-use field, rejecting repeats
fn set_once<T>(slot: &mut Option<T>, value: T, line: &Line<'_>) -> Result<()> {
    if slot.is_some() {
        return Err(line.err("duplicate keyword"));
    }
    *slot = Some(value);
    Ok(())
}

/// Split a document into its signed body and the signature section
fn split_body(text: &str) -> Result<(&str, &str)> {
    if !text.starts_with("network-status-version ") {
        return Err(VoteError::parse("Document does not start with network-status-version"));
    }
    let marker = format!("\n{}\n", FOOTER);
    let end = text
        .find(&marker)
        .ok_or_else(|| VoteError::parse("Document has no directory-footer"))?
        + marker.len();
    Ok(text.split_at(end))
}

#[derive(Default)]
struct CertFields {
    identity_key: Option<VerifyingKey>,
    signing_key: Option<VerifyingKey>,
    published: Option<u64>,
    expires: Option<u64>,
}

fn parse_key(line: &Line<'_>) -> Result<VerifyingKey> {
    let bytes = STANDARD.decode(line.args.trim()).map_err(|e| line.err(e))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| line.err(format!("key has {} bytes, expected 32", bytes.len())))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| line.err(e))
}

/// Parse the signed body of a vote or consensus (without signatures)
fn parse_body(body: &str) -> Result<NetworkStatus> {
    let mut kind = None;
    let mut supported_methods = None;
    let mut consensus_method = None;
    let mut published = None;
    let mut valid_after = None;
    let mut fresh_until = None;
    let mut valid_until = None;
    let mut voting_delay = None;
    let mut client_versions = None;
    let mut server_versions = None;
    let mut known_flags: Option<KnownFlags> = None;
    let mut net_params: Option<BTreeMap<String, i32>> = None;
    let mut voters: Vec<VoterInfo> = Vec::new();
    let mut voter_contact_seen: Vec<bool> = Vec::new();
    let mut cert: Option<CertFields> = None;
    let mut routers: Vec<RouterStatus> = Vec::new();
    let mut seen_ids: HashSet<Fingerprint> = HashSet::new();

    for (idx, raw) in body.lines().enumerate() {
        let line = Line::new(idx + 1, raw);
        if idx == 0 {
            if raw != "network-status-version 3" {
                return Err(line.err("only version 3 documents are supported"));
            }
            continue;
        }

        match line.keyword {
            "vote-status" => {
                let k = DocumentKind::from_keyword(line.args)
                    .ok_or_else(|| line.err(format!("unknown status {:?}", line.args)))?;
                set_once(&mut kind, k, &line)?;
            }
            "consensus-methods" => {
                let methods = line
                    .args
                    .split_whitespace()
                    .map(|m| line.number::<u32>(m))
                    .collect::<Result<Vec<u32>>>()?;
                set_once(&mut supported_methods, methods, &line)?;
            }
            "consensus-method" => {
                let f = line.fields(1)?;
                set_once(&mut consensus_method, line.number::<u32>(f[0])?, &line)?;
            }
            "published" => set_once(&mut published, line.timestamp()?, &line)?,
            "valid-after" => set_once(&mut valid_after, line.timestamp()?, &line)?,
            "fresh-until" => set_once(&mut fresh_until, line.timestamp()?, &line)?,
            "valid-until" => set_once(&mut valid_until, line.timestamp()?, &line)?,
            "voting-delay" => {
                let f = line.fields(2)?;
                let delays = (line.number::<u32>(f[0])?, line.number::<u32>(f[1])?);
                set_once(&mut voting_delay, delays, &line)?;
            }
            "client-versions" => set_once(&mut client_versions, line.args.to_string(), &line)?,
            "server-versions" => set_once(&mut server_versions, line.args.to_string(), &line)?,
            "known-flags" => {
                let flags = KnownFlags::new(line.args.split_whitespace()).map_err(|e| line.err(e))?;
                set_once(&mut known_flags, flags, &line)?;
            }
            "params" => {
                let mut params = BTreeMap::new();
                for item in line.args.split_whitespace() {
                    let (k, v) = item
                        .split_once('=')
                        .ok_or_else(|| line.err(format!("bad parameter {:?}", item)))?;
                    if k.is_empty() {
                        return Err(line.err(format!("bad parameter {:?}", item)));
                    }
                    if params.insert(k.to_string(), line.number::<i32>(v)?).is_some() {
                        return Err(line.err(format!("parameter {:?} listed twice", k)));
                    }
                }
                set_once(&mut net_params, params, &line)?;
            }
            "dir-source" => {
                let f = line.fields(6)?;
                voters.push(VoterInfo {
                    nickname: f[0].to_string(),
                    identity: Fingerprint::from_hex(f[1]).map_err(|e| line.err(e))?,
                    address: f[2].to_string(),
                    ip: line.number::<IpAddr>(f[3])?,
                    dir_port: line.number::<u16>(f[4])?,
                    or_port: line.number::<u16>(f[5])?,
                    contact: String::new(),
                    legacy_identity: None,
                    vote_digest: None,
                });
                voter_contact_seen.push(false);
            }
            "contact" => {
                let seen = voter_contact_seen
                    .last_mut()
                    .ok_or_else(|| line.err("contact before dir-source"))?;
                if *seen {
                    return Err(line.err("duplicate keyword"));
                }
                *seen = true;
                if let Some(voter) = voters.last_mut() {
                    voter.contact = line.args.to_string();
                }
            }
            "legacy-dir-key" => {
                let voter = voters
                    .last_mut()
                    .ok_or_else(|| line.err("legacy-dir-key before dir-source"))?;
                let id = Fingerprint::from_hex(line.args).map_err(|e| line.err(e))?;
                set_once(&mut voter.legacy_identity, id, &line)?;
            }
            "vote-digest" => {
                let voter = voters
                    .last_mut()
                    .ok_or_else(|| line.err("vote-digest before dir-source"))?;
                let digest = Fingerprint::from_hex(line.args).map_err(|e| line.err(e))?;
                set_once(&mut voter.vote_digest, digest, &line)?;
            }
            "dir-key-certificate-version" => {
                if line.args != "3" {
                    return Err(line.err("only version 3 certificates are supported"));
                }
                set_once(&mut cert, CertFields::default(), &line)?;
            }
            "dir-identity-key" | "dir-signing-key" | "dir-key-published" | "dir-key-expires" => {
                let fields = cert
                    .as_mut()
                    .ok_or_else(|| line.err("certificate field outside a certificate"))?;
                match line.keyword {
                    "dir-identity-key" => {
                        set_once(&mut fields.identity_key, parse_key(&line)?, &line)?
                    }
                    "dir-signing-key" => {
                        set_once(&mut fields.signing_key, parse_key(&line)?, &line)?
                    }
                    "dir-key-published" => {
                        set_once(&mut fields.published, line.timestamp()?, &line)?
                    }
                    _ => set_once(&mut fields.expires, line.timestamp()?, &line)?,
                }
            }
            "r" => {
                let f = line.fields(8)?;
                let identity = Fingerprint::from_base64(f[1]).map_err(|e| line.err(e))?;
                if !seen_ids.insert(identity) {
                    return Err(line.err(format!("relay {} listed twice", identity)));
                }
                let published_on =
                    parse_timestamp(&format!("{} {}", f[3], f[4])).map_err(|e| line.err(e))?;
                let mut rs = RouterStatus::new(
                    identity,
                    Fingerprint::from_base64(f[2]).map_err(|e| line.err(e))?,
                    f[0],
                    line.number::<IpAddr>(f[5])?,
                    line.number::<u16>(f[6])?,
                );
                rs.published_on = published_on;
                rs.dir_port = line.number::<u16>(f[7])?;
                routers.push(rs);
            }
            "s" => {
                let known = known_flags
                    .as_ref()
                    .ok_or_else(|| line.err("flags before known-flags"))?;
                let rs = routers.last_mut().ok_or_else(|| line.err("s line before r line"))?;
                if rs.flags != FlagMask::EMPTY {
                    return Err(line.err("duplicate keyword"));
                }
                rs.flags = known
                    .mask_of(line.args.split_whitespace())
                    .map_err(|e| line.err(e))?;
            }
            "v" => {
                let rs = routers.last_mut().ok_or_else(|| line.err("v line before r line"))?;
                set_once(&mut rs.version, line.args.to_string(), &line)?;
            }
            "w" => {
                let rs = routers.last_mut().ok_or_else(|| line.err("w line before r line"))?;
                for item in line.args.split_whitespace() {
                    match item.split_once('=') {
                        Some(("Bandwidth", v)) => {
                            set_once(&mut rs.bandwidth, line.number::<u32>(v)?, &line)?
                        }
                        Some(("Measured", v)) => {
                            set_once(&mut rs.measured_bandwidth, line.number::<u32>(v)?, &line)?
                        }
                        _ => return Err(line.err(format!("bad weight {:?}", item))),
                    }
                }
            }
            FOOTER => {}
            other => return Err(line.err(format!("unknown keyword {:?}", other))),
        }
    }

    let kind = kind.ok_or_else(|| VoteError::parse("Missing vote-status"))?;
    let (vote_seconds, dist_seconds) =
        voting_delay.ok_or_else(|| VoteError::parse("Missing voting-delay"))?;

    let mut ns = NetworkStatus {
        kind,
        published,
        valid_after: valid_after.ok_or_else(|| VoteError::parse("Missing valid-after"))?,
        fresh_until: fresh_until.ok_or_else(|| VoteError::parse("Missing fresh-until"))?,
        valid_until: valid_until.ok_or_else(|| VoteError::parse("Missing valid-until"))?,
        vote_seconds,
        dist_seconds,
        supported_methods: Vec::new(),
        consensus_method,
        client_versions,
        server_versions,
        known_flags: known_flags.ok_or_else(|| VoteError::parse("Missing known-flags"))?,
        net_params: net_params.unwrap_or_default(),
        voters,
        cert: None,
        routerstatus_list: routers,
        signatures: Vec::new(),
        digests: None,
    };

    match kind {
        DocumentKind::Vote => {
            ns.supported_methods =
                supported_methods.ok_or_else(|| VoteError::parse("Vote has no consensus-methods"))?;
            if ns.published.is_none() {
                return Err(VoteError::parse("Vote has no published time"));
            }
            if ns.consensus_method.is_some() {
                return Err(VoteError::parse("Vote carries a consensus-method"));
            }
            if ns.voters.len() != 1 {
                return Err(VoteError::parse(format!(
                    "Vote must have exactly one dir-source, found {}",
                    ns.voters.len()
                )));
            }
            if ns.voters[0].vote_digest.is_some() {
                return Err(VoteError::parse("Vote carries a vote-digest"));
            }
            let fields = cert.ok_or_else(|| VoteError::parse("Vote has no certificate"))?;
            ns.cert = Some(AuthorityCert::new(
                fields.identity_key.ok_or_else(|| VoteError::parse("Missing dir-identity-key"))?,
                fields.signing_key.ok_or_else(|| VoteError::parse("Missing dir-signing-key"))?,
                fields.published.ok_or_else(|| VoteError::parse("Missing dir-key-published"))?,
                fields.expires.ok_or_else(|| VoteError::parse("Missing dir-key-expires"))?,
            )
            .map_err(|e| VoteError::parse(e.to_string()))?);
        }
        DocumentKind::Consensus => {
            if ns.published.is_some() {
                return Err(VoteError::parse("Consensus carries a published time"));
            }
            if cert.is_some() {
                return Err(VoteError::parse("Consensus carries a certificate"));
            }
            if supported_methods.is_some() {
                return Err(VoteError::parse("Consensus carries consensus-methods"));
            }
            if ns.consensus_method.is_none() {
                return Err(VoteError::parse("Consensus has no consensus-method"));
            }
            if ns.voters.iter().any(|v| v.legacy_identity.is_some()) {
                return Err(VoteError::parse("Consensus carries a legacy-dir-key"));
            }
        }
    }

    if voter_contact_seen.iter().any(|seen| !seen) {
        return Err(VoteError::parse("dir-source without contact"));
    }

    Ok(ns)
}

/// Parse a run of signature blocks
fn parse_signature_blocks(text: &str) -> Result<Vec<DocumentSignature>> {
    let mut signatures: Vec<DocumentSignature> = Vec::new();
    let mut lines = text.lines().enumerate();

    while let Some((idx, raw)) = lines.next() {
        let line = Line::new(idx + 1, raw);
        if line.keyword != "directory-signature" {
            return Err(line.err("expected directory-signature"));
        }

        let fields: Vec<&str> = line.args.split_whitespace().collect();
        let (algorithm, identity, key_digest) = match fields.as_slice() {
            // Old format without algorithm
            [identity, key_digest] => (DigestAlgorithm::Sha1, *identity, *key_digest),
            [algorithm, identity, key_digest] => (
                DigestAlgorithm::from_name(algorithm)
                    .ok_or_else(|| line.err(format!("unknown digest algorithm {:?}", algorithm)))?,
                *identity,
                *key_digest,
            ),
            _ => return Err(line.err("malformed directory-signature")),
        };

        match lines.next() {
            Some((_, SIG_BEGIN)) => {}
            _ => return Err(line.err("signature block does not begin")),
        }
        let mut encoded = String::new();
        loop {
            match lines.next() {
                Some((_, SIG_END)) => break,
                Some((_, chunk)) => encoded.push_str(chunk.trim()),
                None => return Err(line.err("signature block does not end")),
            }
        }

        let signature = DocumentSignature {
            algorithm,
            identity: Fingerprint::from_hex(identity).map_err(|e| line.err(e))?,
            signing_key_digest: Fingerprint::from_hex(key_digest).map_err(|e| line.err(e))?,
            signature: STANDARD.decode(&encoded).map_err(|e| line.err(e))?,
            state: SignatureState::Unchecked,
        };
        if signatures.iter().any(|s| s.identity == signature.identity) {
            return Err(line.err(format!("second signature from {}", signature.identity)));
        }
        signatures.push(signature);
    }

    Ok(signatures)
}

/// Parse and check a signed vote.
///
/// The vote's certificate must belong to its voter and the vote's single
/// signature must verify under the certificate's signing key.
pub fn parse_vote_with(text: &str, crypto: &dyn DirectoryCrypto) -> Result<NetworkStatus> {
    let (body, sig_text) = split_body(text)?;
    let mut vote = parse_body(body)?;
    if !vote.is_vote() {
        return Err(VoteError::parse("Expected a vote, found a consensus"));
    }
    let mut signatures = parse_signature_blocks(sig_text)?;
    if signatures.len() != 1 {
        return Err(VoteError::parse(format!(
            "Vote must carry exactly one signature, found {}",
            signatures.len()
        )));
    }

    let digests = DocumentDigests::compute(crypto, body.as_bytes())?;
    let voter_id = vote.voters[0].identity;
    let cert = vote
        .cert
        .as_ref()
        .ok_or_else(|| VoteError::parse("Vote has no certificate"))?;
    if cert.identity_digest() != voter_id {
        return Err(VoteError::protocol(format!(
            "Vote certificate does not belong to voter {}",
            voter_id
        )));
    }

    let sig = &mut signatures[0];
    if sig.identity != voter_id || sig.signing_key_digest != cert.signing_key_digest() {
        return Err(VoteError::protocol("Vote signature is not from the vote's certificate"));
    }
    if !crypto.verify(digests.get(sig.algorithm), &sig.signature, &cert.signing_key)? {
        return Err(VoteError::protocol(format!(
            "Signature on vote from {} does not verify",
            voter_id
        )));
    }
    sig.state = SignatureState::Good;

    vote.signatures = signatures;
    vote.digests = Some(digests);
    Ok(vote)
}

/// Parse and check a signed vote with the stock Ed25519 crypto
pub fn parse_vote(text: &str) -> Result<NetworkStatus> {
    parse_vote_with(text, &Ed25519Crypto)
}

/// Parse a consensus, digesting its body through `crypto`.
///
/// Signatures are left `Unchecked`.
pub fn parse_consensus_with(text: &str, crypto: &dyn DirectoryCrypto) -> Result<NetworkStatus> {
    let (body, sig_text) = split_body(text)?;
    let mut consensus = parse_body(body)?;
    if !consensus.is_consensus() {
        return Err(VoteError::parse("Expected a consensus, found a vote"));
    }
    consensus.signatures = parse_signature_blocks(sig_text)?;
    consensus.digests = Some(DocumentDigests::compute(crypto, body.as_bytes())?);
    Ok(consensus)
}

/// Parse a consensus with the stock Ed25519 crypto
pub fn parse_consensus(text: &str) -> Result<NetworkStatus> {
    parse_consensus_with(text, &Ed25519Crypto)
}

/// Parse a detached-signature document
pub fn parse_detached_signatures(text: &str) -> Result<DetachedSignatures> {
    let mut sha1 = None;
    let mut sha256 = None;
    let mut valid_after = None;
    let mut fresh_until = None;
    let mut valid_until = None;

    let sig_start = text
        .find("directory-signature ")
        .filter(|&i| i == 0 || text.as_bytes()[i - 1] == b'\n')
        .unwrap_or(text.len());
    let (header, sig_text) = text.split_at(sig_start);

    for (idx, raw) in header.lines().enumerate() {
        let line = Line::new(idx + 1, raw);
        match line.keyword {
            "consensus-digest" => {
                let bytes = hex::decode(line.args).map_err(|e| line.err(e))?;
                let arr: [u8; 20] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| line.err("SHA-1 digest has wrong length"))?;
                set_once(&mut sha1, arr, &line)?;
            }
            "additional-digest" => {
                let f = line.fields(2)?;
                if f[0] != "sha256" {
                    return Err(line.err(format!("unknown digest algorithm {:?}", f[0])));
                }
                let bytes = hex::decode(f[1]).map_err(|e| line.err(e))?;
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| line.err("SHA-256 digest has wrong length"))?;
                set_once(&mut sha256, arr, &line)?;
            }
            "valid-after" => set_once(&mut valid_after, line.timestamp()?, &line)?,
            "fresh-until" => set_once(&mut fresh_until, line.timestamp()?, &line)?,
            "valid-until" => set_once(&mut valid_until, line.timestamp()?, &line)?,
            other => return Err(line.err(format!("unknown keyword {:?}", other))),
        }
    }

    Ok(DetachedSignatures {
        digests: DocumentDigests {
            sha1: sha1.ok_or_else(|| VoteError::parse("Missing consensus-digest"))?,
            sha256: sha256.ok_or_else(|| VoteError::parse("Missing additional-digest"))?,
        },
        valid_after: valid_after.ok_or_else(|| VoteError::parse("Missing valid-after"))?,
        fresh_until: fresh_until.ok_or_else(|| VoteError::parse("Missing fresh-until"))?,
        valid_until: valid_until.ok_or_else(|| VoteError::parse("Missing valid-until"))?,
        signatures: parse_signature_blocks(sig_text)?,
    })
}
