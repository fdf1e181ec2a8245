//! Full voting round
//!
//! Three authorities publish votes that disagree on timing, parameters,
//! versions, flag vocabulary and some relays. Each authority computes the
//! consensus from the votes in its own order, signs it, and the signatures
//! are pooled through detached-signature documents.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tor_dirvote::protocol::apply_measured_bandwidth;
use tor_dirvote::protocol::netdoc::render_body;
use tor_dirvote::{
    parse_consensus, parse_detached_signatures, parse_vote, render_consensus, render_detached,
    render_vote, AuthorityCert, AuthorityKeys, CertificateSet, ConsensusBuilder, DigestAlgorithm,
    Ed25519Crypto, Fingerprint, KnownFlags, MeasuredBandwidth, NetworkStatus, RouterStatus,
    SignatureCollector, SignatureState, SignatureStatus, VoterInfo, VotingConfig, VotingSchedule,
};

const NOW: u64 = 1_180_000_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Authority {
    keys: AuthorityKeys,
    cert: AuthorityCert,
}

fn authority(seed: u8) -> Authority {
    let keys = AuthorityKeys::from_seeds([seed; 32], [seed.wrapping_mul(7).wrapping_add(1); 32]);
    let cert = keys.certificate(NOW - 86_400, NOW + 86_400 * 365).unwrap();
    Authority { keys, cert }
}

fn sign_vote(vote: &NetworkStatus, auth: &Authority) -> String {
    render_vote(vote, &auth.keys.signer(), DigestAlgorithm::Sha256, &Ed25519Crypto).unwrap()
}

fn relay(
    nickname: &str,
    id: u8,
    digest: u8,
    address: &str,
    or_port: u16,
    dir_port: u16,
    published_on: u64,
    version: &str,
) -> RouterStatus {
    let mut rs = RouterStatus::new(
        Fingerprint::new([id; 20]),
        Fingerprint::new([digest; 20]),
        nickname,
        address.parse().unwrap(),
        or_port,
    );
    rs.dir_port = dir_port;
    rs.published_on = published_on;
    rs.version = Some(version.to_string());
    rs
}

/// Switch a vote to a new flag vocabulary, carrying relay flags over by name
fn set_known_flags(vote: &mut NetworkStatus, names: &str) {
    let new_flags = KnownFlags::new(names.split_whitespace()).unwrap();
    for rs in &mut vote.routerstatus_list {
        rs.flags = vote.known_flags.remap(rs.flags, &new_flags);
    }
    vote.known_flags = new_flags;
}

fn set_flags(vote: &mut NetworkStatus, idx: usize, names: &[&str]) {
    vote.routerstatus_list[idx].flags = vote.known_flags.mask_of(names.iter().copied()).unwrap();
}

fn params(vote: &mut NetworkStatus, list: &[(&str, i32)]) {
    vote.net_params = list.iter().map(|(k, v)| (k.to_string(), *v)).collect();
}

fn set_voter(vote: &mut NetworkStatus, nickname: &str, address: &str, auth: &Authority) {
    let voter = &mut vote.voters[0];
    voter.nickname = nickname.to_string();
    voter.address = address.to_string();
    voter.ip = address.parse().unwrap();
    voter.identity = auth.keys.identity_digest();
    vote.cert = Some(auth.cert.clone());
}

const BASE_FLAGS: &str = "Authority Exit Fast Guard Running Stable V2Dir Valid";
const ALL_BUT_AUTHORITY: &[&str] = &[
    "Exit", "Fast", "Guard", "Running", "Stable", "V2Dir", "Valid",
];

#[test]
fn test_three_authority_voting_round() {
    init_logging();

    let a1 = authority(1);
    let a2 = authority(2);
    let a3 = authority(3);
    let legacy = authority(4);

    // ===== First vote =====
    let mut vote = NetworkStatus::new_vote(
        NOW,
        VotingSchedule {
            valid_after: NOW + 1000,
            fresh_until: NOW + 2000,
            valid_until: NOW + 3000,
            vote_seconds: 100,
            dist_seconds: 200,
        },
    );
    vote.supported_methods = vec![1, 2, 3, 4];
    vote.client_versions = Some("0.1.2.14,0.1.2.15".into());
    vote.server_versions = Some("0.1.2.14,0.1.2.15,0.1.2.16".into());
    vote.known_flags = KnownFlags::new(BASE_FLAGS.split(' ')).unwrap();
    vote.voters.push(VoterInfo {
        nickname: "Voter1".into(),
        identity: a1.keys.identity_digest(),
        address: "1.2.3.4".into(),
        ip: "1.2.3.4".parse().unwrap(),
        dir_port: 80,
        or_port: 9000,
        contact: "voter@example.com".into(),
        legacy_identity: None,
        vote_digest: None,
    });
    vote.cert = Some(a1.cert.clone());
    params(&mut vote, &[("circuitwindow", 101), ("foo", 990)]);
    vote.routerstatus_list = vec![
        relay("router2", 3, 78, "153.0.136.1", 443, 8000, NOW - 1500, "0.1.2.14"),
        relay("router1", 5, 77, "153.0.153.1", 443, 0, NOW - 1000, "0.2.0.5"),
        relay("router3", 33, 79, "170.0.153.1", 400, 9999, NOW - 1000, "0.1.0.3"),
        relay("router4", 34, 48, "192.0.2.3", 500, 1999, NOW - 1000, "0.1.6.3"),
    ];
    set_flags(&mut vote, 0, &["Running"]);
    set_flags(&mut vote, 1, ALL_BUT_AUTHORITY);
    let all: Vec<&str> = BASE_FLAGS.split(' ').collect();
    set_flags(&mut vote, 2, &all);

    let v1_text = sign_vote(&vote, &a1);
    let mut v1 = parse_vote(&v1_text).unwrap();

    assert!(v1.is_vote());
    assert_eq!(v1.published, Some(NOW));
    assert_eq!(v1.schedule(), vote.schedule());
    assert_eq!(v1.client_versions, vote.client_versions);
    assert_eq!(v1.server_versions, vote.server_versions);
    let voter = v1.voter().unwrap();
    assert_eq!(voter.nickname, "Voter1");
    assert_eq!(voter.address, "1.2.3.4");
    assert_eq!(voter.dir_port, 80);
    assert_eq!(voter.or_port, 9000);
    assert_eq!(voter.contact, "voter@example.com");
    assert_eq!(v1.cert.as_ref().unwrap().signing_key, a1.keys.signer().verifying_key());
    assert_eq!(
        v1.known_flags.names().join(":"),
        "Authority:Exit:Fast:Guard:Running:Stable:V2Dir:Valid"
    );
    assert_eq!(v1.routerstatus_list.len(), 4);
    let rs = &v1.routerstatus_list[0];
    assert_eq!(rs.version.as_deref(), Some("0.1.2.14"));
    assert_eq!(rs.published_on, NOW - 1500);
    assert_eq!(rs.nickname, "router2");
    assert_eq!(rs.identity, Fingerprint::new([3; 20]));
    assert_eq!(rs.descriptor_digest.as_bytes(), b"NNNNNNNNNNNNNNNNNNNN");
    assert_eq!(rs.dir_port, 8000);
    assert_eq!(rs.flags.bits(), 16);
    let rs = &v1.routerstatus_list[1];
    assert_eq!(rs.nickname, "router1");
    assert_eq!(rs.descriptor_digest.as_bytes(), b"MMMMMMMMMMMMMMMMMMMM");
    assert_eq!(rs.dir_port, 0);
    assert_eq!(rs.flags.bits(), 254);

    let measured = MeasuredBandwidth {
        identity: Fingerprint::new([33; 20]),
        bandwidth: 1024,
    };
    assert_eq!(apply_measured_bandwidth(&mut v1.routerstatus_list, &measured), 1);
    assert_eq!(v1.routerstatus_list[2].measured_bandwidth, Some(1024));

    // ===== Second vote: other times, no versions, extra flags =====
    vote.published = Some(NOW + 1);
    vote.fresh_until = NOW + 3005;
    vote.dist_seconds = 300;
    params(&mut vote, &[("bar", 2_000_000_000), ("circuitwindow", 20)]);
    vote.client_versions = None;
    vote.server_versions = None;
    set_voter(&mut vote, "Voter2", "2.3.4.5", &a2);
    set_known_flags(&mut vote, &format!("{} MadeOfCheese MadeOfTin", BASE_FLAGS));
    vote.routerstatus_list.remove(2);
    let fast = vote.known_flags.index_of("Fast").unwrap();
    vote.routerstatus_list[0].flags.set(fast);

    let v2 = parse_vote(&sign_vote(&vote, &a2)).unwrap();
    assert_eq!(
        v2.known_flags.names().join(":"),
        "Authority:Exit:Fast:Guard:MadeOfCheese:MadeOfTin:Running:Stable:V2Dir:Valid"
    );
    // 1023 - Authority(1) - MadeOfCheese(16) - MadeOfTin(32)
    assert_eq!(v2.routerstatus_list[1].flags.bits(), 974);

    // ===== Third vote: a legacy key and a different descriptor =====
    vote.published = Some(NOW);
    vote.fresh_until = NOW + 2003;
    vote.dist_seconds = 250;
    params(&mut vote, &[("circuitwindow", 80), ("foo", 660)]);
    vote.supported_methods.push(5);
    vote.client_versions = Some("0.1.2.14,0.1.2.17".into());
    vote.server_versions = Some("0.1.2.10,0.1.2.15,0.1.2.16".into());
    set_voter(&mut vote, "Voter3", "3.4.5.6", &a3);
    vote.voters[0].legacy_identity = Some(legacy.keys.identity_digest());
    vote.routerstatus_list.remove(0);
    vote.routerstatus_list[0].descriptor_digest = Fingerprint::new([b'Z'; 20]);

    let v3 = parse_vote(&sign_vote(&vote, &a3)).unwrap();
    assert_eq!(v3.voter().unwrap().legacy_identity, Some(legacy.keys.identity_digest()));

    // ===== Consensus as computed by authority 3 =====
    let builder = ConsensusBuilder::new(VotingConfig::default(), Arc::new(Ed25519Crypto));
    let collector = SignatureCollector::new(Arc::new(Ed25519Crypto), DigestAlgorithm::Sha256);

    let mut votes = vec![v3.clone(), v1.clone(), v2.clone()];
    let mut con = builder.build_with_agreed_method(&votes).unwrap();
    collector.sign_and_attach(&mut con, &a3.keys.signer()).unwrap();
    collector.sign_and_attach(&mut con, &legacy.keys.signer()).unwrap();

    let con_text = render_consensus(&con).unwrap();
    let parsed = parse_consensus(&con_text).unwrap();
    assert_eq!(parsed, con);
    let mut con = parsed;

    assert!(con.is_consensus());
    assert_eq!(con.consensus_method, Some(4));
    assert_eq!(con.published, None);
    assert_eq!(con.valid_after, NOW + 1000);
    assert_eq!(con.fresh_until, NOW + 2003);
    assert_eq!(con.valid_until, NOW + 3000);
    assert_eq!(con.vote_seconds, 100);
    assert_eq!(con.dist_seconds, 250);
    assert_eq!(con.client_versions.as_deref(), Some("0.1.2.14"));
    assert_eq!(con.server_versions.as_deref(), Some("0.1.2.15,0.1.2.16"));
    assert_eq!(
        con.known_flags.names().join(":"),
        "Authority:Exit:Fast:Guard:MadeOfCheese:MadeOfTin:Running:Stable:V2Dir:Valid"
    );
    let params: Vec<String> = con.net_params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    assert_eq!(params.join(":"), "bar=2000000000:circuitwindow=80:foo=660");

    // 3 voters, 1 legacy key
    assert_eq!(con.voters.len(), 4);
    assert!(con.voters.windows(2).all(|w| w[0].identity < w[1].identity));
    for vote in [&v1, &v2, &v3] {
        let theirs = vote.voter().unwrap();
        let ours = con.find_voter(&theirs.identity).unwrap();
        assert_eq!(ours.nickname, theirs.nickname);
        assert_eq!(ours.address, theirs.address);
        assert_eq!(ours.ip, theirs.ip);
        assert_eq!(ours.dir_port, theirs.dir_port);
        assert_eq!(ours.or_port, theirs.or_port);
        assert_eq!(ours.contact, theirs.contact);
        assert_eq!(ours.vote_digest, Some(Fingerprint::new(vote.digest().unwrap().sha1)));
    }
    let pseudo = con.find_voter(&legacy.keys.identity_digest()).unwrap();
    assert_eq!(pseudo.nickname, "Voter3-legacy");

    assert!(con.cert.is_none());
    assert_eq!(con.routerstatus_list.len(), 2);

    // Listed by two of three votes
    let rs = &con.routerstatus_list[0];
    assert_eq!(rs.identity, Fingerprint::new([3; 20]));
    assert_eq!(rs.descriptor_digest.as_bytes(), b"NNNNNNNNNNNNNNNNNNNN");
    for flag in ["Authority", "Exit", "Fast", "Guard", "Stable", "V2Dir", "Valid", "Named"] {
        assert!(!con.has_flag(rs, flag), "unexpected {}", flag);
    }
    assert!(con.has_flag(rs, "Running"));
    assert_eq!(rs.version.as_deref(), Some("0.1.2.14"));

    // Listed by all three: twice with digest 'M', once with 'Z'
    let rs = &con.routerstatus_list[1];
    assert_eq!(rs.identity, Fingerprint::new([5; 20]));
    assert_eq!(rs.nickname, "router1");
    assert_eq!(rs.descriptor_digest.as_bytes(), b"MMMMMMMMMMMMMMMMMMMM");
    assert_eq!(rs.published_on, NOW - 1000);
    assert_eq!(rs.address, "153.0.153.1".parse::<std::net::IpAddr>().unwrap());
    assert_eq!(rs.or_port, 443);
    assert_eq!(rs.dir_port, 0);
    assert!(!con.has_flag(rs, "Authority"));
    for flag in ALL_BUT_AUTHORITY {
        assert!(con.has_flag(rs, flag), "missing {}", flag);
    }
    assert!(!con.has_flag(rs, "Named"));
    assert_eq!(rs.version.as_deref(), Some("0.2.0.5"));

    // ===== Signatures: voter 2 has not signed, voter 3 has =====
    let v2_id = a2.keys.identity_digest();
    let v3_id = a3.keys.identity_digest();
    assert!(con.signature_by(&v2_id).is_none());
    assert_eq!(collector.verify(&con, &v2_id, &a2.cert).unwrap(), SignatureStatus::Absent);
    assert_eq!(con.signature_by(&v3_id).unwrap().state, SignatureState::Unchecked);
    assert_eq!(
        collector.check_voter_signature(&mut con, &v3_id, &a3.cert).unwrap(),
        SignatureStatus::Good
    );
    assert_eq!(con.signature_by(&v3_id).unwrap().state, SignatureState::Good);

    // ===== The other two authorities compute the same body =====
    let mut rng = StdRng::seed_from_u64(0x5eed);
    votes.shuffle(&mut rng);
    let mut con2 = builder.build_with_agreed_method(&votes).unwrap();
    collector.sign_and_attach(&mut con2, &a2.keys.signer()).unwrap();
    votes.shuffle(&mut rng);
    let mut con3 = builder.build_with_agreed_method(&votes).unwrap();
    collector.sign_and_attach(&mut con3, &a1.keys.signer()).unwrap();

    assert_eq!(con.digest().unwrap(), con2.digest().unwrap());
    assert_eq!(con.digest().unwrap(), con3.digest().unwrap());
    assert_eq!(render_body(&con2).unwrap(), render_body(&con3).unwrap());

    // ===== Detached signatures =====
    let detached_text1 = render_detached(&collector.detached_signatures(&con3).unwrap()).unwrap();
    let dsig1 = parse_detached_signatures(&detached_text1).unwrap();
    assert_eq!(dsig1.valid_after, con3.valid_after);
    assert_eq!(dsig1.fresh_until, con3.fresh_until);
    assert_eq!(dsig1.valid_until, con3.valid_until);
    assert_eq!(&dsig1.digests, con3.digest().unwrap());
    assert_eq!(dsig1.signatures.len(), 1);
    assert_eq!(dsig1.signatures[0].identity, a1.keys.identity_digest());

    assert_eq!(collector.merge_detached(&mut con2, &dsig1).unwrap(), 1);
    let detached_text2 = render_detached(&collector.detached_signatures(&con2).unwrap()).unwrap();
    let dsig2 = parse_detached_signatures(&detached_text2).unwrap();
    assert_eq!(dsig2.signatures.len(), 2);

    // Adding the same signatures again changes nothing
    assert_eq!(collector.merge_detached(&mut con2, &dsig1).unwrap(), 0);

    assert_eq!(collector.merge_detached(&mut con, &dsig2).unwrap(), 2);
    assert_eq!(con.signatures.len(), 4);
    assert_eq!(
        collector.check_voter_signature(&mut con, &v2_id, &a2.cert).unwrap(),
        SignatureStatus::Good
    );
    assert_eq!(
        collector
            .check_voter_signature(&mut con, &a1.keys.identity_digest(), &a1.cert)
            .unwrap(),
        SignatureStatus::Good
    );

    // ===== Everyone checks everything =====
    let certs: CertificateSet = [&a1, &a2, &a3, &legacy].iter().map(|a| a.cert.clone()).collect();
    let summary = collector.check_signatures(&mut con, &certs).unwrap();
    assert_eq!(summary.good, 4);
    assert_eq!(summary.bad, 0);
    assert_eq!(summary.absent, 0);
    assert!(summary.has_quorum(3));

    // The fully signed consensus survives a text round trip
    let text = render_consensus(&con).unwrap();
    let reparsed = parse_consensus(&text).unwrap();
    assert_eq!(reparsed.signatures.len(), 4);
    assert!(reparsed.signatures.iter().all(|s| s.state == SignatureState::Unchecked));
    assert_eq!(reparsed.digest().unwrap(), con.digest().unwrap());
    assert_eq!(reparsed.routerstatus_list, con.routerstatus_list);
}

#[test]
fn test_detached_signatures_for_another_consensus_are_rejected() {
    init_logging();
    let a1 = authority(1);
    let a2 = authority(2);

    let make_vote = |auth: &Authority, nickname: &str, valid_until: u64| {
        let mut vote = NetworkStatus::new_vote(
            NOW,
            VotingSchedule {
                valid_after: NOW + 1000,
                fresh_until: NOW + 2000,
                valid_until,
                vote_seconds: 100,
                dist_seconds: 200,
            },
        );
        vote.supported_methods = vec![1, 2, 3, 4];
        vote.known_flags = KnownFlags::new(["Running"]).unwrap();
        vote.voters.push(VoterInfo {
            nickname: nickname.into(),
            identity: auth.keys.identity_digest(),
            address: "192.0.2.10".into(),
            ip: "192.0.2.10".parse().unwrap(),
            dir_port: 80,
            or_port: 443,
            contact: String::new(),
            legacy_identity: None,
            vote_digest: None,
        });
        vote.cert = Some(auth.cert.clone());
        vote
    };

    let builder = ConsensusBuilder::new(VotingConfig::default(), Arc::new(Ed25519Crypto));
    let collector = SignatureCollector::new(Arc::new(Ed25519Crypto), DigestAlgorithm::Sha1);

    let round_a = [make_vote(&a1, "alpha", NOW + 3000), make_vote(&a2, "beta", NOW + 3000)];
    let round_b = [make_vote(&a1, "alpha", NOW + 4000), make_vote(&a2, "beta", NOW + 4000)];

    let mut con_a = builder.build(&round_a, 4).unwrap();
    let mut con_b = builder.build(&round_b, 4).unwrap();
    collector.sign_and_attach(&mut con_b, &a2.keys.signer()).unwrap();

    let detached = collector.detached_signatures(&con_b).unwrap();
    let err = collector.merge_detached(&mut con_a, &detached).unwrap_err();
    assert!(err.is_document_rejection());
    assert!(con_a.signatures.is_empty());

    collector.sign_and_attach(&mut con_a, &a1.keys.signer()).unwrap();
    assert_eq!(
        collector.check_voter_signature(&mut con_a, &a1.keys.identity_digest(), &a1.cert).unwrap(),
        SignatureStatus::Good
    );
}
