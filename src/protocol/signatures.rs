//! Signature collection on a finalized consensus
//!
//! Once a consensus body has been built and digested it never changes.
//! Everything here works off that fixed digest, and verification
//! re-renders the body to check the digest still describes it:
//! - `sign` produces one authority's signature over it
//! - `attach` / `merge_detached` add signatures, at most one per voter
//! - `verify` / `check_signatures` check them against authority certificates
//!
//! A signature that fails verification is marked `Bad` and kept in the
//! document so operators can see which authority misbehaved.

use super::certs::{AuthorityCert, AuthoritySigner, CertificateStore};
use super::crypto::{DigestAlgorithm, DirectoryCrypto, DocumentDigests};
use super::document::{
    DetachedSignatures, DocumentSignature, NetworkStatus, SignatureState, SignatureStatus,
};
use super::netdoc::render_body;
use super::relay::Fingerprint;
use crate::config::VotingConfig;
use crate::error::{Result, VoteError};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outcome of checking every voter's signature on a consensus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureSummary {
    /// Signatures that verified
    pub good: usize,
    /// Signatures that did not verify
    pub bad: usize,
    /// Voters with no signature at all
    pub absent: usize,
    /// Signatures we could not check for want of a matching certificate
    pub missing_cert: usize,
}

impl SignatureSummary {
    /// Whether more than half of `n_authorities` signed correctly
    pub fn has_quorum(&self, n_authorities: usize) -> bool {
        self.good * 2 > n_authorities
    }

    pub fn total(&self) -> usize {
        self.good + self.bad + self.absent + self.missing_cert
    }
}

/// Signs, attaches, merges and verifies consensus signatures
#[derive(Clone)]
pub struct SignatureCollector {
    crypto: Arc<dyn DirectoryCrypto>,
    algorithm: DigestAlgorithm,
}

impl SignatureCollector {
    pub fn new(crypto: Arc<dyn DirectoryCrypto>, algorithm: DigestAlgorithm) -> Self {
        Self { crypto, algorithm }
    }

    /// Collector signing with the configured digest algorithm
    pub fn from_config(config: &VotingConfig, crypto: Arc<dyn DirectoryCrypto>) -> Self {
        Self::new(crypto, config.signature_digest)
    }

    /// Digest algorithm new signatures are made over
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Sign the consensus digest on behalf of `signer`.
    ///
    /// Fails with `NotFinalized` if the consensus has no digest yet.
    pub fn sign(
        &self,
        consensus: &NetworkStatus,
        signer: &AuthoritySigner,
    ) -> Result<DocumentSignature> {
        let digests = consensus.digest()?;
        let signature = self
            .crypto
            .sign(digests.get(self.algorithm), signer.signing_key())?;

        log::debug!(
            "Signed consensus as {} ({} digest)",
            signer.identity(),
            self.algorithm.name()
        );

        Ok(DocumentSignature {
            algorithm: self.algorithm,
            identity: signer.identity(),
            signing_key_digest: signer.signing_key_digest(),
            signature,
            state: SignatureState::Unchecked,
        })
    }

    /// Add a signature to the consensus.
    ///
    /// Returns 1 if it was added and 0 if that voter already has a
    /// signature on this document. Signatures from identities that are not
    /// in the voter list are rejected.
    pub fn attach(
        &self,
        consensus: &mut NetworkStatus,
        signature: DocumentSignature,
    ) -> Result<usize> {
        consensus.digest()?;
        if consensus.find_voter(&signature.identity).is_none() {
            return Err(VoteError::UnknownVoter(signature.identity.to_hex()));
        }
        Ok(insert_signature(consensus, signature))
    }

    /// Sign and attach in one step
    pub fn sign_and_attach(
        &self,
        consensus: &mut NetworkStatus,
        signer: &AuthoritySigner,
    ) -> Result<usize> {
        let signature = self.sign(consensus, signer)?;
        self.attach(consensus, signature)
    }

    /// Merge signatures from a detached-signature document.
    ///
    /// The detached document must reference this consensus: same digests
    /// and same validity window. Signatures from unknown voters are
    /// skipped, and a voter that already signed keeps its existing
    /// signature. Returns the number of signatures added.
    pub fn merge_detached(
        &self,
        consensus: &mut NetworkStatus,
        detached: &DetachedSignatures,
    ) -> Result<usize> {
        let digests = consensus.digest()?;
        if !digests.matches(&detached.digests) {
            log::warn!("Detached signatures reference a different consensus");
            return Err(VoteError::DigestMismatch);
        }
        if detached.valid_after != consensus.valid_after
            || detached.fresh_until != consensus.fresh_until
            || detached.valid_until != consensus.valid_until
        {
            return Err(VoteError::protocol(
                "Detached signatures have a different validity window",
            ));
        }

        let mut added = 0;
        for sig in &detached.signatures {
            if consensus.find_voter(&sig.identity).is_none() {
                log::warn!("Skipping detached signature from unknown voter {}", sig.identity);
                continue;
            }
            let mut sig = sig.clone();
            sig.state = SignatureState::Unchecked;
            added += insert_signature(consensus, sig);
        }

        log::info!(
            "Merged {} of {} detached signatures ({} total)",
            added,
            detached.signatures.len(),
            consensus.signatures.len()
        );
        Ok(added)
    }

    /// Check one voter's signature against a certificate without changing
    /// the document.
    ///
    /// The digest is recomputed from the current body. A body that no
    /// longer matches its stored digest makes every present signature `Bad`.
    pub fn verify(
        &self,
        consensus: &NetworkStatus,
        voter: &Fingerprint,
        cert: &AuthorityCert,
    ) -> Result<SignatureStatus> {
        let digests = consensus.digest()?;
        if consensus.find_voter(voter).is_none() {
            return Err(VoteError::UnknownVoter(voter.to_hex()));
        }
        if cert.identity_digest() != *voter {
            return Err(VoteError::protocol(format!(
                "Certificate for {} used to check voter {}",
                cert.identity_digest(),
                voter
            )));
        }

        let sig = match consensus.signature_by(voter) {
            Some(sig) => sig,
            None => return Ok(SignatureStatus::Absent),
        };
        if sig.signing_key_digest != cert.signing_key_digest() {
            return Err(VoteError::protocol(format!(
                "Signature from {} was made with key {}, certificate has {}",
                voter,
                sig.signing_key_digest,
                cert.signing_key_digest()
            )));
        }

        let current = self.current_digests(consensus)?;
        if !current.matches(digests) {
            log::warn!(
                "Consensus body changed after it was digested; signature from {} rejected",
                voter
            );
            return Ok(SignatureStatus::Bad);
        }

        let ok = self
            .crypto
            .verify(current.get(sig.algorithm), &sig.signature, &cert.signing_key)?;
        Ok(if ok {
            SignatureStatus::Good
        } else {
            SignatureStatus::Bad
        })
    }

    /// Digests of the body as it renders now
    fn current_digests(&self, consensus: &NetworkStatus) -> Result<DocumentDigests> {
        let body = render_body(consensus)?;
        DocumentDigests::compute(self.crypto.as_ref(), body.as_bytes())
    }

    /// Like `verify`, but record the result on the stored signature
    pub fn check_voter_signature(
        &self,
        consensus: &mut NetworkStatus,
        voter: &Fingerprint,
        cert: &AuthorityCert,
    ) -> Result<SignatureStatus> {
        let status = self.verify(consensus, voter, cert)?;
        let state = match status {
            SignatureStatus::Good => SignatureState::Good,
            SignatureStatus::Bad => {
                log::warn!("Bad consensus signature from {}", voter);
                SignatureState::Bad
            }
            SignatureStatus::Absent => return Ok(status),
        };
        if let Some(sig) = consensus.signature_by_mut(voter) {
            sig.state = state;
        }
        Ok(status)
    }

    /// Check every voter's signature using certificates from `certs`
    pub fn check_signatures<C>(
        &self,
        consensus: &mut NetworkStatus,
        certs: &C,
    ) -> Result<SignatureSummary>
    where
        C: CertificateStore + ?Sized,
    {
        let mut summary = SignatureSummary::default();
        let voters: Vec<Fingerprint> = consensus.voters.iter().map(|v| v.identity).collect();

        for voter in voters {
            let signing_key_digest = match consensus.signature_by(&voter) {
                Some(sig) => sig.signing_key_digest,
                None => {
                    summary.absent += 1;
                    continue;
                }
            };
            let cert = match certs.current_certificate(&voter) {
                Some(cert) if cert.signing_key_digest() == signing_key_digest => cert,
                _ => {
                    log::debug!("No certificate to check signature from {}", voter);
                    summary.missing_cert += 1;
                    continue;
                }
            };
            match self.check_voter_signature(consensus, &voter, cert)? {
                SignatureStatus::Good => summary.good += 1,
                SignatureStatus::Bad => summary.bad += 1,
                SignatureStatus::Absent => summary.absent += 1,
            }
        }

        log::info!(
            "Consensus signatures: {} good, {} bad, {} absent, {} without certificate",
            summary.good,
            summary.bad,
            summary.absent,
            summary.missing_cert
        );
        Ok(summary)
    }

    /// Every signature on the consensus as a detached-signature document
    pub fn detached_signatures(&self, consensus: &NetworkStatus) -> Result<DetachedSignatures> {
        let digests = consensus.digest()?.clone();
        Ok(DetachedSignatures {
            digests,
            valid_after: consensus.valid_after,
            fresh_until: consensus.fresh_until,
            valid_until: consensus.valid_until,
            signatures: consensus
                .signatures
                .iter()
                .map(|sig| DocumentSignature {
                    state: SignatureState::Unchecked,
                    ..sig.clone()
                })
                .collect(),
        })
    }
}

impl fmt::Debug for SignatureCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureCollector")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Insert keeping signatures ordered by identity; 0 if the voter already signed
fn insert_signature(consensus: &mut NetworkStatus, signature: DocumentSignature) -> usize {
    match consensus
        .signatures
        .binary_search_by(|s| s.identity.cmp(&signature.identity))
    {
        Ok(_) => 0,
        Err(pos) => {
            log::debug!("Attached signature from {}", signature.identity);
            consensus.signatures.insert(pos, signature);
            1
        }
    }
}

/// A consensus shared between tasks.
///
/// Mutations (`attach`, `merge_detached`, `check_signatures`) hold the
/// write lock; `verify` only needs the read lock and may run alongside
/// other verifications.
#[derive(Debug, Clone)]
pub struct SharedConsensus {
    inner: Arc<RwLock<NetworkStatus>>,
}

impl SharedConsensus {
    pub fn new(consensus: NetworkStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(consensus)),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NetworkStatus>> {
        self.inner
            .read()
            .map_err(|_| VoteError::Internal("consensus lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NetworkStatus>> {
        self.inner
            .write()
            .map_err(|_| VoteError::Internal("consensus lock poisoned".into()))
    }

    pub fn attach(
        &self,
        collector: &SignatureCollector,
        signature: DocumentSignature,
    ) -> Result<usize> {
        collector.attach(&mut *self.write()?, signature)
    }

    pub fn merge_detached(
        &self,
        collector: &SignatureCollector,
        detached: &DetachedSignatures,
    ) -> Result<usize> {
        collector.merge_detached(&mut *self.write()?, detached)
    }

    pub fn verify(
        &self,
        collector: &SignatureCollector,
        voter: &Fingerprint,
        cert: &AuthorityCert,
    ) -> Result<SignatureStatus> {
        collector.verify(&*self.read()?, voter, cert)
    }

    pub fn check_signatures<C>(
        &self,
        collector: &SignatureCollector,
        certs: &C,
    ) -> Result<SignatureSummary>
    where
        C: CertificateStore + ?Sized,
    {
        collector.check_signatures(&mut *self.write()?, certs)
    }

    /// Copy of the current document
    pub fn snapshot(&self) -> Result<NetworkStatus> {
        Ok(self.read()?.clone())
    }

    pub fn signature_count(&self) -> Result<usize> {
        Ok(self.read()?.signatures.len())
    }
}
