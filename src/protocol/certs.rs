//! Directory authority key certificates
//!
//! Each authority has a long-term identity key (whose SHA-1 digest is its
//! fingerprint, the "v3ident") and a medium-term signing key used for
//! votes and consensus signatures. A certificate binds the two.
//!
//! Issuing and rotating certificates happens elsewhere; this module only
//! models them and looks them up when signatures are checked.

use super::relay::Fingerprint;
use crate::error::{Result, VoteError};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A parsed authority certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityCert {
    /// Long-term identity key
    pub identity_key: VerifyingKey,
    /// Current signing key
    pub signing_key: VerifyingKey,
    /// When the certificate was published (unix seconds)
    pub published: u64,
    /// When the certificate stops being valid (unix seconds)
    pub expires: u64,
}

impl AuthorityCert {
    /// Build a certificate, rejecting an empty or inverted lifetime
    pub fn new(
        identity_key: VerifyingKey,
        signing_key: VerifyingKey,
        published: u64,
        expires: u64,
    ) -> Result<Self> {
        if expires <= published {
            return Err(VoteError::protocol(format!(
                "Certificate expires ({}) before it is published ({})",
                expires, published
            )));
        }
        Ok(Self {
            identity_key,
            signing_key,
            published,
            expires,
        })
    }

    /// Fingerprint of the identity key
    pub fn identity_digest(&self) -> Fingerprint {
        Fingerprint::digest_of(self.identity_key.as_bytes())
    }

    /// Fingerprint of the signing key
    pub fn signing_key_digest(&self) -> Fingerprint {
        Fingerprint::digest_of(self.signing_key.as_bytes())
    }

    /// Whether the certificate covers `now`
    pub fn is_live(&self, now: u64) -> bool {
        self.published <= now && now < self.expires
    }
}

/// Everything needed to put one signature on a document: the identity the
/// signature is attributed to, and the key that makes it.
///
/// For a legacy-key signature the identity is the authority's old
/// fingerprint rather than its current one.
#[derive(Clone)]
pub struct AuthoritySigner {
    identity: Fingerprint,
    key: SigningKey,
}

impl AuthoritySigner {
    pub fn new(identity: Fingerprint, key: SigningKey) -> Self {
        Self { identity, key }
    }

    pub fn identity(&self) -> Fingerprint {
        self.identity
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn signing_key_digest(&self) -> Fingerprint {
        Fingerprint::digest_of(self.key.verifying_key().as_bytes())
    }
}

impl fmt::Debug for AuthoritySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthoritySigner")
            .field("identity", &self.identity)
            .field("signing_key_digest", &self.signing_key_digest())
            .finish()
    }
}

/// Identity and signing key pair of one authority
#[derive(Clone)]
pub struct AuthorityKeys {
    identity: SigningKey,
    signing: SigningKey,
}

impl AuthorityKeys {
    pub fn new(identity: SigningKey, signing: SigningKey) -> Self {
        Self { identity, signing }
    }

    /// Deterministic keys from fixed seeds
    pub fn from_seeds(identity_seed: [u8; 32], signing_seed: [u8; 32]) -> Self {
        Self::new(
            SigningKey::from_bytes(&identity_seed),
            SigningKey::from_bytes(&signing_seed),
        )
    }

    pub fn identity_digest(&self) -> Fingerprint {
        Fingerprint::digest_of(self.identity.verifying_key().as_bytes())
    }

    /// Certificate describing these keys
    pub fn certificate(&self, published: u64, expires: u64) -> Result<AuthorityCert> {
        AuthorityCert::new(
            self.identity.verifying_key(),
            self.signing.verifying_key(),
            published,
            expires,
        )
    }

    /// Signer attributing signatures to this authority's identity
    pub fn signer(&self) -> AuthoritySigner {
        AuthoritySigner::new(self.identity_digest(), self.signing.clone())
    }
}

impl fmt::Debug for AuthorityKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityKeys")
            .field("identity", &self.identity_digest())
            .finish()
    }
}

/// Lookup of the current certificate for a voter identity
pub trait CertificateStore {
    fn current_certificate(&self, identity: &Fingerprint) -> Option<&AuthorityCert>;
}

impl CertificateStore for HashMap<Fingerprint, AuthorityCert> {
    fn current_certificate(&self, identity: &Fingerprint) -> Option<&AuthorityCert> {
        self.get(identity)
    }
}

/// In-memory certificate store keeping the newest certificate per identity
#[derive(Debug, Clone, Default)]
pub struct CertificateSet {
    certs: HashMap<Fingerprint, AuthorityCert>,
}

impl CertificateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate. An older certificate for the same identity
    /// never replaces a newer one. Returns true if the set changed.
    pub fn insert(&mut self, cert: AuthorityCert) -> bool {
        let identity = cert.identity_digest();
        match self.certs.get(&identity) {
            Some(existing) if existing.published >= cert.published => false,
            _ => {
                self.certs.insert(identity, cert);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

impl CertificateStore for CertificateSet {
    fn current_certificate(&self, identity: &Fingerprint) -> Option<&AuthorityCert> {
        self.certs.get(identity)
    }
}

impl FromIterator<AuthorityCert> for CertificateSet {
    fn from_iter<I: IntoIterator<Item = AuthorityCert>>(iter: I) -> Self {
        let mut set = CertificateSet::new();
        for cert in iter {
            set.insert(cert);
        }
        set
    }
}
