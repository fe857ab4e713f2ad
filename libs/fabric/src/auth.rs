//! Pre-shared-key authentication.

use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// How a presented credential is compared against the stored key.
///
/// Both strategies are pure functions of `(candidate, stored)`; the only side
/// effect of authentication is the context's flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Exact string comparison against the stored key.
    #[default]
    Plain,
    /// The stored key is a hex sha256 digest; the candidate is hashed and
    /// compared case-insensitively.
    Sha256,
}

impl AuthMethod {
    /// Compares a presented candidate against the stored key.
    pub fn compare(&self, candidate: &str, stored: &str) -> bool {
        match self {
            AuthMethod::Plain => candidate == stored,
            AuthMethod::Sha256 => {
                let digest = hex::encode(Sha256::digest(candidate.as_bytes()));
                digest.eq_ignore_ascii_case(stored)
            }
        }
    }
}

/// A stored credential plus the connection's authenticated flag.
///
/// The flag is set only by [`AuthContext::authenticate`] and never reset
/// except by replacing the context.
#[derive(Debug)]
pub struct AuthContext {
    key: String,
    method: AuthMethod,
    authed: AtomicBool,
}

impl AuthContext {
    pub fn new(stored_key: impl Into<String>, method: AuthMethod) -> Self {
        Self {
            key: stored_key.into(),
            method,
            authed: AtomicBool::new(false),
        }
    }

    /// Compares `candidate` against the stored key, records the verdict in
    /// the authenticated flag, and returns it.
    ///
    /// An empty stored key always fails: a misconfigured server must never
    /// trivially accept.
    pub fn authenticate(&self, candidate: &str) -> bool {
        if self.key.is_empty() {
            warn!("cannot authenticate against an empty stored key");
            self.authed.store(false, Ordering::SeqCst);
            return false;
        }
        let ok = self.method.compare(candidate, &self.key);
        self.authed.store(ok, Ordering::SeqCst);
        debug!(ok, "authentication attempt");
        ok
    }

    pub fn authenticated(&self) -> bool {
        self.authed.load(Ordering::SeqCst)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
