//! Type-safe identifiers.
//!
//! Newtype wrappers keep correlation tokens and worker IDs from being
//! mixed with arbitrary strings and integers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Token
// ============================================================================

/// Correlation key chosen by the caller for one outgoing request.
///
/// Tokens are opaque on the wire. Locally generated tokens are UUID v4
/// strings, but any string received from the peer is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Generates a fresh random token.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the token as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the token, returning the inner string.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Token {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Token {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ============================================================================
// WorkerId
// ============================================================================

/// Counter for worker IDs, unique for the lifetime of the process.
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection worker.
///
/// IDs are never reused, so a stale ID can never address a replacement worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocates the next worker ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
