//! Token correlation between outgoing requests and incoming responses.
//!
//! One [`CorrelationTable`] is shared by every worker of a channel. A call
//! registers its token before the request bytes are written, receiving a
//! [`WaitFuture`]; the receive loop that decodes the matching response
//! resolves it.
//!
//! # Lifecycle of a Pending Call
//!
//! | Event | Effect |
//! |-------|--------|
//! | Matching response | Entry removed, future resolved with the response |
//! | Owning worker evicted | Entry removed, future resolved with no response |
//! | Future dropped (timeout, cancellation) | Entry removed |
//! | Channel shutdown | All entries removed, futures resolved with no response |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{Token, WorkerId};
use crate::protocol::Response;

// ============================================================================
// Types
// ============================================================================

/// Resolution delivered to a waiting caller. `None` means "no response".
type Resolution = Option<Response>;

/// One registered call.
struct PendingCall {
    /// Registration sequence, distinguishes reuses of the same token.
    seq: u64,
    /// Worker the request was sent on.
    worker: WorkerId,
    /// Single-assignment resolver.
    resolver: oneshot::Sender<Resolution>,
}

impl PendingCall {
    fn resolve(self, resolution: Resolution) {
        // The caller may already have given up.
        let _ = self.resolver.send(resolution);
    }
}

// ============================================================================
// CorrelationTable
// ============================================================================

/// Concurrent map from token to pending call.
///
/// Safe to use from any number of tasks; callers never lock it themselves.
/// At most one live entry exists per token.
#[derive(Default)]
pub struct CorrelationTable {
    /// Live entries.
    entries: Mutex<FxHashMap<Token, PendingCall>>,
    /// Next registration sequence.
    next_seq: AtomicU64,
}

impl CorrelationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a call sent on `worker`.
    ///
    /// Must happen before the request is written, so a fast reply always
    /// finds its entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateToken`] if `token` is already pending.
    pub fn register(self: &Arc<Self>, token: Token, worker: WorkerId) -> Result<WaitFuture> {
        let (resolver, receiver) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&token) {
                return Err(Error::duplicate_token(token));
            }
            entries.insert(
                token.clone(),
                PendingCall {
                    seq,
                    worker,
                    resolver,
                },
            );
        }

        trace!(%token, %worker, "Pending call registered");

        Ok(WaitFuture {
            token,
            seq,
            receiver,
            table: Arc::clone(self),
        })
    }

    /// Resolves the pending call matching the response's token.
    ///
    /// Returns `false` for a correlation miss; the response is dropped.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(token) = response.token.as_ref() else {
            debug!(status = response.status, "Response without token dropped");
            return false;
        };

        let pending = self.entries.lock().remove(token);

        match pending {
            Some(pending) => {
                trace!(%token, "Pending call resolved");
                pending.resolve(Some(response));
                true
            }
            None => {
                debug!(%token, "Response for unknown token dropped");
                false
            }
        }
    }

    /// Resolves one pending call with no response.
    pub fn fail(&self, token: &Token) -> bool {
        let pending = self.entries.lock().remove(token);
        pending.map(|p| p.resolve(None)).is_some()
    }

    /// Resolves every pending call sent on `worker` with no response.
    ///
    /// Returns the number of calls failed.
    pub fn fail_worker(&self, worker: WorkerId) -> usize {
        let failed: Vec<PendingCall> = {
            let mut entries = self.entries.lock();
            let tokens: Vec<Token> = entries
                .iter()
                .filter(|(_, pending)| pending.worker == worker)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| entries.remove(token))
                .collect()
        };

        let count = failed.len();
        for pending in failed {
            pending.resolve(None);
        }

        if count > 0 {
            debug!(%worker, count, "Failed pending calls of evicted worker");
        }
        count
    }

    /// Resolves every pending call with no response.
    pub fn fail_all(&self) -> usize {
        let failed: Vec<_> = self.entries.lock().drain().collect();
        let count = failed.len();

        for (_, pending) in failed {
            pending.resolve(None);
        }

        if count > 0 {
            debug!(count, "Failed pending calls on shutdown");
        }
        count
    }

    /// Returns `true` if `token` has a live entry.
    #[inline]
    #[must_use]
    pub fn contains(&self, token: &Token) -> bool {
        self.entries.lock().contains_key(token)
    }

    /// Number of live entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes the entry only if it still belongs to registration `seq`.
    fn abandon(&self, token: &Token, seq: u64) {
        let mut entries = self.entries.lock();
        if entries.get(token).is_some_and(|pending| pending.seq == seq) {
            entries.remove(token);
            trace!(%token, "Abandoned pending call removed");
        }
    }
}

// ============================================================================
// WaitFuture
// ============================================================================

/// Caller-side handle for one pending call.
///
/// Resolved at most once, by whichever comes first of the matching
/// response or the eviction of the worker carrying the request. Dropping
/// it removes the pending call from the table.
pub struct WaitFuture {
    token: Token,
    seq: u64,
    receiver: oneshot::Receiver<Resolution>,
    table: Arc<CorrelationTable>,
}

impl WaitFuture {
    /// Token this future waits on.
    #[inline]
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Waits for the resolution, bounded by `wait_timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if resolved with no response
    /// - [`Error::RequestTimeout`] if nothing arrived in time
    pub async fn wait(mut self, wait_timeout: Duration) -> Result<Response> {
        match timeout(wait_timeout, &mut self.receiver).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None) | Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::request_timeout(
                self.token.clone(),
                wait_timeout.as_millis() as u64,
            )),
        }
    }
}

impl Drop for WaitFuture {
    fn drop(&mut self) {
        self.table.abandon(&self.token, self.seq);
    }
}

// ============================================================================
// Tests
// ============================================================================
