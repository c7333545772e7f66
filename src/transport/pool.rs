//! Worker pools with blocking admission control.
//!
//! Two strategies share the [`WorkerPool`] contract:
//!
//! | Strategy | Capacity | Acquisition |
//! |----------|----------|-------------|
//! | [`SinglePool`] | exactly 1 | Spin-polls an atomic Free→Busy swap |
//! | [`BoundedPool`] | 2 or more | Scans under the pool lock, otherwise waits for a wake-up |
//!
//! The single strategy never waits on a wake-up signal: in the degenerate
//! capacity-1 case it simply retries the swap after a short sleep.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                BoundedPool               │
//! │  ┌────────────┐ ┌────────────┐           │
//! │  │ Worker 1   │ │ Worker 2   │  ...  max │
//! │  │ Busy       │ │ Free       │           │
//! │  └────────────┘ └────────────┘           │
//! │        ▲ free()/evict() ──► wake         │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, trace};

use crate::error::Error;
use crate::identifiers::WorkerId;

use super::worker::{FailureHook, Worker, WorkerContext, WorkerState};

// ============================================================================
// Constants
// ============================================================================

/// Sleep between `try_take` attempts of the single-connection strategy.
const TAKE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Periodic re-scan of the bounded strategy while waiting.
const RESCAN_INTERVAL: Duration = Duration::from_secs(3);

// ============================================================================
// WorkerPool
// ============================================================================

/// Admission control over a set of workers.
#[async_trait]
pub trait WorkerPool: Send + Sync + fmt::Debug {
    /// Waits for a Free worker, creating one if capacity allows.
    ///
    /// Returns `None` only once the pool has been shut down.
    async fn acquire(&self) -> Option<WorkerLease>;

    /// Returns a worker to Free.
    fn release(&self, lease: WorkerLease) {
        lease.release();
    }

    /// Removes and closes a failed worker, waking blocked acquirers.
    fn evict(&self, worker: WorkerId, cause: &Error);

    /// Closes every worker and makes all current and future `acquire`
    /// calls return `None`.
    fn shutdown(&self);

    /// Adjusts capacity in place.
    ///
    /// Returns `false` if this strategy cannot serve `capacity` and must be
    /// replaced.
    fn set_capacity(&self, capacity: usize) -> bool;

    /// Maximum number of workers.
    fn capacity(&self) -> usize;

    /// Number of live workers, connecting ones included.
    fn worker_count(&self) -> usize;

    /// Returns `true` after [`WorkerPool::shutdown`].
    fn is_shut_down(&self) -> bool;
}

/// Creates the strategy matching `max_workers`.
#[must_use]
pub fn new_pool(context: Arc<WorkerContext>, max_workers: usize) -> Arc<dyn WorkerPool> {
    if max_workers <= 1 {
        SinglePool::new(context)
    } else {
        BoundedPool::new(context, max_workers)
    }
}

/// Builds the hook a worker uses to report its own failure to `pool`.
fn failure_hook<P: WorkerPool + 'static>(pool: Weak<P>) -> FailureHook {
    Arc::new(move |worker, cause| {
        if let Some(pool) = pool.upgrade() {
            pool.evict(worker, cause);
        }
    })
}

// ============================================================================
// WorkerLease
// ============================================================================

/// Exclusive use of a Busy worker.
///
/// Dropping the lease returns the worker to Free, whatever the outcome of
/// the call it was used for.
#[derive(Debug)]
pub struct WorkerLease {
    worker: Arc<Worker>,
}

impl WorkerLease {
    fn new(worker: Arc<Worker>) -> Self {
        trace!(worker = %worker.id(), "Worker acquired");
        Self { worker }
    }

    /// Returns the worker to Free.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for WorkerLease {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.worker.free();
    }
}

// ============================================================================
// SinglePool
// ============================================================================

/// Strategy for exactly one connection.
///
/// The worker is created lazily on first use and replaced lazily after it
/// is evicted.
pub struct SinglePool {
    me: Weak<Self>,
    context: Arc<WorkerContext>,
    slot: Mutex<Option<Arc<Worker>>>,
    wake: Arc<Notify>,
    closed: AtomicBool,
}

impl SinglePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(context: Arc<WorkerContext>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            context,
            slot: Mutex::new(None),
            wake: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the live worker, spawning one if there is none.
    fn current(&self) -> Option<Arc<Worker>> {
        let mut slot = self.slot.lock();

        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        if let Some(worker) = slot.as_ref()
            && !worker.is_evicted()
        {
            return Some(Arc::clone(worker));
        }

        let worker = Worker::spawn(
            Arc::clone(&self.context),
            Arc::clone(&self.wake),
            failure_hook(self.me.clone()),
        );
        *slot = Some(Arc::clone(&worker));
        Some(worker)
    }
}

impl fmt::Debug for SinglePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinglePool")
            .field("worker", &*self.slot.lock())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl WorkerPool for SinglePool {
    async fn acquire(&self) -> Option<WorkerLease> {
        loop {
            let worker = self.current()?;

            if worker.try_take() {
                return Some(WorkerLease::new(worker));
            }

            sleep(TAKE_POLL_INTERVAL).await;
        }
    }

    fn evict(&self, worker: WorkerId, cause: &Error) {
        let removed = {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|current| current.id() == worker) {
                slot.take()
            } else {
                None
            }
        };

        if let Some(removed) = removed {
            removed.close();
            debug!(%worker, error = %cause, "Worker removed from single pool");
        }
        self.wake.notify_waiters();
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let worker = self.slot.lock().take();

        if let Some(worker) = worker {
            worker.close();
        }
        self.wake.notify_waiters();
        debug!("Single pool shut down");
    }

    fn set_capacity(&self, capacity: usize) -> bool {
        capacity == 1
    }

    fn capacity(&self) -> usize {
        1
    }

    fn worker_count(&self) -> usize {
        usize::from(self.slot.lock().as_ref().is_some_and(|w| !w.is_evicted()))
    }

    fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// BoundedPool
// ============================================================================

/// Strategy for up to `capacity` connections.
pub struct BoundedPool {
    me: Weak<Self>,
    context: Arc<WorkerContext>,
    workers: Mutex<Vec<Arc<Worker>>>,
    capacity: AtomicUsize,
    wake: Arc<Notify>,
    closed: AtomicBool,
}

impl BoundedPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(context: Arc<WorkerContext>, capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            context,
            workers: Mutex::new(Vec::with_capacity(capacity)),
            capacity: AtomicUsize::new(capacity),
            wake: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Takes a Free worker, or spawns one if none is Free and capacity
    /// remains.
    ///
    /// Returns `Err(())` once the pool is closed.
    fn scan(&self) -> Result<Option<WorkerLease>, ()> {
        let mut workers = self.workers.lock();

        if self.closed.load(Ordering::Acquire) {
            return Err(());
        }

        workers.retain(|w| !w.is_evicted());

        if let Some(worker) = workers.iter().find(|w| w.try_take()) {
            return Ok(Some(WorkerLease::new(Arc::clone(worker))));
        }

        let capacity = self.capacity.load(Ordering::Acquire);
        if workers.len() < capacity {
            let worker = Worker::spawn(
                Arc::clone(&self.context),
                Arc::clone(&self.wake),
                failure_hook(self.me.clone()),
            );
            debug!(worker = %worker.id(), count = workers.len() + 1, capacity, "Pool grew");
            workers.push(worker);
        }

        Ok(None)
    }
}

impl fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedPool")
            .field("workers", &self.workers.lock().len())
            .field("capacity", &self.capacity.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl WorkerPool for BoundedPool {
    async fn acquire(&self) -> Option<WorkerLease> {
        loop {
            // Registered before scanning so a wake-up between scan and wait is kept.
            let notified = self.wake.notified();

            match self.scan() {
                Ok(Some(lease)) => return Some(lease),
                Ok(None) => {}
                Err(()) => return None,
            }

            tokio::select! {
                () = notified => {}
                () = sleep(RESCAN_INTERVAL) => {}
            }
        }
    }

    fn evict(&self, worker: WorkerId, cause: &Error) {
        let removed = {
            let mut workers = self.workers.lock();
            workers
                .iter()
                .position(|w| w.id() == worker)
                .map(|index| workers.remove(index))
        };

        if let Some(removed) = removed {
            removed.close();
            debug!(%worker, error = %cause, "Worker removed from pool");
        }
        self.wake.notify_waiters();
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let count = workers.len();

        for worker in workers {
            worker.close();
        }
        self.wake.notify_waiters();
        debug!(count, "Bounded pool shut down");
    }

    fn set_capacity(&self, capacity: usize) -> bool {
        if capacity < 2 {
            return false;
        }

        let previous = self.capacity.swap(capacity, Ordering::AcqRel);

        // Surplus idle workers go now, busy ones stay until they fail.
        let surplus: Vec<Arc<Worker>> = {
            let mut workers = self.workers.lock();
            let mut excess = workers.len().saturating_sub(capacity);
            let mut removed = Vec::new();
            workers.retain(|w| {
                let idle = matches!(w.state(), WorkerState::Free | WorkerState::Connecting);
                if excess > 0 && idle {
                    excess -= 1;
                    removed.push(Arc::clone(w));
                    false
                } else {
                    true
                }
            });
            removed
        };

        for worker in &surplus {
            worker.close();
        }

        info!(previous, capacity, closed = surplus.len(), "Pool capacity changed");
        self.wake.notify_waiters();
        true
    }

    fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    fn worker_count(&self) -> usize {
        self.workers.lock().iter().filter(|w| !w.is_evicted()).count()
    }

    fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================
