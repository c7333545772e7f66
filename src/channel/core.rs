//! Channel facade.
//!
//! The [`Channel`] owns the correlation table and the active worker pool.
//! Every call acquires a worker, sends through it, waits on the response
//! future and releases the worker, whatever the outcome.
//!
//! # Example
//!
//! ```no_run
//! use misty_channel::{Channel, Request};
//!
//! # async fn example() -> misty_channel::Result<()> {
//! let channel = Channel::builder()
//!     .host("api.example.com")
//!     .max_workers(2)
//!     .build()?;
//!
//! match channel.execute(Request::new("GET", "/feeds")).await {
//!     Some(response) => println!("status {}", response.status),
//!     None => println!("no response"),
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::protocol::{Codec, Request, Response};
use crate::transport::{CorrelationTable, RequestHandler, WorkerContext, WorkerPool, new_pool};

use super::builder::ChannelBuilder;
use super::config::ChannelConfig;

// ============================================================================
// Constants
// ============================================================================

/// Header naming the body encoding of an outgoing request.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Header naming the client.
pub const USER_AGENT_HEADER: &str = "User-Agent";

/// Body encoding of every outgoing request.
pub const JSON_CONTENT_TYPE: &str = "application/json";

// ============================================================================
// Channel
// ============================================================================

/// Pooled request/response channel to one remote service.
///
/// Dropping the channel shuts it down.
pub struct Channel {
    /// Current settings.
    config: RwLock<ChannelConfig>,

    /// Collaborators shared with every worker.
    context: Arc<WorkerContext>,

    /// Active strategy, replaced when capacity crosses 1.
    pool: RwLock<Arc<dyn WorkerPool>>,

    /// Set once by [`Channel::shutdown`].
    closed: AtomicBool,
}

// ============================================================================
// Channel - Display
// ============================================================================

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.config.read();
        f.debug_struct("Channel")
            .field("host", &config.host)
            .field("port", &config.port)
            .field("max_workers", &config.max_workers)
            .field("worker_count", &self.worker_count())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Channel - Constructor
// ============================================================================

impl Channel {
    /// Creates a configuration builder for the channel.
    #[inline]
    #[must_use]
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    /// Assembles a channel from validated settings.
    pub(crate) fn new(
        config: ChannelConfig,
        codec: Arc<dyn Codec>,
        handler: Option<RequestHandler>,
    ) -> Self {
        let context = Arc::new(WorkerContext {
            host: config.host.clone(),
            port: config.port,
            retry_interval: config.retry_interval,
            connect_timeout: config.connect_timeout,
            max_frame_size: config.max_frame_size,
            codec,
            correlation: CorrelationTable::new(),
            handler: RwLock::new(handler),
        });

        let pool = new_pool(Arc::clone(&context), config.max_workers);

        debug!(
            host = %config.host,
            port = config.port,
            max_workers = config.max_workers,
            "Channel created"
        );

        Self {
            config: RwLock::new(config),
            context,
            pool: RwLock::new(pool),
            closed: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// Channel - Calls
// ============================================================================

impl Channel {
    /// Sends `request` and waits for its response with the configured timeout.
    ///
    /// `Content-Type` and `User-Agent` headers are set on the request and a
    /// token is generated when it has none.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - [`Error::ConnectionClosed`] if the connection failed mid-call
    /// - [`Error::DuplicateToken`] if the request token is already pending
    /// - [`Error::ShuttingDown`] if the channel is shut down
    pub async fn call(&self, request: Request) -> Result<Response> {
        let wait_timeout = self.timeout();
        self.call_with_timeout(request, wait_timeout).await
    }

    /// Same as [`Channel::call`] with an explicit wait bound.
    ///
    /// # Errors
    ///
    /// See [`Channel::call`].
    pub async fn call_with_timeout(
        &self,
        mut request: Request,
        wait_timeout: Duration,
    ) -> Result<Response> {
        let user_agent = self.config.read().user_agent.clone();
        request.set_header(CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE);
        request.set_header(USER_AGENT_HEADER, user_agent);

        let lease = loop {
            if self.is_shut_down() {
                return Err(Error::ShuttingDown);
            }

            // A replaced pool refuses its waiters; retry on the new one.
            let pool = self.pool();
            if let Some(lease) = pool.acquire().await {
                break lease;
            }
        };

        let future = lease.send(request)?;
        let token = future.token().clone();
        trace!(worker = %lease.id(), %token, "Request sent");

        let result = future.wait(wait_timeout).await;
        lease.release();

        match &result {
            Ok(response) => trace!(%token, status = response.status, "Response received"),
            Err(e) if e.is_timeout() => {
                debug!(%token, timeout_ms = wait_timeout.as_millis() as u64, "Call timed out");
            }
            Err(e) => debug!(%token, error = %e, "Call failed"),
        }

        result
    }

    /// Sends `request` and returns its response, or `None` on timeout,
    /// connection failure or shutdown.
    pub async fn execute(&self, request: Request) -> Option<Response> {
        self.call(request).await.ok()
    }

    /// Same as [`Channel::execute`] with an explicit wait bound.
    pub async fn execute_with_timeout(
        &self,
        request: Request,
        wait_timeout: Duration,
    ) -> Option<Response> {
        self.call_with_timeout(request, wait_timeout).await.ok()
    }
}

// ============================================================================
// Channel - Inbound Requests
// ============================================================================

impl Channel {
    /// Registers the handler for requests pushed by the peer.
    ///
    /// Replaces any previous handler. Without a handler inbound requests are
    /// logged and dropped.
    pub fn set_request_handler<F>(&self, handler: F)
    where
        F: Fn(Request) -> Option<Response> + Send + Sync + 'static,
    {
        *self.context.handler.write() = Some(Arc::new(handler));
    }

    /// Removes the inbound request handler.
    pub fn clear_request_handler(&self) {
        *self.context.handler.write() = None;
    }

    /// Returns `true` if an inbound request handler is registered.
    #[must_use]
    pub fn has_request_handler(&self) -> bool {
        self.context.handler.read().is_some()
    }
}

// ============================================================================
// Channel - Settings
// ============================================================================

impl Channel {
    /// Returns a snapshot of the current settings.
    #[must_use]
    pub fn config(&self) -> ChannelConfig {
        self.config.read().clone()
    }

    /// Returns the default wait bound of [`Channel::call`].
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.read().timeout
    }

    /// Changes the default wait bound for subsequent calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `timeout` is zero.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::config("timeout must be non-zero"));
        }
        self.config.write().timeout = timeout;
        Ok(())
    }

    /// Returns the pool capacity.
    #[inline]
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.config.read().max_workers
    }

    /// Changes the pool capacity.
    ///
    /// Crossing between 1 and more than 1 replaces the strategy: the old
    /// pool is shut down and its callers retry on the new one. Otherwise
    /// capacity is adjusted in place.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `max_workers` is zero
    /// - [`Error::ShuttingDown`] if the channel is shut down
    pub fn set_max_workers(&self, max_workers: usize) -> Result<()> {
        if max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }

        if self.is_shut_down() {
            return Err(Error::ShuttingDown);
        }

        let mut pool = self.pool.write();
        if !pool.set_capacity(max_workers) {
            let replacement = new_pool(Arc::clone(&self.context), max_workers);
            let previous = std::mem::replace(&mut *pool, replacement);
            previous.shutdown();
            debug!(max_workers, "Pool strategy replaced");
        }
        drop(pool);

        self.config.write().max_workers = max_workers;
        debug!(max_workers, "Channel capacity changed");
        Ok(())
    }
}

// ============================================================================
// Channel - Lifecycle
// ============================================================================

impl Channel {
    /// Closes every connection and resolves every pending call with no
    /// response.
    ///
    /// Blocked and future calls return [`Error::ShuttingDown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pool().shutdown();
        let failed = self.context.correlation.fail_all();

        info!(pending = failed, "Channel shut down");
    }

    /// Returns `true` after [`Channel::shutdown`].
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of calls waiting for a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.context.correlation.len()
    }

    /// Number of live connections, connecting ones included.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool().worker_count()
    }

    fn pool(&self) -> Arc<dyn WorkerPool> {
        Arc::clone(&*self.pool.read())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
