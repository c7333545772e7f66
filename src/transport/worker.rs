//! Connection worker: one TCP connection and its two loops.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──► Free ◄──► Busy
//!     │           │         │
//!     └───────────┴────┬────┘
//!                      ▼
//!                   Evicted (terminal)
//! ```
//!
//! A worker retries `connect` every `retry_interval` until it succeeds or is
//! closed. Once connected it runs:
//!
//! - a send loop, the only writer of the socket, draining a private queue
//! - a receive loop feeding the [`Framer`] and dispatching decoded messages
//!
//! Any transport failure evicts the worker: both loops stop, the socket is
//! closed, its pending calls resolve with no response, and the owning pool
//! is told through the failure hook. An evicted worker is never reused.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{Token, WorkerId};
use crate::protocol::{Codec, Framer, Message, Request, Response};

use super::correlation::{CorrelationTable, WaitFuture};

// ============================================================================
// Constants
// ============================================================================

/// Periodic wake of the send loop while its queue is idle.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Size of one socket read.
const READ_BUFFER_SIZE: usize = 4096;

// ============================================================================
// Types
// ============================================================================

/// Inbound request handler.
///
/// Called on the receive loop for every request pushed by the peer.
/// Return `Some(Response)` to answer over the same connection.
pub type RequestHandler = Arc<dyn Fn(Request) -> Option<Response> + Send + Sync>;

/// Called once when a worker is evicted by a transport failure.
pub(crate) type FailureHook = Arc<dyn Fn(WorkerId, &Error) + Send + Sync>;

// ============================================================================
// WorkerContext
// ============================================================================

/// Settings and collaborators shared by every worker of a channel.
pub struct WorkerContext {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Delay between connect attempts.
    pub retry_interval: Duration,
    /// Bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Framer buffer bound.
    pub max_frame_size: usize,
    /// Envelope codec.
    pub codec: Arc<dyn Codec>,
    /// Shared correlation table.
    pub correlation: Arc<CorrelationTable>,
    /// Inbound request handler.
    pub handler: RwLock<Option<RequestHandler>>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("retry_interval", &self.retry_interval)
            .field("pending", &self.correlation.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WorkerState
// ============================================================================

/// Allocation state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Establishing the connection.
    Connecting = 0,
    /// Connected and available.
    Free = 1,
    /// Held by a caller.
    Busy = 2,
    /// Closed for good.
    Evicted = 3,
}

impl WorkerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Free,
            2 => Self::Busy,
            _ => Self::Evicted,
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Owner of one connection.
pub struct Worker {
    id: WorkerId,
    state: AtomicU8,
    /// Outbound queue, consumed only by the send loop.
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: watch::Sender<bool>,
    /// Pool wake-up signal.
    wake: Arc<Notify>,
    on_failure: FailureHook,
    context: Arc<WorkerContext>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker - Constructor
// ============================================================================

impl Worker {
    /// Creates a worker and starts connecting in the background.
    pub(crate) fn spawn(
        context: Arc<WorkerContext>,
        wake: Arc<Notify>,
        on_failure: FailureHook,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let worker = Arc::new(Self {
            id: WorkerId::next(),
            state: AtomicU8::new(WorkerState::Connecting as u8),
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            wake,
            on_failure,
            context,
        });

        debug!(worker = %worker.id, "Worker spawned");
        tokio::spawn(Arc::clone(&worker).run(outbound_rx));

        worker
    }
}

// ============================================================================
// Worker - Public API
// ============================================================================

impl Worker {
    /// Returns the worker ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` if connected and not held by a caller.
    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state() == WorkerState::Free
    }

    /// Returns `true` once the worker has been evicted.
    #[inline]
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.state() == WorkerState::Evicted
    }

    /// Atomically moves the worker from Free to Busy.
    ///
    /// Returns `false` if the worker was not Free.
    pub fn try_take(&self) -> bool {
        self.transition(WorkerState::Free, WorkerState::Busy)
    }

    /// Returns a Busy worker to Free and wakes blocked acquirers.
    pub fn free(&self) {
        if self.transition(WorkerState::Busy, WorkerState::Free) {
            trace!(worker = %self.id, "Worker freed");
        }
        self.wake.notify_waiters();
    }

    /// Registers `request` and queues it for the send loop.
    ///
    /// A request without a token is given a fresh one.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateToken`] if the token is already pending
    /// - [`Error::ConnectionClosed`] if the worker has been evicted
    pub fn send(&self, mut request: Request) -> Result<WaitFuture> {
        let token = request.token.get_or_insert_with(Token::generate).clone();

        let future = self.context.correlation.register(token, self.id)?;

        if self.is_evicted() || self.outbound.send(Message::Request(request)).is_err() {
            return Err(Error::ConnectionClosed);
        }

        Ok(future)
    }

    /// Closes the connection without reporting a failure.
    ///
    /// Returns `false` if the worker was already evicted.
    pub(crate) fn close(&self) -> bool {
        let previous = self
            .state
            .swap(WorkerState::Evicted as u8, Ordering::AcqRel);
        if previous == WorkerState::Evicted as u8 {
            return false;
        }

        self.shutdown.send_replace(true);
        self.context.correlation.fail_worker(self.id);
        self.wake.notify_waiters();

        debug!(worker = %self.id, "Worker closed");
        true
    }
}

// ============================================================================
// Worker - Internals
// ============================================================================

impl Worker {
    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Evicts the worker after a transport failure.
    fn fail(&self, cause: Error) {
        if self.close() {
            warn!(worker = %self.id, error = %cause, "Worker evicted");
            (self.on_failure)(self.id, &cause);
        }
    }

    /// Connects, then runs both loops until the worker is evicted.
    async fn run(self: Arc<Self>, outbound: mpsc::UnboundedReceiver<Message>) {
        let _guard = EvictOnExit(&self);

        let Some(stream) = self.connect().await else {
            debug!(worker = %self.id, "Worker stopped before connecting");
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!(worker = %self.id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();

        if !self.transition(WorkerState::Connecting, WorkerState::Free) {
            return;
        }

        info!(
            worker = %self.id,
            host = %self.context.host,
            port = self.context.port,
            "Connection established"
        );
        self.wake.notify_waiters();

        let send_loop = tokio::spawn(Arc::clone(&self).send_loop(writer, outbound));
        self.receive_loop(reader).await;

        if let Err(e) = send_loop.await {
            warn!(worker = %self.id, error = %e, "Send loop task failed");
        }

        debug!(worker = %self.id, "Worker terminated");
    }

    /// Retries the connection every `retry_interval` until it succeeds.
    ///
    /// Returns `None` if the worker is closed first.
    async fn connect(&self) -> Option<TcpStream> {
        let mut shutdown = self.shutdown.subscribe();
        let context = &self.context;
        let mut attempt: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return None;
            }
            attempt += 1;

            let result = tokio::select! {
                _ = shutdown.changed() => return None,
                result = timeout(
                    context.connect_timeout,
                    TcpStream::connect((context.host.as_str(), context.port)),
                ) => result,
            };

            let error = match result {
                Ok(Ok(stream)) => return Some(stream),
                Ok(Err(e)) => {
                    Error::connection(format!("{}:{}: {e}", context.host, context.port))
                }
                Err(_) => Error::connection_timeout(context.connect_timeout.as_millis() as u64),
            };

            warn!(
                worker = %self.id,
                attempt,
                error = %error,
                retry_ms = context.retry_interval.as_millis() as u64,
                "Connect failed"
            );

            tokio::select! {
                _ = shutdown.changed() => return None,
                () = sleep(context.retry_interval) => {}
            }
        }
    }

    /// Writes queued messages one at a time.
    async fn send_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) {
        let _guard = EvictOnExit(&self);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                _ = shutdown.changed() => break,
                next = timeout(QUEUE_POLL_INTERVAL, outbound.recv()) => match next {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(_) => continue,
                },
            };

            let bytes = match self.context.codec.encode(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "Failed to encode outbound message");
                    if let Some(token) = message.token()
                        && matches!(message, Message::Request(_))
                    {
                        self.context.correlation.fail(token);
                    }
                    continue;
                }
            };

            let written = tokio::select! {
                _ = shutdown.changed() => break,
                written = writer.write_all(&bytes) => written,
            };

            if let Err(e) = written {
                self.fail(e.into());
                break;
            }

            trace!(worker = %self.id, token = ?message.token(), "Message sent");
        }

        let _ = writer.shutdown().await;
    }

    /// Frames incoming bytes and dispatches every complete message.
    async fn receive_loop(&self, mut reader: OwnedReadHalf) {
        let mut shutdown = self.shutdown.subscribe();
        let mut framer = Framer::new(self.context.max_frame_size);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = reader.read(&mut buffer) => read,
            };

            let count = match read {
                Ok(0) => {
                    self.fail(Error::ConnectionClosed);
                    break;
                }
                Ok(count) => count,
                Err(e) => {
                    self.fail(e.into());
                    break;
                }
            };

            let frames = match framer.feed(&buffer[..count]) {
                Ok(frames) => frames,
                Err(e) => {
                    self.fail(e);
                    break;
                }
            };

            for frame in frames {
                self.dispatch(&frame);
            }
        }
    }

    /// Classifies one frame and routes it.
    fn dispatch(&self, frame: &[u8]) {
        match self.context.codec.decode(frame) {
            Ok(Some(Message::Response(response))) => {
                self.context.correlation.resolve(response);
            }
            Ok(Some(Message::Request(request))) => self.handle_request(request),
            Ok(None) => trace!(worker = %self.id, "Unrecognised message discarded"),
            Err(e) => warn!(
                worker = %self.id,
                error = %e,
                len = frame.len(),
                "Discarding malformed frame"
            ),
        }
    }

    /// Runs the handler for a request pushed by the peer.
    fn handle_request(&self, request: Request) {
        let handler = self.context.handler.read().clone();
        let Some(handler) = handler else {
            debug!(
                method = %request.method,
                resource = %request.resource,
                "No handler for inbound request"
            );
            return;
        };

        let token = request.token.clone();
        let resource = request.resource.clone();

        let reply = match catch_unwind(AssertUnwindSafe(|| handler(request))) {
            Ok(reply) => reply,
            Err(_) => {
                error!(worker = %self.id, %resource, "Request handler panicked, request dropped");
                return;
            }
        };
        let Some(mut response) = reply else {
            return;
        };

        if response.token.is_none() {
            response.token = token;
        }

        if self.outbound.send(Message::Response(response)).is_err() {
            debug!(worker = %self.id, "Reply dropped, send loop stopped");
        }
    }
}

// ============================================================================
// EvictOnExit
// ============================================================================

/// Evicts the worker when one of its tasks ends, unwinding included.
struct EvictOnExit<'a>(&'a Worker);

impl Drop for EvictOnExit<'_> {
    fn drop(&mut self) {
        if !self.0.is_evicted() {
            self.0.fail(Error::connection("worker task stopped"));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
