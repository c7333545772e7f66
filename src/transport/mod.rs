//! TCP transport layer.
//!
//! This module owns the connections to the remote service and the
//! machinery that lets a caller wait on an asynchronous exchange.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  acquire   ┌───────────────┐        ┌──────────────┐
//! │   Channel    │──────────► │  WorkerPool   │        │   Remote     │
//! │              │            │  Worker 1..N  │◄──TCP─►│   service    │
//! │  WaitFuture  │◄─resolve── │  send / recv  │        │              │
//! └──────────────┘            └───────────────┘        └──────────────┘
//!         ▲                           │
//!         └──── CorrelationTable ◄────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlation` | Token → pending call table and [`WaitFuture`] |
//! | `pool` | Admission control strategies |
//! | `worker` | One connection with its send and receive loops |

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation.
pub mod correlation;

/// Worker pools.
pub mod pool;

/// Connection workers.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlation::{CorrelationTable, WaitFuture};
pub use pool::{BoundedPool, SinglePool, WorkerLease, WorkerPool, new_pool};
pub use worker::{RequestHandler, Worker, WorkerContext, WorkerState};
