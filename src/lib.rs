//! Misty Channel - Pooled bidirectional JSON request/response channel over TCP.
//!
//! This library lets an application call a remote service with JSON
//! envelopes over a small pool of TCP connections, and answer requests the
//! service pushes back over those same connections.
//!
//! # Architecture
//!
//! The channel follows a worker-pool model:
//!
//! - **Channel**: acquires a worker, sends, waits on a token-keyed future
//! - **Worker**: owns one connection with a send loop and a receive loop
//! - **Pool**: single-connection or bounded admission control
//!
//! Key design principles:
//!
//! - Messages are bare JSON objects with no length prefix; a brace-depth
//!   framer splits the byte stream
//! - Responses are matched to calls by `token`, never by connection order
//! - Any transport failure evicts the worker and resolves its pending calls
//!   with no response
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use misty_channel::{Channel, Request, Response, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let channel = Channel::builder()
//!         .host("api.example.com")
//!         .port(9011)
//!         .timeout(Duration::from_secs(10))
//!         .max_workers(2)
//!         .on_request(|request| {
//!             println!("peer pushed {}", request.resource);
//!             Some(Response::ok())
//!         })
//!         .build()?;
//!
//!     let response = channel.call(Request::new("GET", "/feeds")).await?;
//!     println!("status: {}", response.status);
//!
//!     channel.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | [`Channel`] facade, builder and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Token and worker ID wrappers |
//! | [`protocol`] | Message envelopes, codec and stream framer |
//! | [`transport`] | Workers, pools and correlation (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Channel facade and configuration.
///
/// Use [`Channel::builder()`] to create a configured channel instance.
pub mod channel;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire message types, envelope codec and stream framer.
pub mod protocol;

/// TCP transport layer.
///
/// Internal module handling connections, pooling and response correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{Channel, ChannelBuilder, ChannelConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Token, WorkerId};

// Protocol types
pub use protocol::{Codec, Headers, JsonCodec, Message, Request, Response};

// Transport types
pub use transport::RequestHandler;
