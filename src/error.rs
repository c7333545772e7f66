//! Error types for the channel.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use misty_channel::{Channel, Request, Result};
//!
//! async fn example(channel: &Channel) -> Result<()> {
//!     let response = channel.call(Request::new("GET", "/feeds")).await?;
//!     println!("status: {}", response.status);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::FrameTooLarge`] |
//! | Protocol | [`Error::Protocol`] |
//! | Correlation | [`Error::DuplicateToken`], [`Error::RequestTimeout`] |
//! | Lifecycle | [`Error::ShuttingDown`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::Token;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when channel configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// TCP connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A single connect attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed by the peer or by eviction.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Incoming frame exceeded the configured size bound.
    ///
    /// The stream cannot be resynchronised, so this is fatal for the worker.
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Configured maximum frame size.
        limit: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed message on the wire.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// A call with the same token is already in flight.
    #[error("Token {token} already has a pending call")]
    DuplicateToken {
        /// The conflicting token.
        token: Token,
    },

    /// No matching response arrived in time.
    #[error("Request {token} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Token of the request that timed out.
        token: Token,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The channel is shutting down and admits no more calls.
    #[error("Channel is shutting down")]
    ShuttingDown,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(limit: usize) -> Self {
        Self::FrameTooLarge { limit }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a duplicate token error.
    #[inline]
    pub fn duplicate_token(token: Token) -> Self {
        Self::DuplicateToken { token }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(token: Token, timeout_ms: u64) -> Self {
        Self::RequestTimeout { token, timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a transport-level error.
    ///
    /// Transport errors evict the worker that observed them.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::FrameTooLarge { .. }
                | Self::Io(_)
        )
    }

    /// Returns `true` if this is a protocol (decode) error.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Json(_))
    }

    /// Returns `true` if resubmitting the call may succeed.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::RequestTimeout { .. }
                | Self::DuplicateToken { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
