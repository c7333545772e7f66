//! Channel configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use misty_channel::ChannelConfig;
//!
//! let config = ChannelConfig::new("api.example.com")
//!     .with_port(9011)
//!     .with_timeout(Duration::from_secs(10))
//!     .with_max_workers(4);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default remote port.
pub const DEFAULT_PORT: u16 = 9011;

/// Default per-call wait bound (30s).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default delay between connect attempts (10s).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default pool capacity.
pub const DEFAULT_MAX_WORKERS: usize = 1;

/// Default bound on one connect attempt (10s).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default framer buffer bound (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// ChannelConfig
// ============================================================================

/// Connection, pooling and timing settings of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Remote host name or address.
    pub host: String,

    /// Remote port.
    pub port: u16,

    /// How long a call waits for its response.
    pub timeout: Duration,

    /// Delay between connect attempts. Must be non-zero.
    pub retry_interval: Duration,

    /// Maximum number of concurrent connections.
    pub max_workers: usize,

    /// Bound on one connect attempt.
    pub connect_timeout: Duration,

    /// Largest accepted incoming message, in bytes.
    pub max_frame_size: usize,

    /// `User-Agent` header stamped on every outgoing request.
    pub user_agent: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_workers: DEFAULT_MAX_WORKERS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ChannelConfig {
    /// Creates a configuration for `host` with default settings.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ChannelConfig {
    /// Sets the remote port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the per-call wait bound.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay between connect attempts.
    #[inline]
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the pool capacity.
    #[inline]
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the bound on one connect attempt.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the largest accepted incoming message.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Sets the `User-Agent` header value.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ChannelConfig {
    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config(
                "Host is required. Use .host() to set it.\n\
                 Example: Channel::builder().host(\"api.example.com\")",
            ));
        }

        if self.port == 0 {
            return Err(Error::config("Port must be non-zero"));
        }

        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }

        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be non-zero"));
        }

        if self.retry_interval.is_zero() {
            return Err(Error::config("retry_interval must be non-zero"));
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be non-zero"));
        }

        if self.max_frame_size == 0 {
            return Err(Error::config("max_frame_size must be non-zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
