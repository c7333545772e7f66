//! Builder pattern for channel configuration.
//!
//! # Example
//!
//! ```no_run
//! use misty_channel::{Channel, Response};
//!
//! # fn example() -> misty_channel::Result<()> {
//! let channel = Channel::builder()
//!     .host("api.example.com")
//!     .port(9011)
//!     .max_workers(4)
//!     .on_request(|request| {
//!         println!("peer called {} {}", request.method, request.resource);
//!         Some(Response::ok())
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{Codec, JsonCodec, Request, Response};
use crate::transport::RequestHandler;

use super::config::ChannelConfig;
use super::core::Channel;

// ============================================================================
// ChannelBuilder
// ============================================================================

/// Builder for configuring a [`Channel`] instance.
///
/// Use [`Channel::builder()`] to create a new builder.
#[derive(Clone, Default)]
pub struct ChannelBuilder {
    /// Settings.
    config: ChannelConfig,
    /// Envelope codec, JSON when unset.
    codec: Option<Arc<dyn Codec>>,
    /// Inbound request handler.
    handler: Option<RequestHandler>,
}

impl fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("config", &self.config)
            .field("custom_codec", &self.codec.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

// ============================================================================
// ChannelBuilder Implementation
// ============================================================================

impl ChannelBuilder {
    /// Creates a new builder with default settings and no host.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting at once.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the remote host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the remote port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the per-call wait bound.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the delay between connect attempts.
    #[inline]
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Sets the pool capacity. `1` selects the single-connection strategy.
    #[inline]
    #[must_use]
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Sets the bound on one connect attempt.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the largest accepted incoming message.
    #[inline]
    #[must_use]
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Sets the `User-Agent` header value.
    #[inline]
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Injects the envelope codec.
    #[inline]
    #[must_use]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Registers the handler for requests pushed by the peer.
    ///
    /// The handler runs on the receive loop of the connection the request
    /// arrived on; its response is written back over that connection.
    #[must_use]
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: Fn(Request) -> Option<Response> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Builds the channel with validation.
    ///
    /// No connection is opened until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if a setting is invalid.
    pub fn build(self) -> Result<Channel> {
        self.config.validate()?;

        let codec = self.codec.unwrap_or_else(|| Arc::new(JsonCodec));
        Ok(Channel::new(self.config, codec, self.handler))
    }
}

// ============================================================================
// Tests
// ============================================================================
