//! Channel facade and configuration.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ChannelBuilder`] with validation |
//! | `config` | [`ChannelConfig`] settings and defaults |
//! | `core` | [`Channel`] calls, handler registration and lifecycle |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for channel configuration.
pub mod builder;

/// Channel settings.
pub mod config;

/// Channel facade.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ChannelBuilder;
pub use config::ChannelConfig;
pub use core::Channel;
