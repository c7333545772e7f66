//! Wire protocol: envelopes, codec and stream framing.
//!
//! # Protocol Overview
//!
//! The stream is a sequence of concatenated JSON objects. Each object is
//! one of two envelopes, told apart by key presence:
//!
//! | Message Type | Marker key | Direction |
//! |--------------|------------|-----------|
//! | `Request` | `method` | Either |
//! | `Response` | `status` | Either |
//!
//! Objects matching neither shape are discarded.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | [`Codec`] trait and [`JsonCodec`] |
//! | `framer` | Brace-balance [`Framer`] |
//! | `message` | [`Request`], [`Response`] and [`Message`] |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope serializer/deserializer.
pub mod codec;

/// Stream framing.
pub mod framer;

/// Envelope types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{Codec, JsonCodec};
pub use framer::Framer;
pub use message::{Headers, Message, Request, Response};
