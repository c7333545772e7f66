//! Byte-stream framer for concatenated JSON objects.
//!
//! The wire carries self-delimiting JSON objects back to back, with no
//! length prefix and no separator. Object boundaries are recovered from
//! brace balance. Braces inside string literals are not counted, so
//! payloads such as `{"body": "}{"}` frame correctly.
//!
//! # Stray bytes
//!
//! Whitespace between objects is skipped. Any other byte outside an object
//! is collected and handed out as its own frame when the next object
//! starts, so the decoder rejects it as a protocol error without
//! swallowing the well-formed object that follows.

// ============================================================================
// Imports
// ============================================================================

use std::mem;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 2048;

// ============================================================================
// Framer
// ============================================================================

/// Per-connection framing state.
///
/// Never shared between connections: each receive loop owns one.
#[derive(Debug)]
pub struct Framer {
    /// Bytes of the frame being assembled.
    buffer: Vec<u8>,
    /// Current object nesting depth.
    depth: usize,
    /// Inside a string literal.
    in_string: bool,
    /// Previous byte was a backslash inside a string.
    escaped: bool,
    /// Maximum bytes buffered for one frame.
    max_frame_size: usize,
}

impl Framer {
    /// Creates a framer that rejects frames larger than `max_frame_size`.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(INITIAL_CAPACITY.min(max_frame_size)),
            depth: 0,
            in_string: false,
            escaped: false,
            max_frame_size,
        }
    }

    /// Number of bytes buffered for the incomplete frame.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if a frame is partially assembled.
    #[inline]
    #[must_use]
    pub fn in_frame(&self) -> bool {
        self.depth > 0
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Feeds bytes from one read, returning every frame they complete.
    ///
    /// Frames are returned in stream order. A partial trailing frame stays
    /// buffered until a later call completes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if the pending frame grows past the
    /// limit. The framer is reset; the stream cannot be resynchronised.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();

        for &byte in data {
            if self.depth == 0 {
                self.feed_outside(byte, &mut frames);
            } else {
                self.feed_inside(byte, &mut frames);
            }

            if self.buffer.len() > self.max_frame_size {
                self.reset();
                return Err(Error::frame_too_large(self.max_frame_size));
            }
        }

        Ok(frames)
    }

    /// Handles a byte between objects.
    fn feed_outside(&mut self, byte: u8, frames: &mut Vec<Vec<u8>>) {
        match byte {
            b'{' => {
                if !self.buffer.is_empty() {
                    frames.push(mem::take(&mut self.buffer));
                }
                self.depth = 1;
                self.buffer.push(byte);
            }
            b if b.is_ascii_whitespace() && self.buffer.is_empty() => {}
            _ => self.buffer.push(byte),
        }
    }

    /// Handles a byte inside an object.
    fn feed_inside(&mut self, byte: u8, frames: &mut Vec<Vec<u8>>) {
        self.buffer.push(byte);

        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return;
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' => self.depth += 1,
            b'}' => {
                self.depth -= 1;
                if self.depth == 0 {
                    frames.push(mem::take(&mut self.buffer));
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
