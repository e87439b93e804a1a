//! Error types shared by the wire layer.

use thiserror::Error;

/// Frame decoding failures.
///
/// Every variant means the inbound stream no longer lines up with what
/// the server sent: the session is desynchronized and must be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Zero-length buffer where a frame was expected.
    #[error("empty frame")]
    Empty,

    /// Frame ended before a field could be read.
    #[error("truncated frame: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Declared body length disagrees with the bytes actually received.
    #[error("length mismatch: declared {declared} bytes, received {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Fixed-size frame has the wrong size.
    #[error("bad frame size for {frame}: expected {expected} bytes, got {actual}")]
    BadSize {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },
}
