//! # Session Buffer
//!
//! Append-only byte buffer that holds the audio of the utterance currently being
//! spoken. Frames are stored exactly as they arrived; decoding into samples happens
//! only when a decode is requested.
//!
//! ## Lifecycle:
//! 1. Grows with every binary frame while the session is open
//! 2. Is taken (and left empty) when the client ends the utterance
//! 3. Starts growing again for the next utterance on the same connection

use crate::audio::window::select_partial_window;

/// Byte buffer owned by exactly one streaming session.
///
/// ## Ownership:
/// No locking here. The buffer lives inside the session, which lives inside one
/// WebSocket actor, so only that actor ever touches it.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    bytes: Vec<u8>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk in arrival order.
    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the whole buffered utterance.
    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrow the trailing `window_bytes` of the utterance (see [`select_partial_window`]).
    pub fn partial_window(&self, window_bytes: usize) -> &[u8] {
        select_partial_window(&self.bytes, window_bytes)
    }

    /// Move the buffered utterance out, leaving the buffer empty.
    ///
    /// ## Rust Concepts:
    /// - **std::mem::take**: swaps in `Vec::default()` so no copy of the audio is made
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}
