//! Transfer contexts: what the bridge owns for each in-flight transfer, and what it reports
//! when one ends.
//!
//! Lifetime is carried by ownership. A context lives in the bridge's arena while its handle is
//! attached to the engine. Completion (or cancellation) moves it out of the arena, the handle is
//! consumed by the engine's detach, and whatever is left is either reported to the caller or
//! dropped. There is no path that frees a context twice or frees it with the handle attached.

use crate::arena::TransferKey;
use crate::engine::TransferCode;

/// Error buffer size the engine writes into (bytes, including room for a terminator).
pub const DEFAULT_ERROR_BUFFER_CAPACITY: usize = 256;

/// Fixed-capacity error text. Writes past the capacity are truncated on a char boundary.
#[derive(Debug, Clone)]
pub struct ErrorBuffer {
    text: String,
    capacity: usize,
}

impl ErrorBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the contents. One byte of capacity stays reserved for the engine's terminator.
    pub fn write(&mut self, text: &str) {
        self.text.clear();
        let limit = self.capacity.saturating_sub(1);
        let mut end = text.len().min(limit);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&text[..end]);
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn into_message(self) -> Option<String> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text)
        }
    }
}

/// Per-transfer record held while the handle is attached to the engine.
#[derive(Debug)]
pub struct TransferContext<H> {
    handle: H,
    target: String,
    error: ErrorBuffer,
}

impl<H> TransferContext<H> {
    pub(crate) fn new(handle: H, target: String, error_capacity: usize) -> Self {
        Self {
            handle,
            target,
            error: ErrorBuffer::with_capacity(error_capacity),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn error(&self) -> &ErrorBuffer {
        &self.error
    }

    pub(crate) fn from_parts(handle: H, target: String, error: ErrorBuffer) -> Self {
        Self {
            handle,
            target,
            error,
        }
    }

    /// Split for the detach path: the handle goes back to the engine, the rest to the report.
    pub(crate) fn into_parts(self) -> (H, String, ErrorBuffer) {
        (self.handle, self.target, self.error)
    }
}

/// Outcome of a finished transfer, delivered to the caller that started it.
#[derive(Debug)]
pub struct Completion<T> {
    pub key: TransferKey,
    pub target: String,
    /// Where the transfer ended up (after redirects), when the engine knows.
    pub effective_target: Option<String>,
    pub result: TransferCode,
    pub error: Option<String>,
    /// The detached transfer, for reuse. Dropping it releases it.
    pub transfer: T,
}

impl<T> Completion<T> {
    pub(crate) fn new(
        key: TransferKey,
        target: String,
        effective_target: Option<String>,
        result: TransferCode,
        error: ErrorBuffer,
        transfer: T,
    ) -> Self {
        Self {
            key,
            target,
            effective_target,
            result,
            error: error.into_message(),
            transfer,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A transfer detached at teardown before it finished.
#[derive(Debug)]
pub struct AbortedTransfer<T> {
    pub key: TransferKey,
    pub target: String,
    pub transfer: T,
}
