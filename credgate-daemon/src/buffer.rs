//! Append-only byte accumulator with a hard size ceiling.
//!
//! Capacity is tracked logically so the growth rule is observable and
//! testable independently of the allocator: when an append would overflow,
//! the new capacity is `max(capacity * 2, needed * 2)` clamped to the
//! ceiling. Input that would push the length past the ceiling is rejected
//! before any of it is copied.

use bytes::{Bytes, BytesMut};

/// Initial capacity used by the CSR framer.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;

/// An append would exceed the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer limit of {limit} bytes exceeded ({attempted} bytes requested)")]
pub struct CapacityExceeded {
    pub limit: usize,
    pub attempted: usize,
}

pub struct GrowableBuffer {
    data: BytesMut,
    capacity: usize,
    max_capacity: usize,
}

impl GrowableBuffer {
    /// Create a buffer with `initial` capacity (clamped to `max_capacity`).
    pub fn new(initial: usize, max_capacity: usize) -> Self {
        let capacity = initial.min(max_capacity);
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            max_capacity,
        }
    }

    /// Append `bytes`, growing capacity if needed.
    ///
    /// On error the buffer is left untouched.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), CapacityExceeded> {
        let needed = self.data.len().saturating_add(bytes.len());
        if needed > self.max_capacity {
            return Err(CapacityExceeded {
                limit: self.max_capacity,
                attempted: needed,
            });
        }

        if needed > self.capacity {
            let grown = self
                .capacity
                .saturating_mul(2)
                .max(needed.saturating_mul(2))
                .min(self.max_capacity);
            self.data.reserve(grown - self.data.len());
            self.capacity = grown;
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn last(&self) -> Option<u8> {
        self.data.last().copied()
    }

    /// Take the accumulated bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }
}

impl std::fmt::Debug for GrowableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowableBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.capacity)
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}
