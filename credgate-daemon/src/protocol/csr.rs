//! CSR framer (selector `'2'`).
//!
//! Accumulates a PEM certificate signing request until the first `0x00`
//! byte. The terminator is consumed; anything after it is left in the
//! caller's input.

use bytes::{Buf, Bytes};

use super::{ConnectionError, Progress};
use crate::buffer::{GrowableBuffer, DEFAULT_INITIAL_CAPACITY};

/// A complete CSR, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrRequest {
    pub pem: Bytes,
}

pub struct CsrFramer {
    buffer: GrowableBuffer,
    terminated: bool,
}

impl CsrFramer {
    /// `max_size` bounds the request including its terminator.
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: GrowableBuffer::new(DEFAULT_INITIAL_CAPACITY, max_size),
            terminated: false,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn feed<B: Buf>(
        &mut self,
        input: &mut B,
    ) -> Result<Progress<CsrRequest>, ConnectionError> {
        while input.has_remaining() && !self.terminated {
            let chunk = input.chunk();
            let consumed = match chunk.iter().position(|b| *b == 0) {
                Some(pos) => {
                    self.buffer.append(&chunk[..=pos])?;
                    self.terminated = true;
                    pos + 1
                }
                None => {
                    self.buffer.append(chunk)?;
                    chunk.len()
                }
            };
            input.advance(consumed);
        }

        if !self.terminated {
            return Ok(Progress::NeedMore);
        }

        debug_assert_eq!(self.buffer.last(), Some(0));
        let mut pem = self.buffer.take();
        pem.truncate(pem.len() - 1);
        Ok(Progress::Complete(CsrRequest { pem }))
    }
}
