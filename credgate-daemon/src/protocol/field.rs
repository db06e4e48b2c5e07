//! One-byte length prefixed field, shared by the OTP framers.

use bytes::Buf;

use super::ConnectionError;

pub(crate) struct PrefixedField {
    expected: Option<u8>,
    buf: Vec<u8>,
    empty_error: &'static str,
}

impl PrefixedField {
    /// `empty_error` is reported when the peer sends a zero length prefix.
    pub(crate) fn new(empty_error: &'static str) -> Self {
        Self {
            expected: None,
            buf: Vec::new(),
            empty_error,
        }
    }

    pub(crate) fn expected(&self) -> Option<u8> {
        self.expected
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|len| self.buf.len() == len as usize)
    }

    /// Consume at most the bytes this field still needs.
    ///
    /// Returns `true` once the field is complete.
    pub(crate) fn feed<B: Buf>(&mut self, input: &mut B) -> Result<bool, ConnectionError> {
        let expected = match self.expected {
            Some(len) => len as usize,
            None => {
                if !input.has_remaining() {
                    return Ok(false);
                }
                let len = input.get_u8();
                if len == 0 {
                    return Err(ConnectionError::MalformedRequest(self.empty_error));
                }
                self.expected = Some(len);
                self.buf.reserve_exact(len as usize);
                len as usize
            }
        };

        let take = (expected - self.buf.len()).min(input.remaining());
        if take > 0 {
            self.buf.extend_from_slice(&input.copy_to_bytes(take));
        }
        Ok(self.buf.len() == expected)
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
