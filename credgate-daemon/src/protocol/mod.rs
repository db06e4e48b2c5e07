//! Wire protocol: selector byte and incremental sub-protocol framers.
//!
//! Every connection starts with one ASCII selector byte:
//!
//! | Byte  | Sub-protocol  | Payload                                   |
//! |-------|---------------|-------------------------------------------|
//! | `'0'` | OTP generate  | `[len][phone][len][email]`                |
//! | `'1'` | OTP validate  | `[len][access code digits][len][otp]`     |
//! | `'2'` | CSR sign      | PEM CSR followed by a `0x00` terminator   |
//!
//! Framers consume bytes from a [`bytes::Buf`] and never read past the end
//! of their own request, so surplus bytes stay with the caller.

pub mod csr;
mod field;
pub mod generate;
pub mod validate;

pub use csr::{CsrFramer, CsrRequest};
pub use generate::{GenerateStage, OtpGenerateFramer, OtpGenerateRequest};
pub use validate::{OtpValidateFramer, OtpValidateRequest};

use crate::buffer::CapacityExceeded;

/// Sent in place of a certificate when issuance fails.
pub const SIGNING_FAILED: &[u8] = b"SIGNING REQUEST FAILED\0";
pub const OTP_VALID: &[u8] = b"OTP VALID\0";
pub const OTP_INVALID: &[u8] = b"OTP INVALID\0";

/// First byte of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    OtpGenerate,
    OtpValidate,
    CsrSign,
}

impl Selector {
    pub fn as_byte(self) -> u8 {
        match self {
            Selector::OtpGenerate => b'0',
            Selector::OtpValidate => b'1',
            Selector::CsrSign => b'2',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Selector::OtpGenerate => "otp-generate",
            Selector::OtpValidate => "otp-validate",
            Selector::CsrSign => "csr-sign",
        }
    }
}

impl TryFrom<u8> for Selector {
    type Error = ConnectionError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'0' => Ok(Selector::OtpGenerate),
            b'1' => Ok(Selector::OtpValidate),
            b'2' => Ok(Selector::CsrSign),
            _ => Err(ConnectionError::MalformedRequest("unknown selector byte")),
        }
    }
}

/// Result of feeding bytes to a framer.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress<T> {
    /// Input exhausted before the request was complete.
    NeedMore,
    Complete(T),
}

/// Fatal per-connection protocol errors. The connection is closed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    #[error("request exceeds {limit} bytes ({attempted} bytes received)")]
    ResourceExceeded { limit: usize, attempted: usize },
}

impl From<CapacityExceeded> for ConnectionError {
    fn from(e: CapacityExceeded) -> Self {
        ConnectionError::ResourceExceeded {
            limit: e.limit,
            attempted: e.attempted,
        }
    }
}
