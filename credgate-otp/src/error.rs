//! OTP error types.

/// Errors returned by the OTP engine.
///
/// Parameter errors are raised before any HMAC work starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum OtpError {
    /// The secret is empty or not valid base32.
    #[error("invalid base32 secret")]
    InvalidSecret,

    /// Only 6 and 8 digit codes are supported.
    #[error("invalid digit count {0}: expected 6 or 8")]
    InvalidDigits(u32),

    /// Only 30 and 60 second periods are supported.
    #[error("invalid period {0}s: expected 30 or 60")]
    InvalidPeriod(u64),

    /// The hash algorithm name is not SHA1, SHA256 or SHA512.
    #[error("unsupported algorithm: {0}")]
    InvalidAlgorithm(String),

    /// The HMAC could not be keyed.
    #[error("HMAC initialization failed")]
    CryptoInit,
}
