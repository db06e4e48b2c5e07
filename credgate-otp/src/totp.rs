//! RFC 6238 TOTP.

use subtle::ConstantTimeEq;

use crate::hotp::{check_digits, generate_with_key};
use crate::{Algorithm, OtpError, Secret};

/// Periods (in seconds) accepted by the engine.
pub const SUPPORTED_PERIODS: [u64; 2] = [30, 60];

/// Outcome of comparing a submitted code with the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
}

impl Verification {
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, Verification::Valid)
    }
}

/// Compute the TOTP code for Unix time `now`.
///
/// The HOTP counter is `floor(now / period)`.
///
/// # Errors
///
/// Parameters are validated in order (digits, period, secret) before any
/// HMAC is computed.
pub fn generate_totp(
    secret: &str,
    digits: u32,
    period: u64,
    algorithm: Algorithm,
    now: u64,
) -> Result<String, OtpError> {
    check_digits(digits)?;
    check_period(period)?;
    let secret = Secret::from_base32(secret)?;
    generate_totp_with_key(&secret, digits, period, algorithm, now)
}

/// Check a submitted code against the TOTP for `now`.
///
/// The comparison runs in constant time with respect to the code contents.
///
/// # Errors
///
/// Same parameter errors as [`generate_totp`].
pub fn verify(
    secret: &str,
    submitted: &str,
    digits: u32,
    period: u64,
    algorithm: Algorithm,
    now: u64,
) -> Result<Verification, OtpError> {
    check_digits(digits)?;
    check_period(period)?;
    let secret = Secret::from_base32(secret)?;
    verify_with_key(&secret, submitted, digits, period, algorithm, now)
}

pub(crate) fn generate_totp_with_key(
    secret: &Secret,
    digits: u32,
    period: u64,
    algorithm: Algorithm,
    now: u64,
) -> Result<String, OtpError> {
    check_period(period)?;
    generate_with_key(secret, now / period, digits, algorithm)
}

pub(crate) fn verify_with_key(
    secret: &Secret,
    submitted: &str,
    digits: u32,
    period: u64,
    algorithm: Algorithm,
    now: u64,
) -> Result<Verification, OtpError> {
    let expected = generate_totp_with_key(secret, digits, period, algorithm, now)?;
    // Slices of unequal length compare unequal without inspecting contents
    if bool::from(expected.as_bytes().ct_eq(submitted.as_bytes())) {
        Ok(Verification::Valid)
    } else {
        Ok(Verification::Invalid)
    }
}

pub(crate) fn check_period(period: u64) -> Result<(), OtpError> {
    if SUPPORTED_PERIODS.contains(&period) {
        Ok(())
    } else {
        Err(OtpError::InvalidPeriod(period))
    }
}
