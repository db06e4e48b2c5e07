//! Validated OTP parameter bundle.

use crate::hotp::check_digits;
use crate::totp::{check_period, generate_totp_with_key, verify_with_key};
use crate::{Algorithm, OtpError, Secret, Verification};

/// Server-side TOTP configuration: a decoded secret plus its parameters.
///
/// Construction validates everything once, so generation and verification
/// can only fail on HMAC key setup.
pub struct OtpSpec {
    secret: Secret,
    digits: u32,
    period: u64,
    algorithm: Algorithm,
}

impl OtpSpec {
    /// Build a spec from configuration values.
    ///
    /// # Errors
    ///
    /// Checked in order: digits, period, algorithm name, secret.
    pub fn new(secret: &str, digits: u32, period: u64, algorithm: &str) -> Result<Self, OtpError> {
        check_digits(digits)?;
        check_period(period)?;
        let algorithm: Algorithm = algorithm.parse()?;
        let secret = Secret::from_base32(secret)?;
        Ok(Self {
            secret,
            digits,
            period,
            algorithm,
        })
    }

    #[must_use]
    pub fn digits(&self) -> u32 {
        self.digits
    }

    #[must_use]
    pub fn period(&self) -> u64 {
        self.period
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The code for Unix time `now`.
    pub fn generate_at(&self, now: u64) -> Result<String, OtpError> {
        generate_totp_with_key(&self.secret, self.digits, self.period, self.algorithm, now)
    }

    /// Check `submitted` against the code for Unix time `now`.
    pub fn verify_at(&self, submitted: &str, now: u64) -> Result<Verification, OtpError> {
        verify_with_key(
            &self.secret,
            submitted,
            self.digits,
            self.period,
            self.algorithm,
            now,
        )
    }

    /// Seconds until the code for `now` rolls over.
    #[must_use]
    pub fn remaining_at(&self, now: u64) -> u64 {
        self.period - now % self.period
    }
}

impl std::fmt::Debug for OtpSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpSpec")
            .field("digits", &self.digits)
            .field("period", &self.period)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
