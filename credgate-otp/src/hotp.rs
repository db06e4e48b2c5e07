//! RFC 4226 HOTP.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::{Algorithm, OtpError, Secret};

/// Digit counts accepted by the engine.
pub const SUPPORTED_DIGITS: [u32; 2] = [6, 8];

/// Compute an HOTP code from a base32 secret.
///
/// The counter is MAC'd as an 8-byte big-endian integer. The result is
/// exactly `digits` characters long, zero-padded on the left.
///
/// # Errors
///
/// - [`OtpError::InvalidDigits`] unless `digits` is 6 or 8
/// - [`OtpError::InvalidSecret`] if the secret is not valid base32
pub fn generate(
    secret: &str,
    counter: u64,
    digits: u32,
    algorithm: Algorithm,
) -> Result<String, OtpError> {
    check_digits(digits)?;
    let secret = Secret::from_base32(secret)?;
    generate_with_key(&secret, counter, digits, algorithm)
}

/// Compute an HOTP code from an already decoded secret.
///
/// # Errors
///
/// Returns [`OtpError::InvalidDigits`] unless `digits` is 6 or 8.
pub fn generate_with_key(
    secret: &Secret,
    counter: u64,
    digits: u32,
    algorithm: Algorithm,
) -> Result<String, OtpError> {
    check_digits(digits)?;
    let digest = hmac_counter(secret.as_bytes(), counter, algorithm)?;
    let code = truncate(&digest, digits);
    Ok(format!("{:0width$}", code, width = digits as usize))
}

pub(crate) fn check_digits(digits: u32) -> Result<(), OtpError> {
    if SUPPORTED_DIGITS.contains(&digits) {
        Ok(())
    } else {
        Err(OtpError::InvalidDigits(digits))
    }
}

fn hmac_counter(
    key: &[u8],
    counter: u64,
    algorithm: Algorithm,
) -> Result<Zeroizing<Vec<u8>>, OtpError> {
    let message = counter.to_be_bytes();
    let digest = match algorithm {
        Algorithm::Sha1 => mac::<Hmac<Sha1>>(key, &message)?,
        Algorithm::Sha256 => mac::<Hmac<Sha256>>(key, &message)?,
        Algorithm::Sha512 => mac::<Hmac<Sha512>>(key, &message)?,
    };
    debug_assert_eq!(digest.len(), algorithm.digest_len());
    Ok(digest)
}

fn mac<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Result<Zeroizing<Vec<u8>>, OtpError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| OtpError::CryptoInit)?;
    mac.update(message);
    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}

/// RFC 4226 §5.3 dynamic truncation reduced to `digits` decimal digits.
///
/// The offset is the low nibble of the final digest byte; the four bytes at
/// that offset are read big-endian with the top bit cleared.
fn truncate(digest: &[u8], digits: u32) -> u32 {
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    binary % 10u32.pow(digits)
}
