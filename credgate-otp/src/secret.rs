//! Shared secrets.
//!
//! Secrets travel as RFC 4648 base32 text. Before decoding, the text is
//! normalized: spaces are removed, letters are upper-cased, and trailing `=`
//! padding is dropped. Bits left over in a partial final symbol are ignored.
//! Decoded key material is zeroized on drop.

use std::sync::OnceLock;

use data_encoding::{Encoding, BASE32_NOPAD};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::OtpError;

/// Length of secrets produced by [`generate_secret`] (160 bits, the RFC 4226 recommendation).
pub const GENERATED_SECRET_LEN: usize = 20;

/// A decoded HMAC key.
///
/// # Security
///
/// - Zeroized on drop
/// - `Debug` never prints key material
pub struct Secret {
    bytes: Zeroizing<Vec<u8>>,
}

impl Secret {
    /// Decode a base32 secret.
    ///
    /// # Errors
    ///
    /// Returns [`OtpError::InvalidSecret`] if the normalized text is empty or
    /// not valid base32.
    pub fn from_base32(text: &str) -> Result<Self, OtpError> {
        let normalized = Zeroizing::new(normalize(text));
        let trimmed = normalized.trim_end_matches('=');
        if trimmed.is_empty() {
            return Err(OtpError::InvalidSecret);
        }

        let bytes = lenient_base32()
            .ok_or(OtpError::InvalidSecret)?
            .decode(trimmed.as_bytes())
            .map_err(|_| OtpError::InvalidSecret)?;

        Ok(Self {
            bytes: Zeroizing::new(bytes),
        })
    }

    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        }
    }

    /// Encode as unpadded upper-case base32.
    #[must_use]
    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh random secret, returned as base32 text.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = Zeroizing::new([0u8; GENERATED_SECRET_LEN]);
    OsRng.fill_bytes(&mut bytes[..]);
    BASE32_NOPAD.encode(&bytes[..])
}

/// Unpadded base32 that does not require the trailing bits to be zero.
fn lenient_base32() -> Option<&'static Encoding> {
    static ENCODING: OnceLock<Option<Encoding>> = OnceLock::new();
    ENCODING
        .get_or_init(|| {
            let mut spec = BASE32_NOPAD.specification();
            spec.check_trailing_bits = false;
            spec.encoding().ok()
        })
        .as_ref()
}

/// Strip spaces and upper-case ASCII letters.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != ' ')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
