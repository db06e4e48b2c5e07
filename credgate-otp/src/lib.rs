//! One-time passcode engine for credgate.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Everything here is a pure function of its inputs, so the engine can be
//! called concurrently from any number of connections.
//!
//! - [`hotp::generate`] - RFC 4226 HOTP with dynamic truncation
//! - [`totp::generate_totp`] / [`totp::verify`] - RFC 6238 TOTP over a fixed period
//! - [`OtpSpec`] - Validated parameter bundle holding a decoded secret
//!
//! # Example
//!
//! ```
//! use credgate_otp::{Algorithm, OtpSpec, Verification};
//!
//! let spec = OtpSpec::new("JBSWY3DPEHPK3PXP", 6, 30, "SHA1").unwrap();
//! let code = spec.generate_at(1_000_000_000).unwrap();
//! assert_eq!(code.len(), 6);
//! assert_eq!(spec.verify_at(&code, 1_000_000_000).unwrap(), Verification::Valid);
//! assert_eq!(spec.algorithm(), Algorithm::Sha1);
//! ```

pub mod algorithm;
pub mod error;
pub mod hotp;
pub mod params;
pub mod secret;
pub mod totp;

pub use algorithm::Algorithm;
pub use error::OtpError;
pub use hotp::generate;
pub use params::OtpSpec;
pub use secret::{generate_secret, Secret};
pub use totp::{generate_totp, verify, Verification};
