//! credgate daemon library.
//!
//! A TLS listener that serves three small request protocols, chosen by the
//! first byte of each request:
//!
//! - `'0'` OTP generation: compute a code and deliver it out of band
//! - `'1'` OTP validation: answer `OTP VALID` or `OTP INVALID`
//! - `'2'` CSR signing: return a certificate signed by the local CA
//!
//! The binary in `main.rs` only parses configuration and wires these
//! pieces together; everything else lives here so it can be driven from
//! tests.

pub mod buffer;
pub mod ca;
pub mod config;
pub mod connection;
pub mod context;
pub mod notify;
pub mod protocol;
pub mod rate_limit;
pub mod server;
pub mod tls;

#[cfg(test)]
mod testutil;

pub use connection::{Connection, Flow};
pub use context::{DaemonContext, SessionPolicy};
pub use server::{serve_connection, spawn_signal_handler, Server};
