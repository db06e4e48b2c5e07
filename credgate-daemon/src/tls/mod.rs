//! TLS configuration for the daemon.
//!
//! Provides CA and server certificate generation for `ca init` and the
//! rustls server configuration used by the listener.

mod cert;
mod server;

pub use cert::{
    build_ca, build_server_cert, fingerprint, write_identity, CertError, CertParams, PemIdentity,
};
pub use server::{TlsConfigError, TlsServerConfig};
