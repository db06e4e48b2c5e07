//! TLS server configuration.
//!
//! Uses rustls 0.23+ with modern builder patterns. Clients are not asked
//! for certificates; authentication happens inside the sub-protocols.

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_rustls::TlsAcceptor;
use x509_parser::prelude::*;

/// TLS server configuration wrapper.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Build a server-auth-only config from a PEM certificate chain (leaf
    /// first) and a PEM private key.
    pub fn from_pem(cert_chain_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsConfigError> {
        let chain = CertificateDer::pem_slice_iter(cert_chain_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
        let leaf = chain
            .first()
            .ok_or_else(|| TlsConfigError::InvalidCert("no certificate found".to_string()))?;
        verify_certificate_validity(leaf)?;

        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| TlsConfigError::InvalidKey(e.to_string()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Load the certificate chain and key from PEM files.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsConfigError> {
        let cert_pem = std::fs::read(cert_path).map_err(|source| TlsConfigError::Read {
            path: cert_path.display().to_string(),
            source,
        })?;
        let key_pem = zeroize::Zeroizing::new(std::fs::read(key_path).map_err(|source| {
            TlsConfigError::Read {
                path: key_path.display().to_string(),
                source,
            }
        })?);
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.config))
    }
}

/// Reject a server certificate outside its validity period.
fn verify_certificate_validity(cert_der: &[u8]) -> Result<(), TlsConfigError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| TlsConfigError::InvalidCert(format!("failed to parse certificate: {}", e)))?;

    let validity = cert.validity();
    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| TlsConfigError::InvalidCert("system time error".to_string()))?
        .as_secs() as i64;

    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();

    if now < not_before {
        return Err(TlsConfigError::CertNotYetValid {
            not_before: not_before as u64,
            now: now as u64,
        });
    }

    if now > not_after {
        return Err(TlsConfigError::CertExpired {
            not_after: not_after as u64,
            now: now as u64,
        });
    }

    Ok(())
}

/// Errors that can occur during TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid certificate: {0}")]
    InvalidCert(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("failed to build config: {0}")]
    Config(String),
    #[error("certificate not yet valid (not_before: {not_before}, now: {now})")]
    CertNotYetValid { not_before: u64, now: u64 },
    #[error("certificate expired (not_after: {not_after}, now: {now})")]
    CertExpired { not_after: u64, now: u64 },
}
