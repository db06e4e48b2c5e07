//! X.509 generation for the local CA and the daemon's server identity.
//!
//! Uses rcgen with its default ECDSA P-256 keys.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use data_encoding::HEXUPPER;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::ca::CaMaterial;

/// Parameters for certificate generation.
#[derive(Debug, Clone)]
pub struct CertParams {
    /// Subject common name
    pub common_name: String,
    /// Validity period in days
    pub validity_days: u32,
    /// Subject alternative names (DNS names)
    pub san_dns: Vec<String>,
    /// Subject alternative names (IP addresses)
    pub san_ips: Vec<IpAddr>,
}

impl CertParams {
    /// Defaults for a CA certificate: ten years, no SANs.
    pub fn ca() -> Self {
        Self {
            common_name: "credgate CA".to_string(),
            validity_days: 3650,
            san_dns: Vec::new(),
            san_ips: Vec::new(),
        }
    }
}

impl Default for CertParams {
    fn default() -> Self {
        Self {
            common_name: "credgate".to_string(),
            validity_days: 825,
            san_dns: vec!["localhost".to_string()],
            san_ips: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
        }
    }
}

/// Certificate and private key, both PEM.
#[derive(Clone)]
pub struct PemIdentity {
    pub cert_pem: String,
    pub key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for PemIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PemIdentity")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

/// Generate a self-signed CA.
pub fn build_ca(params: &CertParams) -> Result<PemIdentity, CertError> {
    let key_pair = KeyPair::generate().map_err(|e| CertError::KeyPair(e.to_string()))?;

    let mut cert_params = base_params(params)?;
    cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    cert_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let cert = cert_params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(PemIdentity {
        cert_pem: cert.pem(),
        key_pem: Zeroizing::new(key_pair.serialize_pem()),
    })
}

/// Generate a server certificate signed by `ca`.
pub fn build_server_cert(ca: &CaMaterial, params: &CertParams) -> Result<PemIdentity, CertError> {
    let key_pair = KeyPair::generate().map_err(|e| CertError::KeyPair(e.to_string()))?;

    let mut cert_params = base_params(params)?;
    cert_params.is_ca = IsCa::ExplicitNoCa;
    cert_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    cert_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let cert = cert_params
        .signed_by(&key_pair, ca.certificate(), ca.key_pair())
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(PemIdentity {
        cert_pem: cert.pem(),
        key_pem: Zeroizing::new(key_pair.serialize_pem()),
    })
}

fn base_params(params: &CertParams) -> Result<CertificateParams, CertError> {
    let mut cert_params = CertificateParams::default();
    cert_params.distinguished_name = DistinguishedName::new();
    cert_params
        .distinguished_name
        .push(DnType::CommonName, &params.common_name);

    cert_params.not_before = time::OffsetDateTime::now_utc();
    cert_params.not_after =
        cert_params.not_before + time::Duration::days(i64::from(params.validity_days));

    for dns in &params.san_dns {
        let san = dns
            .clone()
            .try_into()
            .map_err(|_| CertError::InvalidName(dns.clone()))?;
        cert_params.subject_alt_names.push(SanType::DnsName(san));
    }
    for ip in &params.san_ips {
        cert_params.subject_alt_names.push(SanType::IpAddress(*ip));
    }

    Ok(cert_params)
}

/// Write a certificate and key to disk. The key file is created 0600.
pub fn write_identity(
    identity: &PemIdentity,
    cert_path: &Path,
    key_path: &Path,
) -> std::io::Result<()> {
    std::fs::write(cert_path, &identity.cert_pem)?;
    write_private(key_path, identity.key_pem.as_bytes())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// SHA-256 fingerprint of a DER certificate, as colon separated hex.
pub fn fingerprint(cert_der: &[u8]) -> String {
    let digest = Sha256::digest(cert_der);
    let hex = HEXUPPER.encode(&digest);
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Errors that can occur during certificate operations.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("failed to create key pair: {0}")]
    KeyPair(String),
    #[error("invalid DNS name: {0}")]
    InvalidName(String),
    #[error("failed to generate certificate: {0}")]
    Generation(String),
}
