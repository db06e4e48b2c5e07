//! Local certificate authority.
//!
//! [`CaContext`] owns the CA certificate and key for the process lifetime
//! and hands out serial numbers. The serial counter is the only mutable
//! state shared between connections:
//!
//! - It is locked for the whole sign operation, so serials are unique and
//!   strictly increasing in completion order
//! - It advances only after a successful signature
//! - When a state file is configured, the next serial is written after every
//!   issuance and read back at startup

mod issuer;

pub use issuer::{Issuer, RcgenIssuer};

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rcgen::{Certificate, CertificateParams, KeyPair};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// Days an issued certificate stays valid unless configured otherwise.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// First serial handed out when no state file says otherwise.
///
/// Zero is not a valid certificate serial number.
pub const DEFAULT_INITIAL_SERIAL: u64 = 1;

/// CA certificate and private key.
pub struct CaMaterial {
    cert: Certificate,
    key: KeyPair,
    cert_der: CertificateDer<'static>,
}

impl CaMaterial {
    /// Load the CA from PEM text.
    ///
    /// The key must belong to the certificate.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaLoadError> {
        let key = KeyPair::from_pem(key_pem).map_err(|e| CaLoadError::Key(e.to_string()))?;

        let cert_der = CertificateDer::from_pem_slice(cert_pem.as_bytes())
            .map_err(|e| CaLoadError::Certificate(e.to_string()))?;
        let (_, parsed) = X509Certificate::from_der(&cert_der)
            .map_err(|e| CaLoadError::Certificate(e.to_string()))?;
        if parsed.public_key().subject_public_key.data.as_ref() != key.public_key_raw() {
            return Err(CaLoadError::KeyMismatch);
        }

        // rcgen signs with a Certificate handle; rebuild one from the
        // parsed parameters. Only its subject and key identifier are used.
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| CaLoadError::Certificate(e.to_string()))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| CaLoadError::Certificate(e.to_string()))?;

        Ok(Self {
            cert,
            key,
            cert_der,
        })
    }

    /// Load the CA from PEM files.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, CaLoadError> {
        let cert_pem = read_file(cert_path)?;
        let key_pem = read_file(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key
    }

    /// The CA certificate exactly as loaded.
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }
}

impl std::fmt::Debug for CaMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaMaterial")
            .field("cert_der_len", &self.cert_der.len())
            .finish_non_exhaustive()
    }
}

/// Issuance policy.
#[derive(Debug, Clone)]
pub struct CaPolicy {
    pub validity_days: u32,
    pub initial_serial: u64,
    pub serial_state_file: Option<PathBuf>,
}

impl Default for CaPolicy {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            initial_serial: DEFAULT_INITIAL_SERIAL,
            serial_state_file: None,
        }
    }
}

/// A freshly issued certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub serial: u64,
    pub pem: String,
}

struct SerialCounter {
    next: u64,
    state_file: Option<PathBuf>,
}

impl SerialCounter {
    fn load(initial: u64, state_file: Option<PathBuf>) -> Result<Self, CaLoadError> {
        let next = match &state_file {
            Some(path) if path.exists() => {
                let text = read_file(path)?;
                text.trim()
                    .parse::<u64>()
                    .map_err(|e| CaLoadError::SerialState(format!("{}: {}", path.display(), e)))?
            }
            _ => initial,
        };
        Ok(Self { next, state_file })
    }

    fn advance(&mut self) {
        self.next = self.next.saturating_add(1);
        if let Some(path) = &self.state_file {
            if let Err(e) = write_serial(path, self.next) {
                tracing::error!(
                    path = %path.display(),
                    next_serial = self.next,
                    error = %e,
                    "Failed to persist serial counter"
                );
            }
        }
    }
}

/// Shared CA state.
pub struct CaContext {
    material: CaMaterial,
    issuer: Box<dyn Issuer>,
    validity_days: u32,
    serial: Mutex<SerialCounter>,
}

impl CaContext {
    pub fn new(
        material: CaMaterial,
        issuer: Box<dyn Issuer>,
        policy: CaPolicy,
    ) -> Result<Self, CaLoadError> {
        let serial = SerialCounter::load(policy.initial_serial, policy.serial_state_file)?;
        tracing::info!(
            next_serial = serial.next,
            validity_days = policy.validity_days,
            persisted = serial.state_file.is_some(),
            "CA context ready"
        );
        Ok(Self {
            material,
            issuer,
            validity_days: policy.validity_days,
            serial: Mutex::new(serial),
        })
    }

    pub fn material(&self) -> &CaMaterial {
        &self.material
    }

    pub fn next_serial(&self) -> u64 {
        self.lock_serial().next
    }

    /// Sign a PEM CSR and return the certificate as PEM.
    pub fn issue(&self, csr: &[u8]) -> Result<IssuedCertificate, IssuanceError> {
        let csr_pem = std::str::from_utf8(csr)
            .map_err(|_| IssuanceError::InvalidCsr("request is not UTF-8".to_string()))?;

        let mut counter = self.lock_serial();
        let serial = counter.next;
        let der = self
            .issuer
            .sign(csr_pem, &self.material, serial, self.validity_days)?;
        counter.advance();
        drop(counter);

        let pem = encode_certificate(&der)?;
        Ok(IssuedCertificate { serial, pem })
    }

    fn lock_serial(&self) -> std::sync::MutexGuard<'_, SerialCounter> {
        // The counter is a plain integer; a panic elsewhere cannot leave it torn
        self.serial.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// DER to PEM, rejecting output that does not parse as X.509.
fn encode_certificate(der: &CertificateDer<'_>) -> Result<String, IssuanceError> {
    X509Certificate::from_der(der).map_err(|e| IssuanceError::Serialization(e.to_string()))?;
    let block = pem::Pem::new("CERTIFICATE", der.to_vec());
    Ok(pem::encode_config(
        &block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    ))
}

fn read_file(path: &Path) -> Result<String, CaLoadError> {
    std::fs::read_to_string(path).map_err(|source| CaLoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_serial(path: &Path, next: u64) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("{}\n", next))?;
    std::fs::rename(&tmp, path)
}

/// CA material could not be loaded. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CaLoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CA certificate: {0}")]
    Certificate(String),
    #[error("invalid CA key: {0}")]
    Key(String),
    #[error("CA key does not match CA certificate")]
    KeyMismatch,
    #[error("invalid serial state file: {0}")]
    SerialState(String),
}

/// A CSR could not be turned into a certificate.
///
/// Confined to the requesting connection, which receives the fixed failure
/// response.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("invalid certificate signing request: {0}")]
    InvalidCsr(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("certificate encoding failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{client_csr, serial_of, temp_path, test_ca, test_ca_pem};
    use std::sync::Arc;

    fn context(policy: CaPolicy) -> CaContext {
        CaContext::new(test_ca(), Box::new(RcgenIssuer), policy).unwrap()
    }

    fn parse_serial(pem_text: &str) -> u64 {
        let der = CertificateDer::from_pem_slice(pem_text.as_bytes()).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        serial_of(&cert)
    }

    struct FailingIssuer;

    impl Issuer for FailingIssuer {
        fn sign(
            &self,
            _csr_pem: &str,
            _ca: &CaMaterial,
            _serial: u64,
            _validity_days: u32,
        ) -> Result<CertificateDer<'static>, IssuanceError> {
            Err(IssuanceError::Signing("backend offline".to_string()))
        }
    }

    struct GarbageIssuer;

    impl Issuer for GarbageIssuer {
        fn sign(
            &self,
            _csr_pem: &str,
            _ca: &CaMaterial,
            _serial: u64,
            _validity_days: u32,
        ) -> Result<CertificateDer<'static>, IssuanceError> {
            Ok(CertificateDer::from(vec![1, 2, 3]))
        }
    }

    #[test]
    fn test_issue_returns_pem_with_serial() {
        let ca = context(CaPolicy::default());
        let issued = ca.issue(client_csr("a.example").as_bytes()).unwrap();

        assert_eq!(issued.serial, DEFAULT_INITIAL_SERIAL);
        assert!(issued.pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(!issued.pem.contains('\r'));
        assert_eq!(parse_serial(&issued.pem), DEFAULT_INITIAL_SERIAL);
        assert_eq!(ca.next_serial(), DEFAULT_INITIAL_SERIAL + 1);
    }

    #[test]
    fn test_serials_are_consecutive() {
        let ca = context(CaPolicy {
            initial_serial: 100,
            ..Default::default()
        });

        let serials: Vec<u64> = (0..3)
            .map(|_| ca.issue(client_csr("b.example").as_bytes()).unwrap().serial)
            .collect();
        assert_eq!(serials, vec![100, 101, 102]);
    }

    #[test]
    fn test_failed_parse_does_not_advance() {
        let ca = context(CaPolicy::default());

        assert!(matches!(
            ca.issue(b"garbage"),
            Err(IssuanceError::InvalidCsr(_))
        ));
        assert!(matches!(
            ca.issue(&[0xff, 0xfe]),
            Err(IssuanceError::InvalidCsr(_))
        ));
        assert_eq!(ca.next_serial(), DEFAULT_INITIAL_SERIAL);
    }

    #[test]
    fn test_failed_signing_does_not_advance() {
        let ca = CaContext::new(test_ca(), Box::new(FailingIssuer), CaPolicy::default()).unwrap();
        assert!(matches!(
            ca.issue(client_csr("c.example").as_bytes()),
            Err(IssuanceError::Signing(_))
        ));
        assert_eq!(ca.next_serial(), DEFAULT_INITIAL_SERIAL);
    }

    #[test]
    fn test_unparseable_output_is_serialization_error() {
        let ca = CaContext::new(test_ca(), Box::new(GarbageIssuer), CaPolicy::default()).unwrap();
        assert!(matches!(
            ca.issue(client_csr("d.example").as_bytes()),
            Err(IssuanceError::Serialization(_))
        ));
    }

    #[test]
    fn test_concurrent_issuance_unique_serials() {
        let ca = Arc::new(context(CaPolicy::default()));
        let csr = client_csr("e.example");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ca = Arc::clone(&ca);
                let csr = csr.clone();
                std::thread::spawn(move || ca.issue(csr.as_bytes()).unwrap().serial)
            })
            .collect();

        let mut serials: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        serials.sort_unstable();
        assert_eq!(serials, (1..=8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_serial_state_survives_restart() {
        let state = temp_path("serial");

        let ca = context(CaPolicy {
            serial_state_file: Some(state.clone()),
            ..Default::default()
        });
        ca.issue(client_csr("f.example").as_bytes()).unwrap();
        ca.issue(client_csr("f.example").as_bytes()).unwrap();
        drop(ca);

        assert_eq!(std::fs::read_to_string(&state).unwrap().trim(), "3");

        let restarted = context(CaPolicy {
            serial_state_file: Some(state.clone()),
            ..Default::default()
        });
        assert_eq!(restarted.next_serial(), 3);

        let _ = std::fs::remove_file(&state);
    }

    #[test]
    fn test_corrupt_state_file_fails_load() {
        let state = temp_path("serial-corrupt");
        std::fs::write(&state, "not a number").unwrap();

        let err = CaContext::new(
            test_ca(),
            Box::new(RcgenIssuer),
            CaPolicy {
                serial_state_file: Some(state.clone()),
                ..Default::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, CaLoadError::SerialState(_)));

        let _ = std::fs::remove_file(&state);
    }

    #[test]
    fn test_material_rejects_mismatched_key() {
        let (cert_pem, _) = test_ca_pem();
        let (_, other_key) = test_ca_pem();

        assert!(matches!(
            CaMaterial::from_pem(&cert_pem, &other_key),
            Err(CaLoadError::KeyMismatch)
        ));
    }

    #[test]
    fn test_material_rejects_bad_pem() {
        let (cert_pem, key_pem) = test_ca_pem();
        assert!(matches!(
            CaMaterial::from_pem("garbage", &key_pem),
            Err(CaLoadError::Certificate(_))
        ));
        assert!(matches!(
            CaMaterial::from_pem(&cert_pem, "garbage"),
            Err(CaLoadError::Key(_))
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let missing = temp_path("missing-ca.pem");
        let err = CaMaterial::from_files(&missing, &missing).unwrap_err();
        match err {
            CaLoadError::Read { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {}", other),
        }
    }
}
