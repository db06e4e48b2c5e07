//! Shared fixtures for unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use rcgen::{CertificateParams, DnType, KeyPair};
use x509_parser::certificate::X509Certificate;

use crate::ca::CaMaterial;
use crate::tls::{build_ca, CertParams};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique path under the system temp directory.
pub(crate) fn temp_path(name: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("credgate-test-{}-{}-{}", std::process::id(), n, name))
}

/// Fresh CA as (certificate PEM, key PEM).
pub(crate) fn test_ca_pem() -> (String, String) {
    let ca = build_ca(&CertParams::ca()).unwrap();
    (ca.cert_pem, ca.key_pem.to_string())
}

pub(crate) fn test_ca() -> CaMaterial {
    let (cert_pem, key_pem) = test_ca_pem();
    CaMaterial::from_pem(&cert_pem, &key_pem).unwrap()
}

/// PEM CSR for `name` with a fresh key.
pub(crate) fn client_csr(name: &str) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params.serialize_request(&key).unwrap().pem().unwrap()
}

/// Certificate serial as an integer.
pub(crate) fn serial_of(cert: &X509Certificate<'_>) -> u64 {
    cert.raw_serial()
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}
