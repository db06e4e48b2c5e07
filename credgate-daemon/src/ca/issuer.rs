//! Certificate signing backends.

use rcgen::{CertificateSigningRequestParams, IsCa, SerialNumber};
use rustls::pki_types::CertificateDer;

use super::{CaMaterial, IssuanceError};

/// Signs a PEM CSR with the CA.
///
/// Implementations must be fast and non-blocking; they run on the
/// connection task while the serial counter is held.
pub trait Issuer: Send + Sync {
    fn sign(
        &self,
        csr_pem: &str,
        ca: &CaMaterial,
        serial: u64,
        validity_days: u32,
    ) -> Result<CertificateDer<'static>, IssuanceError>;
}

/// Local signing with `rcgen`.
///
/// The issued certificate keeps the CSR's subject and subject alternative
/// names, is valid from now for `validity_days`, and is never a CA.
#[derive(Debug, Default, Clone)]
pub struct RcgenIssuer;

impl Issuer for RcgenIssuer {
    fn sign(
        &self,
        csr_pem: &str,
        ca: &CaMaterial,
        serial: u64,
        validity_days: u32,
    ) -> Result<CertificateDer<'static>, IssuanceError> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| IssuanceError::InvalidCsr(e.to_string()))?;

        let now = time::OffsetDateTime::now_utc();
        csr.params.serial_number = Some(SerialNumber::from(serial));
        csr.params.not_before = now;
        csr.params.not_after = now + time::Duration::days(i64::from(validity_days));
        csr.params.is_ca = IsCa::ExplicitNoCa;

        let cert = csr
            .signed_by(ca.certificate(), ca.key_pair())
            .map_err(|e| IssuanceError::Signing(e.to_string()))?;

        Ok(cert.der().clone())
    }
}
