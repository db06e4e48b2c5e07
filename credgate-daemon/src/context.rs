//! Daemon-wide state shared by every connection.
//!
//! A [`DaemonContext`] is built once at startup and handed to each
//! [`Connection`](crate::Connection) behind an `Arc`. It holds the
//! completion actions for the three sub-protocols.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use credgate_otp::{OtpSpec, Verification};
use zeroize::Zeroizing;

use crate::ca::CaContext;
use crate::notify::{mask_phone, DeliveryQueue, OtpDelivery};
use crate::protocol::{
    CsrRequest, OtpGenerateRequest, OtpValidateRequest, OTP_INVALID, OTP_VALID, SIGNING_FAILED,
};
use crate::rate_limit::OtpRateLimiter;

/// Default ceiling for a CSR including its terminator.
pub const DEFAULT_MAX_CSR_SIZE: usize = 64 * 1024;

/// Source of the current Unix time in seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

/// What happens to a connection after it has answered one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SessionPolicy {
    /// Close once the response is written.
    #[default]
    SingleRequest,
    /// Wait for another selector byte.
    KeepAlive,
}

pub struct DaemonContext {
    ca: CaContext,
    otp: OtpSpec,
    deliveries: DeliveryQueue,
    limiter: OtpRateLimiter,
    session: SessionPolicy,
    max_csr_size: usize,
    clock: Clock,
}

impl DaemonContext {
    pub fn new(ca: CaContext, otp: OtpSpec, deliveries: DeliveryQueue) -> Self {
        Self {
            ca,
            otp,
            deliveries,
            limiter: OtpRateLimiter::default(),
            session: SessionPolicy::default(),
            max_csr_size: DEFAULT_MAX_CSR_SIZE,
            clock: system_clock(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: OtpRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_session_policy(mut self, session: SessionPolicy) -> Self {
        self.session = session;
        self
    }

    pub fn with_max_csr_size(mut self, max_csr_size: usize) -> Self {
        self.max_csr_size = max_csr_size;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn session_policy(&self) -> SessionPolicy {
        self.session
    }

    pub fn max_csr_size(&self) -> usize {
        self.max_csr_size
    }

    pub fn ca(&self) -> &CaContext {
        &self.ca
    }

    pub fn rate_limiter(&self) -> &OtpRateLimiter {
        &self.limiter
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Compute a fresh code and queue it for delivery.
    ///
    /// Nothing is sent back to the client, whatever the outcome.
    pub fn generate_otp(&self, request: OtpGenerateRequest) {
        if !self.limiter.check(&request.phone) {
            tracing::warn!(
                to = %mask_phone(&request.phone),
                "OTP rate limit exceeded, request dropped"
            );
            return;
        }

        let code = match self.otp.generate_at(self.now()) {
            Ok(code) => Zeroizing::new(code),
            Err(e) => {
                tracing::error!(error = %e, "OTP generation failed");
                return;
            }
        };

        let to = mask_phone(&request.phone);
        let delivery = OtpDelivery {
            phone: request.phone,
            email: request.email,
            code,
        };
        match self.deliveries.enqueue(delivery) {
            Ok(()) => tracing::info!(to = %to, "OTP queued for delivery"),
            Err(e) => tracing::warn!(to = %to, error = %e, "OTP delivery not queued"),
        }
    }

    /// Check a submitted code; returns the response bytes.
    pub fn validate_otp(&self, request: &OtpValidateRequest) -> &'static [u8] {
        match self.otp.verify_at(&request.otp, self.now()) {
            Ok(Verification::Valid) => {
                tracing::info!(access_code = request.access_code, "OTP accepted");
                OTP_VALID
            }
            Ok(Verification::Invalid) => {
                tracing::info!(access_code = request.access_code, "OTP rejected");
                OTP_INVALID
            }
            Err(e) => {
                tracing::error!(
                    access_code = request.access_code,
                    error = %e,
                    "OTP verification failed"
                );
                OTP_INVALID
            }
        }
    }

    /// Sign a CSR and append the response to `out`.
    pub fn sign_csr(&self, request: &CsrRequest, out: &mut Vec<u8>) {
        match self.ca.issue(&request.pem) {
            Ok(issued) => {
                tracing::info!(serial = issued.serial, "Certificate issued");
                out.extend_from_slice(issued.pem.as_bytes());
                out.push(0);
            }
            Err(e) => {
                tracing::warn!(error = %e, csr_len = request.pem.len(), "Certificate signing failed");
                out.extend_from_slice(SIGNING_FAILED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{CaPolicy, RcgenIssuer};
    use crate::notify::{delivery_channel, DeliveryReceiver};
    use crate::testutil::{client_csr, test_ca};
    use bytes::Bytes;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";

    fn context(limiter: OtpRateLimiter) -> (DaemonContext, DeliveryReceiver) {
        let ca = CaContext::new(test_ca(), Box::new(RcgenIssuer), CaPolicy::default()).unwrap();
        let otp = OtpSpec::new(SECRET, 6, 30, "SHA1").unwrap();
        let (queue, rx) = delivery_channel(8);
        let ctx = DaemonContext::new(ca, otp, queue)
            .with_rate_limiter(limiter)
            .with_clock(Arc::new(|| 1_000_000_000));
        (ctx, rx)
    }

    fn generate_request() -> OtpGenerateRequest {
        OtpGenerateRequest {
            phone: "+15551234567".to_string(),
            email: "alice@example.com".to_string(),
        }
    }

    fn validate_request(otp: &str) -> OtpValidateRequest {
        OtpValidateRequest {
            access_code: 7,
            otp: Zeroizing::new(otp.to_string()),
        }
    }

    #[tokio::test]
    async fn test_generate_queues_current_code() {
        let (ctx, mut rx) = context(OtpRateLimiter::default());
        ctx.generate_otp(generate_request());

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.phone, "+15551234567");
        assert_eq!(delivery.email, "alice@example.com");
        assert_eq!(delivery.code.as_str(), "949556");
    }

    #[tokio::test]
    async fn test_generate_respects_rate_limit() {
        let (ctx, mut rx) = context(OtpRateLimiter::new(1, 1));
        ctx.generate_otp(generate_request());
        ctx.generate_otp(generate_request());
        drop(ctx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_validate_responses() {
        let (ctx, _rx) = context(OtpRateLimiter::default());
        assert_eq!(ctx.validate_otp(&validate_request("949556")), OTP_VALID);
        assert_eq!(ctx.validate_otp(&validate_request("949557")), OTP_INVALID);
        assert_eq!(ctx.validate_otp(&validate_request("94955")), OTP_INVALID);
    }

    #[test]
    fn test_sign_csr_appends_terminated_pem() {
        let (ctx, _rx) = context(OtpRateLimiter::default());
        let request = CsrRequest {
            pem: Bytes::from(client_csr("device.example")),
        };

        let mut out = Vec::new();
        ctx.sign_csr(&request, &mut out);

        assert!(out.starts_with(b"-----BEGIN CERTIFICATE-----"));
        assert_eq!(out.last(), Some(&0));
        assert_eq!(ctx.ca().next_serial(), 2);
    }

    #[test]
    fn test_sign_csr_failure_response() {
        let (ctx, _rx) = context(OtpRateLimiter::default());
        let request = CsrRequest {
            pem: Bytes::from_static(b"not a csr"),
        };

        let mut out = Vec::new();
        ctx.sign_csr(&request, &mut out);

        assert_eq!(out, SIGNING_FAILED);
        assert_eq!(ctx.ca().next_serial(), 1);
    }
}
