//! OTP-validate framer (selector `'1'`).
//!
//! Wire format: `[code_len][access code][otp_len][otp]`. The access code is
//! a client-chosen correlation number sent as ASCII decimal digits; it is
//! only recorded in logs.

use bytes::Buf;
use zeroize::Zeroizing;

use super::field::PrefixedField;
use super::{ConnectionError, Progress};

pub struct OtpValidateRequest {
    pub access_code: i64,
    pub otp: Zeroizing<String>,
}

impl std::fmt::Debug for OtpValidateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpValidateRequest")
            .field("access_code", &self.access_code)
            .field("otp_len", &self.otp.len())
            .finish()
    }
}

pub struct OtpValidateFramer {
    access_code: PrefixedField,
    otp: PrefixedField,
}

impl OtpValidateFramer {
    pub fn new() -> Self {
        Self {
            access_code: PrefixedField::new("zero-length access code"),
            otp: PrefixedField::new("zero-length OTP"),
        }
    }

    pub fn feed<B: Buf>(
        &mut self,
        input: &mut B,
    ) -> Result<Progress<OtpValidateRequest>, ConnectionError> {
        if !self.access_code.feed(input)? {
            return Ok(Progress::NeedMore);
        }
        if !self.otp.feed(input)? {
            return Ok(Progress::NeedMore);
        }

        let access_code = parse_access_code(&self.access_code.take())?;
        let otp = Zeroizing::new(self.otp.take());
        let otp = std::str::from_utf8(&otp)
            .map_err(|_| ConnectionError::MalformedRequest("OTP is not UTF-8"))?
            .to_string();

        Ok(Progress::Complete(OtpValidateRequest {
            access_code,
            otp: Zeroizing::new(otp),
        }))
    }
}

impl Default for OtpValidateFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_access_code(digits: &[u8]) -> Result<i64, ConnectionError> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(ConnectionError::MalformedRequest(
            "access code is not decimal",
        ));
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ConnectionError::MalformedRequest("access code out of range"))
}
