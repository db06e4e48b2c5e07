//! OTP-generate framer (selector `'0'`).
//!
//! Wire format: `[phone_len][phone][email_len][email]`, each length a single
//! byte in `1..=255`. Fields arrive in that fixed order and may be split
//! across any number of reads.

use bytes::Buf;

use super::field::PrefixedField;
use super::{ConnectionError, Progress};

/// Decoded delivery destinations.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpGenerateRequest {
    pub phone: String,
    pub email: String,
}

impl std::fmt::Debug for OtpGenerateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpGenerateRequest")
            .field("phone", &crate::notify::mask_phone(&self.phone))
            .field("email", &crate::notify::mask_email(&self.email))
            .finish()
    }
}

/// Where the framer is within the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateStage {
    AwaitPhoneLen,
    ReceivingPhone,
    AwaitEmailLen,
    ReceivingEmail,
}

pub struct OtpGenerateFramer {
    phone: PrefixedField,
    email: PrefixedField,
}

impl OtpGenerateFramer {
    pub fn new() -> Self {
        Self {
            phone: PrefixedField::new("zero-length phone number"),
            email: PrefixedField::new("zero-length email address"),
        }
    }

    pub fn stage(&self) -> GenerateStage {
        if self.phone.expected().is_none() {
            GenerateStage::AwaitPhoneLen
        } else if !self.phone.is_complete() {
            GenerateStage::ReceivingPhone
        } else if self.email.expected().is_none() {
            GenerateStage::AwaitEmailLen
        } else {
            GenerateStage::ReceivingEmail
        }
    }

    pub fn feed<B: Buf>(
        &mut self,
        input: &mut B,
    ) -> Result<Progress<OtpGenerateRequest>, ConnectionError> {
        if !self.phone.feed(input)? {
            return Ok(Progress::NeedMore);
        }
        if !self.email.feed(input)? {
            return Ok(Progress::NeedMore);
        }

        let phone = String::from_utf8(self.phone.take())
            .map_err(|_| ConnectionError::MalformedRequest("phone number is not UTF-8"))?;
        let email = String::from_utf8(self.email.take())
            .map_err(|_| ConnectionError::MalformedRequest("email address is not UTF-8"))?;

        Ok(Progress::Complete(OtpGenerateRequest { phone, email }))
    }
}

impl Default for OtpGenerateFramer {
    fn default() -> Self {
        Self::new()
    }
}
