//! OTP delivery to phones and mailboxes.
//!
//! Connection tasks never talk to a provider directly. They enqueue an
//! [`OtpDelivery`] on a bounded [`DeliveryQueue`]; a single worker task
//! drains the queue and calls the configured [`Notifier`].
//!
//! # Security
//!
//! - Codes are zeroized on drop and never logged
//! - Destinations are masked in logs and `Debug` output

mod providers;
mod queue;

pub use providers::{CommandNotifier, LogNotifier};
pub use queue::{delivery_channel, run_delivery_worker, DeliveryQueue, DeliveryReceiver};

use std::time::Duration;

use async_trait::async_trait;
use zeroize::Zeroizing;

/// Delivery backend for one-time codes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), DeliveryError>;

    async fn send_email(&self, address: &str, message: &str) -> Result<(), DeliveryError>;
}

/// Delivery failures. Never fatal to a connection or the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery queue is full")]
    QueueFull,

    #[error("delivery worker has stopped")]
    QueueClosed,

    #[error("failed to start notifier command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("notifier command exited with {0}")]
    CommandFailed(std::process::ExitStatus),

    #[error("notifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Provider(String),
}

/// A code waiting to be sent.
pub struct OtpDelivery {
    pub phone: String,
    pub email: String,
    pub code: Zeroizing<String>,
}

impl OtpDelivery {
    /// Text sent to the recipient.
    pub fn message(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("Your verification code is {}", self.code.as_str()))
    }
}

impl std::fmt::Debug for OtpDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpDelivery")
            .field("phone", &mask_phone(&self.phone))
            .field("email", &mask_email(&self.email))
            .finish_non_exhaustive()
    }
}

/// Keep the last four characters of a phone number.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

/// Keep the first character of the local part and the whole domain.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
