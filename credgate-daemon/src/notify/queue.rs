//! Bounded hand-off between connection tasks and the delivery worker.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{mask_email, mask_phone, DeliveryError, Notifier, OtpDelivery};

/// Sending half, cloned into every connection's context.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<OtpDelivery>,
}

/// Receiving half, owned by the worker.
pub struct DeliveryReceiver {
    rx: mpsc::Receiver<OtpDelivery>,
}

/// Create a queue holding at most `depth` pending deliveries.
pub fn delivery_channel(depth: usize) -> (DeliveryQueue, DeliveryReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (DeliveryQueue { tx }, DeliveryReceiver { rx })
}

impl DeliveryQueue {
    /// Enqueue without waiting.
    pub fn enqueue(&self, delivery: OtpDelivery) -> Result<(), DeliveryError> {
        self.tx.try_send(delivery).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::QueueClosed,
        })
    }
}

impl DeliveryReceiver {
    pub async fn recv(&mut self) -> Option<OtpDelivery> {
        self.rx.recv().await
    }
}

/// Drain the queue until every sender is gone.
///
/// SMS is attempted before email; a failure on one channel does not skip
/// the other.
pub async fn run_delivery_worker(mut rx: DeliveryReceiver, notifier: Arc<dyn Notifier>) {
    tracing::info!(notifier = notifier.name(), "Delivery worker started");

    while let Some(delivery) = rx.recv().await {
        let message = delivery.message();

        match notifier.send_sms(&delivery.phone, &message).await {
            Ok(()) => tracing::info!(to = %mask_phone(&delivery.phone), "OTP sent by SMS"),
            Err(e) => tracing::warn!(
                to = %mask_phone(&delivery.phone),
                error = %e,
                "SMS delivery failed"
            ),
        }

        match notifier.send_email(&delivery.email, &message).await {
            Ok(()) => tracing::info!(to = %mask_email(&delivery.email), "OTP sent by email"),
            Err(e) => tracing::warn!(
                to = %mask_email(&delivery.email),
                error = %e,
                "Email delivery failed"
            ),
        }
    }

    tracing::info!("Delivery worker stopped");
}
