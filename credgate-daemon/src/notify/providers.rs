//! Built-in notifiers.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{mask_email, mask_phone, DeliveryError, Notifier};

/// Records deliveries in the log without sending anything.
///
/// The message itself is never logged.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %mask_phone(phone),
            message_len = message.len(),
            "SMS delivery skipped (log notifier)"
        );
        Ok(())
    }

    async fn send_email(&self, address: &str, message: &str) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %mask_email(address),
            message_len = message.len(),
            "Email delivery skipped (log notifier)"
        );
        Ok(())
    }
}

/// Hands each delivery to an external program.
///
/// Invoked as `<program> [args...] sms <phone>` or
/// `<program> [args...] email <address>` with the message on stdin. A
/// non-zero exit status is a delivery failure.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(
        &self,
        channel: &str,
        destination: &str,
        message: &str,
    ) -> Result<(), DeliveryError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(channel)
            .arg(destination)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(DeliveryError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            // The program may exit without reading its input
            match stdin.write_all(message.as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(channel, "Notifier command closed stdin early");
                }
                Err(e) => return Err(DeliveryError::Spawn(e)),
            }
        }

        let status = tokio::time::timeout(self.timeout, child.wait())
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
            .map_err(DeliveryError::Spawn)?;

        if status.success() {
            Ok(())
        } else {
            Err(DeliveryError::CommandFailed(status))
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), DeliveryError> {
        self.run("sms", phone, message).await
    }

    async fn send_email(&self, address: &str, message: &str) -> Result<(), DeliveryError> {
        self.run("email", address, message).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "credgate-notify-{}-{}-{}",
            std::process::id(),
            n,
            name
        ))
    }

    fn shell(script: String, timeout: Duration) -> CommandNotifier {
        CommandNotifier::new(
            "/bin/sh",
            vec!["-c".to_string(), script, "notifier".to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_command_receives_destination_and_message() {
        let out = temp_path("out");
        let notifier = shell(
            format!("printf '%s %s\\n' \"$1\" \"$2\" >> '{0}'; cat >> '{0}'", out.display()),
            Duration::from_secs(5),
        );

        notifier
            .send_sms("+15550001111", "Your verification code is 123456")
            .await
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "sms +15550001111\nYour verification code is 123456");
        let _ = std::fs::remove_file(&out);
    }

    #[tokio::test]
    async fn test_email_channel_name() {
        let out = temp_path("email");
        let notifier = shell(
            format!("printf '%s' \"$1\" > '{}'", out.display()),
            Duration::from_secs(5),
        );

        notifier.send_email("a@b.c", "hi").await.unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "email");
        let _ = std::fs::remove_file(&out);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let notifier = shell("exit 3".to_string(), Duration::from_secs(5));
        let err = notifier.send_sms("1", "m").await.unwrap_err();
        assert!(matches!(err, DeliveryError::CommandFailed(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let notifier = shell("sleep 5".to_string(), Duration::from_millis(100));
        let err = notifier.send_email("a@b.c", "m").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let notifier = CommandNotifier::new(
            temp_path("does-not-exist"),
            Vec::new(),
            Duration::from_secs(1),
        );
        let err = notifier.send_sms("1", "m").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        let notifier = LogNotifier;
        assert!(notifier.send_sms("+15551234567", "code").await.is_ok());
        assert!(notifier.send_email("a@b.c", "code").await.is_ok());
        assert_eq!(notifier.name(), "log");
    }
}
