//! `serve` configuration.
//!
//! Every option can be given on the command line or through a `CREDGATE_*`
//! environment variable (a `.env` file is loaded first). [`ServeArgs`] is
//! the raw input; [`DaemonConfig`] is the validated result.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use credgate_otp::{OtpError, OtpSpec};

use crate::ca::{CaPolicy, DEFAULT_INITIAL_SERIAL, DEFAULT_VALIDITY_DAYS};
use crate::context::{SessionPolicy, DEFAULT_MAX_CSR_SIZE};
use crate::rate_limit::{DEFAULT_BURST, DEFAULT_PER_MINUTE};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:4433";
pub const DEFAULT_DELIVERY_QUEUE: usize = 256;

pub const CA_CERT_FILE: &str = "ca.pem";
pub const CA_KEY_FILE: &str = "ca.key";
pub const SERVER_CERT_FILE: &str = "server.pem";
pub const SERVER_KEY_FILE: &str = "server.key";

/// Where certificates and keys live unless paths are given explicitly.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("credgate")
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "CREDGATE_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Directory holding ca.pem, ca.key, server.pem and server.key
    #[arg(long, env = "CREDGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// CA certificate (PEM), overrides the data directory
    #[arg(long, env = "CREDGATE_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// CA private key (PEM), overrides the data directory
    #[arg(long, env = "CREDGATE_CA_KEY")]
    pub ca_key: Option<PathBuf>,

    /// Server certificate chain (PEM), overrides the data directory
    #[arg(long, env = "CREDGATE_SERVER_CERT")]
    pub server_cert: Option<PathBuf>,

    /// Server private key (PEM), overrides the data directory
    #[arg(long, env = "CREDGATE_SERVER_KEY")]
    pub server_key: Option<PathBuf>,

    /// Validity of issued certificates in days
    #[arg(long, env = "CREDGATE_CERT_DAYS", default_value_t = DEFAULT_VALIDITY_DAYS)]
    pub cert_days: u32,

    /// First serial number when no serial state file exists
    #[arg(long, env = "CREDGATE_INITIAL_SERIAL", default_value_t = DEFAULT_INITIAL_SERIAL)]
    pub initial_serial: u64,

    /// File that keeps the next serial number across restarts
    #[arg(long, env = "CREDGATE_SERIAL_STATE")]
    pub serial_state: Option<PathBuf>,

    /// Largest accepted CSR in bytes, terminator included
    #[arg(long, env = "CREDGATE_MAX_CSR_SIZE", default_value_t = DEFAULT_MAX_CSR_SIZE)]
    pub max_csr_size: usize,

    /// Base32 TOTP secret
    #[arg(long, env = "CREDGATE_OTP_SECRET", hide_env_values = true)]
    pub otp_secret: String,

    /// Code length (6 or 8)
    #[arg(long, env = "CREDGATE_OTP_DIGITS", default_value_t = 6)]
    pub otp_digits: u32,

    /// Code period in seconds (30 or 60)
    #[arg(long, env = "CREDGATE_OTP_PERIOD", default_value_t = 30)]
    pub otp_period: u64,

    /// HMAC algorithm (SHA1, SHA256, SHA512)
    #[arg(long, env = "CREDGATE_OTP_ALGORITHM", default_value = "SHA1")]
    pub otp_algorithm: String,

    /// Whether a connection serves one request or many
    #[arg(long, env = "CREDGATE_SESSION", value_enum, default_value_t = SessionPolicy::SingleRequest)]
    pub session: SessionPolicy,

    /// Seconds a connection may stay silent before it is closed
    #[arg(long, env = "CREDGATE_IDLE_TIMEOUT", default_value_t = 30)]
    pub idle_timeout: u64,

    /// Pending deliveries held before new ones are dropped
    #[arg(long, env = "CREDGATE_DELIVERY_QUEUE", default_value_t = DEFAULT_DELIVERY_QUEUE)]
    pub delivery_queue: usize,

    /// Codes per minute per phone number
    #[arg(long, env = "CREDGATE_OTP_RATE", default_value_t = DEFAULT_PER_MINUTE)]
    pub otp_per_minute: u32,

    /// Codes a phone number may receive back to back
    #[arg(long, env = "CREDGATE_OTP_BURST", default_value_t = DEFAULT_BURST)]
    pub otp_burst: u32,

    /// Program that delivers codes; deliveries are only logged when unset
    #[arg(long, env = "CREDGATE_NOTIFIER_COMMAND")]
    pub notifier_command: Option<PathBuf>,

    /// Extra argument passed to the notifier before the channel (repeatable)
    #[arg(long = "notifier-arg", allow_hyphen_values = true)]
    pub notifier_args: Vec<String>,

    /// Seconds a notifier invocation may run
    #[arg(long, env = "CREDGATE_NOTIFIER_TIMEOUT", default_value_t = 10)]
    pub notifier_timeout: u64,
}

/// How codes leave the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierConfig {
    Log,
    Command {
        program: PathBuf,
        args: Vec<String>,
        timeout: Duration,
    },
}

/// Validated daemon configuration.
#[derive(Debug)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub ca_policy: CaPolicy,
    pub max_csr_size: usize,
    pub otp: OtpSpec,
    pub session: SessionPolicy,
    pub idle_timeout: Duration,
    pub delivery_queue: usize,
    pub otp_per_minute: u32,
    pub otp_burst: u32,
    pub notifier: NotifierConfig,
}

impl TryFrom<ServeArgs> for DaemonConfig {
    type Error = ConfigError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let otp = OtpSpec::new(
            &args.otp_secret,
            args.otp_digits,
            args.otp_period,
            &args.otp_algorithm,
        )?;

        if args.cert_days == 0 {
            return Err(ConfigError::Invalid("cert-days must be at least 1"));
        }
        if args.initial_serial == 0 {
            return Err(ConfigError::Invalid("initial-serial must be at least 1"));
        }
        if args.max_csr_size == 0 {
            return Err(ConfigError::Invalid("max-csr-size must be at least 1"));
        }
        if args.idle_timeout == 0 {
            return Err(ConfigError::Invalid("idle-timeout must be at least 1 second"));
        }
        if args.delivery_queue == 0 {
            return Err(ConfigError::Invalid("delivery-queue must be at least 1"));
        }
        if args.otp_per_minute == 0 || args.otp_burst == 0 {
            return Err(ConfigError::Invalid("otp-rate and otp-burst must be at least 1"));
        }

        let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
        let notifier = match args.notifier_command {
            Some(program) => NotifierConfig::Command {
                program,
                args: args.notifier_args,
                timeout: Duration::from_secs(args.notifier_timeout.max(1)),
            },
            None => NotifierConfig::Log,
        };

        Ok(Self {
            listen: args.listen,
            ca_cert: args.ca_cert.unwrap_or_else(|| data_dir.join(CA_CERT_FILE)),
            ca_key: args.ca_key.unwrap_or_else(|| data_dir.join(CA_KEY_FILE)),
            server_cert: args
                .server_cert
                .unwrap_or_else(|| data_dir.join(SERVER_CERT_FILE)),
            server_key: args
                .server_key
                .unwrap_or_else(|| data_dir.join(SERVER_KEY_FILE)),
            ca_policy: CaPolicy {
                validity_days: args.cert_days,
                initial_serial: args.initial_serial,
                serial_state_file: args.serial_state,
            },
            max_csr_size: args.max_csr_size,
            otp,
            session: args.session,
            idle_timeout: Duration::from_secs(args.idle_timeout),
            delivery_queue: args.delivery_queue,
            otp_per_minute: args.otp_per_minute,
            otp_burst: args.otp_burst,
            notifier,
        })
    }
}

/// Invalid configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid OTP configuration: {0}")]
    Otp(#[from] OtpError),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn parse(args: &[&str]) -> ServeArgs {
        let mut argv = vec!["credgate", "--data-dir", "/srv/credgate"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().serve
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::try_from(parse(&["--otp-secret", "JBSWY3DPEHPK3PXP"])).unwrap();

        assert_eq!(config.listen, DEFAULT_LISTEN.parse::<SocketAddr>().unwrap());
        assert_eq!(config.ca_cert, PathBuf::from("/srv/credgate/ca.pem"));
        assert_eq!(config.server_key, PathBuf::from("/srv/credgate/server.key"));
        assert_eq!(config.ca_policy.validity_days, 365);
        assert_eq!(config.ca_policy.initial_serial, 1);
        assert_eq!(config.session, SessionPolicy::SingleRequest);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.otp.digits(), 6);
        assert_eq!(config.notifier, NotifierConfig::Log);
    }

    #[test]
    fn test_overrides() {
        let config = DaemonConfig::try_from(parse(&[
            "--otp-secret",
            "JBSWY3DPEHPK3PXP",
            "--otp-digits",
            "8",
            "--otp-period",
            "60",
            "--otp-algorithm",
            "sha512",
            "--session",
            "keep-alive",
            "--ca-cert",
            "/etc/ca.pem",
            "--notifier-command",
            "/usr/local/bin/send-otp",
            "--notifier-arg",
            "--profile=prod",
        ]))
        .unwrap();

        assert_eq!(config.otp.digits(), 8);
        assert_eq!(config.otp.period(), 60);
        assert_eq!(config.session, SessionPolicy::KeepAlive);
        assert_eq!(config.ca_cert, PathBuf::from("/etc/ca.pem"));
        assert_eq!(config.ca_key, PathBuf::from("/srv/credgate/ca.key"));
        match config.notifier {
            NotifierConfig::Command { program, args, .. } => {
                assert_eq!(program, PathBuf::from("/usr/local/bin/send-otp"));
                assert_eq!(args, vec!["--profile=prod".to_string()]);
            }
            NotifierConfig::Log => panic!("expected command notifier"),
        }
    }

    #[test]
    fn test_rejects_bad_otp_parameters() {
        let err = DaemonConfig::try_from(parse(&[
            "--otp-secret",
            "JBSWY3DPEHPK3PXP",
            "--otp-digits",
            "7",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Otp(OtpError::InvalidDigits(7))));

        let err = DaemonConfig::try_from(parse(&["--otp-secret", "not base32!"])).unwrap_err();
        assert!(matches!(err, ConfigError::Otp(OtpError::InvalidSecret)));
    }

    #[test]
    fn test_rejects_zero_limits() {
        for flag in ["--max-csr-size", "--idle-timeout", "--delivery-queue", "--initial-serial"] {
            let err = DaemonConfig::try_from(parse(&["--otp-secret", "JBSWY3DPEHPK3PXP", flag, "0"]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "flag {}", flag);
        }
    }
}
