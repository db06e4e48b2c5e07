//! credgate - OTP and certificate issuance daemon.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use credgate_daemon::ca::{CaContext, CaMaterial, RcgenIssuer};
use credgate_daemon::config::{
    default_data_dir, DaemonConfig, NotifierConfig, ServeArgs, CA_CERT_FILE, CA_KEY_FILE,
    SERVER_CERT_FILE, SERVER_KEY_FILE,
};
use credgate_daemon::notify::{
    delivery_channel, run_delivery_worker, CommandNotifier, LogNotifier, Notifier,
};
use credgate_daemon::rate_limit::OtpRateLimiter;
use credgate_daemon::tls::{
    build_ca, build_server_cert, fingerprint, write_identity, CertParams, TlsServerConfig,
};
use credgate_daemon::{spawn_signal_handler, DaemonContext, Server};
use credgate_otp::{generate_secret, OtpSpec};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// credgate - one-time passcodes and certificates over TLS
#[derive(Parser)]
#[command(name = "credgate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser)]
#[command(name = "credgate")]
struct ServeOnly {
    #[command(flatten)]
    args: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default if no command given)
    Serve(ServeArgs),

    /// Certificate authority management
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },

    /// One-time passcode helpers
    Otp {
        #[command(subcommand)]
        action: OtpAction,
    },
}

#[derive(Subcommand)]
enum CaAction {
    /// Create a CA and a server certificate signed by it
    Init {
        /// Output directory (defaults to the data directory)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,

        /// Extra DNS name or IP address for the server certificate (repeatable)
        #[arg(long = "san")]
        sans: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OtpAction {
    /// Print a fresh random base32 secret
    NewSecret,

    /// Print the code that is valid right now
    Now {
        #[arg(long, env = "CREDGATE_OTP_SECRET", hide_env_values = true)]
        secret: String,

        #[arg(long, default_value_t = 6)]
        digits: u32,

        #[arg(long, default_value_t = 30)]
        period: u64,

        #[arg(long, default_value = "SHA1")]
        algorithm: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => cmd_serve(args).await,
        Some(Commands::Ca { action }) => cmd_ca(action),
        Some(Commands::Otp { action }) => cmd_otp(action),
        // Bare `credgate` serves with options from the environment
        None => cmd_serve(ServeOnly::parse_from(["credgate"]).args).await,
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = DaemonConfig::try_from(args).context("invalid configuration")?;

    let material = CaMaterial::from_files(&config.ca_cert, &config.ca_key)
        .context("failed to load CA (run `credgate ca init` first)")?;
    tracing::info!(
        fingerprint = %fingerprint(material.cert_der()),
        "CA loaded"
    );
    let ca = CaContext::new(material, Box::new(RcgenIssuer), config.ca_policy)
        .context("failed to initialise serial counter")?;

    let tls = TlsServerConfig::from_files(&config.server_cert, &config.server_key)
        .context("failed to load server certificate")?;

    let notifier: Arc<dyn Notifier> = match &config.notifier {
        NotifierConfig::Log => Arc::new(LogNotifier),
        NotifierConfig::Command {
            program,
            args,
            timeout,
        } => Arc::new(CommandNotifier::new(program.clone(), args.clone(), *timeout)),
    };
    tracing::info!(notifier = notifier.name(), "Delivery configured");

    let (deliveries, rx) = delivery_channel(config.delivery_queue);
    let worker = tokio::spawn(run_delivery_worker(rx, notifier));

    let ctx = Arc::new(
        DaemonContext::new(ca, config.otp, deliveries)
            .with_rate_limiter(OtpRateLimiter::new(config.otp_per_minute, config.otp_burst))
            .with_session_policy(config.session)
            .with_max_csr_size(config.max_csr_size),
    );

    let server = Server::bind(config.listen, tls.acceptor(), ctx, config.idle_timeout)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(
        addr = %server.local_addr()?,
        session = ?config.session,
        "credgate listening (TLS)"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_signal_handler(shutdown_tx);

    server.run(shutdown_rx).await;

    // The server owned the last queue handle, so the worker drains and exits
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "Delivery worker ended abnormally");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn cmd_ca(action: CaAction) -> anyhow::Result<()> {
    match action {
        CaAction::Init { out, force, sans } => {
            let dir = out.unwrap_or_else(default_data_dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;

            let paths = [
                dir.join(CA_CERT_FILE),
                dir.join(CA_KEY_FILE),
                dir.join(SERVER_CERT_FILE),
                dir.join(SERVER_KEY_FILE),
            ];
            if !force {
                if let Some(existing) = paths.iter().find(|p| p.exists()) {
                    bail!("{} already exists (use --force to overwrite)", existing.display());
                }
            }
            let [ca_cert, ca_key, server_cert, server_key] = paths;

            let ca = build_ca(&CertParams::ca())?;
            write_identity(&ca, &ca_cert, &ca_key)
                .with_context(|| format!("failed to write {}", ca_cert.display()))?;

            let mut params = CertParams::default();
            for san in sans {
                match san.parse::<IpAddr>() {
                    Ok(ip) => params.san_ips.push(ip),
                    Err(_) => params.san_dns.push(san),
                }
            }
            let material = CaMaterial::from_pem(&ca.cert_pem, &ca.key_pem)?;
            let server = build_server_cert(&material, &params)?;
            write_identity(&server, &server_cert, &server_key)
                .with_context(|| format!("failed to write {}", server_cert.display()))?;

            println!("Certificate authority created");
            println!("=============================");
            println!();
            println!("CA certificate:     {}", ca_cert.display());
            println!("CA key:             {}", ca_key.display());
            println!("Server certificate: {}", server_cert.display());
            println!("Server key:         {}", server_key.display());
            println!();
            println!("CA fingerprint (SHA-256):");
            println!("  {}", fingerprint(material.cert_der()));
            println!();
            println!("Distribute {} to clients so they can verify the daemon.", CA_CERT_FILE);
            Ok(())
        }
    }
}

fn cmd_otp(action: OtpAction) -> anyhow::Result<()> {
    match action {
        OtpAction::NewSecret => {
            println!("{}", generate_secret());
            Ok(())
        }
        OtpAction::Now {
            secret,
            digits,
            period,
            algorithm,
        } => {
            let spec = OtpSpec::new(&secret, digits, period, &algorithm)?;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)?
                .as_secs();
            let code = spec.generate_at(now)?;
            println!("{}  (valid for {}s)", code, spec.remaining_at(now));
            Ok(())
        }
    }
}
