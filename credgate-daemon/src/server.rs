//! TLS listener and per-connection I/O loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::connection::{Connection, Flow};
use crate::context::DaemonContext;

/// TLS handshake timeout to prevent slow-loris style attacks.
/// Connections that don't complete the handshake within this time are dropped.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a connection may sit without sending a byte.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const READ_BUF_SIZE: usize = 4096;

/// Run one session over an established stream until it closes.
///
/// The stream is shut down when the session ends, whatever the reason.
pub async fn serve_connection<S>(
    mut stream: S,
    ctx: Arc<DaemonContext>,
    idle_timeout: Duration,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(ctx);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut out = Vec::new();

    loop {
        let n = match tokio::time::timeout(idle_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                tracing::debug!(completed = conn.completed(), "Peer closed connection");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Read failed");
                return Err(e);
            }
            Err(_) => {
                tracing::info!(timeout_secs = ?idle_timeout, "Idle timeout, closing connection");
                break;
            }
        };

        let flow = conn.on_bytes(&buf[..n], &mut out);

        if !out.is_empty() {
            stream.write_all(&out).await?;
            stream.flush().await?;
            out.clear();
        }

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Protocol error, closing connection");
                break;
            }
        }
    }

    let _ = stream.shutdown().await;
    Ok(())
}

/// Accepts TLS connections and runs a session for each.
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ctx: Arc<DaemonContext>,
    idle_timeout: Duration,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        acceptor: TlsAcceptor,
        ctx: Arc<DaemonContext>,
        idle_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            acceptor,
            ctx,
            idle_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then abort live sessions.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut sessions = JoinSet::new();
        // Periodically drop rate-limit buckets for phones that went quiet
        let mut prune = tokio::time::interval(Duration::from_secs(60));

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((tcp_stream, peer_addr)) => {
                            let acceptor = self.acceptor.clone();
                            let ctx = Arc::clone(&self.ctx);
                            let idle_timeout = self.idle_timeout;
                            let span = tracing::info_span!("connection", peer = %peer_addr);
                            sessions.spawn(
                                handle_tcp(acceptor, tcp_stream, ctx, idle_timeout).instrument(span),
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "TCP accept failed");
                        }
                    }
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = prune.tick() => {
                    self.ctx.rate_limiter().prune();
                }
                _ = shutdown.recv() => {
                    tracing::info!(live = sessions.len(), "Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        sessions.shutdown().await;
    }
}

async fn handle_tcp(
    acceptor: TlsAcceptor,
    tcp_stream: tokio::net::TcpStream,
    ctx: Arc<DaemonContext>,
    idle_timeout: Duration,
) {
    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp_stream)).await {
        Ok(Ok(tls_stream)) => {
            tracing::debug!("TLS handshake successful");
            if let Err(e) = serve_connection(tls_stream, ctx, idle_timeout).await {
                tracing::debug!(error = %e, "Connection ended with error");
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "TLS handshake failed");
        }
        Err(_) => {
            tracing::warn!(timeout_secs = ?TLS_HANDSHAKE_TIMEOUT, "TLS handshake timed out");
        }
    }
}

/// Broadcast on `shutdown_tx` at the first SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: broadcast::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
