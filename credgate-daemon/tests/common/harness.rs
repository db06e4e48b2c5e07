//! Test harness for end-to-end tests.
//!
//! Starts a real daemon on a loopback port with a throwaway CA, a frozen
//! clock and a notifier that records deliveries instead of sending them.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use credgate_daemon::ca::{CaContext, CaMaterial, CaPolicy, RcgenIssuer};
use credgate_daemon::notify::{delivery_channel, run_delivery_worker, DeliveryError, Notifier};
use credgate_daemon::tls::{build_ca, build_server_cert, CertParams, TlsServerConfig};
use credgate_daemon::{DaemonContext, Server, SessionPolicy};
use credgate_otp::OtpSpec;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use x509_parser::pem::parse_x509_pem;

const SECRET: &str = "JBSWY3DPEHPK3PXP";
const NOW: u64 = 1_000_000_000;

/// The code valid at the harness clock.
pub const CODE: &str = "949556";

/// A message handed to the recording notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: &'static str,
    pub destination: String,
    pub message: String,
}

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Delivery>>,
}

impl Recorder {
    fn record(&self, channel: &'static str, destination: &str, message: &str) {
        self.sent.lock().unwrap().push(Delivery {
            channel,
            destination: destination.to_string(),
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl Notifier for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), DeliveryError> {
        self.record("sms", phone, message);
        Ok(())
    }

    async fn send_email(&self, address: &str, message: &str) -> Result<(), DeliveryError> {
        self.record("email", address, message);
        Ok(())
    }
}

/// A daemon listening on 127.0.0.1 with an ephemeral port.
pub struct TestDaemon {
    pub addr: SocketAddr,
    pub ca_pem: String,
    recorder: Arc<Recorder>,
    shutdown: broadcast::Sender<()>,
    server: JoinHandle<()>,
}

impl TestDaemon {
    pub async fn start(session: SessionPolicy) -> Self {
        let ca = build_ca(&CertParams::ca()).expect("Failed to build CA");
        let signing = CaMaterial::from_pem(&ca.cert_pem, &ca.key_pem).expect("Failed to load CA");
        let identity = build_server_cert(&signing, &CertParams::default())
            .expect("Failed to build server cert");
        let tls =
            TlsServerConfig::from_pem(identity.cert_pem.as_bytes(), identity.key_pem.as_bytes())
                .expect("Failed to build TLS config");

        let ca_context = CaContext::new(signing, Box::new(RcgenIssuer), CaPolicy::default())
            .expect("Failed to build CA context");
        let otp = OtpSpec::new(SECRET, 6, 30, "SHA1").expect("Failed to build OTP spec");

        let recorder = Arc::new(Recorder::default());
        let (queue, rx) = delivery_channel(16);
        tokio::spawn(run_delivery_worker(rx, Arc::clone(&recorder) as Arc<dyn Notifier>));

        let ctx = Arc::new(
            DaemonContext::new(ca_context, otp, queue)
                .with_session_policy(session)
                .with_max_csr_size(16 * 1024)
                .with_clock(Arc::new(|| NOW)),
        );

        let server = Server::bind(
            "127.0.0.1:0".parse().unwrap(),
            tls.acceptor(),
            ctx,
            Duration::from_secs(5),
        )
        .await
        .expect("Failed to bind");
        let addr = server.local_addr().expect("No local address");

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(server.run(shutdown_rx));

        Self {
            addr,
            ca_pem: ca.cert_pem,
            recorder,
            shutdown,
            server,
        }
    }

    /// Open a TLS connection that trusts only the test CA.
    pub async fn connect(&self) -> TlsStream<TcpStream> {
        let mut roots = RootCertStore::empty();
        let ca_der = CertificateDer::from_pem_slice(self.ca_pem.as_bytes()).expect("Bad CA PEM");
        roots.add(ca_der).expect("Failed to add CA root");

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let tcp = TcpStream::connect(self.addr).await.expect("Failed to connect");
        let name = ServerName::try_from("localhost").expect("Bad server name");
        connector
            .connect(name, tcp)
            .await
            .expect("TLS handshake failed")
    }

    /// Send one request and read until the daemon closes the connection.
    pub async fn exchange(&self, request: &[u8]) -> Vec<u8> {
        let mut stream = self.connect().await;
        stream.write_all(request).await.expect("Write failed");
        stream.flush().await.expect("Flush failed");

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
            .await
            .expect("Daemon did not close the connection")
            .expect("Read failed");
        response
    }

    /// Wait until at least `count` deliveries were recorded.
    pub async fn deliveries(&self, count: usize) -> Vec<Delivery> {
        for _ in 0..100 {
            {
                let sent = self.recorder.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.recorder.sent.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.server.await.expect("Server task panicked");
    }
}

/// Parse a NUL-terminated PEM certificate response; returns (serial, issuer DN, subject DN).
pub fn parse_certificate(response: &[u8]) -> (u64, String, String) {
    let (terminator, pem_bytes) = response.split_last().expect("Empty response");
    assert_eq!(*terminator, 0, "Response must be NUL terminated");

    let (_, pem) = parse_x509_pem(pem_bytes).expect("Response is not PEM");
    let cert = pem.parse_x509().expect("Response is not a certificate");
    let serial = cert
        .raw_serial()
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    (serial, cert.issuer().to_string(), cert.subject().to_string())
}
