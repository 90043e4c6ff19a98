//! TCP transport (§4.5), with optional TLS via `native-tls`/`tokio-native-tls`.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use native_tls::{Certificate, Identity, TlsConnector};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

use crate::config::TlsConfig;
use crate::error::TransportError;
use crate::stats::StatsBundle;

use super::{Transport, TransportExtraStats};

/// TCP stream transport. A fresh connection is opened for every `send` and
/// closed immediately after, rather than held open, to avoid silently writing
/// into a dead half-open connection (§4.5).
pub struct TcpTransport {
    host: String,
    port: u16,
    socket_timeout: Duration,
    tls: Option<TlsConfig>,
    max_reconnect_attempts: Option<u32>,
    stats: StatsBundle,
    extra: TransportExtraStats,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls_enabled", &self.tls.as_ref().is_some_and(|t| t.enable))
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Construct a TCP transport targeting `host:port`. `tls` is consulted
    /// only if its `enable` flag is set. `max_reconnect_attempts` bounds how
    /// many extra connect attempts a single `send` makes after an initial
    /// failure; `None` means no retry.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        socket_timeout: Duration,
        tls: Option<TlsConfig>,
        max_reconnect_attempts: Option<u32>,
    ) -> Self {
        let stats = StatsBundle::new("eventlog_transport_");
        let extra = TransportExtraStats::register(&stats);
        Self {
            host: host.into(),
            port,
            socket_timeout,
            tls,
            max_reconnect_attempts,
            stats,
            extra,
        }
    }

    /// Build the TLS connector for the configured verification policy.
    ///
    /// - `verify = true`: full chain + hostname verification (CERT_REQUIRED).
    /// - `verify = false` with `ca_certs` set: custom CA trusted, hostname
    ///   verification relaxed (CERT_OPTIONAL's closest native-tls expression).
    /// - neither: verification fully disabled (CERT_NONE).
    fn build_connector(tls: &TlsConfig) -> Result<TlsConnector, TransportError> {
        let mut builder = TlsConnector::builder();

        if let Some(ca_path) = &tls.ca_certs {
            let mut buf = Vec::new();
            std::fs::File::open(ca_path)
                .and_then(|mut f| f.read_to_end(&mut buf))
                .map_err(|e| TransportError::TlsConfig(format!("reading ca_certs: {e}")))?;
            let cert = Certificate::from_pem(&buf)
                .map_err(|e| TransportError::TlsConfig(format!("parsing ca_certs: {e}")))?;
            builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.certfile, &tls.keyfile) {
            let mut cert_buf = Vec::new();
            let mut key_buf = Vec::new();
            std::fs::File::open(cert_path)
                .and_then(|mut f| f.read_to_end(&mut cert_buf))
                .map_err(|e| TransportError::TlsConfig(format!("reading certfile: {e}")))?;
            std::fs::File::open(key_path)
                .and_then(|mut f| f.read_to_end(&mut key_buf))
                .map_err(|e| TransportError::TlsConfig(format!("reading keyfile: {e}")))?;
            let identity = Identity::from_pkcs8(&cert_buf, &key_buf)
                .map_err(|e| TransportError::TlsConfig(format!("loading client identity: {e}")))?;
            builder.identity(identity);
        }

        if tls.verify {
            // CERT_REQUIRED: default builder behavior.
        } else if tls.ca_certs.is_some() {
            // CERT_OPTIONAL: trust the custom CA but don't insist the hostname matches.
            builder.danger_accept_invalid_hostnames(true);
        } else {
            // CERT_NONE.
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        builder.build().map_err(TransportError::Tls)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self, events), level = "debug")]
    async fn send(&self, events: &[bytes::Bytes]) -> Result<(), TransportError> {
        let result = self.send_inner(events).await;
        if result.is_ok() {
            self.extra.sent_bytes.inc_by(
                events.iter().map(|e| e.len() as u64).sum::<u64>(),
            );
            self.extra.sent_msgs.inc_by(events.len() as u64);
            self.stats.send(events.len() as u64);
        } else {
            self.extra.errors_total.inc();
        }
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        // No socket is retained between sends; nothing to release.
        Ok(())
    }

    fn get_stats(&self) -> Vec<crate::stats::StatsValue> {
        self.stats.snapshot()
    }
}

impl TcpTransport {
    async fn send_inner(&self, events: &[bytes::Bytes]) -> Result<(), TransportError> {
        let payload: Vec<u8> = events.iter().flat_map(|e| e.iter().copied()).collect();
        let stream = self.connect().await?;

        match &self.tls {
            Some(tls) if tls.enable => {
                let connector = Self::build_connector(tls)?;
                let async_connector = tokio_native_tls::TlsConnector::from(connector);
                let mut tls_stream = async_connector
                    .connect(&self.host, stream)
                    .await
                    .map_err(TransportError::Tls)?;
                timeout(self.socket_timeout, tls_stream.write_all(&payload))
                    .await
                    .map_err(|_| {
                        TransportError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "send timed out",
                        ))
                    })??;
            }
            _ => {
                let mut stream = stream;
                timeout(self.socket_timeout, stream.write_all(&payload))
                    .await
                    .map_err(|_| {
                        TransportError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "send timed out",
                        ))
                    })??;
            }
        }

        Ok(())
    }

    /// Connect to the configured host:port, retrying up to
    /// `max_reconnect_attempts` extra times on failure (§6).
    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        let attempts = self.max_reconnect_attempts.unwrap_or(0) + 1;

        let mut last_err = None;
        for _ in 0..attempts {
            let connect = TcpStream::connect(&addr);
            match timeout(self.socket_timeout, connect).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_err = Some(TransportError::Io(e)),
                Err(_) => {
                    last_err = Some(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    )));
                }
            }
        }
        Err(last_err.expect("attempts is always at least 1"))
    }
}
