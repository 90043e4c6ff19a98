//! UDP transport (§4.5): one datagram per event, socket opened and closed
//! on every `send`.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::instrument;

use crate::error::TransportError;
use crate::stats::StatsBundle;

use super::{Transport, TransportExtraStats};

/// Datagram transport. No framing beyond the host-appended terminator is
/// needed since each event is its own datagram.
pub struct UdpTransport {
    host: String,
    port: u16,
    stats: StatsBundle,
    extra: TransportExtraStats,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl UdpTransport {
    /// Construct a UDP transport targeting `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let stats = StatsBundle::new("eventlog_transport_");
        let extra = TransportExtraStats::register(&stats);
        Self {
            host: host.into(),
            port,
            stats,
            extra,
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    #[instrument(skip(self, events), level = "debug")]
    async fn send(&self, events: &[bytes::Bytes]) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        let result: Result<(), TransportError> = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(&addr).await?;
            for event in events {
                socket.send(event).await?;
            }
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                self.extra
                    .sent_bytes
                    .inc_by(events.iter().map(|e| e.len() as u64).sum::<u64>());
                self.extra.sent_msgs.inc_by(events.len() as u64);
                self.stats.send(events.len() as u64);
            }
            Err(_) => self.extra.errors_total.inc(),
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
