//! Transport component (§4.5): ships a batch of already-delimited event bytes
//! to the remote collector over UDP or TCP (optionally TLS).

mod tcp;
mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use async_trait::async_trait;
use prometheus::IntCounter;

use crate::error::TransportError;
use crate::stats::{StatsBundle, StatsValue};

/// The transport-specific counters (§6) layered on top of the generic
/// [`StatsBundle`] four, registered against the same private registry so they
/// fall out of `snapshot()` automatically.
pub(crate) struct TransportExtraStats {
    pub sent_bytes: IntCounter,
    pub sent_msgs: IntCounter,
    pub errors_total: IntCounter,
}

impl TransportExtraStats {
    pub(crate) fn register(bundle: &StatsBundle) -> Self {
        let sent_bytes = IntCounter::new("eventlog_transport_sent_bytes", "bytes sent")
            .expect("static metric name/help are valid");
        let sent_msgs = IntCounter::new("eventlog_transport_sent_msgs", "events sent")
            .expect("static metric name/help are valid");
        let errors_total = IntCounter::new("eventlog_transport_errors_total", "send failures")
            .expect("static metric name/help are valid");

        let registry = bundle.registry();
        registry
            .register(Box::new(sent_bytes.clone()))
            .expect("metric not already registered");
        registry
            .register(Box::new(sent_msgs.clone()))
            .expect("metric not already registered");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("metric not already registered");

        Self {
            sent_bytes,
            sent_msgs,
            errors_total,
        }
    }
}

/// Shared contract between the UDP and TCP transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a batch of already-formatted, delimiter-terminated event payloads.
    /// Any failure must leave the caller free to requeue the whole batch -
    /// there is no partial-batch success.
    async fn send(&self, events: &[bytes::Bytes]) -> Result<(), TransportError>;

    /// Release any retained socket. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Snapshot this transport's stats.
    fn get_stats(&self) -> Vec<StatsValue>;
}
