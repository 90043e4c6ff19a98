//! Stats registry (component A): named counters and gauges accumulated per
//! subsystem, read by snapshot. Counters are monotonically non-decreasing;
//! gauges may rise and fall.
//!
//! Re-expressed from the source's `LogStats` inheritance chain
//! (`LogStats` -> `DatabaseStats`/`WorkerStats`) as composition: each subsystem
//! builds its own [`StatsBundle`] naming only the values it owns.

use prometheus::{IntCounter, IntGauge, Registry};

/// A single (name, value) pair as read from a snapshot. Counters and gauges are
/// indistinguishable once snapshotted - the spec only requires the pair.
pub type StatsValue = (String, i64);

/// Per-subsystem collection of named counters/gauges, backed by a private
/// `prometheus::Registry` rather than a process-wide `lazy_static!` one, since
/// stats here are scoped to one buffer/worker/transport instance, not the process.
#[derive(Debug)]
pub struct StatsBundle {
    registry: Registry,
    events: IntCounter,
    discarded: IntCounter,
    buffered: IntGauge,
    sent: IntCounter,
}

impl StatsBundle {
    /// Build the four counters/gauges every subsystem (buffer-db, buffer-mem, worker,
    /// transport) exposes, named with the subsystem's stats prefix (e.g. `eventlog_bufdb_`).
    pub fn new(prefix: &str) -> Self {
        let registry = Registry::new();
        let events = IntCounter::new(format!("{prefix}events_total"), "events received")
            .expect("static metric name/help are valid");
        let discarded =
            IntCounter::new(format!("{prefix}discarded_total"), "events discarded")
                .expect("static metric name/help are valid");
        let buffered = IntGauge::new(
            format!("{prefix}buffered_events"),
            "events currently buffered",
        )
        .expect("static metric name/help are valid");
        let sent = IntCounter::new(
            format!("{prefix}sent_total"),
            "events sent to upstream collector",
        )
        .expect("static metric name/help are valid");

        registry
            .register(Box::new(events.clone()))
            .expect("metric not already registered");
        registry
            .register(Box::new(discarded.clone()))
            .expect("metric not already registered");
        registry
            .register(Box::new(buffered.clone()))
            .expect("metric not already registered");
        registry
            .register(Box::new(sent.clone()))
            .expect("metric not already registered");

        Self {
            registry,
            events,
            discarded,
            buffered,
            sent,
        }
    }

    /// The private registry, so a subsystem can register additional metrics of its own
    /// (e.g. the durable buffer's `file_bytes`/`lock_errors_total`).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record `n` new events accepted via `add_event`.
    pub fn event(&self, n: u64) {
        self.events.inc_by(n);
    }

    /// Record `n` events successfully handed off to the transport.
    pub fn send(&self, n: u64) {
        self.sent.inc_by(n);
    }

    /// Record `n` events discarded (overflow or TTL expiry).
    pub fn discard(&self, n: u64) {
        self.discarded.inc_by(n);
    }

    /// Increase the buffered gauge by `n` (event inserted or requeued).
    pub fn buffer(&self, n: i64) {
        self.buffered.add(n);
    }

    /// Decrease the buffered gauge by `n`, never below zero (event fetched or deleted).
    pub fn unbuffer(&self, n: i64) {
        let current = self.buffered.get();
        self.buffered.sub(n.min(current));
    }

    /// Current value of the buffered-events gauge.
    pub fn buffered_count(&self) -> i64 {
        self.buffered.get()
    }

    /// Snapshot every metric owned by this bundle's registry as `(name, value)` pairs.
    pub fn snapshot(&self) -> Vec<StatsValue> {
        self.registry
            .gather()
            .into_iter()
            .map(|family| {
                let value = family
                    .get_metric()
                    .first()
                    .map(|m| {
                        if m.has_counter() {
                            m.get_counter().value() as i64
                        } else {
                            m.get_gauge().value() as i64
                        }
                    })
                    .unwrap_or(0);
                (family.get_name().to_string(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_events_sent_and_discarded_independently() {
        let stats = StatsBundle::new("eventlog_bufmem_");
        stats.event(3);
        stats.buffer(3);
        stats.unbuffer(1);
        stats.discard(1);
        stats.send(2);

        let snapshot = stats.snapshot();
        let get = |name: &str| {
            snapshot
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
                .unwrap_or(-1)
        };

        assert_eq!(get("eventlog_bufmem_events_total"), 3);
        assert_eq!(get("eventlog_bufmem_discarded_total"), 1);
        assert_eq!(get("eventlog_bufmem_buffered_events"), 2);
        assert_eq!(get("eventlog_bufmem_sent_total"), 2);
    }

    #[test]
    fn unbuffer_never_goes_negative() {
        let stats = StatsBundle::new("eventlog_worker_");
        stats.buffer(1);
        stats.unbuffer(5);
        assert_eq!(stats.buffered_count(), 0);
    }
}
