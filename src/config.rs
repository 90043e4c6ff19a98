//! Configuration types accepted on handler construction (§6).
//!
//! These are plain `serde`-deserializable structs; the crate never reads a file
//! or an environment variable itself (that glue is the host's job, as the
//! original `log-collector` configuration loader reads TOML via `toml::from_str`
//! and hands the caller a typed struct) - it only defines the shape the host
//! populates, e.g. from a `[forwarder]` table in its own TOML configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which wire transport to use for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Stream socket, optionally wrapped in TLS.
    Tcp,
    /// Datagram socket, one event per datagram.
    Udp,
}

/// TLS material and verification policy for the TCP transport (§4.5).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS for the TCP transport.
    #[serde(default)]
    pub enable: bool,
    /// Verify the peer's certificate. When `false` but `ca_certs` is set, verification
    /// is relaxed to CERT_OPTIONAL rather than disabled outright (§4.5).
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Client-side private key.
    pub keyfile: Option<PathBuf>,
    /// Client-side certificate.
    pub certfile: Option<PathBuf>,
    /// CA bundle used to validate the server's certificate.
    pub ca_certs: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// Fixed-window rate limit for the worker's self-logging (§4.4.2). Absent means
/// rate limiting is disabled, matching the source's `ERROR_LOG_RATE_LIMIT = None`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum diagnostics per key per window.
    pub limit: u32,
    /// Window size in seconds.
    pub window_secs: u64,
}

/// The tunable constants of §4.4.1, overridable by the host but defaulted to the
/// values the source's `Constants` class ships with. Durations are expressed as
/// whole seconds on the wire (plain `serde` has no `Duration` impl) and converted
/// to [`Duration`] via the accessor methods below.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// How often the worker polls the ingress queue when idle, in seconds.
    pub queue_check_interval_secs: u64,
    /// Flush the buffer after this many seconds have passed since the last flush.
    pub flush_interval_secs: u64,
    /// Flush the buffer after this many un-flushed writes, whichever comes first.
    pub flush_count: u64,
    /// Maximum IDs updated within one SQL statement (SQLite's variable limit).
    pub database_event_chunk_size: usize,
    /// Socket connect/send timeout, in seconds.
    pub socket_timeout_secs: u64,
    /// Timeout for opening/locking the durable buffer, in seconds.
    pub database_timeout_secs: u64,
}

impl TuningConfig {
    /// How often the worker polls the ingress queue when idle.
    pub fn queue_check_interval(&self) -> Duration {
        Duration::from_secs(self.queue_check_interval_secs)
    }

    /// Flush interval threshold.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Socket connect/send timeout.
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// Durable buffer open/lock timeout.
    pub fn database_timeout(&self) -> Duration {
        Duration::from_secs(self.database_timeout_secs)
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            queue_check_interval_secs: 2,
            flush_interval_secs: 10,
            flush_count: 50,
            database_event_chunk_size: 750,
            socket_timeout_secs: 5,
            database_timeout_secs: 5,
        }
    }
}

/// Top-level configuration accepted when constructing a [`crate::handler::Handler`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Remote collector host.
    pub host: String,
    /// Remote collector port.
    pub port: u16,
    /// If set, selects the durable (SQLite-backed) buffer at this path; otherwise
    /// the volatile in-memory buffer is used.
    pub database_path: Option<PathBuf>,
    /// Which transport to ship events over.
    pub transport: TransportKind,
    /// TLS material/policy, only consulted for the TCP transport.
    pub tls: Option<TlsConfig>,
    /// If false, `emit` is a no-op and the worker is never started.
    pub enable: bool,
    /// Seconds after which buffered events are expired, regardless of state.
    pub event_ttl: Option<u64>,
    /// Per-event delimiter appended by the handler after formatting. Empty disables framing.
    pub terminator: Vec<u8>,
    /// Maximum buffered events before the overflow policy triggers discards.
    pub max_size: Option<u64>,
    /// Extra connect attempts the TCP transport makes after an initial failure,
    /// before giving up on that `send`. `None` means no retry (a single attempt).
    pub max_reconnect_attempts: Option<u32>,
    /// Rate limit applied to the worker's own diagnostic logging.
    pub rate_limit: Option<RateLimitConfig>,
    /// Overridable timing/sizing constants (§4.4.1).
    pub tuning: TuningConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            database_path: None,
            transport: TransportKind::Tcp,
            tls: None,
            enable: true,
            event_ttl: None,
            terminator: b"\n".to_vec(),
            max_size: None,
            max_reconnect_attempts: None,
            rate_limit: None,
            tuning: TuningConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_toml_with_defaults_for_missing_fields() {
        let toml_str = r#"
            host = "collector.internal"
            port = 5959
            transport = "tcp"
        "#;
        let cfg: HandlerConfig = toml::from_str(toml_str).expect("valid config");
        assert_eq!(cfg.host, "collector.internal");
        assert_eq!(cfg.port, 5959);
        assert!(cfg.enable);
        assert_eq!(cfg.terminator, b"\n".to_vec());
        assert_eq!(cfg.tuning.flush_count, 50);
    }
}
