//! Handler facade (§4.2): the surface a host logging framework talks to.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{instrument, warn};

use crate::buffer::{Buffer, DurableBuffer, VolatileBuffer};
use crate::config::{HandlerConfig, TransportKind};
use crate::formatter::{Formatter, LogRecord, LogstashFormatter};
use crate::stats::StatsValue;
use crate::transport::{TcpTransport, Transport, UdpTransport};
use crate::worker::{self, WorkerHandle};

/// Accepts formatted records from a host logger, enqueues them, and owns the
/// lazily-started worker for the lifetime of the handler.
///
/// Per §4.2, "one worker per handler identity" is expressed here as one
/// worker per `Handler` instance rather than a process-wide registry -
/// sharing a single worker across multiple `Handler`s is left to the host,
/// which can simply clone an `Arc<Handler>`.
pub struct Handler {
    config: Arc<HandlerConfig>,
    formatter: Arc<dyn Formatter>,
    buffer: Arc<dyn Buffer>,
    transport: Arc<dyn Transport>,
    worker: Mutex<Option<WorkerHandle>>,
    error_reporter: Arc<dyn Fn(&str) + Send + Sync>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("enabled", &self.config.enable)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Build a handler from `config`, wiring up the durable or volatile
    /// buffer (per `config.database_path`) and the TCP or UDP transport (per
    /// `config.transport`). The worker is not started until the first `emit`.
    pub fn new(config: HandlerConfig) -> Result<Self, crate::error::BufferError> {
        Self::with_formatter(
            config,
            Arc::new(LogstashFormatter::new("eventlog-forwarder", Vec::new())),
        )
    }

    /// Build a handler with an explicit formatter collaborator (§6), instead
    /// of the default Logstash-JSON one.
    pub fn with_formatter(
        config: HandlerConfig,
        formatter: Arc<dyn Formatter>,
    ) -> Result<Self, crate::error::BufferError> {
        let max_size = config.max_size;
        let event_ttl = config.event_ttl;

        let buffer: Arc<dyn Buffer> = match &config.database_path {
            Some(path) => Arc::new(DurableBuffer::open(
                path,
                max_size,
                event_ttl,
                None,
                config.tuning.database_event_chunk_size,
                config.tuning.database_timeout(),
            )?),
            None => Arc::new(VolatileBuffer::new(max_size, event_ttl, None)),
        };

        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Tcp => Arc::new(TcpTransport::new(
                config.host.clone(),
                config.port,
                config.tuning.socket_timeout(),
                config.tls.clone(),
                config.max_reconnect_attempts,
            )),
            TransportKind::Udp => Arc::new(UdpTransport::new(config.host.clone(), config.port)),
        };

        Ok(Self::with_components(config, formatter, buffer, transport))
    }

    /// Build a handler from explicit buffer and transport instances, bypassing
    /// the path/transport-kind-based selection in [`Handler::new`]. Per §6,
    /// both `buffer` and `transport` are accepted as explicit instances that
    /// override the configuration-derived defaults - this is also the seam
    /// tests use to substitute a mock transport.
    pub fn with_components(
        config: HandlerConfig,
        formatter: Arc<dyn Formatter>,
        buffer: Arc<dyn Buffer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            formatter,
            buffer,
            transport,
            worker: Mutex::new(None),
            error_reporter: Arc::new(|message| warn!(error = message, "emit: failed to format record")),
        }
    }

    /// Install a callback invoked on formatting failures (§6's `handleError`),
    /// in place of the default rate-limited `tracing::warn!`.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.error_reporter = reporter;
        self
    }

    fn ensure_worker(&self) {
        let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(worker::spawn(
                self.config.clone(),
                self.buffer.clone(),
                self.transport.clone(),
            ));
        }
    }

    /// Format `record`, append the configured terminator, and enqueue it for
    /// delivery. Lazily starts the worker on first call. A no-op if the
    /// handler is disabled. Never propagates an error to the caller -
    /// formatting failures are reported via `handle_format_error` instead.
    #[instrument(skip_all, level = "debug")]
    pub fn emit(&self, record: &LogRecord) {
        if !self.config.enable {
            return;
        }

        let mut bytes = match self.formatter.format(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                (self.error_reporter)(&e);
                return;
            }
        };
        bytes.extend_from_slice(&self.config.terminator);

        self.ensure_worker();
        let guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.as_ref() {
            if handle.sender.send(Bytes::from(bytes)).is_err() {
                warn!("emit: worker task has already exited, event dropped");
            }
        }
    }

    /// Request an immediate flush on the worker's next idle cycle. A no-op if
    /// the worker hasn't started yet (nothing buffered to flush).
    #[instrument(skip_all, level = "debug")]
    pub fn flush(&self) {
        let guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.as_ref() {
            handle.signals.request_flush();
        }
    }

    /// Idempotent shutdown: signal the worker, join it, then release the
    /// transport. Safe to call multiple times or before the worker has
    /// started.
    #[instrument(skip_all, level = "debug")]
    pub async fn close(&self) {
        let handle = {
            let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(mut handle) = handle {
            handle.shutdown().await;
        }
        if let Err(e) = self.transport.close().await {
            crate::diagnostics::safe_log(&format!("close: failed to release transport: {e}"));
        }
    }

    /// Aggregate stats from the worker, transport, and buffer.
    pub fn get_stats(&self) -> Vec<StatsValue> {
        let mut values = Vec::new();
        if let Ok(guard) = self.worker.lock() {
            if let Some(handle) = guard.as_ref() {
                values.extend(handle.stats.snapshot());
            }
        }
        values.extend(self.transport.get_stats());
        values.extend(self.buffer.get_stats());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> HandlerConfig {
        HandlerConfig {
            enable: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn disabled_handler_emit_is_a_no_op() {
        let handler = Handler::new(disabled_config()).expect("handler builds");
        handler.emit(&LogRecord::new("INFO", "should be dropped"));
        // No worker should have been started.
        assert!(handler.worker.lock().unwrap().is_none());
        handler.close().await;
    }

    #[tokio::test]
    async fn close_before_any_emit_is_safe() {
        let handler = Handler::new(HandlerConfig {
            enable: true,
            ..Default::default()
        })
        .expect("handler builds");
        handler.close().await;
    }
}
