//! Asynchronous, durable log-forwarding client for embedding inside a host
//! application (§1).
//!
//! The core pipeline is `Handler::emit` -> ingress queue -> worker ->
//! [`buffer::Buffer`] -> (on flush) [`transport::Transport`]. Everything
//! upstream of `emit` (the host's logging framework, its record type) and the
//! loading of [`config::HandlerConfig`] from a file or environment are the
//! host's responsibility; this crate only accepts an already-populated
//! configuration struct.

pub mod buffer;
pub mod config;
mod diagnostics;
pub mod error;
pub mod event;
mod formatter;
pub mod handler;
pub mod rate_limit;
pub mod stats;
pub mod transport;
mod worker;

pub use buffer::Buffer;
pub use config::{HandlerConfig, RateLimitConfig, TlsConfig, TransportKind, TuningConfig};
pub use error::{BufferError, HandlerError, TransportError};
pub use event::{Event, EventId, EventState};
pub use formatter::{Formatter, LogRecord, LogstashFormatter, RECORD_FIELD_SKIP_LIST};
pub use handler::Handler;
pub use stats::{StatsBundle, StatsValue};
pub use transport::Transport;
