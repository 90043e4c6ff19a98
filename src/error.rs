//! Error types shared across the buffer, transport and worker boundaries.

use thiserror::Error;

/// Errors surfaced by a [`crate::buffer::Buffer`] implementation.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Transient lock contention on the durable store. Never surfaced to the host;
    /// the worker swallows this at the buffer boundary and retries later.
    #[error("buffer is locked")]
    Locked,

    /// Any other storage failure from the embedded SQL engine.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Failure to acquire a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Failure performing filesystem I/O against the database path (e.g. stat for file size).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BufferError {
    /// True when the underlying SQLite error is a lock/busy condition.
    pub(crate) fn is_locked(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
        )
    }
}

/// Errors surfaced by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failure to establish or write to the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure establishing or negotiating the TLS session.
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The configured TLS material (keyfile/certfile/ca_certs) could not be loaded.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

/// Errors that can occur inside the handler's public surface.
///
/// Per the spec, none of these ever propagate out of `emit`, `flush`, or `close` -
/// they exist so internal plumbing has a typed `Result` to work with, and so tests
/// can assert on failure modes directly.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The record could not be formatted into bytes.
    #[error("format error: {0}")]
    Format(String),

    /// The buffer reported an error unrelated to lock contention.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The transport reported a send failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
