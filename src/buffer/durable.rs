//! SQLite-backed durable buffer (§4.3.1).

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::IntCounter;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;
use tracing::{instrument, warn};

use crate::error::BufferError;
use crate::event::{Event, EventId, EventState};
use crate::stats::{StatsBundle, StatsValue};

use super::{Buffer, OverflowFn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS event (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_text BLOB NOT NULL,
    pending_delete INTEGER NOT NULL DEFAULT 0,
    entry_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_event_pending_delete ON event(pending_delete);
CREATE INDEX IF NOT EXISTS idx_event_entry_date ON event(entry_date);
";

/// Durable, SQLite-backed implementation of [`Buffer`]. A single writer at a
/// time is enforced by opening every operation in an exclusive transaction; the
/// pool exists to amortize connection setup, not to allow concurrent writers.
pub struct DurableBuffer {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
    max_size: Option<u64>,
    event_ttl: Option<u64>,
    overflow_fn: Option<OverflowFn>,
    stats: StatsBundle,
    file_bytes: Mutex<i64>,
    lock_errors_total: IntCounter,
    /// Maximum bound parameters per SQL statement (§4.3.1), overridable
    /// through `HandlerConfig::tuning.database_event_chunk_size`.
    chunk_size: usize,
}

impl std::fmt::Debug for DurableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBuffer")
            .field("path", &self.path)
            .field("max_size", &self.max_size)
            .field("event_ttl", &self.event_ttl)
            .finish_non_exhaustive()
    }
}

impl DurableBuffer {
    /// Open (creating if absent) the SQLite database at `path`, running crash
    /// recovery (revert in-flight rows to buffered) before returning.
    ///
    /// `chunk_size` bounds how many IDs a single bulk `UPDATE` touches (§4.3.1,
    /// `HandlerConfig::tuning.database_event_chunk_size`); `connection_timeout`
    /// bounds how long acquiring a pooled connection may block
    /// (`HandlerConfig::tuning.database_timeout`).
    #[instrument(skip(overflow_fn), level = "debug")]
    pub fn open(
        path: impl AsRef<Path>,
        max_size: Option<u64>,
        event_ttl: Option<u64>,
        overflow_fn: Option<OverflowFn>,
        chunk_size: usize,
        connection_timeout: Duration,
    ) -> Result<Self, BufferError> {
        let path = path.as_ref().to_path_buf();
        let manager = SqliteConnectionManager::file(&path);
        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(connection_timeout)
            .build(manager)
            .map_err(BufferError::Pool)?;

        {
            let conn = pool.get().map_err(BufferError::Pool)?;
            conn.execute_batch(SCHEMA)?;
            // Crash recovery: any row left in-flight from a prior process was
            // never observed to complete delivery. Revert to buffered (§4.3.1).
            conn.execute("UPDATE event SET pending_delete = 0 WHERE pending_delete = 1", [])?;
        }

        let stats = StatsBundle::new("eventlog_bufdb_");
        let lock_errors_total = IntCounter::new("eventlog_bufdb_lock_errors_total", "lock contention count")
            .expect("static metric name/help are valid");
        stats
            .registry()
            .register(Box::new(lock_errors_total.clone()))
            .expect("metric not already registered");

        let buffer = Self {
            pool,
            path,
            max_size,
            event_ttl,
            overflow_fn,
            stats,
            file_bytes: Mutex::new(0),
            lock_errors_total,
            chunk_size,
        };
        buffer.refresh_buffered_gauge()?;
        Ok(buffer)
    }

    fn refresh_buffered_gauge(&self) -> Result<(), BufferError> {
        let conn = self.pool.get().map_err(BufferError::Pool)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM event WHERE pending_delete = 0",
            [],
            |row| row.get(0),
        )?;
        self.stats.buffer(count);
        Ok(())
    }

    fn refresh_file_bytes(&self) {
        // Failure to stat is swallowed per §4.3.1, to avoid recursive error
        // logging from inside the stats path.
        if let Ok(metadata) = std::fs::metadata(&self.path) {
            if let Ok(mut guard) = self.file_bytes.lock() {
                *guard = metadata.len() as i64;
            }
        }
    }

    fn map_err(&self, err: rusqlite::Error) -> BufferError {
        if BufferError::is_locked(&err) {
            self.lock_errors_total.inc();
            BufferError::Locked
        } else {
            BufferError::Storage(err)
        }
    }
}

#[async_trait]
impl Buffer for DurableBuffer {
    #[instrument(skip(self, event), level = "debug")]
    async fn add_event(&self, event: Event) -> Result<(), BufferError> {
        if let Some(max_size) = self.max_size {
            if self.stats.buffered_count() as u64 >= max_size {
                self.stats.discard(1);
                if let Some(overflow_fn) = &self.overflow_fn {
                    overflow_fn(&event);
                }
                return Ok(());
            }
        }

        let conn = self.pool.get().map_err(BufferError::Pool)?;
        conn.execute(
            "INSERT INTO event (event_text, pending_delete, entry_date) VALUES (?1, 0, ?2)",
            rusqlite::params![
                event.payload.as_ref(),
                event.entry_date.to_rfc3339(),
            ],
        )
        .map_err(|e| self.map_err(e))?;

        self.stats.event(1);
        self.stats.buffer(1);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_queued_events(&self) -> Result<Vec<Event>, BufferError> {
        let mut conn = self.pool.get().map_err(BufferError::Pool)?;
        let tx = conn.transaction().map_err(|e| self.map_err(e))?;

        let mut rows: Vec<(i64, Vec<u8>, String)> = {
            let mut stmt = tx
                .prepare("SELECT event_id, event_text, entry_date FROM event WHERE pending_delete = 0")
                .map_err(|e| self.map_err(e))?;
            let iter = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(|e| self.map_err(e))?;
            let mut collected = Vec::new();
            for row in iter {
                collected.push(row.map_err(|e| self.map_err(e))?);
            }
            collected
        };

        if !rows.is_empty() {
            let ids: Vec<i64> = rows.iter().map(|(id, _, _)| *id).collect();
            for chunk in ids.chunks(self.chunk_size) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "UPDATE event SET pending_delete = 1 WHERE event_id IN ({placeholders})"
                );
                tx.execute(&sql, params_from_iter(chunk.iter()))
                    .map_err(|e| self.map_err(e))?;
            }
        }
        tx.commit().map_err(|e| self.map_err(e))?;

        let events = rows
            .drain(..)
            .map(|(id, text, entry_date)| Event {
                id: Some(EventId::Row(id)),
                payload: text.into(),
                pending_delete: EventState::InFlight,
                entry_date: entry_date
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect::<Vec<_>>();

        self.stats.unbuffer(events.len() as i64);
        Ok(events)
    }

    #[instrument(skip(self, events), level = "debug")]
    async fn requeue_queued_events(&self, events: &[Event]) -> Result<(), BufferError> {
        let ids: Vec<i64> = events
            .iter()
            .filter_map(|e| match e.id {
                Some(EventId::Row(id)) => Some(id),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let conn = self.pool.get().map_err(BufferError::Pool)?;
        let mut requeued = 0i64;
        for chunk in ids.chunks(self.chunk_size) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "UPDATE event SET pending_delete = 0 WHERE event_id IN ({placeholders}) AND pending_delete = 1"
            );
            let changed = conn
                .execute(&sql, params_from_iter(chunk.iter()))
                .map_err(|e| self.map_err(e))?;
            requeued += changed as i64;
        }

        if requeued < ids.len() as i64 {
            warn!(
                requested = ids.len(),
                requeued, "requeue_queued_events: some event ids no longer present"
            );
        }
        self.stats.buffer(requeued);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_queued_events(&self) -> Result<(), BufferError> {
        let conn = self.pool.get().map_err(BufferError::Pool)?;
        conn.execute("DELETE FROM event WHERE pending_delete = 1", [])
            .map_err(|e| self.map_err(e))?;
        self.refresh_file_bytes();
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn expire_events(&self) -> Result<(), BufferError> {
        let Some(ttl) = self.event_ttl else {
            return Ok(());
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl as i64);
        let conn = self.pool.get().map_err(BufferError::Pool)?;

        let buffered_expiring: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM event WHERE pending_delete = 0 AND entry_date < ?1",
                [cutoff.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| self.map_err(e))?;

        let deleted = conn
            .execute("DELETE FROM event WHERE entry_date < ?1", [cutoff.to_rfc3339()])
            .map_err(|e| self.map_err(e))?;

        if deleted > 0 {
            self.stats.discard(deleted as i64);
            self.stats.unbuffer(buffered_expiring);
        }
        Ok(())
    }

    fn get_stats(&self) -> Vec<StatsValue> {
        let mut values = self.stats.snapshot();
        values.push((
            "eventlog_bufdb_file_bytes".to_string(),
            *self.file_bytes.lock().unwrap_or_else(|e| e.into_inner()),
        ));
        values
    }

    fn buffered_count(&self) -> i64 {
        self.stats.buffered_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_tmp() -> (NamedTempFile, DurableBuffer) {
        let file = NamedTempFile::new().expect("create temp db file");
        let buffer = DurableBuffer::open(file.path(), None, None, None, 750, Duration::from_secs(5))
            .expect("open buffer");
        (file, buffer)
    }

    #[tokio::test]
    async fn add_then_get_returns_one_matching_event() {
        let (_file, buffer) = open_tmp();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        let events = buffer.get_queued_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].payload[..], b"a");
    }

    #[tokio::test]
    async fn second_get_without_requeue_is_empty() {
        let (_file, buffer) = open_tmp();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        buffer.get_queued_events().await.unwrap();
        let second = buffer.get_queued_events().await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn add_get_delete_leaves_buffer_empty() {
        let (_file, buffer) = open_tmp();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        let events = buffer.get_queued_events().await.unwrap();
        buffer.delete_queued_events().await.unwrap();
        assert_eq!(buffer.buffered_count(), 0);
        let again = buffer.get_queued_events().await.unwrap();
        assert!(again.is_empty());
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn requeue_returns_event_to_buffered() {
        let (_file, buffer) = open_tmp();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        let events = buffer.get_queued_events().await.unwrap();
        buffer.requeue_queued_events(&events).await.unwrap();
        let again = buffer.get_queued_events().await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(&again[0].payload[..], b"a");
    }

    #[tokio::test]
    async fn delete_never_touches_buffered_events() {
        let (_file, buffer) = open_tmp();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        buffer.delete_queued_events().await.unwrap();
        let events = buffer.get_queued_events().await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn overflow_discards_past_max_size() {
        let file = NamedTempFile::new().unwrap();
        let buffer =
            DurableBuffer::open(file.path(), Some(2), None, None, 750, Duration::from_secs(5)).unwrap();
        for i in 0..5u8 {
            buffer.add_event(Event::new(vec![i])).await.unwrap();
        }
        assert_eq!(buffer.buffered_count(), 2);
        let stats = buffer.get_stats();
        let discarded = stats
            .iter()
            .find(|(n, _)| n == "eventlog_bufdb_discarded_total")
            .unwrap()
            .1;
        assert_eq!(discarded, 3);
    }

    #[tokio::test]
    async fn crash_recovery_reverts_in_flight_to_buffered() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        {
            let buffer =
                DurableBuffer::open(&path, None, None, None, 750, Duration::from_secs(5)).unwrap();
            for i in 0..5u8 {
                buffer.add_event(Event::new(vec![i])).await.unwrap();
            }
            buffer.get_queued_events().await.unwrap();
            // simulated crash: buffer dropped without delete_queued_events
        }

        let reopened = DurableBuffer::open(&path, None, None, None, 750, Duration::from_secs(5)).unwrap();
        let events = reopened.get_queued_events().await.unwrap();
        assert_eq!(events.len(), 5);
    }
}
