//! Buffer (Cache) component (§4.3): durable or volatile storage with two-phase
//! semantics between the worker and the transport.

mod durable;
mod volatile;

pub use durable::DurableBuffer;
pub use volatile::VolatileBuffer;

use async_trait::async_trait;

use crate::error::BufferError;
use crate::event::Event;
use crate::stats::StatsValue;

/// Overflow hook invoked by `add_event` when the buffer is at `max_size`.
/// Errors from the hook itself are swallowed (§4.3).
pub type OverflowFn = Box<dyn Fn(&Event) + Send + Sync>;

/// Shared contract between the durable (SQLite) and volatile (in-memory)
/// buffer variants. Every operation is exclusively owned by the worker after
/// the first emit - there is no cross-task concurrency to guard against here,
/// only crash consistency.
#[async_trait]
pub trait Buffer: Send + Sync {
    /// Insert `event` in buffered state. If `max_size` is configured and the
    /// buffer is already at capacity, invoke the overflow hook and discard
    /// instead of inserting.
    async fn add_event(&self, event: Event) -> Result<(), BufferError>;

    /// Atomically read every buffered event, flip it to in-flight, and return
    /// it. A subsequent call with no intervening requeue returns nothing.
    async fn get_queued_events(&self) -> Result<Vec<Event>, BufferError>;

    /// Return the given in-flight events to buffered state. Events that no
    /// longer exist (already deleted, or never known) are tolerated and
    /// logged at warn rather than treated as an error.
    async fn requeue_queued_events(&self, events: &[Event]) -> Result<(), BufferError>;

    /// Remove every event currently in-flight. Never touches buffered events.
    async fn delete_queued_events(&self) -> Result<(), BufferError>;

    /// If a TTL is configured, remove every event older than `now - ttl`
    /// regardless of state, counting each as discarded. No-op otherwise.
    async fn expire_events(&self) -> Result<(), BufferError>;

    /// Snapshot this buffer's stats.
    fn get_stats(&self) -> Vec<StatsValue>;

    /// Current buffered-event count, as tracked by the stats gauge.
    fn buffered_count(&self) -> i64;
}
