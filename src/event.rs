//! The buffer's data model: an opaque, already-formatted log event plus the
//! two-phase state machine that governs its lifetime inside a [`crate::buffer::Buffer`].

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Buffer-unique identifier for an event.
///
/// The durable buffer uses the SQLite `AUTOINCREMENT` row id; the volatile buffer
/// mints a 128-bit random tag on insert. Both fit in this newtype so the rest of
/// the pipeline never has to know which variant it's talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventId {
    /// Monotonic row id assigned by the durable (SQLite-backed) buffer.
    Row(i64),
    /// Opaque unique tag assigned by the volatile (in-memory) buffer.
    Tag(u128),
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventId::Row(id) => write!(f, "row:{id}"),
            EventId::Tag(id) => write!(f, "tag:{id:032x}"),
        }
    }
}

/// The two live states an event occupies inside a buffer (§3, invariant 1).
///
/// A third, implicit state - *absent* - isn't represented here: an absent event
/// simply isn't present in the buffer's storage any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// Waiting to be picked up by the next `get_queued_events` call.
    Buffered,
    /// Handed to the worker for delivery; leaves this state only via delete or requeue.
    InFlight,
}

/// One already-formatted log record plus the metadata a buffer assigns on insertion.
#[derive(Debug, Clone)]
pub struct Event {
    /// Buffer-unique identifier. `None` until the event has been inserted.
    pub id: Option<EventId>,
    /// The formatted bytes, delimiter already appended by the host-side handler.
    pub payload: Bytes,
    /// Two-phase delivery state.
    pub pending_delete: EventState,
    /// Wall-clock insertion time, used only for TTL expiry.
    pub entry_date: DateTime<Utc>,
}

impl Event {
    /// Construct a fresh, not-yet-inserted buffered event from raw bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            payload: payload.into(),
            pending_delete: EventState::Buffered,
            entry_date: Utc::now(),
        }
    }
}
