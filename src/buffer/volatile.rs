//! In-memory volatile buffer (§4.3.2). Same contract as the durable variant,
//! with no persistence: everything is lost on process restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::error::BufferError;
use crate::event::{Event, EventId, EventState};
use crate::stats::{StatsBundle, StatsValue};

use super::{Buffer, OverflowFn};

/// In-memory implementation of [`Buffer`], keyed by a freshly minted random
/// 128-bit tag per event rather than a monotonic row id.
pub struct VolatileBuffer {
    events: Mutex<HashMap<u128, Event>>,
    max_size: Option<u64>,
    event_ttl: Option<u64>,
    overflow_fn: Option<OverflowFn>,
    stats: StatsBundle,
}

impl std::fmt::Debug for VolatileBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileBuffer")
            .field("max_size", &self.max_size)
            .field("event_ttl", &self.event_ttl)
            .finish_non_exhaustive()
    }
}

impl VolatileBuffer {
    /// Build an empty in-memory buffer.
    pub fn new(max_size: Option<u64>, event_ttl: Option<u64>, overflow_fn: Option<OverflowFn>) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            max_size,
            event_ttl,
            overflow_fn,
            stats: StatsBundle::new("eventlog_bufmem_"),
        }
    }

    fn next_tag() -> u128 {
        rand::random::<u128>()
    }
}

#[async_trait]
impl Buffer for VolatileBuffer {
    #[instrument(skip(self, event), level = "debug")]
    async fn add_event(&self, mut event: Event) -> Result<(), BufferError> {
        let mut map = self.events.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(max_size) = self.max_size {
            if map.len() as u64 >= max_size {
                self.stats.discard(1);
                if let Some(overflow_fn) = &self.overflow_fn {
                    overflow_fn(&event);
                }
                return Ok(());
            }
        }

        let tag = Self::next_tag();
        event.id = Some(EventId::Tag(tag));
        event.pending_delete = EventState::Buffered;
        map.insert(tag, event);

        self.stats.event(1);
        self.stats.buffer(1);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_queued_events(&self) -> Result<Vec<Event>, BufferError> {
        let mut map = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for event in map.values_mut() {
            if event.pending_delete == EventState::Buffered {
                event.pending_delete = EventState::InFlight;
                out.push(event.clone());
            }
        }
        self.stats.unbuffer(out.len() as i64);
        Ok(out)
    }

    #[instrument(skip(self, events), level = "debug")]
    async fn requeue_queued_events(&self, events: &[Event]) -> Result<(), BufferError> {
        let mut map = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut requeued = 0i64;
        for event in events {
            let Some(EventId::Tag(tag)) = event.id else {
                continue;
            };
            match map.get_mut(&tag) {
                Some(stored) if stored.pending_delete == EventState::InFlight => {
                    stored.pending_delete = EventState::Buffered;
                    requeued += 1;
                }
                _ => {
                    warn!(tag = %EventId::Tag(tag), "requeue_queued_events: unknown or already-absent event id");
                }
            }
        }
        self.stats.buffer(requeued);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_queued_events(&self) -> Result<(), BufferError> {
        let mut map = self.events.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, event| event.pending_delete != EventState::InFlight);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn expire_events(&self) -> Result<(), BufferError> {
        let Some(ttl) = self.event_ttl else {
            return Ok(());
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl as i64);
        let mut map = self.events.lock().unwrap_or_else(|e| e.into_inner());

        let mut expired = 0i64;
        let mut buffered_expiring = 0i64;
        map.retain(|_, event| {
            if event.entry_date < cutoff {
                expired += 1;
                if event.pending_delete == EventState::Buffered {
                    buffered_expiring += 1;
                }
                false
            } else {
                true
            }
        });

        if expired > 0 {
            self.stats.discard(expired);
            self.stats.unbuffer(buffered_expiring);
        }
        Ok(())
    }

    fn get_stats(&self) -> Vec<StatsValue> {
        self.stats.snapshot()
    }

    fn buffered_count(&self) -> i64 {
        self.stats.buffered_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> VolatileBuffer {
        VolatileBuffer::new(None, None, None)
    }

    #[tokio::test]
    async fn add_then_get_returns_one_matching_event() {
        let buffer = fresh();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        let events = buffer.get_queued_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].payload[..], b"a");
    }

    #[tokio::test]
    async fn second_get_without_requeue_is_empty() {
        let buffer = fresh();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        buffer.get_queued_events().await.unwrap();
        assert!(buffer.get_queued_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requeue_then_get_returns_same_payload() {
        let buffer = fresh();
        buffer.add_event(Event::new(&b"a"[..])).await.unwrap();
        let events = buffer.get_queued_events().await.unwrap();
        buffer.requeue_queued_events(&events).await.unwrap();
        let again = buffer.get_queued_events().await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(&again[0].payload[..], b"a");
    }

    #[tokio::test]
    async fn requeue_tolerates_unknown_ids() {
        let buffer = fresh();
        let mut phantom = Event::new(&b"ghost"[..]);
        phantom.id = Some(EventId::Tag(0xDEAD_BEEF));
        phantom.pending_delete = EventState::InFlight;
        // should not error even though this id was never inserted
        buffer.requeue_queued_events(&[phantom]).await.unwrap();
    }

    #[tokio::test]
    async fn overflow_discards_past_max_size() {
        let buffer = VolatileBuffer::new(Some(2), None, None);
        for i in 0..5u8 {
            buffer.add_event(Event::new(vec![i])).await.unwrap();
        }
        assert_eq!(buffer.buffered_count(), 2);
        let stats = buffer.get_stats();
        let discarded = stats
            .iter()
            .find(|(n, _)| n == "eventlog_bufmem_discarded_total")
            .unwrap()
            .1;
        assert_eq!(discarded, 3);
    }
}
