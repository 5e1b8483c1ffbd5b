//! Event bus routing helpers.

use crate::error::{EventBusError, EventBusResult};
use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// Stream wrapper used by subscribers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Shared event bus built on top of `tokio::broadcast`.
///
/// Publishing is synchronous, so worker threads outside any runtime can emit
/// events directly.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<VecDeque<EventEnvelope>>>,
    replay_capacity: usize,
    next_id: Arc<Mutex<EventId>>,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let replay_capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay_capacity))),
            replay_capacity,
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Subscribe to the bus, replaying anything newer than `last_event_id`.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        let mut rx = self.sender.subscribe();
        if let Some(last) = last_event_id {
            self.replay(last, &mut rx);
        }
        BroadcastStream::new(rx)
    }

    /// Publish a new event to all subscribers and the replay ring.
    ///
    /// Having no live subscribers is not an error; the event still lands in
    /// the replay ring.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Undelivered`] when live subscribers exist but the
    /// broadcast channel rejected the envelope.
    pub fn publish(&self, event: Event) -> EventBusResult<EventId> {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next = next.saturating_add(1);
        drop(next);

        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut replay = self.lock_replay();
            if replay.len() == self.replay_capacity {
                let _ = replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }

        let subscribers = self.sender.receiver_count();
        if subscribers == 0 {
            return Ok(id);
        }
        self.sender
            .send(envelope)
            .map(|_| id)
            .map_err(|rejected| EventBusError::undelivered(id, &rejected.0.event, subscribers))
    }

    /// Publish an event, logging instead of propagating delivery failures.
    pub fn emit(&self, event: Event) {
        if let Err(error) = self.publish(event) {
            warn!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                error = %error,
                "failed to publish event"
            );
        }
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().back().map(|env| env.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        let replay = self.lock_replay();
        replay.iter().filter(|env| env.id > id).cloned().collect()
    }

    fn replay(&self, last_event_id: EventId, rx: &mut Receiver<EventEnvelope>) {
        let past = self.backlog_since(last_event_id);
        for env in past {
            let _ = rx.try_recv();
            if self.sender.send(env).is_err() {
                break;
            }
        }
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::LogLevel;
    use tokio_stream::StreamExt;

    #[test]
    fn publish_without_subscribers_fills_replay() -> EventBusResult<()> {
        let bus = EventBus::with_capacity(4);
        let first = bus.publish(Event::log(LogLevel::Info, "scan started"))?;
        let second = bus.publish(Event::ScanProgress {
            root: "/music".into(),
            visited: 1_000,
        })?;

        assert_eq!(bus.last_event_id(), Some(second));
        let backlog = bus.backlog_since(first);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, second);
        Ok(())
    }

    #[test]
    fn replay_ring_drops_oldest_entries() -> EventBusResult<()> {
        let bus = EventBus::with_capacity(2);
        for visited in 0..5 {
            bus.publish(Event::ScanProgress {
                root: "/music".into(),
                visited,
            })?;
        }
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].id, 4);
        Ok(())
    }

    #[tokio::test]
    async fn subscribe_streams_published_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        let id = bus.publish(Event::RecordStatusChanged {
            record_id: 3,
            status: "running".into(),
            detail: None,
        })?;
        let envelope = stream.next().await.ok_or("stream closed")??;
        assert_eq!(envelope.id, id);
        assert!(matches!(
            envelope.event,
            Event::RecordStatusChanged { record_id: 3, .. }
        ));
        Ok(())
    }
}
