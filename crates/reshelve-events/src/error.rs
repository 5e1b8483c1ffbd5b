//! Delivery failures on the event bus.

use thiserror::Error;

use crate::payloads::{Event, EventId};

/// Why an event published by a scan, analysis or execution run did not reach
/// its observers. The event itself is still kept in the replay ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventBusError {
    /// Live subscribers existed but every receiver had closed before the send.
    #[error("event {event_id} ({event_kind}) was not delivered to {subscribers} subscriber(s)")]
    Undelivered {
        /// Identifier assigned to the event.
        event_id: EventId,
        /// [`Event::kind`] of the payload.
        event_kind: &'static str,
        /// Receivers counted just before the send.
        subscribers: usize,
    },
}

impl EventBusError {
    /// Failure for `event` published under `event_id`.
    #[must_use]
    pub const fn undelivered(event_id: EventId, event: &Event, subscribers: usize) -> Self {
        Self::Undelivered {
            event_id,
            event_kind: event.kind(),
            subscribers,
        }
    }

    /// Identifier of the lost event; replay consumers can resume from it.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::Undelivered { event_id, .. } => *event_id,
        }
    }

    /// Kind of the lost event, used as a log field.
    #[must_use]
    pub const fn event_kind(&self) -> &'static str {
        match self {
            Self::Undelivered { event_kind, .. } => event_kind,
        }
    }
}

/// Result of publishing on the event bus.
pub type EventBusResult<T> = Result<T, EventBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undelivered_completion_names_its_kind() {
        let event = Event::ExecutionCompleted {
            success: 3,
            failed: 1,
            skipped: 0,
            cancelled: false,
        };
        let err = EventBusError::undelivered(17, &event, 2);

        assert_eq!(err.event_id(), 17);
        assert_eq!(err.event_kind(), "execution_completed");
        assert_eq!(
            err.to_string(),
            "event 17 (execution_completed) was not delivered to 2 subscriber(s)"
        );
    }

    #[test]
    fn status_changes_keep_their_kind_label() {
        let event = Event::RecordStatusChanged {
            record_id: 9,
            status: "failed".into(),
            detail: Some("target exists".into()),
        };
        let err = EventBusError::undelivered(4, &event, 1);
        assert!(matches!(
            err,
            EventBusError::Undelivered {
                event_kind: "record_status_changed",
                subscribers: 1,
                ..
            }
        ));
    }
}
