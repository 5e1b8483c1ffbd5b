//! Fan-out of engine events to the bus and the metrics registry.
//!
//! # Design
//! - Both sinks are optional so library callers and tests can run silently.
//! - Publishing never fails the caller; bus errors are logged by the bus.

use reshelve_events::{Event, EventBus, LogLevel};
use reshelve_telemetry::Metrics;

/// Handle used by every engine component to surface progress and counters.
#[derive(Clone, Default)]
pub struct Reporter {
    events: Option<EventBus>,
    metrics: Option<Metrics>,
}

impl Reporter {
    /// Reporter that forwards to the given bus and metrics registry.
    #[must_use]
    pub const fn new(events: EventBus, metrics: Metrics) -> Self {
        Self {
            events: Some(events),
            metrics: Some(metrics),
        }
    }

    /// Reporter that only publishes events.
    #[must_use]
    pub const fn with_events(events: EventBus) -> Self {
        Self {
            events: Some(events),
            metrics: None,
        }
    }

    /// Reporter that drops everything.
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            events: None,
            metrics: None,
        }
    }

    /// Publish an event and count it.
    pub fn publish(&self, event: Event) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_event(event.kind());
        }
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Publish a log event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.publish(Event::log(level, message));
    }

    /// Metrics registry, when attached.
    #[must_use]
    pub const fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn publish_reaches_bus_and_counters() -> TestResult<()> {
        let bus = EventBus::with_capacity(8);
        let metrics = Metrics::new()?;
        let reporter = Reporter::new(bus.clone(), metrics.clone());

        reporter.log(LogLevel::Warn, "unreadable entry");
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].event.kind(), "log");
        assert!(metrics.render()?.contains("events_emitted_total{type=\"log\"} 1"));
        Ok(())
    }

    #[test]
    fn silent_reporter_drops_events() {
        let reporter = Reporter::silent();
        reporter.log(LogLevel::Info, "nothing listens");
        assert!(reporter.metrics().is_none());
    }
}
