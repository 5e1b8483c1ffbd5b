//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes counters for the three pipeline phases plus emitted events.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the workspace.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    scan_entries_total: IntCounter,
    scan_errors_total: IntCounter,
    analysis_stages_total: IntCounterVec,
    records_executed_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    records_in_flight: IntGauge,
}

/// Snapshot of selected gauges and counters for end-of-run reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Entries retained by scans.
    pub scan_entries_total: u64,
    /// Entries skipped because they could not be read.
    pub scan_errors_total: u64,
    /// Records currently being executed.
    pub records_in_flight: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let scan_entries_total = IntCounter::with_opts(Opts::new(
            "scan_entries_total",
            "Filesystem entries retained by scans",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "scan_entries_total",
            source,
        })?;
        let scan_errors_total = IntCounter::with_opts(Opts::new(
            "scan_errors_total",
            "Filesystem entries skipped because they could not be read",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "scan_errors_total",
            source,
        })?;
        let analysis_stages_total = IntCounterVec::new(
            Opts::new("analysis_stages_total", "Analysis stages run by strategy"),
            &["strategy"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "analysis_stages_total",
            source,
        })?;
        let records_executed_total = IntCounterVec::new(
            Opts::new(
                "records_executed_total",
                "Records finalised by the executor by operation and status",
            ),
            &["operation", "status"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "records_executed_total",
            source,
        })?;
        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Events emitted by type"),
            &["type"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "events_emitted_total",
            source,
        })?;
        let records_in_flight = IntGauge::with_opts(Opts::new(
            "records_in_flight",
            "Records currently being executed",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "records_in_flight",
            source,
        })?;

        register(&registry, "scan_entries_total", scan_entries_total.clone())?;
        register(&registry, "scan_errors_total", scan_errors_total.clone())?;
        register(
            &registry,
            "analysis_stages_total",
            analysis_stages_total.clone(),
        )?;
        register(
            &registry,
            "records_executed_total",
            records_executed_total.clone(),
        )?;
        register(&registry, "events_emitted_total", events_emitted_total.clone())?;
        register(&registry, "records_in_flight", records_in_flight.clone())?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                scan_entries_total,
                scan_errors_total,
                analysis_stages_total,
                records_executed_total,
                events_emitted_total,
                records_in_flight,
            }),
        })
    }

    /// Add retained scan entries.
    pub fn add_scan_entries(&self, count: u64) {
        self.inner.scan_entries_total.inc_by(count);
    }

    /// Increment the unreadable-entry counter.
    pub fn inc_scan_error(&self) {
        self.inner.scan_errors_total.inc();
    }

    /// Increment the stage counter for a strategy.
    pub fn inc_analysis_stage(&self, strategy: &str) {
        self.inner
            .analysis_stages_total
            .with_label_values(&[strategy])
            .inc();
    }

    /// Increment the executed-record counter for an operation/status pair.
    pub fn inc_record_executed(&self, operation: &str, status: &str) {
        self.inner
            .records_executed_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Mark one record as dispatched.
    pub fn record_started(&self) {
        self.inner.records_in_flight.inc();
    }

    /// Mark one dispatched record as finished.
    pub fn record_finished(&self) {
        self.inner.records_in_flight.dec();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the scan counters and in-flight gauge.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scan_entries_total: self.inner.scan_entries_total.get(),
            scan_errors_total: self.inner.scan_errors_total.get(),
            records_in_flight: self.inner.records_in_flight.get(),
        }
    }
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> Result<()>
where
    C: prometheus::core::Collector + 'static,
{
    registry
        .register(Box::new(collector))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
