//! Event payload types carried between the engine and its observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event published on the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Severity attached to a log line forwarded to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Informational message.
    Info,
    /// Something was skipped or degraded but the run continues.
    Warn,
    /// A record or entry failed.
    Error,
}

impl LogLevel {
    /// Render the level as its canonical string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Typed events surfaced by scans, analysis and execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A human-readable log line.
    Log {
        /// Severity of the message.
        level: LogLevel,
        /// Message text.
        message: String,
    },
    /// Periodic scan progress for one root.
    ScanProgress {
        /// Root being scanned.
        root: String,
        /// Entries visited so far.
        visited: u64,
    },
    /// A scan finished (fully, truncated or cancelled).
    ScanCompleted {
        /// Root that was scanned.
        root: String,
        /// Entries retained in the report.
        entries: u64,
        /// Whether a resource limit cut the walk short.
        truncated: bool,
        /// Whether the walk stopped because of cancellation.
        cancelled: bool,
    },
    /// Progress of one analysis stage.
    AnalysisProgress {
        /// Strategy identifier running the stage.
        stage: String,
        /// Records processed so far.
        processed: u64,
        /// Records handed to the stage.
        total: u64,
    },
    /// One analysis stage finished and produced a new record generation.
    StageCompleted {
        /// Strategy identifier that ran the stage.
        stage: String,
        /// Generation number after the stage.
        generation: u32,
        /// Records handed to the strategy.
        consumed: u64,
        /// Records returned by the strategy.
        produced: u64,
        /// Records the strategy discarded.
        discarded: u64,
    },
    /// A record moved to a new lifecycle status.
    RecordStatusChanged {
        /// Stable record identifier.
        record_id: u64,
        /// New status (`running`, `success`, `failed`, `skipped`).
        status: String,
        /// Failure or skip reason when available.
        detail: Option<String>,
    },
    /// Execution progress for one root.
    ExecutionProgress {
        /// Root the counts refer to.
        root: String,
        /// Records finished (success or failure).
        done: u64,
        /// Records scheduled for the root.
        total: u64,
        /// Estimated remaining seconds, when known.
        remaining_secs: Option<u64>,
    },
    /// Execution finished; aggregate counts are final.
    ExecutionCompleted {
        /// Records that succeeded.
        success: u64,
        /// Records that failed.
        failed: u64,
        /// Records that were skipped.
        skipped: u64,
        /// Whether the run was cancelled before all work was dispatched.
        cancelled: bool,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::ScanProgress { .. } => "scan_progress",
            Self::ScanCompleted { .. } => "scan_completed",
            Self::AnalysisProgress { .. } => "analysis_progress",
            Self::StageCompleted { .. } => "stage_completed",
            Self::RecordStatusChanged { .. } => "record_status_changed",
            Self::ExecutionProgress { .. } => "execution_progress",
            Self::ExecutionCompleted { .. } => "execution_completed",
        }
    }

    /// Convenience constructor for log events.
    #[must_use]
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}
