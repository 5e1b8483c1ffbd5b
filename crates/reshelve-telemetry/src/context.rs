//! Context propagation helpers for process and run spans.
//!
//! # Design
//! - Provides an application-level span guard so every log line carries the mode and build.
//! - Run spans tag all work belonging to one pipeline invocation.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", mode = %mode, build_sha = %build_sha()),
        ));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Build a span describing one pipeline run.
#[must_use]
pub fn run_span(run_id: &str, command: &str) -> Span {
    tracing::info_span!("run", run_id = %run_id, command = %command)
}
