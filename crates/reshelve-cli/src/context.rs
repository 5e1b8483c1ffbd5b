//! Per-invocation wiring: profile, logging, event bus, metrics and cancellation.
//!
//! # Design
//! - The profile is loaded before logging so its `logging` section can pick the
//!   level and format; `--log-level` and `RUST_LOG` still win.
//! - Engine work is blocking and runs on the blocking pool through [`Session`],
//!   a `Send` snapshot of everything the engine needs.
//! - Ctrl-C only raises the cancel flag; in-flight records finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use reshelve_config::{EngineProfile, ValidatedProfile, load_profile};
use reshelve_engine::{
    AnalysisOutcome, Analyzer, CancelFlag, ExecutionSummary, Executor, Pipeline, RecordSet,
    Reporter, ScanOptions, ScanReport, Scanner, Strategy,
};
use reshelve_events::EventBus;
use reshelve_telemetry::{
    GlobalContextGuard, LogFormat, LoggingConfig, Metrics, init_logging, run_span,
};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{Span, debug, info, warn};

use crate::cli::GlobalArgs;
use crate::error::{CliError, CliResult};
use crate::output;

const BUILD_SHA: &str = match option_env!("RESHELVE_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Load and validate the profile named on the command line.
pub(crate) fn load_profile_arg(path: &Path) -> CliResult<ValidatedProfile> {
    load_profile(path).map_err(CliError::from)
}

/// State shared by the handlers of one command.
pub(crate) struct RunContext {
    pub(crate) session: Session,
    pub(crate) bus: EventBus,
    pub(crate) metrics: Option<Metrics>,
    pub(crate) span: Span,
    quiet: bool,
    _app: GlobalContextGuard,
}

impl RunContext {
    /// Load the profile, install logging and build the engine session.
    pub(crate) fn prepare(global: &GlobalArgs, run_id: &str, command: &str) -> CliResult<Self> {
        let path = global.profile.as_deref().ok_or_else(|| {
            CliError::validation("a profile is required (--profile or RESHELVE_PROFILE)")
        })?;
        let validated = load_profile_arg(path)?;
        let mut profile = validated.profile;
        if !global.roots.is_empty() {
            profile.roots = absolute_roots(&global.roots)?;
        }

        let level = global
            .log_level
            .clone()
            .unwrap_or_else(|| profile.logging.level.clone());
        let logging = LoggingConfig {
            level: &level,
            format: LogFormat::from_name(profile.logging.format.as_str()),
            build_sha: BUILD_SHA,
        };
        if let Err(err) = init_logging(&logging) {
            eprintln!("warning: logging unavailable: {err:#}");
        }
        let app = GlobalContextGuard::new("cli");
        let span = run_span(run_id, command);
        for warning in &validated.warnings {
            warn!(profile = %path.display(), warning = %warning, "profile adjusted");
        }

        let metrics = match Metrics::new() {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                warn!(error = %err, "metrics registry unavailable");
                None
            }
        };
        let bus = EventBus::new();
        let reporter = metrics.as_ref().map_or_else(
            || Reporter::with_events(bus.clone()),
            |metrics| Reporter::new(bus.clone(), metrics.clone()),
        );
        info!(
            roots = profile.roots.len(),
            strategies = profile.pipeline.len(),
            "run prepared"
        );

        Ok(Self {
            session: Session {
                profile,
                reporter,
                cancel: CancelFlag::new(),
            },
            bus,
            metrics,
            span,
            quiet: global.quiet,
            _app: app,
        })
    }

    /// Raise the cancel flag on Ctrl-C.
    pub(crate) fn watch_interrupt(&self) -> JoinHandle<()> {
        let cancel = self.session.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing in-flight work");
                cancel.cancel();
            }
        })
    }

    /// Print progress events on stderr until aborted.
    pub(crate) fn stream_progress(&self) -> Option<JoinHandle<()>> {
        if self.quiet {
            return None;
        }
        let mut stream = self.bus.subscribe(None);
        Some(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(envelope) => {
                        if let Some(line) = output::progress_line(&envelope.event) {
                            eprintln!("{line}");
                        }
                    }
                    Err(err) => debug!(error = %err, "progress stream lagged"),
                }
            }
        }))
    }

    /// Run blocking engine work with progress and interrupt handling attached.
    pub(crate) async fn run_blocking<T, F>(&self, work: F) -> CliResult<T>
    where
        F: FnOnce(Session) -> CliResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let interrupt = self.watch_interrupt();
        let progress = self.stream_progress();
        let session = self.session.clone();
        let span = self.span.clone();
        let result = tokio::task::spawn_blocking(move || span.in_scope(|| work(session))).await;
        interrupt.abort();
        if let Some(progress) = progress {
            tokio::task::yield_now().await;
            progress.abort();
        }
        result.map_err(|err| CliError::failure(anyhow::anyhow!("engine task failed: {err}")))?
    }
}

/// Everything the engine needs for one run; cheap to clone and `Send`.
#[derive(Clone)]
pub(crate) struct Session {
    pub(crate) profile: EngineProfile,
    pub(crate) reporter: Reporter,
    pub(crate) cancel: CancelFlag,
}

impl Session {
    /// Walk every root and build the initial record arena.
    pub(crate) fn scan(&self) -> CliResult<(RecordSet, Vec<ScanReport>)> {
        let scanner = Scanner::new(self.reporter.clone(), self.cancel.clone());
        let options = ScanOptions::from_settings(&self.profile.scan);
        let mut reports = Vec::with_capacity(self.profile.roots.len());
        for root in &self.profile.roots {
            let report = scanner
                .scan(root, &options)
                .map_err(|err| anyhow::anyhow!(err.detail()))
                .with_context(|| format!("scan of {} failed", root.display()))
                .map_err(CliError::failure)?;
            reports.push(report);
        }
        let entries = reports
            .iter()
            .flat_map(|report| report.entries.iter().cloned())
            .collect::<Vec<_>>();
        Ok((RecordSet::from_scan(entries), reports))
    }

    /// Strategies captured from the profile's chain.
    pub(crate) fn strategies(&self) -> Vec<Arc<dyn Strategy>> {
        Pipeline::from_entries(&self.profile.pipeline).capture()
    }

    /// Run the chain over `records`.
    pub(crate) fn analyze(
        &self,
        records: RecordSet,
        strategies: &[Arc<dyn Strategy>],
    ) -> AnalysisOutcome {
        Analyzer::new(self.reporter.clone(), self.cancel.clone()).run(
            records,
            strategies,
            &self.profile.roots,
        )
    }

    /// Apply the analysed records.
    pub(crate) fn execute(
        &self,
        records: RecordSet,
        strategies: &[Arc<dyn Strategy>],
    ) -> ExecutionSummary {
        Executor::new(
            self.reporter.clone(),
            self.cancel.clone(),
            self.profile.execution.clone(),
        )
        .run(records, strategies, &self.profile.roots)
    }
}

fn absolute_roots(roots: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    roots
        .iter()
        .map(|root| {
            std::path::absolute(root).map_err(|err| {
                CliError::validation(format!("invalid root {}: {err}", root.display()))
            })
        })
        .collect()
}
