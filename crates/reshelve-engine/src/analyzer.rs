//! Stage-by-stage pipeline analysis.
//!
//! # Design
//! - Each stage takes the non-terminal records matching the strategy's target
//!   type out of the arena, hands them over, and reconciles the returned list by
//!   [`RecordId`]: known ids update, fresh ids add, missing ids are discarded and
//!   anything else is rejected.
//! - A stage claims ownership of a record when it changed the record and can
//!   execute the resulting operation; otherwise an earlier owner is kept.
//! - Analysis never mutates the file system.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reshelve_events::Event;
use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::record::{ChangeRecord, RecordId, RecordSet};
use crate::report::Reporter;
use crate::strategy::{AnalyzeContext, Strategy};

/// Reconciliation counts for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Strategy identifier.
    pub stage: String,
    /// Position in the chain.
    pub index: usize,
    /// Arena generation after the stage.
    pub generation: u32,
    /// Records handed to the strategy.
    pub consumed: usize,
    /// Records the strategy returned.
    pub produced: usize,
    /// Fresh records the strategy derived.
    pub added: usize,
    /// Handed-in records the strategy dropped.
    pub discarded: usize,
    /// Returned records with foreign or duplicate ids.
    pub rejected: usize,
    /// Wall-clock duration of the stage.
    pub elapsed: Duration,
}

/// Result of running the whole chain.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Final virtual state.
    pub records: RecordSet,
    /// One report per completed stage.
    pub stages: Vec<StageReport>,
    /// Whether cancellation stopped the chain early.
    pub cancelled: bool,
}

/// Runs captured strategies over a record arena.
#[derive(Clone, Default)]
pub struct Analyzer {
    reporter: Reporter,
    cancel: CancelFlag,
}

impl Analyzer {
    /// Analyzer publishing through `reporter` and observing `cancel`.
    #[must_use]
    pub const fn new(reporter: Reporter, cancel: CancelFlag) -> Self {
        Self { reporter, cancel }
    }

    /// Thread `records` through `strategies` in order.
    #[must_use]
    pub fn run(
        &self,
        records: RecordSet,
        strategies: &[Arc<dyn Strategy>],
        roots: &[PathBuf],
    ) -> AnalysisOutcome {
        let mut set = records;
        let mut stages = Vec::with_capacity(strategies.len());
        let mut cancelled = false;

        for (index, strategy) in strategies.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(stage = strategy.id(), "analysis cancelled before stage");
                cancelled = true;
                break;
            }
            let report = self.run_stage(&mut set, index, strategy.as_ref(), roots);
            stages.push(report);
        }
        if self.cancel.is_cancelled() {
            cancelled = true;
        }

        AnalysisOutcome {
            records: set,
            stages,
            cancelled,
        }
    }

    fn run_stage(
        &self,
        set: &mut RecordSet,
        index: usize,
        strategy: &dyn Strategy,
        roots: &[PathBuf],
    ) -> StageReport {
        let started = Instant::now();
        let target = strategy.target_type();
        let ids = set.ids().clone();
        let watermark = ids.watermark();
        let handed = set.take_where(|record| !record.is_terminal() && target.accepts(record.attrs.is_dir));
        let consumed = handed.len();
        let before: HashMap<RecordId, ChangeRecord> =
            handed.iter().map(|record| (record.id, record.clone())).collect();

        let ctx = AnalyzeContext {
            roots,
            reporter: &self.reporter,
            cancel: &self.cancel,
            ids: &ids,
            stage: strategy.id(),
        };
        let returned = strategy.analyze(handed, &ctx);
        let produced = returned.len();

        let mut seen: HashSet<RecordId> = HashSet::with_capacity(produced);
        let mut added = 0;
        let mut rejected = 0;
        for mut record in returned {
            if !seen.insert(record.id) {
                warn!(stage = strategy.id(), record_id = %record.id, "duplicate record id rejected");
                rejected += 1;
                continue;
            }
            let handles = strategy.operations().contains(&record.operation);
            if let Some(previous) = before.get(&record.id) {
                if handles && changed_in_stage(previous, &record) {
                    record.owner = Some(index);
                }
                set.insert(record);
            } else if record.id >= watermark && !set.contains(record.id) {
                if handles {
                    record.owner = Some(index);
                }
                added += 1;
                set.insert(record);
            } else {
                warn!(stage = strategy.id(), record_id = %record.id, "foreign record id rejected");
                rejected += 1;
            }
        }
        let discarded = before.keys().filter(|id| !seen.contains(id)).count();

        let generation = set.advance();
        self.reporter.publish(Event::StageCompleted {
            stage: strategy.id().to_string(),
            generation,
            consumed: consumed as u64,
            produced: produced as u64,
            discarded: discarded as u64,
        });
        if let Some(metrics) = self.reporter.metrics() {
            metrics.inc_analysis_stage(strategy.id());
        }
        let elapsed = started.elapsed();
        info!(
            stage = strategy.id(),
            generation,
            consumed,
            produced,
            added,
            discarded,
            rejected,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "analysis stage completed"
        );

        StageReport {
            stage: strategy.id().to_string(),
            index,
            generation,
            consumed,
            produced,
            added,
            discarded,
            rejected,
            elapsed,
        }
    }
}

fn changed_in_stage(previous: &ChangeRecord, current: &ChangeRecord) -> bool {
    previous.operation != current.operation
        || previous.new_path != current.new_path
        || previous.params != current.params
}
