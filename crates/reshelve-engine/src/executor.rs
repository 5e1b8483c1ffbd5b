//! Concurrent execution of analysed records against the file system.
//!
//! # Design
//! - Only changed PENDING records with an operation are scheduled; execution
//!   limits turn the excess into SKIPPED records before anything runs.
//! - Records are grouped by their longest scan root. Each root runs on its own
//!   thread with a dedicated rayon pool.
//! - Inside a root an explicit dependency graph orders the work: a directory
//!   source waits for every record whose source or target lies beneath it, and
//!   a record whose target is another record's source waits for that record.
//!   Records become ready in topological waves; a wave runs in parallel.
//! - Cancellation is observed before every dispatch. Work already running
//!   completes and nothing is rolled back.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use reshelve_events::Event;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::estimator::TaskEstimator;
use crate::record::{ChangeRecord, OperationKind, RecordSet, RecordStatus};
use crate::report::Reporter;
use crate::strategy::{ExecuteContext, ExecuteOutcome, Strategy, root_of};

pub use reshelve_config::ExecutionSettings;

const CANCELLED: &str = "cancelled";

/// Per-root execution counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RootSummary {
    /// Root the records were grouped under.
    pub root: PathBuf,
    /// Records applied successfully.
    pub success: usize,
    /// Records that failed.
    pub failed: usize,
    /// Records skipped at or before dispatch.
    pub skipped: usize,
}

/// Result of one execution run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    /// Records applied successfully.
    pub success: usize,
    /// Records that failed.
    pub failed: usize,
    /// Records skipped by limits, missing owners or cancellation.
    pub skipped: usize,
    /// Whether cancellation cut the run short.
    pub cancelled: bool,
    /// Counts per root, in root order.
    pub roots: Vec<RootSummary>,
    /// Every record, in id order, with its final status.
    pub records: Vec<ChangeRecord>,
}

enum TaskResult {
    Success,
    Failed(String),
    Skipped(String),
}

/// Applies analysed records with dependency-safe ordering.
#[derive(Clone, Default)]
pub struct Executor {
    reporter: Reporter,
    cancel: CancelFlag,
    settings: ExecutionSettings,
}

impl Executor {
    /// Executor publishing through `reporter`, observing `cancel`.
    #[must_use]
    pub const fn new(reporter: Reporter, cancel: CancelFlag, settings: ExecutionSettings) -> Self {
        Self {
            reporter,
            cancel,
            settings,
        }
    }

    /// Execute every actionable record of `records`.
    ///
    /// `strategies` must be the chain the records were analysed with; each
    /// record's `owner` indexes into it.
    #[must_use]
    pub fn run(
        &self,
        records: RecordSet,
        strategies: &[Arc<dyn Strategy>],
        roots: &[PathBuf],
    ) -> ExecutionSummary {
        let mut passive = Vec::new();
        let mut groups: BTreeMap<PathBuf, Vec<ChangeRecord>> = BTreeMap::new();
        let mut limited: BTreeMap<PathBuf, usize> = BTreeMap::new();
        let global_limit = self.settings.global_limit.filter(|limit| *limit > 0);
        let per_root_limit = self.settings.per_root_limit.filter(|limit| *limit > 0);
        let mut scheduled = 0usize;

        for mut record in records.into_records() {
            if !record.is_actionable() {
                passive.push(record);
                continue;
            }
            let root = group_root(roots, &record);
            let in_root = limited.entry(root.clone()).or_default();
            if global_limit.is_some_and(|limit| scheduled >= limit) {
                record.skip("global execution limit reached");
            } else if per_root_limit.is_some_and(|limit| *in_root >= limit) {
                record.skip("per-root execution limit reached");
            } else {
                scheduled += 1;
                *in_root += 1;
            }
            groups.entry(root).or_default().push(record);
        }
        info!(
            roots = groups.len(),
            scheduled,
            passive = passive.len(),
            "execution started"
        );

        let results: Vec<(RootSummary, Vec<ChangeRecord>)> = thread::scope(|scope| {
            let handles: Vec<_> = groups
                .into_iter()
                .map(|(root, group)| {
                    let fallback = group.clone();
                    let label = root.clone();
                    let handle = scope.spawn(move || self.run_root(root, group, strategies));
                    (label, fallback, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(root, fallback, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(root = %root.display(), "execution worker panicked");
                        self.abandon(root, fallback)
                    })
                })
                .collect()
        });

        let mut summary = ExecutionSummary {
            cancelled: self.cancel.is_cancelled(),
            ..ExecutionSummary::default()
        };
        let mut all = passive;
        for (root_summary, group) in results {
            summary.success += root_summary.success;
            summary.failed += root_summary.failed;
            summary.skipped += root_summary.skipped;
            summary.roots.push(root_summary);
            all.extend(group);
        }
        all.sort_by_key(|record| record.id);
        summary.records = all;

        self.reporter.publish(Event::ExecutionCompleted {
            success: summary.success as u64,
            failed: summary.failed as u64,
            skipped: summary.skipped as u64,
            cancelled: summary.cancelled,
        });
        info!(
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "execution completed"
        );
        summary
    }

    fn run_root(
        &self,
        root: PathBuf,
        mut records: Vec<ChangeRecord>,
        strategies: &[Arc<dyn Strategy>],
    ) -> (RootSummary, Vec<ChangeRecord>) {
        let root_label = root.display().to_string();
        let mut summary = RootSummary {
            root,
            ..RootSummary::default()
        };

        let mut runnable = Vec::new();
        for (index, record) in records.iter_mut().enumerate() {
            if record.status == RecordStatus::Skipped {
                self.publish_status(record);
                continue;
            }
            match executing_strategy(record, strategies) {
                Some(_) => runnable.push(index),
                None => {
                    let reason = format!("no strategy executes {}", record.operation.as_str());
                    record.skip(reason);
                    self.publish_status(record);
                }
            }
        }

        let estimator = TaskEstimator::new(runnable.len() as u64);
        let workers = self.pool_size(&records, &runnable, strategies);
        let pool = match ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("reshelve-exec-{index}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(root = %root_label, error = %err, "worker pool unavailable; running sequentially");
                None
            }
        };
        debug!(root = %root_label, workers, records = runnable.len(), "root execution started");

        let mut waiting = dependency_graph(&records, &runnable);
        while !waiting.is_empty() {
            if self.cancel.is_cancelled() {
                for index in waiting.keys() {
                    records[*index].skip(CANCELLED);
                    self.publish_status(&records[*index]);
                }
                waiting.clear();
                break;
            }
            let wave: Vec<usize> = waiting
                .iter()
                .filter(|(_, blockers)| blockers.is_empty())
                .map(|(index, _)| *index)
                .collect();
            if wave.is_empty() {
                for index in waiting.keys() {
                    records[*index].fail("dependency cycle between pending records");
                    self.publish_status(&records[*index]);
                }
                warn!(root = %root_label, records = waiting.len(), "dependency cycle left records unexecuted");
                waiting.clear();
                break;
            }

            let outcomes = self.run_wave(pool.as_ref(), &records, &wave, strategies, &estimator, &root_label);
            for (index, outcome) in outcomes {
                let record = &mut records[index];
                match outcome {
                    TaskResult::Success => record.status = RecordStatus::Success,
                    TaskResult::Failed(reason) => record.fail(reason),
                    TaskResult::Skipped(reason) => record.skip(reason),
                }
                if let Some(metrics) = self.reporter.metrics() {
                    metrics.inc_record_executed(record.operation.as_str(), record.status.as_str());
                }
                self.publish_status(record);
            }
            for index in &wave {
                waiting.remove(index);
            }
            for blockers in waiting.values_mut() {
                blockers.retain(|blocker| !wave.contains(blocker));
            }
        }

        for record in &records {
            match record.status {
                RecordStatus::Success => summary.success += 1,
                RecordStatus::Failed => summary.failed += 1,
                RecordStatus::Skipped => summary.skipped += 1,
                RecordStatus::Pending | RecordStatus::Running => {}
            }
        }
        info!(
            root = %root_label,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            "root execution completed"
        );
        (summary, records)
    }

    fn run_wave(
        &self,
        pool: Option<&ThreadPool>,
        records: &[ChangeRecord],
        wave: &[usize],
        strategies: &[Arc<dyn Strategy>],
        estimator: &TaskEstimator,
        root: &str,
    ) -> Vec<(usize, TaskResult)> {
        let task = |index: &usize| {
            let outcome = self.run_one(&records[*index], strategies, estimator, root);
            (*index, outcome)
        };
        match pool {
            Some(pool) => pool.install(|| wave.par_iter().map(task).collect()),
            None => wave.iter().map(task).collect(),
        }
    }

    fn run_one(
        &self,
        record: &ChangeRecord,
        strategies: &[Arc<dyn Strategy>],
        estimator: &TaskEstimator,
        root: &str,
    ) -> TaskResult {
        if self.cancel.is_cancelled() {
            return TaskResult::Skipped(CANCELLED.to_string());
        }
        let Some(strategy) = executing_strategy(record, strategies) else {
            return TaskResult::Skipped(format!("no strategy executes {}", record.operation.as_str()));
        };

        estimator.started();
        self.reporter.publish(Event::RecordStatusChanged {
            record_id: record.id.get(),
            status: RecordStatus::Running.as_str().to_string(),
            detail: None,
        });
        if let Some(metrics) = self.reporter.metrics() {
            metrics.record_started();
        }

        let outcome = if moves_path(record.operation) && record.source_path == record.new_path {
            debug!(record_id = %record.id, "source already matches target");
            TaskResult::Success
        } else {
            let ctx = ExecuteContext {
                cancel: &self.cancel,
                reporter: &self.reporter,
            };
            match strategy.execute(record, &ctx) {
                Ok(ExecuteOutcome::Applied) => TaskResult::Success,
                Ok(ExecuteOutcome::Skipped(reason)) => TaskResult::Skipped(reason),
                Err(err) => {
                    warn!(
                        record_id = %record.id,
                        strategy = strategy.id(),
                        operation = record.operation.as_str(),
                        path = %record.source_path.display(),
                        error = %err.detail(),
                        "record execution failed"
                    );
                    TaskResult::Failed(err.detail())
                }
            }
        };

        if let Some(metrics) = self.reporter.metrics() {
            metrics.record_finished();
        }
        estimator.finished(!matches!(outcome, TaskResult::Failed(_)));
        self.reporter.publish(Event::ExecutionProgress {
            root: root.to_string(),
            done: estimator.done(),
            total: estimator.total(),
            remaining_secs: estimator.remaining().map(|left| left.as_secs()),
        });
        outcome
    }

    fn pool_size(
        &self,
        records: &[ChangeRecord],
        runnable: &[usize],
        strategies: &[Arc<dyn Strategy>],
    ) -> usize {
        if let Some(workers) = self.settings.workers_per_root.filter(|workers| *workers > 0) {
            return workers;
        }
        runnable
            .iter()
            .filter_map(|index| executing_strategy(&records[*index], strategies))
            .filter_map(|strategy| strategy.preferred_workers())
            .filter(|workers| *workers > 0)
            .max()
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }

    fn abandon(&self, root: PathBuf, mut records: Vec<ChangeRecord>) -> (RootSummary, Vec<ChangeRecord>) {
        let mut summary = RootSummary {
            root,
            ..RootSummary::default()
        };
        for record in &mut records {
            if record.status == RecordStatus::Skipped {
                summary.skipped += 1;
                continue;
            }
            record.fail("execution worker panicked");
            self.publish_status(record);
            summary.failed += 1;
        }
        (summary, records)
    }

    fn publish_status(&self, record: &ChangeRecord) {
        self.reporter.publish(Event::RecordStatusChanged {
            record_id: record.id.get(),
            status: record.status.as_str().to_string(),
            detail: record.fail_reason.clone(),
        });
    }
}

/// Scan root a record executes under; records outside every root group by
/// their source directory.
fn group_root(roots: &[PathBuf], record: &ChangeRecord) -> PathBuf {
    root_of(roots, &record.source_path).map_or_else(
        || {
            record
                .source_path
                .parent()
                .map_or_else(PathBuf::new, Path::to_path_buf)
        },
        Path::to_path_buf,
    )
}

fn executing_strategy<'s>(
    record: &ChangeRecord,
    strategies: &'s [Arc<dyn Strategy>],
) -> Option<&'s Arc<dyn Strategy>> {
    record
        .owner
        .and_then(|owner| strategies.get(owner))
        .filter(|strategy| strategy.operations().contains(&record.operation))
}

/// Operations whose only effect is relocating the source.
const fn moves_path(operation: OperationKind) -> bool {
    matches!(
        operation,
        OperationKind::Rename | OperationKind::Move | OperationKind::FixType
    )
}

/// Blockers of each runnable record, keyed by record index.
fn dependency_graph(records: &[ChangeRecord], runnable: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let sources: HashMap<&Path, usize> = runnable
        .iter()
        .map(|index| (records[*index].source_path.as_path(), *index))
        .collect();
    let mut graph: BTreeMap<usize, Vec<usize>> =
        runnable.iter().map(|index| (*index, Vec::new())).collect();

    for &index in runnable {
        let record = &records[index];
        let mut blockers = Vec::new();
        if let Some(&holder) = sources.get(record.new_path.as_path())
            && holder != index
        {
            blockers.push(holder);
        }
        if record.attrs.is_dir {
            let dir = &record.source_path;
            blockers.extend(runnable.iter().copied().filter(|&other| {
                other != index && {
                    let candidate = &records[other];
                    (candidate.source_path != *dir && candidate.source_path.starts_with(dir))
                        || (candidate.new_path != *dir && candidate.new_path.starts_with(dir))
                }
            }));
        }
        blockers.sort_unstable();
        blockers.dedup();
        graph.insert(index, blockers);
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::error::EngineResult;
    use crate::record::{EntryAttrs, IdAllocator};
    use crate::scanner::ScanEntry;
    use crate::strategy::TargetType;
    use crate::strategy::cleanup::{CleanupConfig, CleanupMode, DeleteMode};
    use crate::strategy::rename::{RenameAction, RenameConfig, RenameRule};
    use crate::strategy::{AnalyzeContext, StrategyConfig};
    use reshelve_events::EventBus;
    use reshelve_test_support::TreeFixture;
    use std::sync::Mutex;

    type TestResult<T> = anyhow::Result<T>;

    fn scan_entry(path: PathBuf, is_dir: bool) -> ScanEntry {
        ScanEntry {
            path,
            depth: 1,
            attrs: EntryAttrs {
                is_dir,
                size: 1,
                modified: None,
            },
        }
    }

    /// Records the order in which paths were executed.
    struct Recorder {
        order: Mutex<Vec<PathBuf>>,
        fail_on: Option<PathBuf>,
    }

    impl Recorder {
        fn new(fail_on: Option<PathBuf>) -> Arc<Self> {
            Arc::new(Self {
                order: Mutex::new(Vec::new()),
                fail_on,
            })
        }

        fn order(&self) -> Vec<PathBuf> {
            self.order
                .lock()
                .map(|order| order.clone())
                .unwrap_or_default()
        }
    }

    impl Strategy for Recorder {
        fn id(&self) -> &'static str {
            "recorder"
        }

        fn target_type(&self) -> TargetType {
            TargetType::All
        }

        fn operations(&self) -> &'static [OperationKind] {
            &[OperationKind::Rename, OperationKind::Delete]
        }

        fn analyze(&self, records: Vec<ChangeRecord>, _ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
            records
        }

        fn execute(
            &self,
            record: &ChangeRecord,
            _ctx: &ExecuteContext<'_>,
        ) -> EngineResult<ExecuteOutcome> {
            if let Ok(mut order) = self.order.lock() {
                order.push(record.source_path.clone());
            }
            if self.fail_on.as_ref() == Some(&record.source_path) {
                return Err(crate::error::EngineError::TargetExists {
                    path: record.new_path.clone(),
                });
            }
            Ok(ExecuteOutcome::Applied)
        }
    }

    fn planned(ids: &IdAllocator, source: &str, target: &str, is_dir: bool) -> ChangeRecord {
        let mut record = ChangeRecord::new(
            ids.next_id(),
            PathBuf::from(source),
            EntryAttrs {
                is_dir,
                size: 0,
                modified: None,
            },
        );
        record.assign(OperationKind::Rename, PathBuf::from(target));
        record.owner = Some(0);
        record
    }

    #[test]
    fn children_run_before_their_renamed_directory() {
        let ids = IdAllocator::default();
        let recorder = Recorder::new(None);
        let strategies: Vec<Arc<dyn Strategy>> = vec![recorder.clone()];
        let set = RecordSet::from_records(vec![
            planned(&ids, "/m/Album", "/m/ALBUM", true),
            planned(&ids, "/m/Album/a.mp3", "/m/Album/A.mp3", false),
            planned(&ids, "/m/Album/Disc", "/m/Album/DISC", true),
            planned(&ids, "/m/Album/Disc/b.mp3", "/m/Album/Disc/B.mp3", false),
        ]);
        let executor = Executor::new(
            Reporter::silent(),
            CancelFlag::new(),
            ExecutionSettings {
                workers_per_root: Some(1),
                ..ExecutionSettings::default()
            },
        );
        let summary = executor.run(set, &strategies, &[PathBuf::from("/m")]);
        assert_eq!(summary.success, 4);

        let order = recorder.order();
        let position = |path: &str| order.iter().position(|entry| entry == Path::new(path));
        assert!(position("/m/Album/Disc/b.mp3") < position("/m/Album/Disc"));
        assert!(position("/m/Album/Disc") < position("/m/Album"));
        assert!(position("/m/Album/a.mp3") < position("/m/Album"));
    }

    #[test]
    fn vacating_record_runs_before_the_one_taking_its_place() {
        let ids = IdAllocator::default();
        let recorder = Recorder::new(None);
        let strategies: Vec<Arc<dyn Strategy>> = vec![recorder.clone()];
        let set = RecordSet::from_records(vec![
            planned(&ids, "/m/b.mp3", "/m/a.mp3", false),
            planned(&ids, "/m/a.mp3", "/m/c.mp3", false),
        ]);
        let summary = Executor::default().run(set, &strategies, &[PathBuf::from("/m")]);
        assert_eq!(summary.success, 2);
        assert_eq!(
            recorder.order(),
            vec![PathBuf::from("/m/a.mp3"), PathBuf::from("/m/b.mp3")]
        );
    }

    #[test]
    fn swaps_fail_as_a_cycle() {
        let ids = IdAllocator::default();
        let strategies: Vec<Arc<dyn Strategy>> = vec![Recorder::new(None)];
        let set = RecordSet::from_records(vec![
            planned(&ids, "/m/a.mp3", "/m/b.mp3", false),
            planned(&ids, "/m/b.mp3", "/m/a.mp3", false),
            planned(&ids, "/m/c.mp3", "/m/d.mp3", false),
        ]);
        let summary = Executor::default().run(set, &strategies, &[PathBuf::from("/m")]);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success, 1);
        assert!(
            summary.records[0]
                .fail_reason
                .as_deref()
                .is_some_and(|reason| reason.contains("cycle"))
        );
    }

    #[test]
    fn failures_stay_isolated() {
        let ids = IdAllocator::default();
        let strategies: Vec<Arc<dyn Strategy>> =
            vec![Recorder::new(Some(PathBuf::from("/m/b.mp3")))];
        let set = RecordSet::from_records(vec![
            planned(&ids, "/m/a.mp3", "/m/A.mp3", false),
            planned(&ids, "/m/b.mp3", "/m/B.mp3", false),
            planned(&ids, "/m/c.mp3", "/m/C.mp3", false),
        ]);
        let summary = Executor::default().run(set, &strategies, &[PathBuf::from("/m")]);
        assert_eq!((summary.success, summary.failed), (2, 1));
        assert_eq!(summary.records[1].status, RecordStatus::Failed);
        assert!(summary.records[1].fail_reason.is_some());
    }

    #[test]
    fn limits_owners_and_noop_targets() {
        let ids = IdAllocator::default();
        let recorder = Recorder::new(None);
        let strategies: Vec<Arc<dyn Strategy>> = vec![recorder.clone()];
        let mut orphan = planned(&ids, "/m/c.mp3", "/m/C.mp3", false);
        orphan.owner = None;
        let unchanged = planned(&ids, "/m/d.mp3", "/m/d.mp3", false);
        let set = RecordSet::from_records(vec![
            planned(&ids, "/m/a.mp3", "/m/A.mp3", false),
            planned(&ids, "/m/b.mp3", "/m/B.mp3", false),
            orphan,
            unchanged,
            planned(&ids, "/m/e.mp3", "/m/E.mp3", false),
        ]);
        let executor = Executor::new(
            Reporter::silent(),
            CancelFlag::new(),
            ExecutionSettings {
                per_root_limit: Some(4),
                ..ExecutionSettings::default()
            },
        );
        let summary = executor.run(set, &strategies, &[PathBuf::from("/m")]);
        assert_eq!(summary.success, 3);
        assert_eq!(summary.skipped, 2);
        // Ids follow construction order: orphan, unchanged, a, b, e.
        assert_eq!(summary.records[0].status, RecordStatus::Skipped);
        assert_eq!(summary.records[1].status, RecordStatus::Success);
        assert_eq!(summary.records[4].status, RecordStatus::Skipped);
        assert!(!recorder.order().contains(&PathBuf::from("/m/d.mp3")));
        assert_eq!(summary.roots.len(), 1);
    }

    #[test]
    fn cancelled_run_skips_everything() {
        let ids = IdAllocator::default();
        let strategies: Vec<Arc<dyn Strategy>> = vec![Recorder::new(None)];
        let cancel = CancelFlag::new();
        cancel.cancel();
        let bus = EventBus::new();
        let executor = Executor::new(
            Reporter::with_events(bus.clone()),
            cancel,
            ExecutionSettings::default(),
        );
        let set = RecordSet::from_records(vec![planned(&ids, "/m/a.mp3", "/m/A.mp3", false)]);
        let summary = executor.run(set, &strategies, &[PathBuf::from("/m")]);
        assert!(summary.cancelled);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.records[0].fail_reason.as_deref(), Some(CANCELLED));
        let kinds: Vec<_> = bus
            .backlog_since(0)
            .into_iter()
            .map(|envelope| envelope.event.kind())
            .collect();
        assert_eq!(kinds, vec!["record_status_changed", "execution_completed"]);
    }

    #[test]
    fn analysed_chain_applies_to_disk() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("A/song.mp3", b"one")?;
        tree.file("A (copy)/song.mp3", b"one")?;
        tree.file("lower.mp3", b"two")?;
        let root = tree.path().to_path_buf();
        let entries = vec![
            scan_entry(root.join("A"), true),
            scan_entry(root.join("A/song.mp3"), false),
            scan_entry(root.join("A (copy)"), true),
            scan_entry(root.join("A (copy)/song.mp3"), false),
            scan_entry(root.join("lower.mp3"), false),
        ];
        let strategies = vec![
            RenameConfig {
                rules: vec![RenameRule::new(RenameAction::ToUpper)],
                target: TargetType::FilesOnly,
                ..RenameConfig::default()
            }
            .capture(),
            CleanupConfig {
                mode: CleanupMode::DedupFolders,
                delete_mode: DeleteMode::Pseudo,
                ..CleanupConfig::default()
            }
            .capture(),
        ];
        let roots = vec![root.clone()];
        let outcome = Analyzer::default().run(RecordSet::from_scan(entries), &strategies, &roots);
        let summary = Executor::default().run(outcome.records, &strategies, &roots);

        assert_eq!(summary.failed, 0, "{:?}", summary.records);
        assert!(root.join("LOWER.mp3").exists());
        assert!(root.join("A/SONG.mp3").exists());
        assert!(!root.join("A (copy)").exists());
        assert!(root.join("Trash/A/A (copy)/SONG.mp3").exists());
        Ok(())
    }
}
