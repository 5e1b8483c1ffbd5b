//! Strategy contract and the built-in strategies.
//!
//! # Design
//! - A [`StrategyConfig`] holds user options and persists to a flat property set;
//!   [`StrategyConfig::capture`] snapshots it into an immutable [`Strategy`] for one run.
//! - `analyze` only computes virtual state. It may read the file system (magic
//!   bytes, folder listings, cue sheets) but never mutates it.
//! - `execute` performs the mutation for a single record.

pub mod cleanup;
pub mod convert;
pub mod cue;
pub mod cue_rename;
pub mod extract;
pub mod fix_type;
pub mod location;
pub mod relocate;
pub mod rename;
pub mod tag;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use reshelve_config::PropertySet;
use reshelve_events::Event;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancel::CancelFlag;
use crate::error::{EngineError, EngineResult};
use crate::record::{ChangeRecord, IdAllocator, OperationKind, RecordId};
use crate::report::Reporter;

const PROGRESS_INTERVAL: u64 = 50;

/// Parameter prefix for tags written by the encoder.
pub(crate) const META_PREFIX: &str = "meta_";

/// Entry kinds a strategy wants to see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Files only.
    #[default]
    FilesOnly,
    /// Directories only.
    FoldersOnly,
    /// Files and directories.
    All,
}

impl TargetType {
    /// Canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FilesOnly => "files_only",
            Self::FoldersOnly => "folders_only",
            Self::All => "all",
        }
    }

    /// Whether an entry of the given kind is handed to the strategy.
    #[must_use]
    pub const fn accepts(self, is_dir: bool) -> bool {
        match self {
            Self::FilesOnly => !is_dir,
            Self::FoldersOnly => is_dir,
            Self::All => true,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "files_only" | "files" => Ok(Self::FilesOnly),
            "folders_only" | "folders" | "dirs" => Ok(Self::FoldersOnly),
            "all" => Ok(Self::All),
            other => Err(EngineError::invalid("target", "unknown_target_type", other)),
        }
    }
}

/// What `execute` did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The mutation was performed.
    Applied,
    /// Nothing was done; the reason is recorded on the record.
    Skipped(String),
}

/// Shared state handed to `analyze`.
#[derive(Clone, Copy)]
pub struct AnalyzeContext<'a> {
    /// Scan roots, used to resolve relative destinations.
    pub roots: &'a [PathBuf],
    /// Event and metric sink.
    pub reporter: &'a Reporter,
    /// Cancellation flag.
    pub cancel: &'a CancelFlag,
    /// Allocator for derived records.
    pub ids: &'a IdAllocator,
    /// Identifier of the running strategy.
    pub stage: &'a str,
}

impl AnalyzeContext<'_> {
    /// Publish stage progress.
    pub fn progress(&self, processed: u64, total: u64) {
        self.reporter.publish(Event::AnalysisProgress {
            stage: self.stage.to_string(),
            processed,
            total,
        });
    }

    /// Longest scan root containing `path`.
    #[must_use]
    pub fn root_of(&self, path: &Path) -> Option<&Path> {
        root_of(self.roots, path)
    }
}

/// Longest root in `roots` that contains `path`.
#[must_use]
pub fn root_of<'r>(roots: &'r [PathBuf], path: &Path) -> Option<&'r Path> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .map(PathBuf::as_path)
}

/// Shared state handed to `execute`.
#[derive(Clone, Copy)]
pub struct ExecuteContext<'a> {
    /// Cancellation flag, observed by long-running operations.
    pub cancel: &'a CancelFlag,
    /// Event and metric sink.
    pub reporter: &'a Reporter,
}

/// Captured, immutable strategy used for one run.
pub trait Strategy: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> &'static str;

    /// Entry kinds the strategy is handed.
    fn target_type(&self) -> TargetType;

    /// Operations this strategy can execute.
    fn operations(&self) -> &'static [OperationKind];

    /// Preferred worker count for execution, if the strategy has one.
    fn preferred_workers(&self) -> Option<usize> {
        None
    }

    /// Compute the virtual end state for `records`.
    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord>;

    /// Apply one record.
    ///
    /// # Errors
    ///
    /// Returns an error when the mutation fails; the executor records it as FAILED.
    fn execute(
        &self,
        record: &ChangeRecord,
        ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome>;
}

/// User-facing strategy configuration.
pub trait StrategyConfig: Send + Sync {
    /// Identifier matching the captured strategy.
    fn id(&self) -> &'static str;

    /// Snapshot the configuration for a run.
    fn capture(&self) -> Arc<dyn Strategy>;

    /// Persist the configuration.
    fn to_properties(&self) -> PropertySet;
}

/// Apply `transform` to every record on rayon, reporting progress.
///
/// A record whose transformation errors is passed through unchanged.
pub(crate) fn map_records<F>(
    records: Vec<ChangeRecord>,
    ctx: &AnalyzeContext<'_>,
    transform: F,
) -> Vec<ChangeRecord>
where
    F: Fn(&mut ChangeRecord) -> EngineResult<()> + Sync,
{
    let total = records.len() as u64;
    let processed = AtomicU64::new(0);
    let mapped = records
        .into_par_iter()
        .map(|record| {
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if done.is_multiple_of(PROGRESS_INTERVAL) {
                ctx.progress(done, total);
            }
            if ctx.cancel.is_cancelled() || record.is_terminal() {
                return record;
            }
            let mut updated = record.clone();
            match transform(&mut updated) {
                Ok(()) => updated,
                Err(err) => {
                    warn!(
                        stage = ctx.stage,
                        record_id = %record.id,
                        path = %record.source_path.display(),
                        error = %err.detail(),
                        "strategy left record unchanged"
                    );
                    record
                }
            }
        })
        .collect();
    ctx.progress(total, total);
    mapped
}

/// Skip records retargeted in this stage whose target is claimed twice, or is
/// occupied on disk by an entry that is not moving away (unless `overwrite`).
pub(crate) fn reject_collisions(
    records: &mut [ChangeRecord],
    before: &HashMap<RecordId, PathBuf>,
    overwrite: bool,
) {
    let mut claims: HashMap<PathBuf, usize> = HashMap::new();
    // Stationary entries are covered by the on-disk occupancy check.
    for record in records
        .iter()
        .filter(|record| !record.is_terminal() && record.new_path != record.source_path)
    {
        *claims.entry(record.new_path.clone()).or_default() += 1;
    }
    let vacated: HashSet<PathBuf> = records
        .iter()
        .filter(|record| record.new_path != record.source_path)
        .map(|record| record.source_path.clone())
        .collect();

    for record in records.iter_mut() {
        let retargeted = before
            .get(&record.id)
            .is_some_and(|previous| *previous != record.new_path);
        if !retargeted || record.is_terminal() {
            continue;
        }
        let duplicated = claims.get(&record.new_path).copied().unwrap_or_default() > 1;
        let case_only = record.new_path.to_string_lossy().to_lowercase()
            == record.source_path.to_string_lossy().to_lowercase();
        let occupied = !overwrite
            && !case_only
            && record.new_path.exists()
            && !vacated.contains(&record.new_path);
        if duplicated {
            let reason = format!("target {} is claimed by another entry", record.new_path.display());
            record.skip(reason);
        } else if occupied {
            let reason = format!("target {} already exists", record.new_path.display());
            record.skip(reason);
        }
    }
}

/// Snapshot of each record's virtual path, keyed by id.
pub(crate) fn virtual_paths(records: &[ChangeRecord]) -> HashMap<RecordId, PathBuf> {
    records
        .iter()
        .map(|record| (record.id, record.new_path.clone()))
        .collect()
}

/// Tags carried in `meta_*` parameters, in key order.
pub(crate) fn tag_params(record: &ChangeRecord) -> Vec<(String, String)> {
    record
        .params
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(META_PREFIX)
                .map(|tag| (tag.to_string(), value.clone()))
        })
        .collect()
}

/// Resolve a strategy's `target` property, defaulting on bad input.
pub(crate) fn target_from_properties(properties: &PropertySet, default: TargetType) -> TargetType {
    properties.get_parsed("target", default)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    use chrono::{DateTime, Utc};

    use super::{AnalyzeContext, ExecuteContext, Strategy};
    use crate::cancel::CancelFlag;
    use crate::record::{ChangeRecord, EntryAttrs, IdAllocator, RecordSet};
    use crate::report::Reporter;
    use crate::scanner::{ScanOptions, Scanner};

    pub(crate) struct Harness {
        pub(crate) roots: Vec<PathBuf>,
        pub(crate) reporter: Reporter,
        pub(crate) cancel: CancelFlag,
        pub(crate) ids: IdAllocator,
    }

    impl Harness {
        pub(crate) fn new(root: &Path) -> Self {
            Self {
                roots: vec![root.to_path_buf()],
                reporter: Reporter::silent(),
                cancel: CancelFlag::new(),
                ids: IdAllocator::default(),
            }
        }

        pub(crate) fn analyze(
            &self,
            strategy: &dyn Strategy,
            records: Vec<ChangeRecord>,
        ) -> Vec<ChangeRecord> {
            let ctx = AnalyzeContext {
                roots: &self.roots,
                reporter: &self.reporter,
                cancel: &self.cancel,
                ids: &self.ids,
                stage: strategy.id(),
            };
            strategy.analyze(records, &ctx)
        }

        pub(crate) fn execute_context(&self) -> ExecuteContext<'_> {
            ExecuteContext {
                cancel: &self.cancel,
                reporter: &self.reporter,
            }
        }

        pub(crate) fn scan(&self, strategy: &dyn Strategy) -> anyhow::Result<Vec<ChangeRecord>> {
            let options = ScanOptions {
                min_depth: 1,
                ..ScanOptions::default()
            };
            let report = Scanner::default().scan(&self.roots[0], &options)?;
            let set = RecordSet::from_scan(report.entries);
            self.ids.observe(set.ids().watermark());
            Ok(set
                .into_records()
                .into_iter()
                .filter(|record| strategy.target_type().accepts(record.attrs.is_dir))
                .collect())
        }

        pub(crate) fn record(&self, path: PathBuf, attrs: EntryAttrs) -> ChangeRecord {
            ChangeRecord::new(self.ids.next_id(), path, attrs)
        }
    }

    pub(crate) fn file_attrs(size: u64, modified: Option<DateTime<Utc>>) -> EntryAttrs {
        EntryAttrs {
            is_dir: false,
            size,
            modified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;

    #[test]
    fn target_type_accepts_entry_kinds() -> EngineResult<()> {
        assert!(TargetType::FilesOnly.accepts(false));
        assert!(!TargetType::FilesOnly.accepts(true));
        assert!(TargetType::FoldersOnly.accepts(true));
        assert!(TargetType::All.accepts(true));
        assert_eq!("folders".parse::<TargetType>()?, TargetType::FoldersOnly);
        assert!("neither".parse::<TargetType>().is_err());
        Ok(())
    }

    #[test]
    fn root_of_prefers_longest_root() {
        let roots = vec![PathBuf::from("/music"), PathBuf::from("/music/live")];
        assert_eq!(
            root_of(&roots, Path::new("/music/live/a.flac")),
            Some(Path::new("/music/live"))
        );
        assert_eq!(
            root_of(&roots, Path::new("/music/a.flac")),
            Some(Path::new("/music"))
        );
        assert_eq!(root_of(&roots, Path::new("/other/a.flac")), None);
    }

    #[test]
    fn overwrite_lets_a_mover_replace_a_stationary_entry() -> anyhow::Result<()> {
        let tree = reshelve_test_support::TreeFixture::new()?;
        let incoming = tree.file("in/song.mp3", b"new")?;
        let resident = tree.file("song.mp3", b"old")?;
        let harness = testing::Harness::new(tree.path());

        for overwrite in [false, true] {
            let mover = harness.record(incoming.clone(), testing::file_attrs(3, None));
            let stationary = harness.record(resident.clone(), testing::file_attrs(3, None));
            let mut records = vec![mover, stationary];
            let before = virtual_paths(&records);
            records[0].assign(OperationKind::Move, resident.clone());

            reject_collisions(&mut records, &before, overwrite);
            let expected = if overwrite {
                RecordStatus::Pending
            } else {
                RecordStatus::Skipped
            };
            assert_eq!(records[0].status, expected);
            assert_eq!(records[1].status, RecordStatus::Pending);
        }
        Ok(())
    }
}
