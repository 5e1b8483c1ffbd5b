//! Constrained directory walk producing scan entries.
//!
//! # Design
//! - Depth 0 is the root itself; the walk is sorted by file name so results are stable.
//! - Directories are always retained; files pass the extension filter and the early
//!   condition filter.
//! - Limits truncate rather than fail; unreadable entries are skipped and reported.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reshelve_config::ScanSettings;
use reshelve_events::{Event, LogLevel};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelFlag;
use crate::condition::{ConditionSet, Subject, extension_of};
use crate::error::{EngineError, EngineResult};
use crate::record::{EntryAttrs, file_name_of};
use crate::report::Reporter;

const PROGRESS_INTERVAL: u64 = 1_000;

/// Constraints applied while walking a root.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Minimum depth of retained entries.
    pub min_depth: usize,
    /// Maximum depth; `None` is unbounded.
    pub max_depth: Option<usize>,
    /// Allowed lowercase extensions; empty allows every file.
    pub extensions: Vec<String>,
    /// Maximum retained entries.
    pub global_limit: Option<usize>,
    /// Maximum retained entries per directory.
    pub per_directory_limit: Option<usize>,
    /// Early filter applied to files.
    pub filter: Option<ConditionSet>,
}

impl ScanOptions {
    /// Options from validated profile settings.
    #[must_use]
    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self {
            min_depth: settings.min_depth,
            max_depth: settings.max_depth,
            extensions: settings.extensions.clone(),
            global_limit: settings.global_limit,
            per_directory_limit: settings.per_directory_limit,
            filter: None,
        }
    }

    /// Attach an early filter.
    #[must_use]
    pub fn with_filter(mut self, filter: ConditionSet) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One retained entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Entry path.
    pub path: PathBuf,
    /// Depth below the root.
    pub depth: usize,
    /// Scan-time attributes.
    pub attrs: EntryAttrs,
}

/// Result of walking one root.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Root that was walked.
    pub root: PathBuf,
    /// Retained entries in walk order.
    pub entries: Vec<ScanEntry>,
    /// Whether a limit cut the walk short.
    pub truncated: bool,
    /// Whether cancellation stopped the walk.
    pub cancelled: bool,
    /// Entries skipped because they could not be read.
    pub unreadable: usize,
}

/// Walks roots under [`ScanOptions`].
#[derive(Clone, Default)]
pub struct Scanner {
    reporter: Reporter,
    cancel: CancelFlag,
}

impl Scanner {
    /// Scanner reporting through `reporter` and observing `cancel`.
    #[must_use]
    pub const fn new(reporter: Reporter, cancel: CancelFlag) -> Self {
        Self { reporter, cancel }
    }

    /// Walk `root`.
    ///
    /// # Errors
    ///
    /// Returns an error when the root itself cannot be read or is not a directory.
    pub fn scan(&self, root: &Path, options: &ScanOptions) -> EngineResult<ScanReport> {
        let metadata =
            fs::metadata(root).map_err(|source| EngineError::io("scan.root", root, source))?;
        if !metadata.is_dir() {
            return Err(EngineError::invalid(
                "root",
                "not_a_directory",
                root.display().to_string(),
            ));
        }

        let mut walker = WalkDir::new(root)
            .min_depth(options.min_depth)
            .sort_by_file_name();
        if let Some(max_depth) = options.max_depth {
            walker = walker.max_depth(max_depth);
        }

        let mut report = ScanReport {
            root: root.to_path_buf(),
            ..ScanReport::default()
        };
        let mut per_directory: HashMap<PathBuf, usize> = HashMap::new();
        let mut visited: u64 = 0;
        let mut iter = walker.into_iter();

        while let Some(item) = iter.next() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            visited += 1;
            if visited.is_multiple_of(PROGRESS_INTERVAL) {
                self.reporter.publish(Event::ScanProgress {
                    root: root.display().to_string(),
                    visited,
                });
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    let err = EngineError::walkdir("scan.walk", root, err);
                    self.skip_unreadable(&mut report, &err);
                    continue;
                }
            };
            let is_dir = entry.file_type().is_dir();

            if let (Some(limit), Some(parent)) = (options.per_directory_limit, entry.path().parent())
            {
                let count = per_directory.entry(parent.to_path_buf()).or_default();
                if *count >= limit {
                    report.truncated = true;
                    if is_dir {
                        iter.skip_current_dir();
                    }
                    continue;
                }
                *count += 1;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    let err = EngineError::walkdir("scan.metadata", entry.path(), err);
                    self.skip_unreadable(&mut report, &err);
                    continue;
                }
            };
            let attrs = EntryAttrs {
                is_dir,
                size: if is_dir { 0 } else { metadata.len() },
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            };

            if !is_dir && !Self::accepts_file(entry.path(), attrs, options) {
                continue;
            }

            if options
                .global_limit
                .is_some_and(|limit| report.entries.len() >= limit)
            {
                report.truncated = true;
                break;
            }
            report.entries.push(ScanEntry {
                path: entry.path().to_path_buf(),
                depth: entry.depth(),
                attrs,
            });
        }

        if let Some(metrics) = self.reporter.metrics() {
            metrics.add_scan_entries(report.entries.len() as u64);
        }
        info!(
            root = %root.display(),
            entries = report.entries.len(),
            truncated = report.truncated,
            cancelled = report.cancelled,
            unreadable = report.unreadable,
            "scan finished"
        );
        self.reporter.publish(Event::ScanCompleted {
            root: root.display().to_string(),
            entries: report.entries.len() as u64,
            truncated: report.truncated,
            cancelled: report.cancelled,
        });
        Ok(report)
    }

    fn accepts_file(path: &Path, attrs: EntryAttrs, options: &ScanOptions) -> bool {
        let name = file_name_of(path);
        if !options.extensions.is_empty() {
            let allowed = extension_of(&name)
                .is_some_and(|ext| options.extensions.iter().any(|item| *item == ext));
            if !allowed {
                return false;
            }
        }
        options.filter.as_ref().is_none_or(|filter| {
            filter.test(&Subject {
                name: &name,
                path,
                is_dir: false,
                size: attrs.size,
            })
        })
    }

    fn skip_unreadable(&self, report: &mut ScanReport, err: &EngineError) {
        report.unreadable += 1;
        let detail = err.detail();
        warn!(root = %report.root.display(), error = %detail, "skipping unreadable entry");
        self.reporter.log(LogLevel::Warn, detail);
        if let Some(metrics) = self.reporter.metrics() {
            metrics.inc_scan_error();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionGroup, ConditionKind, RuleCondition};
    use reshelve_events::EventBus;
    use reshelve_test_support::TreeFixture;

    type TestResult<T> = anyhow::Result<T>;

    fn options() -> ScanOptions {
        ScanOptions {
            min_depth: 1,
            ..ScanOptions::default()
        }
    }

    fn names(report: &ScanReport) -> Vec<String> {
        report
            .entries
            .iter()
            .map(|entry| file_name_of(&entry.path))
            .collect()
    }

    #[test]
    fn walk_is_sorted_and_filters_extensions() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("b.flac", b"x")?;
        tree.file("a.mp3", b"x")?;
        tree.file("notes.txt", b"x")?;
        tree.dir("disc")?;
        tree.file("disc/01.FLAC", b"x")?;

        let opts = ScanOptions {
            extensions: vec!["flac".into(), "mp3".into()],
            ..options()
        };
        let report = Scanner::default().scan(tree.path(), &opts)?;
        assert_eq!(names(&report), vec!["a.mp3", "b.flac", "disc", "01.FLAC"]);
        assert!(!report.truncated);
        Ok(())
    }

    #[test]
    fn depth_bounds_are_respected() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("a/b/c/deep.mp3", b"x")?;

        let opts = ScanOptions {
            min_depth: 2,
            max_depth: Some(3),
            ..options()
        };
        let report = Scanner::default().scan(tree.path(), &opts)?;
        assert_eq!(names(&report), vec!["b", "c"]);
        assert!(report.entries.iter().all(|entry| (2..=3).contains(&entry.depth)));
        Ok(())
    }

    #[test]
    fn limits_truncate_the_walk() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        for name in ["1.mp3", "2.mp3", "3.mp3"] {
            tree.file(name, b"x")?;
        }
        tree.file("sub/4.mp3", b"x")?;
        tree.file("sub/5.mp3", b"x")?;

        let global = ScanOptions {
            global_limit: Some(2),
            ..options()
        };
        let report = Scanner::default().scan(tree.path(), &global)?;
        assert_eq!(report.entries.len(), 2);
        assert!(report.truncated);

        let per_dir = ScanOptions {
            per_directory_limit: Some(1),
            ..options()
        };
        let report = Scanner::default().scan(tree.path(), &per_dir)?;
        assert_eq!(names(&report), vec!["1.mp3"]);
        assert!(report.truncated);
        Ok(())
    }

    #[test]
    fn early_filter_applies_to_files_only() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("keep/live.mp3", b"x")?;
        tree.file("keep/studio.mp3", b"x")?;

        let filter = ConditionSet {
            groups: vec![ConditionGroup::new(vec![RuleCondition::new(
                ConditionKind::Contains,
                "live",
            )])],
            globals: ConditionGroup::default(),
        };
        let report = Scanner::default().scan(tree.path(), &options().with_filter(filter))?;
        assert_eq!(names(&report), vec!["keep", "live.mp3"]);
        Ok(())
    }

    #[test]
    fn cancellation_stops_before_first_entry() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("a.mp3", b"x")?;
        let bus = EventBus::with_capacity(8);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let scanner = Scanner::new(Reporter::with_events(bus.clone()), cancel);
        let report = scanner.scan(tree.path(), &options())?;
        assert!(report.cancelled);
        assert!(report.entries.is_empty());
        let last = bus.backlog_since(0).pop().map(|env| env.event);
        assert!(matches!(
            last,
            Some(Event::ScanCompleted {
                cancelled: true,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn missing_root_is_an_error() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let err = Scanner::default()
            .scan(&tree.path().join("absent"), &options())
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected error"))?;
        assert!(matches!(err, EngineError::Io { operation: "scan.root", .. }));
        Ok(())
    }
}
