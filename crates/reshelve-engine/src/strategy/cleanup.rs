//! Duplicate and clutter cleanup.
//!
//! # Design
//! - `dedup_files` groups sibling files by normalised core name and media class
//!   and keeps one per group according to [`KeeperPolicy`].
//! - `dedup_folders` compares sibling directories by a fingerprint of their
//!   immediate children; a folder is a duplicate when its fingerprint equals the
//!   keeper's, or is a subset of it while sharing the keeper's core name.
//! - `empty_dirs` marks the top-most directories that hold no files.
//! - `matching` marks every file passing the conditions and the size range.
//! - Deletion is hard, or a move into a trash tree that mirrors the source layout.
//!   Entries already inside the trash are never considered.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use reshelve_config::PropertySet;
use tracing::warn;
use walkdir::WalkDir;

use super::{AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType};
use crate::condition::{ConditionSet, extension_of, is_audio_extension};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "cleanup";

const DEFAULT_TRASH_NAME: &str = "Trash";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

static COPY_MARKER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:\(\d+\)|\[\d+\]|（\d+）|\((?:copy|副本)\)|-\s*(?:copy|副本)|副本)\s*$").ok()
});

/// What the cleanup looks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupMode {
    /// Duplicate sibling files.
    #[default]
    DedupFiles,
    /// Duplicate sibling folders.
    DedupFolders,
    /// Directories without files beneath them.
    EmptyDirs,
    /// Every file matching the conditions.
    Matching,
}

impl CleanupMode {
    /// Canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DedupFiles => "dedup_files",
            Self::DedupFolders => "dedup_folders",
            Self::EmptyDirs => "empty_dirs",
            Self::Matching => "matching",
        }
    }
}

impl FromStr for CleanupMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dedup_files" => Ok(Self::DedupFiles),
            "dedup_folders" => Ok(Self::DedupFolders),
            "empty_dirs" => Ok(Self::EmptyDirs),
            "matching" => Ok(Self::Matching),
            other => Err(EngineError::invalid("mode", "unknown_cleanup_mode", other)),
        }
    }
}

/// How marked entries are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove permanently.
    Hard,
    /// Move into the trash tree.
    #[default]
    Pseudo,
    /// Move into a per-run directory of the trash tree.
    Rollbackable,
}

impl DeleteMode {
    /// Canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Pseudo => "pseudo",
            Self::Rollbackable => "rollbackable",
        }
    }
}

impl FromStr for DeleteMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard" => Ok(Self::Hard),
            "pseudo" | "trash" => Ok(Self::Pseudo),
            "rollbackable" => Ok(Self::Rollbackable),
            other => Err(EngineError::invalid("delete_mode", "unknown_delete_mode", other)),
        }
    }
}

/// Where the trash tree lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrashLayout {
    /// `<volume-root>/<trash-name>/<path>`.
    Volume,
    /// `<scan-root>/<trash-name>/<path-relative-to-root>`.
    #[default]
    ScanRoot,
    /// `<dir>/<drive>_Drive/<path>`.
    Absolute(PathBuf),
}

/// Trash placement options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashSettings {
    /// Layout of the trash tree.
    pub layout: TrashLayout,
    /// Name of the trash directory.
    pub name: String,
    /// Nest duplicates under a directory named after their keeper.
    pub group_by_keeper: bool,
}

impl Default for TrashSettings {
    fn default() -> Self {
        Self {
            layout: TrashLayout::default(),
            name: DEFAULT_TRASH_NAME.to_string(),
            group_by_keeper: true,
        }
    }
}

/// Which file of a duplicate group survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperPolicy {
    /// Extensions in order of preference.
    pub preferred_extensions: Vec<String>,
    /// Prefer the larger file.
    pub prefer_larger: bool,
    /// Prefer the earlier modification time.
    pub prefer_older: bool,
}

impl Default for KeeperPolicy {
    fn default() -> Self {
        Self {
            preferred_extensions: Vec::new(),
            prefer_larger: true,
            prefer_older: false,
        }
    }
}

impl KeeperPolicy {
    fn extension_rank(&self, record: &ChangeRecord) -> usize {
        let ext = extension_of(&record.new_name).unwrap_or_default();
        self.preferred_extensions
            .iter()
            .position(|preferred| *preferred == ext)
            .unwrap_or(self.preferred_extensions.len())
    }

    fn compare(&self, a: &ChangeRecord, b: &ChangeRecord) -> Ordering {
        self.extension_rank(a)
            .cmp(&self.extension_rank(b))
            .then_with(|| {
                if self.prefer_larger {
                    b.attrs.size.cmp(&a.attrs.size)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| {
                if self.prefer_older {
                    older_first(a.attrs.modified, b.attrs.modified)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| shorter_name_first(a, b))
    }
}

/// User options for the cleanup strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupConfig {
    /// What to look for.
    pub mode: CleanupMode,
    /// How to remove.
    pub delete_mode: DeleteMode,
    /// Trash placement.
    pub trash: TrashSettings,
    /// Survivor selection for `dedup_files`.
    pub keeper: KeeperPolicy,
    /// Filter for `matching`.
    pub conditions: ConditionSet,
    /// Smallest size, in bytes, matched by `matching`.
    pub min_size: Option<u64>,
    /// Largest size, in bytes, matched by `matching`.
    pub max_size: Option<u64>,
}

impl CleanupConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        let trash_name = properties.get_string("trash.name", DEFAULT_TRASH_NAME);
        let layout = match properties.get_string("trash.layout", "scan_root").as_str() {
            "volume" => TrashLayout::Volume,
            "absolute" => {
                let dir = properties.get_string("trash.dir", "");
                if dir.trim().is_empty() {
                    warn!("absolute trash layout without trash.dir; using scan root");
                    TrashLayout::ScanRoot
                } else {
                    TrashLayout::Absolute(PathBuf::from(dir.trim()))
                }
            }
            _ => TrashLayout::ScanRoot,
        };
        let preferred_extensions = properties
            .get_list("keeper.preferred_extensions")
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        let keeper_defaults = KeeperPolicy::default();
        Self {
            mode: properties.get_parsed("mode", CleanupMode::default()),
            delete_mode: properties.get_parsed("delete_mode", DeleteMode::default()),
            trash: TrashSettings {
                layout,
                name: if trash_name.trim().is_empty() {
                    DEFAULT_TRASH_NAME.to_string()
                } else {
                    trash_name.trim().to_string()
                },
                group_by_keeper: properties.get_bool("trash.group_by_keeper", true),
            },
            keeper: KeeperPolicy {
                preferred_extensions,
                prefer_larger: properties
                    .get_bool("keeper.prefer_larger", keeper_defaults.prefer_larger),
                prefer_older: properties
                    .get_bool("keeper.prefer_older", keeper_defaults.prefer_older),
            },
            conditions: properties.get_json("conditions", ConditionSet::default()),
            min_size: properties.get_optional("min_size"),
            max_size: properties.get_optional("max_size"),
        }
    }
}

impl StrategyConfig for CleanupConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        let stamp = (self.delete_mode == DeleteMode::Rollbackable)
            .then(|| Local::now().format(STAMP_FORMAT).to_string());
        Arc::new(CleanupStrategy {
            config: self.clone(),
            stamp,
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set("mode", self.mode.as_str());
        properties.set("delete_mode", self.delete_mode.as_str());
        match &self.trash.layout {
            TrashLayout::Volume => properties.set("trash.layout", "volume"),
            TrashLayout::ScanRoot => properties.set("trash.layout", "scan_root"),
            TrashLayout::Absolute(dir) => {
                properties.set("trash.layout", "absolute");
                properties.set("trash.dir", dir.display().to_string());
            }
        }
        properties.set("trash.name", self.trash.name.as_str());
        properties.set_display("trash.group_by_keeper", self.trash.group_by_keeper);
        if !self.keeper.preferred_extensions.is_empty() {
            properties.set("keeper.preferred_extensions", self.keeper.preferred_extensions.join(","));
        }
        properties.set_display("keeper.prefer_larger", self.keeper.prefer_larger);
        properties.set_display("keeper.prefer_older", self.keeper.prefer_older);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        if let Some(min) = self.min_size {
            properties.set_display("min_size", min);
        }
        if let Some(max) = self.max_size {
            properties.set_display("max_size", max);
        }
        properties
    }
}

/// Captured cleanup strategy.
pub struct CleanupStrategy {
    config: CleanupConfig,
    stamp: Option<String>,
}

/// Index of a marked record and the name of the entry that survives it.
type Mark = (usize, Option<String>);

impl CleanupStrategy {
    fn candidate(&self, record: &ChangeRecord, ctx: &AnalyzeContext<'_>) -> bool {
        !record.is_terminal()
            && record.operation != OperationKind::Delete
            && !self.in_trash(&record.source_path, ctx)
    }

    fn in_trash(&self, path: &Path, ctx: &AnalyzeContext<'_>) -> bool {
        match &self.config.trash.layout {
            TrashLayout::Absolute(dir) => path.starts_with(dir),
            TrashLayout::ScanRoot => ctx
                .root_of(path)
                .is_some_and(|root| path.starts_with(root.join(&self.config.trash.name))),
            TrashLayout::Volume => {
                let (volume, _, _) = split_volume(path);
                path.starts_with(volume.join(&self.config.trash.name))
            }
        }
    }

    fn dedup_files(&self, records: &[ChangeRecord], ctx: &AnalyzeContext<'_>) -> Vec<Mark> {
        let mut groups: BTreeMap<(PathBuf, String, String), Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            if record.attrs.is_dir || !self.candidate(record, ctx) {
                continue;
            }
            let (stem, ext) = split_name(&record.new_name);
            let key = (record.virtual_dir().to_path_buf(), core_name(stem), media_class(ext));
            groups.entry(key).or_default().push(index);
        }

        let mut marks = Vec::new();
        for mut members in groups.into_values() {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| self.config.keeper.compare(&records[*a], &records[*b]));
            let keeper = records[members[0]].new_name.clone();
            marks.extend(
                members
                    .iter()
                    .skip(1)
                    .map(|index| (*index, Some(keeper.clone()))),
            );
        }
        marks
    }

    fn dedup_folders(&self, records: &[ChangeRecord], ctx: &AnalyzeContext<'_>) -> Vec<Mark> {
        let fingerprints: HashMap<usize, BTreeSet<String>> = records
            .par_iter()
            .enumerate()
            .filter(|(_, record)| record.attrs.is_dir && self.candidate(record, ctx))
            .filter_map(|(index, record)| match fingerprint(&record.source_path) {
                Ok(print) => Some((index, print)),
                Err(err) => {
                    warn!(
                        path = %record.source_path.display(),
                        error = %err.detail(),
                        "folder fingerprint unavailable"
                    );
                    None
                }
            })
            .collect();

        let mut siblings: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for index in fingerprints.keys() {
            siblings
                .entry(records[*index].virtual_dir().to_path_buf())
                .or_default()
                .push(*index);
        }

        let mut marks = Vec::new();
        for mut members in siblings.into_values() {
            members.sort_by(|a, b| folder_keeper_order(&records[*a], &records[*b]));
            let mut assigned: HashSet<usize> = HashSet::new();
            for (position, keeper) in members.iter().enumerate() {
                if assigned.contains(keeper) {
                    continue;
                }
                let Some(keeper_print) = fingerprints.get(keeper) else {
                    continue;
                };
                if keeper_print.is_empty() {
                    continue;
                }
                let keeper_core = core_name(&records[*keeper].new_name);
                for other in members.iter().skip(position + 1) {
                    if assigned.contains(other) {
                        continue;
                    }
                    let Some(print) = fingerprints.get(other) else {
                        continue;
                    };
                    let duplicate = print == keeper_print
                        || (!print.is_empty()
                            && print.is_subset(keeper_print)
                            && core_name(&records[*other].new_name) == keeper_core);
                    if duplicate {
                        assigned.insert(*other);
                        marks.push((*other, Some(records[*keeper].new_name.clone())));
                    }
                }
            }
        }
        marks
    }

    fn empty_dirs(&self, records: &[ChangeRecord], ctx: &AnalyzeContext<'_>) -> Vec<Mark> {
        let empty: Vec<usize> = records
            .par_iter()
            .enumerate()
            .filter(|(_, record)| {
                record.attrs.is_dir
                    && self.candidate(record, ctx)
                    && !contains_files(&record.source_path)
            })
            .map(|(index, _)| index)
            .collect();
        empty
            .iter()
            .filter(|index| {
                let path = &records[**index].source_path;
                !empty.iter().any(|other| {
                    let other = &records[*other].source_path;
                    other != path && path.starts_with(other)
                })
            })
            .map(|index| (*index, None))
            .collect()
    }

    fn matching(&self, records: &[ChangeRecord], ctx: &AnalyzeContext<'_>) -> Vec<Mark> {
        records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                !record.attrs.is_dir
                    && self.candidate(record, ctx)
                    && self.config.min_size.is_none_or(|min| record.attrs.size >= min)
                    && self.config.max_size.is_none_or(|max| record.attrs.size <= max)
                    && self.config.conditions.test(&record.subject())
            })
            .map(|(index, _)| (index, None))
            .collect()
    }

    fn trash_base(&self, base: &Path) -> PathBuf {
        let mut out = base.join(&self.config.trash.name);
        if let Some(stamp) = &self.stamp {
            out.push(stamp);
        }
        out
    }

    fn trash_target(
        &self,
        record: &ChangeRecord,
        keeper: Option<&str>,
        root: Option<&Path>,
    ) -> EngineResult<PathBuf> {
        let parent = record.source_path.parent().unwrap_or_else(|| Path::new(""));
        let mut target = match &self.config.trash.layout {
            TrashLayout::Volume => {
                let (volume, _, rest) = split_volume(parent);
                self.trash_base(&volume).join(rest)
            }
            TrashLayout::ScanRoot => {
                let root = root.ok_or(EngineError::MissingState { field: "scan_root" })?;
                let relative = parent.strip_prefix(root).unwrap_or_else(|_| Path::new(""));
                self.trash_base(root).join(relative)
            }
            TrashLayout::Absolute(dir) => {
                let (_, drive, rest) = split_volume(parent);
                let mut base = dir.clone();
                if let Some(stamp) = &self.stamp {
                    base.push(stamp);
                }
                if let Some(drive) = drive {
                    base.push(format!("{drive}_Drive"));
                }
                base.join(rest)
            }
        };
        if self.config.trash.group_by_keeper
            && let Some(keeper) = keeper
        {
            target.push(keeper);
        }
        target.push(&record.original_name);
        Ok(target)
    }

    fn mark_delete(
        &self,
        record: &mut ChangeRecord,
        keeper: Option<&str>,
        root: Option<&Path>,
    ) -> EngineResult<()> {
        let target = match self.config.delete_mode {
            DeleteMode::Hard => record.source_path.clone(),
            DeleteMode::Pseudo | DeleteMode::Rollbackable => self.trash_target(record, keeper, root)?,
        };
        record.assign(OperationKind::Delete, target);
        record.set_param("delete_mode", self.config.delete_mode.as_str());
        if let Some(keeper) = keeper {
            record.set_param("keeper", keeper);
        }
        Ok(())
    }
}

impl Strategy for CleanupStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        match self.config.mode {
            CleanupMode::DedupFiles | CleanupMode::Matching => TargetType::FilesOnly,
            CleanupMode::DedupFolders | CleanupMode::EmptyDirs => TargetType::FoldersOnly,
        }
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Delete]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let mut records = records;
        let total = records.len() as u64;
        if ctx.cancel.is_cancelled() {
            return records;
        }
        let marks = match self.config.mode {
            CleanupMode::DedupFiles => self.dedup_files(&records, ctx),
            CleanupMode::DedupFolders => self.dedup_folders(&records, ctx),
            CleanupMode::EmptyDirs => self.empty_dirs(&records, ctx),
            CleanupMode::Matching => self.matching(&records, ctx),
        };
        for (index, keeper) in marks {
            let root = ctx.root_of(&records[index].source_path);
            let record = &mut records[index];
            if let Err(err) = self.mark_delete(record, keeper.as_deref(), root) {
                warn!(
                    record_id = %record.id,
                    path = %record.source_path.display(),
                    error = %err.detail(),
                    "cleanup left record unchanged"
                );
            }
        }
        ctx.progress(total, total);
        records
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        _ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        if fs::symlink_metadata(&record.source_path).is_err() {
            return Ok(ExecuteOutcome::Skipped(format!(
                "{} no longer exists",
                record.source_path.display()
            )));
        }
        let mode = record
            .param("delete_mode")
            .and_then(|mode| mode.parse().ok())
            .unwrap_or(self.config.delete_mode);
        match mode {
            DeleteMode::Hard => fsops::remove_entry(&record.source_path)?,
            DeleteMode::Pseudo | DeleteMode::Rollbackable => {
                // An earlier run's entry with the same trash path is replaced.
                fsops::remove_entry(&record.new_path)?;
                fsops::move_tree(&record.source_path, &record.new_path)?;
            }
        }
        Ok(ExecuteOutcome::Applied)
    }
}

/// Core name with trailing copy markers removed, lowercased.
fn core_name(name: &str) -> String {
    let mut current = name.trim().to_string();
    if let Some(marker) = COPY_MARKER.as_ref() {
        loop {
            let stripped = marker.replace(&current, "").trim().to_string();
            if stripped == current || stripped.is_empty() {
                break;
            }
            current = stripped;
        }
    }
    current.to_lowercase()
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn media_class(ext: Option<&str>) -> String {
    let ext = ext.map(str::to_ascii_lowercase).unwrap_or_default();
    if is_audio_extension(&ext) {
        "audio".to_string()
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        "video".to_string()
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        "image".to_string()
    } else {
        format!("other:{ext}")
    }
}

fn older_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn shorter_name_first(a: &ChangeRecord, b: &ChangeRecord) -> Ordering {
    a.new_name
        .chars()
        .count()
        .cmp(&b.new_name.chars().count())
        .then_with(|| a.new_name.to_lowercase().cmp(&b.new_name.to_lowercase()))
}

fn folder_keeper_order(a: &ChangeRecord, b: &ChangeRecord) -> Ordering {
    a.new_name
        .chars()
        .count()
        .cmp(&b.new_name.chars().count())
        .then_with(|| older_first(a.attrs.modified, b.attrs.modified))
        .then_with(|| a.new_name.cmp(&b.new_name))
}

/// Sorted `name:size` / `name/` entries of a directory's immediate children.
fn fingerprint(dir: &Path) -> EngineResult<BTreeSet<String>> {
    let entries = fs::read_dir(dir).map_err(|err| EngineError::io("cleanup.fingerprint", dir, err))?;
    let mut print = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| EngineError::io("cleanup.fingerprint", dir, err))?;
        let metadata = entry
            .metadata()
            .map_err(|err| EngineError::io("cleanup.fingerprint", entry.path(), err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if metadata.is_dir() {
            print.insert(format!("{name}/"));
        } else {
            print.insert(format!("{name}:{}", metadata.len()));
        }
    }
    Ok(print)
}

/// Whether any non-directory lives below `dir`; unreadable entries count as files.
fn contains_files(dir: &Path) -> bool {
    WalkDir::new(dir).into_iter().any(|entry| match entry {
        Ok(entry) => !entry.file_type().is_dir(),
        Err(_) => true,
    })
}

/// Split a path into its volume root, drive label and the remaining components.
fn split_volume(path: &Path) -> (PathBuf, Option<String>, PathBuf) {
    let mut volume = PathBuf::new();
    let mut drive = None;
    let mut rest = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                let label = prefix.as_os_str().to_string_lossy();
                drive = Some(label.trim_end_matches(':').to_string());
                volume.push(component);
            }
            Component::RootDir => volume.push(component),
            other => rest.push(other),
        }
    }
    (volume, drive, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;
    use crate::strategy::testing::{Harness, file_attrs};
    use chrono::TimeZone;
    use reshelve_test_support::TreeFixture;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn core_name_strips_stacked_copy_markers() {
        assert_eq!(core_name("Song (1)"), "song");
        assert_eq!(core_name("Song [2] - Copy"), "song");
        assert_eq!(core_name("专辑（3）副本"), "专辑");
        assert_eq!(core_name("A (copy)"), "a");
        assert_eq!(core_name("(1)"), "(1)");
    }

    #[test]
    fn copy_folder_moves_into_trash_under_keeper() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("A/1.mp3", b"one")?;
        tree.file("A/2.mp3", b"two")?;
        tree.file("A (copy)/1.mp3", b"one")?;

        let harness = Harness::new(tree.path());
        let strategy = CleanupConfig {
            mode: CleanupMode::DedupFolders,
            ..CleanupConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);

        let marked: Vec<_> = records
            .iter()
            .filter(|record| record.operation == OperationKind::Delete)
            .collect();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].original_name, "A (copy)");
        assert_eq!(marked[0].new_path, tree.join("Trash/A/A (copy)"));

        strategy.execute(marked[0], &harness.execute_context())?;
        assert!(tree.exists("Trash/A/A (copy)/1.mp3"));
        assert!(tree.exists("A/2.mp3"));
        assert!(!tree.exists("A (copy)"));
        Ok(())
    }

    #[test]
    fn file_keeper_follows_preferred_extension() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let root = tree.path().to_path_buf();
        let harness = Harness::new(&root);
        let records = vec![
            harness.record(root.join("song.mp3"), file_attrs(10, None)),
            harness.record(root.join("song (1).mp3"), file_attrs(10, None)),
            harness.record(root.join("song.flac"), file_attrs(5, None)),
            harness.record(root.join("other.mp3"), file_attrs(10, None)),
        ];
        let strategy = CleanupConfig {
            delete_mode: DeleteMode::Hard,
            keeper: KeeperPolicy {
                preferred_extensions: vec!["flac".into()],
                ..KeeperPolicy::default()
            },
            ..CleanupConfig::default()
        }
        .capture();
        let records = harness.analyze(strategy.as_ref(), records);

        let deleted: Vec<_> = records
            .iter()
            .filter(|record| record.operation == OperationKind::Delete)
            .map(|record| record.original_name.as_str())
            .collect();
        assert_eq!(deleted, vec!["song.mp3", "song (1).mp3"]);
        assert!(records.iter().all(|record| record.status == RecordStatus::Pending));
        let hard = records
            .iter()
            .find(|record| record.original_name == "song.mp3")
            .ok_or_else(|| anyhow::anyhow!("missing record"))?;
        assert_eq!(hard.new_path, hard.source_path);
        assert_eq!(hard.param("keeper"), Some("song.flac"));
        Ok(())
    }

    #[test]
    fn keeper_prefers_older_when_enabled() {
        let older = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single();
        let newer = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
        let policy = KeeperPolicy {
            prefer_larger: false,
            prefer_older: true,
            ..KeeperPolicy::default()
        };
        let a = ChangeRecord::new(
            crate::record::IdAllocator::default().next_id(),
            PathBuf::from("/m/track (1).mp3"),
            file_attrs(1, older),
        );
        let b = ChangeRecord::new(a.id, PathBuf::from("/m/track.mp3"), file_attrs(1, newer));
        assert_eq!(policy.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn only_topmost_empty_directories_are_removed() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.dir("e1/e2")?;
        tree.dir("e3")?;
        tree.file("full/a.mp3", b"a")?;

        let harness = Harness::new(tree.path());
        let strategy = CleanupConfig {
            mode: CleanupMode::EmptyDirs,
            delete_mode: DeleteMode::Hard,
            ..CleanupConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let mut deleted: Vec<_> = records
            .iter()
            .filter(|record| record.operation == OperationKind::Delete)
            .collect();
        deleted.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        let names: Vec<_> = deleted.iter().map(|record| record.original_name.as_str()).collect();
        assert_eq!(names, vec!["e1", "e3"]);

        for record in deleted {
            strategy.execute(record, &harness.execute_context())?;
        }
        assert!(!tree.exists("e1"));
        assert!(tree.exists("full/a.mp3"));
        Ok(())
    }

    #[test]
    fn matching_respects_size_range_and_trash_contents() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("big.log", &[0_u8; 64])?;
        tree.file("small.log", b"x")?;
        tree.file("Trash/old.log", &[0_u8; 64])?;

        let harness = Harness::new(tree.path());
        let strategy = CleanupConfig {
            mode: CleanupMode::Matching,
            min_size: Some(32),
            ..CleanupConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let deleted: Vec<_> = records
            .iter()
            .filter(|record| record.operation == OperationKind::Delete)
            .map(|record| record.original_name.as_str())
            .collect();
        assert_eq!(deleted, vec!["big.log"]);
        Ok(())
    }

    #[test]
    fn pseudo_delete_replaces_earlier_trash_entry() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("x.tmp", b"new")?;
        tree.file("Trash/x.tmp", b"old")?;

        let harness = Harness::new(tree.path());
        let strategy = CleanupConfig {
            mode: CleanupMode::Matching,
            ..CleanupConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let marked = records
            .iter()
            .find(|record| record.operation == OperationKind::Delete)
            .ok_or_else(|| anyhow::anyhow!("missing delete record"))?;
        assert_eq!(marked.new_path, tree.join("Trash/x.tmp"));

        let outcome = strategy.execute(marked, &harness.execute_context())?;
        assert_eq!(outcome, ExecuteOutcome::Applied);
        assert_eq!(tree.read("Trash/x.tmp")?, b"new");
        assert!(!tree.exists("x.tmp"));
        Ok(())
    }

    #[test]
    fn rollbackable_deletes_land_in_a_stamped_directory() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("x.tmp", b"x")?;
        let harness = Harness::new(tree.path());
        let strategy = CleanupConfig {
            mode: CleanupMode::Matching,
            delete_mode: DeleteMode::Rollbackable,
            ..CleanupConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let target = &records[0].new_path;
        let relative = target.strip_prefix(tree.join("Trash"))?;
        let stamp = relative
            .components()
            .next()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
        assert_eq!(relative.file_name().and_then(|name| name.to_str()), Some("x.tmp"));
        Ok(())
    }

    #[test]
    fn absolute_layout_mirrors_source_path() {
        let strategy = CleanupStrategy {
            config: CleanupConfig {
                trash: TrashSettings {
                    layout: TrashLayout::Absolute(PathBuf::from("/bin")),
                    group_by_keeper: false,
                    ..TrashSettings::default()
                },
                ..CleanupConfig::default()
            },
            stamp: None,
        };
        let record = ChangeRecord::new(
            crate::record::IdAllocator::default().next_id(),
            PathBuf::from("/music/a/b.mp3"),
            file_attrs(1, None),
        );
        let target = strategy.trash_target(&record, Some("keep.mp3"), None);
        assert_eq!(target.ok(), Some(PathBuf::from("/bin/music/a/b.mp3")));
    }

    #[test]
    fn config_round_trips_through_properties() {
        let config = CleanupConfig {
            mode: CleanupMode::DedupFolders,
            delete_mode: DeleteMode::Rollbackable,
            trash: TrashSettings {
                layout: TrashLayout::Absolute(PathBuf::from("/trash")),
                name: "Bin".into(),
                group_by_keeper: false,
            },
            keeper: KeeperPolicy {
                preferred_extensions: vec!["flac".into(), "wav".into()],
                prefer_larger: false,
                prefer_older: true,
            },
            conditions: ConditionSet::default(),
            min_size: Some(1),
            max_size: None,
        };
        assert_eq!(CleanupConfig::from_properties(&config.to_properties()), config);
    }
}
