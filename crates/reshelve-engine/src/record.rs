//! Change records and the arena they live in.
//!
//! # Design
//! - A record keeps its scan-time identity (`source_path`, attributes) immutable
//!   and carries the virtual end state (`new_name`, `new_path`) separately.
//! - Records are keyed by a stable [`RecordId`]; derived records mint fresh ids
//!   from the shared [`IdAllocator`] and point back through `origin`.
//! - The arena advances one generation per analysis stage.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Subject;
use crate::scanner::ScanEntry;

/// Stable identifier of a record within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe source of fresh record ids, shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: Arc<AtomicU64>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl IdAllocator {
    /// Allocate the next id.
    #[must_use]
    pub fn next_id(&self) -> RecordId {
        RecordId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Ensure future ids are strictly greater than `id`.
    pub fn observe(&self, id: RecordId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    /// First id that has not been handed out yet.
    #[must_use]
    pub fn watermark(&self) -> RecordId {
        RecordId(self.next.load(Ordering::Relaxed))
    }
}

/// File-system operation a record resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Nothing to do.
    #[default]
    None,
    /// Rename within the same directory.
    Rename,
    /// Move to another directory.
    Move,
    /// Re-encode audio.
    Convert,
    /// Cut one track out of a larger audio file.
    Split,
    /// Delete (hard, or into trash).
    Delete,
    /// Write metadata tags.
    Enrich,
    /// Correct a wrong file extension.
    FixType,
    /// Extract an archive.
    Extract,
}

impl OperationKind {
    /// Canonical snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::Convert => "convert",
            Self::Split => "split",
            Self::Delete => "delete",
            Self::Enrich => "enrich",
            Self::FixType => "fix_type",
            Self::Extract => "extract",
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting for execution.
    #[default]
    Pending,
    /// Dispatched to a worker.
    Running,
    /// Applied successfully.
    Success,
    /// Execution failed; see `fail_reason`.
    Failed,
    /// Intentionally not executed; see `fail_reason`.
    Skipped,
}

impl RecordStatus {
    /// Canonical snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// Attributes captured at scan time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAttrs {
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Last modification time, when readable.
    pub modified: Option<DateTime<Utc>>,
}

/// Unit of work flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Stable identifier.
    pub id: RecordId,
    /// Record this one was derived from, if any.
    pub origin: Option<RecordId>,
    /// Entry name at scan time.
    pub original_name: String,
    /// Entry path at scan time.
    pub source_path: PathBuf,
    /// Scan-time attributes.
    pub attrs: EntryAttrs,
    /// Virtual name after the strategies applied so far.
    pub new_name: String,
    /// Virtual path after the strategies applied so far.
    pub new_path: PathBuf,
    /// Whether any strategy altered the virtual state.
    pub changed: bool,
    /// Operation the executor performs.
    pub operation: OperationKind,
    /// Operation-specific instructions.
    pub params: BTreeMap<String, String>,
    /// Lifecycle status.
    pub status: RecordStatus,
    /// Failure or skip reason.
    pub fail_reason: Option<String>,
    /// Chain position of the strategy that executes this record.
    pub owner: Option<usize>,
}

impl ChangeRecord {
    /// Fresh PENDING record for an entry.
    #[must_use]
    pub fn new(id: RecordId, path: PathBuf, attrs: EntryAttrs) -> Self {
        let name = file_name_of(&path);
        Self {
            id,
            origin: None,
            original_name: name.clone(),
            source_path: path.clone(),
            attrs,
            new_name: name,
            new_path: path,
            changed: false,
            operation: OperationKind::None,
            params: BTreeMap::new(),
            status: RecordStatus::Pending,
            fail_reason: None,
            owner: None,
        }
    }

    /// Derived record sharing this record's source, with a fresh id.
    #[must_use]
    pub fn derive(&self, id: RecordId) -> Self {
        let mut derived = Self::new(id, self.source_path.clone(), self.attrs);
        derived.origin = Some(self.id);
        derived.new_name.clone_from(&self.new_name);
        derived.new_path.clone_from(&self.new_path);
        derived
    }

    /// Condition subject over the virtual state.
    #[must_use]
    pub fn subject(&self) -> Subject<'_> {
        Subject {
            name: &self.new_name,
            path: &self.new_path,
            is_dir: self.attrs.is_dir,
            size: self.attrs.size,
        }
    }

    /// Point the record at `target` and assign its operation.
    pub fn assign(&mut self, operation: OperationKind, target: PathBuf) {
        self.new_name = file_name_of(&target);
        self.new_path = target;
        self.operation = operation;
        self.changed = true;
    }

    /// Rename within the current virtual directory, keeping any earlier operation.
    pub fn rename_to(&mut self, name: &str) {
        let target = self.virtual_dir().join(name);
        let operation = match self.operation {
            OperationKind::None => OperationKind::Rename,
            other => other,
        };
        self.assign(operation, target);
    }

    /// Mark the record SKIPPED with a reason.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = RecordStatus::Skipped;
        self.fail_reason = Some(reason.into());
    }

    /// Mark the record FAILED with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RecordStatus::Failed;
        self.fail_reason = Some(reason.into());
    }

    /// Store an operation parameter.
    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        self.params.insert(key.to_string(), value.into());
    }

    /// Read an operation parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Directory the record currently lives in (virtually).
    #[must_use]
    pub fn virtual_dir(&self) -> &Path {
        self.new_path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Whether the record's status is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the executor has anything to do for this record.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.changed
            && self.status == RecordStatus::Pending
            && self.operation != OperationKind::None
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.to_string_lossy().into_owned(), |name| {
            name.to_string_lossy().into_owned()
        })
}

/// Arena of records keyed by id, advanced one generation per stage.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: BTreeMap<RecordId, ChangeRecord>,
    generation: u32,
    ids: IdAllocator,
}

impl RecordSet {
    /// Empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// PENDING records for every scanned entry, in scan order.
    #[must_use]
    pub fn from_scan(entries: impl IntoIterator<Item = ScanEntry>) -> Self {
        let mut set = Self::new();
        for entry in entries {
            let id = set.ids.next_id();
            set.records
                .insert(id, ChangeRecord::new(id, entry.path, entry.attrs));
        }
        set
    }

    /// Arena holding existing records; the allocator continues past their ids.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = ChangeRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.ids.observe(record.id);
            set.records.insert(record.id, record);
        }
        set
    }

    /// Shared id allocator.
    #[must_use]
    pub const fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) const fn advance(&mut self) -> u32 {
        self.generation = self.generation.saturating_add(1);
        self.generation
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&ChangeRecord> {
        self.records.get(&id)
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.values()
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, record: ChangeRecord) {
        self.ids.observe(record.id);
        self.records.insert(record.id, record);
    }

    /// Remove a record.
    pub fn remove(&mut self, id: RecordId) -> Option<ChangeRecord> {
        self.records.remove(&id)
    }

    /// Remove the records matching `predicate`, in id order.
    pub fn take_where<F>(&mut self, predicate: F) -> Vec<ChangeRecord>
    where
        F: Fn(&ChangeRecord) -> bool,
    {
        let ids: Vec<RecordId> = self
            .records
            .values()
            .filter(|record| predicate(record))
            .map(|record| record.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.records.remove(&id))
            .collect()
    }

    /// Consume the arena into records in id order.
    #[must_use]
    pub fn into_records(self) -> Vec<ChangeRecord> {
        self.records.into_values().collect()
    }
}
