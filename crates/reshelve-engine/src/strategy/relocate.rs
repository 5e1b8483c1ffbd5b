//! Move matching entries under a destination directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reshelve_config::PropertySet;

use super::location::normalise;
use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    map_records, reject_collisions, target_from_properties, virtual_paths,
};
use crate::condition::ConditionSet;
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "move";

/// User options for the move strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveConfig {
    /// Destination; relative paths resolve against the entry's scan root.
    pub destination: PathBuf,
    /// Recreate the directory structure below the scan root.
    pub preserve_structure: bool,
    /// Replace existing targets.
    pub overwrite: bool,
    /// Entry kinds to move.
    pub target: TargetType,
    /// Filter selecting records to move.
    pub conditions: ConditionSet,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("sorted"),
            preserve_structure: true,
            overwrite: false,
            target: TargetType::FilesOnly,
            conditions: ConditionSet::default(),
        }
    }
}

impl MoveConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        let defaults = Self::default();
        Self {
            destination: PathBuf::from(
                properties.get_string("destination", &defaults.destination.to_string_lossy()),
            ),
            preserve_structure: properties
                .get_bool("preserve_structure", defaults.preserve_structure),
            overwrite: properties.get_bool("overwrite", defaults.overwrite),
            target: target_from_properties(properties, defaults.target),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for MoveConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        Arc::new(MoveStrategy {
            config: self.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set("destination", self.destination.display().to_string());
        properties.set_display("preserve_structure", self.preserve_structure);
        properties.set_display("overwrite", self.overwrite);
        properties.set_display("target", self.target);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

/// Captured move strategy.
pub struct MoveStrategy {
    config: MoveConfig,
}

impl MoveStrategy {
    fn destination_for(&self, root: &Path) -> PathBuf {
        if self.config.destination.is_absolute() {
            normalise(&self.config.destination)
        } else {
            normalise(&root.join(&self.config.destination))
        }
    }

    fn apply(&self, record: &mut ChangeRecord, ctx: &AnalyzeContext<'_>) -> EngineResult<()> {
        if !self.config.conditions.test(&record.subject()) {
            return Ok(());
        }
        let root = ctx
            .root_of(&record.source_path)
            .ok_or(EngineError::MissingState { field: "scan_root" })?;
        let base = self.destination_for(root);
        if record.new_path.starts_with(&base) {
            return Ok(());
        }
        let relative = if self.config.preserve_structure {
            record
                .virtual_dir()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_default()
        } else {
            PathBuf::new()
        };
        let target = base.join(relative).join(&record.new_name);
        let operation = match record.operation {
            OperationKind::None | OperationKind::Rename => OperationKind::Move,
            other => other,
        };
        record.assign(operation, target);
        Ok(())
    }
}

impl Strategy for MoveStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        self.config.target
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Move]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let before = virtual_paths(&records);
        let mut records = map_records(records, ctx, |record| self.apply(record, ctx));
        reject_collisions(&mut records, &before, self.config.overwrite);
        records
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        _ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        // Descendants moved earlier already populate a directory's target.
        fsops::merge_tree(&record.source_path, &record.new_path, self.config.overwrite)?;
        Ok(ExecuteOutcome::Applied)
    }
}
