//! Strategy lookup by identifier and pipeline persistence.

use std::sync::Arc;

use reshelve_config::{PipelineEntry, PropertySet, pipeline_from_properties, pipeline_to_properties};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::strategy::cleanup::{self, CleanupConfig};
use crate::strategy::convert::{self, ConvertConfig};
use crate::strategy::cue::{self, CueSplitConfig};
use crate::strategy::cue_rename::{self, CueRenameConfig};
use crate::strategy::extract::{self, ExtractConfig};
use crate::strategy::fix_type::{self, FixTypeConfig};
use crate::strategy::relocate::{self, MoveConfig};
use crate::strategy::rename::{self, RenameConfig};
use crate::strategy::tag::{self, TagConfig};
use crate::strategy::{Strategy, StrategyConfig};

/// Identifiers of the built-in strategies.
pub const STRATEGY_IDS: &[&str] = &[
    rename::ID,
    relocate::ID,
    cleanup::ID,
    cue::ID,
    cue_rename::ID,
    convert::ID,
    extract::ID,
    fix_type::ID,
    tag::ID,
];

/// Build the configuration for a persisted pipeline entry.
///
/// # Errors
///
/// Returns [`EngineError::Unsupported`] when the identifier names no built-in strategy.
pub fn config_from_entry(entry: &PipelineEntry) -> EngineResult<Box<dyn StrategyConfig>> {
    let properties = &entry.properties;
    let config: Box<dyn StrategyConfig> = match entry.id.trim() {
        rename::ID => Box::new(RenameConfig::from_properties(properties)),
        relocate::ID => Box::new(MoveConfig::from_properties(properties)),
        cleanup::ID => Box::new(CleanupConfig::from_properties(properties)),
        cue::ID => Box::new(CueSplitConfig::from_properties(properties)),
        cue_rename::ID => Box::new(CueRenameConfig::from_properties(properties)),
        convert::ID => Box::new(ConvertConfig::from_properties(properties)),
        extract::ID => Box::new(ExtractConfig::from_properties(properties)),
        fix_type::ID => Box::new(FixTypeConfig::from_properties(properties)),
        tag::ID => Box::new(TagConfig::from_properties(properties)),
        other => {
            return Err(EngineError::Unsupported {
                operation: "strategy",
                value: Some(other.to_string()),
            });
        }
    };
    Ok(config)
}

/// Ordered chain of strategy configurations.
#[derive(Default)]
pub struct Pipeline {
    configs: Vec<Box<dyn StrategyConfig>>,
}

impl Pipeline {
    /// Empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline from profile entries; unknown identifiers are skipped with a warning.
    #[must_use]
    pub fn from_entries(entries: &[PipelineEntry]) -> Self {
        let mut pipeline = Self::new();
        for (index, entry) in entries.iter().enumerate() {
            match config_from_entry(entry) {
                Ok(config) => pipeline.push(config),
                Err(err) => warn!(
                    index,
                    strategy = %entry.id,
                    error = %err.detail(),
                    "unknown strategy skipped"
                ),
            }
        }
        pipeline
    }

    /// Pipeline from the flat `pipeline.<n>.*` layout.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self::from_entries(&pipeline_from_properties(properties))
    }

    /// Append a strategy.
    pub fn push(&mut self, config: Box<dyn StrategyConfig>) {
        self.configs.push(config);
    }

    /// Number of strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Strategy identifiers in chain order.
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.configs.iter().map(|config| config.id()).collect()
    }

    /// Snapshot every configuration for one run.
    #[must_use]
    pub fn capture(&self) -> Vec<Arc<dyn Strategy>> {
        self.configs.iter().map(|config| config.capture()).collect()
    }

    /// Persistable entries in chain order.
    #[must_use]
    pub fn to_entries(&self) -> Vec<PipelineEntry> {
        self.configs
            .iter()
            .map(|config| PipelineEntry {
                id: config.id().to_string(),
                properties: config.to_properties(),
            })
            .collect()
    }

    /// Flat `pipeline.<n>.*` properties.
    #[must_use]
    pub fn to_properties(&self) -> PropertySet {
        pipeline_to_properties(&self.to_entries())
    }
}
