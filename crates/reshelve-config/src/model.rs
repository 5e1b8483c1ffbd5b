//! Typed profile models.
//!
//! # Design
//! - Pure data carriers deserialised from the YAML profile.
//! - Every section has serde defaults so a profile only needs `roots`.
//! - `None` limits mean "unbounded"; zero is normalised to `None` by validation.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigError;
use crate::properties::PropertySet;

/// Complete description of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineProfile {
    /// Directories to scan; each one gets its own execution pool.
    pub roots: Vec<PathBuf>,
    /// Scan constraints.
    #[serde(default)]
    pub scan: ScanSettings,
    /// Execution limits and pool sizing.
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Logging preferences.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Ordered strategy chain.
    #[serde(default)]
    pub pipeline: Vec<PipelineEntry>,
}

/// Scan depth, type and resource constraints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    /// Minimum depth of retained entries (0 is the root itself).
    pub min_depth: usize,
    /// Maximum depth; `None` recurses without bound.
    pub max_depth: Option<usize>,
    /// Allowed file extensions (lowercase, no dot); empty allows every file.
    pub extensions: Vec<String>,
    /// Stop the walk after this many retained entries.
    pub global_limit: Option<usize>,
    /// Stop listing a directory after this many entries.
    pub per_directory_limit: Option<usize>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            min_depth: defaults::MIN_DEPTH,
            max_depth: None,
            extensions: Vec::new(),
            global_limit: None,
            per_directory_limit: None,
        }
    }
}

/// Execution limits and worker pool sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSettings {
    /// Worker threads per root; `None` derives it from strategies or CPU count.
    pub workers_per_root: Option<usize>,
    /// Maximum records executed across all roots.
    pub global_limit: Option<usize>,
    /// Maximum records executed per root.
    pub per_root_limit: Option<usize>,
}

/// Logging preferences carried in the profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Level filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormatSetting,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogFormatSetting::Auto,
        }
    }
}

/// Log output format selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    /// Pretty for debug builds, JSON otherwise.
    #[default]
    Auto,
    /// Structured JSON lines.
    Json,
    /// Human-readable lines.
    Pretty,
}

impl LogFormatSetting {
    /// Render the setting as its canonical string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormatSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(ConfigError::invalid(
                "logging",
                "format",
                Some(other.to_string()),
                "unknown_format",
            )),
        }
    }
}

/// One strategy in the chain: its identifier plus flat properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineEntry {
    /// Strategy identifier (e.g. `rename`, `cleanup`).
    pub id: String,
    /// Strategy parameters.
    #[serde(default)]
    pub properties: PropertySet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() -> Result<(), ConfigError> {
        assert_eq!("JSON".parse::<LogFormatSetting>()?, LogFormatSetting::Json);
        assert_eq!(LogFormatSetting::Pretty.as_str(), "pretty");
        assert!("xml".parse::<LogFormatSetting>().is_err());
        Ok(())
    }

    #[test]
    fn scan_defaults_start_below_root() {
        let scan = ScanSettings::default();
        assert_eq!(scan.min_depth, 1);
        assert!(scan.max_depth.is_none());
        assert!(scan.extensions.is_empty());
    }
}
