//! Profile and property file IO.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineProfile;
use crate::properties::PropertySet;
use crate::validate::{ValidatedProfile, absolute_roots, validate_profile};

/// Load, validate and normalise a YAML profile from disk.
///
/// Relative roots are resolved against the current working directory.
///
/// # Errors
///
/// Returns an error when the file cannot be read, is not a valid profile
/// document, or fails validation.
pub fn load_profile(path: &Path) -> ConfigResult<ValidatedProfile> {
    let text = fs::read_to_string(path)
        .map_err(|source| ConfigError::io("profile.read", path, source))?;
    let profile: EngineProfile =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
    let mut validated = validate_profile(profile)?;
    validated.profile.roots = absolute_roots(&validated.profile);
    info!(
        path = %path.display(),
        roots = validated.profile.roots.len(),
        strategies = validated.profile.pipeline.len(),
        "profile loaded"
    );
    Ok(validated)
}

/// Parse and validate a profile held in memory.
///
/// # Errors
///
/// Returns an error when the text is not a valid profile document or fails
/// validation.
pub fn parse_profile(text: &str) -> ConfigResult<ValidatedProfile> {
    let profile: EngineProfile = serde_yaml::from_str(text)
        .map_err(|source| ConfigError::Parse { path: None, source })?;
    validate_profile(profile)
}

/// Read a `key=value` property file.
///
/// # Errors
///
/// Returns an error when the file cannot be read.
pub fn load_properties(path: &Path) -> ConfigResult<PropertySet> {
    let text = fs::read_to_string(path)
        .map_err(|source| ConfigError::io("properties.read", path, source))?;
    Ok(PropertySet::from_text(&text))
}

/// Write a `key=value` property file, creating parent directories.
///
/// # Errors
///
/// Returns an error when the directory or file cannot be written.
pub fn save_properties(path: &Path, properties: &PropertySet) -> ConfigResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|source| ConfigError::io("properties.create_parent", parent, source))?;
    }
    fs::write(path, properties.to_text())
        .map_err(|source| ConfigError::io("properties.write", path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogFormatSetting;
    use crate::properties::{pipeline_from_properties, pipeline_to_properties};

    type TestResult<T> = anyhow::Result<T>;

    const PROFILE: &str = r"
roots: [/music]
scan:
  max_depth: 4
  extensions: [MP3, .flac, cue]
execution:
  workers_per_root: 2
logging:
  format: json
pipeline:
  - id: rename
    properties:
      target: files
      rules:
        - action: replace_text
          find: _
          replace: ' '
        - action: trim
  - id: cleanup
    properties:
      mode: dedup_folders
";

    #[test]
    fn parses_full_profile() -> TestResult<()> {
        let validated = parse_profile(PROFILE)?;
        let profile = validated.profile;
        assert_eq!(profile.scan.max_depth, Some(4));
        assert_eq!(profile.scan.extensions, vec!["cue", "flac", "mp3"]);
        assert_eq!(profile.execution.workers_per_root, Some(2));
        assert_eq!(profile.logging.format, LogFormatSetting::Json);
        assert_eq!(profile.pipeline.len(), 2);
        let rules = profile.pipeline[0]
            .properties
            .get("rules")
            .ok_or_else(|| anyhow::anyhow!("rules missing"))?;
        assert!(rules.starts_with('['));
        assert!(rules.contains("replace_text"));
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_profile("roots: [/music]\nscan:\n  depth: 3\n");
        assert!(matches!(err, Err(ConfigError::Parse { path: None, .. })));
    }

    #[test]
    fn load_profile_reports_missing_file() -> TestResult<()> {
        let dir = tempfile::Builder::new()
            .prefix("reshelve-config-")
            .tempdir()?;
        let err = load_profile(&dir.path().join("missing.yaml"));
        assert!(matches!(
            err,
            Err(ConfigError::Io {
                operation: "profile.read",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn load_profile_resolves_relative_roots() -> TestResult<()> {
        let dir = tempfile::Builder::new()
            .prefix("reshelve-config-")
            .tempdir()?;
        let path = dir.path().join("profile.yaml");
        fs::write(&path, "roots: [library]\n")?;
        let validated = load_profile(&path)?;
        assert!(validated.profile.roots[0].is_absolute());
        Ok(())
    }

    #[test]
    fn properties_file_round_trips_pipeline() -> TestResult<()> {
        let dir = tempfile::Builder::new()
            .prefix("reshelve-config-")
            .tempdir()?;
        let profile = parse_profile(PROFILE)?.profile;
        let flat = pipeline_to_properties(&profile.pipeline);
        let path = dir.path().join("state").join("pipeline.properties");

        save_properties(&path, &flat)?;
        let restored = load_properties(&path)?;
        assert_eq!(pipeline_from_properties(&restored), profile.pipeline);
        Ok(())
    }
}
