//! Profile normalisation and guard rails.
//!
//! # Design
//! - Hard errors only for things that make a run meaningless (no roots, empty ids).
//! - Everything else is normalised to a safe value and reported as a warning.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineProfile;

/// Profile after normalisation, plus the guard-rail warnings that were applied.
#[derive(Debug, Clone)]
pub struct ValidatedProfile {
    /// Normalised profile.
    pub profile: EngineProfile,
    /// Human-readable notes about values that were adjusted.
    pub warnings: Vec<String>,
}

/// Validate and normalise a profile.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when no root is configured, a root is
/// blank, or a pipeline entry has an empty id.
pub fn validate_profile(mut profile: EngineProfile) -> ConfigResult<ValidatedProfile> {
    let mut warnings = Vec::new();

    if profile.roots.is_empty() {
        return Err(ConfigError::invalid("profile", "roots", None, "empty"));
    }
    let mut seen = BTreeSet::new();
    let mut roots = Vec::with_capacity(profile.roots.len());
    for root in profile.roots.drain(..) {
        if root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("profile", "roots", None, "blank_path"));
        }
        if seen.insert(root.clone()) {
            roots.push(root);
        } else {
            warnings.push(format!("duplicate root {} ignored", root.display()));
        }
    }
    profile.roots = roots;

    normalise_scan(&mut profile, &mut warnings);
    normalise_execution(&mut profile, &mut warnings);

    for (index, entry) in profile.pipeline.iter_mut().enumerate() {
        let trimmed = entry.id.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Err(ConfigError::invalid(
                "pipeline",
                &format!("{index}.id"),
                None,
                "empty",
            ));
        }
        entry.id = trimmed;
    }

    if profile.logging.level.trim().is_empty() {
        warnings.push("empty log level replaced with info".to_string());
        profile.logging.level = "info".to_string();
    }

    for warning in &warnings {
        warn!(warning = %warning, "profile normalised");
    }

    Ok(ValidatedProfile { profile, warnings })
}

fn normalise_scan(profile: &mut EngineProfile, warnings: &mut Vec<String>) {
    let scan = &mut profile.scan;
    if let Some(max) = scan.max_depth
        && scan.min_depth > max
    {
        warnings.push(format!(
            "scan.min_depth {} exceeds max_depth {max}; clamped",
            scan.min_depth
        ));
        scan.min_depth = max;
    }

    let mut extensions = BTreeSet::new();
    for raw in scan.extensions.drain(..) {
        let normalised = normalise_extension(&raw);
        if normalised.is_empty() {
            warnings.push(format!("empty extension entry '{raw}' ignored"));
        } else {
            extensions.insert(normalised);
        }
    }
    scan.extensions = extensions.into_iter().collect();

    scan.global_limit = scan.global_limit.filter(|limit| *limit > 0);
    scan.per_directory_limit = scan.per_directory_limit.filter(|limit| *limit > 0);
}

fn normalise_execution(profile: &mut EngineProfile, warnings: &mut Vec<String>) {
    let execution = &mut profile.execution;
    if execution.workers_per_root == Some(0) {
        warnings.push("execution.workers_per_root of 0 replaced with automatic sizing".into());
        execution.workers_per_root = None;
    }
    execution.global_limit = execution.global_limit.filter(|limit| *limit > 0);
    execution.per_root_limit = execution.per_root_limit.filter(|limit| *limit > 0);
}

/// Lowercase an extension and strip leading dots and whitespace.
#[must_use]
pub fn normalise_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_lowercase()
}

#[allow(clippy::redundant_pub_crate)]
pub(crate) fn absolute_roots(profile: &EngineProfile) -> Vec<PathBuf> {
    profile
        .roots
        .iter()
        .map(|root| std::path::absolute(root).unwrap_or_else(|_| root.clone()))
        .collect()
}
