//! Rule conditions evaluated against a record's virtual name and path.
//!
//! # Design
//! - Conditions are pure predicates over a borrowed [`Subject`]; they never touch disk.
//! - Invalid configuration never errors: a bad regex or glob never matches, an
//!   unparseable size threshold reads as zero and an empty extension list never
//!   matches `extension_in`.
//! - Compiled matchers are cached per condition so rayon workers share them.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

const MIB: f64 = 1024.0 * 1024.0;

/// Extensions treated as audio.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "m4a", "ape", "dsf", "dff", "dts", "ogg", "wma", "aac", "alac", "opus",
    "tak", "tta", "wv",
];

/// Extensions treated as archives.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "tar", "gz", "jar", "xz", "bz2", "iso"];

/// Lowercased extension of a file name, without the dot.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Whether the lowercased extension names an audio format.
#[must_use]
pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext)
}

/// Whether the lowercased extension names an archive format.
#[must_use]
pub fn is_archive_extension(ext: &str) -> bool {
    ARCHIVE_EXTENSIONS.contains(&ext)
}

/// Borrowed view of the state a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    /// Current (virtual) entry name.
    pub name: &'a str,
    /// Current (virtual) entry path.
    pub path: &'a Path,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Scan-time size in bytes.
    pub size: u64,
}

impl Subject<'_> {
    fn extension(&self) -> Option<String> {
        if self.is_dir {
            None
        } else {
            extension_of(self.name)
        }
    }
}

/// Predicate kinds understood by [`RuleCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Name contains the value.
    Contains,
    /// Name does not contain the value.
    NotContains,
    /// Name starts with the value.
    StartsWith,
    /// Name ends with the value.
    EndsWith,
    /// Name matches the regular expression.
    RegexMatch,
    /// Size is strictly above the value (MiB).
    SizeAbove,
    /// Size is strictly below the value (MiB).
    SizeBelow,
    /// Name of the parent directory equals the value.
    ParentDirIs,
    /// Full path contains the value.
    PathContains,
    /// Full path does not contain the value.
    PathNotContains,
    /// Full path matches the glob.
    PathGlob,
    /// Extension is one of the listed values.
    ExtensionIn,
    /// Extension is none of the listed values.
    ExtensionNotIn,
    /// Entry is an audio file.
    IsAudio,
    /// Entry is not an audio file.
    IsNotAudio,
    /// Entry is an archive file.
    IsArchive,
    /// Entry is not an archive file.
    IsNotArchive,
    /// Entry is a directory.
    IsDirectory,
    /// Entry is a file.
    IsFile,
}

impl ConditionKind {
    /// Canonical snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::RegexMatch => "regex_match",
            Self::SizeAbove => "size_above",
            Self::SizeBelow => "size_below",
            Self::ParentDirIs => "parent_dir_is",
            Self::PathContains => "path_contains",
            Self::PathNotContains => "path_not_contains",
            Self::PathGlob => "path_glob",
            Self::ExtensionIn => "extension_in",
            Self::ExtensionNotIn => "extension_not_in",
            Self::IsAudio => "is_audio",
            Self::IsNotAudio => "is_not_audio",
            Self::IsArchive => "is_archive",
            Self::IsNotArchive => "is_not_archive",
            Self::IsDirectory => "is_directory",
            Self::IsFile => "is_file",
        }
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Regex(Option<Regex>),
    Glob(Option<GlobMatcher>),
    Extensions(Vec<String>),
    Threshold(u64),
    Lowered(String),
}

/// One `{kind, value}` predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Predicate kind.
    pub kind: ConditionKind,
    /// Predicate argument; ignored by the type predicates.
    #[serde(default)]
    pub value: String,
    #[serde(skip)]
    compiled: OnceCell<Compiled>,
}

impl PartialEq for RuleCondition {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

impl Eq for RuleCondition {}

impl RuleCondition {
    /// Build a condition.
    #[must_use]
    pub fn new(kind: ConditionKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            compiled: OnceCell::new(),
        }
    }

    /// Evaluate the condition.
    #[must_use]
    pub fn test(&self, subject: &Subject<'_>) -> bool {
        let name = subject.name.to_lowercase();
        match (self.kind, self.compiled()) {
            (ConditionKind::Contains, Compiled::Lowered(value)) => name.contains(value.as_str()),
            (ConditionKind::NotContains, Compiled::Lowered(value)) => {
                !name.contains(value.as_str())
            }
            (ConditionKind::StartsWith, Compiled::Lowered(value)) => {
                name.starts_with(value.as_str())
            }
            (ConditionKind::EndsWith, Compiled::Lowered(value)) => name.ends_with(value.as_str()),
            (ConditionKind::ParentDirIs, Compiled::Lowered(value)) => subject
                .path
                .parent()
                .and_then(Path::file_name)
                .is_some_and(|parent| parent.to_string_lossy().to_lowercase() == *value),
            (ConditionKind::PathContains, Compiled::Lowered(value)) => subject
                .path
                .to_string_lossy()
                .to_lowercase()
                .contains(value.as_str()),
            (ConditionKind::PathNotContains, Compiled::Lowered(value)) => !subject
                .path
                .to_string_lossy()
                .to_lowercase()
                .contains(value.as_str()),
            (ConditionKind::RegexMatch, Compiled::Regex(regex)) => regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(subject.name)),
            (ConditionKind::PathGlob, Compiled::Glob(glob)) => glob
                .as_ref()
                .is_some_and(|glob| glob.is_match(subject.path)),
            (ConditionKind::SizeAbove, Compiled::Threshold(bytes)) => subject.size > *bytes,
            (ConditionKind::SizeBelow, Compiled::Threshold(bytes)) => subject.size < *bytes,
            (ConditionKind::ExtensionIn, Compiled::Extensions(list)) => subject
                .extension()
                .is_some_and(|ext| list.iter().any(|item| *item == ext)),
            (ConditionKind::ExtensionNotIn, Compiled::Extensions(list)) => !subject
                .extension()
                .is_some_and(|ext| list.iter().any(|item| *item == ext)),
            (ConditionKind::IsAudio, _) => subject
                .extension()
                .is_some_and(|ext| is_audio_extension(&ext)),
            (ConditionKind::IsNotAudio, _) => !subject
                .extension()
                .is_some_and(|ext| is_audio_extension(&ext)),
            (ConditionKind::IsArchive, _) => subject
                .extension()
                .is_some_and(|ext| is_archive_extension(&ext)),
            (ConditionKind::IsNotArchive, _) => !subject
                .extension()
                .is_some_and(|ext| is_archive_extension(&ext)),
            (ConditionKind::IsDirectory, _) => subject.is_dir,
            (ConditionKind::IsFile, _) => !subject.is_dir,
            _ => false,
        }
    }

    fn compiled(&self) -> &Compiled {
        self.compiled.get_or_init(|| self.compile())
    }

    fn compile(&self) -> Compiled {
        match self.kind {
            ConditionKind::RegexMatch => Compiled::Regex(
                RegexBuilder::new(&self.value)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| {
                        warn!(pattern = %self.value, error = %err, "invalid regex condition never matches");
                    })
                    .ok(),
            ),
            ConditionKind::PathGlob => Compiled::Glob(
                GlobBuilder::new(&self.value)
                    .case_insensitive(true)
                    .build()
                    .map(|glob| glob.compile_matcher())
                    .map_err(|err| {
                        warn!(pattern = %self.value, error = %err, "invalid glob condition never matches");
                    })
                    .ok(),
            ),
            ConditionKind::ExtensionIn | ConditionKind::ExtensionNotIn => {
                Compiled::Extensions(parse_extension_list(&self.value))
            }
            ConditionKind::SizeAbove | ConditionKind::SizeBelow => {
                Compiled::Threshold(parse_mebibytes(&self.value))
            }
            _ => Compiled::Lowered(self.value.to_lowercase()),
        }
    }
}

/// Split an extension list on `,`, `，` and `|`, stripping dots and case.
#[must_use]
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split([',', '，', '|'])
        .map(|item| item.trim().trim_start_matches('.').to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn parse_mebibytes(raw: &str) -> u64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => (value * MIB) as u64,
        Ok(_) => 0,
        Err(_) => {
            warn!(value = %raw, "size threshold is not a number; treating it as zero");
            0
        }
    }
}

/// AND of conditions; an empty group passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionGroup {
    /// Conditions that must all hold.
    pub conditions: Vec<RuleCondition>,
}

impl ConditionGroup {
    /// Build a group from conditions.
    #[must_use]
    pub const fn new(conditions: Vec<RuleCondition>) -> Self {
        Self { conditions }
    }

    /// Whether the group has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate every condition.
    #[must_use]
    pub fn test(&self, subject: &Subject<'_>) -> bool {
        self.conditions.iter().all(|condition| condition.test(subject))
    }
}

/// OR-groups combined with AND-globals, evaluated as an OR of AND-groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionSet {
    /// Alternatives; any one passing (together with the globals) suffices.
    pub groups: Vec<ConditionGroup>,
    /// Conditions appended to every group.
    pub globals: ConditionGroup,
}

impl ConditionSet {
    /// Whether the set passes everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(ConditionGroup::is_empty) && self.globals.is_empty()
    }

    /// Evaluate the set.
    #[must_use]
    pub fn test(&self, subject: &Subject<'_>) -> bool {
        if !self.globals.test(subject) {
            return false;
        }
        self.groups.is_empty() || self.groups.iter().any(|group| group.test(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(path: &str, size: u64) -> (PathBuf, u64) {
        (PathBuf::from(path), size)
    }

    fn check(kind: ConditionKind, value: &str, path: &str, size: u64, is_dir: bool) -> bool {
        let (path, size) = file(path, size);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        RuleCondition::new(kind, value).test(&Subject {
            name: &name,
            path: &path,
            is_dir,
            size,
        })
    }

    #[test]
    fn text_conditions_ignore_case() {
        assert!(check(ConditionKind::Contains, "LIVE", "/m/Live At Home.flac", 0, false));
        assert!(check(ConditionKind::StartsWith, "live", "/m/Live.flac", 0, false));
        assert!(check(ConditionKind::EndsWith, ".FLAC", "/m/a.flac", 0, false));
        assert!(check(ConditionKind::NotContains, "demo", "/m/a.flac", 0, false));
        assert!(check(ConditionKind::ParentDirIs, "disc 1", "/m/Disc 1/a.flac", 0, false));
        assert!(check(ConditionKind::PathContains, "/DISC", "/m/Disc 1/a.flac", 0, false));
        assert!(!check(ConditionKind::PathNotContains, "disc", "/m/Disc 1/a.flac", 0, false));
    }

    #[test]
    fn invalid_patterns_never_match() {
        assert!(!check(ConditionKind::RegexMatch, "(unclosed", "/m/a.flac", 0, false));
        assert!(!check(ConditionKind::PathGlob, "[", "/m/a.flac", 0, false));
        assert!(check(ConditionKind::RegexMatch, r"^\d+ - ", "/m/01 - x.flac", 0, false));
        assert!(check(ConditionKind::PathGlob, "**/*.FLAC", "/m/x/a.flac", 0, false));
    }

    #[test]
    fn size_thresholds_use_mebibytes() {
        let two_mib = 2 * 1024 * 1024;
        assert!(check(ConditionKind::SizeAbove, "1.5", "/m/a.flac", two_mib, false));
        assert!(!check(ConditionKind::SizeBelow, "1", "/m/a.flac", two_mib, false));
        assert!(check(ConditionKind::SizeAbove, "huge", "/m/a.flac", 1, false));
    }

    #[test]
    fn extension_lists_split_on_every_separator() {
        assert!(check(ConditionKind::ExtensionIn, ".MP3，flac|wav", "/m/a.FLAC", 0, false));
        assert!(!check(ConditionKind::ExtensionIn, "", "/m/a.flac", 0, false));
        assert!(check(ConditionKind::ExtensionNotIn, "", "/m/a.flac", 0, false));
        assert!(check(ConditionKind::ExtensionNotIn, "mp3", "/m/a.flac", 0, false));
    }

    #[test]
    fn type_predicates_respect_directories() {
        assert!(check(ConditionKind::IsAudio, "", "/m/a.opus", 0, false));
        assert!(!check(ConditionKind::IsAudio, "", "/m/a.flac", 0, true));
        assert!(check(ConditionKind::IsNotAudio, "", "/m/a.flac", 0, true));
        assert!(check(ConditionKind::IsArchive, "", "/m/a.7z", 0, false));
        assert!(check(ConditionKind::IsNotArchive, "", "/m/a.flac", 0, false));
        assert!(check(ConditionKind::IsDirectory, "", "/m/a", 0, true));
        assert!(check(ConditionKind::IsFile, "", "/m/a", 0, false));
    }

    #[test]
    fn condition_set_is_or_of_and_groups() -> Result<(), serde_json::Error> {
        let set: ConditionSet = serde_json::from_str(
            r#"{
                "groups": [
                    [{"kind": "extension_in", "value": "flac"}],
                    [{"kind": "contains", "value": "live"}]
                ],
                "globals": [{"kind": "is_file"}]
            }"#,
        )?;
        let path = PathBuf::from("/m/live.mp3");
        let subject = Subject {
            name: "live.mp3",
            path: &path,
            is_dir: false,
            size: 0,
        };
        assert!(set.test(&subject));
        let dir = Subject {
            is_dir: true,
            ..subject
        };
        assert!(!set.test(&dir));
        assert!(ConditionSet::default().test(&dir));
        assert!(ConditionSet::default().is_empty());
        Ok(())
    }

    #[test]
    fn kind_names_match_serde() -> Result<(), serde_json::Error> {
        let encoded = serde_json::to_string(&ConditionKind::PathNotContains)?;
        assert_eq!(encoded, format!("\"{}\"", ConditionKind::PathNotContains.as_str()));
        Ok(())
    }
}
