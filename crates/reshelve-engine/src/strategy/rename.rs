//! Rule-chain renaming.
//!
//! # Design
//! - Rules apply left to right to the current virtual name; each is gated by its
//!   own condition group evaluated against the intermediate name.
//! - A rule targets the stem, the extension or the whole name; directories
//!   always use the whole name.
//! - A rule that cannot run (bad regex) leaves the name as it was.
//! - A result containing `/` moves the entry relative to its directory.
//! - Empty names and collisions inside one directory are SKIPPED, not applied.

use std::sync::Arc;

use deunicode::{deunicode, deunicode_char};
use once_cell::sync::Lazy;
use regex::Regex;
use reshelve_config::PropertySet;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::location::normalise;
use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    map_records, reject_collisions, target_from_properties, virtual_paths,
};
use crate::condition::{ConditionGroup, ConditionSet, Subject};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "rename";

const DEFAULT_LETTER_SEPARATOR: &str = " - ";

static RELEASE_TAGS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\[(mqms|flac|mp3|wav|cue|log|iso|ape|dsf|dff).*?\]").ok()
});
static EDGE_PUNCTUATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*[-_.]+\s*|\s*[-_.]+\s*$").ok());

fn default_separator() -> String {
    DEFAULT_LETTER_SEPARATOR.to_string()
}

/// One transformation of a name fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenameAction {
    /// Replace every literal occurrence of `find`.
    ReplaceText {
        /// Text to find.
        find: String,
        /// Replacement.
        #[serde(default)]
        replace: String,
    },
    /// Replace every regex match; `$1` style groups are expanded.
    ReplaceRegex {
        /// Pattern to match.
        pattern: String,
        /// Replacement template.
        #[serde(default)]
        replace: String,
    },
    /// Add text in front.
    Prepend {
        /// Text to add.
        text: String,
    },
    /// Add text at the end.
    Append {
        /// Text to add.
        text: String,
    },
    /// Lower-case everything.
    ToLower,
    /// Upper-case everything.
    ToUpper,
    /// Strip surrounding whitespace.
    Trim,
    /// Prefix the upper-cased first letter (transliterated to Latin) and a separator.
    LetterPrefix {
        /// Separator placed after the letter.
        #[serde(default = "default_separator")]
        separator: String,
        /// Leading text ignored when picking the letter (e.g. `The `).
        #[serde(default)]
        skip: String,
    },
    /// Strip release tags, `《》`, listed noise words and redundant whitespace.
    CleanNoise {
        /// Extra words separated by `,`, `，` or `、`.
        #[serde(default)]
        words: String,
    },
    /// Remove every whitespace-separated item.
    BatchRemove {
        /// Items to remove.
        items: String,
    },
    /// Drop the first `count` characters.
    CutPrefix {
        /// Character count.
        count: usize,
    },
    /// Drop the last `count` characters.
    CutSuffix {
        /// Character count.
        count: usize,
    },
    /// Keep only the first `count` characters.
    KeepPrefix {
        /// Character count.
        count: usize,
    },
    /// Keep only the last `count` characters.
    KeepSuffix {
        /// Character count.
        count: usize,
    },
    /// Remove a literal leading text.
    RemovePrefix {
        /// Text to remove.
        text: String,
    },
    /// Remove a literal trailing text.
    RemoveSuffix {
        /// Text to remove.
        text: String,
    },
    /// Transliterate to ASCII.
    Transliterate,
}

/// Part of the name a rule rewrites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePart {
    /// Name without its extension.
    #[default]
    Stem,
    /// Extension without the dot.
    Extension,
    /// Entire name.
    Whole,
}

/// Action plus its scope and gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    /// What to do.
    pub action: RenameAction,
    /// Which part of the name to rewrite.
    #[serde(default)]
    pub part: NamePart,
    /// Conditions that must hold for the rule to run.
    #[serde(default)]
    pub conditions: ConditionGroup,
}

impl RenameRule {
    /// Unconditional rule over the stem.
    #[must_use]
    pub fn new(action: RenameAction) -> Self {
        Self {
            action,
            part: NamePart::Stem,
            conditions: ConditionGroup::default(),
        }
    }
}

/// User options for the rename strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameConfig {
    /// Rule chain.
    pub rules: Vec<RenameRule>,
    /// Entry kinds to rename.
    pub target: TargetType,
    /// Filter selecting records to rename.
    pub conditions: ConditionSet,
}

impl RenameConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self {
            rules: properties.get_json("rules", Vec::new()),
            target: target_from_properties(properties, TargetType::FilesOnly),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for RenameConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        let rules = self
            .rules
            .iter()
            .map(|rule| PreparedRule {
                regex: match &rule.action {
                    RenameAction::ReplaceRegex { pattern, .. } => Regex::new(pattern)
                        .map_err(|err| {
                            warn!(pattern = %pattern, error = %err, "rename regex is invalid; rule is skipped");
                        })
                        .ok(),
                    _ => None,
                },
                rule: rule.clone(),
            })
            .collect();
        Arc::new(RenameStrategy {
            rules,
            target: self.target,
            conditions: self.conditions.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set_json("rules", &self.rules);
        properties.set_display("target", self.target);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

struct PreparedRule {
    rule: RenameRule,
    regex: Option<Regex>,
}

/// Captured rename strategy.
pub struct RenameStrategy {
    rules: Vec<PreparedRule>,
    target: TargetType,
    conditions: ConditionSet,
}

impl RenameStrategy {
    fn rename(&self, record: &ChangeRecord) -> String {
        let dir = record.virtual_dir().to_path_buf();
        let mut name = record.new_name.clone();
        for prepared in &self.rules {
            let path = dir.join(&name);
            let subject = Subject {
                name: &name,
                path: &path,
                is_dir: record.attrs.is_dir,
                size: record.attrs.size,
            };
            if !prepared.rule.conditions.test(&subject) {
                continue;
            }
            let part = if record.attrs.is_dir {
                NamePart::Whole
            } else {
                prepared.rule.part
            };
            if let Some(next) = apply_to_part(&name, part, |text| prepared.apply(text)) {
                name = next;
            }
        }
        name
    }

    fn apply(&self, record: &mut ChangeRecord) {
        if !self.conditions.test(&record.subject()) {
            return;
        }
        let renamed = self.rename(record);
        if renamed == record.new_name {
            return;
        }
        let leaf = renamed.rsplit('/').next().unwrap_or_default();
        let emptied_stem =
            !record.attrs.is_dir && stem_is_empty(leaf) && !stem_is_empty(&record.new_name);
        if renamed.trim().is_empty()
            || renamed.split('/').any(|segment| segment.trim().is_empty())
            || emptied_stem
        {
            record.skip(format!("rename of {} produced an empty name", record.new_name));
            return;
        }
        if renamed.contains('/') {
            let target = normalise(&record.virtual_dir().join(&renamed));
            let operation = match record.operation {
                OperationKind::None | OperationKind::Rename => OperationKind::Move,
                other => other,
            };
            record.assign(operation, target);
        } else {
            record.rename_to(&renamed);
        }
    }
}

/// Whether a file name is only an extension, e.g. `.mp3`.
fn stem_is_empty(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, _)| stem.trim().is_empty())
}

impl PreparedRule {
    fn apply(&self, text: &str) -> Option<String> {
        let out = match &self.rule.action {
            RenameAction::ReplaceText { find, replace } => {
                if find.is_empty() {
                    return None;
                }
                text.replace(find.as_str(), replace)
            }
            RenameAction::ReplaceRegex { replace, .. } => self
                .regex
                .as_ref()?
                .replace_all(text, replace.as_str())
                .into_owned(),
            RenameAction::Prepend { text: prefix } => format!("{prefix}{text}"),
            RenameAction::Append { text: suffix } => format!("{text}{suffix}"),
            RenameAction::ToLower => text.to_lowercase(),
            RenameAction::ToUpper => text.to_uppercase(),
            RenameAction::Trim => text.trim().to_string(),
            RenameAction::LetterPrefix { separator, skip } => letter_prefix(text, separator, skip)?,
            RenameAction::CleanNoise { words } => clean_noise(text, words),
            RenameAction::BatchRemove { items } => items
                .split_whitespace()
                .fold(text.to_string(), |acc, item| acc.replace(item, ""))
                .trim()
                .to_string(),
            RenameAction::CutPrefix { count } => text.chars().skip(*count).collect(),
            RenameAction::CutSuffix { count } => {
                let keep = text.chars().count().saturating_sub(*count);
                text.chars().take(keep).collect()
            }
            RenameAction::KeepPrefix { count } => text.chars().take(*count).collect(),
            RenameAction::KeepSuffix { count } => {
                let skip = text.chars().count().saturating_sub(*count);
                text.chars().skip(skip).collect()
            }
            RenameAction::RemovePrefix { text: prefix } => {
                text.strip_prefix(prefix.as_str()).unwrap_or(text).to_string()
            }
            RenameAction::RemoveSuffix { text: suffix } => {
                text.strip_suffix(suffix.as_str()).unwrap_or(text).to_string()
            }
            RenameAction::Transliterate => deunicode(text),
        };
        Some(out)
    }
}

/// Apply `rewrite` to one part of `name`; `None` when the part is absent or the
/// rewrite declined.
fn apply_to_part<F>(name: &str, part: NamePart, rewrite: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let split = name.rfind('.').filter(|index| *index > 0);
    match (part, split) {
        (NamePart::Whole, _) | (NamePart::Stem, None) => rewrite(name),
        (NamePart::Stem, Some(index)) => {
            let stem = rewrite(&name[..index])?;
            Some(format!("{stem}{}", &name[index..]))
        }
        (NamePart::Extension, Some(index)) => {
            let ext = rewrite(&name[index + 1..])?;
            if ext.is_empty() {
                Some(name[..index].to_string())
            } else {
                Some(format!("{}.{ext}", &name[..index]))
            }
        }
        (NamePart::Extension, None) => None,
    }
}

fn letter_prefix(text: &str, separator: &str, skip: &str) -> Option<String> {
    let separator = if separator.is_empty() {
        DEFAULT_LETTER_SEPARATOR
    } else {
        separator
    };
    let mut core = text;
    if !skip.is_empty()
        && text.to_lowercase().starts_with(&skip.to_lowercase())
        && text.is_char_boundary(skip.len())
    {
        core = text[skip.len()..].trim_start();
    }
    let first = core.chars().find(|c| c.is_alphanumeric())?;
    if !first.is_alphabetic() {
        return None;
    }
    let letter = deunicode_char(first)?
        .chars()
        .find(char::is_ascii_alphabetic)?
        .to_ascii_uppercase();
    let prefix = format!("{letter}{separator}");
    if text.starts_with(&prefix) {
        return None;
    }
    Some(format!("{prefix}{text}"))
}

fn clean_noise(text: &str, words: &str) -> String {
    let mut out = match RELEASE_TAGS.as_ref() {
        Some(regex) => regex.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    out = out.replace(['《', '》'], "");
    for word in words.split([',', '，', '、']).map(str::trim) {
        if !word.is_empty() {
            out = out.replace(word, "");
        }
    }
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(regex) = EDGE_PUNCTUATION.as_ref() {
        out = regex.replace_all(&out, "").into_owned();
    }
    out
}

impl Strategy for RenameStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        self.target
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Rename, OperationKind::Move]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let before = virtual_paths(&records);
        let mut records = map_records(records, ctx, |record| {
            self.apply(record);
            Ok(())
        });
        reject_collisions(&mut records, &before, false);
        records
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        _ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        match record.operation {
            OperationKind::Rename => {
                fsops::rename_entry(&record.source_path, &record.new_path, false)?;
            }
            OperationKind::Move => {
                if record.new_path.exists() {
                    return Err(EngineError::TargetExists {
                        path: record.new_path.clone(),
                    });
                }
                fsops::move_tree(&record.source_path, &record.new_path)?;
            }
            other => {
                return Err(EngineError::Unsupported {
                    operation: "rename.execute",
                    value: Some(other.as_str().to_string()),
                });
            }
        }
        Ok(ExecuteOutcome::Applied)
    }
}
