//! Derive tags from the folder layout and write them through the encoder.
//!
//! # Design
//! - A template such as `{artist}/{album}/{track} - {title}` is matched against
//!   the tail of the record's virtual path relative to its root, extension removed.
//! - Matched fields land in `meta_*` parameters. Untouched audio becomes an
//!   ENRICH record written in place with stream copy; audio already headed for
//!   conversion or splitting carries the tags into that encode instead.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use reshelve_config::PropertySet;
use tracing::{debug, warn};

use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, META_PREFIX, Strategy, StrategyConfig,
    TargetType, map_records, tag_params,
};
use crate::condition::{ConditionSet, extension_of, is_audio_extension};
use crate::encoder::{EncodeJob, Encoder, EncoderSettings};
use crate::error::{EngineError, EngineResult};
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "tag";

const DEFAULT_TEMPLATE: &str = "{artist}/{album}/{track} - {title}";

/// Compile a path template into an end-anchored regex.
///
/// # Errors
///
/// Returns [`EngineError::InvalidInput`] for unbalanced braces, invalid field
/// names or a template without fields.
pub fn compile_template(template: &str) -> EngineResult<Regex> {
    let mut pattern = String::from("(?:^|/)");
    let mut seen: Vec<String> = Vec::new();
    let mut rest = template.trim().trim_matches('/');

    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| EngineError::invalid("template", "unbalanced_brace", template))?;
        let field = after[..close].trim().to_ascii_lowercase();
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(EngineError::invalid("template", "invalid_field", template));
        }
        if seen.contains(&field) {
            pattern.push_str("[^/]+?");
        } else {
            pattern.push_str(&format!("(?P<{field}>[^/]+?)"));
            seen.push(field);
        }
        rest = &after[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    if seen.is_empty() {
        return Err(EngineError::invalid("template", "no_fields", template));
    }
    Regex::new(&pattern).map_err(|_| EngineError::invalid("template", "invalid_pattern", template))
}

/// Fields captured from `relative` (a `/`-separated path without extension).
fn capture_fields(pattern: &Regex, relative: &str) -> BTreeMap<String, String> {
    let Some(captures) = pattern.captures(relative) else {
        return BTreeMap::new();
    };
    pattern
        .capture_names()
        .flatten()
        .filter_map(|name| {
            captures
                .name(name)
                .map(|value| (name.to_string(), value.as_str().trim().to_string()))
        })
        .filter(|(_, value)| !value.is_empty())
        .collect()
}

/// Root-relative path with `/` separators and the extension dropped.
fn relative_stem(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    let last = parts.pop()?;
    let stem = last.rsplit_once('.').map_or(last.as_str(), |(stem, _)| stem).to_string();
    parts.push(stem);
    Some(parts.join("/"))
}

/// User options for the tag strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConfig {
    /// Path template with `{field}` placeholders.
    pub template: String,
    /// Tags written regardless of the template.
    pub fixed: BTreeMap<String, String>,
    /// Encoder process settings.
    pub encoder: EncoderSettings,
    /// Filter selecting files to tag.
    pub conditions: ConditionSet,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            fixed: BTreeMap::new(),
            encoder: EncoderSettings::default(),
            conditions: ConditionSet::default(),
        }
    }
}

impl TagConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self {
            template: properties.get_string("template", DEFAULT_TEMPLATE),
            fixed: properties.get_json("fixed", BTreeMap::new()),
            encoder: EncoderSettings::from_properties(properties),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for TagConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        let pattern = match compile_template(&self.template) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!(template = %self.template, error = %err.detail(), "tag template ignored");
                None
            }
        };
        Arc::new(TagStrategy {
            pattern,
            encoder: Encoder::new(self.encoder.clone()),
            config: self.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set("template", self.template.as_str());
        if !self.fixed.is_empty() {
            properties.set_json("fixed", &self.fixed);
        }
        self.encoder.write_properties(&mut properties);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

/// Captured tag strategy.
pub struct TagStrategy {
    config: TagConfig,
    pattern: Option<Regex>,
    encoder: Encoder,
}

impl TagStrategy {
    fn apply(&self, record: &mut ChangeRecord, ctx: &AnalyzeContext<'_>) {
        let audio = extension_of(&record.new_name).is_some_and(|ext| is_audio_extension(&ext));
        if !audio || !self.config.conditions.test(&record.subject()) {
            return;
        }
        let mut tags = self.config.fixed.clone();
        if let (Some(pattern), Some(root)) = (&self.pattern, ctx.root_of(&record.source_path))
            && let Some(relative) = relative_stem(&record.new_path, root)
        {
            tags.extend(capture_fields(pattern, &relative));
        }
        if tags.is_empty() {
            return;
        }
        match record.operation {
            OperationKind::None => {
                let target = record.new_path.clone();
                record.assign(OperationKind::Enrich, target);
            }
            OperationKind::Enrich | OperationKind::Convert | OperationKind::Split => {}
            other => {
                debug!(
                    record_id = %record.id,
                    operation = other.as_str(),
                    "tagging skipped for record with a pending file operation"
                );
                return;
            }
        }
        for (field, value) in tags {
            record.set_param(&format!("{META_PREFIX}{field}"), value);
        }
    }
}

impl Strategy for TagStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        TargetType::FilesOnly
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Enrich]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        map_records(records, ctx, |record| {
            self.apply(record, ctx);
            Ok(())
        })
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        let metadata = tag_params(record);
        if metadata.is_empty() {
            return Ok(ExecuteOutcome::Skipped("no tags to write".to_string()));
        }
        let job = EncodeJob {
            input: record.source_path.clone(),
            output: record.new_path.clone(),
            codec_args: vec!["-c".to_string(), "copy".to_string()],
            metadata,
            map_metadata: true,
            ..EncodeJob::default()
        };
        self.encoder.run(&job, ctx.cancel)?;
        Ok(ExecuteOutcome::Applied)
    }
}
