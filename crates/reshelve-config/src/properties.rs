//! Flat string key/value property sets.
//!
//! # Design
//! - Strategies persist their captured parameters as flat string pairs; structured
//!   values (lists, rule chains, condition sets) are stored as JSON text.
//! - Getters never fail: an unparseable value logs a warning and yields the
//!   caller's default, so a bad property can never abort a run.
//! - The text form is one `key=value` per line with `\n`, `\r` and `\\` escaped.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::defaults::{PIPELINE_COUNT_KEY, PIPELINE_PREFIX};
use crate::model::PipelineEntry;

/// Ordered set of string properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    values: BTreeMap<String, String>,
}

impl PropertySet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Number of stored properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Store a raw string value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Store any displayable value.
    pub fn set_display(&mut self, key: impl Into<String>, value: impl Display) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Store a structured value as JSON text.
    pub fn set_json<T: Serialize>(&mut self, key: impl Into<String>, value: &T) {
        let key = key.into();
        match serde_json::to_string(value) {
            Ok(text) => {
                self.values.insert(key, text);
            }
            Err(err) => warn!(key = %key, error = %err, "failed to encode property"),
        }
    }

    /// Remove a property, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// String value or `default`.
    #[must_use]
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Boolean value (`true/false`, `1/0`, `yes/no`, `on/off`) or `default`.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                warn_fallback(key, raw, "boolean");
                default
            }
        }
    }

    /// Value parsed through [`FromStr`] or `default`.
    #[must_use]
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.get(key) else {
            return default;
        };
        raw.trim().parse().unwrap_or_else(|_| {
            warn_fallback(key, raw, std::any::type_name::<T>());
            default
        })
    }

    /// Optional parsed value; empty strings read as `None`.
    #[must_use]
    pub fn get_optional<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        if raw.trim().is_empty() {
            return None;
        }
        raw.trim().parse().map_or_else(
            |_| {
                warn_fallback(key, raw, std::any::type_name::<T>());
                None
            },
            Some,
        )
    }

    /// Structured value decoded from JSON text or `default`.
    #[must_use]
    pub fn get_json<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.get(key) else {
            return default;
        };
        if raw.trim().is_empty() {
            return default;
        }
        serde_json::from_str(raw).unwrap_or_else(|err| {
            warn!(key = %key, error = %err, "property is not valid json; using default");
            default
        })
    }

    /// List value: a JSON array, or text split on `,`, `，` and `|`.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        let Some(raw) = self.get(key) else {
            return Vec::new();
        };
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            return self.get_json(key, Vec::new());
        }
        trimmed
            .split([',', '，', '|'])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Properties below `prefix.` with the prefix stripped.
    #[must_use]
    pub fn scoped(&self, prefix: &str) -> Self {
        let lead = format!("{prefix}.");
        let values = self
            .values
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&lead)
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect();
        Self { values }
    }

    /// Copy `other` into this set below `prefix.`.
    pub fn extend_scoped(&mut self, prefix: &str, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(format!("{prefix}.{key}"), value.clone());
        }
    }

    /// Render the set as `key=value` lines.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(&escape(key));
            out.push('=');
            out.push_str(&escape(value));
            out.push('\n');
        }
        out
    }

    /// Parse `key=value` lines; blank lines and `#` comments are ignored.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let mut set = Self::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                warn!(line = index + 1, "ignoring property line without '='");
                continue;
            };
            set.values
                .insert(unescape(key.trim_end()), unescape(value));
        }
        set
    }
}

impl Serialize for PropertySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut set = Self::new();
        for (key, value) in raw {
            match value {
                Value::Null => {}
                Value::String(text) => set.set(key, text),
                Value::Bool(_) | Value::Number(_) => set.set(key, value.to_string()),
                structured @ (Value::Array(_) | Value::Object(_)) => {
                    let text = serde_json::to_string(&structured).map_err(D::Error::custom)?;
                    set.set(key, text);
                }
            }
        }
        Ok(set)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Flatten an ordered strategy chain into `pipeline.count` / `pipeline.<n>.*` keys.
#[must_use]
pub fn pipeline_to_properties(entries: &[PipelineEntry]) -> PropertySet {
    let mut set = PropertySet::new();
    set.set_display(PIPELINE_COUNT_KEY, entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let prefix = format!("{PIPELINE_PREFIX}.{index}");
        set.set(format!("{prefix}.id"), entry.id.clone());
        set.extend_scoped(&prefix, &entry.properties);
    }
    set
}

/// Rebuild a strategy chain from [`pipeline_to_properties`] output.
///
/// Entries without an id are skipped with a warning.
#[must_use]
pub fn pipeline_from_properties(set: &PropertySet) -> Vec<PipelineEntry> {
    let count: usize = set.get_parsed(PIPELINE_COUNT_KEY, 0);
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let prefix = format!("{PIPELINE_PREFIX}.{index}");
        let mut properties = set.scoped(&prefix);
        let Some(id) = properties.remove("id").filter(|id| !id.trim().is_empty()) else {
            warn!(index, "persisted pipeline entry has no strategy id; skipping");
            continue;
        };
        entries.push(PipelineEntry { id, properties });
    }
    entries
}

fn warn_fallback(key: &str, raw: &str, expected: &str) {
    warn!(
        key = %key,
        value = %raw,
        expected = expected,
        "property value could not be parsed; using default"
    );
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let set: PropertySet = [
            ("overwrite", "yes"),
            ("threads", "four"),
            ("limit", "12"),
            ("empty", " "),
        ]
        .into_iter()
        .collect();

        assert!(set.get_bool("overwrite", false));
        assert!(!set.get_bool("missing", false));
        assert_eq!(set.get_parsed("threads", 2_usize), 2);
        assert_eq!(set.get_parsed("limit", 0_usize), 12);
        assert_eq!(set.get_optional::<usize>("empty"), None);
        assert_eq!(set.get_optional::<usize>("limit"), Some(12));
    }

    #[test]
    fn lists_accept_json_and_separators() {
        let mut set = PropertySet::new();
        set.set("plain", "mp3, flac|wav，ape");
        set.set_json("json", &vec!["a,b".to_string(), "c".to_string()]);

        assert_eq!(set.get_list("plain"), vec!["mp3", "flac", "wav", "ape"]);
        assert_eq!(set.get_list("json"), vec!["a,b", "c"]);
        assert!(set.get_list("missing").is_empty());
    }

    #[test]
    fn text_form_round_trips_escapes() {
        let mut set = PropertySet::new();
        set.set("rules", "line one\nline two = \\ end");
        set.set("name", "Trash");

        let text = set.to_text();
        assert!(text.contains("name=Trash\n"));
        let parsed = PropertySet::from_text(&format!("# saved\n\n{text}"));
        assert_eq!(parsed, set);
    }

    #[test]
    fn pipeline_layout_uses_indexed_keys() {
        let mut rename = PropertySet::new();
        rename.set("target", "files");
        let entries = vec![
            PipelineEntry {
                id: "rename".into(),
                properties: rename,
            },
            PipelineEntry {
                id: "cleanup".into(),
                properties: PropertySet::new(),
            },
        ];

        let flat = pipeline_to_properties(&entries);
        assert_eq!(flat.get("pipeline.count"), Some("2"));
        assert_eq!(flat.get("pipeline.0.id"), Some("rename"));
        assert_eq!(flat.get("pipeline.0.target"), Some("files"));
        assert_eq!(flat.get("pipeline.1.id"), Some("cleanup"));

        assert_eq!(pipeline_from_properties(&flat), entries);
    }

    #[test]
    fn pipeline_entries_without_id_are_skipped() {
        let set: PropertySet = [
            ("pipeline.count", "2"),
            ("pipeline.0.target", "files"),
            ("pipeline.1.id", "convert"),
        ]
        .into_iter()
        .collect();

        let entries = pipeline_from_properties(&set);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "convert");
    }

    #[test]
    fn structured_values_deserialize_as_json_text() -> TestResult<()> {
        let set: PropertySet = serde_yaml::from_str(
            "overwrite: true\nthreads: 2\nrules:\n  - action: trim\nnothing: ~\n",
        )?;
        assert_eq!(set.get("overwrite"), Some("true"));
        assert_eq!(set.get("threads"), Some("2"));
        assert_eq!(set.get("rules"), Some(r#"[{"action":"trim"}]"#));
        assert!(!set.contains("nothing"));
        Ok(())
    }
}
