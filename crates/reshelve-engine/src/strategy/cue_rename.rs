//! Rename cue sheets together with their audio image.
//!
//! # Design
//! - A cue sheet pairs with the audio file in the same directory that shares
//!   its stem; only single-`FILE` sheets take part.
//! - Pairs in one directory are numbered in case-insensitive stem order; a lone
//!   pair takes the base name as is, otherwise `<base>disk(<n>)`.
//! - Executing the cue record rewrites its `FILE` line to the audio's new name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reshelve_config::PropertySet;
use tracing::{debug, warn};

use super::cue::read_cue;
use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    reject_collisions, virtual_paths,
};
use crate::condition::{ConditionSet, extension_of, is_audio_extension};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "cue_rename";

const DEFAULT_BASE_NAME: &str = "album";
const AUDIO_NAME_PARAM: &str = "cue_audio_name";

static FILE_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?im)^([ \t]*)FILE[ \t]+.*?[ \t]+([A-Za-z0-9]+)[ \t]*(\r?)$").ok()
});

/// User options for the cue rename strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueRenameConfig {
    /// Stem given to every pair.
    pub base_name: String,
    /// Replace existing entries with the new names.
    pub overwrite: bool,
    /// Filter selecting cue sheets.
    pub conditions: ConditionSet,
}

impl Default for CueRenameConfig {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_BASE_NAME.to_string(),
            overwrite: false,
            conditions: ConditionSet::default(),
        }
    }
}

impl CueRenameConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        let base_name = properties.get_string("base_name", DEFAULT_BASE_NAME);
        Self {
            base_name: if base_name.trim().is_empty() {
                DEFAULT_BASE_NAME.to_string()
            } else {
                base_name.trim().to_string()
            },
            overwrite: properties.get_bool("overwrite", false),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for CueRenameConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        Arc::new(CueRenameStrategy {
            config: self.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set("base_name", self.base_name.as_str());
        properties.set_display("overwrite", self.overwrite);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

/// Captured cue rename strategy.
pub struct CueRenameStrategy {
    config: CueRenameConfig,
}

/// Cue and audio record indices sharing a stem.
struct Pair {
    stem: String,
    cue: usize,
    audio: usize,
}

impl CueRenameStrategy {
    fn eligible(record: &ChangeRecord) -> bool {
        !record.is_terminal()
            && !record.attrs.is_dir
            && matches!(record.operation, OperationKind::None | OperationKind::Rename)
    }

    fn single_file_sheet(record: &ChangeRecord) -> bool {
        match read_cue(&record.source_path) {
            Ok(sheet) => sheet.files.len() == 1,
            Err(err) => {
                warn!(
                    record_id = %record.id,
                    path = %record.source_path.display(),
                    error = %err.detail(),
                    "cue sheet unreadable"
                );
                false
            }
        }
    }

    fn pairs(&self, records: &[ChangeRecord], indices: &[usize]) -> Vec<Pair> {
        let mut cues: BTreeMap<&str, usize> = BTreeMap::new();
        let mut audio: BTreeMap<&str, usize> = BTreeMap::new();
        for &index in indices {
            let record = &records[index];
            let Some((stem, _)) = record.new_name.rsplit_once('.') else {
                continue;
            };
            match extension_of(&record.new_name).as_deref() {
                Some("cue") => {
                    if self.config.conditions.test(&record.subject())
                        && Self::single_file_sheet(record)
                    {
                        cues.insert(stem, index);
                    }
                }
                Some(ext) if is_audio_extension(ext) => {
                    audio.entry(stem).or_insert(index);
                }
                _ => {}
            }
        }
        let mut pairs: Vec<Pair> = cues
            .into_iter()
            .filter_map(|(stem, cue)| {
                audio.get(stem).map(|&audio| Pair {
                    stem: stem.to_string(),
                    cue,
                    audio,
                })
            })
            .collect();
        pairs.sort_by(|a, b| {
            a.stem
                .to_lowercase()
                .cmp(&b.stem.to_lowercase())
                .then_with(|| a.stem.cmp(&b.stem))
        });
        pairs
    }

    fn rename_pairs(&self, records: &mut [ChangeRecord], pairs: &[Pair]) {
        for (number, pair) in pairs.iter().enumerate() {
            let stem = if pairs.len() == 1 {
                self.config.base_name.clone()
            } else {
                format!("{}disk({})", self.config.base_name, number + 1)
            };
            if stem == pair.stem {
                continue;
            }
            let audio_ext = records[pair.audio]
                .new_name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_default();
            let audio_name = format!("{stem}.{audio_ext}");
            records[pair.audio].rename_to(&audio_name);

            let cue = &mut records[pair.cue];
            cue.rename_to(&format!("{stem}.cue"));
            cue.set_param(AUDIO_NAME_PARAM, audio_name);
        }
    }
}

impl Strategy for CueRenameStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        TargetType::FilesOnly
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Rename]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let mut records = records;
        let total = records.len() as u64;
        if ctx.cancel.is_cancelled() {
            return records;
        }
        let before = virtual_paths(&records);

        let mut by_dir: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            if Self::eligible(record) {
                by_dir
                    .entry(record.virtual_dir().to_path_buf())
                    .or_default()
                    .push(index);
            }
        }
        for (dir, indices) in &by_dir {
            let pairs = self.pairs(&records, indices);
            if !pairs.is_empty() {
                debug!(dir = %dir.display(), pairs = pairs.len(), "renaming cue pairs");
            }
            self.rename_pairs(&mut records, &pairs);
        }

        reject_collisions(&mut records, &before, self.config.overwrite);
        ctx.progress(total, total);
        records
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        _ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        fsops::rename_entry(&record.source_path, &record.new_path, self.config.overwrite)?;
        if let Some(audio_name) = record.param(AUDIO_NAME_PARAM) {
            rewrite_file_line(&record.new_path, audio_name)?;
        }
        Ok(ExecuteOutcome::Applied)
    }
}

/// Point every `FILE` line of the cue sheet at `audio_name`, keeping the file
/// type and line endings. The result is written back as UTF-8.
fn rewrite_file_line(cue: &Path, audio_name: &str) -> EngineResult<()> {
    let regex = FILE_LINE.as_ref().ok_or(EngineError::MissingState {
        field: "cue_file_pattern",
    })?;
    let bytes = fs::read(cue).map_err(|err| EngineError::io("cue_rename.read", cue, err))?;
    let text = String::from_utf8_lossy(&bytes);
    let rewritten = regex.replace_all(&text, |caps: &Captures<'_>| {
        format!("{}FILE \"{audio_name}\" {}{}", &caps[1], &caps[2], &caps[3])
    });
    fs::write(cue, rewritten.as_bytes())
        .map_err(|err| EngineError::io("cue_rename.write", cue, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;
    use crate::strategy::testing::Harness;
    use reshelve_test_support::TreeFixture;

    type TestResult<T> = anyhow::Result<T>;

    const SHEET: &str = "REM GENRE Rock\r\nTITLE \"现场\"\r\nFILE \"现场.wav\" WAVE\r\n  TRACK 01 AUDIO\r\n    INDEX 01 00:00:00\r\n";

    fn named<'a>(records: &'a [ChangeRecord], original: &str) -> TestResult<&'a ChangeRecord> {
        records
            .iter()
            .find(|record| record.original_name == original)
            .ok_or_else(|| anyhow::anyhow!("missing record {original}"))
    }

    #[test]
    fn lone_pair_takes_the_base_name() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("live/现场.cue", SHEET.as_bytes())?;
        tree.file("live/现场.flac", b"audio")?;
        tree.file("live/cover.jpg", b"img")?;

        let harness = Harness::new(tree.path());
        let strategy = CueRenameConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);

        let cue = named(&records, "现场.cue")?;
        let audio = named(&records, "现场.flac")?;
        assert_eq!(cue.new_path, tree.join("live/album.cue"));
        assert_eq!(cue.operation, OperationKind::Rename);
        assert_eq!(cue.param(AUDIO_NAME_PARAM), Some("album.flac"));
        assert_eq!(audio.new_path, tree.join("live/album.flac"));
        assert!(!named(&records, "cover.jpg")?.changed);

        let ctx = harness.execute_context();
        strategy.execute(audio, &ctx)?;
        strategy.execute(cue, &ctx)?;
        assert_eq!(tree.read("live/album.flac")?, b"audio");
        let text = String::from_utf8(tree.read("live/album.cue")?)?;
        assert!(text.contains("FILE \"album.flac\" WAVE\r\n"));
        assert!(text.contains("TITLE \"现场\"\r\n"));
        assert!(!tree.exists("live/现场.cue"));
        Ok(())
    }

    #[test]
    fn several_pairs_are_numbered_by_stem() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("box/b.cue", b"FILE \"b.ape\" WAVE\n")?;
        tree.file("box/b.ape", b"2")?;
        tree.file("box/A.cue", b"FILE \"A.wav\" WAVE\n")?;
        tree.file("box/A.wav", b"1")?;
        tree.file("box/lonely.cue", b"FILE \"gone.wav\" WAVE\n")?;

        let harness = Harness::new(tree.path());
        let strategy = CueRenameConfig {
            base_name: "disc".into(),
            ..CueRenameConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);

        assert_eq!(named(&records, "A.wav")?.new_name, "discdisk(1).wav");
        assert_eq!(named(&records, "A.cue")?.new_name, "discdisk(1).cue");
        assert_eq!(named(&records, "b.ape")?.new_name, "discdisk(2).ape");
        assert_eq!(named(&records, "b.cue")?.new_name, "discdisk(2).cue");
        assert!(!named(&records, "lonely.cue")?.changed);
        Ok(())
    }

    #[test]
    fn multi_file_sheets_are_left_alone() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file(
            "set/set.cue",
            b"FILE \"set.flac\" WAVE\n  TRACK 01 AUDIO\nFILE \"set2.flac\" WAVE\n  TRACK 02 AUDIO\n",
        )?;
        tree.file("set/set.flac", b"1")?;

        let harness = Harness::new(tree.path());
        let strategy = CueRenameConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        assert!(records.iter().all(|record| !record.changed));
        Ok(())
    }

    #[test]
    fn existing_target_skips_the_pair_member() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("x/rip.cue", b"FILE \"rip.flac\" WAVE\n")?;
        tree.file("x/rip.flac", b"new")?;
        tree.file("x/album.flac", b"old")?;

        let harness = Harness::new(tree.path());
        let strategy = CueRenameConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        assert_eq!(named(&records, "rip.flac")?.status, RecordStatus::Skipped);

        let strategy = CueRenameConfig {
            overwrite: true,
            ..CueRenameConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let audio = named(&records, "rip.flac")?;
        assert_eq!(audio.status, RecordStatus::Pending);
        strategy.execute(audio, &harness.execute_context())?;
        assert_eq!(tree.read("x/album.flac")?, b"new");
        Ok(())
    }

    #[test]
    fn file_line_rewrite_keeps_type_and_indentation() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let cue = tree.file("a.cue", b"  file 'old name.wav' BINARY\nTRACK 01 AUDIO\n")?;
        rewrite_file_line(&cue, "new $1.flac")?;
        assert_eq!(
            String::from_utf8(tree.read("a.cue")?)?,
            "  FILE \"new $1.flac\" BINARY\nTRACK 01 AUDIO\n"
        );
        Ok(())
    }

    #[test]
    fn config_round_trips_through_properties() {
        let config = CueRenameConfig {
            base_name: "cd".into(),
            overwrite: true,
            conditions: ConditionSet::default(),
        };
        assert_eq!(CueRenameConfig::from_properties(&config.to_properties()), config);
    }
}
