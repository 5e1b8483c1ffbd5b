//! Split image-plus-cue albums into per-track files.
//!
//! # Design
//! - Each cue sheet expands into one SPLIT record per track; the cue record
//!   itself leaves the set.
//! - Track boundaries come from `INDEX 01`; a track ends where the next track on
//!   the same file starts, the last one runs to the end of the audio.
//! - A `FILE` block whose audio cannot be found becomes one SPLIT record
//!   carrying `missing_audio`, so it fails visibly at execution; tracks of the
//!   other blocks are kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use reshelve_config::PropertySet;
use tracing::warn;

use super::convert::AudioFormat;
use super::location::OutputLocation;
use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    tag_params,
};
use crate::condition::{ConditionSet, extension_of};
use crate::encoder::{Encoder, EncoderSettings};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "cue_split";

const FRAMES_PER_SECOND: u64 = 75;
const AUDIO_FALLBACKS: &[&str] = &["flac", "wav", "ape", "m4a", "dsf", "dff", "tak", "tta", "wv"];

/// One `TRACK` of a cue sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueTrack {
    /// Track number as written.
    pub number: u32,
    /// Track title.
    pub title: Option<String>,
    /// Track performer, falling back to the album performer.
    pub performer: Option<String>,
    /// `INDEX 01` offset in milliseconds.
    pub start_ms: u64,
    /// Length in milliseconds; `None` for the last track on a file.
    pub duration_ms: Option<u64>,
}

/// One `FILE` block of a cue sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueFile {
    /// Declared audio file name.
    pub name: String,
    /// Tracks in order of appearance.
    pub tracks: Vec<CueTrack>,
}

/// Parsed cue sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueSheet {
    /// Album title.
    pub title: Option<String>,
    /// Album performer.
    pub performer: Option<String>,
    /// Audio files with their tracks.
    pub files: Vec<CueFile>,
}

impl CueSheet {
    /// Parse cue sheet text. Unknown commands are ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut sheet = Self::default();
        let mut track: Option<CueTrack> = None;

        for line in text.trim_start_matches('\u{feff}').lines() {
            let line = line.trim();
            let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();
            match command.to_ascii_uppercase().as_str() {
                "FILE" => {
                    sheet.close_track(track.take());
                    sheet.files.push(CueFile {
                        name: file_argument(rest),
                        tracks: Vec::new(),
                    });
                }
                "TRACK" => {
                    sheet.close_track(track.take());
                    let number = rest
                        .split_whitespace()
                        .next()
                        .and_then(|n| n.parse().ok())
                        .unwrap_or_default();
                    track = Some(CueTrack {
                        number,
                        ..CueTrack::default()
                    });
                }
                "TITLE" => match track.as_mut() {
                    Some(track) => track.title = Some(unquote(rest)),
                    None => sheet.title = Some(unquote(rest)),
                },
                "PERFORMER" => match track.as_mut() {
                    Some(track) => track.performer = Some(unquote(rest)),
                    None => sheet.performer = Some(unquote(rest)),
                },
                "INDEX" => {
                    let mut parts = rest.split_whitespace();
                    if let (Some("01"), Some(stamp), Some(track)) =
                        (parts.next(), parts.next(), track.as_mut())
                    {
                        track.start_ms = parse_index(stamp).unwrap_or_default();
                    }
                }
                _ => {}
            }
        }
        sheet.close_track(track);

        for file in &mut sheet.files {
            let starts: Vec<u64> = file.tracks.iter().map(|track| track.start_ms).collect();
            for (index, track) in file.tracks.iter_mut().enumerate() {
                track.duration_ms = starts
                    .get(index + 1)
                    .map(|next| next.saturating_sub(track.start_ms));
                if track.performer.is_none() {
                    track.performer.clone_from(&sheet.performer);
                }
            }
        }
        sheet
    }

    fn close_track(&mut self, track: Option<CueTrack>) {
        if let (Some(track), Some(file)) = (track, self.files.last_mut()) {
            file.tracks.push(track);
        }
    }

    /// Number of tracks across all files.
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.files.iter().map(|file| file.tracks.len()).sum()
    }
}

/// `mm:ss:ff` to milliseconds at 75 frames per second; `None` when malformed or
/// out of range.
fn parse_index(stamp: &str) -> Option<u64> {
    let mut parts = stamp.split(':').map(|part| part.trim().parse::<u64>());
    let minutes = parts.next()?.ok()?;
    let seconds = parts.next()?.ok()?;
    let frames = parts.next()?.ok()?;
    let whole_ms = minutes
        .checked_mul(60)?
        .checked_add(seconds)?
        .checked_mul(1000)?;
    whole_ms.checked_add(frames.checked_mul(1000)? / FRAMES_PER_SECOND)
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix('"')
        .and_then(|inner| inner.split_once('"').map(|(value, _)| value))
        .unwrap_or(raw)
        .to_string()
}

/// `FILE "name" WAVE` or `FILE name WAVE`.
fn file_argument(rest: &str) -> String {
    if rest.starts_with('"') {
        return unquote(rest);
    }
    match rest.rsplit_once(char::is_whitespace) {
        Some((name, _kind)) => name.trim().to_string(),
        None => rest.to_string(),
    }
}

/// Replace characters that are invalid in file names.
fn sanitize(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    cleaned.trim().trim_end_matches('.').trim().to_string()
}

/// Cue sheet text, tolerating invalid UTF-8.
pub(super) fn read_cue(path: &Path) -> EngineResult<CueSheet> {
    let bytes = fs::read(path).map_err(|err| EngineError::io("cue.read", path, err))?;
    Ok(CueSheet::parse(&String::from_utf8_lossy(&bytes)))
}

/// Audio behind a `FILE` entry: the declared name, then the declared or cue stem
/// with each fallback extension.
fn locate_audio(cue: &Path, declared: &str) -> Option<PathBuf> {
    let dir = cue.parent()?;
    let direct = dir.join(declared);
    if !declared.is_empty() && direct.is_file() {
        return Some(direct);
    }
    let stems = [
        Path::new(declared).file_stem(),
        cue.file_stem(),
    ];
    stems
        .into_iter()
        .flatten()
        .flat_map(|stem| {
            AUDIO_FALLBACKS.iter().map(move |ext| {
                let mut name = stem.to_os_string();
                name.push(".");
                name.push(ext);
                dir.join(name)
            })
        })
        .find(|candidate| candidate.is_file())
}

/// User options for the cue split strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueSplitConfig {
    /// Format written for each track.
    pub format: AudioFormat,
    /// Output directory relative to the cue sheet.
    pub output: OutputLocation,
    /// Replace existing track files.
    pub overwrite: bool,
    /// Encoder process settings.
    pub encoder: EncoderSettings,
    /// Filter selecting cue sheets.
    pub conditions: ConditionSet,
}

impl CueSplitConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self {
            format: properties.get_parsed("format", AudioFormat::default()),
            output: OutputLocation::from_properties(properties),
            overwrite: properties.get_bool("overwrite", false),
            encoder: EncoderSettings::from_properties(properties),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for CueSplitConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        Arc::new(CueSplitStrategy {
            encoder: Encoder::new(self.encoder.clone()),
            config: self.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set_display("format", self.format);
        self.output.write_properties(&mut properties);
        properties.set_display("overwrite", self.overwrite);
        self.encoder.write_properties(&mut properties);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

/// Captured cue split strategy.
pub struct CueSplitStrategy {
    config: CueSplitConfig,
    encoder: Encoder,
}

impl CueSplitStrategy {
    fn selects(&self, record: &ChangeRecord) -> bool {
        !record.is_terminal()
            && extension_of(&record.new_name).as_deref() == Some("cue")
            && self.config.conditions.test(&record.subject())
    }

    fn expand(
        &self,
        record: ChangeRecord,
        sheet: &CueSheet,
        ctx: &AnalyzeContext<'_>,
    ) -> Vec<ChangeRecord> {
        let output_dir = self.config.output.resolve(record.virtual_dir());
        let total = sheet.track_count();
        let mut derived = Vec::with_capacity(total);

        for file in &sheet.files {
            let Some(audio) = locate_audio(&record.source_path, &file.name) else {
                let mut missing = record.derive(ctx.ids.next_id());
                missing.assign(OperationKind::Split, record.new_path.clone());
                missing.set_param("missing_audio", file.name.as_str());
                missing.set_param("cue_file", record.source_path.display().to_string());
                derived.push(missing);
                continue;
            };
            for track in &file.tracks {
                let title = track
                    .title
                    .as_deref()
                    .map(sanitize)
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| format!("Track {:02}", track.number));
                let name = format!(
                    "{:02} - {title}.{}",
                    track.number,
                    self.config.format.extension()
                );
                let mut split = record.derive(ctx.ids.next_id());
                split.assign(OperationKind::Split, output_dir.join(name));
                split.set_param("source", audio.display().to_string());
                split.set_param("cue_file", record.source_path.display().to_string());
                split.set_param("format", self.config.format.as_str());
                split.set_param("start_ms", track.start_ms.to_string());
                if let Some(duration) = track.duration_ms {
                    split.set_param("duration_ms", duration.to_string());
                }
                split.set_param("meta_track", format!("{}/{total}", track.number));
                if let Some(title) = &track.title {
                    split.set_param("meta_title", title.as_str());
                }
                if let Some(performer) = &track.performer {
                    split.set_param("meta_artist", performer.as_str());
                }
                if let Some(album) = &sheet.title {
                    split.set_param("meta_album", album.as_str());
                }
                if !self.config.overwrite && split.new_path.exists() {
                    let reason = format!("target {} already exists", split.new_path.display());
                    split.skip(reason);
                }
                derived.push(split);
            }
        }
        if derived.is_empty() {
            return vec![record];
        }
        derived
    }
}

impl Strategy for CueSplitStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        TargetType::FilesOnly
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Split]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let total = records.len() as u64;
        let parsed: Vec<(ChangeRecord, Option<CueSheet>)> = records
            .into_par_iter()
            .map(|record| {
                if ctx.cancel.is_cancelled() || !self.selects(&record) {
                    return (record, None);
                }
                match read_cue(&record.source_path) {
                    Ok(sheet) => (record, Some(sheet)),
                    Err(err) => {
                        warn!(
                            record_id = %record.id,
                            path = %record.source_path.display(),
                            error = %err.detail(),
                            "cue sheet unreadable"
                        );
                        (record, None)
                    }
                }
            })
            .collect();

        let mut out = Vec::with_capacity(parsed.len());
        for (processed, (record, sheet)) in parsed.into_iter().enumerate() {
            match sheet {
                Some(sheet) => out.extend(self.expand(record, &sheet, ctx)),
                None => out.push(record),
            }
            if (processed as u64 + 1).is_multiple_of(50) {
                ctx.progress(processed as u64 + 1, total);
            }
        }
        ctx.progress(total, total);
        out
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        if let Some(missing) = record.param("missing_audio") {
            return Err(EngineError::MissingResource {
                resource: "cue_audio",
                path: PathBuf::from(missing),
            });
        }
        let source = record
            .param("source")
            .map(PathBuf::from)
            .ok_or(EngineError::MissingState { field: "source" })?;
        if record.new_path.exists() && !self.config.overwrite {
            return Ok(ExecuteOutcome::Skipped(format!(
                "{} already exists",
                record.new_path.display()
            )));
        }
        let format = record
            .param("format")
            .and_then(|format| format.parse().ok())
            .unwrap_or(self.config.format);
        let mut job = format.job(&source, &record.new_path);
        job.start_ms = record.param("start_ms").and_then(|ms| ms.parse().ok());
        job.duration_ms = record.param("duration_ms").and_then(|ms| ms.parse().ok());
        job.metadata = tag_params(record);
        fsops::ensure_parent(&record.new_path)?;
        self.encoder.run(&job, ctx.cancel)?;
        Ok(ExecuteOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordStatus;
    use crate::strategy::testing::Harness;
    use reshelve_test_support::TreeFixture;

    type TestResult<T> = anyhow::Result<T>;

    const SHEET: &str = "\u{feff}PERFORMER \"Band\"\r\nTITLE \"Live\"\r\nFILE \"album.wav\" WAVE\r\n  TRACK 01 AUDIO\r\n    TITLE \"Intro: Part/1\"\r\n    INDEX 00 00:00:00\r\n    INDEX 01 00:00:00\r\n  TRACK 02 AUDIO\r\n    TITLE \"Song\"\r\n    PERFORMER \"Guest\"\r\n    INDEX 01 03:10:15\r\n";

    #[test]
    fn parses_tracks_and_durations() {
        let sheet = CueSheet::parse(SHEET);
        assert_eq!(sheet.title.as_deref(), Some("Live"));
        assert_eq!(sheet.files.len(), 1);
        assert_eq!(sheet.files[0].name, "album.wav");
        let tracks = &sheet.files[0].tracks;
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].performer.as_deref(), Some("Band"));
        assert_eq!(tracks[1].performer.as_deref(), Some("Guest"));
        assert_eq!(tracks[1].start_ms, 190_200);
        assert_eq!(tracks[0].duration_ms, Some(190_200));
        assert_eq!(tracks[1].duration_ms, None);
    }

    #[test]
    fn unquoted_file_names_drop_the_type() {
        assert_eq!(file_argument("disc one.flac WAVE"), "disc one.flac");
        assert_eq!(file_argument("\"a b.ape\" WAVE"), "a b.ape");
        assert_eq!(parse_index("01:02:74"), Some(62_986));
        assert_eq!(parse_index("garbage"), None);
    }

    #[test]
    fn oversized_index_is_rejected() {
        assert_eq!(parse_index("999999999999999999:00:00"), None);
        assert_eq!(parse_index("00:00:18446744073709551615"), None);
        let sheet = CueSheet::parse(
            "FILE \"a.wav\" WAVE\n TRACK 01 AUDIO\n  INDEX 01 999999999999999999:00:00\n",
        );
        assert_eq!(sheet.files[0].tracks[0].start_ms, 0);
    }

    #[test]
    fn cue_expands_into_track_records() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("live/album.cue", SHEET.as_bytes())?;
        tree.file("live/album.flac", b"audio")?;
        tree.file("live/01 - Intro_ Part_1.flac", b"old")?;

        let harness = Harness::new(tree.path());
        let strategy = CueSplitConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let scanned = records.len();
        let records = harness.analyze(strategy.as_ref(), records);

        let splits: Vec<_> = records
            .iter()
            .filter(|record| record.operation == OperationKind::Split)
            .collect();
        assert_eq!(splits.len(), 2);
        assert_eq!(records.len(), scanned + 1);
        assert_eq!(splits[0].new_name, "01 - Intro_ Part_1.flac");
        assert_eq!(splits[0].status, RecordStatus::Skipped);
        assert_eq!(splits[1].new_path, tree.join("live/02 - Song.flac"));
        assert_eq!(splits[1].status, RecordStatus::Pending);
        assert_eq!(
            splits[1].param("source"),
            Some(tree.join("live/album.flac").display().to_string().as_str())
        );
        assert_eq!(splits[1].param("meta_track"), Some("2/2"));
        assert!(splits.iter().all(|record| record.origin.is_some()));
        Ok(())
    }

    #[test]
    fn missing_audio_fails_at_execution() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("album.cue", SHEET.as_bytes())?;

        let harness = Harness::new(tree.path());
        let strategy = CueSplitConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, OperationKind::Split);
        assert_eq!(records[0].param("missing_audio"), Some("album.wav"));

        let result = strategy.execute(&records[0], &harness.execute_context());
        assert!(matches!(result, Err(EngineError::MissingResource { .. })));
        Ok(())
    }

    #[test]
    fn missing_block_keeps_resolved_tracks() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file(
            "set/set.cue",
            b"FILE \"one.flac\" WAVE\n  TRACK 01 AUDIO\n    TITLE \"First\"\n    INDEX 01 00:00:00\nFILE \"two.flac\" WAVE\n  TRACK 02 AUDIO\n    TITLE \"Second\"\n    INDEX 01 00:00:00\n",
        )?;
        tree.file("set/one.flac", b"audio")?;

        let harness = Harness::new(tree.path());
        let strategy = CueSplitConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let splits: Vec<_> = records
            .iter()
            .filter(|record| record.operation == OperationKind::Split)
            .collect();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].new_path, tree.join("set/01 - First.flac"));
        assert_eq!(splits[0].param("missing_audio"), None);
        assert_eq!(splits[1].param("missing_audio"), Some("two.flac"));
        assert_ne!(splits[0].id, splits[1].id);

        let ctx = harness.execute_context();
        assert!(matches!(
            strategy.execute(splits[1], &ctx),
            Err(EngineError::MissingResource { .. })
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn overwrite_replaces_existing_track() -> TestResult<()> {
        let bin = TreeFixture::new()?;
        let program = reshelve_test_support::scripted_encoder(bin.path(), "track")?;
        let tree = TreeFixture::new()?;
        tree.file("live/album.cue", SHEET.as_bytes())?;
        tree.file("live/album.flac", b"audio")?;
        tree.file("live/01 - Intro_ Part_1.flac", b"old")?;

        let harness = Harness::new(tree.path());
        let strategy = CueSplitConfig {
            overwrite: true,
            encoder: EncoderSettings {
                program: program.display().to_string(),
                ..EncoderSettings::default()
            },
            ..CueSplitConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let first = records
            .iter()
            .find(|record| record.new_name == "01 - Intro_ Part_1.flac" && record.origin.is_some())
            .ok_or_else(|| anyhow::anyhow!("missing track record"))?;
        assert_eq!(first.status, RecordStatus::Pending);

        let outcome = strategy.execute(first, &harness.execute_context())?;
        assert!(matches!(outcome, ExecuteOutcome::Applied));
        assert_eq!(tree.read("live/01 - Intro_ Part_1.flac")?, b"track");
        Ok(())
    }

    #[test]
    fn config_round_trips_through_properties() {
        let config = CueSplitConfig {
            format: AudioFormat::WavCd,
            output: OutputLocation::SubFolder("tracks".into()),
            overwrite: true,
            encoder: EncoderSettings::default(),
            conditions: ConditionSet::default(),
        };
        assert_eq!(CueSplitConfig::from_properties(&config.to_properties()), config);
    }
}
