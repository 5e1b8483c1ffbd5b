//! Correct file extensions that disagree with the file's content.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use reshelve_config::PropertySet;

use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    map_records, reject_collisions, virtual_paths,
};
use crate::condition::{ConditionSet, extension_of, is_audio_extension};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "fix_type";

const HEADER_LEN: usize = 64;

/// Extensions that share a detected type.
const EQUIVALENT: &[&[&str]] = &[
    &["jpg", "jpeg", "jpe"],
    &["tif", "tiff"],
    &["mp4", "m4a", "m4b", "m4v", "aac", "alac"],
    &["ogg", "oga", "opus"],
    &["zip", "docx", "xlsx", "pptx", "jar", "epub", "apk", "cbz", "odt"],
    &["gz", "tgz"],
];

/// Extension implied by a file header, if recognised.
#[must_use]
pub fn detect(header: &[u8]) -> Option<&'static str> {
    let starts = |magic: &[u8]| header.starts_with(magic);
    let at = |offset: usize, magic: &[u8]| {
        header
            .get(offset..offset + magic.len())
            .is_some_and(|slice| slice == magic)
    };

    if starts(b"fLaC") {
        Some("flac")
    } else if starts(b"ID3") {
        Some("mp3")
    } else if starts(b"RIFF") && at(8, b"WAVE") {
        Some("wav")
    } else if starts(b"RIFF") && at(8, b"AVI ") {
        Some("avi")
    } else if starts(b"OggS") {
        Some(if at(28, b"OpusHead") { "opus" } else { "ogg" })
    } else if at(4, b"ftyp") {
        Some(if at(8, b"M4A ") {
            "m4a"
        } else if at(8, b"qt  ") {
            "mov"
        } else {
            "mp4"
        })
    } else if starts(b"MAC ") {
        Some("ape")
    } else if starts(b"wvpk") {
        Some("wv")
    } else if starts(b"DSD ") {
        Some("dsf")
    } else if starts(b"FRM8") {
        Some("dff")
    } else if starts(b"PK\x03\x04") {
        Some("zip")
    } else if starts(b"Rar!\x1a\x07") {
        Some("rar")
    } else if starts(b"7z\xbc\xaf\x27\x1c") {
        Some("7z")
    } else if starts(b"\x1f\x8b") {
        Some("gz")
    } else if starts(b"\xff\xd8\xff") {
        Some("jpg")
    } else if starts(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if starts(b"%PDF") {
        Some("pdf")
    } else if let [0xff, second, ..] = header {
        // ADTS AAC, else an MPEG audio frame sync.
        if second & 0xf6 == 0xf0 {
            Some("aac")
        } else if second & 0xe0 == 0xe0 {
            Some("mp3")
        } else {
            None
        }
    } else {
        None
    }
}

fn equivalent(a: &str, b: &str) -> bool {
    a == b
        || EQUIVALENT
            .iter()
            .any(|family| family.contains(&a) && family.contains(&b))
}

fn read_header(path: &Path) -> EngineResult<Vec<u8>> {
    let file = File::open(path).map_err(|err| EngineError::io("fix_type.open", path, err))?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|err| EngineError::io("fix_type.read", path, err))?;
    Ok(header)
}

/// User options for the fix-type strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixTypeConfig {
    /// Only rename when the detected type is audio.
    pub audio_only: bool,
    /// Filter selecting files to inspect.
    pub conditions: ConditionSet,
}

impl FixTypeConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self {
            audio_only: properties.get_bool("audio_only", false),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for FixTypeConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        Arc::new(FixTypeStrategy {
            config: self.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.set_display("audio_only", self.audio_only);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

/// Captured fix-type strategy.
pub struct FixTypeStrategy {
    config: FixTypeConfig,
}

impl FixTypeStrategy {
    fn apply(&self, record: &mut ChangeRecord) -> EngineResult<()> {
        if !self.config.conditions.test(&record.subject()) {
            return Ok(());
        }
        let header = read_header(&record.source_path)?;
        let Some(detected) = detect(&header) else {
            return Ok(());
        };
        if self.config.audio_only && !is_audio_extension(detected) {
            return Ok(());
        }
        let current = extension_of(&record.new_name);
        if current.as_deref().is_some_and(|ext| equivalent(ext, detected)) {
            return Ok(());
        }
        let stem = match current {
            Some(_) => record
                .new_name
                .rsplit_once('.')
                .map_or(record.new_name.as_str(), |(stem, _)| stem),
            None => record.new_name.as_str(),
        };
        let target = record.virtual_dir().join(format!("{stem}.{detected}"));
        let operation = match record.operation {
            OperationKind::None | OperationKind::Rename => OperationKind::FixType,
            other => other,
        };
        record.assign(operation, target);
        record.set_param("detected_type", detected);
        Ok(())
    }
}

impl Strategy for FixTypeStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        TargetType::FilesOnly
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::FixType]
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let before = virtual_paths(&records);
        let mut records = map_records(records, ctx, |record| self.apply(record));
        reject_collisions(&mut records, &before, false);
        records
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        _ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
        if record.source_path.parent() == record.new_path.parent() {
            fsops::rename_entry(&record.source_path, &record.new_path, false)?;
        } else {
            if record.new_path.exists() {
                return Err(EngineError::TargetExists {
                    path: record.new_path.clone(),
                });
            }
            fsops::move_tree(&record.source_path, &record.new_path)?;
        }
        Ok(ExecuteOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::Harness;
    use reshelve_test_support::TreeFixture;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn headers_map_to_extensions() {
        assert_eq!(detect(b"fLaC\0\0\0\x22"), Some("flac"));
        assert_eq!(detect(b"RIFF\0\0\0\0WAVEfmt "), Some("wav"));
        assert_eq!(detect(b"\0\0\0\x20ftypM4A \0\0"), Some("m4a"));
        assert_eq!(detect(&[0xff, 0xfb, 0x90, 0x00]), Some("mp3"));
        assert_eq!(detect(&[0xff, 0xf1, 0x50, 0x80]), Some("aac"));
        assert_eq!(detect(b"plain text"), None);
        assert_eq!(detect(b""), None);
    }

    #[test]
    fn mislabelled_audio_is_renamed() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("song.mp3", b"fLaC\0\0\0\x22rest")?;
        tree.file("photo.jpeg", b"\xff\xd8\xff\xe0JFIF")?;
        tree.file("notes", b"%PDF-1.7")?;

        let harness = Harness::new(tree.path());
        let strategy = FixTypeConfig::default().capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        let names: Vec<_> = records.iter().map(|record| record.new_name.as_str()).collect();
        assert_eq!(names, vec!["notes.pdf", "photo.jpeg", "song.flac"]);

        for record in records.iter().filter(|record| record.changed) {
            strategy.execute(record, &harness.execute_context())?;
        }
        assert!(tree.exists("song.flac"));
        assert!(tree.exists("notes.pdf"));
        Ok(())
    }

    #[test]
    fn audio_only_ignores_other_types() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("doc.mp3", b"%PDF-1.4")?;
        let harness = Harness::new(tree.path());
        let strategy = FixTypeConfig {
            audio_only: true,
            ..FixTypeConfig::default()
        }
        .capture();
        let records = harness.scan(strategy.as_ref())?;
        let records = harness.analyze(strategy.as_ref(), records);
        assert!(!records[0].changed);
        Ok(())
    }
}
