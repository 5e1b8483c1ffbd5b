//! Audio format conversion through the external encoder.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use reshelve_config::PropertySet;

use super::location::OutputLocation;
use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    map_records, reject_collisions, tag_params, virtual_paths,
};
use crate::condition::{ConditionSet, extension_of, is_audio_extension};
use crate::encoder::{EncodeJob, Encoder, EncoderSettings};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

/// Strategy identifier.
pub const ID: &str = "convert";

/// Output audio format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioFormat {
    /// 16-bit / 44.1 kHz stereo PCM.
    WavCd,
    /// 24-bit PCM at the source rate.
    Wav24,
    /// Lossless FLAC.
    #[default]
    Flac,
    /// MP3 at 320 kbit/s.
    Mp3,
    /// AAC in an MP4 container.
    Aac,
    /// Apple lossless in an MP4 container.
    Alac,
    /// Ogg Vorbis.
    Ogg,
    /// Opus.
    Opus,
}

impl AudioFormat {
    /// Canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WavCd => "wav_cd",
            Self::Wav24 => "wav_24",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Alac => "alac",
            Self::Ogg => "ogg",
            Self::Opus => "opus",
        }
    }

    /// File extension written for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::WavCd | Self::Wav24 => "wav",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Aac | Self::Alac => "m4a",
            Self::Ogg => "ogg",
            Self::Opus => "opus",
        }
    }

    /// Encoder codec arguments.
    #[must_use]
    pub fn codec_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::WavCd => &["-c:a", "pcm_s16le"],
            Self::Wav24 => &["-c:a", "pcm_s24le"],
            Self::Flac => &["-c:a", "flac", "-compression_level", "5"],
            Self::Mp3 => &["-c:a", "libmp3lame", "-b:a", "320k"],
            Self::Aac => &["-c:a", "aac", "-b:a", "256k"],
            Self::Alac => &["-c:a", "alac"],
            Self::Ogg => &["-c:a", "libvorbis", "-q:a", "6"],
            Self::Opus => &["-c:a", "libopus", "-b:a", "192k"],
        };
        args.iter().map(|arg| (*arg).to_string()).collect()
    }

    /// Fixed output sample rate, if the format pins one.
    #[must_use]
    pub const fn sample_rate(self) -> Option<u32> {
        match self {
            Self::WavCd => Some(44_100),
            _ => None,
        }
    }

    /// Fixed output channel count, if the format pins one.
    #[must_use]
    pub const fn channels(self) -> Option<u32> {
        match self {
            Self::WavCd => Some(2),
            _ => None,
        }
    }

    /// Encode `input` into `output` in this format.
    pub(crate) fn job(self, input: &Path, output: &Path) -> EncodeJob {
        EncodeJob {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            codec_args: self.codec_args(),
            audio_only: true,
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            ..EncodeJob::default()
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav_cd" | "wav" => Ok(Self::WavCd),
            "wav_24" => Ok(Self::Wav24),
            "flac" => Ok(Self::Flac),
            "mp3" => Ok(Self::Mp3),
            "aac" => Ok(Self::Aac),
            "alac" => Ok(Self::Alac),
            "ogg" | "vorbis" => Ok(Self::Ogg),
            "opus" => Ok(Self::Opus),
            other => Err(EngineError::invalid("format", "unknown_audio_format", other)),
        }
    }
}

/// User options for the convert strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertConfig {
    /// Output format.
    pub format: AudioFormat,
    /// Output directory relative to each source.
    pub output: OutputLocation,
    /// Replace existing outputs.
    pub overwrite: bool,
    /// Encoder process settings.
    pub encoder: EncoderSettings,
    /// Filter selecting files to convert.
    pub conditions: ConditionSet,
    /// Parallel encodes per root.
    pub workers: Option<usize>,
}

impl ConvertConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self {
            format: properties.get_parsed("format", AudioFormat::default()),
            output: OutputLocation::from_properties(properties),
            overwrite: properties.get_bool("overwrite", false),
            encoder: EncoderSettings::from_properties(properties),
            conditions: properties.get_json("conditions", ConditionSet::default()),
            workers: properties.get_optional::<usize>("workers").filter(|n| *n > 0),
        }
    }
}

impl StrategyConfig for ConvertConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        Arc::new(ConvertStrategy {
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
        if let Some(workers) = self.workers {
            properties.set_display("workers", workers);
        }
        properties
    }
}

/// Captured convert strategy.
pub struct ConvertStrategy {
    config: ConvertConfig,
    encoder: Encoder,
}

impl ConvertStrategy {
    fn apply(&self, record: &mut ChangeRecord) {
        let Some(ext) = extension_of(&record.new_name) else {
            return;
        };
        if !is_audio_extension(&ext) || !self.config.conditions.test(&record.subject()) {
            return;
        }
        let directory = record.virtual_dir().to_path_buf();
        let output_dir = self.config.output.resolve(&directory);
        if ext == self.config.format.extension() && output_dir == directory {
            return;
        }
        let stem = record
            .new_name
            .rsplit_once('.')
            .map_or(record.new_name.as_str(), |(stem, _)| stem)
            .to_string();
        let target = output_dir.join(format!("{stem}.{}", self.config.format.extension()));
        record.assign(OperationKind::Convert, target);
        record.set_param("format", self.config.format.as_str());
    }
}

impl Strategy for ConvertStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        TargetType::FilesOnly
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Convert]
    }

    fn preferred_workers(&self) -> Option<usize> {
        self.config.workers
    }

    fn analyze(&self, records: Vec<ChangeRecord>, ctx: &AnalyzeContext<'_>) -> Vec<ChangeRecord> {
        let before = virtual_paths(&records);
        let mut records = map_records(records, ctx, |record| {
            self.apply(record);
            Ok(())
        });
        reject_collisions(&mut records, &before, self.config.overwrite);
        records
    }

    fn execute(
        &self,
        record: &ChangeRecord,
        ctx: &ExecuteContext<'_>,
    ) -> EngineResult<ExecuteOutcome> {
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
        fsops::ensure_parent(&record.new_path)?;
        let mut job = format.job(&record.source_path, &record.new_path);
        job.map_metadata = true;
        job.metadata = tag_params(record);
        self.encoder.run(&job, ctx.cancel)?;
        Ok(ExecuteOutcome::Applied)
    }
}
