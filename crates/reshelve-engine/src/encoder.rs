//! Wrapper around the external audio encoder process.
//!
//! # Design
//! - Output is written to a hidden staging file next to the target and renamed
//!   into place only after the process succeeds.
//! - The child is polled so cancellation and the optional deadline can kill it.
//! - Stderr is drained on a helper thread so a chatty encoder never blocks.
//! - A failed run that mapped source metadata is retried once without it; some
//!   containers carry tags the target format rejects.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use reshelve_config::PropertySet;
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::error::{EngineError, EngineResult};
use crate::fsops;

const DEFAULT_PROGRAM: &str = "ffmpeg";
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL: usize = 512;

/// Encoder process settings shared by the audio strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Program to invoke.
    pub program: String,
    /// Thread count passed to the encoder.
    pub threads: Option<usize>,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            threads: None,
            timeout: None,
        }
    }
}

impl EncoderSettings {
    /// Read `encoder.*` keys from a strategy's properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        let scoped = properties.scoped("encoder");
        Self {
            program: scoped.get_string("program", DEFAULT_PROGRAM),
            threads: scoped.get_optional::<usize>("threads").filter(|n| *n > 0),
            timeout: scoped
                .get_optional::<u64>("timeout_secs")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Write `encoder.*` keys into a strategy's properties.
    pub fn write_properties(&self, properties: &mut PropertySet) {
        properties.set("encoder.program", self.program.as_str());
        if let Some(threads) = self.threads {
            properties.set_display("encoder.threads", threads);
        }
        if let Some(timeout) = self.timeout {
            properties.set_display("encoder.timeout_secs", timeout.as_secs());
        }
    }
}

/// One encoder invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeJob {
    /// Input file.
    pub input: PathBuf,
    /// Final output file (may equal the input for in-place tag writes).
    pub output: PathBuf,
    /// Codec arguments, e.g. `["-c:a", "flac"]`.
    pub codec_args: Vec<String>,
    /// Start offset in milliseconds.
    pub start_ms: Option<u64>,
    /// Duration in milliseconds; `None` runs to the end of the input.
    pub duration_ms: Option<u64>,
    /// Tags written to the output.
    pub metadata: Vec<(String, String)>,
    /// Copy the input's global metadata.
    pub map_metadata: bool,
    /// Restrict the output to the first audio stream.
    pub audio_only: bool,
    /// Output sample rate.
    pub sample_rate: Option<u32>,
    /// Output channel count.
    pub channels: Option<u32>,
}

/// Spawns encoder processes.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    settings: EncoderSettings,
}

impl Encoder {
    /// Encoder using `settings`.
    #[must_use]
    pub const fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Run `job` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] or [`EngineError::TimedOut`] when the
    /// process is killed, [`EngineError::EncoderFailed`] when it exits
    /// unsuccessfully, and IO errors for spawn or staging failures.
    pub fn run(&self, job: &EncodeJob, cancel: &CancelFlag) -> EngineResult<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                operation: "encoder.run",
            });
        }
        fsops::ensure_parent(&job.output)?;
        let staging = staging_path(&job.output);

        let result = match self.attempt(job, &staging, job.map_metadata, cancel) {
            Err(EngineError::EncoderFailed { .. }) if job.map_metadata => {
                debug!(input = %job.input.display(), "retrying encode without source metadata");
                self.attempt(job, &staging, false, cancel)
            }
            other => other,
        };

        match result {
            Ok(()) => fsops::rename_entry(&staging, &job.output, true),
            Err(err) => {
                if let Err(cleanup) = fsops::remove_entry(&staging) {
                    warn!(path = %staging.display(), error = %cleanup.detail(), "failed to remove staging output");
                }
                Err(err)
            }
        }
    }

    fn attempt(
        &self,
        job: &EncodeJob,
        staging: &Path,
        map_metadata: bool,
        cancel: &CancelFlag,
    ) -> EngineResult<()> {
        let args = self.arguments(job, staging, map_metadata);
        debug!(program = %self.settings.program, args = ?args, "spawning encoder");
        let mut child = Command::new(&self.settings.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EngineError::io("encoder.spawn", &self.settings.program, err))?;

        let stderr = child.stderr.take();
        let drain = thread::spawn(move || {
            let mut buffer = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut buffer);
            }
            buffer
        });

        let deadline = self.settings.timeout.map(|after| (Instant::now() + after, after));
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    let _ = child.kill();
                    return Err(EngineError::io("encoder.wait", &self.settings.program, err));
                }
            }
            let abort = if cancel.is_cancelled() {
                Some(EngineError::Cancelled {
                    operation: "encoder.run",
                })
            } else {
                deadline
                    .filter(|(at, _)| Instant::now() >= *at)
                    .map(|(_, after)| EngineError::TimedOut {
                        operation: "encoder.run",
                        after,
                    })
            };
            if let Some(err) = abort {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = drain.join().unwrap_or_default();
        self.check_status(status, &stderr)
    }

    fn check_status(&self, status: ExitStatus, stderr: &str) -> EngineResult<()> {
        if status.success() {
            return Ok(());
        }
        let trimmed = stderr.trim();
        let tail = trimmed
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map_or(trimmed, |(index, _)| &trimmed[index..]);
        Err(EngineError::EncoderFailed {
            program: self.settings.program.clone(),
            status: status.code(),
            stderr: tail.to_string(),
        })
    }

    fn arguments(&self, job: &EncodeJob, staging: &Path, map_metadata: bool) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
            .into_iter()
            .map(str::to_string)
            .collect();
        args.push("-i".into());
        args.push(job.input.display().to_string());
        if let Some(start) = job.start_ms {
            args.push("-ss".into());
            args.push(format_seconds(start));
        }
        if let Some(duration) = job.duration_ms {
            args.push("-t".into());
            args.push(format_seconds(duration));
        }
        if job.audio_only {
            args.push("-map".into());
            args.push("0:a:0".into());
        }
        args.push("-map_metadata".into());
        args.push(if map_metadata { "0" } else { "-1" }.into());
        for (key, value) in &job.metadata {
            args.push("-metadata".into());
            args.push(format!("{key}={value}"));
        }
        args.extend(job.codec_args.iter().cloned());
        if let Some(rate) = job.sample_rate {
            args.push("-ar".into());
            args.push(rate.to_string());
        }
        if let Some(channels) = job.channels {
            args.push("-ac".into());
            args.push(channels.to_string());
        }
        if let Some(threads) = self.settings.threads {
            args.push("-threads".into());
            args.push(threads.to_string());
        }
        args.push(staging.display().to_string());
        args
    }
}

fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1_000, ms % 1_000)
}

/// Hidden sibling of `output` that keeps its extension so the encoder can
/// infer the container.
fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".reshelve-partial-{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reshelve_test_support::{TreeFixture, program_available};

    type TestResult<T> = anyhow::Result<T>;

    fn job(tree: &TreeFixture) -> EncodeJob {
        EncodeJob {
            input: tree.join("in.flac"),
            output: tree.join("out/in.mp3"),
            codec_args: vec!["-c:a".into(), "libmp3lame".into()],
            start_ms: Some(61_500),
            duration_ms: Some(2_005),
            metadata: vec![("title".into(), "Intro".into())],
            map_metadata: true,
            audio_only: true,
            sample_rate: Some(44_100),
            channels: Some(2),
        }
    }

    #[test]
    fn arguments_follow_job_fields() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let encoder = Encoder::new(EncoderSettings {
            threads: Some(2),
            ..EncoderSettings::default()
        });
        let job = job(&tree);
        let staging = staging_path(&job.output);
        let args = encoder.arguments(&job, &staging, true);
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner -nostdin -loglevel error -y -i "));
        assert!(joined.contains("-ss 61.500 -t 2.005 -map 0:a:0 -map_metadata 0"));
        assert!(joined.contains("-metadata title=Intro -c:a libmp3lame -ar 44100 -ac 2 -threads 2"));
        assert_eq!(args.last(), Some(&staging.display().to_string()));
        assert!(encoder.arguments(&job, &staging, false).contains(&"-1".to_string()));
        Ok(())
    }

    #[test]
    fn settings_round_trip_through_properties() {
        let settings = EncoderSettings {
            program: "/opt/ffmpeg".into(),
            threads: Some(4),
            timeout: Some(Duration::from_secs(90)),
        };
        let mut properties = PropertySet::new();
        settings.write_properties(&mut properties);
        assert_eq!(EncoderSettings::from_properties(&properties), settings);
        assert_eq!(
            EncoderSettings::from_properties(&PropertySet::new()).program,
            "ffmpeg"
        );
    }

    #[test]
    fn missing_program_is_an_io_error() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let encoder = Encoder::new(EncoderSettings {
            program: "/definitely/missing/encoder".into(),
            ..EncoderSettings::default()
        });
        let err = encoder.run(&job(&tree), &CancelFlag::new());
        assert!(matches!(
            err,
            Err(EngineError::Io {
                operation: "encoder.spawn",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn cancelled_flag_short_circuits() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = Encoder::default().run(&job(&tree), &cancel);
        assert!(matches!(err, Err(EngineError::Cancelled { .. })));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_exit_code_and_cleans_staging() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let encoder = Encoder::new(EncoderSettings {
            program: "false".into(),
            ..EncoderSettings::default()
        });
        let job = job(&tree);
        let err = encoder.run(&job, &CancelFlag::new());
        assert!(matches!(
            err,
            Err(EngineError::EncoderFailed {
                status: Some(1),
                ..
            })
        ));
        assert!(!staging_path(&job.output).exists());
        assert!(!job.output.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_long_running_program() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        let encoder = Encoder::new(EncoderSettings {
            program: "yes".into(),
            threads: None,
            timeout: Some(Duration::from_millis(100)),
        });
        let err = encoder.run(&job(&tree), &CancelFlag::new());
        assert!(matches!(err, Err(EngineError::TimedOut { .. })));
        Ok(())
    }

    fn silent_wav(frames: u32) -> Vec<u8> {
        let data_len = frames * 4;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&2_u16.to_le_bytes());
        bytes.extend_from_slice(&44_100_u32.to_le_bytes());
        bytes.extend_from_slice(&(44_100_u32 * 4).to_le_bytes());
        bytes.extend_from_slice(&4_u16.to_le_bytes());
        bytes.extend_from_slice(&16_u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);
        bytes
    }

    #[test]
    fn ffmpeg_encodes_into_place() -> TestResult<()> {
        if !program_available("ffmpeg") {
            return Ok(());
        }
        let tree = TreeFixture::new()?;
        let input = tree.file("in.wav", &silent_wav(44_100))?;
        let job = EncodeJob {
            input,
            output: tree.join("out/in.flac"),
            codec_args: vec!["-c:a".into(), "flac".into()],
            start_ms: None,
            duration_ms: None,
            metadata: Vec::new(),
            map_metadata: false,
            audio_only: true,
            sample_rate: None,
            channels: None,
        };
        Encoder::default().run(&job, &CancelFlag::new())?;
        assert!(tree.exists("out/in.flac"));
        assert!(!staging_path(&job.output).exists());
        Ok(())
    }
}
