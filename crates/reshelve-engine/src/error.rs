//! # Design
//!
//! - Provide structured, constant-message errors for scanning and execution.
//! - Capture operation context (paths, fields, inputs) so failed records are reproducible.
//! - Preserve source errors without interpolating context into error messages;
//!   [`EngineError::detail`] renders the context for record failure reasons.

use std::error::Error as _;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced while scanning, analysing or executing records.
#[derive(Debug, Error)]
pub enum EngineError {
    /// IO failures while interacting with the filesystem.
    #[error("engine io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Walkdir traversal failures.
    #[error("engine walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Zip archive failures.
    #[error("engine zip failure")]
    Zip {
        /// Operation that triggered the archive failure.
        operation: &'static str,
        /// Path involved in the archive failure.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// Input validation failures.
    #[error("engine invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Required record parameter or state was missing.
    #[error("engine missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
    },
    /// A paired resource (e.g. the audio file behind a cue sheet) could not be located.
    #[error("engine missing resource")]
    MissingResource {
        /// Kind of resource that was expected.
        resource: &'static str,
        /// Path or name that was looked for.
        path: PathBuf,
    },
    /// The target path is occupied and overwriting is disabled.
    #[error("engine target exists")]
    TargetExists {
        /// Occupied target path.
        path: PathBuf,
    },
    /// The external encoder exited unsuccessfully.
    #[error("engine encoder failure")]
    EncoderFailed {
        /// Program that was invoked.
        program: String,
        /// Exit code when the process exited normally.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },
    /// Work was abandoned because cancellation was requested.
    #[error("engine operation cancelled")]
    Cancelled {
        /// Operation that observed the cancellation.
        operation: &'static str,
    },
    /// An external process exceeded its deadline and was killed.
    #[error("engine operation timed out")]
    TimedOut {
        /// Operation that timed out.
        operation: &'static str,
        /// Deadline that was exceeded.
        after: Duration,
    },
    /// Every candidate archive password failed.
    #[error("engine archive passwords exhausted")]
    PasswordsExhausted {
        /// Archive that could not be opened.
        path: PathBuf,
        /// Number of candidates tried (including "no password").
        attempts: usize,
    },
    /// Unsupported operation or mode.
    #[error("engine unsupported operation")]
    Unsupported {
        /// Operation that is unsupported.
        operation: &'static str,
        /// Optional value that triggered the unsupported error.
        value: Option<String>,
    },
}

impl EngineError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Zip {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason,
            value: Some(value.into()),
        }
    }

    /// Render the error with its structured context, for record failure reasons and logs.
    #[must_use]
    pub fn detail(&self) -> String {
        let context = match self {
            Self::Io {
                operation, path, ..
            }
            | Self::Walkdir {
                operation, path, ..
            }
            | Self::Zip {
                operation, path, ..
            } => format!("{operation} {}", path.display()),
            Self::InvalidInput {
                field,
                reason,
                value,
            } => value.as_ref().map_or_else(
                || format!("{field}: {reason}"),
                |value| format!("{field}: {reason} ({value})"),
            ),
            Self::MissingState { field } => (*field).to_string(),
            Self::MissingResource { resource, path } => {
                format!("{resource} {}", path.display())
            }
            Self::TargetExists { path } | Self::PasswordsExhausted { path, .. } => {
                path.display().to_string()
            }
            Self::EncoderFailed {
                program,
                status,
                stderr,
            } => {
                let code = status.map_or_else(|| "signal".to_string(), |code| code.to_string());
                if stderr.is_empty() {
                    format!("{program} exited with {code}")
                } else {
                    format!("{program} exited with {code}: {stderr}")
                }
            }
            Self::Cancelled { operation } => (*operation).to_string(),
            Self::TimedOut { operation, after } => {
                format!("{operation} after {}s", after.as_secs())
            }
            Self::Unsupported { operation, value } => value.as_ref().map_or_else(
                || (*operation).to_string(),
                |value| format!("{operation} ({value})"),
            ),
        };
        match self.source() {
            Some(source) => format!("{self}: {context}: {source}"),
            None => format!("{self}: {context}"),
        }
    }
}
