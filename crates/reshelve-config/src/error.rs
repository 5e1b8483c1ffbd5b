//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing a configuration file failed.
    #[error("configuration io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The profile document could not be parsed.
    #[error("invalid profile document")]
    Parse {
        /// File the document came from, when loaded from disk.
        path: Option<PathBuf>,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: String,
        /// Field that failed validation.
        field: String,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(
        section: &str,
        field: &str,
        value: Option<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section: section.to_string(),
            field: field.to_string(),
            value,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn io_error_keeps_source_and_constant_message() {
        let err = ConfigError::io(
            "profile.read",
            "/tmp/profile.yaml",
            io::Error::other("denied"),
        );
        assert_eq!(err.to_string(), "configuration io failure");
        assert!(err.source().is_some());
    }

    #[test]
    fn invalid_field_captures_context() {
        let err = ConfigError::invalid("scan", "min_depth", Some("9".into()), "exceeds_max_depth");
        match err {
            ConfigError::InvalidField {
                section,
                field,
                value,
                reason,
            } => {
                assert_eq!(section, "scan");
                assert_eq!(field, "min_depth");
                assert_eq!(value.as_deref(), Some("9"));
                assert_eq!(reason, "exceeds_max_depth");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
