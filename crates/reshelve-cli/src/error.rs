//! CLI error type distinguishing bad input from operational failures.

use std::fmt::{self, Display, Formatter};

use reshelve_config::ConfigError;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidField {
                section,
                field,
                value,
                reason,
            } => {
                let value = value.map(|value| format!(" ({value})")).unwrap_or_default();
                Self::validation(format!("invalid profile: {section}.{field}: {reason}{value}"))
            }
            ConfigError::Parse { path, source } => {
                let origin = path.map(|path| format!(" {}", path.display())).unwrap_or_default();
                Self::validation(format!("invalid profile document{origin}: {source}"))
            }
            other @ ConfigError::Io { .. } => Self::failure(other),
        }
    }
}
