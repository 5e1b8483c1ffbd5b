//! Zip extraction with password candidates.
//!
//! # Design
//! - An archive `<dir>/<stem>.zip` extracts into `<dir>/<stem>/`.
//! - Extraction goes to a staging directory that is moved into place only after
//!   every entry was written, so a failed attempt leaves no partial output.
//! - Attempts run without a password first, then with each configured password.
//!   A corrupt archive fails immediately; password failures fall through to the
//!   next candidate.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use reshelve_config::PropertySet;
use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use super::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
    map_records, reject_collisions, virtual_paths,
};
use crate::cancel::CancelFlag;
use crate::condition::{ConditionSet, extension_of};
use crate::error::{EngineError, EngineResult};
use crate::fsops;
use crate::record::{ChangeRecord, OperationKind};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Strategy identifier.
pub const ID: &str = "extract";

const STAGING_PREFIX: &str = ".reshelve-extract-";

/// User options for the extract strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractConfig {
    /// Passwords tried after the password-less attempt, in order.
    pub passwords: Vec<String>,
    /// Remove the archive after a successful extraction.
    pub delete_on_success: bool,
    /// Remove the archive when extraction fails.
    pub delete_on_failure: bool,
    /// Replace an existing output folder.
    pub overwrite: bool,
    /// Filter selecting archives.
    pub conditions: ConditionSet,
}

impl ExtractConfig {
    /// Read the configuration from properties.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        Self {
            passwords: properties.get_list("passwords"),
            delete_on_success: properties.get_bool("delete_on_success", false),
            delete_on_failure: properties.get_bool("delete_on_failure", false),
            overwrite: properties.get_bool("overwrite", false),
            conditions: properties.get_json("conditions", ConditionSet::default()),
        }
    }
}

impl StrategyConfig for ExtractConfig {
    fn id(&self) -> &'static str {
        ID
    }

    fn capture(&self) -> Arc<dyn Strategy> {
        Arc::new(ExtractStrategy {
            config: self.clone(),
        })
    }

    fn to_properties(&self) -> PropertySet {
        let mut properties = PropertySet::new();
        if !self.passwords.is_empty() {
            properties.set_json("passwords", &self.passwords);
        }
        properties.set_display("delete_on_success", self.delete_on_success);
        properties.set_display("delete_on_failure", self.delete_on_failure);
        properties.set_display("overwrite", self.overwrite);
        if !self.conditions.is_empty() {
            properties.set_json("conditions", &self.conditions);
        }
        properties
    }
}

/// Why one extraction attempt failed.
enum AttemptError {
    /// The candidate password (or its absence) was wrong.
    Password,
    /// Any other failure; retrying with another password cannot help.
    Fatal(EngineError),
}

/// Captured extract strategy.
pub struct ExtractStrategy {
    config: ExtractConfig,
}

impl ExtractStrategy {
    fn apply(&self, record: &mut ChangeRecord) {
        if extension_of(&record.new_name).as_deref() != Some("zip")
            || !self.config.conditions.test(&record.subject())
        {
            return;
        }
        let Some((stem, _)) = record.new_name.rsplit_once('.') else {
            return;
        };
        if stem.is_empty() {
            return;
        }
        let target = record.virtual_dir().join(stem);
        record.assign(OperationKind::Extract, target);
    }

    fn extract(&self, source: &Path, target: &Path, cancel: &CancelFlag) -> EngineResult<usize> {
        let file = File::open(source).map_err(|err| EngineError::io("extract.open", source, err))?;
        let mut archive =
            ZipArchive::new(file).map_err(|err| EngineError::zip("extract.decode", source, err))?;
        let staging = staging_dir(target);
        let candidates = std::iter::once(None).chain(self.config.passwords.iter().map(Some));

        let mut attempts = 0;
        for password in candidates {
            attempts += 1;
            if staging.exists() {
                fsops::remove_entry(&staging)?;
            }
            let outcome = extract_into(
                &mut archive,
                password.map(String::as_bytes),
                source,
                &staging,
                cancel,
            );
            match outcome {
                Ok(()) => {
                    if target.exists() {
                        fsops::remove_entry(target)?;
                    }
                    fsops::move_tree(&staging, target)?;
                    return Ok(attempts);
                }
                Err(AttemptError::Password) => {
                    debug!(path = %source.display(), attempt = attempts, "archive password rejected");
                }
                Err(AttemptError::Fatal(err)) => {
                    fsops::remove_entry(&staging)?;
                    return Err(err);
                }
            }
        }
        fsops::remove_entry(&staging)?;
        Err(EngineError::PasswordsExhausted {
            path: source.to_path_buf(),
            attempts,
        })
    }
}

impl Strategy for ExtractStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    fn target_type(&self) -> TargetType {
        TargetType::FilesOnly
    }

    fn operations(&self) -> &'static [OperationKind] {
        &[OperationKind::Extract]
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
            return Err(EngineError::TargetExists {
                path: record.new_path.clone(),
            });
        }
        match self.extract(&record.source_path, &record.new_path, ctx.cancel) {
            Ok(attempts) => {
                info!(
                    record_id = %record.id,
                    path = %record.source_path.display(),
                    attempts,
                    "archive extracted"
                );
                if self.config.delete_on_success {
                    fsops::remove_entry(&record.source_path)?;
                }
                Ok(ExecuteOutcome::Applied)
            }
            Err(err) => {
                if self.config.delete_on_failure && !matches!(err, EngineError::Cancelled { .. }) {
                    fsops::remove_entry(&record.source_path)?;
                }
                Err(err)
            }
        }
    }
}

fn staging_dir(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{STAGING_PREFIX}{name}"))
}

fn password_failure(err: &ZipError) -> bool {
    matches!(err, ZipError::UnsupportedArchive(message) if *message == ZipError::PASSWORD_REQUIRED)
}

fn extract_into(
    archive: &mut ZipArchive<File>,
    password: Option<&[u8]>,
    source: &Path,
    staging: &Path,
    cancel: &CancelFlag,
) -> Result<(), AttemptError> {
    let classify = |err: ZipError| {
        if password_failure(&err) {
            AttemptError::Password
        } else {
            AttemptError::Fatal(EngineError::zip("extract.read_entry", source, err))
        }
    };
    fs::create_dir_all(staging)
        .map_err(|err| AttemptError::Fatal(EngineError::io("extract.create_dir", staging, err)))?;

    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(AttemptError::Fatal(EngineError::Cancelled {
                operation: "extract",
            }));
        }
        let mut entry = match password {
            None => archive.by_index(index).map_err(classify)?,
            Some(password) => match archive.by_index_decrypt(index, password) {
                Ok(Ok(entry)) => entry,
                Ok(Err(_)) => return Err(AttemptError::Password),
                Err(err) => return Err(classify(err)),
            },
        };
        let entry_path = sanitize_archive_path(entry.name()).map_err(AttemptError::Fatal)?;
        let destination = staging.join(&entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&destination).map_err(|err| {
                AttemptError::Fatal(EngineError::io("extract.create_dir", &destination, err))
            })?;
            continue;
        }
        fsops::ensure_parent(&destination).map_err(AttemptError::Fatal)?;
        let mut output = File::create(&destination).map_err(|err| {
            AttemptError::Fatal(EngineError::io("extract.create_file", &destination, err))
        })?;
        if let Err(err) = io::copy(&mut entry, &mut output) {
            // A wrong ZipCrypto password can pass the header check and only fail the CRC.
            return Err(if password.is_some() {
                AttemptError::Password
            } else {
                AttemptError::Fatal(EngineError::io("extract.copy", &destination, err))
            });
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&destination, fs::Permissions::from_mode(mode)).map_err(|err| {
                AttemptError::Fatal(EngineError::io("extract.set_permissions", &destination, err))
            })?;
        }
    }
    Ok(())
}

fn sanitize_archive_path(entry: &str) -> EngineResult<PathBuf> {
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(EngineError::invalid("archive_entry", "absolute_path", entry));
    }
    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => return Err(EngineError::invalid("archive_entry", "invalid_segment", entry)),
        }
    }
    Ok(sanitized)
}
