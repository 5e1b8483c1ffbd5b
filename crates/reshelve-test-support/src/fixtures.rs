//! Environment checks for tests that depend on external programs.

use std::process::{Command, Stdio};

/// Returns `true` if `program` can be spawned with `-version`.
///
/// Used to gate encoder round trips on machines without `ffmpeg`.
#[must_use]
pub fn program_available(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Write an executable stand-in for `ffmpeg` into `dir` that writes `output`
/// to its last argument and exits successfully.
///
/// # Errors
///
/// Returns an error if the script cannot be written or made executable.
#[cfg(unix)]
pub fn scripted_encoder(
    dir: &std::path::Path,
    output: &str,
) -> anyhow::Result<std::path::PathBuf> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Context;

    let path = dir.join("fake-ffmpeg");
    let script = format!(
        "#!/bin/sh\nfor last in \"$@\"; do :; done\nprintf '%s' '{output}' > \"$last\"\n"
    );
    fs::write(&path, script).with_context(|| format!("failed to write {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_unavailable() {
        assert!(!program_available("/definitely/missing/encoder"));
    }

    #[cfg(unix)]
    #[test]
    fn scripted_encoder_writes_its_last_argument() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let program = scripted_encoder(dir.path(), "encoded")?;
        let target = dir.path().join("out.flac");
        let status = Command::new(&program)
            .args(["-i", "in.wav", target.to_string_lossy().as_ref()])
            .status()?;
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(&target)?, "encoded");
        Ok(())
    }
}
