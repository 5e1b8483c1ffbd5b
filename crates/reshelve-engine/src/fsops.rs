//! Filesystem helpers shared by the strategies' execute paths.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};

/// Create the parent directory of `path` if needed.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent(path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|source| EngineError::io("ensure_parent", parent, source))?;
    }
    Ok(())
}

/// Recursively copy a file or directory.
///
/// # Errors
///
/// Returns an error if any entry cannot be read or written.
pub fn copy_tree(source: &Path, destination: &Path) -> EngineResult<()> {
    if source.is_file() {
        ensure_parent(destination)?;
        fs::copy(source, destination)
            .map_err(|err| EngineError::io("copy_tree.copy_file", destination, err))?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|err| EngineError::walkdir("copy_tree.walk", source, err))?;
        let relative = entry.path().strip_prefix(source).map_err(|_| {
            EngineError::invalid(
                "source_path",
                "strip_prefix",
                entry.path().display().to_string(),
            )
        })?;
        let target_path = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target_path)
                .map_err(|err| EngineError::io("copy_tree.create_dir", &target_path, err))?;
        } else {
            ensure_parent(&target_path)?;
            fs::copy(entry.path(), &target_path)
                .map_err(|err| EngineError::io("copy_tree.copy_entry", &target_path, err))?;
        }
    }
    Ok(())
}

/// Move a file or directory, falling back to copy-and-remove across devices.
///
/// # Errors
///
/// Returns an error if the entry cannot be moved.
pub fn move_tree(source: &Path, destination: &Path) -> EngineResult<()> {
    ensure_parent(destination)?;
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    copy_tree(source, destination)?;
    remove_entry(source)
}

/// Move `source` onto `destination`, merging directories entry by entry.
///
/// An existing destination directory is never removed as a whole; only
/// conflicting files are replaced, and only when `overwrite` is set. The
/// emptied source directory is removed afterwards.
///
/// # Errors
///
/// Returns [`EngineError::TargetExists`] for a conflicting file without
/// `overwrite`, or an IO error if any entry cannot be moved.
pub fn merge_tree(source: &Path, destination: &Path, overwrite: bool) -> EngineResult<()> {
    if !destination.exists() || same_entry(source, destination) {
        return move_tree(source, destination);
    }
    if source.is_dir() && destination.is_dir() {
        let mut children = fs::read_dir(source)
            .map_err(|err| EngineError::io("merge_tree.read_dir", source, err))?
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| EngineError::io("merge_tree.read_entry", source, err))?;
        children.sort();
        for name in children {
            merge_tree(&source.join(&name), &destination.join(&name), overwrite)?;
        }
        return fs::remove_dir(source)
            .map_err(|err| EngineError::io("merge_tree.remove_source", source, err));
    }
    if !overwrite {
        return Err(EngineError::TargetExists {
            path: destination.to_path_buf(),
        });
    }
    remove_entry(destination)?;
    move_tree(source, destination)
}

/// Remove a file or a whole directory tree.
///
/// # Errors
///
/// Returns an error if removal fails for any reason other than the entry
/// already being gone.
pub fn remove_entry(path: &Path) -> EngineResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(EngineError::io("remove_entry.stat", path, err)),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(EngineError::io("remove_entry", path, err)),
    }
}

/// Rename `source` to `target`, refusing to replace an existing entry unless
/// `overwrite` is set.
///
/// # Errors
///
/// Returns [`EngineError::TargetExists`] when the target is occupied, or an IO
/// error if the rename fails.
pub fn rename_entry(source: &Path, target: &Path, overwrite: bool) -> EngineResult<()> {
    if target.exists() && !same_entry(source, target) {
        if !overwrite {
            return Err(EngineError::TargetExists {
                path: target.to_path_buf(),
            });
        }
        remove_entry(target)?;
    }
    ensure_parent(target)?;
    fs::rename(source, target).map_err(|err| EngineError::io("rename_entry", target, err))
}

/// Whether two paths name the same entry (case-only renames on
/// case-insensitive file systems).
fn same_entry(left: &Path, right: &Path) -> bool {
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reshelve_test_support::TreeFixture;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn move_tree_relocates_directories() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("album/01.flac", b"one")?;
        tree.file("album/art/cover.jpg", b"img")?;

        move_tree(&tree.join("album"), &tree.join("sorted/Album"))?;
        assert!(!tree.exists("album"));
        assert_eq!(tree.read("sorted/Album/01.flac")?, b"one");
        assert_eq!(tree.read("sorted/Album/art/cover.jpg")?, b"img");
        Ok(())
    }

    #[test]
    fn copy_tree_keeps_source() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("a/b.txt", b"x")?;
        copy_tree(&tree.join("a"), &tree.join("c"))?;
        assert!(tree.exists("a/b.txt"));
        assert!(tree.exists("c/b.txt"));
        Ok(())
    }

    #[test]
    fn rename_entry_respects_overwrite() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("a.mp3", b"new")?;
        tree.file("b.mp3", b"old")?;

        let err = rename_entry(&tree.join("a.mp3"), &tree.join("b.mp3"), false);
        assert!(matches!(err, Err(EngineError::TargetExists { .. })));

        rename_entry(&tree.join("a.mp3"), &tree.join("b.mp3"), true)?;
        assert_eq!(tree.read("b.mp3")?, b"new");
        assert!(!tree.exists("a.mp3"));
        Ok(())
    }

    #[test]
    fn merge_tree_keeps_existing_destination_entries() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("rock/b.mp3", b"b")?;
        tree.file("rock/same.mp3", b"new")?;
        tree.file("sorted/rock/a.mp3", b"a")?;
        tree.file("sorted/rock/same.mp3", b"old")?;

        let err = merge_tree(&tree.join("rock"), &tree.join("sorted/rock"), false);
        assert!(matches!(err, Err(EngineError::TargetExists { .. })));
        assert_eq!(tree.read("sorted/rock/same.mp3")?, b"old");

        merge_tree(&tree.join("rock"), &tree.join("sorted/rock"), true)?;
        assert!(!tree.exists("rock"));
        assert_eq!(tree.read("sorted/rock/a.mp3")?, b"a");
        assert_eq!(tree.read("sorted/rock/b.mp3")?, b"b");
        assert_eq!(tree.read("sorted/rock/same.mp3")?, b"new");
        Ok(())
    }

    #[test]
    fn remove_entry_tolerates_missing_paths() -> TestResult<()> {
        let tree = TreeFixture::new()?;
        tree.file("d/e.txt", b"x")?;
        remove_entry(&tree.join("d"))?;
        remove_entry(&tree.join("d"))?;
        assert!(!tree.exists("d"));
        Ok(())
    }
}
