//! Temporary directory trees for filesystem tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{Builder, TempDir};

/// Temporary directory removed on drop, with helpers to populate it.
#[derive(Debug)]
pub struct TreeFixture {
    root: TempDir,
}

impl TreeFixture {
    /// Create an empty tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let root = Builder::new()
            .prefix("reshelve-tree")
            .tempdir()
            .context("failed to create fixture directory")?;
        Ok(Self { root })
    }

    /// Root of the tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Absolute path of `relative` inside the tree.
    #[must_use]
    pub fn join(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Write a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parents cannot be written.
    pub fn file(&self, relative: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Create a directory and its parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn dir(&self, relative: &str) -> Result<PathBuf> {
        let path = self.join(relative);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(path)
    }

    /// Whether `relative` exists inside the tree.
    #[must_use]
    pub fn exists(&self, relative: &str) -> bool {
        self.join(relative).exists()
    }

    /// Read a file inside the tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.join(relative);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}
