//! Where derived outputs (converted or split audio) are written.

use std::path::{Path, PathBuf};

use reshelve_config::PropertySet;
use serde::{Deserialize, Serialize};

/// Output directory relative to the source entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum OutputLocation {
    /// Next to the source.
    #[default]
    SourceDir,
    /// A named sub-folder of the source's directory.
    SubFolder(String),
    /// A path relative to the source's directory (may climb with `..`), or absolute.
    Relative(PathBuf),
}

impl OutputLocation {
    /// Read `output.mode` / `output.path`.
    #[must_use]
    pub fn from_properties(properties: &PropertySet) -> Self {
        let path = properties.get_string("output.path", "");
        match properties.get_string("output.mode", "source_dir").as_str() {
            "sub_folder" if !path.trim().is_empty() => Self::SubFolder(path.trim().to_string()),
            "relative" if !path.trim().is_empty() => Self::Relative(PathBuf::from(path.trim())),
            _ => Self::SourceDir,
        }
    }

    /// Write `output.mode` / `output.path`.
    pub fn write_properties(&self, properties: &mut PropertySet) {
        match self {
            Self::SourceDir => properties.set("output.mode", "source_dir"),
            Self::SubFolder(name) => {
                properties.set("output.mode", "sub_folder");
                properties.set("output.path", name.as_str());
            }
            Self::Relative(path) => {
                properties.set("output.mode", "relative");
                properties.set("output.path", path.display().to_string());
            }
        }
    }

    /// Output directory for an entry currently living in `dir`.
    #[must_use]
    pub fn resolve(&self, dir: &Path) -> PathBuf {
        match self {
            Self::SourceDir => dir.to_path_buf(),
            Self::SubFolder(name) => dir.join(name),
            Self::Relative(path) => normalise(&dir.join(path)),
        }
    }
}

/// Collapse `.` and `..` lexically.
pub(crate) fn normalise(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_handles_each_mode() {
        let dir = Path::new("/music/album");
        assert_eq!(OutputLocation::SourceDir.resolve(dir), dir);
        assert_eq!(
            OutputLocation::SubFolder("mp3".into()).resolve(dir),
            PathBuf::from("/music/album/mp3")
        );
        assert_eq!(
            OutputLocation::Relative("../converted".into()).resolve(dir),
            PathBuf::from("/music/converted")
        );
        assert_eq!(
            OutputLocation::Relative("/out".into()).resolve(dir),
            PathBuf::from("/out")
        );
    }

    #[test]
    fn blank_path_falls_back_to_source_dir() {
        let mut properties = PropertySet::new();
        properties.set("output.mode", "sub_folder");
        assert_eq!(
            OutputLocation::from_properties(&properties),
            OutputLocation::SourceDir
        );

        let mut written = PropertySet::new();
        OutputLocation::SubFolder("flac".into()).write_properties(&mut written);
        assert_eq!(
            OutputLocation::from_properties(&written),
            OutputLocation::SubFolder("flac".into())
        );
    }
}
