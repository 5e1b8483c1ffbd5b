//! Tree view of the virtual end state.
//!
//! Records hang under the scan root that contains their virtual path; missing
//! intermediate directories are synthesised so every record is reachable.
//! Records whose virtual path leaves every root get a top-level node for their
//! parent directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::record::ChangeRecord;
use crate::strategy::root_of;

/// One node of the preview tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewNode {
    /// Display name.
    pub name: String,
    /// Virtual path.
    pub path: PathBuf,
    /// Record placed at this path, if any.
    pub record: Option<ChangeRecord>,
    /// Whether the node exists only to connect descendants.
    pub synthesized: bool,
    /// Children keyed by name.
    pub children: BTreeMap<String, PreviewNode>,
}

impl PreviewNode {
    fn directory(name: String, path: PathBuf, synthesized: bool) -> Self {
        Self {
            name,
            path,
            record: None,
            synthesized,
            children: BTreeMap::new(),
        }
    }

    /// Whether the node renders as a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.record.as_ref().is_none_or(|record| record.attrs.is_dir) || !self.children.is_empty()
    }

    fn place(&mut self, relative: &Path, record: ChangeRecord) {
        let mut names: Vec<String> = relative
            .iter()
            .map(|component| component.to_string_lossy().into_owned())
            .collect();
        let Some(leaf) = names.pop() else {
            if self.record.is_none() {
                self.record = Some(record);
            }
            return;
        };
        let mut node = self;
        for name in names {
            let path = node.path.join(&name);
            node = node
                .children
                .entry(name.clone())
                .or_insert_with(|| Self::directory(name, path, true));
        }
        let path = node.path.join(&leaf);
        let key = match node.children.get(&leaf) {
            Some(existing) if existing.record.is_some() => format!("{leaf}#{}", record.id),
            _ => leaf.clone(),
        };
        let slot = node
            .children
            .entry(key)
            .or_insert_with(|| Self::directory(leaf, path, true));
        slot.record = Some(record);
        slot.synthesized = false;
    }

    fn render_into(&self, depth: usize, lines: &mut Vec<String>) {
        let mut line = format!("{}{}", "  ".repeat(depth), self.name);
        if self.is_dir() {
            line.push('/');
        }
        if let Some(record) = &self.record {
            if record.changed {
                line.push_str(&format!(
                    "  <- {} [{}]",
                    record.source_path.display(),
                    record.operation.as_str()
                ));
            }
            if record.is_terminal() {
                line.push_str(&format!(" ({}", record.status.as_str()));
                if let Some(reason) = &record.fail_reason {
                    line.push_str(&format!(": {reason}"));
                }
                line.push(')');
            }
        }
        lines.push(line);
        for child in self.children.values() {
            child.render_into(depth + 1, lines);
        }
    }

    fn count_records(&self) -> usize {
        usize::from(self.record.is_some())
            + self
                .children
                .values()
                .map(Self::count_records)
                .sum::<usize>()
    }
}

/// Virtual end state arranged as a tree per scan root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewTree {
    /// One node per scan root, followed by nodes for paths outside every root.
    pub roots: Vec<PreviewNode>,
}

impl PreviewTree {
    /// Arrange `records` under `roots`. With `changed_only`, unchanged records
    /// are left out.
    #[must_use]
    pub fn build<'r>(
        records: impl IntoIterator<Item = &'r ChangeRecord>,
        roots: &[PathBuf],
        changed_only: bool,
    ) -> Self {
        let mut nodes: Vec<PreviewNode> = roots
            .iter()
            .map(|root| PreviewNode::directory(root.display().to_string(), root.clone(), false))
            .collect();
        let mut outside: BTreeMap<PathBuf, PreviewNode> = BTreeMap::new();

        for record in records {
            if changed_only && !record.changed {
                continue;
            }
            if let Some(root) = root_of(roots, &record.new_path) {
                let relative = record.new_path.strip_prefix(root).unwrap_or(&record.new_path);
                if let Some(node) = nodes.iter_mut().find(|node| node.path == root) {
                    node.place(relative, record.clone());
                }
            } else {
                let parent = record.virtual_dir().to_path_buf();
                let node = outside.entry(parent.clone()).or_insert_with(|| {
                    PreviewNode::directory(parent.display().to_string(), parent.clone(), true)
                });
                node.place(Path::new(&record.new_name), record.clone());
            }
        }
        nodes.extend(outside.into_values());
        Self { roots: nodes }
    }

    /// Node at a virtual path.
    #[must_use]
    pub fn find(&self, path: &Path) -> Option<&PreviewNode> {
        let top = self
            .roots
            .iter()
            .filter(|node| path.starts_with(&node.path))
            .max_by_key(|node| node.path.components().count())?;
        let relative = path.strip_prefix(&top.path).ok()?;
        relative.iter().try_fold(top, |node, component| {
            node.children.get(component.to_string_lossy().as_ref())
        })
    }

    /// Number of records placed in the tree.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.roots.iter().map(PreviewNode::count_records).sum()
    }

    /// Indented text rendering, one line per node.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for root in &self.roots {
            root.render_into(0, &mut lines);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EntryAttrs, IdAllocator, OperationKind};

    fn record(ids: &IdAllocator, path: &str, is_dir: bool) -> ChangeRecord {
        ChangeRecord::new(
            ids.next_id(),
            PathBuf::from(path),
            EntryAttrs {
                is_dir,
                size: 0,
                modified: None,
            },
        )
    }

    #[test]
    fn moved_records_get_synthesized_parents() {
        let ids = IdAllocator::default();
        let mut moved = record(&ids, "/m/in/a.mp3", false);
        moved.assign(OperationKind::Move, PathBuf::from("/m/sorted/rock/a.mp3"));
        let kept = record(&ids, "/m/in", true);
        let roots = vec![PathBuf::from("/m")];

        let tree = PreviewTree::build([&moved, &kept], &roots, false);
        let sorted = tree.find(Path::new("/m/sorted"));
        assert!(sorted.is_some_and(|node| node.synthesized));
        let leaf = tree.find(Path::new("/m/sorted/rock/a.mp3"));
        assert_eq!(leaf.and_then(|node| node.record.as_ref()), Some(&moved));
        assert!(tree.find(Path::new("/m/in")).is_some_and(|node| !node.synthesized));
        assert_eq!(tree.record_count(), 2);

        let lines = tree.render();
        assert_eq!(lines[0], "/m/");
        assert!(lines.iter().any(|line| line.contains("a.mp3  <- /m/in/a.mp3 [move]")));
    }

    #[test]
    fn changed_only_hides_untouched_records() {
        let ids = IdAllocator::default();
        let untouched = record(&ids, "/m/a.mp3", false);
        let mut skipped = record(&ids, "/m/b.mp3", false);
        skipped.rename_to("a.mp3");
        skipped.skip("target is claimed by another entry");
        let roots = vec![PathBuf::from("/m")];

        let full = PreviewTree::build([&untouched, &skipped], &roots, false);
        assert_eq!(full.record_count(), 2);
        assert!(full.find(Path::new("/m/a.mp3#2")).is_some());

        let changed = PreviewTree::build([&untouched, &skipped], &roots, true);
        assert_eq!(changed.record_count(), 1);
        assert!(changed.render().iter().any(|line| line.contains("(skipped: target is claimed")));
    }

    #[test]
    fn records_outside_roots_get_their_own_node() {
        let ids = IdAllocator::default();
        let mut trashed = record(&ids, "/m/a.mp3", false);
        trashed.assign(OperationKind::Delete, PathBuf::from("/trash/m/a.mp3"));
        let tree = PreviewTree::build([&trashed], &[PathBuf::from("/m")], true);
        assert_eq!(tree.roots.len(), 2);
        assert!(tree.roots[1].synthesized);
        assert!(tree.find(Path::new("/trash/m/a.mp3")).is_some());
    }
}
