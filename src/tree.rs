//! Recursive directory enumeration into an ordered `FileNode` tree.

use std::cmp::Ordering;
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use crate::backend::RemoteFs;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::transport::{EntryKind, RemoteEntry};

/// One entry of a built tree.
///
/// `children` is `None` on a directory whose listing failed or was cut off
/// by the depth limit; an empty directory has `Some(vec![])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    fn leaf(name: &str, path: &RemotePath, is_dir: bool) -> Self {
        FileNode {
            name: name.to_string(),
            path: path.to_string(),
            is_dir,
            children: None,
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(FileNode::count)
            .sum::<usize>()
    }
}

/// Directories sort before files; names compare case-insensitively, with the
/// exact name as a tie-breaker so the order is total.
fn node_order(a: &FileNode, b: &FileNode) -> Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

pub struct TreeBuilder<'a> {
    fs: &'a dyn RemoteFs,
    max_depth: usize,
    exclude: Option<GlobSet>,
    deadline: Option<Instant>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(fs: &'a dyn RemoteFs) -> Self {
        TreeBuilder {
            fs,
            max_depth: 32,
            exclude: None,
            deadline: None,
        }
    }

    /// Directories at this depth are returned without children. The root's
    /// own entries are depth 1.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Leave out entries whose name matches any of `patterns`.
    pub fn exclude(mut self, patterns: &[String]) -> Result<Self, BridgeError> {
        self.exclude = if patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };
        Ok(self)
    }

    /// Fail with `Timeout` once `deadline` passes.
    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build the tree rooted at `root`.
    ///
    /// A directory root yields its ordered children; a file root yields a
    /// single leaf. Failing to stat or list the root fails the whole call.
    pub fn build(&self, root: &RemotePath) -> Result<Vec<FileNode>, BridgeError> {
        self.check_deadline()?;
        let stat = self.fs.stat(root)?;
        if !stat.is_dir() {
            return Ok(vec![FileNode::leaf(root.file_name(), root, false)]);
        }
        let entries = self.fs.list(root)?;
        self.children(root, entries, 1)
    }

    fn children(
        &self,
        dir: &RemotePath,
        entries: Vec<RemoteEntry>,
        depth: usize,
    ) -> Result<Vec<FileNode>, BridgeError> {
        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.is_excluded(&entry.name) {
                continue;
            }
            let path = dir.join(&entry.name);
            let is_dir = self.entry_is_dir(&path, &entry)?;
            let mut node = FileNode::leaf(&entry.name, &path, is_dir);
            if is_dir {
                node.children = self.expand(&path, depth)?;
            }
            nodes.push(node);
        }
        nodes.sort_by(node_order);
        Ok(nodes)
    }

    /// Children of a non-root directory. Listing failures are tolerated;
    /// errors that break the session are not.
    fn expand(&self, path: &RemotePath, depth: usize) -> Result<Option<Vec<FileNode>>, BridgeError> {
        if depth >= self.max_depth {
            tracing::warn!(path = %path, depth, "depth limit reached; not descending");
            return Ok(None);
        }
        self.check_deadline()?;
        match self.fs.list(path) {
            Ok(entries) => Ok(Some(self.children(path, entries, depth + 1)?)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(path = %path, "listing failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Symbolic links count as directories when their target is one.
    fn entry_is_dir(&self, path: &RemotePath, entry: &RemoteEntry) -> Result<bool, BridgeError> {
        match entry.stat.kind {
            EntryKind::Dir => Ok(true),
            EntryKind::Symlink => match self.fs.stat(path) {
                Ok(target) => Ok(target.is_dir()),
                Err(e) if e.is_fatal() => Err(e),
                Err(_) => Ok(false),
            },
            EntryKind::File | EntryKind::Other => Ok(false),
        }
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude
            .as_ref()
            .map(|set| set.is_match(name))
            .unwrap_or(false)
    }

    fn check_deadline(&self) -> Result<(), BridgeError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(BridgeError::Timeout { op: "get_tree" })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::direct::DirectBackend;
    use crate::transport::memory::{Fault, MemoryRemote};
    use std::sync::Arc;
    use std::time::Duration;

    fn p(s: &str) -> RemotePath {
        RemotePath::parse(s).unwrap()
    }

    fn names(nodes: &[FileNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn fs(remote: &Arc<MemoryRemote>) -> DirectBackend {
        DirectBackend::new(Arc::new(remote.open()))
    }

    #[test]
    fn directories_first_then_case_insensitive() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/w/b.txt", b"");
        remote.add_dir("/w/A");
        remote.add_file("/w/a.txt", b"");
        remote.add_dir("/w/B");
        let backend = fs(&remote);
        let tree = TreeBuilder::new(&backend).build(&p("/w")).unwrap();
        assert_eq!(names(&tree), vec!["A", "B", "a.txt", "b.txt"]);
        assert_eq!(tree[0].path, "/w/A");
        assert_eq!(tree[0].children, Some(vec![]));
        assert_eq!(tree[2].children, None);
    }

    #[test]
    fn file_root_is_a_single_leaf() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/etc/hosts", b"127.0.0.1");
        let backend = fs(&remote);
        let tree = TreeBuilder::new(&backend).build(&p("/etc/hosts")).unwrap();
        assert_eq!(
            tree,
            vec![FileNode {
                name: "hosts".into(),
                path: "/etc/hosts".into(),
                is_dir: false,
                children: None,
            }]
        );
    }

    #[test]
    fn unreadable_subdirectory_has_no_children() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/w/open/one.txt", b"1");
        remote.add_file("/w/locked/secret.txt", b"2");
        remote.add_file("/w/top.txt", b"3");
        remote.deny("/w/locked");
        let backend = fs(&remote);
        let tree = TreeBuilder::new(&backend).build(&p("/w")).unwrap();
        assert_eq!(names(&tree), vec!["locked", "open", "top.txt"]);
        assert!(tree[0].is_dir);
        assert_eq!(tree[0].children, None);
        assert_eq!(names(tree[1].children.as_ref().unwrap()), vec!["one.txt"]);
    }

    #[test]
    fn root_failure_fails_the_call() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/w");
        remote.deny("/w");
        let backend = fs(&remote);
        assert!(matches!(
            TreeBuilder::new(&backend).build(&p("/w")),
            Err(BridgeError::PermissionDenied { .. })
        ));
        assert!(matches!(
            TreeBuilder::new(&backend).build(&p("/missing")),
            Err(BridgeError::NotFound { .. })
        ));
    }

    #[test]
    fn depth_limit_cuts_symlink_cycles() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/w/d");
        remote.add_symlink("/w/d/loop", "/w");
        let backend = fs(&remote);
        let tree = TreeBuilder::new(&backend)
            .max_depth(4)
            .build(&p("/w"))
            .unwrap();
        // d -> loop -> d -> loop(cut)
        let d = &tree[0];
        let loop1 = &d.children.as_ref().unwrap()[0];
        assert!(loop1.is_dir);
        let d2 = &loop1.children.as_ref().unwrap()[0];
        let loop2 = &d2.children.as_ref().unwrap()[0];
        assert_eq!(loop2.path, "/w/d/loop/d/loop");
        assert_eq!(loop2.children, None);
        assert_eq!(tree[0].count(), 4);
    }

    #[test]
    fn excluded_names_are_skipped() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/w/.git/HEAD", b"ref");
        remote.add_file("/w/src/main.rs", b"");
        remote.add_file("/w/debug.log", b"");
        let backend = fs(&remote);
        let tree = TreeBuilder::new(&backend)
            .exclude(&[".git".to_string(), "*.log".to_string()])
            .unwrap()
            .build(&p("/w"))
            .unwrap();
        assert_eq!(names(&tree), vec!["src"]);
    }

    #[test]
    fn invalid_exclude_pattern_is_rejected() {
        let remote = MemoryRemote::new("dev", "pw");
        let backend = fs(&remote);
        assert!(TreeBuilder::new(&backend)
            .exclude(&["a[".to_string()])
            .is_err());
    }

    #[test]
    fn fatal_errors_below_root_propagate() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/w/sub");
        let backend = fs(&remote);
        let builder = TreeBuilder::new(&backend);
        let entries = backend.list(&p("/w")).unwrap();
        // The next call is list(/w/sub).
        remote.fail_next(Fault::Transport);
        assert!(matches!(
            builder.children(&p("/w"), entries, 1),
            Err(BridgeError::Transport { .. })
        ));
    }

    #[test]
    fn expired_deadline_times_out() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/w");
        let backend = fs(&remote);
        let past = Instant::now() - Duration::from_millis(1);
        assert!(matches!(
            TreeBuilder::new(&backend).deadline(Some(past)).build(&p("/w")),
            Err(BridgeError::Timeout { .. })
        ));
    }

    #[test]
    fn serializes_with_camel_case_and_omits_absent_children() {
        let node = FileNode {
            name: "a".into(),
            path: "/a".into(),
            is_dir: true,
            children: None,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["isDir"], true);
        assert!(json.get("children").is_none());
    }
}
