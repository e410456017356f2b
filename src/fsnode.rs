//! Files and directories with cheap change detection.
//!
//! A node's change hash combines its modification time and length, which is
//! enough to notice a rebuild without reading file contents.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hash reported for paths that do not exist.
pub const MISSING_HASH: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    path: PathBuf,
    kind: NodeKind,
}

impl PathNode {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::File,
        }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::Directory,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        match self.kind {
            NodeKind::File => self.path.is_file(),
            NodeKind::Directory => self.path.is_dir(),
        }
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.path.metadata().and_then(|m| m.modified()).ok()
    }

    pub fn len(&self) -> u64 {
        self.path.metadata().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of modification time and length, or [`MISSING_HASH`].
    pub fn change_hash(&self) -> u64 {
        let Ok(meta) = self.path.metadata() else {
            return MISSING_HASH;
        };
        let nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut hasher = DefaultHasher::new();
        nanos.hash(&mut hasher);
        meta.len().hash(&mut hasher);
        hasher.finish() | 1
    }

    /// Files below this directory whose extension matches one of `extensions`.
    ///
    /// `max_depth` 0 means the directory's own entries only.
    pub fn children(&self, extensions: &[&str], max_depth: usize) -> Vec<PathNode> {
        if self.kind != NodeKind::Directory || !self.path.is_dir() {
            return Vec::new();
        }
        let mut files: Vec<PathNode> = jwalk::WalkDir::new(&self.path)
            .skip_hidden(false)
            .max_depth(max_depth + 1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path())
            .filter(|p| has_extension(p, extensions))
            .map(PathNode::file)
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Combined change hash of the matching files below a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectorySnapshot(u64);

impl DirectorySnapshot {
    pub fn capture(dir: &PathNode, extensions: &[&str], max_depth: usize) -> Self {
        let mut hasher = DefaultHasher::new();
        for file in dir.children(extensions, max_depth) {
            file.path.hash(&mut hasher);
            file.change_hash().hash(&mut hasher);
        }
        Self(hasher.finish())
    }
}
