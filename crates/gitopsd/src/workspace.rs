//! In-memory file tree backing a cloned repository.
//!
//! The [`crate::repo::Repository`] owns exactly one workspace and is the
//! only writer. Paths are `/`-separated and relative to the workspace root;
//! absolute paths and `..` components are rejected so repository content can
//! never escape the tree.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SyncError};

/// Entry metadata returned by [`Workspace::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub is_dir: bool,
    pub len: u64,
}

/// An in-memory file tree.
#[derive(Debug, Default, Clone)]
pub struct Workspace {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes a workspace path: strips `.` components and duplicate
    /// separators, rejects absolute paths and `..`.
    pub fn normalize(path: &str) -> Result<String> {
        if path.starts_with('/') {
            return Err(SyncError::InvalidPath(path.to_string()));
        }
        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(SyncError::InvalidPath(path.to_string())),
                other => segments.push(other),
            }
        }
        Ok(segments.join("/"))
    }

    /// Writes a file, creating missing parent directories.
    pub fn write(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let path = Self::normalize(path)?;
        if path.is_empty() || self.dirs.contains(&path) {
            return Err(SyncError::InvalidPath(path));
        }
        self.add_parents(&path);
        self.files.insert(path, contents.to_vec());
        Ok(())
    }

    pub fn read(&self, path: &str) -> Result<&[u8]> {
        let path = Self::normalize(path)?;
        self.files
            .get(&path)
            .map(Vec::as_slice)
            .ok_or(SyncError::NotFound(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        match Self::normalize(path) {
            Ok(path) => {
                path.is_empty() || self.files.contains_key(&path) || self.dirs.contains(&path)
            }
            Err(_) => false,
        }
    }

    /// Removes a file. Parent directories stay behind even when they become
    /// empty; pruning them would churn the git worktree for no benefit.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let path = Self::normalize(path)?;
        self.files
            .remove(&path)
            .map(|_| ())
            .ok_or(SyncError::NotFound(path))
    }

    pub fn create_dir_all(&mut self, path: &str) -> Result<()> {
        let path = Self::normalize(path)?;
        if self.files.contains_key(&path) {
            return Err(SyncError::InvalidPath(path));
        }
        if !path.is_empty() {
            self.add_parents(&path);
            self.dirs.insert(path);
        }
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Option<Metadata> {
        let path = Self::normalize(path).ok()?;
        if path.is_empty() {
            return Some(Metadata { is_dir: true, len: 0 });
        }
        if let Some(contents) = self.files.get(&path) {
            return Some(Metadata {
                is_dir: false,
                len: contents.len() as u64,
            });
        }
        if self.dirs.contains(&path) {
            return Some(Metadata { is_dir: true, len: 0 });
        }
        None
    }

    /// Lists the direct children of a directory as `(path, is_dir)` pairs,
    /// sorted by name.
    pub fn read_dir(&self, path: &str) -> Result<Vec<(String, bool)>> {
        let path = Self::normalize(path)?;
        if !path.is_empty() && !self.dirs.contains(&path) {
            return Err(SyncError::NotFound(path));
        }

        let mut entries = BTreeMap::new();
        for (entry, is_dir) in self.entries() {
            if let Some(child) = direct_child(&path, entry) {
                let full = join(&path, child);
                let child_is_dir = is_dir || child != strip_prefix(&path, entry);
                entries.entry(full).or_insert(child_is_dir);
            }
        }
        Ok(entries.into_iter().collect())
    }

    /// Depth-first traversal in sorted order. The callback receives every
    /// entry under `root` as `(path, is_dir)` and stops the walk by
    /// returning an error.
    pub fn walk<F>(&self, root: &str, mut callback: F) -> Result<()>
    where
        F: FnMut(&str, bool) -> Result<()>,
    {
        let root = Self::normalize(root)?;
        let mut seen_dirs = BTreeSet::new();

        for (entry, is_dir) in self.entries() {
            if !under(&root, entry) {
                continue;
            }
            // Visit ancestor directories of a file before the file itself.
            let relative = strip_prefix(&root, entry);
            if relative.is_empty() {
                callback(entry, is_dir)?;
                continue;
            }
            let mut prefix = root.clone();
            let mut segments = relative.split('/').peekable();
            while let Some(segment) = segments.next() {
                prefix = join(&prefix, segment);
                let last = segments.peek().is_none();
                if last && !is_dir {
                    callback(&prefix, false)?;
                } else if seen_dirs.insert(prefix.clone()) {
                    callback(&prefix, true)?;
                }
            }
        }
        Ok(())
    }

    /// Drops every file and directory.
    pub fn clear(&mut self) {
        self.files.clear();
        self.dirs.clear();
    }

    /// All file paths in sorted order.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    fn add_parents(&mut self, path: &str) {
        let mut prefix = String::new();
        let mut segments: Vec<&str> = path.split('/').collect();
        segments.pop();
        for segment in segments {
            prefix = join(&prefix, segment);
            self.dirs.insert(prefix.clone());
        }
    }

    fn entries(&self) -> impl Iterator<Item = (&str, bool)> {
        let dirs = self.dirs.iter().map(|d| (d.as_str(), true));
        let files = self.files.keys().map(|f| (f.as_str(), false));
        let mut all: Vec<(&str, bool)> = dirs.chain(files).collect();
        all.sort();
        all.into_iter()
    }
}

fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}

fn under(root: &str, path: &str) -> bool {
    root.is_empty() || path == root || path.starts_with(&format!("{root}/"))
}

fn strip_prefix<'a>(root: &str, path: &'a str) -> &'a str {
    if root.is_empty() {
        path
    } else {
        path.strip_prefix(root)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(path)
    }
}

fn direct_child<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    if !under(dir, path) || path == dir {
        return None;
    }
    let relative = strip_prefix(dir, path);
    Some(relative.split('/').next().unwrap_or(relative))
}
