//! In-memory local adapter
//!
//! Holds drag-and-dropped files under `/local`. Files stay as blobs; nothing is
//! read until the runtime asks for a byte range, and each read slices only that
//! range. The mount is read-only.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Adapter, OpenMode};
use crate::bridge::SuspendReason;
use crate::error::{BridgeError, Result};
use crate::handle::{BlobSource, DirEntry};
use crate::path::{join, MountDomain};
use crate::record::{FileKind, FileRecord, Payload};

/// One item of a drop, possibly a whole directory
pub enum DroppedEntry {
    File(Rc<dyn BlobSource>),
    Directory {
        name: String,
        children: Vec<DroppedEntry>,
    },
}

/// Flat map of dropped files plus the directories their paths imply
#[derive(Default)]
pub struct LocalFileTree {
    files: BTreeMap<String, Rc<dyn BlobSource>>,
    dirs: BTreeSet<String>,
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

impl LocalFileTree {
    /// Register `blob` at `path` (its own name when `path` is empty)
    pub fn add_file(&mut self, path: &str, blob: Rc<dyn BlobSource>) -> String {
        let path = match normalize(path) {
            "" => blob.name().to_string(),
            p => p.to_string(),
        };
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent);
        }
        debug!(path = %path, size = blob.size(), "local file added");
        self.files.insert(path.clone(), blob);
        path
    }

    /// Register blobs at the root under their own names
    pub fn add_files(&mut self, blobs: impl IntoIterator<Item = Rc<dyn BlobSource>>) -> usize {
        let mut added = 0;
        for blob in blobs {
            self.add_file("", blob);
            added += 1;
        }
        added
    }

    /// Register a dropped tree beneath `base`; empty directories are kept
    pub fn add_tree(&mut self, base: &str, entries: Vec<DroppedEntry>) {
        let base = normalize(base).to_string();
        for entry in entries {
            match entry {
                DroppedEntry::File(blob) => {
                    let path = join(&base, blob.name());
                    self.add_file(&path, blob);
                }
                DroppedEntry::Directory { name, children } => {
                    let path = join(&base, &name);
                    self.add_dir(&path);
                    self.add_tree(&path, children);
                }
            }
        }
    }

    /// Register a directory and its ancestors
    fn add_dir(&mut self, path: &str) {
        let mut current = String::new();
        for part in normalize(path).split('/').filter(|s| !s.is_empty()) {
            current = join(&current, part);
            self.dirs.insert(current.clone());
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.dirs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn get_file(&self, path: &str) -> Option<Rc<dyn BlobSource>> {
        self.files.get(normalize(path)).cloned()
    }

    pub fn is_directory(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.dirs.contains(path)
    }

    /// Direct children of `path`, or `None` if it is not a directory
    pub fn list(&self, path: &str) -> Option<Vec<DirEntry>> {
        if !self.is_directory(path) {
            return None;
        }
        let mut entries: Vec<DirEntry> = self
            .descendants(path)
            .filter(|(rest, _)| !rest.contains('/'))
            .map(|(rest, kind)| DirEntry {
                name: rest.to_string(),
                kind,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Some(entries)
    }

    /// Every file and directory beneath `path`, as paths relative to it
    pub fn descendants<'a>(&'a self, path: &str) -> impl Iterator<Item = (&'a str, FileKind)> + 'a {
        let path = normalize(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let dir_prefix = prefix.clone();
        let files = self
            .files
            .keys()
            .filter_map(move |k| k.strip_prefix(prefix.as_str()).map(|r| (r, FileKind::File)));
        let dirs = self
            .dirs
            .iter()
            .filter_map(move |k| k.strip_prefix(dir_prefix.as_str()).map(|r| (r, FileKind::Directory)));
        dirs.chain(files)
    }
}

/// Adapter over the dropped-file tree
#[derive(Default)]
pub struct LocalAdapter {
    tree: RefCell<LocalFileTree>,
}

impl LocalAdapter {
    pub fn tree(&self) -> Ref<'_, LocalFileTree> {
        self.tree.borrow()
    }

    pub fn tree_mut(&self) -> RefMut<'_, LocalFileTree> {
        self.tree.borrow_mut()
    }

    fn record(relative: &str, blob: &Rc<dyn BlobSource>) -> FileRecord {
        FileRecord::file(MountDomain::Local, relative, blob.size(), blob.last_modified())
            .read_only(true)
    }
}

#[async_trait(?Send)]
impl Adapter for LocalAdapter {
    fn domain(&self) -> MountDomain {
        MountDomain::Local
    }

    fn suspend_reason(&self) -> SuspendReason {
        SuspendReason::BlobSlice
    }

    async fn stat(&self, relative: &str) -> Result<FileRecord> {
        let relative = normalize(relative);
        let tree = self.tree.borrow();
        if let Some(blob) = tree.get_file(relative) {
            return Ok(Self::record(relative, &blob));
        }
        if tree.is_directory(relative) {
            return Ok(FileRecord::directory(MountDomain::Local, relative));
        }
        Err(BridgeError::not_found(relative))
    }

    async fn list(&self, relative: &str) -> Result<Vec<DirEntry>> {
        let tree = self.tree.borrow();
        tree.list(relative).ok_or_else(|| {
            if tree.get_file(relative).is_some() {
                BridgeError::NotADirectory(relative.to_string())
            } else {
                BridgeError::not_found(relative)
            }
        })
    }

    async fn open(&self, relative: &str, mode: OpenMode) -> Result<FileRecord> {
        if mode.is_write() {
            return Err(BridgeError::Unsupported {
                op: "write",
                domain: MountDomain::Local,
            });
        }
        let relative = normalize(relative);
        let blob = self.tree.borrow().get_file(relative);
        match blob {
            Some(blob) => Ok(Self::record(relative, &blob).with_payload(Payload::Streaming(blob))),
            None => self.stat(relative).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlob;

    fn blob(name: &str, data: &'static [u8]) -> Rc<dyn BlobSource> {
        MemoryBlob::new(name, data)
    }

    #[test]
    fn add_file_registers_parents() {
        let mut tree = LocalFileTree::default();
        tree.add_file("a/b/c.txt", blob("c.txt", b"x"));
        assert!(tree.is_directory("a"));
        assert!(tree.is_directory("a/b"));
        assert_eq!(tree.list("a").unwrap(), vec![DirEntry::dir("b")]);
        assert_eq!(tree.list("a/b").unwrap(), vec![DirEntry::file("c.txt")]);
        assert!(tree.list("a/b/c.txt").is_none());
    }

    #[test]
    fn add_files_uses_blob_names() {
        let mut tree = LocalFileTree::default();
        let added = tree.add_files([blob("x.png", b"1"), blob("y.png", b"2")]);
        assert_eq!(added, 2);
        assert_eq!(
            tree.list("").unwrap(),
            vec![DirEntry::file("x.png"), DirEntry::file("y.png")]
        );
    }

    #[test]
    fn add_tree_keeps_empty_directories() {
        let mut tree = LocalFileTree::default();
        tree.add_tree(
            "",
            vec![DroppedEntry::Directory {
                name: "dataset".to_string(),
                children: vec![
                    DroppedEntry::File(blob("img.tif", b"tif")),
                    DroppedEntry::Directory {
                        name: "empty".to_string(),
                        children: vec![],
                    },
                ],
            }],
        );
        assert!(tree.get_file("dataset/img.tif").is_some());
        assert!(tree.is_directory("dataset/empty"));
        assert_eq!(tree.list("dataset/empty").unwrap(), vec![]);
        assert_eq!(tree.descendants("dataset").count(), 2);
    }

    #[test]
    fn clear_empties_everything() {
        let mut tree = LocalFileTree::default();
        tree.add_file("d/f", blob("f", b""));
        assert!(!tree.is_empty());
        tree.clear();
        assert!(tree.is_empty());
        assert!(tree.get_file("d/f").is_none());
    }

    #[tokio::test]
    async fn reads_slice_only_the_requested_range() {
        let adapter = LocalAdapter::default();
        let source = MemoryBlob::new("big.bin", &b"0123456789"[..]);
        adapter.tree_mut().add_file("big.bin", source.clone());

        let record = adapter.open("big.bin", OpenMode::Read).await.unwrap();
        assert_eq!(source.slice_count(), 0);
        assert_eq!(&adapter.read(&record, 8, 100).await.unwrap()[..], b"89");
        assert!(adapter.read(&record, 10, 1).await.unwrap().is_empty());
        assert_eq!(source.slice_count(), 1);
    }

    #[tokio::test]
    async fn writes_are_unsupported() {
        let adapter = LocalAdapter::default();
        adapter.tree_mut().add_file("f", blob("f", b"abc"));
        let err = adapter.open("f", OpenMode::Write).await.unwrap_err();
        assert!(matches!(err, BridgeError::Unsupported { op: "write", .. }));
        let stat = adapter.stat("f").await.unwrap();
        assert!(stat.read_only);
    }

    #[tokio::test]
    async fn root_is_always_a_directory() {
        let adapter = LocalAdapter::default();
        assert!(adapter.stat("").await.unwrap().is_dir());
        assert!(adapter.list("").await.unwrap().is_empty());
        assert!(adapter.stat("missing").await.unwrap_err().is_not_found());
    }
}
