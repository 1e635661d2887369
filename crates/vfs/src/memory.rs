//! In-memory capability handles
//!
//! A directory tree that lives only in memory and behaves like a granted
//! browser directory: per-segment lookups, `create` flags and one-shot writes.
//! Useful for tests and for hosts that want a scratch mount.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BridgeError, Result};
use crate::handle::{BlobSource, DirEntry, DirectoryHandle, FileHandle, FileMetadata};
use crate::record::now_epoch_seconds;

#[derive(Clone)]
enum Node {
    File(Rc<MemoryFile>),
    Directory(Rc<MemoryDirectory>),
}

/// In-memory directory handle
///
/// Every handle in one tree shares a lookup counter so tests can assert how
/// many backend calls an operation made.
pub struct MemoryDirectory {
    name: String,
    children: RefCell<BTreeMap<String, Node>>,
    lookups: Rc<Cell<usize>>,
}

impl MemoryDirectory {
    /// Create a new empty tree
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Self::child(name.into(), Rc::new(Cell::new(0)))
    }

    fn child(name: String, lookups: Rc<Cell<usize>>) -> Rc<Self> {
        Rc::new(Self {
            name,
            children: RefCell::new(BTreeMap::new()),
            lookups,
        })
    }

    /// Create with initial file contents
    pub fn with_files(name: impl Into<String>, files: &[(&str, &[u8])]) -> Rc<Self> {
        let root = Self::new(name);
        for (path, content) in files {
            root.insert_file(path, content);
        }
        root
    }

    /// Add a file at `path`, creating parent directories
    pub fn insert_file(&self, path: &str, content: &[u8]) -> Rc<MemoryFile> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((file_name, parents)) = parts.split_last() else {
            return MemoryFile::new("", content);
        };
        let mut dir = None::<Rc<Self>>;
        for part in parents {
            let next = dir.as_deref().unwrap_or(self).ensure_dir(part);
            dir = Some(next);
        }
        let file = MemoryFile::new(*file_name, content);
        dir.as_deref()
            .unwrap_or(self)
            .children
            .borrow_mut()
            .insert((*file_name).to_string(), Node::File(file.clone()));
        file
    }

    /// Add an empty directory at `path`
    pub fn insert_dir(&self, path: &str) {
        let mut dir = None::<Rc<Self>>;
        for part in path.split('/').filter(|s| !s.is_empty()) {
            let next = dir.as_deref().unwrap_or(self).ensure_dir(part);
            dir = Some(next);
        }
    }

    fn ensure_dir(&self, name: &str) -> Rc<Self> {
        let mut children = self.children.borrow_mut();
        if let Some(Node::Directory(dir)) = children.get(name) {
            return dir.clone();
        }
        let dir = Self::child(name.to_string(), self.lookups.clone());
        children.insert(name.to_string(), Node::Directory(dir.clone()));
        dir
    }

    /// Look up a file without counting it as a backend call
    pub fn file(&self, path: &str) -> Option<Rc<MemoryFile>> {
        let path = path.trim_matches('/');
        if let Some((dir, rest)) = path.split_once('/') {
            let child = self.children.borrow().get(dir).cloned();
            return match child {
                Some(Node::Directory(dir)) => dir.file(rest),
                _ => None,
            };
        }
        let found = self.children.borrow().get(path).cloned();
        match found {
            Some(Node::File(file)) => Some(file),
            _ => None,
        }
    }

    /// Backend calls made so far anywhere in this tree
    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }

    fn count(&self) {
        self.lookups.set(self.lookups.get() + 1);
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(BridgeError::InvalidPath(name.to_string()));
    }
    Ok(())
}

#[async_trait(?Send)]
impl DirectoryHandle for MemoryDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory(&self, name: &str, create: bool) -> Result<Rc<dyn DirectoryHandle>> {
        self.count();
        check_name(name)?;
        let existing = self.children.borrow().get(name).cloned();
        match existing {
            Some(Node::Directory(dir)) => Ok(dir),
            Some(Node::File(_)) => Err(BridgeError::NotADirectory(name.to_string())),
            None if create => Ok(self.ensure_dir(name)),
            None => Err(BridgeError::not_found(name)),
        }
    }

    async fn get_file(&self, name: &str, create: bool) -> Result<Rc<dyn FileHandle>> {
        self.count();
        check_name(name)?;
        let existing = self.children.borrow().get(name).cloned();
        match existing {
            Some(Node::File(file)) => Ok(file),
            Some(Node::Directory(_)) => Err(BridgeError::not_found(name)),
            None if create => {
                let file = MemoryFile::new(name, b"");
                self.children
                    .borrow_mut()
                    .insert(name.to_string(), Node::File(file.clone()));
                Ok(file)
            }
            None => Err(BridgeError::not_found(name)),
        }
    }

    async fn entries(&self) -> Result<Vec<DirEntry>> {
        self.count();
        Ok(self
            .children
            .borrow()
            .iter()
            .map(|(name, node)| match node {
                Node::File(_) => DirEntry::file(name.clone()),
                Node::Directory(_) => DirEntry::dir(name.clone()),
            })
            .collect())
    }
}

/// In-memory file handle
pub struct MemoryFile {
    name: String,
    data: RefCell<Bytes>,
    last_modified: Cell<i64>,
    writes: Cell<usize>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, content: &[u8]) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            data: RefCell::new(Bytes::copy_from_slice(content)),
            last_modified: Cell::new(now_epoch_seconds()),
            writes: Cell::new(0),
        })
    }

    pub fn contents(&self) -> Bytes {
        self.data.borrow().clone()
    }

    /// Number of `write_all` calls received
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }
}

#[async_trait(?Send)]
impl FileHandle for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn metadata(&self) -> Result<FileMetadata> {
        Ok(FileMetadata {
            size: self.data.borrow().len() as u64,
            last_modified: self.last_modified.get(),
        })
    }

    async fn read_all(&self) -> Result<Bytes> {
        Ok(self.contents())
    }

    async fn write_all(&self, data: Bytes) -> Result<()> {
        *self.data.borrow_mut() = data;
        self.last_modified.set(now_epoch_seconds());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

/// In-memory blob, standing in for a dropped browser `File`
pub struct MemoryBlob {
    name: String,
    data: Bytes,
    last_modified: i64,
    slices: Cell<usize>,
}

impl MemoryBlob {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            data: data.into(),
            last_modified: now_epoch_seconds(),
            slices: Cell::new(0),
        })
    }

    /// Number of `slice` calls received
    pub fn slice_count(&self) -> usize {
        self.slices.get()
    }
}

#[async_trait(?Send)]
impl BlobSource for MemoryBlob {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    async fn slice(&self, start: u64, end: u64) -> Result<Bytes> {
        self.slices.set(self.slices.get() + 1);
        let end = (end as usize).min(self.data.len());
        let start = (start as usize).min(end);
        Ok(self.data.slice(start..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_segment_lookup() {
        let root = MemoryDirectory::with_files("root", &[("a/b/c.txt", b"hi")]);
        let a = root.get_directory("a", false).await.unwrap();
        let b = a.get_directory("b", false).await.unwrap();
        let c = b.get_file("c.txt", false).await.unwrap();
        assert_eq!(&c.read_all().await.unwrap()[..], b"hi");
        assert_eq!(root.lookups(), 3);
    }

    #[tokio::test]
    async fn missing_without_create_is_not_found() {
        let root = MemoryDirectory::new("root");
        let err = root.get_file("nope", false).await.err().unwrap();
        assert!(err.is_not_found());
        assert!(root.get_directory("nope", false).await.is_err());
    }

    #[tokio::test]
    async fn create_flag_makes_entries() {
        let root = MemoryDirectory::new("root");
        let dir = root.get_directory("new", true).await.unwrap();
        let file = dir.get_file("f.bin", true).await.unwrap();
        file.write_all(Bytes::from_static(b"123")).await.unwrap();
        assert_eq!(&root.file("new/f.bin").unwrap().contents()[..], b"123");
        assert_eq!(root.entries().await.unwrap(), vec![DirEntry::dir("new")]);
    }

    #[tokio::test]
    async fn file_is_not_a_directory() {
        let root = MemoryDirectory::with_files("root", &[("f", b"")]);
        let err = root.get_directory("f", false).await.err().unwrap();
        assert!(matches!(err, BridgeError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn blob_slices_are_clamped() {
        let blob = MemoryBlob::new("x.bin", &b"abcdef"[..]);
        assert_eq!(&blob.slice(2, 4).await.unwrap()[..], b"cd");
        assert_eq!(&blob.slice(4, 99).await.unwrap()[..], b"ef");
        assert_eq!(blob.slice_count(), 2);
    }
}
