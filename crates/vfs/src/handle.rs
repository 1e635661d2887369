//! Capability handles
//!
//! Async, per-segment access to a real directory tree, modeled on the browser's
//! File System Access API. Every lookup is its own await point; nothing here
//! resolves a multi-segment path in one call.
//!
//! Implementations: [`crate::memory::MemoryDirectory`] (in-memory),
//! `crate::disk::StdDirectory` (native hosts) and the web crate's
//! `JsDirectoryHandle`.

use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::record::FileKind;

/// Metadata reported by a file handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Epoch seconds
    pub last_modified: i64,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::File,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[async_trait(?Send)]
pub trait FileHandle {
    fn name(&self) -> &str;

    async fn metadata(&self) -> Result<FileMetadata>;

    /// Materialize the whole file
    async fn read_all(&self) -> Result<Bytes>;

    /// Replace the file contents in one shot
    async fn write_all(&self, data: Bytes) -> Result<()>;
}

#[async_trait(?Send)]
pub trait DirectoryHandle {
    fn name(&self) -> &str;

    /// Child directory; fails with `NotFound` unless `create` is set
    async fn get_directory(&self, name: &str, create: bool) -> Result<Rc<dyn DirectoryHandle>>;

    /// Child file; fails with `NotFound` unless `create` is set
    async fn get_file(&self, name: &str, create: bool) -> Result<Rc<dyn FileHandle>>;

    /// One level of entries
    async fn entries(&self) -> Result<Vec<DirEntry>>;
}

/// Acquires a directory capability from the user
#[async_trait(?Send)]
pub trait DirectoryPicker {
    /// `Err(BridgeError::Cancelled)` when the user dismisses the dialog
    async fn pick(&self) -> Result<Rc<dyn DirectoryHandle>>;
}

/// A sliceable blob, as produced by drag-and-drop
#[async_trait(?Send)]
pub trait BlobSource {
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    fn last_modified(&self) -> i64;

    /// Bytes `start..end`; callers clamp the range to `size()`
    async fn slice(&self, start: u64, end: u64) -> Result<Bytes>;
}
