//! Native directory adapter
//!
//! Serves `/files/...` (and any other unclaimed absolute path) from a directory
//! the user granted through a capability handle. At most one directory is
//! mounted at a time.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::backend::{Adapter, OpenMode};
use crate::bridge::SuspendReason;
use crate::chunks::{ChunkedBuffer, WriteBuffer, CHUNK_SIZE};
use crate::error::{BridgeError, Result};
use crate::handle::{DirEntry, DirectoryHandle, DirectoryPicker, FileHandle};
use crate::path::{segments, MountDomain};
use crate::record::{FileRecord, Payload};

/// Slot holding the granted directory
///
/// Replacing the handle bumps the generation; operations already in flight
/// keep their own `Rc` to the previous handle.
#[derive(Default)]
pub struct NativeMount {
    root: RefCell<Option<Rc<dyn DirectoryHandle>>>,
    generation: Cell<u64>,
}

impl NativeMount {
    pub fn mount(&self, root: Rc<dyn DirectoryHandle>) -> u64 {
        info!(name = %root.name(), "native directory mounted");
        *self.root.borrow_mut() = Some(root);
        self.bump()
    }

    pub fn unmount(&self) -> u64 {
        if self.root.borrow_mut().take().is_some() {
            info!("native directory unmounted");
        }
        self.bump()
    }

    fn bump(&self) -> u64 {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        next
    }

    pub fn current(&self) -> Option<Rc<dyn DirectoryHandle>> {
        self.root.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.root.borrow().is_some()
    }

    /// Incremented on every mount/unmount
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn name(&self) -> Option<String> {
        self.root.borrow().as_ref().map(|r| r.name().to_string())
    }
}

/// Adapter over the mounted directory handle
pub struct NativeAdapter {
    mount: NativeMount,
    chunk_size: usize,
}

impl Default for NativeAdapter {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

impl NativeAdapter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            mount: NativeMount::default(),
            chunk_size,
        }
    }

    pub const fn mount_slot(&self) -> &NativeMount {
        &self.mount
    }

    /// Ask the user for a directory and mount it
    pub async fn pick(&self, picker: &dyn DirectoryPicker) -> Result<String> {
        match picker.pick().await {
            Ok(root) => {
                let name = root.name().to_string();
                self.mount.mount(root);
                Ok(name)
            }
            Err(BridgeError::Cancelled) => {
                debug!("directory picker dismissed");
                Err(BridgeError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    fn root(&self) -> Result<Rc<dyn DirectoryHandle>> {
        self.mount
            .current()
            .ok_or(BridgeError::NoMount(MountDomain::Native))
    }

    /// Walk directory segments one lookup at a time
    async fn walk(
        root: Rc<dyn DirectoryHandle>,
        parts: &[&str],
        create: bool,
    ) -> Result<Rc<dyn DirectoryHandle>> {
        let mut dir = root;
        for part in parts {
            dir = dir.get_directory(part, create).await?;
        }
        Ok(dir)
    }

    async fn file_handle(&self, relative: &str, create: bool) -> Result<Rc<dyn FileHandle>> {
        let parts = segments(relative);
        let Some((name, parents)) = parts.split_last() else {
            return Err(BridgeError::not_found(relative));
        };
        let dir = Self::walk(self.root()?, parents, create).await?;
        dir.get_file(name, create).await
    }

    async fn file_record(relative: &str, handle: &dyn FileHandle) -> Result<FileRecord> {
        let meta = handle.metadata().await?;
        Ok(FileRecord::file(
            MountDomain::Native,
            relative,
            meta.size,
            meta.last_modified,
        ))
    }
}

#[async_trait(?Send)]
impl Adapter for NativeAdapter {
    fn domain(&self) -> MountDomain {
        MountDomain::Native
    }

    fn is_active(&self) -> bool {
        self.mount.is_mounted()
    }

    fn suspend_reason(&self) -> SuspendReason {
        SuspendReason::HandleLookup
    }

    async fn stat(&self, relative: &str) -> Result<FileRecord> {
        let parts = segments(relative);
        let Some((name, parents)) = parts.split_last() else {
            self.root()?;
            return Ok(FileRecord::directory(MountDomain::Native, ""));
        };
        let dir = Self::walk(self.root()?, parents, false).await?;
        match dir.get_file(name, false).await {
            Ok(file) => Self::file_record(relative, file.as_ref()).await,
            Err(file_err) => match dir.get_directory(name, false).await {
                Ok(_) => Ok(FileRecord::directory(MountDomain::Native, relative)),
                Err(_) if file_err.is_not_found() => Err(BridgeError::not_found(relative)),
                Err(_) => Err(file_err),
            },
        }
    }

    async fn list(&self, relative: &str) -> Result<Vec<DirEntry>> {
        let dir = Self::walk(self.root()?, &segments(relative), false).await?;
        dir.entries().await
    }

    async fn open(&self, relative: &str, mode: OpenMode) -> Result<FileRecord> {
        match mode {
            OpenMode::Read => {
                let file = match self.file_handle(relative, false).await {
                    Ok(file) => file,
                    Err(e) if e.is_not_found() => {
                        // Opening a directory for reading yields its record
                        let record = self.stat(relative).await?;
                        return if record.is_dir() {
                            Ok(record)
                        } else {
                            Err(e)
                        };
                    }
                    Err(e) => return Err(e),
                };
                let meta = file.metadata().await?;
                let data = file.read_all().await?;
                debug!(path = %relative, bytes = data.len(), "native file materialized");
                Ok(
                    FileRecord::file(MountDomain::Native, relative, meta.size, meta.last_modified)
                        .with_payload(Payload::Materialized(data)),
                )
            }
            OpenMode::Write | OpenMode::ReadWrite => {
                let file = self.file_handle(relative, true).await?;
                let data = if mode == OpenMode::ReadWrite {
                    ChunkedBuffer::from_bytes(&file.read_all().await?, self.chunk_size)
                } else {
                    ChunkedBuffer::with_chunk_size(self.chunk_size)
                };
                let record = Self::file_record(relative, file.as_ref()).await?;
                let buffer = WriteBuffer::new(data, Some(file));
                Ok(record.with_payload(Payload::Chunked(Rc::new(RefCell::new(buffer)))))
            }
        }
    }

    async fn commit(&self, record: &FileRecord) -> Result<()> {
        let Payload::Chunked(buffer) = &record.payload else {
            return Ok(());
        };
        let (data, sink, generation) = {
            let buffer = buffer.borrow();
            if !buffer.dirty {
                return Ok(());
            }
            (buffer.data.to_bytes(), buffer.sink.clone(), buffer.generation())
        };
        let Some(sink) = sink else {
            return Err(BridgeError::Unsupported {
                op: "commit",
                domain: MountDomain::Native,
            });
        };
        let len = data.len();
        match sink.write_all(data).await {
            Ok(()) => {
                if buffer.borrow_mut().mark_committed(generation) {
                    debug!(path = %record.path, bytes = len, "native file committed");
                } else {
                    debug!(path = %record.path, bytes = len, "written during commit, still dirty");
                }
                Ok(())
            }
            Err(e) => {
                error!(path = %record.path, error = %e, "native commit failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;

    fn mounted(files: &[(&str, &[u8])]) -> (NativeAdapter, Rc<MemoryDirectory>) {
        let root = MemoryDirectory::with_files("granted", files);
        let adapter = NativeAdapter::default();
        adapter.mount_slot().mount(root.clone());
        (adapter, root)
    }

    #[tokio::test]
    async fn stat_prefers_file_then_directory() {
        let (adapter, _) = mounted(&[("a/b.txt", b"12345")]);
        let file = adapter.stat("a/b.txt").await.unwrap();
        assert!(!file.is_dir());
        assert_eq!(file.byte_length(), 5);
        let dir = adapter.stat("a").await.unwrap();
        assert!(dir.is_dir());
        assert!(adapter.stat("a/missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn root_stat_touches_no_handle() {
        let (adapter, root) = mounted(&[("x", b"")]);
        let record = adapter.stat("").await.unwrap();
        assert!(record.is_dir());
        assert_eq!(root.lookups(), 0);
    }

    #[tokio::test]
    async fn unmounted_adapter_is_inactive() {
        let adapter = NativeAdapter::default();
        assert!(!adapter.is_active());
        assert!(matches!(
            adapter.stat("x").await,
            Err(BridgeError::NoMount(MountDomain::Native))
        ));
    }

    #[tokio::test]
    async fn read_write_preloads_contents() {
        let (adapter, root) = mounted(&[("doc.txt", b"hello world")]);
        let record = adapter.open("doc.txt", OpenMode::ReadWrite).await.unwrap();
        assert_eq!(record.byte_length(), 11);
        record.write_at(0, b"HELLO").unwrap();
        adapter.commit(&record).await.unwrap();
        assert_eq!(&root.file("doc.txt").unwrap().contents()[..], b"HELLO world");
    }

    #[tokio::test]
    async fn commit_skips_clean_records() {
        let (adapter, root) = mounted(&[]);
        let record = adapter.open("new.txt", OpenMode::Write).await.unwrap();
        record.write_at(0, b"x").unwrap();
        adapter.commit(&record).await.unwrap();
        adapter.commit(&record).await.unwrap();
        assert_eq!(root.file("new.txt").unwrap().write_count(), 1);
    }

    #[tokio::test]
    async fn open_directory_for_read_returns_directory_record() {
        let (adapter, _) = mounted(&[("dir/f", b"")]);
        let record = adapter.open("dir", OpenMode::Read).await.unwrap();
        assert!(record.is_dir());
    }

    #[tokio::test]
    async fn remount_bumps_generation() {
        let (adapter, _) = mounted(&[]);
        let first = adapter.mount_slot().generation();
        adapter.mount_slot().mount(MemoryDirectory::new("other"));
        assert_eq!(adapter.mount_slot().generation(), first + 1);
        assert_eq!(adapter.mount_slot().name().as_deref(), Some("other"));
    }
}
