//! File records
//!
//! The descriptor the runtime's storage driver expects for every stat and open
//! call. Records are cheap to clone; clones of a record opened for writing
//! share one [`WriteBuffer`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;

use crate::chunks::WriteBuffer;
use crate::error::{BridgeError, Result};
use crate::handle::BlobSource;
use crate::path::MountDomain;

/// Directory bit of the runtime's permission word
pub const S_IFDIR: u32 = 0o040_000;
/// Regular-file bit of the runtime's permission word
pub const S_IFREG: u32 = 0o100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
}

static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique inode id
pub fn next_inode_id() -> u64 {
    NEXT_INODE.fetch_add(1, Ordering::Relaxed)
}

#[cfg(target_arch = "wasm32")]
pub fn now_epoch_seconds() -> i64 {
    (js_sys::Date::now() / 1000.0) as i64
}

#[cfg(not(target_arch = "wasm32"))]
pub fn now_epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// Byte range to serve for a read, or `None` at/after EOF
pub fn clamp_read(length: u64, offset: u64, len: u64) -> Option<Range<u64>> {
    if len == 0 || offset >= length {
        return None;
    }
    Some(offset..length.min(offset.saturating_add(len)))
}

/// Where a record's bytes live
#[derive(Clone)]
pub enum Payload {
    /// Stat-only and directory records
    Empty,
    /// Whole file in memory
    Materialized(Bytes),
    /// Opened for writing
    Chunked(Rc<RefCell<WriteBuffer>>),
    /// Read lazily from a blob on each read
    Streaming(Rc<dyn BlobSource>),
    /// Opaque data owned by the runtime's original driver
    Foreign(Rc<dyn Any>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Materialized(b) => write!(f, "Materialized({} bytes)", b.len()),
            Self::Chunked(buf) => write!(f, "Chunked({:?})", buf.borrow()),
            Self::Streaming(blob) => write!(f, "Streaming({})", blob.name()),
            Self::Foreign(_) => f.write_str("Foreign"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub kind: FileKind,
    pub inode_id: u64,
    /// Epoch seconds
    pub last_modified: i64,
    pub read_only: bool,
    /// Domain that produced the record; `Default` records belong to the
    /// original driver
    pub origin: MountDomain,
    /// Path relative to the origin's root
    pub path: String,
    pub uid: u32,
    pub gid: u32,
    length: u64,
    pub payload: Payload,
}

impl FileRecord {
    pub fn directory(origin: MountDomain, path: impl Into<String>) -> Self {
        Self {
            kind: FileKind::Directory,
            inode_id: next_inode_id(),
            last_modified: now_epoch_seconds(),
            read_only: false,
            origin,
            path: path.into(),
            uid: 0,
            gid: 0,
            length: 0,
            payload: Payload::Empty,
        }
    }

    /// Stat-only file record
    pub fn file(origin: MountDomain, path: impl Into<String>, length: u64, last_modified: i64) -> Self {
        Self {
            kind: FileKind::File,
            inode_id: next_inode_id(),
            last_modified,
            read_only: false,
            origin,
            path: path.into(),
            uid: 0,
            gid: 0,
            length,
            payload: Payload::Empty,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub const fn owned_by(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Current logical length; follows the payload once one is attached
    pub fn byte_length(&self) -> u64 {
        match &self.payload {
            Payload::Materialized(bytes) => bytes.len() as u64,
            Payload::Chunked(buf) => buf.borrow().data.len(),
            Payload::Streaming(blob) => blob.size(),
            Payload::Empty | Payload::Foreign(_) => self.length,
        }
    }

    pub const fn perm_type(&self) -> u32 {
        match self.kind {
            FileKind::Directory => S_IFDIR | 0o777,
            FileKind::File if self.read_only => S_IFREG | 0o444,
            FileKind::File => S_IFREG | 0o666,
        }
    }

    /// Holds writes not yet committed
    pub fn is_dirty(&self) -> bool {
        match &self.payload {
            Payload::Chunked(buf) => buf.borrow().dirty,
            _ => false,
        }
    }

    /// Read up to `len` bytes at `offset`. Returns empty at or after EOF.
    pub async fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let Some(range) = clamp_read(self.byte_length(), offset, len) else {
            return Ok(Bytes::new());
        };
        match &self.payload {
            Payload::Materialized(bytes) => Ok(bytes.slice(range.start as usize..range.end as usize)),
            Payload::Chunked(buf) => Ok(buf.borrow().data.read_at(range.start, range.end - range.start)),
            Payload::Streaming(blob) => blob.slice(range.start, range.end).await,
            Payload::Empty | Payload::Foreign(_) => Err(BridgeError::Unsupported {
                op: "read",
                domain: self.origin,
            }),
        }
    }

    /// Write `data` at `offset` into the record's write buffer
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        match &self.payload {
            Payload::Chunked(buf) if !self.read_only => {
                buf.borrow_mut().write_at(offset, data)
            }
            _ => Err(BridgeError::Unsupported {
                op: "write",
                domain: self.origin,
            }),
        }
    }

    pub fn to_stat_reply(&self) -> StatReply {
        StatReply {
            inode_id: self.inode_id,
            uid: self.uid,
            gid: self.gid,
            perm_type: self.perm_type(),
            file_length: self.byte_length(),
            last_modified: self.last_modified,
        }
    }
}

/// What the runtime receives from `stat_async`. The default value is the
/// not-found shape (`perm_type == 0`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatReply {
    pub inode_id: u64,
    pub uid: u32,
    pub gid: u32,
    pub perm_type: u32,
    pub file_length: u64,
    pub last_modified: i64,
}

impl StatReply {
    pub const fn exists(&self) -> bool {
        self.perm_type != 0
    }

    pub const fn is_dir(&self) -> bool {
        self.perm_type & S_IFDIR == S_IFDIR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::ChunkedBuffer;

    #[test]
    fn clamp_handles_eof() {
        assert_eq!(clamp_read(10, 0, 4), Some(0..4));
        assert_eq!(clamp_read(10, 8, 4), Some(8..10));
        assert_eq!(clamp_read(10, 10, 4), None);
        assert_eq!(clamp_read(10, 11, 4), None);
        assert_eq!(clamp_read(10, 2, 0), None);
        assert_eq!(clamp_read(10, 2, u64::MAX), Some(2..10));
    }

    #[test]
    fn permission_words() {
        let dir = FileRecord::directory(MountDomain::Native, "");
        assert_eq!(dir.perm_type(), S_IFDIR | 0o777);
        let file = FileRecord::file(MountDomain::Native, "a", 1, 0);
        assert_eq!(file.perm_type(), S_IFREG | 0o666);
        assert_eq!(file.read_only(true).perm_type(), S_IFREG | 0o444);
    }

    #[test]
    fn inode_ids_are_unique() {
        let a = FileRecord::directory(MountDomain::Local, "");
        let b = FileRecord::directory(MountDomain::Local, "");
        assert_ne!(a.inode_id, b.inode_id);
    }

    #[test]
    fn default_stat_reply_is_not_found() {
        let reply = StatReply::default();
        assert!(!reply.exists());
        let dir = FileRecord::directory(MountDomain::Remote, "").to_stat_reply();
        assert!(dir.exists());
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn materialized_reads_clamp() {
        let record = FileRecord::file(MountDomain::Native, "a", 0, 0)
            .with_payload(Payload::Materialized(Bytes::from_static(b"hello")));
        assert_eq!(&record.read_at(3, 10).await.unwrap()[..], b"lo");
        assert!(record.read_at(5, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_write_buffer() {
        let buf = Rc::new(RefCell::new(WriteBuffer::new(ChunkedBuffer::new(), None)));
        let record = FileRecord::file(MountDomain::Native, "a", 0, 0).with_payload(Payload::Chunked(buf));
        let clone = record.clone();
        record.write_at(0, b"shared").unwrap();
        assert_eq!(clone.byte_length(), 6);
        assert!(clone.is_dirty());
        assert_eq!(&clone.read_at(0, 6).await.unwrap()[..], b"shared");
    }

    #[test]
    fn read_only_records_reject_writes() {
        let buf = Rc::new(RefCell::new(WriteBuffer::new(ChunkedBuffer::new(), None)));
        let record = FileRecord::file(MountDomain::Local, "a", 0, 0)
            .with_payload(Payload::Chunked(buf))
            .read_only(true);
        assert!(matches!(
            record.write_at(0, b"x"),
            Err(BridgeError::Unsupported { op: "write", .. })
        ));
    }
}
