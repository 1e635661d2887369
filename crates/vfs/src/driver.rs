//! The runtime's storage driver interface
//!
//! Entry points mirror the runtime's continuation-passing driver: every call
//! takes a [`Continuation`] that must be resumed exactly once. Failures have no
//! channel of their own; they surface as the not-found shapes (`StatReply`
//! with zero permissions, an empty listing, `None`, zero bytes).

use std::any::Any;
use std::rc::Rc;

use bytes::Bytes;

use crate::bridge::Continuation;
use crate::record::{FileRecord, StatReply};

/// Arguments of an open/create call
#[derive(Clone)]
pub struct OpenRequest {
    pub path: String,
    /// `"r"`, `"w"` or `"r+"`
    pub mode: String,
    pub uid: u32,
    pub gid: u32,
    /// The runtime's own mount object, passed through untouched
    pub mount: Option<Rc<dyn Any>>,
}

impl OpenRequest {
    pub fn new(path: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: mode.into(),
            uid: 0,
            gid: 0,
            mount: None,
        }
    }

    #[must_use]
    pub const fn owned_by(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .finish_non_exhaustive()
    }
}

pub trait StorageDriver {
    fn stat_async(&self, path: &str, reply: Continuation<StatReply>);

    /// Entry names directly below `path`
    fn list_async(&self, path: &str, reply: Continuation<Vec<String>>);

    /// Open or create; `None` when the path cannot be opened in that mode
    fn make_file_data(&self, request: OpenRequest, reply: Continuation<Option<FileRecord>>);

    /// Release a record, flushing pending writes
    fn close(&self, record: &FileRecord, reply: Continuation<()>);

    fn read_async(&self, record: &FileRecord, offset: u64, len: u64, reply: Continuation<Bytes>);

    fn write_async(&self, record: &FileRecord, offset: u64, data: Bytes, reply: Continuation<usize>);
}

/// Driver with nothing behind it: every path is absent
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

impl StorageDriver for NullDriver {
    fn stat_async(&self, _path: &str, reply: Continuation<StatReply>) {
        reply.resume(StatReply::default());
    }

    fn list_async(&self, _path: &str, reply: Continuation<Vec<String>>) {
        reply.resume(Vec::new());
    }

    fn make_file_data(&self, _request: OpenRequest, reply: Continuation<Option<FileRecord>>) {
        reply.resume(None);
    }

    fn close(&self, _record: &FileRecord, reply: Continuation<()>) {
        reply.resume(());
    }

    fn read_async(&self, _record: &FileRecord, _offset: u64, _len: u64, reply: Continuation<Bytes>) {
        reply.resume(Bytes::new());
    }

    fn write_async(&self, _record: &FileRecord, _offset: u64, _data: Bytes, reply: Continuation<usize>) {
        reply.resume(0);
    }
}
