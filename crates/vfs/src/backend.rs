use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bridge::SuspendReason;
use crate::error::{BridgeError, Result};
use crate::handle::DirEntry;
use crate::path::MountDomain;
use crate::record::FileRecord;

/// Open mode requested by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `"r"`
    Read,
    /// `"w"`: create or truncate
    Write,
    /// `"r+"`: existing contents preloaded
    ReadWrite,
}

impl OpenMode {
    pub const fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl FromStr for OpenMode {
    type Err = BridgeError;

    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "r+" => Ok(Self::ReadWrite),
            other => Err(BridgeError::InvalidMode(other.to_string())),
        }
    }
}

/// Backend adapter - one per mount domain
///
/// Paths are relative to the adapter's root with the routing prefix already
/// stripped; `""` is the root and must be answered by every adapter.
///
/// Browser handles are `!Send`, so the trait is `?Send` and every adapter lives
/// on the runtime's single thread.
#[async_trait(?Send)]
pub trait Adapter {
    fn domain(&self) -> MountDomain;

    /// Whether the adapter should intercept its paths right now
    fn is_active(&self) -> bool {
        true
    }

    /// Reason reported to the execution context while this adapter's calls are
    /// in flight
    fn suspend_reason(&self) -> SuspendReason;

    async fn stat(&self, relative: &str) -> Result<FileRecord>;

    /// Entry names one level below `relative`
    async fn list(&self, relative: &str) -> Result<Vec<DirEntry>>;

    async fn open(&self, relative: &str, mode: OpenMode) -> Result<FileRecord>;

    async fn read(&self, record: &FileRecord, offset: u64, len: u64) -> Result<Bytes> {
        record.read_at(offset, len).await
    }

    /// Flush a record's pending writes
    async fn commit(&self, _record: &FileRecord) -> Result<()> {
        Ok(())
    }
}
