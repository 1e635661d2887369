//! Real-directory capability handles for native hosts
//!
//! Maps a granted directory onto `std::fs` with the same per-segment contract
//! the browser handles follow. Handles cannot leave their sandbox root: every
//! segment is validated before it touches the filesystem.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BridgeError, Result};
use crate::handle::{DirEntry, DirectoryHandle, FileHandle, FileMetadata};

/// Directory handle over a real directory
pub struct StdDirectory {
    name: String,
    path: PathBuf,
}

impl StdDirectory {
    /// Open `root` as a sandbox root. The directory must exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Rc<Self>> {
        let root = root.into().canonicalize()?;
        if !root.is_dir() {
            return Err(BridgeError::NotADirectory(root.display().to_string()));
        }
        let name = root
            .file_name()
            .map_or_else(|| root.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Rc::new(Self { name, path: root }))
    }

    /// Resolve one segment beneath this directory
    ///
    /// SECURITY: a segment is a single name; separators, drive prefixes and
    /// relative components are rejected so a handle can never step outside
    /// the tree it was created from.
    fn child_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(BridgeError::InvalidPath(format!("invalid segment: {name:?}")));
        }
        if name.contains('\\') {
            return Err(BridgeError::InvalidPath(format!(
                "backslashes not allowed: {name}"
            )));
        }
        if name.contains(':') {
            return Err(BridgeError::InvalidPath(format!("colon not allowed: {name}")));
        }
        if name.contains('/') {
            return Err(BridgeError::InvalidPath(format!(
                "separators not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(BridgeError::transport)?
}

#[async_trait(?Send)]
impl DirectoryHandle for StdDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory(&self, name: &str, create: bool) -> Result<Rc<dyn DirectoryHandle>> {
        let path = self.child_path(name)?;
        let label = name.to_string();
        let path = blocking(move || {
            if create {
                fs::create_dir_all(&path)?;
            }
            let meta = fs::metadata(&path)?;
            if !meta.is_dir() {
                return Err(BridgeError::NotADirectory(label));
            }
            Ok(path)
        })
        .await?;
        Ok(Rc::new(Self {
            name: name.to_string(),
            path,
        }))
    }

    async fn get_file(&self, name: &str, create: bool) -> Result<Rc<dyn FileHandle>> {
        let path = self.child_path(name)?;
        let label = name.to_string();
        let path = blocking(move || {
            if create && !path.exists() {
                fs::write(&path, b"")?;
            }
            let meta = fs::metadata(&path)?;
            if !meta.is_file() {
                return Err(BridgeError::not_found(label));
            }
            Ok(path)
        })
        .await?;
        Ok(Rc::new(StdFile {
            name: name.to_string(),
            path,
        }))
    }

    async fn entries(&self) -> Result<Vec<DirEntry>> {
        let path = self.path.clone();
        blocking(move || {
            let mut entries = Vec::new();
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_dir() {
                    entries.push(DirEntry::dir(name));
                } else {
                    entries.push(DirEntry::file(name));
                }
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }
}

/// File handle over a real file
pub struct StdFile {
    name: String,
    path: PathBuf,
}

#[async_trait(?Send)]
impl FileHandle for StdFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn metadata(&self) -> Result<FileMetadata> {
        let path = self.path.clone();
        blocking(move || {
            let meta = fs::metadata(path)?;
            let last_modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            Ok(FileMetadata {
                size: meta.len(),
                last_modified,
            })
        })
        .await
    }

    async fn read_all(&self) -> Result<Bytes> {
        let path = self.path.clone();
        blocking(move || Ok(Bytes::from(fs::read(path)?))).await
    }

    async fn write_all(&self, data: Bytes) -> Result<()> {
        let path = self.path.clone();
        blocking(move || Ok(fs::write(path, &data)?)).await
    }
}
