//! Error taxonomy for the bridging layer
//!
//! Adapters report these variants. The patch layer collapses all of them into
//! the runtime's not-found / empty / `None` shapes at the driver boundary, since
//! the runtime has no other channel for adapter failures.

use std::io;

use thiserror::Error;

use crate::path::MountDomain;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("{op} is not supported on the {domain} mount")]
    Unsupported { op: &'static str, domain: MountDomain },

    #[error("no {0} mount is active")]
    NoMount(MountDomain),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The user dismissed a picker; expected, never reported as a failure
    #[error("cancelled by user")]
    Cancelled,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid open mode: {0:?}")]
    InvalidMode(String),

    /// A write whose end does not fit the addressable file size
    #[error("write of {len} bytes at offset {offset} is out of range")]
    OutOfRange { offset: u64, len: usize },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(io::Error),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

impl BridgeError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// The path is absent (as opposed to the backend being unreachable)
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotADirectory(_))
    }

    /// The backend could not be reached or refused access
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::PermissionDenied(_) | Self::Io(_)
        )
    }
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::Io(err),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            return Self::NotFound(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}
