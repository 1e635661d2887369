//! Storage bridge for a browser-hosted managed runtime
//!
//! Overlays three mounts onto the runtime's own storage driver:
//!
//! - `/files`: a real directory granted through a capability handle
//! - `/local`: drag-and-dropped files held in memory
//! - `/github/<owner>/<repo>`: remote repositories fetched on demand
//!
//! Paths the bridge does not own are passed to the original driver unchanged.

pub mod backend;
pub mod bridge;
pub mod chunks;
pub mod config;
pub mod context;
#[cfg(not(target_arch = "wasm32"))]
pub mod disk;
pub mod driver;
pub mod error;
pub mod handle;
pub mod http;
pub mod local;
pub mod memory;
pub mod native;
pub mod patch;
pub mod path;
pub mod record;
pub mod remote;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Adapter, OpenMode};
#[cfg(not(target_arch = "wasm32"))]
pub use bridge::TokioSpawner;
pub use bridge::{BlockingBridge, Continuation, DetachedContext, ExecutionContext, Spawner, SuspendReason};
pub use config::BridgeConfig;
pub use context::{BridgeStatus, CatalogEntry, FilesystemBridgeContext};
#[cfg(not(target_arch = "wasm32"))]
pub use disk::StdDirectory;
pub use driver::{NullDriver, OpenRequest, StorageDriver};
pub use error::{BridgeError, Result};
pub use handle::{BlobSource, DirEntry, DirectoryHandle, DirectoryPicker, FileHandle, FileMetadata};
pub use http::{ContentApi, HttpContentApi};
pub use local::{DroppedEntry, LocalAdapter, LocalFileTree};
pub use memory::{MemoryBlob, MemoryDirectory};
pub use native::{NativeAdapter, NativeMount};
pub use patch::PatchedDriver;
pub use path::{MountDomain, PathRouter, RoutedPath};
pub use record::{FileKind, FileRecord, Payload, StatReply};
pub use remote::{parse_repo_spec, RemoteAdapter, RepoMount};
