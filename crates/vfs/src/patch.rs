//! Storage driver patch layer
//!
//! Wraps the runtime's original driver. Every call is routed; paths owned by an
//! active adapter are served through the [`BlockingBridge`], everything else
//! (and every record the bridge did not produce) goes to the original driver
//! unchanged.
//!
//! Wrapping an already patched driver is not supported. Each layer still owns
//! its original and falls back correctly, but every call is routed twice.

use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::backend::{Adapter, OpenMode};
use crate::bridge::{BlockingBridge, Continuation, SuspendReason};
use crate::context::FilesystemBridgeContext;
use crate::driver::{OpenRequest, StorageDriver};
use crate::error::BridgeError;
use crate::handle::DirectoryPicker;
use crate::path::MountDomain;
use crate::record::{FileRecord, StatReply};

pub struct PatchedDriver {
    original: Rc<dyn StorageDriver>,
    context: Rc<FilesystemBridgeContext>,
    bridge: BlockingBridge,
}

/// Log a collapsed adapter failure with its classification
fn collapse(op: &'static str, domain: MountDomain, path: &str, err: &BridgeError) {
    match err {
        BridgeError::NotFound(_)
        | BridgeError::NotADirectory(_)
        | BridgeError::Cancelled
        | BridgeError::NoMount(_) => {
            debug!(op, %domain, path = %path, error = %err, "reported as not found");
        }
        _ => {
            warn!(op, %domain, path = %path, error = %err, "adapter call failed");
        }
    }
}

impl PatchedDriver {
    pub fn new(
        original: Rc<dyn StorageDriver>,
        context: Rc<FilesystemBridgeContext>,
        bridge: BlockingBridge,
    ) -> Self {
        Self {
            original,
            context,
            bridge,
        }
    }

    pub fn context(&self) -> &Rc<FilesystemBridgeContext> {
        &self.context
    }

    /// Ask the user for a directory and mount it at the native prefix.
    /// Resumes with the directory's name, or `None` when the dialog was
    /// dismissed or failed.
    pub fn pick_directory(&self, picker: Rc<dyn DirectoryPicker>, reply: Continuation<Option<String>>) {
        let context = self.context.clone();
        self.bridge.run(
            SuspendReason::DirectoryPicker,
            async move {
                match context.native().pick(picker.as_ref()).await {
                    Ok(name) => Some(name),
                    Err(e) => {
                        collapse("pick", MountDomain::Native, "", &e);
                        None
                    }
                }
            },
            reply,
        );
    }

    /// Adapter domain and relative path for `path`, or `None` to fall back
    fn select(&self, path: &str) -> Option<(MountDomain, String)> {
        let routed = self.context.router().route(path);
        let domain = if routed.runtime_root && self.context.native().is_active() {
            MountDomain::Native
        } else {
            routed.domain
        };
        let adapter = self.context.adapter(domain)?;
        if !adapter.is_active() {
            debug!(path = %path, %domain, "mount inactive, using original driver");
            return None;
        }
        Some((domain, routed.relative.to_string()))
    }

    fn adapter_for(&self, record: &FileRecord) -> Option<&dyn Adapter> {
        self.context.adapter(record.origin)
    }
}

impl StorageDriver for PatchedDriver {
    fn stat_async(&self, path: &str, reply: Continuation<StatReply>) {
        let Some((domain, relative)) = self.select(path) else {
            return self.original.stat_async(path, reply);
        };
        let context = self.context.clone();
        let reason = context.suspend_reason(domain);
        self.bridge.run(
            reason,
            async move {
                let Some(adapter) = context.adapter(domain) else {
                    return StatReply::default();
                };
                match adapter.stat(&relative).await {
                    Ok(record) => record.to_stat_reply(),
                    Err(e) => {
                        collapse("stat", domain, &relative, &e);
                        StatReply::default()
                    }
                }
            },
            reply,
        );
    }

    fn list_async(&self, path: &str, reply: Continuation<Vec<String>>) {
        let Some((domain, relative)) = self.select(path) else {
            return self.original.list_async(path, reply);
        };
        let context = self.context.clone();
        let reason = context.suspend_reason(domain);
        self.bridge.run(
            reason,
            async move {
                let Some(adapter) = context.adapter(domain) else {
                    return Vec::new();
                };
                match adapter.list(&relative).await {
                    Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
                    Err(e) => {
                        collapse("list", domain, &relative, &e);
                        Vec::new()
                    }
                }
            },
            reply,
        );
    }

    fn make_file_data(&self, request: OpenRequest, reply: Continuation<Option<FileRecord>>) {
        let Some((domain, relative)) = self.select(&request.path) else {
            return self.original.make_file_data(request, reply);
        };
        let mode = match request.mode.parse::<OpenMode>() {
            Ok(mode) => mode,
            Err(e) => {
                collapse("open", domain, &relative, &e);
                return reply.resume(None);
            }
        };
        let (uid, gid) = (request.uid, request.gid);
        let context = self.context.clone();
        let reason = context.suspend_reason(domain);
        self.bridge.run(
            reason,
            async move {
                let adapter = context.adapter(domain)?;
                match adapter.open(&relative, mode).await {
                    Ok(record) => Some(record.owned_by(uid, gid)),
                    Err(e) => {
                        collapse("open", domain, &relative, &e);
                        None
                    }
                }
            },
            reply,
        );
    }

    fn close(&self, record: &FileRecord, reply: Continuation<()>) {
        if self.adapter_for(record).is_none() {
            return self.original.close(record, reply);
        }
        if !record.is_dirty() {
            return reply.resume(());
        }
        let context = self.context.clone();
        let record = record.clone();
        self.bridge.run(
            SuspendReason::WritableCommit,
            async move {
                let Some(adapter) = context.adapter(record.origin) else {
                    return;
                };
                if let Err(e) = adapter.commit(&record).await {
                    collapse("close", record.origin, &record.path, &e);
                }
            },
            reply,
        );
    }

    fn read_async(&self, record: &FileRecord, offset: u64, len: u64, reply: Continuation<Bytes>) {
        if self.adapter_for(record).is_none() {
            return self.original.read_async(record, offset, len, reply);
        }
        let context = self.context.clone();
        let reason = context.suspend_reason(record.origin);
        let record = record.clone();
        self.bridge.run(
            reason,
            async move {
                let Some(adapter) = context.adapter(record.origin) else {
                    return Bytes::new();
                };
                match adapter.read(&record, offset, len).await {
                    Ok(data) => data,
                    Err(e) => {
                        collapse("read", record.origin, &record.path, &e);
                        Bytes::new()
                    }
                }
            },
            reply,
        );
    }

    fn write_async(&self, record: &FileRecord, offset: u64, data: Bytes, reply: Continuation<usize>) {
        if self.adapter_for(record).is_none() {
            return self.original.write_async(record, offset, data, reply);
        }
        match record.write_at(offset, &data) {
            Ok(written) => reply.resume(written),
            Err(e) => {
                collapse("write", record.origin, &record.path, &e);
                reply.resume(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::TokioSpawner;
    use crate::config::BridgeConfig;
    use crate::memory::{MemoryBlob, MemoryDirectory};
    use crate::testing::{
        ContextEvent, DriverCall, RecordingContext, RecordingDriver, StubContentApi, StubPicker,
    };

    struct Harness {
        driver: PatchedDriver,
        original: Rc<RecordingDriver>,
        context: Rc<RecordingContext>,
    }

    fn harness() -> Harness {
        let original = Rc::new(RecordingDriver::default());
        let context = Rc::new(RecordingContext::default());
        let bridge_context = Rc::new(FilesystemBridgeContext::new(
            BridgeConfig::default(),
            StubContentApi::new(),
        ));
        let bridge = BlockingBridge::new(context.clone(), Rc::new(TokioSpawner));
        Harness {
            driver: PatchedDriver::new(original.clone(), bridge_context, bridge),
            original,
            context,
        }
    }

    async fn stat(driver: &PatchedDriver, path: &str) -> StatReply {
        let (reply, rx) = Continuation::channel("stat");
        driver.stat_async(path, reply);
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn private_paths_reach_the_original() {
        let h = harness();
        let reply = stat(&h.driver, "/.java/userPrefs").await;
        assert!(!reply.exists());
        assert_eq!(
            h.original.calls(),
            vec![DriverCall::Stat("/.java/userPrefs".to_string())]
        );
    }

    #[tokio::test]
    async fn root_falls_back_without_native_mount() {
        let h = harness();
        stat(&h.driver, "/").await;
        assert_eq!(h.original.calls(), vec![DriverCall::Stat("/".to_string())]);
    }

    #[tokio::test]
    async fn root_maps_to_native_mount() {
        let h = harness();
        h.driver
            .context()
            .native()
            .mount_slot()
            .mount(MemoryDirectory::new("granted"));
        let reply = stat(&h.driver, "/").await;
        assert!(reply.is_dir());
        assert!(h.original.calls().is_empty());
    }

    #[tokio::test]
    async fn unmounted_native_paths_fall_back() {
        let h = harness();
        stat(&h.driver, "/files/a.txt").await;
        assert_eq!(h.original.calls().len(), 1);
    }

    #[tokio::test]
    async fn local_stat_never_suspends() {
        let h = harness();
        h.driver
            .context()
            .local()
            .tree_mut()
            .add_file("x.png", MemoryBlob::new("x.png", &b"png"[..]));
        let reply = stat(&h.driver, "/local/x.png").await;
        assert_eq!(reply.file_length, 3);
        assert_eq!(reply.perm_type & 0o777, 0o444);
        assert!(h.context.events().is_empty());
    }

    #[tokio::test]
    async fn local_open_for_write_is_none() {
        let h = harness();
        h.driver
            .context()
            .local()
            .tree_mut()
            .add_file("x", MemoryBlob::new("x", &b"1"[..]));
        let (reply, rx) = Continuation::channel("open");
        h.driver.make_file_data(OpenRequest::new("/local/x", "w"), reply);
        assert!(rx.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_mode_is_none() {
        let h = harness();
        let (reply, rx) = Continuation::channel("open");
        h.driver.make_file_data(OpenRequest::new("/local/x", "a"), reply);
        assert!(rx.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_records_are_delegated() {
        let h = harness();
        let foreign = FileRecord::file(MountDomain::Default, "/.x", 4, 0);
        let (reply, rx) = Continuation::channel("read");
        h.driver.read_async(&foreign, 0, 4, reply);
        assert!(rx.await.unwrap().is_empty());
        let (reply, rx) = Continuation::channel("close");
        h.driver.close(&foreign, reply);
        rx.await.unwrap();
        assert_eq!(
            h.original.calls(),
            vec![
                DriverCall::Read("/.x".to_string()),
                DriverCall::Close("/.x".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn picker_suspends_the_runtime_until_answered() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let h = harness();
                let picker = StubPicker::choosing(MemoryDirectory::new("photos")).deferred();
                let (reply, rx) = Continuation::channel("pick");
                h.driver.pick_directory(Rc::new(picker), reply);
                assert_eq!(
                    h.context.events(),
                    vec![ContextEvent::Suspend(SuspendReason::DirectoryPicker)]
                );

                assert_eq!(rx.await.unwrap().as_deref(), Some("photos"));
                assert_eq!(
                    h.context.events(),
                    vec![
                        ContextEvent::Suspend(SuspendReason::DirectoryPicker),
                        ContextEvent::Ready,
                        ContextEvent::ScheduleResume,
                    ]
                );
                assert!(h.driver.context().native().is_active());
            })
            .await;
    }

    #[tokio::test]
    async fn dismissed_picker_resumes_with_nothing() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let h = harness();
                let (reply, rx) = Continuation::channel("pick");
                h.driver
                    .pick_directory(Rc::new(StubPicker::cancelling().deferred()), reply);
                assert!(rx.await.unwrap().is_none());
                assert!(!h.driver.context().native().is_active());
                assert_eq!(h.context.suspensions(), 1);
            })
            .await;
    }
}
