use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use fsbridge_vfs::testing::{
    ContextEvent, DeferredSinkDirectory, FailingDirectory, RecordingContext, RecordingDriver,
    StubContentApi, StubPicker,
};
use fsbridge_vfs::{
    BlobSource, BlockingBridge, BridgeConfig, BridgeError, Continuation, DirEntry,
    DirectoryHandle, FileHandle, FileRecord, FilesystemBridgeContext, MemoryBlob,
    MemoryDirectory, OpenRequest, PatchedDriver, StatReply, StorageDriver, SuspendReason,
    TokioSpawner,
};
use tokio::task::LocalSet;

struct Bridge {
    driver: PatchedDriver,
    context: Rc<FilesystemBridgeContext>,
    api: Rc<StubContentApi>,
    exec: Rc<RecordingContext>,
    original: Rc<RecordingDriver>,
}

fn bridge_with(config: BridgeConfig) -> Bridge {
    let api = StubContentApi::new()
        .with_repo("octocat", "hello-world", "master")
        .with_file("octocat", "hello-world", "master", "README", b"Hello World!\n")
        .with_file("octocat", "hello-world", "master", "docs/guide.md", b"# Guide");
    let context = Rc::new(FilesystemBridgeContext::new(config, api.clone()));
    let exec = Rc::new(RecordingContext::default());
    let original = Rc::new(RecordingDriver::default());
    let bridge = BlockingBridge::new(exec.clone(), Rc::new(TokioSpawner));
    Bridge {
        driver: PatchedDriver::new(original.clone(), context.clone(), bridge),
        context,
        api,
        exec,
        original,
    }
}

fn bridge() -> Bridge {
    bridge_with(BridgeConfig::default())
}

fn local<F: Future>(f: F) -> impl Future<Output = F::Output> {
    async move { LocalSet::new().run_until(f).await }
}

impl Bridge {
    async fn stat(&self, path: &str) -> StatReply {
        let (reply, rx) = Continuation::channel("stat");
        self.driver.stat_async(path, reply);
        rx.await.unwrap()
    }

    async fn list(&self, path: &str) -> Vec<String> {
        let (reply, rx) = Continuation::channel("list");
        self.driver.list_async(path, reply);
        rx.await.unwrap()
    }

    async fn open(&self, path: &str, mode: &str) -> Option<FileRecord> {
        let (reply, rx) = Continuation::channel("open");
        self.driver.make_file_data(OpenRequest::new(path, mode), reply);
        rx.await.unwrap()
    }

    async fn read(&self, record: &FileRecord, offset: u64, len: u64) -> Bytes {
        let (reply, rx) = Continuation::channel("read");
        self.driver.read_async(record, offset, len, reply);
        rx.await.unwrap()
    }

    async fn write(&self, record: &FileRecord, offset: u64, data: &'static [u8]) -> usize {
        let (reply, rx) = Continuation::channel("write");
        self.driver.write_async(record, offset, Bytes::from_static(data), reply);
        rx.await.unwrap()
    }

    async fn close(&self, record: &FileRecord) {
        let (reply, rx) = Continuation::channel("close");
        self.driver.close(record, reply);
        rx.await.unwrap();
    }

    fn mount_native(&self, files: &[(&str, &[u8])]) -> Rc<MemoryDirectory> {
        let root = MemoryDirectory::with_files("granted", files);
        self.context.native().mount_slot().mount(root.clone());
        root
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn native_directory_scenario() {
    local(async {
        let b = bridge();
        b.mount_native(&[("notes.txt", b"hello")]);

        let stat = b.stat("/files/notes.txt").await;
        assert!(stat.exists());
        assert!(!stat.is_dir());
        assert_eq!(stat.file_length, 5);

        assert!(b.list("/files/").await.contains(&"notes.txt".to_string()));

        let record = b.open("/files/notes.txt", "r").await.unwrap();
        let data = b.read(&record, 0, 10).await;
        assert_eq!(&data[..], b"hello");
        assert_eq!(data.len(), 5);
        b.close(&record).await;
        assert!(b.original.calls().is_empty());
    })
    .await;
}

#[tokio::test]
async fn dropped_file_scenario() {
    local(async {
        let b = bridge();
        b.context
            .local()
            .tree_mut()
            .add_files([MemoryBlob::new("a.png", &b"\x89PNG"[..]) as Rc<dyn BlobSource>]);

        let found = b.stat("/local/a.png").await;
        assert!(found.exists());
        assert_eq!(found.file_length, 4);

        let missing = b.stat("/local/missing.png").await;
        assert_eq!(missing.perm_type, 0);
        assert!(!missing.exists());
    })
    .await;
}

#[tokio::test]
async fn remote_listing_scenario() {
    local(async {
        let b = bridge();
        b.context
            .remote()
            .mount("octocat", "hello-world", None)
            .await
            .unwrap();

        let first = b.list("/github/octocat/hello-world/").await;
        assert_eq!(first, vec!["README".to_string(), "docs".to_string()]);
        let after_first = b.api.contents_requests();

        let second = b.list("/github/octocat/hello-world/").await;
        assert_eq!(first, second);
        assert_eq!(b.api.contents_requests(), after_first);
    })
    .await;
}

#[tokio::test]
async fn local_write_scenario() {
    local(async {
        let b = bridge();
        b.context
            .local()
            .tree_mut()
            .add_file("a.png", MemoryBlob::new("a.png", &b"png"[..]));
        assert!(b.open("/local/a.png", "w").await.is_none());
        assert!(b.open("/local/new.png", "w").await.is_none());
        assert!(b.original.calls().is_empty());
    })
    .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reads_clamp_at_eof_on_every_adapter() {
    local(async {
        let b = bridge();
        b.mount_native(&[("ten.bin", b"0123456789")]);
        b.context
            .local()
            .tree_mut()
            .add_file("ten.bin", MemoryBlob::new("ten.bin", &b"0123456789"[..]));
        b.context.remote().mount_spec("octocat/hello-world").await.unwrap();

        for path in ["/files/ten.bin", "/local/ten.bin", "/github/octocat/hello-world/README"] {
            let record = b.open(path, "r").await.unwrap();
            let len = record.byte_length();
            assert!(b.read(&record, len, 4).await.is_empty(), "{path} at EOF");
            assert!(b.read(&record, len + 7, 4).await.is_empty(), "{path} past EOF");
            assert_eq!(b.read(&record, len - 3, 100).await.len(), 3, "{path} tail");
        }
    })
    .await;
}

#[tokio::test]
async fn remote_reads_are_served_from_cache() {
    local(async {
        let b = bridge();
        b.context.remote().mount_spec("octocat/hello-world").await.unwrap();

        let first = b.open("/github/octocat/hello-world/README", "r").await.unwrap();
        let a = b.read(&first, 0, 1024).await;
        assert_eq!(b.api.raw_requests(), 1);

        let second = b.open("/github/octocat/hello-world/README", "r").await.unwrap();
        let c = b.read(&second, 0, 1024).await;
        assert_eq!(a, c);
        assert_eq!(b.api.raw_requests(), 1);
    })
    .await;
}

#[tokio::test]
async fn roots_are_synthesized_without_backend_calls() {
    local(async {
        let b = bridge();
        let failing = FailingDirectory::transport();
        b.context.native().mount_slot().mount(failing.clone());
        b.api.set_failing(true);
        let before = b.api.requests();

        for path in ["/files", "/files/", "/", "", "/local", "/local/", "/github", "/github/"] {
            let stat = b.stat(path).await;
            assert!(stat.is_dir(), "{path:?} should be a directory");
        }
        assert_eq!(failing.calls(), 0);
        assert_eq!(b.api.requests(), before);
        assert!(b.original.calls().is_empty());
    })
    .await;
}

#[tokio::test]
async fn native_writes_round_trip() {
    local(async {
        let mut config = BridgeConfig::default();
        config.native.chunk_size = 4;
        let b = bridge_with(config);
        let root = b.mount_native(&[]);

        let record = b.open("/files/out/data.bin", "w").await.unwrap();
        assert_eq!(b.write(&record, 0, b"abc").await, 3);
        assert_eq!(b.write(&record, 3, b"defgh").await, 5);
        assert_eq!(b.write(&record, 8, b"ij").await, 2);
        b.close(&record).await;
        assert_eq!(&root.file("out/data.bin").unwrap().contents()[..], b"abcdefghij");

        let reopened = b.open("/files/out/data.bin", "r").await.unwrap();
        assert_eq!(&b.read(&reopened, 0, reopened.byte_length()).await[..], b"abcdefghij");
    })
    .await;
}

#[tokio::test]
async fn zero_length_files_are_written() {
    local(async {
        let b = bridge();
        let root = b.mount_native(&[("stale.txt", b"old")]);

        let record = b.open("/files/stale.txt", "w").await.unwrap();
        b.close(&record).await;
        let file = root.file("stale.txt").unwrap();
        assert!(file.contents().is_empty());
        assert_eq!(file.write_count(), 1);

        let reopened = b.open("/files/stale.txt", "r").await.unwrap();
        assert_eq!(reopened.byte_length(), 0);
        assert!(b.read(&reopened, 0, 10).await.is_empty());
        assert_eq!(b.stat("/files/stale.txt").await.file_length, 0);
    })
    .await;
}

/// Counts resumes per operation
fn counted<T: Default + 'static>(count: &Rc<Cell<usize>>) -> Continuation<T> {
    let count = count.clone();
    Continuation::new("counted", move |_| count.set(count.get() + 1))
}

struct BrokenBlob;

#[async_trait(?Send)]
impl BlobSource for BrokenBlob {
    fn name(&self) -> &str {
        "broken.bin"
    }

    fn size(&self) -> u64 {
        16
    }

    fn last_modified(&self) -> i64 {
        0
    }

    async fn slice(&self, _start: u64, _end: u64) -> fsbridge_vfs::Result<Bytes> {
        Err(BridgeError::transport("blob no longer readable"))
    }
}

async fn exercise(b: &Bridge, path: &str) -> usize {
    let count = Rc::new(Cell::new(0));
    b.driver.stat_async(path, counted(&count));
    b.driver.list_async(path, counted(&count));
    let (reply, rx) = Continuation::channel("open");
    b.driver.make_file_data(OpenRequest::new(path, "r"), reply);
    let record = rx.await.unwrap();
    let mut expected = 2;
    if let Some(record) = record {
        b.driver.read_async(&record, 0, 8, counted(&count));
        b.driver.close(&record, counted(&count));
        expected += 2;
    }
    while count.get() < expected {
        tokio::task::yield_now().await;
    }
    count.get()
}

#[tokio::test]
async fn every_call_resumes_exactly_once() {
    local(async {
        let b = bridge();
        b.mount_native(&[("ok.txt", b"fine")]);
        b.context
            .local()
            .tree_mut()
            .add_file("ok.bin", MemoryBlob::new("ok.bin", &b"fine"[..]));
        b.context.local().tree_mut().add_file("broken.bin", Rc::new(BrokenBlob));
        b.context.remote().mount_spec("octocat/hello-world").await.unwrap();

        // success and not-found
        assert_eq!(exercise(&b, "/files/ok.txt").await, 4);
        assert_eq!(exercise(&b, "/files/missing.txt").await, 2);
        assert_eq!(exercise(&b, "/local/ok.bin").await, 4);
        assert_eq!(exercise(&b, "/local/missing.bin").await, 2);
        assert_eq!(exercise(&b, "/github/octocat/hello-world/README").await, 4);
        assert_eq!(exercise(&b, "/github/octocat/hello-world/nope").await, 2);

        // transport failures
        assert_eq!(exercise(&b, "/local/broken.bin").await, 4);
        b.api.set_failing(true);
        assert_eq!(exercise(&b, "/github/octocat/hello-world/docs/guide.md").await, 2);
        b.context
            .native()
            .mount_slot()
            .mount(FailingDirectory::transport());
        assert_eq!(exercise(&b, "/files/ok.txt").await, 2);
    })
    .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Commits
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn writes_during_a_commit_are_flushed_by_the_next_close() {
    local(async {
        let b = bridge();
        let inner = MemoryDirectory::new("granted");
        b.context
            .native()
            .mount_slot()
            .mount(DeferredSinkDirectory::new(inner.clone()));

        let record = b.open("/files/f", "w").await.unwrap();
        assert_eq!(b.write(&record, 0, b"a").await, 1);
        let (reply, first_close) = Continuation::channel("close");
        b.driver.close(&record, reply);
        assert_eq!(b.write(&record, 1, b"b").await, 1);
        first_close.await.unwrap();
        assert_eq!(&inner.file("f").unwrap().contents()[..], b"a");
        assert!(record.is_dirty());

        b.close(&record).await;
        assert_eq!(&inner.file("f").unwrap().contents()[..], b"ab");
        assert!(!record.is_dirty());
    })
    .await;
}

#[tokio::test]
async fn failed_commit_resumes_once_and_stays_dirty() {
    local(async {
        let b = bridge();
        let inner = MemoryDirectory::with_files("granted", &[("keep.txt", b"old")]);
        let sink = DeferredSinkDirectory::failing(inner.clone());
        b.context.native().mount_slot().mount(sink.clone());

        let record = b.open("/files/keep.txt", "w").await.unwrap();
        assert_eq!(b.write(&record, 0, b"new").await, 3);
        let count = Rc::new(Cell::new(0));
        b.driver.close(&record, counted(&count));
        assert_eq!(
            b.exec.events(),
            vec![ContextEvent::Suspend(SuspendReason::WritableCommit)]
        );

        while !b.exec.events().contains(&ContextEvent::ScheduleResume) {
            tokio::task::yield_now().await;
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(count.get(), 1);
        assert!(record.is_dirty());
        assert_eq!(sink.flushes(), 1);
        assert_eq!(&inner.file("keep.txt").unwrap().contents()[..], b"old");
        assert_eq!(
            b.exec.events(),
            vec![
                ContextEvent::Suspend(SuspendReason::WritableCommit),
                ContextEvent::Ready,
                ContextEvent::ScheduleResume,
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn writes_past_the_addressable_range_report_nothing_written() {
    local(async {
        let b = bridge();
        b.mount_native(&[]);
        let record = b.open("/files/huge.bin", "w").await.unwrap();
        assert_eq!(b.write(&record, u64::MAX - 1, b"xyz").await, 0);
        assert_eq!(record.byte_length(), 0);
    })
    .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Suspension through the patched driver
// ─────────────────────────────────────────────────────────────────────────────

/// Directory handle that yields to the scheduler before every lookup
struct SlowDirectory(Rc<dyn DirectoryHandle>);

#[async_trait(?Send)]
impl DirectoryHandle for SlowDirectory {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn get_directory(
        &self,
        name: &str,
        create: bool,
    ) -> fsbridge_vfs::Result<Rc<dyn DirectoryHandle>> {
        tokio::task::yield_now().await;
        let dir = self.0.get_directory(name, create).await?;
        Ok(Rc::new(Self(dir)))
    }

    async fn get_file(&self, name: &str, create: bool) -> fsbridge_vfs::Result<Rc<dyn FileHandle>> {
        tokio::task::yield_now().await;
        self.0.get_file(name, create).await
    }

    async fn entries(&self) -> fsbridge_vfs::Result<Vec<DirEntry>> {
        tokio::task::yield_now().await;
        self.0.entries().await
    }
}

#[tokio::test]
async fn pending_lookups_suspend_and_resume_the_runtime() {
    local(async {
        let b = bridge();
        let inner = MemoryDirectory::with_files("granted", &[("a/b.txt", b"xyz")]);
        b.context
            .native()
            .mount_slot()
            .mount(Rc::new(SlowDirectory(inner)));

        let stat = b.stat("/files/a/b.txt").await;
        assert_eq!(stat.file_length, 3);
        assert_eq!(
            b.exec.events(),
            vec![
                ContextEvent::Suspend(SuspendReason::HandleLookup),
                ContextEvent::Ready,
                ContextEvent::ScheduleResume,
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn cancelled_picker_leaves_mount_untouched() {
    local(async {
        let b = bridge();
        let native = b.context.native();
        assert!(matches!(
            native.pick(&StubPicker::cancelling()).await,
            Err(BridgeError::Cancelled)
        ));
        assert!(!native.mount_slot().is_mounted());

        let name = native
            .pick(&StubPicker::choosing(MemoryDirectory::new("chosen")))
            .await
            .unwrap();
        assert_eq!(name, "chosen");
        assert!(b.stat("/").await.is_dir());
    })
    .await;
}
