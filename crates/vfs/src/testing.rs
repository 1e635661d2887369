//! Test utilities for the bridge.
//!
//! Stubs for the runtime side (execution context, original driver) and for the
//! backends (content API, failing handles, pickers), each counting the calls it
//! receives so tests can assert on backend traffic.
//!
//! Compiled for this crate's tests and behind the `testing` feature.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::task::Poll;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bridge::{Continuation, ExecutionContext, SuspendReason};
use crate::driver::{OpenRequest, StorageDriver};
use crate::error::{BridgeError, Result};
use crate::handle::{DirEntry, DirectoryHandle, DirectoryPicker, FileHandle, FileMetadata};
use crate::http::{ContentApi, ContentEntry, ContentKind, ContentsResponse, RepoInfo};
use crate::record::{FileRecord, StatReply};

/// What the runtime's scheduler was told
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    Suspend(SuspendReason),
    Ready,
    ScheduleResume,
}

/// Execution context that records every transition
#[derive(Debug, Default)]
pub struct RecordingContext {
    events: RefCell<Vec<ContextEvent>>,
}

impl RecordingContext {
    pub fn events(&self) -> Vec<ContextEvent> {
        self.events.borrow().clone()
    }

    pub fn suspensions(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, ContextEvent::Suspend(_)))
            .count()
    }
}

impl ExecutionContext for RecordingContext {
    fn suspend(&self, reason: SuspendReason) {
        self.events.borrow_mut().push(ContextEvent::Suspend(reason));
    }

    fn ready(&self) {
        self.events.borrow_mut().push(ContextEvent::Ready);
    }

    fn schedule_resume(&self) {
        self.events.borrow_mut().push(ContextEvent::ScheduleResume);
    }
}

/// A call received by [`RecordingDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Stat(String),
    List(String),
    Open(String, String),
    Close(String),
    Read(String),
    Write(String),
}

/// Stand-in for the runtime's original driver; reports everything absent
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: RefCell<Vec<DriverCall>>,
}

impl RecordingDriver {
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: DriverCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl StorageDriver for RecordingDriver {
    fn stat_async(&self, path: &str, reply: Continuation<StatReply>) {
        self.record(DriverCall::Stat(path.to_string()));
        reply.resume(StatReply::default());
    }

    fn list_async(&self, path: &str, reply: Continuation<Vec<String>>) {
        self.record(DriverCall::List(path.to_string()));
        reply.resume(Vec::new());
    }

    fn make_file_data(&self, request: OpenRequest, reply: Continuation<Option<FileRecord>>) {
        self.record(DriverCall::Open(request.path, request.mode));
        reply.resume(None);
    }

    fn close(&self, record: &FileRecord, reply: Continuation<()>) {
        self.record(DriverCall::Close(record.path.clone()));
        reply.resume(());
    }

    fn read_async(&self, record: &FileRecord, _offset: u64, _len: u64, reply: Continuation<Bytes>) {
        self.record(DriverCall::Read(record.path.clone()));
        reply.resume(Bytes::new());
    }

    fn write_async(&self, record: &FileRecord, _offset: u64, _data: Bytes, reply: Continuation<usize>) {
        self.record(DriverCall::Write(record.path.clone()));
        reply.resume(0);
    }
}

/// Content API serving an in-memory set of repositories
///
/// Directory listings are derived from the registered file paths.
#[derive(Debug, Default)]
pub struct StubContentApi {
    repos: RefCell<BTreeMap<String, String>>,
    files: RefCell<BTreeMap<String, Bytes>>,
    repository_calls: Cell<usize>,
    contents_calls: Cell<usize>,
    raw_calls: Cell<usize>,
    failing: Cell<bool>,
}

impl StubContentApi {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Register a repository and its default branch
    pub fn with_repo(self: Rc<Self>, owner: &str, repo: &str, default_branch: &str) -> Rc<Self> {
        self.repos
            .borrow_mut()
            .insert(format!("{owner}/{repo}"), default_branch.to_string());
        self
    }

    pub fn with_file(
        self: Rc<Self>,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        data: &[u8],
    ) -> Rc<Self> {
        self.files.borrow_mut().insert(
            format!("{owner}/{repo}/{branch}/{path}"),
            Bytes::copy_from_slice(data),
        );
        self
    }

    /// Make every subsequent request fail with a transport error
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn requests(&self) -> usize {
        self.repository_calls.get() + self.contents_calls.get() + self.raw_calls.get()
    }

    pub fn contents_requests(&self) -> usize {
        self.contents_calls.get()
    }

    pub fn raw_requests(&self) -> usize {
        self.raw_calls.get()
    }

    fn hit(&self, counter: &Cell<usize>) -> Result<()> {
        counter.set(counter.get() + 1);
        if self.failing.get() {
            return Err(BridgeError::transport("connection reset"));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl ContentApi for StubContentApi {
    async fn repository(&self, owner: &str, repo: &str) -> Result<RepoInfo> {
        self.hit(&self.repository_calls)?;
        let key = format!("{owner}/{repo}");
        let default_branch = self
            .repos
            .borrow()
            .get(&key)
            .cloned()
            .ok_or_else(|| BridgeError::not_found(key.clone()))?;
        Ok(RepoInfo {
            default_branch,
            full_name: Some(key),
        })
    }

    async fn contents(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<ContentsResponse> {
        self.hit(&self.contents_calls)?;
        let root = format!("{owner}/{repo}/{branch}/");
        let key = format!("{root}{path}");
        let files = self.files.borrow();
        if let Some(data) = files.get(&key) {
            return Ok(ContentsResponse::File(entry(path, ContentKind::File, data.len())));
        }

        let prefix = if path.is_empty() { root } else { format!("{key}/") };
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (file, data) in files.iter() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(entry(&format!("{path}/{rest}"), ContentKind::File, data.len())),
            }
        }
        if entries.is_empty() && dirs.is_empty() && !path.is_empty() {
            return Err(BridgeError::not_found(key));
        }
        entries.extend(
            dirs.iter()
                .map(|d| entry(&format!("{path}/{d}"), ContentKind::Dir, 0)),
        );
        Ok(ContentsResponse::Directory(entries))
    }

    async fn raw(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<Bytes> {
        self.hit(&self.raw_calls)?;
        let key = format!("{owner}/{repo}/{branch}/{path}");
        self.files
            .borrow()
            .get(&key)
            .cloned()
            .ok_or_else(|| BridgeError::not_found(key))
    }
}

fn entry(path: &str, kind: ContentKind, size: usize) -> ContentEntry {
    let path = path.trim_start_matches('/');
    ContentEntry {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        kind,
        size: size as u64,
        download_url: None,
    }
}

/// Directory handle whose every call fails
pub struct FailingDirectory {
    error: fn(&str) -> BridgeError,
    calls: Cell<usize>,
}

impl FailingDirectory {
    /// Fails with a transport error
    pub fn transport() -> Rc<Self> {
        Rc::new(Self {
            error: |name| BridgeError::transport(format!("handle revoked: {name}")),
            calls: Cell::new(0),
        })
    }

    /// Fails with permission denied
    pub fn denied() -> Rc<Self> {
        Rc::new(Self {
            error: |name| BridgeError::PermissionDenied(name.to_string()),
            calls: Cell::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn fail(&self, name: &str) -> BridgeError {
        self.calls.set(self.calls.get() + 1);
        (self.error)(name)
    }
}

#[async_trait(?Send)]
impl DirectoryHandle for FailingDirectory {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get_directory(&self, name: &str, _create: bool) -> Result<Rc<dyn DirectoryHandle>> {
        Err(self.fail(name))
    }

    async fn get_file(&self, name: &str, _create: bool) -> Result<Rc<dyn FileHandle>> {
        Err(self.fail(name))
    }

    async fn entries(&self) -> Result<Vec<DirEntry>> {
        Err(self.fail(""))
    }
}

/// Pending once, waking itself, then ready
pub async fn yield_once() {
    let mut yielded = false;
    futures::future::poll_fn(|cx| {
        if yielded {
            return Poll::Ready(());
        }
        yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    })
    .await;
}

/// Directory whose files yield before every flush, optionally failing it
pub struct DeferredSinkDirectory {
    inner: Rc<dyn DirectoryHandle>,
    failing: bool,
    flushes: Rc<Cell<usize>>,
}

impl DeferredSinkDirectory {
    pub fn new(inner: Rc<dyn DirectoryHandle>) -> Rc<Self> {
        Self::wrap(inner, false, Rc::default())
    }

    /// Every flush fails with a transport error
    pub fn failing(inner: Rc<dyn DirectoryHandle>) -> Rc<Self> {
        Self::wrap(inner, true, Rc::default())
    }

    fn wrap(inner: Rc<dyn DirectoryHandle>, failing: bool, flushes: Rc<Cell<usize>>) -> Rc<Self> {
        Rc::new(Self {
            inner,
            failing,
            flushes,
        })
    }

    /// Flushes attempted through any file below this directory
    pub fn flushes(&self) -> usize {
        self.flushes.get()
    }
}

#[async_trait(?Send)]
impl DirectoryHandle for DeferredSinkDirectory {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_directory(&self, name: &str, create: bool) -> Result<Rc<dyn DirectoryHandle>> {
        let dir = self.inner.get_directory(name, create).await?;
        Ok(Self::wrap(dir, self.failing, self.flushes.clone()))
    }

    async fn get_file(&self, name: &str, create: bool) -> Result<Rc<dyn FileHandle>> {
        let file = self.inner.get_file(name, create).await?;
        Ok(Rc::new(DeferredSinkFile {
            inner: file,
            failing: self.failing,
            flushes: self.flushes.clone(),
        }))
    }

    async fn entries(&self) -> Result<Vec<DirEntry>> {
        self.inner.entries().await
    }
}

struct DeferredSinkFile {
    inner: Rc<dyn FileHandle>,
    failing: bool,
    flushes: Rc<Cell<usize>>,
}

#[async_trait(?Send)]
impl FileHandle for DeferredSinkFile {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn metadata(&self) -> Result<FileMetadata> {
        self.inner.metadata().await
    }

    async fn read_all(&self) -> Result<Bytes> {
        self.inner.read_all().await
    }

    async fn write_all(&self, data: Bytes) -> Result<()> {
        self.flushes.set(self.flushes.get() + 1);
        yield_once().await;
        if self.failing {
            return Err(BridgeError::transport(format!("writable closed: {}", self.name())));
        }
        self.inner.write_all(data).await
    }
}

/// Picker returning a fixed directory, or cancelling when it has none
#[derive(Default)]
pub struct StubPicker {
    choice: Option<Rc<dyn DirectoryHandle>>,
    deferred: bool,
}

impl StubPicker {
    pub fn choosing(dir: Rc<dyn DirectoryHandle>) -> Self {
        Self {
            choice: Some(dir),
            deferred: false,
        }
    }

    /// The user dismisses the dialog
    pub fn cancelling() -> Self {
        Self::default()
    }

    /// Answer only after yielding once, like a real dialog
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

#[async_trait(?Send)]
impl DirectoryPicker for StubPicker {
    async fn pick(&self) -> Result<Rc<dyn DirectoryHandle>> {
        if self.deferred {
            yield_once().await;
        }
        self.choice.clone().ok_or(BridgeError::Cancelled)
    }
}
