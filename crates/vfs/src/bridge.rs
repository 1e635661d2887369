//! Blocking-call bridge
//!
//! The runtime's storage driver is continuation-passing: each entry point takes
//! a callback and expects it to fire exactly once. The bridge drives an adapter
//! future and fires the callback, telling the runtime's execution context to
//! suspend while the future is pending and to resume once it has finished.
//!
//! Futures that complete on their first poll (cache hits, in-memory lookups)
//! resume inline and never suspend.

use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::task::noop_waker;
use tracing::{debug, error};

/// Why the runtime is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    HandleLookup,
    BlobSlice,
    NetworkFetch,
    WritableCommit,
    DirectoryPicker,
}

impl SuspendReason {
    /// Numeric code handed to the runtime's scheduler
    pub const fn code(self) -> u32 {
        match self {
            Self::HandleLookup => 1,
            Self::BlobSlice => 2,
            Self::NetworkFetch => 3,
            Self::WritableCommit => 4,
            Self::DirectoryPicker => 5,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HandleLookup => "handle-lookup",
            Self::BlobSlice => "blob-slice",
            Self::NetworkFetch => "network-fetch",
            Self::WritableCommit => "writable-commit",
            Self::DirectoryPicker => "directory-picker",
        }
    }
}

/// The runtime's scheduler, as seen by the bridge
pub trait ExecutionContext {
    /// Park the calling thread of the runtime
    fn suspend(&self, reason: SuspendReason);

    /// The awaited operation has finished
    fn ready(&self);

    /// Ask the scheduler to re-enter the runtime
    fn schedule_resume(&self);
}

/// Context for hosts that never block on the runtime side
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedContext;

impl ExecutionContext for DetachedContext {
    fn suspend(&self, reason: SuspendReason) {
        debug!(reason = reason.as_str(), "operation pending");
    }

    fn ready(&self) {}

    fn schedule_resume(&self) {}
}

/// One-shot callback into the runtime
///
/// `resume` consumes the continuation. Dropping it unresumed (a panic in the
/// adapter future, a forgotten branch) resumes with `T::default()`, which is
/// the not-found shape for every driver reply, and logs an error.
pub struct Continuation<T: Default> {
    op: &'static str,
    callback: Option<Box<dyn FnOnce(T)>>,
}

impl<T: Default> Continuation<T> {
    pub fn new(op: &'static str, callback: impl FnOnce(T) + 'static) -> Self {
        Self {
            op,
            callback: Some(Box::new(callback)),
        }
    }

    pub const fn op(&self) -> &'static str {
        self.op
    }

    pub fn resume(mut self, value: T) {
        if let Some(callback) = self.callback.take() {
            callback(value);
        }
    }
}

impl<T: Default + 'static> Continuation<T> {
    /// Continuation paired with a receiver, for callers that want to await the
    /// reply instead of handling a callback
    pub fn channel(op: &'static str) -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let continuation = Self::new(op, move |value| {
            // Receiver gone means nobody is waiting
            let _ = tx.send(value);
        });
        (continuation, rx)
    }
}

impl<T: Default> Drop for Continuation<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            error!(op = self.op, "continuation dropped without resuming");
            callback(T::default());
        }
    }
}

/// Runs detached futures on the runtime's thread
pub trait Spawner {
    fn spawn(&self, future: LocalBoxFuture<'static, ()>);
}

/// Spawns onto the current `tokio::task::LocalSet`
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

#[cfg(not(target_arch = "wasm32"))]
impl Spawner for TokioSpawner {
    fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(future);
    }
}

pub struct BlockingBridge {
    context: Rc<dyn ExecutionContext>,
    spawner: Rc<dyn Spawner>,
}

impl BlockingBridge {
    pub fn new(context: Rc<dyn ExecutionContext>, spawner: Rc<dyn Spawner>) -> Self {
        Self { context, spawner }
    }

    /// Drive `future` and resume `continuation` with its output
    pub fn run<T, F>(&self, reason: SuspendReason, future: F, continuation: Continuation<T>)
    where
        T: Default + 'static,
        F: Future<Output = T> + 'static,
    {
        let mut future: LocalBoxFuture<'static, T> = Box::pin(future);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
            continuation.resume(value);
            return;
        }

        self.context.suspend(reason);
        let wake = Wake {
            context: self.context.clone(),
            continuation: Some(continuation),
        };
        self.spawner.spawn(Box::pin(async move {
            let value = future.await;
            wake.complete(value);
        }));
    }
}

/// Hands a suspended call back to the runtime. If the task is dropped before
/// completing (a panic in the adapter future), the continuation resumes with
/// its default and the runtime is still woken.
struct Wake<T: Default> {
    context: Rc<dyn ExecutionContext>,
    continuation: Option<Continuation<T>>,
}

impl<T: Default> Wake<T> {
    fn complete(mut self, value: T) {
        self.finish(Some(value));
    }

    fn finish(&mut self, value: Option<T>) {
        let Some(continuation) = self.continuation.take() else {
            return;
        };
        self.context.ready();
        match value {
            Some(value) => continuation.resume(value),
            None => drop(continuation),
        }
        self.context.schedule_resume();
    }
}

impl<T: Default> Drop for Wake<T> {
    fn drop(&mut self) {
        self.finish(None);
    }
}
