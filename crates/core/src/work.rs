//! Work shapes, the submit capability, and result sinks.
//!
//! A batch is driven by one [`Work`] (or [`AsyncWork`]) value whose variant
//! is picked by the caller and stays fixed for the whole run. The `WithSubmit`
//! shape receives a [`Submitter`] that feeds new tasks back into the same batch.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};

// ── Submitter ────────────────────────────────────────────────────────

/// Handle that enqueues a task into the batch that created it.
///
/// Cheap to clone. Valid for the lifetime of one `run`; afterwards every
/// call returns [`BatchError::Closed`].
pub struct Submitter<T> {
    inner: Arc<dyn Fn(T) -> BatchResult<()> + Send + Sync>,
}

impl<T> Submitter<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(T) -> BatchResult<()> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Enqueue `task` into the running batch.
    pub fn submit(&self, task: T) -> BatchResult<()> {
        (self.inner)(task)
    }
}

impl<T> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Submitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submitter").finish_non_exhaustive()
    }
}

// ── Blocking work ────────────────────────────────────────────────────

type PlainFn<T, V, E> = dyn Fn(T) -> Result<V, E> + Send + Sync;
type SubmitFn<T, V, E> = dyn Fn(T, &Submitter<T>) -> Result<V, E> + Send + Sync;

/// Work function for the thread backends.
pub enum Work<T, V, E> {
    /// Takes only the task.
    Plain(Arc<PlainFn<T, V, E>>),
    /// Takes the task and a submitter for recursive fan-out.
    WithSubmit(Arc<SubmitFn<T, V, E>>),
}

impl<T, V, E> Work<T, V, E> {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(T) -> Result<V, E> + Send + Sync + 'static,
    {
        Self::Plain(Arc::new(f))
    }

    pub fn with_submit<F>(f: F) -> Self
    where
        F: Fn(T, &Submitter<T>) -> Result<V, E> + Send + Sync + 'static,
    {
        Self::WithSubmit(Arc::new(f))
    }

    /// Invoke with the shape chosen at construction.
    pub fn call(&self, task: T, submitter: &Submitter<T>) -> Result<V, E> {
        match self {
            Self::Plain(f) => f(task),
            Self::WithSubmit(f) => f(task, submitter),
        }
    }
}

impl<T, V, E> Clone for Work<T, V, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(f) => Self::Plain(Arc::clone(f)),
            Self::WithSubmit(f) => Self::WithSubmit(Arc::clone(f)),
        }
    }
}

// ── Async work ───────────────────────────────────────────────────────

type AsyncPlainFn<T, V, E> = dyn Fn(T) -> BoxFuture<'static, Result<V, E>> + Send + Sync;
type AsyncSubmitFn<T, V, E> =
    dyn Fn(T, Submitter<T>) -> BoxFuture<'static, Result<V, E>> + Send + Sync;

/// Work function for the cooperative backend.
pub enum AsyncWork<T, V, E> {
    Plain(Arc<AsyncPlainFn<T, V, E>>),
    WithSubmit(Arc<AsyncSubmitFn<T, V, E>>),
}

impl<T: 'static, V: 'static, E: 'static> AsyncWork<T, V, E> {
    pub fn plain<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::Plain(Arc::new(move |task| -> BoxFuture<'static, Result<V, E>> {
            Box::pin(f(task))
        }))
    }

    pub fn with_submit<F, Fut>(f: F) -> Self
    where
        F: Fn(T, Submitter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::WithSubmit(Arc::new(
            move |task, submitter| -> BoxFuture<'static, Result<V, E>> { Box::pin(f(task, submitter)) },
        ))
    }

    pub fn call(&self, task: T, submitter: &Submitter<T>) -> BoxFuture<'static, Result<V, E>> {
        match self {
            Self::Plain(f) => f(task),
            Self::WithSubmit(f) => f(task, submitter.clone()),
        }
    }
}

impl<T, V, E> Clone for AsyncWork<T, V, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(f) => Self::Plain(Arc::clone(f)),
            Self::WithSubmit(f) => Self::WithSubmit(Arc::clone(f)),
        }
    }
}

// ── Result sinks ─────────────────────────────────────────────────────

/// Synchronous result callback shared by worker threads.
pub type SyncSink<V> = Arc<dyn Fn(V) + Send + Sync>;

/// Result callback for the cooperative backend; the async form is awaited
/// before the producing child counts as finished.
pub enum ResultSink<V> {
    Sync(SyncSink<V>),
    Async(Arc<dyn Fn(V) -> BoxFuture<'static, ()> + Send + Sync>),
}

impl<V: Send + 'static> ResultSink<V> {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Async(Arc::new(move |value| -> BoxFuture<'static, ()> { Box::pin(f(value)) }))
    }

    pub async fn deliver(&self, value: V) {
        match self {
            Self::Sync(f) => f(value),
            Self::Async(f) => f(value).await,
        }
    }
}

impl<V> Clone for ResultSink<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
        }
    }
}

// ── Backends and failure policies ────────────────────────────────────

/// What a backend does with a failed work invocation or result callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failure is logged and dropped; the task still counts as done.
    Discard,
    /// Failure escapes its own unit of work but never the in-flight accounting.
    Propagate,
    /// Failure cancels every other child and becomes the batch outcome.
    CancelGroup,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discard => "discard",
            Self::Propagate => "propagate",
            Self::CancelGroup => "cancel_group",
        };
        f.write_str(s)
    }
}

/// The three interchangeable scheduler backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Lazily grown thread set polling one shared queue.
    Dynamic,
    /// Fixed-size thread pool with an in-flight counter.
    Pool,
    /// Single logical thread multiplexing a structured task group.
    Cooperative,
}

impl Backend {
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            Self::Dynamic => FailurePolicy::Discard,
            Self::Pool => FailurePolicy::Propagate,
            Self::Cooperative => FailurePolicy::CancelGroup,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Pool => "pool",
            Self::Cooperative => "cooperative",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamic" | "thread" => Ok(Self::Dynamic),
            "pool" | "thread_pool" => Ok(Self::Pool),
            "cooperative" | "async" => Ok(Self::Cooperative),
            other => Err(BatchError::InvalidArgument(format!("unknown backend: {other}"))),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
