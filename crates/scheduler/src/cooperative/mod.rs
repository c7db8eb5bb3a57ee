//! Cooperative scheduler: one structured task group on the caller's runtime.
//!
//! Initial and recursively submitted tasks are registered as children of a
//! single [`JoinSet`]. `run` returns once every child has finished, or once
//! the group has been cancelled and every child has unwound. An optional
//! semaphore bounds how many children are inside the work function at once
//! without bounding how many are registered.
//!
//! Any child failure (an `Err`, a panic, or a failing result callback)
//! cancels the whole group and becomes the batch outcome. An interrupt from
//! the caller's [`CancellationToken`] does the same and is reported as
//! [`BatchError::Interrupted`](fanout_core::BatchError::Interrupted).

mod group;

use std::fmt::Display;
use std::sync::Arc;

use fanout_core::{
    panic_message, AsyncWork, Backend, BatchConfig, BatchError, BatchMetrics, BatchResult,
    MetricsRecorder, ResultSink, Submitter,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use self::group::GroupSignal;
use self::group::Intake;

type Children = JoinSet<Result<(), GroupSignal>>;

/// Batch runner backed by a structured group of async tasks.
pub struct TaskGroupBatch<V> {
    config: BatchConfig,
    sink: Option<ResultSink<V>>,
    interrupt: Option<CancellationToken>,
}

impl<V: Send + 'static> TaskGroupBatch<V> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            sink: None,
            interrupt: None,
        }
    }

    /// Invoke `f` with every successful work result.
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        self.sink = Some(ResultSink::sync(f));
        self
    }

    /// Await `f` with every successful work result before the child counts as finished.
    pub fn on_result_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.sink = Some(ResultSink::asynchronous(f));
        self
    }

    /// Abort the batch with [`BatchError::Interrupted`](fanout_core::BatchError::Interrupted) when `token` is cancelled.
    pub fn interrupt_token(mut self, token: CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    /// Run `tasks` (and everything they submit) on the current runtime.
    pub async fn run<T, E, I>(&self, work: AsyncWork<T, V, E>, tasks: I) -> BatchResult<BatchMetrics>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        I: IntoIterator<Item = T>,
    {
        let batch_id = Uuid::new_v4();
        let limit = self.config.resolved_concurrency_limit();
        let metrics = Arc::new(MetricsRecorder::new(Backend::Cooperative));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let intake = Arc::new(Intake::new(tx));
        let submitter = {
            let intake = Arc::clone(&intake);
            Submitter::new(move |task| intake.submit(task))
        };

        let ctx = Arc::new(ChildContext {
            work,
            sink: self.sink.clone(),
            permits: limit.map(|n| Arc::new(Semaphore::new(n))),
            metrics: Arc::clone(&metrics),
            submitter,
        });
        info!(%batch_id, backend = "cooperative", concurrency_limit = ?limit, "batch starting");

        let mut children = Children::new();
        for task in tasks {
            ctx.spawn(&mut children, task);
        }

        let outcome = supervise(&mut children, &mut rx, &ctx, self.interrupt.as_ref()).await;

        match outcome {
            Ok(()) => {
                intake.close();
                let metrics = metrics.snapshot();
                info!(
                    %batch_id,
                    backend = "cooperative",
                    submitted = metrics.submitted,
                    completed = metrics.completed,
                    peak_active = metrics.peak_workers,
                    elapsed_ms = metrics.elapsed.as_millis() as u64,
                    "batch finished"
                );
                Ok(metrics)
            }
            Err(signal) => {
                intake.begin_cancel(&signal);
                children.abort_all();
                while children.join_next().await.is_some() {}

                let mut dropped = 0usize;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
                intake.close();
                warn!(
                    %batch_id,
                    backend = "cooperative",
                    reason = %signal,
                    dropped,
                    "batch cancelled"
                );
                Err(signal.into())
            }
        }
    }

    /// Drive [`run`](Self::run) to completion on a fresh current-thread runtime.
    ///
    /// Must not be called from inside another tokio runtime.
    pub fn run_blocking<T, E, I>(
        &self,
        work: AsyncWork<T, V, E>,
        tasks: I,
    ) -> BatchResult<BatchMetrics>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        I: IntoIterator<Item = T>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(BatchError::Runtime)?;
        runtime.block_on(self.run(work, tasks))
    }
}

/// Register queued submissions and reap children until quiescence or a stop signal.
async fn supervise<T, V, E>(
    children: &mut Children,
    rx: &mut UnboundedReceiver<T>,
    ctx: &Arc<ChildContext<T, V, E>>,
    interrupt: Option<&CancellationToken>,
) -> Result<(), GroupSignal>
where
    T: Send + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
{
    loop {
        // Children send before they finish, so an empty set with an empty
        // queue is quiescence.
        while let Ok(task) = rx.try_recv() {
            ctx.spawn(children, task);
        }
        if children.is_empty() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = interrupted(interrupt) => return Err(GroupSignal::Interrupted),
            Some(task) = rx.recv() => ctx.spawn(children, task),
            Some(joined) = children.join_next() => match joined {
                Ok(Ok(())) => {}
                Ok(Err(signal)) => {
                    ctx.metrics.record_failed();
                    return Err(signal);
                }
                Err(e) if e.is_cancelled() => debug!("child cancelled"),
                Err(e) => {
                    ctx.metrics.record_failed();
                    return Err(GroupSignal::Failed(describe_join_error(e)));
                }
            },
        }
    }
}

async fn interrupted(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

fn describe_join_error(e: JoinError) -> String {
    if e.is_panic() {
        format!("panicked: {}", panic_message(e.into_panic().as_ref()))
    } else {
        e.to_string()
    }
}

/// Everything a child needs, shared by all children of one run.
struct ChildContext<T, V, E> {
    work: AsyncWork<T, V, E>,
    sink: Option<ResultSink<V>>,
    permits: Option<Arc<Semaphore>>,
    metrics: Arc<MetricsRecorder>,
    submitter: Submitter<T>,
}

impl<T, V, E> ChildContext<T, V, E>
where
    T: Send + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
{
    fn spawn(self: &Arc<Self>, children: &mut Children, task: T) {
        self.metrics.record_submitted();
        children.spawn(Arc::clone(self).run_child(task));
    }

    async fn run_child(self: Arc<Self>, task: T) -> Result<(), GroupSignal> {
        let result = {
            let _permit = match &self.permits {
                Some(permits) => Some(
                    Arc::clone(permits)
                        .acquire_owned()
                        .await
                        .map_err(|_| GroupSignal::Failed("permit set closed".into()))?,
                ),
                None => None,
            };
            let _active = ActiveGuard::new(&self.metrics);
            self.work.call(task, &self.submitter).await
        };

        let value = result.map_err(|e| GroupSignal::Failed(e.to_string()))?;
        if let Some(sink) = &self.sink {
            sink.deliver(value).await;
        }
        self.metrics.record_completed();
        Ok(())
    }
}

/// Tracks children currently inside the work function, including on abort.
struct ActiveGuard<'a> {
    metrics: &'a MetricsRecorder,
}

impl<'a> ActiveGuard<'a> {
    fn new(metrics: &'a MetricsRecorder) -> Self {
        metrics.worker_started();
        Self { metrics }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.metrics.worker_stopped();
    }
}
