//! Fixed-pool scheduler: a rayon pool of exactly `max_workers` threads.
//!
//! Quiescence is an atomic in-flight counter plus a one-shot [`Latch`]. Every
//! submission increments the counter before the job is handed to the pool,
//! and a drop guard decrements it after the work function and callback have
//! finished (or unwound). The seeding phase holds one extra count so the
//! counter cannot touch zero while initial tasks are still being handed out.
//! Zero is terminal: once the counter reaches it, every later submit is
//! refused with [`BatchError::Closed`].
//!
//! An `Err` from the work function is logged and counted. A panic escapes its
//! own job into the pool's panic handler; the guard still runs.

#[cfg(test)]
mod tests;

use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fanout_core::{
    panic_message, Backend, BatchConfig, BatchError, BatchMetrics, BatchResult, Latch,
    MetricsRecorder, Submitter, SyncSink, Work,
};
use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Batch runner backed by a fixed-size thread pool.
pub struct PoolBatch<V> {
    config: BatchConfig,
    callback: Option<SyncSink<V>>,
}

impl<V: Send + 'static> PoolBatch<V> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    /// Invoke `f` with every successful work result. Called from pool threads.
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Run `tasks` (and everything they submit) to completion.
    ///
    /// Blocks on the completion latch, then drops the pool without waiting
    /// for it to wind down.
    pub fn run<T, E, I>(&self, work: Work<T, V, E>, tasks: I) -> BatchResult<BatchMetrics>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        I: IntoIterator<Item = T>,
    {
        let batch_id = Uuid::new_v4();
        let workers = self.config.resolved_max_workers();
        let pool = build_pool(batch_id, workers, &self.config.thread_name_prefix)?;

        let shared = Arc::new(PoolShared {
            batch_id,
            pool: RwLock::new(Some(pool)),
            // The seeding phase counts as one outstanding unit.
            in_flight: AtomicUsize::new(1),
            done: Latch::new(),
            work,
            callback: self.callback.clone(),
            metrics: MetricsRecorder::new(Backend::Pool),
        });
        info!(%batch_id, backend = "pool", workers, "batch starting");

        let seeded = tasks.into_iter().try_for_each(|task| shared.submit(task));
        InFlightGuard::seeding(&shared).release();

        shared.done.wait();
        let pool = shared.pool.write().take();
        drop(pool);
        seeded?;

        let metrics = shared.metrics.snapshot();
        info!(
            %batch_id,
            backend = "pool",
            submitted = metrics.submitted,
            completed = metrics.completed,
            failed = metrics.failed,
            peak_workers = metrics.peak_workers,
            elapsed_ms = metrics.elapsed.as_millis() as u64,
            "batch finished"
        );
        Ok(metrics)
    }
}

fn build_pool(batch_id: Uuid, workers: usize, prefix: &str) -> BatchResult<ThreadPool> {
    let prefix = prefix.to_string();
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .panic_handler(move |payload| {
            error!(%batch_id, panic = %panic_message(payload.as_ref()), "task panicked");
        })
        .build()
        .map_err(|e| BatchError::PoolBuild(e.to_string()))
}

struct PoolShared<T, V, E> {
    batch_id: Uuid,
    /// `None` once the batch has shut down.
    pool: RwLock<Option<ThreadPool>>,
    in_flight: AtomicUsize,
    done: Latch,
    work: Work<T, V, E>,
    callback: Option<SyncSink<V>>,
    metrics: MetricsRecorder,
}

impl<T, V, E> PoolShared<T, V, E>
where
    T: Send + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
{
    fn submitter(self: &Arc<Self>) -> Submitter<T> {
        let shared = Arc::clone(self);
        Submitter::new(move |task| shared.submit(task))
    }

    /// Count the task in, then hand it to the pool.
    fn submit(self: &Arc<Self>, task: T) -> BatchResult<()> {
        let pool = self.pool.read();
        let Some(pool) = pool.as_ref() else {
            return Err(BatchError::Closed);
        };

        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .map_err(|_| BatchError::Closed)?;
        self.metrics.record_submitted();
        let shared = Arc::clone(self);
        pool.spawn(move || shared.execute(task));
        Ok(())
    }

    fn execute(self: Arc<Self>, task: T) {
        let guard = InFlightGuard::job(&self);
        let submitter = self.submitter();

        match self.work.call(task, &submitter) {
            Ok(value) => {
                if let Some(callback) = &self.callback {
                    callback(value);
                }
                self.metrics.record_completed();
            }
            Err(e) => {
                self.metrics.record_failed();
                warn!(batch_id = %self.batch_id, error = %e, "task failed");
            }
        }

        guard.release();
    }
}

/// Decrements the in-flight counter exactly once, on release or on unwind.
///
/// A job guard also counts its pool thread as active for the peak metric.
struct InFlightGuard<'a, T, V, E> {
    shared: &'a PoolShared<T, V, E>,
    job: bool,
}

impl<'a, T, V, E> InFlightGuard<'a, T, V, E> {
    fn seeding(shared: &'a PoolShared<T, V, E>) -> Self {
        Self { shared, job: false }
    }

    fn job(shared: &'a PoolShared<T, V, E>) -> Self {
        shared.metrics.worker_started();
        Self { shared, job: true }
    }

    fn release(self) {
        drop(self);
    }
}

impl<T, V, E> Drop for InFlightGuard<'_, T, V, E> {
    fn drop(&mut self) {
        if self.job {
            if std::thread::panicking() {
                self.shared.metrics.record_failed();
            }
            self.shared.metrics.worker_stopped();
        }
        let previous = self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "in-flight counter underflow");
        if previous == 1 {
            self.shared.done.set();
        }
    }
}
