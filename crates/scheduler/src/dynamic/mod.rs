//! Dynamic-thread scheduler: one shared queue, workers started on demand.
//!
//! Split into focused submodules:
//! - `worker`: shared batch state, submission with capped worker growth, worker loop
//! - `tests`: completion, fan-out, cap and teardown behaviour
//!
//! Every push into the queue may start one more worker, up to the configured
//! cap. Workers poll the queue with a timeout and exit on a shutdown marker.
//! Failures of the work function or result callback are discarded: the task
//! still counts as done and the batch keeps going.

mod worker;
#[cfg(test)]
mod tests;

use std::fmt::Display;
use std::sync::Arc;

use fanout_core::{BatchConfig, BatchMetrics, BatchResult, SyncSink, Work};
use tracing::{info, warn};
use uuid::Uuid;

use self::worker::Shared;

/// Batch runner backed by a lazily grown set of OS threads.
pub struct ThreadBatch<V> {
    config: BatchConfig,
    callback: Option<SyncSink<V>>,
}

impl<V: Send + 'static> ThreadBatch<V> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    /// Invoke `f` with every successful work result. Called from worker threads.
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Run `tasks` (and everything they submit) to completion.
    ///
    /// Blocks until every admitted task has been marked done, then stops and
    /// joins all workers it started.
    pub fn run<T, E, I>(&self, work: Work<T, V, E>, tasks: I) -> BatchResult<BatchMetrics>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        I: IntoIterator<Item = T>,
    {
        let batch_id = Uuid::new_v4();
        let shared = Arc::new(Shared::new(
            batch_id,
            &self.config,
            work,
            self.callback.clone(),
        ));
        info!(
            %batch_id,
            backend = "dynamic",
            max_workers = shared.cap(),
            "batch starting"
        );

        let seeded = tasks.into_iter().try_for_each(|task| shared.submit(task));
        if let Err(e) = seeded {
            warn!(%batch_id, error = %e, "seeding failed; abandoning batch");
            shared.tracker().close();
            shared.shutdown();
            return Err(e);
        }

        shared.tracker().wait_idle_and_close();
        shared.shutdown();

        let metrics = shared.metrics().snapshot();
        info!(
            %batch_id,
            backend = "dynamic",
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
