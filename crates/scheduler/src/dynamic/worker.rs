use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use fanout_core::{
    panic_message, Backend, BatchConfig, BatchError, BatchResult, MetricsRecorder,
    PendingTracker, Submitter, SyncSink, Work,
};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Item carried by the shared queue.
pub(super) enum Message<T> {
    Task(T),
    /// Each worker that receives it puts it back so its siblings see it too.
    Shutdown,
}

/// State owned by one `run` call and shared with its workers.
pub(super) struct Shared<T, V, E> {
    batch_id: Uuid,
    tx: Sender<Message<T>>,
    rx: Receiver<Message<T>>,
    tracker: PendingTracker,
    /// Handles of started workers; its length is the live worker count.
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    cap: usize,
    poll_interval: Duration,
    thread_name_prefix: String,
    work: Work<T, V, E>,
    callback: Option<SyncSink<V>>,
    metrics: MetricsRecorder,
}

impl<T, V, E> Shared<T, V, E>
where
    T: Send + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
{
    pub(super) fn new(
        batch_id: Uuid,
        config: &BatchConfig,
        work: Work<T, V, E>,
        callback: Option<SyncSink<V>>,
    ) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            batch_id,
            tx,
            rx,
            tracker: PendingTracker::new(),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            cap: config.resolved_max_workers(),
            poll_interval: config.poll_interval(),
            thread_name_prefix: config.thread_name_prefix.clone(),
            work,
            callback,
            metrics: MetricsRecorder::new(Backend::Dynamic),
        }
    }

    pub(super) fn cap(&self) -> usize {
        self.cap
    }

    pub(super) fn tracker(&self) -> &PendingTracker {
        &self.tracker
    }

    pub(super) fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    fn submitter(self: &Arc<Self>) -> Submitter<T> {
        let shared = Arc::clone(self);
        Submitter::new(move |task| shared.submit(task))
    }

    /// Admit `task`, grow the worker set if below the cap, then enqueue.
    pub(super) fn submit(self: &Arc<Self>, task: T) -> BatchResult<()> {
        self.tracker.admit()?;
        if let Err(e) = self.ensure_worker() {
            self.tracker.complete();
            return Err(e);
        }
        self.metrics.record_submitted();
        if self.tx.send(Message::Task(task)).is_err() {
            // Unreachable while `self` holds the receiver.
            self.tracker.complete();
            return Err(BatchError::Closed);
        }
        Ok(())
    }

    /// Start exactly one worker if the live count is below the cap.
    fn ensure_worker(self: &Arc<Self>) -> BatchResult<()> {
        let mut workers = self.workers.lock();
        if workers.len() >= self.cap {
            return Ok(());
        }

        let index = workers.len();
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.thread_name_prefix, index))
            .spawn(move || shared.worker_loop(index));

        match spawned {
            Ok(handle) => {
                workers.push(handle);
                self.metrics.worker_started();
                Ok(())
            }
            Err(e) if workers.is_empty() => Err(BatchError::Spawn(e)),
            Err(e) => {
                // Existing workers will still drain the queue.
                warn!(batch_id = %self.batch_id, error = %e, live = workers.len(), "could not grow worker set");
                Ok(())
            }
        }
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        debug!(batch_id = %self.batch_id, worker = index, "worker started");
        let submitter = self.submitter();

        while self.running.load(Ordering::Acquire) {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(Message::Task(task)) => self.execute(task, &submitter),
                Ok(Message::Shutdown) => {
                    let _ = self.tx.send(Message::Shutdown);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.metrics.worker_stopped();
        debug!(batch_id = %self.batch_id, worker = index, "worker stopped");
    }

    /// Run one task. Any failure is discarded; the task is marked done regardless.
    fn execute(&self, task: T, submitter: &Submitter<T>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let value = self.work.call(task, submitter).map_err(|e| e.to_string())?;
            if let Some(callback) = &self.callback {
                callback(value);
            }
            Ok::<(), String>(())
        }));

        match outcome {
            Ok(Ok(())) => self.metrics.record_completed(),
            Ok(Err(error)) => {
                self.metrics.record_failed();
                debug!(batch_id = %self.batch_id, %error, "task failed; discarded");
            }
            Err(payload) => {
                self.metrics.record_failed();
                debug!(
                    batch_id = %self.batch_id,
                    panic = %panic_message(payload.as_ref()),
                    "task panicked; discarded"
                );
            }
        }

        self.tracker.complete();
    }

    /// Stop polling, drop residual items, release workers and join them.
    pub(super) fn shutdown(&self) {
        self.running.store(false, Ordering::Release);

        let residual = self.rx.try_iter().count();
        if residual > 0 {
            debug!(batch_id = %self.batch_id, residual, "dropped residual queue items");
        }
        let _ = self.tx.send(Message::Shutdown);

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!(batch_id = %self.batch_id, "worker thread panicked outside a task");
            }
        }
    }
}
