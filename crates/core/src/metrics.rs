use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::work::Backend;

/// Summary of one finished batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMetrics {
    pub backend: Backend,
    /// Tasks accepted into the batch (initial and recursively submitted).
    pub submitted: usize,
    /// Tasks whose work function and callback both returned normally.
    pub completed: usize,
    /// Tasks whose work function or callback failed.
    pub failed: usize,
    /// Most workers active at once: live threads, busy pool threads, or
    /// children inside the work function, depending on the backend.
    pub peak_workers: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl BatchMetrics {
    /// Tasks that ran to an outcome, successful or not.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Lock-free counters updated by workers while a batch runs.
#[derive(Debug)]
pub struct MetricsRecorder {
    backend: Backend,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    live_workers: AtomicUsize,
    peak_workers: AtomicUsize,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl MetricsRecorder {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
            peak_workers: AtomicUsize::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker came alive; updates the peak.
    pub fn worker_started(&self) {
        let live = self.live_workers.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_workers.fetch_max(live, Ordering::AcqRel);
    }

    pub fn worker_stopped(&self) {
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> BatchMetrics {
        BatchMetrics {
            backend: self.backend,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            peak_workers: self.peak_workers.load(Ordering::Acquire),
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
        }
    }
}
