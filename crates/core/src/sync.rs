//! Blocking completion primitives shared by the thread backends.

use parking_lot::{Condvar, Mutex};

use crate::error::{BatchError, BatchResult};

/// One-shot completion event. Once set it stays set.
#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch. Returns `true` only for the call that actually fired it.
    pub fn set(&self) -> bool {
        let mut set = self.set.lock();
        if *set {
            return false;
        }
        *set = true;
        self.cond.notify_all();
        true
    }

    /// Block until the latch fires.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.cond.wait(&mut set);
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    pending: usize,
    closed: bool,
}

/// Count of admitted-but-unfinished tasks with a closable admission gate.
///
/// Admission and closing happen under the same lock, so a task is either
/// admitted before the batch observes quiescence (and the batch waits for it)
/// or rejected with [`BatchError::Closed`].
#[derive(Debug, Default)]
pub struct PendingTracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more outstanding task.
    pub fn admit(&self) -> BatchResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BatchError::Closed);
        }
        state.pending += 1;
        Ok(())
    }

    /// Mark one outstanding task done. Wakes waiters when the count reaches zero.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.pending > 0, "complete() without matching admit()");
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until nothing is outstanding, then refuse further admissions.
    pub fn wait_idle_and_close(&self) {
        let mut state = self.state.lock();
        while state.pending > 0 {
            self.idle.wait(&mut state);
        }
        state.closed = true;
    }

    /// Refuse further admissions without waiting.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }
}
