use std::fmt;

use fanout_core::{BatchError, BatchResult};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Why a group stops before reaching quiescence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSignal {
    /// A child's work function or result callback failed.
    Failed(String),
    /// The caller asked the batch to stop.
    Interrupted,
}

impl fmt::Display for GroupSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(message) => write!(f, "child failed: {message}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl From<GroupSignal> for BatchError {
    fn from(signal: GroupSignal) -> Self {
        match signal {
            GroupSignal::Failed(message) => BatchError::TaskFailed { message },
            GroupSignal::Interrupted => BatchError::Interrupted,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Open,
    Cancelling(String),
    Closed,
}

/// Entry point for recursive submissions into a running group.
///
/// Submissions are forwarded to the group controller, which registers them as
/// children. Once the group starts unwinding every submission is refused.
pub(super) struct Intake<T> {
    tx: UnboundedSender<T>,
    phase: Mutex<Phase>,
}

impl<T> Intake<T> {
    pub(super) fn new(tx: UnboundedSender<T>) -> Self {
        Self {
            tx,
            phase: Mutex::new(Phase::Open),
        }
    }

    pub(super) fn submit(&self, task: T) -> BatchResult<()> {
        match &*self.phase.lock() {
            Phase::Open => self.tx.send(task).map_err(|_| BatchError::Closed),
            Phase::Cancelling(reason) => Err(BatchError::Cancelled {
                reason: reason.clone(),
            }),
            Phase::Closed => Err(BatchError::Closed),
        }
    }

    pub(super) fn begin_cancel(&self, signal: &GroupSignal) {
        *self.phase.lock() = Phase::Cancelling(signal.to_string());
    }

    pub(super) fn close(&self) {
        *self.phase.lock() = Phase::Closed;
    }
}
