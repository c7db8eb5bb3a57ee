//! Shared contract for the fan-out batch schedulers.
//!
//! Every backend consumes the same [`Work`]/[`AsyncWork`] shapes, hands out the
//! same [`Submitter`] capability, and reports a [`BatchMetrics`] summary.

pub mod config;
pub mod error;
pub mod metrics;
pub mod sync;
pub mod work;

pub use config::{default_max_workers, BatchConfig};
pub use error::{BatchError, BatchResult};
pub use metrics::{BatchMetrics, MetricsRecorder};
pub use sync::{Latch, PendingTracker};
pub use work::{
    panic_message, AsyncWork, Backend, FailurePolicy, ResultSink, Submitter, SyncSink, Work,
};
