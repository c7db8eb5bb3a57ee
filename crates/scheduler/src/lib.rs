//! Batch fan-out schedulers.
//!
//! Three interchangeable backends run a batch of tasks through one work
//! function, let running tasks submit more tasks into the same batch, and
//! return once the batch is quiescent:
//!
//! - [`ThreadBatch`]: OS threads started on demand up to a cap, failures discarded
//! - [`PoolBatch`]: a fixed rayon pool, failures logged
//! - [`TaskGroupBatch`]: one tokio task group, first failure cancels the rest

pub mod cooperative;
pub mod dynamic;
pub mod pool;

pub use cooperative::{GroupSignal, TaskGroupBatch};
pub use dynamic::ThreadBatch;
pub use pool::PoolBatch;

pub use fanout_core::{
    AsyncWork, Backend, BatchConfig, BatchError, BatchMetrics, BatchResult, FailurePolicy,
    Submitter, Work,
};
