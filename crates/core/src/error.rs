use thiserror::Error;

/// Result alias used across the schedulers.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors surfaced by a batch run or by a submit call.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("batch is closed; task was not accepted")]
    Closed,

    #[error("batch is cancelling ({reason}); task was not accepted")]
    Cancelled { reason: String },

    #[error("task failed: {message}")]
    TaskFailed { message: String },

    #[error("batch interrupted by caller")]
    Interrupted,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to build async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
