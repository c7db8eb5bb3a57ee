use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};

/// Upper bound for the hardware-derived worker default.
pub const MAX_DEFAULT_WORKERS: usize = 32;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> BatchResult<Option<T>> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BatchError::Config(format!("{key}: cannot parse {raw:?}"))),
        None => Ok(None),
    }
}

/// Worker count used whenever none (or 0) is configured:
/// `min(32, available_parallelism + 4)`.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    MAX_DEFAULT_WORKERS.min(cpus + 4)
}

/// Batch configuration, typically parsed from TOML and overridden by env.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker cap (Dynamic-Thread) or pool size (Fixed-Pool). 0 = hardware default.
    #[serde(default)]
    pub max_workers: usize,
    /// How long an idle dynamic worker blocks on the queue before re-checking shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cooperative permit count. None = unbounded, Some(0) = hardware default.
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    /// Prefix for worker thread names.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_poll_interval_ms() -> u64 { 1000 }
fn default_thread_name_prefix() -> String { "fanout-worker".to_string() }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            poll_interval_ms: default_poll_interval_ms(),
            concurrency_limit: None,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl BatchConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> BatchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BatchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    /// Parse TOML text.
    pub fn from_toml(raw: &str) -> BatchResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `FANOUT_*` environment variables (call `load_dotenv()` first).
    pub fn from_env() -> BatchResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `FANOUT_*` overrides on top of the current values.
    pub fn apply_env(&mut self) -> BatchResult<()> {
        if let Some(n) = env_parse("FANOUT_MAX_WORKERS")? {
            self.max_workers = n;
        }
        if let Some(ms) = env_parse("FANOUT_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = ms;
        }
        if let Some(n) = env_parse("FANOUT_CONCURRENCY_LIMIT")? {
            self.concurrency_limit = Some(n);
        }
        if let Some(prefix) = env_opt("FANOUT_THREAD_NAME_PREFIX") {
            self.thread_name_prefix = prefix;
        }
        self.validate()
    }

    fn validate(&self) -> BatchResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(BatchError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(BatchError::Config("thread_name_prefix must not be empty".into()));
        }
        Ok(())
    }

    /// Builder-style override of the worker cap.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builder-style override of the cooperative permit count.
    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Builder-style override of the dynamic worker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    /// Resolve worker count (0 means hardware default).
    pub fn resolved_max_workers(&self) -> usize {
        if self.max_workers == 0 {
            default_max_workers()
        } else {
            self.max_workers
        }
    }

    /// Resolve cooperative permits. `None` means unbounded.
    pub fn resolved_concurrency_limit(&self) -> Option<usize> {
        match self.concurrency_limit {
            Some(0) => Some(default_max_workers()),
            other => other,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Print a one-line summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            max_workers = self.resolved_max_workers(),
            poll_interval_ms = self.poll_interval_ms,
            concurrency_limit = ?self.resolved_concurrency_limit(),
            thread_name_prefix = %self.thread_name_prefix,
            "batch config loaded"
        );
    }
}
