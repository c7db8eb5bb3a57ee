use anyhow::{Context, Result};
use fanout_core::config::load_dotenv;
use fanout_core::BatchConfig;
use tracing::debug;

use crate::cli::WalkArgs;

/// Resolve the batch config for a walk.
/// Priority: flags > `FANOUT_*` env (and `.env`) > config file > defaults.
pub fn resolve(args: &WalkArgs) -> Result<BatchConfig> {
    load_dotenv();

    let mut config = match &args.config {
        Some(path) => {
            debug!(?path, "Loading config");
            BatchConfig::from_file(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?
        }
        None => BatchConfig::default(),
    };
    config
        .apply_env()
        .context("invalid FANOUT_* environment override")?;

    if let Some(n) = args.max_workers {
        config = config.with_max_workers(n);
    }
    if let Some(n) = args.concurrency_limit {
        config = config.with_concurrency_limit(Some(n));
    }
    Ok(config)
}
