mod cli;
mod config;
mod walk;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command, WalkArgs};

/// Log filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Command::Walk(walk) => run_walk(walk).await,
    }
}

async fn run_walk(args: WalkArgs) -> Result<()> {
    let config = config::resolve(&args)?;
    config.log_summary();
    info!(root = %args.root.display(), backend = %args.backend, "walking");

    let report = walk::walk(&args.root, args.backend, config)
        .await
        .with_context(|| format!("walk of {} failed", args.root.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} files, {} bytes in {} directories ({} backend, {} ms, {}/{} tasks failed)",
            report.root.display(),
            report.files,
            report.bytes,
            report.directories,
            report.backend,
            report.metrics.elapsed.as_millis(),
            report.metrics.failed,
            report.metrics.finished(),
        );
    }
    Ok(())
}
