use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fanout_core::Backend;

/// Fan a batch of tasks out over a choice of schedulers.
#[derive(Parser, Debug)]
#[command(name = "fanout", about = "Batch fan-out over threads, a pool, or async tasks")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Total the files and bytes under a directory, one task per directory.
    Walk(WalkArgs),
}

#[derive(Args, Debug)]
pub struct WalkArgs {
    /// Directory to walk
    pub root: PathBuf,

    /// Scheduler backend: dynamic, pool, or cooperative
    #[arg(long, default_value = "dynamic")]
    pub backend: Backend,

    /// Worker cap (dynamic) or pool size (pool); 0 picks a hardware default
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Maximum directories listed at once (cooperative)
    #[arg(long)]
    pub concurrency_limit: Option<usize>,

    /// Path to a TOML batch config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}
