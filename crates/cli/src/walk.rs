//! Recursive directory walk driven by one of the schedulers.
//!
//! Every directory is one task: it lists its entries, submits each
//! subdirectory back into the batch, and yields the file count and byte
//! total of its own regular files. Symlinks are not followed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fanout_core::{AsyncWork, Backend, BatchConfig, BatchMetrics, Submitter, Work};
use fanout_scheduler::{PoolBatch, TaskGroupBatch, ThreadBatch};
use serde::Serialize;
use tracing::debug;

/// Totals contributed by a single directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Outcome of a whole walk.
#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub root: PathBuf,
    pub backend: Backend,
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    pub metrics: BatchMetrics,
}

#[derive(Default)]
struct Totals {
    directories: AtomicU64,
    files: AtomicU64,
    bytes: AtomicU64,
}

impl Totals {
    fn add(&self, summary: DirSummary) {
        self.directories.fetch_add(1, Ordering::Relaxed);
        self.files.fetch_add(summary.files, Ordering::Relaxed);
        self.bytes.fetch_add(summary.bytes, Ordering::Relaxed);
    }
}

fn scan_dir(dir: PathBuf, submit: &Submitter<PathBuf>) -> io::Result<DirSummary> {
    let mut summary = DirSummary::default();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            submit
                .submit(entry.path())
                .map_err(io::Error::other)?;
        } else if file_type.is_file() {
            summary.files += 1;
            summary.bytes += entry.metadata()?.len();
        }
    }
    debug!(dir = %dir.display(), files = summary.files, "scanned");
    Ok(summary)
}

async fn scan_dir_async(dir: PathBuf, submit: Submitter<PathBuf>) -> io::Result<DirSummary> {
    let mut summary = DirSummary::default();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            submit
                .submit(entry.path())
                .map_err(io::Error::other)?;
        } else if file_type.is_file() {
            summary.files += 1;
            summary.bytes += entry.metadata().await?.len();
        }
    }
    debug!(dir = %dir.display(), files = summary.files, "scanned");
    Ok(summary)
}

/// Walk `root` on `backend` and total what it finds.
///
/// Thread-based backends run on the blocking pool so the caller's runtime
/// stays responsive.
pub async fn walk(root: &Path, backend: Backend, config: BatchConfig) -> Result<WalkReport> {
    if !root.is_dir() {
        bail!("not a directory: {}", root.display());
    }
    let totals = Arc::new(Totals::default());
    let sink = {
        let totals = Arc::clone(&totals);
        move |summary: DirSummary| totals.add(summary)
    };
    let tasks = vec![root.to_path_buf()];

    let metrics = match backend {
        Backend::Dynamic => {
            let batch = ThreadBatch::new(config).on_result(sink);
            tokio::task::spawn_blocking(move || batch.run(Work::with_submit(scan_dir), tasks))
                .await
                .context("walk thread panicked")??
        }
        Backend::Pool => {
            let batch = PoolBatch::new(config).on_result(sink);
            tokio::task::spawn_blocking(move || batch.run(Work::with_submit(scan_dir), tasks))
                .await
                .context("walk thread panicked")??
        }
        Backend::Cooperative => {
            TaskGroupBatch::new(config)
                .on_result(sink)
                .run(AsyncWork::with_submit(scan_dir_async), tasks)
                .await?
        }
    };

    Ok(WalkReport {
        root: root.to_path_buf(),
        backend,
        directories: totals.directories.load(Ordering::Relaxed),
        files: totals.files.load(Ordering::Relaxed),
        bytes: totals.bytes.load(Ordering::Relaxed),
        metrics,
    })
}
