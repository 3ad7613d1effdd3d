//! Sorter configuration
//!
//! All knobs of the engine live in [`SorterConfig`]. The concurrency and memory hints are
//! accepted and reported but do not bound batch sizing, merge fan-out or memory usage: batches
//! are sized by the producers and merges are always two-way on the coordinator thread.

use crate::{Result, SortError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sorter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    /// Number of producer threads the caller expects to run (inert)
    pub concurrency_hint: usize,

    /// Memory budget in bytes the caller is willing to spend (inert)
    pub memory_budget: u64,

    /// Directory holding the run files; created on construction
    pub work_dir: PathBuf,

    /// Prefix of every run file name
    pub file_prefix: String,

    /// Maximum number of batches waiting in the ingestion queue
    ///
    /// When the queue is full, `push` blocks until the coordinator catches up.
    pub queue_capacity: usize,

    /// Records buffered by run readers and writers before touching the file
    pub io_buffer_records: usize,

    /// Coordinator sleep when a tick made no progress (milliseconds)
    pub poll_interval_ms: u64,

    /// Producer wait slice while the ingestion queue is full (milliseconds)
    pub push_backoff_ms: u64,

    /// Finalizer delay before retrying a failed file operation (milliseconds)
    pub retry_backoff_ms: u64,

    /// fsync every completed run file
    pub sync_runs: bool,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            concurrency_hint: 4,
            memory_budget: 64 * 1024 * 1024, // 64MB
            work_dir: PathBuf::from("ordersort_tmp"),
            file_prefix: "B".to_string(),
            queue_capacity: 16,
            io_buffer_records: 4096,
            poll_interval_ms: 1,
            push_backoff_ms: 1,
            retry_backoff_ms: 10,
            sync_runs: false,
        }
    }
}

impl SorterConfig {
    /// Default configuration rooted at `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Configuration mirroring the `(threads, memory, directory)` constructor triple
    pub fn with_hints(
        concurrency_hint: usize,
        memory_budget: u64,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            concurrency_hint,
            memory_budget,
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Small buffers and a short queue, so tests exercise refills and backpressure
    pub fn for_testing(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            queue_capacity: 2,
            io_buffer_records: 7,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(SortError::InvalidArgument(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.io_buffer_records == 0 {
            return Err(SortError::InvalidArgument(
                "io_buffer_records must be at least 1".into(),
            ));
        }
        if self.file_prefix.contains(std::path::is_separator) {
            return Err(SortError::InvalidArgument(format!(
                "file_prefix {:?} must not contain a path separator",
                self.file_prefix
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_backoff(&self) -> Duration {
        Duration::from_millis(self.push_backoff_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
