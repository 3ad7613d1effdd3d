//! Sorter statistics

/// Counters published by the coordinator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Batches pulled from the ingestion queue and sorted
    pub batches_staged: u64,

    /// Records contained in staged batches
    pub records_staged: u64,

    /// Level 0 runs written (paired batches and unpaired batches at finalization)
    pub level0_runs: u64,

    /// Same-level merges performed by the balancer
    pub balance_merges: u64,

    /// Unconditional merges performed by the finalizer
    pub forced_merges: u64,

    /// Total bytes written to run files
    pub bytes_written: u64,

    /// Runs currently registered
    pub live_runs: usize,

    /// Largest number of registered runs observed after a balancing pass
    pub max_live_runs: usize,

    /// Highest run level produced so far
    pub max_level: u32,

    /// File operations that failed and were left for a retry
    pub failed_attempts: u64,
}
