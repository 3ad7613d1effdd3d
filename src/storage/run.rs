//! Runs and the job registry
//!
//! A run is an immutable sorted file identified by `(run_id, level)`. Level 0 runs come straight
//! from two in-memory batches; a level k+1 run is the merge of two level k runs.
//!
//! ## Registry order
//! Entries are ordered by level ascending and, within a level, by run id descending: the newest
//! run of the lowest level sorts first. The balancer always looks at the first two entries.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Descriptor of a run file on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RunHandle {
    pub run_id: u64,
    pub level: u32,
}

impl RunHandle {
    pub fn new(run_id: u64, level: u32) -> Self {
        Self { run_id, level }
    }

    /// File name derived from `(run_id, level)`
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{}{}_{}.tmp", prefix, self.run_id, self.level)
    }
}

impl Ord for RunHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| other.run_id.cmp(&self.run_id))
    }
}

impl PartialOrd for RunHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Allocates run ids and maps handles to paths under the working directory
#[derive(Debug)]
pub struct RunDirectory {
    dir: PathBuf,
    prefix: String,
    next_run_id: u64,
}

impl RunDirectory {
    pub fn new(dir: PathBuf, prefix: String) -> Self {
        Self {
            dir,
            prefix,
            next_run_id: 0,
        }
    }

    /// Reserve a fresh, monotonically increasing run id at `level`
    pub fn allocate(&mut self, level: u32) -> RunHandle {
        let handle = RunHandle::new(self.next_run_id, level);
        self.next_run_id += 1;
        handle
    }

    pub fn path_of(&self, handle: &RunHandle) -> PathBuf {
        self.dir.join(handle.file_name(&self.prefix))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete a run file, ignoring files that are already gone
    pub fn remove(&self, handle: &RunHandle) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_of(handle)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Ordered set of pending runs driving merge decisions
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: BTreeSet<RunHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: RunHandle) {
        self.entries.insert(handle);
    }

    pub fn remove(&mut self, handle: &RunHandle) -> bool {
        self.entries.remove(handle)
    }

    /// The two entries with the smallest ordering key
    pub fn first_two(&self) -> Option<(RunHandle, RunHandle)> {
        let mut iter = self.entries.iter();
        match (iter.next(), iter.next()) {
            (Some(first), Some(second)) => Some((*first, *second)),
            _ => None,
        }
    }

    /// The first two entries, only when they share a level
    pub fn balance_candidate(&self) -> Option<(RunHandle, RunHandle)> {
        self.first_two()
            .filter(|(first, second)| first.level == second.level)
    }

    pub fn first(&self) -> Option<RunHandle> {
        self.entries.iter().next().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunHandle> {
        self.entries.iter()
    }

    pub fn drain(&mut self) -> Vec<RunHandle> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}
