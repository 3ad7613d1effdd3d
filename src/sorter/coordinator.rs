//! Coordinator: the single background task of a sorter
//!
//! ## Pipeline (one tick)
//! 1. **Stage**: pull at most one batch from the ingestion queue, sort it, append it to the
//!    waiting room
//! 2. **Write**: when the waiting room holds two batches, merge them into a new level 0 run
//! 3. **Balance**: while the two first registry entries share a level, merge them into one run
//!    of the next level (binary-counter carry)
//! 4. Sleep for the poll interval when the tick made no progress
//!
//! ## Ownership
//! The coordinator value is moved into its thread and handed back by `join`. The waiting room and
//! the job registry are plain fields: exactly one thread owns them at any time.
//!
//! ## Failures
//! Every file a step needs is opened before its inputs leave the waiting room or the registry.
//! A failed step logs, deletes any partial output and leaves its inputs in place for the next
//! tick. Nothing is reported to producers.

use super::queue::{Batch, BatchReceiver};
use super::stats::SortStats;
use crate::config::SorterConfig;
use crate::order::Order;
use crate::storage::codec::byte_len;
use crate::storage::{
    merge_into, JobRegistry, Record, RunDirectory, RunHandle, RunReader, RunWriter, SliceSource,
};
use crate::{Result, SortError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub(crate) struct Coordinator<T: Record, O: Order<T>> {
    queue: BatchReceiver<T>,
    order: O,

    /// Sorted batches waiting for a partner (FIFO)
    waiting_room: VecDeque<Batch<T>>,

    /// Pending runs on disk
    registry: JobRegistry,
    runs: RunDirectory,

    io_buffer_records: usize,
    sync_runs: bool,
    poll_interval: Duration,
    retry_backoff: Duration,

    stats: Arc<Mutex<SortStats>>,
}

impl<T: Record, O: Order<T>> Coordinator<T, O> {
    pub fn new(
        queue: BatchReceiver<T>,
        order: O,
        config: &SorterConfig,
        stats: Arc<Mutex<SortStats>>,
    ) -> Self {
        Self {
            queue,
            order,
            waiting_room: VecDeque::new(),
            registry: JobRegistry::new(),
            runs: RunDirectory::new(config.work_dir.clone(), config.file_prefix.clone()),
            io_buffer_records: config.io_buffer_records,
            sync_runs: config.sync_runs,
            poll_interval: config.poll_interval(),
            retry_backoff: config.retry_backoff(),
            stats,
        }
    }

    /// Coordinator loop; returns itself once `shutdown` is observed
    pub fn run(mut self, shutdown: &AtomicBool) -> Self {
        tracing::debug!(dir = ?self.runs.dir(), "coordinator started");

        while !shutdown.load(Ordering::Acquire) {
            if !self.tick() {
                thread::sleep(self.poll_interval);
            }
        }

        tracing::debug!(
            queued = self.queue.len(),
            waiting = self.waiting_room.len(),
            runs = self.registry.len(),
            "coordinator stopped"
        );
        self
    }

    /// One pass of stage, write and balance. Returns whether anything happened.
    pub fn tick(&mut self) -> bool {
        let staged = self.stage_one();
        let wrote = self.write_pair();
        let merged = self.balance();
        staged || wrote || merged > 0
    }

    /// Batch Stager: sort one ready batch into the waiting room
    fn stage_one(&mut self) -> bool {
        match self.queue.try_next() {
            Some(batch) => {
                self.stage(batch);
                true
            }
            None => false,
        }
    }

    fn stage(&mut self, mut batch: Batch<T>) {
        batch.sort(&self.order);

        let mut stats = self.stats.lock();
        stats.batches_staged += 1;
        stats.records_staged += batch.len() as u64;
        drop(stats);

        self.waiting_room.push_back(batch);
    }

    /// Run Writer: merge the two oldest waiting batches into a level 0 run
    fn write_pair(&mut self) -> bool {
        if self.waiting_room.len() < 2 {
            return false;
        }

        let handle = self.runs.allocate(0);
        let result = self.merge_batches(&self.waiting_room[0], &self.waiting_room[1], &handle);
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                self.abandon(&handle, &e, "pairing batches");
                return false;
            }
        };

        // Both buffers are released here
        self.waiting_room.pop_front();
        self.waiting_room.pop_front();
        self.registry.insert(handle);

        tracing::debug!(run_id = handle.run_id, records, "wrote level 0 run");
        let mut stats = self.stats.lock();
        stats.level0_runs += 1;
        stats.bytes_written += byte_len::<T>(records);
        stats.live_runs = self.registry.len();
        true
    }

    /// Level Balancer: merge same-level pairs until the two first entries differ in level
    ///
    /// Yields on the first failure, leaving both entries registered.
    fn balance(&mut self) -> usize {
        let mut merges = 0;

        while let Some((first, second)) = self.registry.balance_candidate() {
            let target = self.runs.allocate(first.level + 1);
            match self.merge_runs(&first, &second, &target) {
                Ok(records) => {
                    self.commit_merge(&first, &second, target, records);
                    self.stats.lock().balance_merges += 1;
                    merges += 1;
                }
                Err(e) => {
                    self.abandon(&target, &e, "balancing runs");
                    break;
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.live_runs = self.registry.len();
        stats.max_live_runs = stats.max_live_runs.max(self.registry.len());
        merges
    }

    /// Finalizer: drain all pending work and collapse every run into one
    ///
    /// Failed file operations are retried after `retry_backoff` until they succeed.
    pub fn finalize(mut self) -> PathBuf {
        while let Some(batch) = self.queue.try_next() {
            self.stage(batch);
        }

        // Unpaired batches become level 0 runs of their own
        while !self.waiting_room.is_empty() {
            let handle = self.runs.allocate(0);
            match self.write_batch(self.waiting_room[0].as_slice(), &handle) {
                Ok(records) => {
                    self.waiting_room.pop_front();
                    self.registry.insert(handle);
                    tracing::debug!(run_id = handle.run_id, records, "wrote unpaired batch");
                    let mut stats = self.stats.lock();
                    stats.level0_runs += 1;
                    stats.bytes_written += byte_len::<T>(records);
                }
                Err(e) => self.retry_later(&handle, &e, "writing unpaired batch"),
            }
        }

        // Merge the two first entries whatever their levels
        while let Some((first, second)) = self.registry.first_two() {
            let level = if first.level == second.level {
                first.level + 1
            } else {
                first.level.max(second.level)
            };
            let target = self.runs.allocate(level);
            tracing::debug!(
                first = %first.file_name(""),
                second = %second.file_name(""),
                level,
                "forced merge"
            );

            match self.merge_runs(&first, &second, &target) {
                Ok(records) => {
                    self.commit_merge(&first, &second, target, records);
                    self.stats.lock().forced_merges += 1;
                }
                Err(e) => self.retry_later(&target, &e, "forced merge"),
            }
        }

        let final_run = match self.registry.first() {
            Some(handle) => handle,
            None => self.write_empty_run(),
        };

        self.stats.lock().live_runs = self.registry.len();
        let path = self.runs.path_of(&final_run);
        tracing::info!(path = ?path, level = final_run.level, "sort finalized");
        path
    }

    /// Drop all pending work and delete every registered run file
    pub fn discard(mut self) {
        self.waiting_room.clear();
        for handle in self.registry.drain() {
            if let Err(e) = self.runs.remove(&handle) {
                tracing::warn!(
                    path = ?self.runs.path_of(&handle),
                    error = %e,
                    "failed to remove run"
                );
            }
        }
        self.stats.lock().live_runs = 0;
    }

    fn write_empty_run(&mut self) -> RunHandle {
        loop {
            let handle = self.runs.allocate(0);
            match self.write_batch(&[], &handle) {
                Ok(_) => {
                    self.registry.insert(handle);
                    self.stats.lock().level0_runs += 1;
                    return handle;
                }
                Err(e) => self.retry_later(&handle, &e, "writing empty run"),
            }
        }
    }

    fn merge_batches(
        &self,
        left: &Batch<T>,
        right: &Batch<T>,
        target: &RunHandle,
    ) -> Result<u64> {
        let mut out = RunWriter::create(
            self.runs.path_of(target),
            self.io_buffer_records,
            self.sync_runs,
        )?;
        merge_into(
            &mut SliceSource::new(left.as_slice()),
            &mut SliceSource::new(right.as_slice()),
            &mut out,
            &self.order,
        )?;
        out.finish()
    }

    fn write_batch(&self, records: &[T], target: &RunHandle) -> Result<u64> {
        let mut out = RunWriter::create(
            self.runs.path_of(target),
            self.io_buffer_records,
            self.sync_runs,
        )?;
        out.write_slice(records)?;
        out.finish()
    }

    fn merge_runs(
        &self,
        first: &RunHandle,
        second: &RunHandle,
        target: &RunHandle,
    ) -> Result<u64> {
        let mut left = RunReader::open(self.runs.path_of(first), self.io_buffer_records)?;
        let mut right = RunReader::open(self.runs.path_of(second), self.io_buffer_records)?;
        let mut out = RunWriter::create(
            self.runs.path_of(target),
            self.io_buffer_records,
            self.sync_runs,
        )?;
        merge_into(&mut left, &mut right, &mut out, &self.order)?;
        out.finish()
    }

    /// Replace two merged runs by their output in the registry and on disk
    fn commit_merge(
        &mut self,
        first: &RunHandle,
        second: &RunHandle,
        target: RunHandle,
        records: u64,
    ) {
        self.registry.remove(first);
        self.registry.remove(second);
        for source in [first, second] {
            if let Err(e) = self.runs.remove(source) {
                tracing::warn!(
                    path = ?self.runs.path_of(source),
                    error = %e,
                    "failed to remove merged run"
                );
            }
        }
        self.registry.insert(target);

        tracing::debug!(
            run_id = target.run_id,
            level = target.level,
            records,
            "merged runs {} and {}",
            first.run_id,
            second.run_id
        );
        let mut stats = self.stats.lock();
        stats.bytes_written += byte_len::<T>(records);
        stats.max_level = stats.max_level.max(target.level);
        stats.live_runs = self.registry.len();
    }

    /// Log a failed step and delete its partial output
    fn abandon(&mut self, target: &RunHandle, error: &SortError, step: &str) {
        tracing::warn!(
            path = ?self.runs.path_of(target),
            error = %error,
            "{} failed, will retry",
            step
        );
        if let Err(e) = self.runs.remove(target) {
            tracing::warn!(
                path = ?self.runs.path_of(target),
                error = %e,
                "failed to remove partial run"
            );
        }
        self.stats.lock().failed_attempts += 1;
    }

    fn retry_later(&mut self, target: &RunHandle, error: &SortError, step: &str) {
        self.abandon(target, error, step);
        thread::sleep(self.retry_backoff);
    }
}

#[cfg(test)]
impl<T: Record, O: Order<T>> Coordinator<T, O> {
    fn waiting(&self) -> usize {
        self.waiting_room.len()
    }

    fn registered(&self) -> Vec<RunHandle> {
        self.registry.iter().copied().collect()
    }

    fn path_of(&self, handle: &RunHandle) -> PathBuf {
        self.runs.path_of(handle)
    }

    /// Write `records` (already sorted) as a run at `level` and register it
    fn register_run(&mut self, level: u32, records: &[T]) -> RunHandle {
        let handle = self.runs.allocate(level);
        self.write_batch(records, &handle).unwrap();
        self.registry.insert(handle);
        handle
    }
}
