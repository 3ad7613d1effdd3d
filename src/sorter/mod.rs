//! External sorter
//!
//! ## Lifecycle
//! 1. [`Sorter::new`] prepares the working directory and starts the coordinator thread
//! 2. Any number of threads call [`Sorter::push`] concurrently
//! 3. [`Sorter::finish`] stops the coordinator and merges everything into one run
//! 4. [`Sorter::execute`] (or [`Sorter::iter`]) streams the sorted result, as often as needed
//!
//! `push` takes `&self` and `finish` takes `&mut self`, so the borrow checker guarantees that all
//! producers are done before finalization starts.
//!
//! ## Example
//! ```no_run
//! use ordersort::{Sorter, SorterConfig};
//!
//! let mut sorter = Sorter::new(SorterConfig::new("/tmp/ordersort"), |a: &u64, b: &u64| a < b)?;
//! sorter.push(&[3, 1, 2])?;
//! sorter.finish()?;
//! sorter.execute(|r| println!("{}", r))?;
//! # Ok::<(), ordersort::SortError>(())
//! ```

mod coordinator;
pub mod queue;
pub mod stats;

pub use queue::Batch;
pub use stats::SortStats;

use crate::config::SorterConfig;
use crate::order::{NaturalOrder, Order};
use crate::storage::{Record, RunReader};
use crate::{Result, SortError};
use coordinator::Coordinator;
use parking_lot::Mutex;
use queue::{ingestion_queue, BatchSender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Concurrent external sorter over fixed-size records
pub struct Sorter<T: Record, O: Order<T> = NaturalOrder> {
    config: SorterConfig,
    sender: BatchSender<T>,

    /// Set by `finish` (or drop) to stop the coordinator loop
    shutdown: Arc<AtomicBool>,

    /// `None` once the coordinator has been joined
    coordinator: Option<JoinHandle<Coordinator<T, O>>>,

    stats: Arc<Mutex<SortStats>>,

    /// Path of the final run, set by `finish`
    output: Option<PathBuf>,

    /// The coordinator thread panicked; its runs are unrecoverable
    poisoned: bool,
}

impl<T: Record, O: Order<T>> Sorter<T, O> {
    /// Create a sorter and start its coordinator
    pub fn new(config: SorterConfig, order: O) -> Result<Self> {
        if std::mem::size_of::<T>() == 0 {
            return Err(SortError::InvalidArgument(
                "zero-sized records cannot be sorted".into(),
            ));
        }
        config.validate()?;
        std::fs::create_dir_all(&config.work_dir)?;

        let (sender, receiver) = ingestion_queue(config.queue_capacity, config.push_backoff());
        let stats = Arc::new(Mutex::new(SortStats::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let coordinator = Coordinator::new(receiver, order, &config, stats.clone());
        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("ordersort-coordinator".into())
            .spawn(move || coordinator.run(&flag))?;

        tracing::info!(
            work_dir = ?config.work_dir,
            record_size = std::mem::size_of::<T>(),
            concurrency_hint = config.concurrency_hint,
            memory_budget = config.memory_budget,
            "sorter started"
        );

        Ok(Self {
            config,
            sender,
            shutdown,
            coordinator: Some(handle),
            stats,
            output: None,
            poisoned: false,
        })
    }

    /// Create a sorter from the `(concurrency, memory, directory)` triple
    ///
    /// The concurrency and memory hints are recorded but do not change behavior.
    pub fn with_hints(
        concurrency_hint: usize,
        memory_budget: u64,
        work_dir: impl Into<PathBuf>,
        order: O,
    ) -> Result<Self> {
        Self::new(
            SorterConfig::with_hints(concurrency_hint, memory_budget, work_dir),
            order,
        )
    }

    /// Submit a batch of records
    ///
    /// The records are copied before returning; blocks while the ingestion queue is full.
    /// An empty slice is a no-op.
    pub fn push(&self, records: &[T]) -> Result<()> {
        if self.output.is_some() || self.coordinator.is_none() {
            return Err(SortError::Closed);
        }
        if records.is_empty() {
            return Ok(());
        }
        self.sender.send(Batch::copy_from(records))
    }

    /// Stop accepting records and merge everything into a single sorted run
    ///
    /// Returns the path of the final run. Blocks until finalization is complete.
    pub fn finish(&mut self) -> Result<PathBuf> {
        if self.poisoned {
            return Err(SortError::CoordinatorPanicked);
        }
        let handle = self.coordinator.take().ok_or(SortError::AlreadyFinished)?;

        self.shutdown.store(true, Ordering::Release);
        let coordinator = match handle.join() {
            Ok(coordinator) => coordinator,
            Err(_) => {
                tracing::error!(
                    work_dir = ?self.config.work_dir,
                    "coordinator thread panicked, its run files are left behind"
                );
                self.poisoned = true;
                return Err(SortError::CoordinatorPanicked);
            }
        };

        let path = coordinator.finalize();
        let stats = self.stats();
        tracing::info!(
            path = ?path,
            records = stats.records_staged,
            level0_runs = stats.level0_runs,
            max_level = stats.max_level,
            "sort finished"
        );

        self.output = Some(path.clone());
        Ok(path)
    }

    /// Call `f` on every record of the final run, in order
    ///
    /// Returns the number of records visited. Failing to open or read the final run is logged
    /// and ends the stream early; use [`Sorter::iter`] to observe such errors.
    pub fn execute<F>(&self, mut f: F) -> Result<u64>
    where
        F: FnMut(&T),
    {
        let path = self.output.as_ref().ok_or(SortError::NotFinished)?;

        let mut reader = match RunReader::<T>::open(path, self.config.io_buffer_records) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "failed to open final run");
                return Ok(0);
            }
        };

        loop {
            match reader.next_record() {
                Ok(Some(record)) => f(&record),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        path = ?reader.path(),
                        error = %e,
                        visited = reader.records_read(),
                        "failed to read final run"
                    );
                    break;
                }
            }
        }
        Ok(reader.records_read())
    }

    /// Reader over the final run
    pub fn iter(&self) -> Result<RunReader<T>> {
        let path = self.output.as_ref().ok_or(SortError::NotFinished)?;
        RunReader::open(path, self.config.io_buffer_records)
    }

    /// Snapshot of the coordinator counters
    pub fn stats(&self) -> SortStats {
        self.stats.lock().clone()
    }

    /// Path of the final run once `finish` has returned
    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }
}

#[cfg(test)]
impl<T: Record, O: Order<T>> Sorter<T, O> {
    fn coordinator_exited(&self) -> bool {
        self.coordinator.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl<T: Record, O: Order<T>> Drop for Sorter<T, O> {
    fn drop(&mut self) {
        // An unfinished sorter removes the runs it spilled; a finished one keeps its output
        if let Some(handle) = self.coordinator.take() {
            self.shutdown.store(true, Ordering::Release);
            match handle.join() {
                Ok(coordinator) => coordinator.discard(),
                Err(_) => tracing::error!("coordinator thread panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Item {
        key: u32,
        seq: u32,
    }

    fn by_key(a: &Item, b: &Item) -> bool {
        a.key < b.key
    }

    type ItemSorter = Sorter<Item, fn(&Item, &Item) -> bool>;

    fn item_sorter(dir: &Path) -> ItemSorter {
        Sorter::new(SorterConfig::for_testing(dir), by_key as fn(&Item, &Item) -> bool).unwrap()
    }

    fn collect(sorter: &ItemSorter) -> Vec<Item> {
        let mut out = Vec::new();
        sorter.execute(|r| out.push(*r)).unwrap();
        out
    }

    fn wait_until(sorter: &ItemSorter, done: impl Fn(&SortStats) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(&sorter.stats()) {
            assert!(Instant::now() < deadline, "coordinator made no progress");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn run_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_concurrent_producers_permutation_and_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());

        let pushed: Vec<Vec<Item>> = thread::scope(|s| {
            let workers: Vec<_> = (0..4u32)
                .map(|p| {
                    let sorter = &sorter;
                    s.spawn(move || {
                        let mut rng = StdRng::seed_from_u64(p as u64);
                        let mut mine = Vec::new();
                        for b in 0..25u32 {
                            let batch: Vec<Item> = (0..100u32)
                                .map(|i| Item {
                                    key: rng.gen_range(0..5000),
                                    seq: p * 1_000_000 + b * 1000 + i,
                                })
                                .collect();
                            sorter.push(&batch).unwrap();
                            mine.extend(batch);
                        }
                        mine
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        sorter.finish().unwrap();
        let output = collect(&sorter);

        assert_eq!(output.len(), 10_000);
        assert!(output.windows(2).all(|w| !by_key(&w[1], &w[0])));

        let mut expected: Vec<Item> = pushed.into_iter().flatten().collect();
        expected.sort_unstable_by_key(|r| r.seq);
        let mut actual = output;
        actual.sort_unstable_by_key(|r| r.seq);
        assert_eq!(actual, expected);

        // Only the final run is left in the working directory
        assert_eq!(run_files(temp_dir.path()).len(), 1);
        assert_eq!(sorter.stats().records_staged, 10_000);
    }

    #[test]
    fn test_equal_keys_are_not_kept_in_push_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());

        sorter.push(&[Item { key: 7, seq: 0 }]).unwrap();
        sorter.push(&[Item { key: 7, seq: 1 }]).unwrap();
        wait_until(&sorter, |s| s.level0_runs == 1);
        sorter.finish().unwrap();

        let seqs: Vec<u32> = collect(&sorter).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 0]);
    }

    #[test]
    fn test_finish_without_records() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());
        sorter.push(&[]).unwrap();

        let path = sorter.finish().unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        let mut calls = 0;
        assert_eq!(sorter.execute(|_| calls += 1).unwrap(), 0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_single_batch_is_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());

        let batch: Vec<Item> = [5u32, 2, 9, 1, 7]
            .iter()
            .enumerate()
            .map(|(i, &key)| Item { key, seq: i as u32 })
            .collect();
        sorter.push(&batch).unwrap();
        sorter.finish().unwrap();

        let keys: Vec<u32> = collect(&sorter).iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 2, 5, 7, 9]);
    }

    #[test]
    fn test_odd_batch_count() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());

        let mut rng = StdRng::seed_from_u64(42);
        let mut seq = 0u32;
        for size in [100usize, 100, 50] {
            let batch: Vec<Item> = (0..size)
                .map(|_| {
                    seq += 1;
                    Item { key: rng.gen(), seq }
                })
                .collect();
            sorter.push(&batch).unwrap();
        }
        sorter.finish().unwrap();

        let output = collect(&sorter);
        assert_eq!(output.len(), 250);
        assert!(output.windows(2).all(|w| w[0].key <= w[1].key));
    }

    #[test]
    fn test_live_runs_stay_logarithmic() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());

        let batches = 64u32;
        for b in 0..batches {
            let batch: Vec<Item> = (0..16u32)
                .map(|i| Item {
                    key: (b * 7919 + i * 104_729) % 1000,
                    seq: b * 16 + i,
                })
                .collect();
            sorter.push(&batch).unwrap();
        }
        wait_until(&sorter, |s| {
            s.level0_runs == u64::from(batches / 2) && s.live_runs == 1
        });

        let stats = sorter.stats();
        let bound = (stats.level0_runs as u32).ilog2() as usize + 1;
        assert!(
            stats.max_live_runs <= bound,
            "{} live runs for {} level 0 runs",
            stats.max_live_runs,
            stats.level0_runs
        );
        // 32 level 0 runs carry into a single level 5 run
        assert_eq!(stats.live_runs, 1);
        assert_eq!(stats.max_level, 5);

        sorter.finish().unwrap();
        assert_eq!(collect(&sorter).len(), 1024);
    }

    #[test]
    fn test_custom_descending_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter: Sorter<i64, _> = Sorter::new(
            SorterConfig::for_testing(temp_dir.path()),
            |a: &i64, b: &i64| a > b,
        )
        .unwrap();

        sorter.push(&[3, -1, 8]).unwrap();
        sorter.push(&[0, 8, 5]).unwrap();
        sorter.push(&[-4]).unwrap();
        sorter.finish().unwrap();

        let output: Vec<i64> = sorter.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(output, vec![8, 8, 5, 3, 0, -1, -4]);
    }

    #[test]
    fn test_natural_order_with_hints() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter: Sorter<u16> =
            Sorter::with_hints(8, 1 << 20, temp_dir.path(), NaturalOrder).unwrap();
        assert_eq!(sorter.config().concurrency_hint, 8);

        sorter.push(&[40, 10, 30, 20]).unwrap();
        sorter.finish().unwrap();

        let mut output = Vec::new();
        assert_eq!(sorter.execute(|r| output.push(*r)).unwrap(), 4);
        assert_eq!(output, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_lifecycle_errors() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());

        assert!(matches!(sorter.execute(|_| {}), Err(SortError::NotFinished)));
        assert!(matches!(sorter.iter(), Err(SortError::NotFinished)));
        assert!(sorter.output_path().is_none());

        sorter.push(&[Item { key: 1, seq: 0 }]).unwrap();
        let path = sorter.finish().unwrap();
        assert_eq!(sorter.output_path(), Some(path.as_path()));

        assert!(matches!(
            sorter.push(&[Item { key: 2, seq: 1 }]),
            Err(SortError::Closed)
        ));
        assert!(matches!(sorter.finish(), Err(SortError::AlreadyFinished)));

        // The result can be consumed repeatedly
        assert_eq!(collect(&sorter).len(), 1);
        assert_eq!(collect(&sorter).len(), 1);
    }

    #[test]
    fn test_execute_on_missing_output_visits_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter = item_sorter(temp_dir.path());
        sorter.push(&[Item { key: 1, seq: 0 }]).unwrap();
        let path = sorter.finish().unwrap();

        std::fs::remove_file(&path).unwrap();
        assert_eq!(sorter.execute(|_| panic!("no records expected")).unwrap(), 0);
        assert!(matches!(sorter.iter(), Err(SortError::Io(_))));
    }

    #[test]
    fn test_drop_unfinished_removes_runs() {
        let temp_dir = TempDir::new().unwrap();
        {
            let sorter = item_sorter(temp_dir.path());
            for b in 0..6u32 {
                sorter.push(&[Item { key: b, seq: b }]).unwrap();
            }
            wait_until(&sorter, |s| s.level0_runs == 3);
        }
        assert!(run_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_drop_finished_keeps_output() {
        let temp_dir = TempDir::new().unwrap();
        let path = {
            let mut sorter = item_sorter(temp_dir.path());
            sorter.push(&[Item { key: 1, seq: 0 }]).unwrap();
            sorter.finish().unwrap()
        };
        assert!(path.exists());
    }

    #[test]
    fn test_panicked_coordinator_is_reported_on_every_finish() {
        let temp_dir = TempDir::new().unwrap();
        let mut sorter: Sorter<u32, _> = Sorter::new(
            SorterConfig::for_testing(temp_dir.path()),
            |a: &u32, b: &u32| {
                assert!(*a != 13 && *b != 13, "13 has no place in this order");
                a < b
            },
        )
        .unwrap();

        sorter.push(&[4, 13, 1]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !sorter.coordinator_exited() {
            assert!(Instant::now() < deadline, "coordinator did not stop");
            thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(sorter.finish(), Err(SortError::CoordinatorPanicked)));
        assert!(matches!(sorter.finish(), Err(SortError::CoordinatorPanicked)));
        assert!(matches!(sorter.push(&[1]), Err(SortError::Closed)));
        assert!(matches!(sorter.execute(|_| {}), Err(SortError::NotFinished)));
    }

    #[test]
    fn test_rejects_zero_sized_records() {
        let temp_dir = TempDir::new().unwrap();
        let result = Sorter::<(), _>::new(
            SorterConfig::for_testing(temp_dir.path()),
            |_: &(), _: &()| false,
        );
        assert!(matches!(result, Err(SortError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = SorterConfig::for_testing(temp_dir.path());
        config.queue_capacity = 0;
        assert!(matches!(
            ItemSorter::new(config, by_key as fn(&Item, &Item) -> bool),
            Err(SortError::InvalidArgument(_))
        ));
    }
}
