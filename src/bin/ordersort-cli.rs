//! OrderSort driver
//!
//! Generates random `(label, key)` records on several producer threads, sorts them by key
//! through a [`Sorter`] and checks (or prints) the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ordersort::storage::record_count;
use ordersort::{Sorter, SorterConfig};
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// 16-byte label with a 32-bit sort key
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Entry {
    label: [u8; 16],
    key: i32,
}

impl Entry {
    fn random(rng: &mut impl Rng) -> Self {
        let mut label = [0u8; 16];
        for byte in label.iter_mut() {
            *byte = rng.gen_range(b'a'..=b'z');
        }
        Self {
            label,
            key: rng.gen(),
        }
    }
}

fn by_key(a: &Entry, b: &Entry) -> bool {
    a.key < b.key
}

#[derive(Parser, Debug)]
#[command(version, about = "Sort random records with the ordersort engine")]
struct Args {
    /// Producer threads (also passed as the concurrency hint)
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Total number of records to generate
    #[arg(long, default_value_t = 1_000_000)]
    records: u64,

    /// Records per pushed batch
    #[arg(long, default_value_t = 100_000)]
    batch_size: usize,

    /// Directory for run files
    #[arg(long, default_value = "ordersort_tmp")]
    work_dir: PathBuf,

    /// Memory budget hint in bytes
    #[arg(long)]
    memory_budget: Option<u64>,

    /// JSON configuration file; command line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the record generator
    #[arg(long)]
    seed: Option<u64>,

    /// Print every sorted record instead of only verifying the order
    #[arg(long)]
    print: bool,

    /// Keep the final run file
    #[arg(long)]
    keep: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn setup_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.parse()?)
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(&args.log_level)?;

    if args.threads == 0 {
        bail!("--threads must be at least 1");
    }
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let mut config = match &args.config {
        Some(path) => SorterConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SorterConfig::default(),
    };
    config.work_dir = args.work_dir.clone();
    config.concurrency_hint = args.threads;
    if let Some(budget) = args.memory_budget {
        config.memory_budget = budget;
    }

    let mut sorter = Sorter::new(config, by_key as fn(&Entry, &Entry) -> bool)
        .context("starting sorter")?;
    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::info!(
        threads = args.threads,
        records = args.records,
        batch_size = args.batch_size,
        seed,
        "generating records"
    );

    let started = Instant::now();
    thread::scope(|s| -> Result<()> {
        let producers: Vec<_> = (0..args.threads)
            .map(|t| {
                let sorter = &sorter;
                let share = args.records / args.threads as u64
                    + u64::from((t as u64) < args.records % args.threads as u64);
                let batch_size = args.batch_size;
                s.spawn(move || -> ordersort::Result<()> {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                    let mut batch = Vec::with_capacity(batch_size);
                    for _ in 0..share {
                        batch.push(Entry::random(&mut rng));
                        if batch.len() == batch_size {
                            sorter.push(&batch)?;
                            batch.clear();
                        }
                    }
                    sorter.push(&batch)
                })
            })
            .collect();

        for producer in producers {
            match producer.join() {
                Ok(result) => result.context("pushing records")?,
                Err(_) => bail!("producer thread panicked"),
            }
        }
        Ok(())
    })?;
    let pushed = started.elapsed();

    let output = sorter.finish().context("finishing sort")?;
    let finished = started.elapsed();
    let stored = record_count::<Entry>(&output).context("inspecting final run")?;

    let mut previous: Option<i32> = None;
    let mut out_of_order = 0u64;
    let visited = sorter.execute(|entry| {
        if args.print {
            println!("{} {}", String::from_utf8_lossy(&entry.label), entry.key);
        }
        if previous.is_some_and(|p| p > entry.key) {
            out_of_order += 1;
        }
        previous = Some(entry.key);
    })?;

    let stats = sorter.stats();
    tracing::info!(
        visited,
        level0_runs = stats.level0_runs,
        balance_merges = stats.balance_merges,
        forced_merges = stats.forced_merges,
        max_live_runs = stats.max_live_runs,
        bytes_written = stats.bytes_written,
        push_ms = pushed.as_millis() as u64,
        total_ms = finished.as_millis() as u64,
        "done"
    );

    if !args.keep {
        std::fs::remove_file(&output)
            .with_context(|| format!("removing {}", output.display()))?;
    }

    if stored != args.records {
        bail!("final run holds {} records, expected {}", stored, args.records);
    }
    if visited != args.records {
        bail!("expected {} records, read back {}", args.records, visited);
    }
    if out_of_order > 0 {
        bail!("{} records out of order", out_of_order);
    }
    Ok(())
}
