//! OrderSort: concurrent external sort engine
//!
//! Sorts record sets larger than memory. Producer threads push batches of fixed-width records;
//! a background coordinator sorts each batch, spills pairs of batches to disk as sorted runs and
//! merges runs of equal level as they appear, like carries in a binary counter. Finishing merges
//! whatever is left into a single sorted file that can be streamed back in order.
//!
//! ## Architecture
//! - Ingestion: bounded MPSC queue of owned batches with producer backpressure
//! - Coordinator: batch stager, run writer and level balancer on one thread
//! - Storage: raw record run files, job registry ordered by (level, newest first), two-way merge
//! - Finalizer: drains everything, forces merges until one run remains
//!
//! ## Records
//! Any `Copy` type that is plain old data ([`bytemuck::Pod`]) can be sorted. Run files hold
//! native-endian record images back to back, with no header.

pub mod config;
pub mod order;
pub mod sorter;
pub mod storage;

mod error;

pub use config::SorterConfig;
pub use error::{Result, SortError};
pub use order::{NaturalOrder, Order};
pub use sorter::{SortStats, Sorter};
pub use storage::{Record, RunHandle, RunReader, RunWriter};
