//! Storage layer implementation
//!
//! Manages the run files the sorter spills to disk: the record codec, run naming and the
//! registry of pending runs, and the two-way merge between sorted sources.

pub mod codec;
pub mod merge;
pub mod run;

pub use codec::{record_count, Record, RunReader, RunWriter};
pub use merge::{merge_into, SliceSource, SortedSource};
pub use run::{JobRegistry, RunDirectory, RunHandle};
