//! Error types for the ordersort engine

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SortError>;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A run file ends in the middle of a record.
    #[error("Corrupted run file {path:?}: {trailing} trailing bytes")]
    Corruption { path: PathBuf, trailing: usize },

    #[error("Sorter is closed: no more records can be pushed")]
    Closed,

    #[error("Sorter has already been finished")]
    AlreadyFinished,

    #[error("Sorter has not been finished yet")]
    NotFinished,

    #[error("Coordinator thread panicked")]
    CoordinatorPanicked,
}

impl From<serde_json::Error> for SortError {
    fn from(err: serde_json::Error) -> Self {
        SortError::Config(err.to_string())
    }
}
