//! Error types for indexing runs.

use std::path::PathBuf;
use strata_graph::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// A failure that ends an indexing run. Per-file parse failures are not
/// errors; they are recorded on the snapshot.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("watch error: {0}")]
    Watch(#[from] notify_debouncer_mini::notify::Error),
}
