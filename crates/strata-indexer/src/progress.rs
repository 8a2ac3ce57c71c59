//! Progress callbacks for long indexing runs.

use std::path::Path;

/// Receives per-file progress from the indexer.
///
/// All methods default to no-ops so reporters only implement what they show.
pub trait ProgressReporter: Send + Sync {
    /// The file set is known.
    fn files_discovered(&self, _total: usize) {}

    /// About to parse `path`, the `index`-th file (0-based).
    fn file_started(&self, _path: &Path, _index: usize) {}

    /// `processed` files are done, successfully or not.
    fn file_finished(&self, _processed: usize) {}
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}

impl<R: ProgressReporter + ?Sized> ProgressReporter for std::sync::Arc<R> {
    fn files_discovered(&self, total: usize) {
        (**self).files_discovered(total)
    }

    fn file_started(&self, path: &Path, index: usize) {
        (**self).file_started(path, index)
    }

    fn file_finished(&self, processed: usize) {
        (**self).file_finished(processed)
    }
}
