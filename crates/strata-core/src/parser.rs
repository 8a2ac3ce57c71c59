//! The seam between the indexer and a language front-end.

use crate::error::Result;
use crate::facts::FileFacts;
use std::path::Path;

/// Extracts symbol and reference facts from a single source file.
///
/// Implementations must be deterministic: the same file content yields the
/// same facts in the same order. The indexer relies on that for stable ids.
pub trait SourceParser: Send + Sync {
    /// Returns true if this parser understands the file.
    fn supports(&self, path: &Path) -> bool;

    /// Extracts facts from the file at `path`.
    fn extract(&self, path: &Path) -> Result<FileFacts>;
}

impl<P: SourceParser + ?Sized> SourceParser for std::sync::Arc<P> {
    fn supports(&self, path: &Path) -> bool {
        (**self).supports(path)
    }

    fn extract(&self, path: &Path) -> Result<FileFacts> {
        (**self).extract(path)
    }
}
