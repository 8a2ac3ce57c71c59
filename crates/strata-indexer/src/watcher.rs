//! Debounced change notification for registered repositories.
//!
//! Events inside one debounce window are collected, filtered, deduplicated
//! and delivered as a single sorted batch. The watcher only reports; what
//! to do about a batch (usually re-queue the repository) is up to the
//! caller.

use crate::error::Result;
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directories whose churn never warrants a re-index.
const IGNORED_COMPONENTS: &[&str] = &[".git", "target", "node_modules", "__pycache__", ".strata"];

/// Watches one directory tree until dropped.
pub struct RepositoryWatcher {
    root: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl RepositoryWatcher {
    /// Starts watching `root` recursively.
    ///
    /// `accept` decides which changed paths matter; `on_change` receives
    /// every non-empty batch of accepted paths.
    pub fn new<A, F>(root: &Path, debounce: Duration, accept: A, mut on_change: F) -> Result<Self>
    where
        A: Fn(&Path) -> bool + Send + 'static,
        F: FnMut(Vec<PathBuf>) + Send + 'static,
    {
        let handler = move |result: DebounceEventResult| match result {
            Ok(events) => {
                let batch = dirty_paths(events.into_iter().map(|e| e.path), &accept);
                if !batch.is_empty() {
                    debug!("{} paths changed", batch.len());
                    on_change(batch);
                }
            }
            Err(error) => warn!("Watcher error: {:?}", error),
        };

        let mut debouncer = new_debouncer(debounce, handler)?;
        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
        debug!("Watching {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            _debouncer: debouncer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => IGNORED_COMPONENTS.iter().any(|i| name == *i),
        _ => false,
    })
}

/// Filters, deduplicates and sorts a window of changed paths.
fn dirty_paths<I, A>(paths: I, accept: &A) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
    A: Fn(&Path) -> bool,
{
    paths
        .into_iter()
        .filter(|p| !is_ignored(p) && accept(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_paths_sorted_and_filtered() {
        let accept = |p: &Path| p.extension().is_some_and(|e| e == "rs");
        let batch = dirty_paths(
            vec![
                PathBuf::from("/repo/src/b.rs"),
                PathBuf::from("/repo/src/a.rs"),
                PathBuf::from("/repo/src/b.rs"),
                PathBuf::from("/repo/target/debug/build.rs"),
                PathBuf::from("/repo/README.md"),
            ],
            &accept,
        );
        assert_eq!(
            batch,
            vec![PathBuf::from("/repo/src/a.rs"), PathBuf::from("/repo/src/b.rs")]
        );
    }

    #[test]
    fn test_watcher_starts_on_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let watcher =
            RepositoryWatcher::new(dir.path(), Duration::from_millis(50), |_| true, |_| {})
                .unwrap();
        assert_eq!(watcher.root(), dir.path());
    }
}
