//! Re-queues registered repositories when their sources change.
//!
//! A change re-indexes the whole repository into a new snapshot. Changes
//! that arrive while a job is in flight are dropped; the running job may or
//! may not see them.

use crate::error::ServiceError;
use crate::orchestrator::JobOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use strata_indexer::{RepositoryWatcher, Result};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Starts one watcher per registered repository. Watching stops when the
/// returned watchers are dropped.
///
/// Must be called from within a tokio runtime.
pub fn watch_repositories(
    orchestrator: &Arc<JobOrchestrator>,
    debounce: Duration,
) -> Result<Vec<RepositoryWatcher>> {
    let runtime = Handle::current();
    let mut watchers = Vec::new();

    for repository in orchestrator.repositories() {
        let accept = {
            let orchestrator = Arc::clone(orchestrator);
            move |path: &std::path::Path| orchestrator.supports(path)
        };
        let on_change = {
            let orchestrator = Arc::clone(orchestrator);
            let runtime = runtime.clone();
            let id = repository.id.clone();
            move |paths: Vec<std::path::PathBuf>| {
                let _guard = runtime.enter();
                requeue(&orchestrator, &id, paths.len());
            }
        };

        watchers.push(RepositoryWatcher::new(
            &repository.root,
            debounce,
            accept,
            on_change,
        )?);
        info!(repository = %repository.id, "Watching {}", repository.root.display());
    }
    Ok(watchers)
}

fn requeue(orchestrator: &JobOrchestrator, repository: &str, changed: usize) {
    match orchestrator.queue_indexing(repository) {
        Ok(snapshot) => info!(
            %repository,
            snapshot = %snapshot,
            "{} files changed, re-indexing",
            changed
        ),
        Err(ServiceError::AlreadyRunning { snapshot_id, .. }) => debug!(
            %repository,
            running = %snapshot_id,
            "Change ignored, job already in progress"
        ),
        Err(e) => warn!(%repository, "Could not re-queue: {}", e),
    }
}
