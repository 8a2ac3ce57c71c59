//! Per-repository indexing jobs.
//!
//! Each repository has at most one job slot. Queueing checks the slot and
//! installs a new job under a single lock on the job map, so of any number
//! of concurrent `queue_indexing` calls exactly one wins. The job itself runs
//! on the blocking pool; a small async task waits for it and folds the
//! outcome into the slot.

use crate::config::RepositoryConfig;
use crate::error::{Result, ServiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use strata_core::SourceParser;
use strata_graph::{
    FileError, IndexedRepository, IndexingStats, RepositoryId, SnapshotId, SnapshotStatus,
    SnapshotStore,
};
use strata_indexer::{source_metadata, CancellationSignal, Indexer, ProgressReporter};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Progress of the latest job of one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub repository: RepositoryId,
    pub snapshot_id: SnapshotId,
    pub status: SnapshotStatus,
    /// The file being parsed right now. Only set while running.
    pub current_file: Option<String>,
    /// Unknown until enumeration has finished.
    pub files_discovered: Option<usize>,
    pub files_processed: usize,
    /// 0 to 100.
    pub percent_complete: f64,
    pub files_indexed: usize,
    pub symbols_indexed: usize,
    pub references_indexed: usize,
    /// First file start to last file end. Zero until the job has ended.
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
    pub partial_success: bool,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// Status derived from a stored record alone, with no live progress.
    pub fn from_record(record: &IndexedRepository) -> Self {
        Self {
            repository: record.repository.clone(),
            snapshot_id: record.snapshot_id,
            status: record.status,
            current_file: None,
            files_discovered: None,
            files_processed: record.files_attempted,
            percent_complete: 0.0,
            files_indexed: record.files_indexed,
            symbols_indexed: record.symbols_indexed,
            references_indexed: record.references_indexed,
            duration_ms: record.duration_ms,
            errors: record.errors.clone(),
            partial_success: record.partial_success,
            failure: record.failure.clone(),
            created_at: record.created_at,
            finished_at: record.finished_at,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    fn with_progress(mut self, progress: &JobProgress) -> Self {
        let discovered = progress.discovered();
        let processed = progress.processed();
        self.files_discovered = discovered;
        self.files_processed = processed;
        self.percent_complete = match discovered {
            Some(total) if total > 0 => processed as f64 * 100.0 / total as f64,
            _ => 0.0,
        };
        if self.is_active() {
            self.current_file = progress.current_file();
        }
        self
    }
}

/// Live counters fed by the indexer.
#[derive(Debug, Default)]
struct JobProgress {
    known: AtomicBool,
    discovered: AtomicUsize,
    processed: AtomicUsize,
    current: Mutex<Option<String>>,
}

impl JobProgress {
    fn discovered(&self) -> Option<usize> {
        self.known
            .load(Ordering::Acquire)
            .then(|| self.discovered.load(Ordering::Acquire))
    }

    fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    fn current_file(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressReporter for JobProgress {
    fn files_discovered(&self, total: usize) {
        self.discovered.store(total, Ordering::Release);
        self.known.store(true, Ordering::Release);
    }

    fn file_started(&self, path: &Path, _index: usize) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(path.display().to_string());
    }

    fn file_finished(&self, processed: usize) {
        self.processed.store(processed, Ordering::Release);
    }
}

/// The latest job of one repository.
struct JobSlot {
    snapshot_id: SnapshotId,
    created_at: DateTime<Utc>,
    cancel: CancellationSignal,
    progress: Arc<JobProgress>,
    /// Set once the job has ended.
    terminal: Option<JobStatus>,
    done: watch::Receiver<bool>,
}

impl JobSlot {
    fn is_active(&self) -> bool {
        self.terminal.is_none()
    }
}

type JobMap = Arc<Mutex<HashMap<RepositoryId, JobSlot>>>;

fn lock(jobs: &JobMap) -> MutexGuard<'_, HashMap<RepositoryId, JobSlot>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Schedules, tracks and cancels indexing jobs.
pub struct JobOrchestrator {
    indexer: Arc<Indexer<Arc<dyn SourceParser>>>,
    store: Arc<SnapshotStore>,
    repositories: RwLock<HashMap<RepositoryId, RepositoryConfig>>,
    jobs: JobMap,
}

impl JobOrchestrator {
    pub fn new(
        parser: Arc<dyn SourceParser>,
        store: Arc<SnapshotStore>,
        repositories: impl IntoIterator<Item = RepositoryConfig>,
    ) -> Self {
        let repositories = repositories
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        Self {
            indexer: Arc::new(Indexer::new(parser, Arc::clone(&store))),
            store,
            repositories: RwLock::new(repositories),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Adds or replaces a repository registration.
    pub fn register(&self, repository: RepositoryConfig) {
        debug!(repository = %repository.id, root = %repository.root.display(), "registered");
        self.repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository.id.clone(), repository);
    }

    pub fn repository(&self, id: &str) -> Option<RepositoryConfig> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Whether the parser would index `path`.
    pub fn supports(&self, path: &Path) -> bool {
        self.indexer.parser().supports(path)
    }

    /// Registered repositories, sorted by id.
    pub fn repositories(&self) -> Vec<RepositoryConfig> {
        let mut all: Vec<_> = self
            .repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Starts indexing a repository in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn queue_indexing(&self, repository: &str) -> Result<SnapshotId> {
        let config = self.repository(repository).ok_or_else(|| {
            ServiceError::NotFound(format!("repository {} is not registered", repository))
        })?;

        let (snapshot_id, cancel, progress, done) = {
            let mut jobs = lock(&self.jobs);
            if let Some(slot) = jobs.get(repository).filter(|s| s.is_active()) {
                return Err(ServiceError::AlreadyRunning {
                    repository: repository.to_string(),
                    snapshot_id: slot.snapshot_id,
                });
            }

            let snapshot_id = self.store.create(repository, source_metadata(&config.root))?;
            let (done, done_rx) = watch::channel(false);
            let slot = JobSlot {
                snapshot_id,
                created_at: Utc::now(),
                cancel: CancellationSignal::new(),
                progress: Arc::new(JobProgress::default()),
                terminal: None,
                done: done_rx,
            };
            let handles = (snapshot_id, slot.cancel.clone(), Arc::clone(&slot.progress), done);
            jobs.insert(repository.to_string(), slot);
            handles
        };

        info!(%repository, snapshot = %snapshot_id, "Queued indexing job");

        let indexer = Arc::clone(&self.indexer);
        let store = Arc::clone(&self.store);
        let jobs = Arc::clone(&self.jobs);
        let repository = repository.to_string();
        tokio::spawn(async move {
            let task_progress = Arc::clone(&progress);
            let task = tokio::task::spawn_blocking(move || {
                indexer.run(
                    snapshot_id,
                    &config.root,
                    config.scope,
                    &cancel,
                    task_progress.as_ref(),
                )
            });

            let failure = match task.await {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => {
                    error!(%repository, snapshot = %snapshot_id, "Indexing task died: {}", e);
                    Some(format!("indexing task died: {}", e))
                }
            };
            if let Some(message) = &failure {
                seal_abandoned(&store, snapshot_id, message);
            }

            let terminal = match store.get(snapshot_id) {
                Ok(record) => JobStatus::from_record(&record),
                Err(e) => {
                    warn!(snapshot = %snapshot_id, "Job record unavailable: {}", e);
                    let mut status = JobStatus::from_record(&IndexedRepository::new(
                        snapshot_id,
                        repository.clone(),
                        Default::default(),
                    ));
                    status.status = SnapshotStatus::Failed;
                    status.failure = failure.or_else(|| Some(e.to_string()));
                    status.finished_at = Some(Utc::now());
                    status
                }
            }
            .with_progress(&progress);

            info!(
                %repository,
                snapshot = %snapshot_id,
                status = %terminal.status,
                "Job finished"
            );
            if let Some(slot) = lock(&jobs)
                .get_mut(&repository)
                .filter(|s| s.snapshot_id == snapshot_id)
            {
                slot.terminal = Some(terminal);
            }
            let _ = done.send(true);
        });

        Ok(snapshot_id)
    }

    /// Live status of the current job, else the last job's terminal status,
    /// else the newest stored record.
    pub fn get_job_status(&self, repository: &str) -> Option<JobStatus> {
        {
            let jobs = lock(&self.jobs);
            if let Some(slot) = jobs.get(repository) {
                if let Some(terminal) = &slot.terminal {
                    return Some(terminal.clone());
                }
                return Some(self.live_status(repository, slot));
            }
        }
        self.store
            .latest_record(repository)
            .map(|record| JobStatus::from_record(&record))
    }

    /// Raises the cancellation signal of an active job.
    ///
    /// Returns false when nothing is queued or running. Does not wait for
    /// the job to stop.
    pub fn cancel_job(&self, repository: &str) -> bool {
        let jobs = lock(&self.jobs);
        match jobs.get(repository).filter(|s| s.is_active()) {
            Some(slot) => {
                info!(%repository, snapshot = %slot.snapshot_id, "Cancelling job");
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Waits until the repository's current job ends.
    pub async fn wait(&self, repository: &str) -> Option<JobStatus> {
        let done = lock(&self.jobs).get(repository).map(|s| s.done.clone());
        if let Some(mut done) = done {
            if done.wait_for(|finished| *finished).await.is_err() {
                warn!(%repository, "Job ended without reporting");
            }
        }
        self.get_job_status(repository)
    }

    fn live_status(&self, repository: &str, slot: &JobSlot) -> JobStatus {
        let record = self.store.get(slot.snapshot_id).unwrap_or_else(|_| {
            IndexedRepository::new(slot.snapshot_id, repository.to_string(), Default::default())
        });
        let mut status = JobStatus::from_record(&record);
        status.created_at = slot.created_at;
        status.with_progress(&slot.progress)
    }
}

/// Seals a snapshot the indexer gave up on without sealing.
fn seal_abandoned(store: &SnapshotStore, id: SnapshotId, message: &str) {
    let Ok(record) = store.get(id) else {
        return;
    };
    if record.status.is_terminal() {
        return;
    }
    let stats = IndexingStats {
        failure: Some(message.to_string()),
        ..IndexingStats::default()
    };
    if let Err(e) = store.seal(id, SnapshotStatus::Failed, stats) {
        warn!(snapshot = %id, "could not seal abandoned snapshot: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Condvar;
    use std::time::Duration;
    use strata_core::{FileFacts, Location, SymbolKind};
    use strata_graph::SnapshotSource;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        changed: Condvar,
    }

    impl Gate {
        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.changed.notify_all();
        }

        fn pass(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.changed.wait(open).unwrap();
            }
        }
    }

    /// One module per `.py` file. Parsing the file named `held` blocks until
    /// the gate opens.
    struct GatedParser {
        held: &'static str,
        gate: Arc<Gate>,
    }

    impl SourceParser for GatedParser {
        fn supports(&self, path: &Path) -> bool {
            path.extension().is_some_and(|e| e == "py")
        }

        fn extract(&self, path: &Path) -> strata_core::Result<FileFacts> {
            let stem = path.file_stem().unwrap().to_string_lossy().to_string();
            if stem == self.held {
                self.gate.pass();
            }
            let mut facts = FileFacts::new("python");
            facts.push_symbol(
                stem.clone(),
                stem,
                SymbolKind::Module,
                Location::new(path.to_string_lossy(), 1, 0),
                None,
            );
            Ok(facts)
        }
    }

    fn repo(files: usize) -> TempDir {
        let dir = tempdir().unwrap();
        for i in 0..files {
            fs::write(dir.path().join(format!("f{}.py", i)), "").unwrap();
        }
        dir
    }

    fn orchestrator(dir: &TempDir, held: &'static str) -> (JobOrchestrator, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        let parser: Arc<dyn SourceParser> = Arc::new(GatedParser {
            held,
            gate: Arc::clone(&gate),
        });
        let orchestrator = JobOrchestrator::new(
            parser,
            Arc::new(SnapshotStore::new()),
            [RepositoryConfig::new("web", dir.path())],
        );
        (orchestrator, gate)
    }

    async fn until(
        orchestrator: &JobOrchestrator,
        check: impl Fn(&JobStatus) -> bool,
    ) -> JobStatus {
        for _ in 0..500 {
            if let Some(status) = orchestrator.get_job_status("web") {
                if check(&status) {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached the expected state");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queueing_has_one_winner() {
        let dir = repo(3);
        let (orchestrator, gate) = orchestrator(&dir, "f0");
        let orchestrator = Arc::new(orchestrator);

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.queue_indexing("web") })
            })
            .collect();
        let mut outcomes = Vec::new();
        for call in calls {
            outcomes.push(call.await.unwrap());
        }

        let winners: Vec<SnapshotId> = outcomes.iter().filter_map(|o| o.clone().ok()).collect();
        assert_eq!(winners.len(), 1);
        for outcome in &outcomes {
            if let Err(e) = outcome {
                assert_eq!(
                    *e,
                    ServiceError::AlreadyRunning {
                        repository: "web".into(),
                        snapshot_id: winners[0],
                    }
                );
            }
        }

        gate.open();
        let done = orchestrator.wait("web").await.unwrap();
        assert_eq!(done.snapshot_id, winners[0]);
        assert_eq!(done.status, SnapshotStatus::Completed);

        let next = orchestrator.queue_indexing("web").unwrap();
        assert!(next > winners[0]);
        orchestrator.wait("web").await;
    }

    #[tokio::test]
    async fn test_live_progress_then_terminal() {
        let dir = repo(3);
        let (orchestrator, gate) = orchestrator(&dir, "f1");
        let id = orchestrator.queue_indexing("web").unwrap();

        let live = until(&orchestrator, |s| {
            s.current_file.as_deref().is_some_and(|f| f.ends_with("f1.py"))
        })
        .await;
        assert_eq!(live.snapshot_id, id);
        assert_eq!(live.status, SnapshotStatus::Running);
        assert_eq!(live.files_discovered, Some(3));
        assert_eq!(live.files_processed, 1);
        assert!((live.percent_complete - 100.0 / 3.0).abs() < 1e-9);

        gate.open();
        let done = orchestrator.wait("web").await.unwrap();
        assert_eq!(done.status, SnapshotStatus::Completed);
        assert_eq!(done.files_indexed, 3);
        assert_eq!(done.percent_complete, 100.0);
        assert_eq!(done.current_file, None);
        assert!(orchestrator.store().latest_sealed("web").is_some());
    }

    #[tokio::test]
    async fn test_cancel_drops_file_in_flight() {
        let dir = repo(10);
        let (orchestrator, gate) = orchestrator(&dir, "f3");
        assert!(!orchestrator.cancel_job("web"));

        orchestrator.queue_indexing("web").unwrap();
        until(&orchestrator, |s| {
            s.current_file.as_deref().is_some_and(|f| f.ends_with("f3.py"))
        })
        .await;
        assert!(orchestrator.cancel_job("web"));
        gate.open();

        let done = orchestrator.wait("web").await.unwrap();
        assert_eq!(done.status, SnapshotStatus::Cancelled);
        assert_eq!(done.files_indexed, 3);
        assert!(orchestrator.store().latest_sealed("web").is_none());
        assert!(!orchestrator.cancel_job("web"));
    }

    #[tokio::test]
    async fn test_unregistered_repository() {
        let dir = repo(1);
        let (orchestrator, _gate) = orchestrator(&dir, "none");
        assert!(matches!(
            orchestrator.queue_indexing("api"),
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(orchestrator.get_job_status("api"), None);
        assert_eq!(orchestrator.wait("api").await, None);
    }

    #[tokio::test]
    async fn test_status_falls_back_to_stored_record() {
        let dir = repo(1);
        let (orchestrator, _gate) = orchestrator(&dir, "none");
        let store = orchestrator.store();
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();
        store.mark_running(id).unwrap();
        store
            .seal(id, SnapshotStatus::Failed, IndexingStats::default())
            .unwrap();

        let status = orchestrator.get_job_status("web").unwrap();
        assert_eq!(status.snapshot_id, id);
        assert_eq!(status.status, SnapshotStatus::Failed);
        assert_eq!(status.percent_complete, 0.0);
    }

    #[tokio::test]
    async fn test_missing_root_fails_the_job() {
        let dir = repo(1);
        let (orchestrator, _gate) = orchestrator(&dir, "none");
        orchestrator.register(RepositoryConfig::new("gone", dir.path().join("missing")));

        orchestrator.queue_indexing("gone").unwrap();
        let done = orchestrator.wait("gone").await.unwrap();
        assert_eq!(done.status, SnapshotStatus::Failed);
        assert!(done.failure.is_some());
    }
}
