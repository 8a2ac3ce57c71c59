//! Versioned snapshot store.
//!
//! Unsealed snapshots live in a writer map and are only touched by the
//! indexer that owns them. Sealing moves a snapshot into the sealed map as
//! an `Arc<Snapshot>`; from then on readers clone the `Arc` and never lock
//! while they work. The per-repository "latest" pointer is swapped only
//! after a Completed seal has fully finished.

use crate::archive::SnapshotArchive;
use crate::snapshot::{
    FactBatch, IndexedRepository, IndexingStats, RepositoryId, Snapshot, SnapshotId,
    SnapshotSource, SnapshotStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use strata_core::{EdgeId, NodeId};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A batch that would break referential integrity. Nothing from it is applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataIntegrityError {
    #[error("edge {edge} references missing node {node}")]
    DanglingEdge { edge: EdgeId, node: NodeId },

    #[error("node {node} has missing parent {parent}")]
    DanglingParent { node: NodeId, parent: NodeId },

    #[error("occurrence in {file} references missing node {node}")]
    DanglingOccurrence { node: NodeId, file: String },

    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    #[error("duplicate edge id {0}")]
    DuplicateEdge(EdgeId),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("snapshot {0} not found")]
    UnknownSnapshot(SnapshotId),

    #[error("snapshot {0} is sealed")]
    Sealed(SnapshotId),

    #[error("snapshot {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SnapshotId,
        from: SnapshotStatus,
        to: SnapshotStatus,
    },

    #[error("repository {repository} already has running snapshot {running}")]
    AlreadyRunning {
        repository: RepositoryId,
        running: SnapshotId,
    },

    #[error("integrity violation: {0}")]
    Integrity(#[from] DataIntegrityError),

    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Default)]
struct SealedState {
    snapshots: HashMap<SnapshotId, Arc<Snapshot>>,
    latest: HashMap<RepositoryId, SnapshotId>,
}

/// In-memory snapshot store with optional write-through archive.
pub struct SnapshotStore {
    open: Mutex<HashMap<SnapshotId, Snapshot>>,
    sealed: RwLock<SealedState>,
    archive: Option<SnapshotArchive>,
    next_id: AtomicU64,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Creates a store that keeps everything in memory.
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
            sealed: RwLock::new(SealedState::default()),
            archive: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a store that writes Completed snapshots through to `archive`.
    ///
    /// Snapshot ids continue above every id handed out before, archived or not.
    pub fn with_archive(archive: SnapshotArchive) -> Result<Self, StoreError> {
        let next = archive.next_snapshot_id()?.0;
        Ok(Self {
            open: Mutex::new(HashMap::new()),
            sealed: RwLock::new(SealedState::default()),
            archive: Some(archive),
            next_id: AtomicU64::new(next),
        })
    }

    fn open_map(&self) -> MutexGuard<'_, HashMap<SnapshotId, Snapshot>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_sealed(&self) -> std::sync::RwLockReadGuard<'_, SealedState> {
        self.sealed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sealed(&self) -> std::sync::RwLockWriteGuard<'_, SealedState> {
        self.sealed.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reloads the promoted snapshot of every archived repository.
    ///
    /// Returns how many snapshots were restored.
    pub fn restore(&self) -> Result<usize, StoreError> {
        let Some(archive) = &self.archive else {
            return Ok(0);
        };

        let mut restored = 0;
        for (repository, id) in archive.latest()? {
            let Some(snapshot) = archive.load(id)? else {
                warn!(%repository, snapshot = %id, "latest pointer without snapshot, skipping");
                continue;
            };
            let mut sealed = self.write_sealed();
            sealed.snapshots.insert(id, Arc::new(snapshot));
            sealed.latest.insert(repository, id);
            restored += 1;
        }

        if restored > 0 {
            info!("Restored {} snapshots from archive", restored);
        }
        Ok(restored)
    }

    /// Allocates a new Queued snapshot.
    ///
    /// With an archive the id is reserved durably before it is returned.
    pub fn create(
        &self,
        repository: &str,
        source: SnapshotSource,
    ) -> Result<SnapshotId, StoreError> {
        let id = SnapshotId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(archive) = &self.archive {
            archive.reserve(id)?;
        }
        let record = IndexedRepository::new(id, repository.to_string(), source);
        self.open_map().insert(id, Snapshot::new(record));
        debug!(%repository, snapshot = %id, "created snapshot");
        Ok(id)
    }

    /// Queued → Running. Refused while another snapshot of the same
    /// repository is running.
    pub fn mark_running(&self, id: SnapshotId) -> Result<(), StoreError> {
        let mut open = self.open_map();

        let (repository, status) = match open.get(&id) {
            Some(s) => (s.record.repository.clone(), s.record.status),
            None => return Err(self.missing(id)),
        };
        if !status.can_transition_to(SnapshotStatus::Running) {
            return Err(StoreError::InvalidTransition {
                id,
                from: status,
                to: SnapshotStatus::Running,
            });
        }
        if let Some(running) = open.values().find(|s| {
            s.record.repository == repository && s.record.status == SnapshotStatus::Running
        }) {
            return Err(StoreError::AlreadyRunning {
                repository,
                running: running.id(),
            });
        }

        if let Some(snapshot) = open.get_mut(&id) {
            snapshot.record.status = SnapshotStatus::Running;
        }
        Ok(())
    }

    /// Bulk-writes facts into an unsealed snapshot.
    ///
    /// The batch is validated in full before anything is applied.
    pub fn append_facts(&self, id: SnapshotId, batch: FactBatch) -> Result<(), StoreError> {
        let mut open = self.open_map();
        let Some(snapshot) = open.get_mut(&id) else {
            return Err(self.missing(id));
        };

        validate(snapshot, &batch)?;
        snapshot.apply(batch);
        Ok(())
    }

    /// Moves a snapshot to a terminal status and makes it read-only.
    ///
    /// A Completed snapshot is archived (when an archive is configured) and
    /// then promoted to its repository's latest. If archiving fails the
    /// snapshot is sealed as Failed instead and the error is returned.
    pub fn seal(
        &self,
        id: SnapshotId,
        status: SnapshotStatus,
        stats: IndexingStats,
    ) -> Result<Arc<Snapshot>, StoreError> {
        let mut snapshot = {
            let mut open = self.open_map();
            let current = match open.get(&id) {
                Some(s) => s.record.status,
                None => return Err(self.missing(id)),
            };
            if !status.is_terminal() || !current.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: current,
                    to: status,
                });
            }
            match open.remove(&id) {
                Some(s) => s,
                None => return Err(StoreError::UnknownSnapshot(id)),
            }
        };

        snapshot.record.apply(status, stats);
        snapshot.build_search_index();

        let mut archive_error = None;
        if status == SnapshotStatus::Completed {
            if let Some(archive) = &self.archive {
                if let Err(e) = archive.save(&snapshot) {
                    warn!(snapshot = %id, "archiving failed: {}", e);
                    snapshot.record.status = SnapshotStatus::Failed;
                    snapshot.record.failure = Some(format!("archive write failed: {}", e));
                    archive_error = Some(e);
                }
            }
        }

        let repository = snapshot.record.repository.clone();
        let promote = snapshot.record.status == SnapshotStatus::Completed;
        let snapshot = Arc::new(snapshot);

        let pruned = {
            let mut sealed = self.write_sealed();
            sealed.snapshots.insert(id, Arc::clone(&snapshot));
            if promote {
                sealed.latest.insert(repository.clone(), id);
                prune(&mut sealed, &repository, id)
            } else {
                Vec::new()
            }
        };

        if let Some(archive) = &self.archive {
            for old in &pruned {
                if let Err(e) = archive.remove(*old) {
                    warn!(snapshot = %old, "failed to drop archived snapshot: {}", e);
                }
            }
        }

        info!(
            %repository,
            snapshot = %id,
            status = %snapshot.record.status,
            promoted = promote,
            "sealed snapshot"
        );

        match archive_error {
            Some(e) => Err(e),
            None => Ok(snapshot),
        }
    }

    /// Record of any snapshot, live or sealed.
    pub fn get(&self, id: SnapshotId) -> Result<IndexedRepository, StoreError> {
        if let Some(snapshot) = self.open_map().get(&id) {
            return Ok(snapshot.record.clone());
        }
        self.read_sealed()
            .snapshots
            .get(&id)
            .map(|s| s.record.clone())
            .ok_or(StoreError::UnknownSnapshot(id))
    }

    /// A sealed snapshot, shared.
    pub fn get_sealed(&self, id: SnapshotId) -> Result<Arc<Snapshot>, StoreError> {
        if let Some(snapshot) = self.read_sealed().snapshots.get(&id) {
            return Ok(Arc::clone(snapshot));
        }
        Err(self.missing(id))
    }

    /// The snapshot queries should read for a repository.
    pub fn latest_sealed(&self, repository: &str) -> Option<Arc<Snapshot>> {
        let sealed = self.read_sealed();
        let id = sealed.latest.get(repository)?;
        sealed.snapshots.get(id).cloned()
    }

    /// Newest record of any status for a repository.
    pub fn latest_record(&self, repository: &str) -> Option<IndexedRepository> {
        let open = self
            .open_map()
            .values()
            .filter(|s| s.record.repository == repository)
            .max_by_key(|s| s.id())
            .map(|s| s.record.clone());
        let sealed = self
            .read_sealed()
            .snapshots
            .values()
            .filter(|s| s.record.repository == repository)
            .max_by_key(|s| s.id())
            .map(|s| s.record.clone());

        match (open, sealed) {
            (Some(a), Some(b)) => Some(if a.snapshot_id > b.snapshot_id { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    /// Drops a snapshot and everything it owns.
    ///
    /// Readers that already hold the `Arc` keep their copy until they let go.
    pub fn purge(&self, id: SnapshotId) -> Result<(), StoreError> {
        if self.open_map().remove(&id).is_some() {
            debug!(snapshot = %id, "purged unsealed snapshot");
            return Ok(());
        }

        let removed = {
            let mut sealed = self.write_sealed();
            let removed = sealed.snapshots.remove(&id);
            if let Some(snapshot) = &removed {
                let repository = &snapshot.record.repository;
                if sealed.latest.get(repository) == Some(&id) {
                    sealed.latest.remove(repository);
                }
            }
            removed
        };
        let Some(snapshot) = removed else {
            return Err(StoreError::UnknownSnapshot(id));
        };

        if let Some(archive) = &self.archive {
            archive.remove(id)?;
            let repository = &snapshot.record.repository;
            if self.read_sealed().latest.get(repository).is_none() {
                archive.clear_latest(repository)?;
            }
        }
        debug!(snapshot = %id, "purged snapshot");
        Ok(())
    }

    fn missing(&self, id: SnapshotId) -> StoreError {
        if self.read_sealed().snapshots.contains_key(&id) {
            StoreError::Sealed(id)
        } else {
            StoreError::UnknownSnapshot(id)
        }
    }
}

/// Drops every sealed snapshot of `repository` other than `keep`.
fn prune(sealed: &mut SealedState, repository: &str, keep: SnapshotId) -> Vec<SnapshotId> {
    let stale: Vec<SnapshotId> = sealed
        .snapshots
        .iter()
        .filter(|(id, s)| **id != keep && s.record.repository == repository)
        .map(|(id, _)| *id)
        .collect();
    for id in &stale {
        sealed.snapshots.remove(id);
    }
    if !stale.is_empty() {
        debug!(%repository, count = stale.len(), "pruned superseded snapshots");
    }
    stale
}

fn validate(snapshot: &Snapshot, batch: &FactBatch) -> Result<(), DataIntegrityError> {
    let mut new_nodes = HashSet::with_capacity(batch.nodes.len());
    for node in &batch.nodes {
        if snapshot.contains_node(node.id) || !new_nodes.insert(node.id) {
            return Err(DataIntegrityError::DuplicateNode(node.id));
        }
    }
    let exists = |id: NodeId| snapshot.contains_node(id) || new_nodes.contains(&id);

    for node in &batch.nodes {
        if let Some(parent) = node.parent {
            if !exists(parent) {
                return Err(DataIntegrityError::DanglingParent {
                    node: node.id,
                    parent,
                });
            }
        }
    }

    let mut new_edges = HashSet::with_capacity(batch.edges.len());
    for edge in &batch.edges {
        if snapshot.contains_edge(edge.id) || !new_edges.insert(edge.id) {
            return Err(DataIntegrityError::DuplicateEdge(edge.id));
        }
        for endpoint in [edge.source, edge.target] {
            if !exists(endpoint) {
                return Err(DataIntegrityError::DanglingEdge {
                    edge: edge.id,
                    node: endpoint,
                });
            }
        }
    }

    for occurrence in &batch.occurrences {
        if !exists(occurrence.node) {
            return Err(DataIntegrityError::DanglingOccurrence {
                node: occurrence.node,
                file: occurrence.location.file.clone(),
            });
        }
    }

    Ok(())
}
