//! Durable storage for sealed snapshots.
//!
//! Snapshots are serialized whole with bincode and stored in sled under
//! `snapshot/<id>`. `latest/<repo>` points at the promoted snapshot of each
//! repository. Ids are zero-padded so key order matches numeric order.
//! `meta/next_snapshot_id` holds the id counter, so ids of snapshots that were
//! never archived are not handed out again.

use crate::snapshot::{RepositoryId, Snapshot, SnapshotId};
use crate::store::StoreError;
use sled::Db;
use std::path::Path;
use tracing::debug;

const SNAPSHOT_PREFIX: &str = "snapshot/";
const LATEST_PREFIX: &str = "latest/";
const NEXT_ID_KEY: &str = "meta/next_snapshot_id";

fn decode_id(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

fn snapshot_key(id: SnapshotId) -> String {
    format!("{}{:020}", SNAPSHOT_PREFIX, id.0)
}

fn latest_key(repository: &str) -> String {
    format!("{}{}", LATEST_PREFIX, repository)
}

pub struct SnapshotArchive {
    db: Db,
}

impl SnapshotArchive {
    /// Opens or creates an archive at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Writes a snapshot and points its repository's `latest` key at it.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = bincode::serialize(snapshot)?;
        let id = snapshot.id();
        self.db.insert(snapshot_key(id), bytes)?;
        self.db
            .insert(latest_key(&snapshot.record.repository), id.0.to_be_bytes().to_vec())?;
        self.db.flush()?;
        debug!(snapshot = %id, "archived snapshot");
        Ok(())
    }

    /// Loads a snapshot with its lookup indexes rebuilt.
    pub fn load(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        let Some(bytes) = self.db.get(snapshot_key(id))? else {
            return Ok(None);
        };
        let mut snapshot: Snapshot = bincode::deserialize(&bytes)?;
        snapshot.rebuild_indexes();
        Ok(Some(snapshot))
    }

    /// The promoted snapshot of every archived repository.
    pub fn latest(&self) -> Result<Vec<(RepositoryId, SnapshotId)>, StoreError> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(LATEST_PREFIX) {
            let (key, value) = entry?;
            let repository = String::from_utf8_lossy(&key[LATEST_PREFIX.len()..]).to_string();
            let Some(raw) = decode_id(&value) else {
                continue;
            };
            out.push((repository, SnapshotId(raw)));
        }
        Ok(out)
    }

    /// Highest snapshot id ever archived.
    pub fn max_snapshot_id(&self) -> Result<Option<SnapshotId>, StoreError> {
        let Some(entry) = self.db.scan_prefix(SNAPSHOT_PREFIX).next_back() else {
            return Ok(None);
        };
        let (key, _) = entry?;
        let id = std::str::from_utf8(&key[SNAPSHOT_PREFIX.len()..])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(SnapshotId);
        Ok(id)
    }

    /// First id that has never been handed out.
    pub fn next_snapshot_id(&self) -> Result<SnapshotId, StoreError> {
        let recorded = self.db.get(NEXT_ID_KEY)?.and_then(|v| decode_id(&v)).unwrap_or(1);
        let archived = self.max_snapshot_id()?.map_or(1, |id| id.0 + 1);
        Ok(SnapshotId(recorded.max(archived)))
    }

    /// Marks `id` as taken. The counter never moves backwards.
    pub fn reserve(&self, id: SnapshotId) -> Result<(), StoreError> {
        let floor = id.0 + 1;
        self.db.fetch_and_update(NEXT_ID_KEY, |old| {
            let current = old.and_then(decode_id).unwrap_or(1);
            Some(current.max(floor).to_be_bytes().to_vec())
        })?;
        self.db.flush()?;
        Ok(())
    }

    /// Removes a snapshot. The `latest` pointer is left alone.
    pub fn remove(&self, id: SnapshotId) -> Result<(), StoreError> {
        self.db.remove(snapshot_key(id))?;
        self.db.flush()?;
        Ok(())
    }

    /// Drops the `latest` pointer of a repository.
    pub fn clear_latest(&self, repository: &str) -> Result<(), StoreError> {
        self.db.remove(latest_key(repository))?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{IndexedRepository, SnapshotSource};
    use tempfile::tempdir;

    fn snapshot(id: u64, repo: &str) -> Snapshot {
        Snapshot::new(IndexedRepository::new(
            SnapshotId(id),
            repo.to_string(),
            SnapshotSource::new("/src"),
        ))
    }

    #[test]
    fn test_save_load_snapshot() {
        let dir = tempdir().unwrap();
        let archive = SnapshotArchive::open(dir.path()).unwrap();

        archive.save(&snapshot(3, "web")).unwrap();

        let loaded = archive.load(SnapshotId(3)).unwrap().unwrap();
        assert_eq!(loaded.record().repository, "web");
        assert_eq!(loaded.node_count(), 0);
        assert!(archive.load(SnapshotId(4)).unwrap().is_none());
    }

    #[test]
    fn test_latest_and_max_id() {
        let dir = tempdir().unwrap();
        let archive = SnapshotArchive::open(dir.path()).unwrap();
        assert_eq!(archive.max_snapshot_id().unwrap(), None);

        archive.save(&snapshot(9, "api")).unwrap();
        archive.save(&snapshot(12, "api")).unwrap();
        archive.save(&snapshot(10, "web")).unwrap();

        let mut latest = archive.latest().unwrap();
        latest.sort();
        assert_eq!(
            latest,
            vec![
                ("api".to_string(), SnapshotId(12)),
                ("web".to_string(), SnapshotId(10))
            ]
        );
        assert_eq!(archive.max_snapshot_id().unwrap(), Some(SnapshotId(12)));

        archive.remove(SnapshotId(9)).unwrap();
        assert!(archive.load(SnapshotId(9)).unwrap().is_none());
    }

    #[test]
    fn test_reserved_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let archive = SnapshotArchive::open(dir.path()).unwrap();
            assert_eq!(archive.next_snapshot_id().unwrap(), SnapshotId(1));
            archive.save(&snapshot(2, "web")).unwrap();
            archive.reserve(SnapshotId(5)).unwrap();
            archive.reserve(SnapshotId(4)).unwrap();
        }

        let archive = SnapshotArchive::open(dir.path()).unwrap();
        assert_eq!(archive.next_snapshot_id().unwrap(), SnapshotId(6));
        assert_eq!(archive.max_snapshot_id().unwrap(), Some(SnapshotId(2)));
    }
}
