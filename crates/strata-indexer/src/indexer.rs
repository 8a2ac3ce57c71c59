//! The indexing pipeline.
//!
//! One run fills one snapshot: enumerate files, parse each one in order,
//! translate its facts into snapshot ids and append them, then resolve
//! cross-file references and seal. A file that fails to parse is recorded
//! and skipped; a store failure ends the run.

use crate::cancel::CancellationSignal;
use crate::discover::{enumerate, IndexScope};
use crate::error::{IndexError, Result};
use crate::progress::ProgressReporter;
use crate::symbols::{PendingReference, SymbolTable};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{FileFacts, SourceFile, SourceParser};
use strata_graph::{FileError, IndexingStats, SnapshotId, SnapshotStatus, SnapshotStore};
use tracing::{debug, info, warn};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingResult {
    pub snapshot_id: SnapshotId,
    pub status: SnapshotStatus,
    pub files_discovered: usize,
    pub files_attempted: usize,
    pub files_indexed: usize,
    pub symbols_indexed: usize,
    pub references_indexed: usize,
    pub unresolved_references: usize,
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
    pub partial_success: bool,
}

/// Drives a `SourceParser` over a tree and writes into the snapshot store.
pub struct Indexer<P> {
    parser: P,
    store: Arc<SnapshotStore>,
}

impl<P: SourceParser> Indexer<P> {
    pub fn new(parser: P, store: Arc<SnapshotStore>) -> Self {
        Self { parser, store }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Indexes every project below `path`.
    pub fn index_solution(
        &self,
        snapshot: SnapshotId,
        path: &Path,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexingResult> {
        self.run(snapshot, path, IndexScope::Solution, cancel, progress)
    }

    /// Indexes one project directory.
    pub fn index_project(
        &self,
        snapshot: SnapshotId,
        path: &Path,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexingResult> {
        self.run(snapshot, path, IndexScope::Project, cancel, progress)
    }

    /// Indexes a single file.
    pub fn index_file(
        &self,
        snapshot: SnapshotId,
        path: &Path,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexingResult> {
        self.run(snapshot, path, IndexScope::File, cancel, progress)
    }

    /// Runs one indexing pass into `snapshot`, which must be Queued.
    pub fn run(
        &self,
        snapshot: SnapshotId,
        path: &Path,
        scope: IndexScope,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexingResult> {
        self.store.mark_running(snapshot)?;

        if !path.exists() {
            let err = IndexError::PathNotFound(path.to_path_buf());
            self.fail(snapshot, IndexingStats::default(), &err);
            return Err(err);
        }

        let files = enumerate(path, scope, &self.parser);
        let discovered = files.len();
        progress.files_discovered(discovered);
        info!(snapshot = %snapshot, "Indexing {} files under {}", discovered, path.display());

        let mut table = SymbolTable::new();
        let mut pending: Vec<PendingReference> = Vec::new();
        let mut stats = IndexingStats::default();
        let mut first_start: Option<Instant> = None;
        let mut last_end: Option<Instant> = None;
        let mut cancelled = false;

        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(snapshot = %snapshot, "Cancelled after {} of {} files", i, discovered);
                cancelled = true;
                break;
            }
            progress.file_started(file, i);
            let started = Instant::now();
            first_start.get_or_insert(started);
            stats.files_attempted += 1;

            let parsed = self.parse(file);
            if cancel.is_cancelled() {
                info!(
                    snapshot = %snapshot,
                    "Cancelled while parsing {}, dropping it",
                    file.display()
                );
                stats.files_attempted -= 1;
                cancelled = true;
                break;
            }

            match parsed {
                Ok((facts, source_file)) => {
                    let translation = table.translate(&facts, source_file);
                    if let Err(e) = self.store.append_facts(snapshot, translation.batch) {
                        let err = IndexError::from(e);
                        self.fail(snapshot, stats, &err);
                        return Err(err);
                    }
                    pending.extend(translation.pending);
                    stats.references_indexed += translation.references;
                    stats.files_indexed += 1;
                }
                Err(message) => {
                    warn!("Failed to index {}: {}", file.display(), message);
                    stats.errors.push(FileError {
                        path: file.to_string_lossy().to_string(),
                        message,
                    });
                }
            }

            last_end = Some(Instant::now());
            progress.file_finished(i + 1);
        }

        if !cancelled {
            let (batch, references, unresolved) = table.resolve_pending(pending);
            if let Err(e) = self.store.append_facts(snapshot, batch) {
                let err = IndexError::from(e);
                self.fail(snapshot, stats, &err);
                return Err(err);
            }
            stats.references_indexed += references;
            stats.unresolved_references = unresolved;
            debug!(
                snapshot = %snapshot,
                resolved = references,
                unresolved,
                "resolved cross-file references"
            );
        }

        stats.symbols_indexed = table.node_count();
        stats.duration_ms = match (first_start, last_end) {
            (Some(start), Some(end)) => end.duration_since(start).as_millis() as u64,
            _ => 0,
        };

        let status = if cancelled {
            SnapshotStatus::Cancelled
        } else if stats.all_failed() {
            SnapshotStatus::Failed
        } else {
            SnapshotStatus::Completed
        };

        let result = IndexingResult {
            snapshot_id: snapshot,
            status,
            files_discovered: discovered,
            files_attempted: stats.files_attempted,
            files_indexed: stats.files_indexed,
            symbols_indexed: stats.symbols_indexed,
            references_indexed: stats.references_indexed,
            unresolved_references: stats.unresolved_references,
            duration_ms: stats.duration_ms,
            errors: stats.errors.clone(),
            partial_success: stats.is_partial_success(),
        };

        self.store.seal(snapshot, status, stats)?;

        info!(
            snapshot = %snapshot,
            status = %status,
            "Indexed {} files ({} symbols, {} references) in {}ms",
            result.files_indexed,
            result.symbols_indexed,
            result.references_indexed,
            result.duration_ms
        );
        Ok(result)
    }

    /// Reads, hashes and parses one file. Any failure is a message for the
    /// error list.
    fn parse(&self, path: &Path) -> std::result::Result<(FileFacts, SourceFile), String> {
        let bytes = fs::read(path).map_err(|e| e.to_string())?;
        let content_hash = blake3::hash(&bytes).to_hex().to_string();

        let facts = self.parser.extract(path).map_err(|e| e.to_string())?;
        if facts.is_failed() {
            return Err(facts.errors.join("; "));
        }
        SymbolTable::check(&facts)?;

        let source_file = SourceFile {
            path: path.to_string_lossy().to_string(),
            content_hash,
            language: facts.language.clone(),
            indexed_at: Utc::now(),
        };
        Ok((facts, source_file))
    }

    /// Seals the snapshot as Failed with the error recorded.
    fn fail(&self, snapshot: SnapshotId, mut stats: IndexingStats, err: &IndexError) {
        warn!(snapshot = %snapshot, "Indexing failed: {}", err);
        stats.failure = Some(err.to_string());
        if let Err(e) = self.store.seal(snapshot, SnapshotStatus::Failed, stats) {
            warn!(snapshot = %snapshot, "could not seal failed snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use strata_core::{
        CodeNode, Location, NodeId, ParseError, ReferenceKind, ReferenceTarget, SymbolKind,
    };
    use strata_graph::{DataIntegrityError, FactBatch, SnapshotSource, StoreError};
    use tempfile::{tempdir, TempDir};

    /// Emits one class per file, named after the file, plus a call to the
    /// class of the previous file. Files listed in `broken` fail.
    struct ScriptedParser {
        broken: HashSet<String>,
    }

    impl ScriptedParser {
        fn new(broken: &[&str]) -> Self {
            Self {
                broken: broken.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl SourceParser for ScriptedParser {
        fn supports(&self, path: &Path) -> bool {
            path.extension().is_some_and(|e| e == "py")
        }

        fn extract(&self, path: &Path) -> strata_core::Result<FileFacts> {
            let stem = path.file_stem().unwrap().to_string_lossy().to_string();
            if self.broken.contains(&stem) {
                return Err(ParseError::ParserError(format!("cannot parse {}", stem)));
            }
            let file = path.to_string_lossy().to_string();
            let mut facts = FileFacts::new("python");
            let module =
                facts.push_symbol(stem.clone(), stem.clone(), SymbolKind::Module, Location::new(&file, 1, 0), None);
            let class_name = format!("{}Handler", stem);
            let class = facts.push_symbol(
                format!("{}.{}", stem, class_name),
                class_name,
                SymbolKind::Class,
                Location::new(&file, 2, 0),
                Some(module),
            );
            let n: u32 = stem.trim_start_matches('f').parse().unwrap_or(0);
            if n > 0 {
                facts.push_reference(
                    class,
                    ReferenceTarget::Named(format!("f{}Handler", n - 1)),
                    ReferenceKind::Call,
                    Location::new(&file, 3, 4),
                );
            }
            Ok(facts)
        }
    }

    fn repo(files: usize) -> TempDir {
        let dir = tempdir().unwrap();
        for i in 0..files {
            fs::write(dir.path().join(format!("f{}.py", i)), format!("# {}", i)).unwrap();
        }
        dir
    }

    fn setup(parser: ScriptedParser) -> (Indexer<ScriptedParser>, Arc<SnapshotStore>) {
        let store = Arc::new(SnapshotStore::new());
        (Indexer::new(parser, Arc::clone(&store)), store)
    }

    #[test]
    fn test_two_bad_files_of_ten_is_partial_success() {
        let dir = repo(10);
        let (indexer, store) = setup(ScriptedParser::new(&["f3", "f7"]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();

        let result = indexer
            .index_solution(id, dir.path(), &CancellationSignal::new(), &NoProgress)
            .unwrap();

        assert_eq!(result.status, SnapshotStatus::Completed);
        assert_eq!(result.files_attempted, 10);
        assert_eq!(result.files_indexed, 8);
        assert_eq!(result.errors.len(), 2);
        assert!(result.partial_success);
        assert!(result.errors[0].path.ends_with("f3.py"));

        let snapshot = store.latest_sealed("web").unwrap();
        assert_eq!(snapshot.id(), id);
        assert_eq!(snapshot.files().len(), 8);
        assert!(snapshot.record().partial_success);
    }

    #[test]
    fn test_every_edge_endpoint_exists() {
        let dir = repo(6);
        let (indexer, store) = setup(ScriptedParser::new(&[]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();
        indexer
            .index_solution(id, dir.path(), &CancellationSignal::new(), &NoProgress)
            .unwrap();

        let snapshot = store.get_sealed(id).unwrap();
        assert!(snapshot.edge_count() > 0);
        for edge in snapshot.edges() {
            assert!(snapshot.node(edge.source).is_some());
            assert!(snapshot.node(edge.target).is_some());
        }
        // 5 cross-file calls plus 6 containment edges.
        assert_eq!(snapshot.edge_count(), 11);
    }

    #[test]
    fn test_reindexing_is_deterministic() {
        let dir = repo(5);
        let (indexer, store) = setup(ScriptedParser::new(&["f2"]));

        let mut runs = Vec::new();
        for _ in 0..2 {
            let id = store.create("web", SnapshotSource::new("/src")).unwrap();
            indexer
                .index_solution(id, dir.path(), &CancellationSignal::new(), &NoProgress)
                .unwrap();
            let snapshot = store.get_sealed(id).unwrap();
            let nodes: Vec<(u32, String)> = snapshot
                .nodes()
                .map(|n| (n.id.0, n.serialized_name.clone()))
                .collect();
            runs.push((nodes, snapshot.edge_count()));
        }
        assert_eq!(runs[0], runs[1]);
    }

    /// Raises the cancellation signal once three files have finished.
    struct CancelAfter {
        signal: CancellationSignal,
        after: usize,
    }

    impl ProgressReporter for CancelAfter {
        fn file_finished(&self, processed: usize) {
            if processed >= self.after {
                self.signal.cancel();
            }
        }
    }

    #[test]
    fn test_cancel_after_three_files() {
        let dir = repo(10);
        let (indexer, store) = setup(ScriptedParser::new(&[]));
        let signal = CancellationSignal::new();
        let reporter = CancelAfter {
            signal: signal.clone(),
            after: 3,
        };
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();

        let result = indexer
            .index_solution(id, dir.path(), &signal, &reporter)
            .unwrap();

        assert_eq!(result.status, SnapshotStatus::Cancelled);
        assert!(result.files_indexed <= 3);
        assert!(store.latest_sealed("web").is_none());
        assert_eq!(store.get(id).unwrap().status, SnapshotStatus::Cancelled);
    }

    /// Raises the cancellation signal while the given file is being parsed.
    struct CancelDuring {
        inner: ScriptedParser,
        signal: CancellationSignal,
        stem: &'static str,
    }

    impl SourceParser for CancelDuring {
        fn supports(&self, path: &Path) -> bool {
            self.inner.supports(path)
        }

        fn extract(&self, path: &Path) -> strata_core::Result<FileFacts> {
            if path.file_stem().is_some_and(|s| s == self.stem) {
                self.signal.cancel();
            }
            self.inner.extract(path)
        }
    }

    #[test]
    fn test_cancel_mid_file_drops_that_file() {
        let dir = repo(10);
        let signal = CancellationSignal::new();
        let parser = CancelDuring {
            inner: ScriptedParser::new(&[]),
            signal: signal.clone(),
            stem: "f3",
        };
        let store = Arc::new(SnapshotStore::new());
        let indexer = Indexer::new(parser, Arc::clone(&store));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();

        let result = indexer
            .index_solution(id, dir.path(), &signal, &NoProgress)
            .unwrap();

        assert_eq!(result.status, SnapshotStatus::Cancelled);
        assert_eq!(result.files_indexed, 3);
        assert_eq!(result.files_attempted, 3);
        let record = store.get(id).unwrap();
        assert_eq!(record.files_indexed, 3);
        assert!(store.latest_sealed("web").is_none());
    }

    #[test]
    fn test_all_files_failing_is_failed() {
        let dir = repo(2);
        let (indexer, store) = setup(ScriptedParser::new(&["f0", "f1"]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();

        let result = indexer
            .index_solution(id, dir.path(), &CancellationSignal::new(), &NoProgress)
            .unwrap();

        assert_eq!(result.status, SnapshotStatus::Failed);
        assert!(!result.partial_success);
        assert!(store.latest_sealed("web").is_none());
    }

    #[test]
    fn test_empty_tree_completes() {
        let dir = repo(0);
        let (indexer, store) = setup(ScriptedParser::new(&[]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();

        let result = indexer
            .index_solution(id, dir.path(), &CancellationSignal::new(), &NoProgress)
            .unwrap();
        assert_eq!(result.status, SnapshotStatus::Completed);
        assert_eq!(result.duration_ms, 0);
    }

    #[test]
    fn test_missing_path_seals_failed() {
        let (indexer, store) = setup(ScriptedParser::new(&[]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();

        let err = indexer
            .index_solution(
                id,
                &PathBuf::from("/no/such/tree"),
                &CancellationSignal::new(),
                &NoProgress,
            )
            .unwrap_err();
        assert!(matches!(err, IndexError::PathNotFound(_)));

        let record = store.get(id).unwrap();
        assert_eq!(record.status, SnapshotStatus::Failed);
        assert!(record.failure.is_some());
    }

    /// Purges the snapshot out from under the indexer on the second file.
    struct Saboteur {
        store: Arc<SnapshotStore>,
        snapshot: Mutex<Option<SnapshotId>>,
    }

    impl ProgressReporter for Saboteur {
        fn file_started(&self, _path: &Path, index: usize) {
            if index == 1 {
                if let Some(id) = self.snapshot.lock().unwrap().take() {
                    self.store.purge(id).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_store_failure_aborts_run() {
        let dir = repo(4);
        let (indexer, store) = setup(ScriptedParser::new(&[]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();
        let saboteur = Saboteur {
            store: Arc::clone(&store),
            snapshot: Mutex::new(Some(id)),
        };

        let err = indexer
            .index_solution(id, dir.path(), &CancellationSignal::new(), &saboteur)
            .unwrap_err();
        assert!(matches!(err, IndexError::Store(_)));
    }

    #[test]
    fn test_integrity_violation_seals_failed() {
        let dir = repo(3);
        let (indexer, store) = setup(ScriptedParser::new(&[]));
        let id = store.create("web", SnapshotSource::new("/src")).unwrap();
        // The first file's module will be issued NodeId(0) as well.
        store
            .append_facts(
                id,
                FactBatch {
                    nodes: vec![CodeNode::new(
                        NodeId(0),
                        "stale",
                        "stale",
                        SymbolKind::Module,
                        "stale.py",
                    )],
                    ..FactBatch::default()
                },
            )
            .unwrap();

        let err = indexer
            .index_solution(id, dir.path(), &CancellationSignal::new(), &NoProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Store(StoreError::Integrity(DataIntegrityError::DuplicateNode(NodeId(0))))
        ));

        let record = store.get(id).unwrap();
        assert_eq!(record.status, SnapshotStatus::Failed);
        assert!(record.failure.as_deref().is_some_and(|f| f.contains("integrity")));
        assert!(store.latest_sealed("web").is_none());
        assert!(store.get_sealed(id).is_ok());
    }

    #[test]
    fn test_index_file_with_tree_sitter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shapes.py");
        fs::write(
            &path,
            "class Shape:\n    pass\n\nclass Square(Shape):\n    pass\n",
        )
        .unwrap();

        let store = Arc::new(SnapshotStore::new());
        let indexer = Indexer::new(strata_core::TreeSitterParser::new(), Arc::clone(&store));
        let id = store.create("shapes", SnapshotSource::new("/src")).unwrap();
        let result = indexer
            .index_file(id, &path, &CancellationSignal::new(), &NoProgress)
            .unwrap();

        assert_eq!(result.files_indexed, 1);
        let snapshot = store.get_sealed(id).unwrap();
        let square = snapshot
            .nodes()
            .find(|n| n.display_name == "Square")
            .unwrap();
        assert!(snapshot
            .edges()
            .any(|e| e.source == square.id && e.kind == ReferenceKind::Inheritance));
        assert_eq!(snapshot.files()[0].content_hash.len(), 64);
    }
}
