//! Snapshot records and the per-snapshot graph arena.
//!
//! A `Snapshot` wraps petgraph and adds an id index so that snapshot-scoped
//! `NodeId`s resolve in O(1). Everything a snapshot owns lives in it, so
//! dropping the last `Arc<Snapshot>` frees the whole version at once.

use crate::search::SearchIndex;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use strata_core::{CodeEdge, CodeNode, EdgeId, NodeId, Occurrence, SourceFile};

/// Identifier of a registered repository.
pub type RepositoryId = String;

/// Globally unique snapshot identity. Never reused, even across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a snapshot. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SnapshotStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SnapshotStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued | Self::Running, n) => n.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a snapshot's sources came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSource {
    pub root: String,
    pub commit: Option<String>,
    pub branch: Option<String>,
}

impl SnapshotSource {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

/// A file that could not be indexed, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Counters an indexing run hands over when it seals its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingStats {
    pub files_attempted: usize,
    pub files_indexed: usize,
    pub symbols_indexed: usize,
    pub references_indexed: usize,
    pub unresolved_references: usize,
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
    /// Non-recoverable error that ended the run.
    pub failure: Option<String>,
}

impl IndexingStats {
    /// Some files failed and some succeeded.
    pub fn is_partial_success(&self) -> bool {
        !self.errors.is_empty() && self.errors.len() < self.files_attempted
    }

    /// Every attempted file failed.
    pub fn all_failed(&self) -> bool {
        self.files_attempted > 0 && self.errors.len() >= self.files_attempted
    }
}

/// The durable description of one indexing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedRepository {
    pub snapshot_id: SnapshotId,
    pub repository: RepositoryId,
    pub source: SnapshotSource,
    pub status: SnapshotStatus,
    pub files_attempted: usize,
    pub files_indexed: usize,
    pub symbols_indexed: usize,
    pub references_indexed: usize,
    pub unresolved_references: usize,
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
    pub failure: Option<String>,
    pub partial_success: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IndexedRepository {
    pub fn new(snapshot_id: SnapshotId, repository: RepositoryId, source: SnapshotSource) -> Self {
        Self {
            snapshot_id,
            repository,
            source,
            status: SnapshotStatus::Queued,
            files_attempted: 0,
            files_indexed: 0,
            symbols_indexed: 0,
            references_indexed: 0,
            unresolved_references: 0,
            duration_ms: 0,
            errors: Vec::new(),
            failure: None,
            partial_success: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn apply(&mut self, status: SnapshotStatus, stats: IndexingStats) {
        self.status = status;
        self.partial_success = stats.is_partial_success();
        self.files_attempted = stats.files_attempted;
        self.files_indexed = stats.files_indexed;
        self.symbols_indexed = stats.symbols_indexed;
        self.references_indexed = stats.references_indexed;
        self.unresolved_references = stats.unresolved_references;
        self.duration_ms = stats.duration_ms;
        self.errors = stats.errors;
        self.failure = stats.failure;
        self.finished_at = Some(Utc::now());
    }
}

/// One bulk write into an unsealed snapshot.
#[derive(Debug, Clone, Default)]
pub struct FactBatch {
    pub nodes: Vec<CodeNode>,
    pub edges: Vec<CodeEdge>,
    pub files: Vec<SourceFile>,
    pub occurrences: Vec<Occurrence>,
}

impl FactBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.edges.is_empty()
            && self.files.is_empty()
            && self.occurrences.is_empty()
    }
}

/// Graph statistics for the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub files: usize,
    pub occurrences: usize,
}

/// A versioned symbol graph for one repository.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub(crate) record: IndexedRepository,

    /// The underlying petgraph graph.
    pub(crate) graph: DiGraph<CodeNode, CodeEdge>,

    files: Vec<SourceFile>,
    occurrences: Vec<Occurrence>,

    /// Maps snapshot node ids to graph indexes.
    #[serde(skip)]
    id_index: HashMap<NodeId, NodeIndex>,

    #[serde(skip)]
    edge_ids: HashSet<EdgeId>,

    /// Built on seal and on load, never persisted.
    #[serde(skip)]
    search: SearchIndex,
}

impl Snapshot {
    pub(crate) fn new(record: IndexedRepository) -> Self {
        Self {
            record,
            graph: DiGraph::new(),
            files: Vec::new(),
            occurrences: Vec::new(),
            id_index: HashMap::new(),
            edge_ids: HashSet::new(),
            search: SearchIndex::new(),
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.record.snapshot_id
    }

    pub fn record(&self) -> &IndexedRepository {
        &self.record
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.id_index.contains_key(&id)
    }

    pub(crate) fn contains_edge(&self, id: EdgeId) -> bool {
        self.edge_ids.contains(&id)
    }

    /// Gets a node by its snapshot id.
    pub fn node(&self, id: NodeId) -> Option<&CodeNode> {
        let index = self.id_index.get(&id)?;
        self.graph.node_weight(*index)
    }

    pub(crate) fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.id_index.get(&id).copied()
    }

    /// Iterates over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &CodeNode> {
        self.graph.node_weights()
    }

    /// Iterates over all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &CodeEdge> {
        self.graph.edge_weights()
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            files: self.files.len(),
            occurrences: self.occurrences.len(),
        }
    }

    /// Edges leaving (or entering) a node, by graph index.
    pub(crate) fn edges_of(
        &self,
        index: NodeIndex,
        direction: Direction,
    ) -> impl Iterator<Item = (NodeIndex, &CodeEdge)> {
        self.graph.edges_directed(index, direction).map(move |e| {
            let other = match direction {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            };
            (other, e.weight())
        })
    }

    pub(crate) fn search_index(&self) -> &SearchIndex {
        &self.search
    }

    /// Applies a batch that has already passed integrity checks.
    pub(crate) fn apply(&mut self, batch: FactBatch) {
        for node in batch.nodes {
            let id = node.id;
            let index = self.graph.add_node(node);
            self.id_index.insert(id, index);
        }
        for edge in batch.edges {
            let (Some(from), Some(to)) = (self.index_of(edge.source), self.index_of(edge.target))
            else {
                continue;
            };
            self.edge_ids.insert(edge.id);
            self.graph.add_edge(from, to, edge);
        }
        self.files.extend(batch.files);
        self.occurrences.extend(batch.occurrences);
    }

    /// Rebuilds the lookup indexes after deserialization.
    pub(crate) fn rebuild_indexes(&mut self) {
        self.id_index = self
            .graph
            .node_indices()
            .filter_map(|i| self.graph.node_weight(i).map(|n| (n.id, i)))
            .collect();
        self.edge_ids = self.graph.edge_weights().map(|e| e.id).collect();
        self.build_search_index();
    }

    pub(crate) fn build_search_index(&mut self) {
        let mut search = SearchIndex::new();
        for node in self.graph.node_weights() {
            search.insert(&node.display_name, node.id);
            search.insert(&node.serialized_name, node.id);
        }
        self.search = search;
    }
}
