//! The service surface shared by the JSON-RPC server and the CLI.
//!
//! Job control goes to the orchestrator; reads go to the latest sealed
//! snapshot of a repository, held as an `Arc` for the length of one call.

use crate::config::StrataConfig;
use crate::error::{Result, ServiceError};
use crate::orchestrator::{JobOrchestrator, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use strata_core::{CodeNode, NodeId, Occurrence, SourceParser, SymbolKind};
use strata_graph::{
    GraphData, GraphQuery, GraphStats, IndexedRepository, QueryError, RepositoryId, Snapshot,
    SnapshotArchive, SnapshotId, SnapshotStore, TraversalDirection,
};
use tracing::{debug, info};

/// A graph query as callers send it. Unset budgets take the configured
/// defaults; every budget is capped by the configured maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub repository: RepositoryId,
    #[serde(default)]
    pub root_node_id: Option<NodeId>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub max_nodes: Option<usize>,
    #[serde(default)]
    pub max_edges: Option<usize>,
    #[serde(default)]
    pub include_members: bool,
    #[serde(default)]
    pub namespace_filter: Option<String>,
    #[serde(default)]
    pub symbol_kind_filter: Option<BTreeSet<SymbolKind>>,
    #[serde(default)]
    pub direction: TraversalDirection,
}

impl QueryOptions {
    pub fn new(repository: impl Into<RepositoryId>) -> Self {
        Self {
            repository: repository.into(),
            ..Self::default()
        }
    }

    fn to_query(&self, config: &StrataConfig) -> GraphQuery {
        let limits = &config.query;
        GraphQuery {
            root_node_id: self.root_node_id,
            max_depth: self
                .max_depth
                .unwrap_or(limits.default_depth)
                .min(limits.max_depth),
            max_nodes: self
                .max_nodes
                .unwrap_or(limits.default_nodes)
                .min(limits.max_nodes),
            max_edges: self
                .max_edges
                .unwrap_or(limits.default_edges)
                .min(limits.max_edges),
            include_members: self.include_members,
            namespace_filter: self.namespace_filter.clone(),
            symbol_kind_filter: self.symbol_kind_filter.clone(),
            direction: self.direction,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSearchResult {
    pub node_id: NodeId,
    pub display_name: String,
    pub serialized_name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub line: u32,
    pub signature: Option<String>,
}

impl From<&CodeNode> for SymbolSearchResult {
    fn from(node: &CodeNode) -> Self {
        Self {
            node_id: node.id,
            display_name: node.display_name.clone(),
            serialized_name: node.serialized_name.clone(),
            kind: node.kind,
            file: node.file.clone(),
            line: node.line,
            signature: node.signature.clone(),
        }
    }
}

/// The snapshot queries currently read for a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub record: IndexedRepository,
    pub stats: GraphStats,
}

pub struct IndexService {
    config: Arc<StrataConfig>,
    orchestrator: Arc<JobOrchestrator>,
}

impl IndexService {
    pub fn new(config: Arc<StrataConfig>, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Builds the whole stack from configuration: opens and restores the
    /// archive if one is configured, then registers the configured
    /// repositories.
    pub fn open(config: Arc<StrataConfig>, parser: Arc<dyn SourceParser>) -> Result<Self> {
        let store = match &config.archive_path {
            Some(path) => {
                let archive = SnapshotArchive::open(path)?;
                let store = SnapshotStore::with_archive(archive)?;
                let restored = store.restore()?;
                info!("Opened archive at {} ({} snapshots)", path.display(), restored);
                store
            }
            None => SnapshotStore::new(),
        };
        let orchestrator = JobOrchestrator::new(
            parser,
            Arc::new(store),
            config.repositories.iter().cloned(),
        );
        Ok(Self::new(config, Arc::new(orchestrator)))
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    pub fn queue_indexing(&self, repository: &str) -> Result<SnapshotId> {
        self.orchestrator.queue_indexing(repository)
    }

    /// `None` when the repository is known but has never been indexed.
    pub fn get_job_status(&self, repository: &str) -> Result<Option<JobStatus>> {
        self.ensure_known(repository)?;
        Ok(self.orchestrator.get_job_status(repository))
    }

    pub fn cancel_job(&self, repository: &str) -> Result<bool> {
        self.ensure_known(repository)?;
        Ok(self.orchestrator.cancel_job(repository))
    }

    pub fn query_graph(&self, options: &QueryOptions) -> Result<GraphData> {
        let snapshot = self.latest(&options.repository)?;
        let query = options.to_query(&self.config);
        debug!(
            repository = %options.repository,
            snapshot = %snapshot.id(),
            root = ?query.root_node_id,
            depth = query.max_depth,
            "graph query"
        );
        Ok(snapshot.query(&query)?)
    }

    pub fn search_symbols(&self, repository: &str, term: &str) -> Result<Vec<SymbolSearchResult>> {
        if term.trim().is_empty() {
            return Err(ServiceError::Validation("search term must not be empty".into()));
        }
        let snapshot = self.latest(repository)?;
        Ok(snapshot
            .search(term.trim(), self.config.search_limit)
            .into_iter()
            .map(SymbolSearchResult::from)
            .collect())
    }

    pub fn find_references(&self, repository: &str, node: NodeId) -> Result<Vec<Occurrence>> {
        let snapshot = self.latest(repository)?;
        Ok(snapshot
            .find_references(node)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn snapshot_info(&self, repository: &str) -> Result<SnapshotInfo> {
        let snapshot = self.latest(repository)?;
        Ok(SnapshotInfo {
            record: snapshot.record().clone(),
            stats: snapshot.stats(),
        })
    }

    fn ensure_known(&self, repository: &str) -> Result<()> {
        let known = self.orchestrator.repository(repository).is_some()
            || self.orchestrator.store().latest_record(repository).is_some();
        if known {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!(
                "repository {} is not registered",
                repository
            )))
        }
    }

    fn latest(&self, repository: &str) -> Result<Arc<Snapshot>> {
        self.orchestrator
            .store()
            .latest_sealed(repository)
            .ok_or_else(|| QueryError::NoSnapshot(repository.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::testing::{repo, ChainParser};
    use strata_core::OccurrenceRole;
    use strata_graph::SnapshotStatus;
    use tempfile::TempDir;

    fn service(dir: &TempDir, config: StrataConfig) -> IndexService {
        let config = StrataConfig {
            archive_path: None,
            repositories: vec![RepositoryConfig::new("web", dir.path())],
            ..config
        };
        IndexService::open(Arc::new(config), Arc::new(ChainParser)).unwrap()
    }

    async fn indexed(files: usize, config: StrataConfig) -> (TempDir, IndexService) {
        let dir = repo(files);
        let service = service(&dir, config);
        service.queue_indexing("web").unwrap();
        let done = service.orchestrator().wait("web").await.unwrap();
        assert_eq!(done.status, SnapshotStatus::Completed);
        (dir, service)
    }

    #[tokio::test]
    async fn test_reads_before_first_index_are_not_found() {
        let dir = repo(1);
        let service = service(&dir, StrataConfig::default());

        assert_eq!(service.get_job_status("web").unwrap(), None);
        let err = service.query_graph(&QueryOptions::new("web")).unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(service.snapshot_info("web").unwrap_err().status_code(), 404);
        assert_eq!(service.cancel_job("api").unwrap_err().status_code(), 404);
        assert_eq!(service.get_job_status("api").unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_rootless_query_covers_chain() {
        let (_dir, service) = indexed(3, StrataConfig::default()).await;

        let data = service.query_graph(&QueryOptions::new("web")).unwrap();
        let ids: Vec<u32> = data.nodes.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![0, 2, 4, 1, 3, 5]);
        assert_eq!(data.edges.len(), 5);
        assert!(!data.has_more);
    }

    #[tokio::test]
    async fn test_rooted_query_reports_more_beyond_depth() {
        let (_dir, service) = indexed(3, StrataConfig::default()).await;

        let options = QueryOptions {
            root_node_id: Some(NodeId(5)),
            max_depth: Some(1),
            ..QueryOptions::new("web")
        };
        let data = service.query_graph(&options).unwrap();
        let ids: Vec<u32> = data.nodes.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![5, 3]);
        assert_eq!(data.edges.len(), 1);
        assert!(data.has_more);

        let missing = QueryOptions {
            root_node_id: Some(NodeId(99)),
            ..QueryOptions::new("web")
        };
        assert_eq!(service.query_graph(&missing).unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_budgets_are_validated_and_capped() {
        let mut config = StrataConfig::default();
        config.query.max_nodes = 2;
        let (_dir, service) = indexed(3, config).await;

        let zero = QueryOptions {
            max_nodes: Some(0),
            ..QueryOptions::new("web")
        };
        assert_eq!(service.query_graph(&zero).unwrap_err().status_code(), 400);

        let huge = QueryOptions {
            max_nodes: Some(1_000),
            ..QueryOptions::new("web")
        };
        let data = service.query_graph(&huge).unwrap();
        assert_eq!(data.nodes.len(), 2);
        assert!(data.has_more);
    }

    #[tokio::test]
    async fn test_search_orders_and_limits() {
        let config = StrataConfig {
            search_limit: 2,
            ..StrataConfig::default()
        };
        let (_dir, service) = indexed(3, config).await;

        let hits = service.search_symbols("web", "handler").unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.display_name.as_str()).collect();
        assert_eq!(names, vec!["Handler0", "Handler1"]);
        assert_eq!(hits[0].kind, SymbolKind::Class);

        assert_eq!(
            service.search_symbols("web", "  ").unwrap_err().status_code(),
            400
        );
        assert!(service.search_symbols("web", "nothing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_references_and_info() {
        let (_dir, service) = indexed(3, StrataConfig::default()).await;

        let refs = service.find_references("web", NodeId(1)).unwrap();
        let roles: Vec<OccurrenceRole> = refs.iter().map(|o| o.role).collect();
        assert_eq!(roles, vec![OccurrenceRole::Declaration, OccurrenceRole::Reference]);
        assert!(refs[1].location.file.ends_with("f1.py"));

        let info = service.snapshot_info("web").unwrap();
        assert_eq!(info.stats.node_count, 6);
        assert_eq!(info.record.files_indexed, 3);
    }
}
