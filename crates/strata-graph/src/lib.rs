//! Strata Graph - Versioned snapshots and bounded queries
//!
//! This crate owns every indexed version of a repository. Indexers write
//! into unsealed snapshots; queries only ever see sealed ones.
//!
//! # Architecture
//!
//! A snapshot is a petgraph arena with additional indexes for:
//! - Node-id lookups (snapshot-scoped `NodeId` to graph index)
//! - Substring search over display and serialized names
//!
//! The `SnapshotStore` hands sealed snapshots out as `Arc<Snapshot>`, so a
//! query keeps a consistent view even while the next version is promoted.
//!
//! # Example
//!
//! ```no_run
//! use strata_graph::{GraphQuery, SnapshotStore};
//! use strata_core::NodeId;
//!
//! let store = SnapshotStore::new();
//! if let Some(snapshot) = store.latest_sealed("web") {
//!     let data = snapshot
//!         .query(&GraphQuery {
//!             root_node_id: Some(NodeId::new(0)),
//!             max_depth: 2,
//!             max_nodes: 100,
//!             ..GraphQuery::default()
//!         })
//!         .unwrap();
//!     println!("{} nodes, more: {}", data.nodes.len(), data.has_more);
//! }
//! ```

mod archive;
mod query;
mod search;
mod snapshot;
mod store;

pub use archive::SnapshotArchive;
pub use query::{GraphData, GraphQuery, QueryError, TraversalDirection};
pub use search::SearchIndex;
pub use snapshot::{
    FactBatch, FileError, GraphStats, IndexedRepository, IndexingStats, RepositoryId, Snapshot,
    SnapshotId, SnapshotSource, SnapshotStatus,
};
pub use store::{DataIntegrityError, SnapshotStore, StoreError};
