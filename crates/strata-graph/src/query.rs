//! Bounded graph queries over a sealed snapshot.
//!
//! Traversal is breadth-first, one level at a time, with each level sorted
//! by `NodeId`. Budgets are checked node by node: a node is admitted only if
//! it fits under `max_nodes` together with every edge it induces against the
//! nodes already admitted. The first node that does not fit ends the query.

use crate::snapshot::Snapshot;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use strata_core::{CodeEdge, CodeNode, NodeId, Occurrence, SymbolKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no sealed snapshot for repository {0}")]
    NoSnapshot(String),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("invalid query: {0}")]
    Validation(String),
}

/// Which edges a traversal follows out of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalDirection {
    /// Follow edges from source to target.
    #[default]
    Outgoing,
    /// Follow edges backwards, towards whatever references the node.
    Incoming,
    Both,
}

impl std::str::FromStr for TraversalDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "outgoing" | "out" => Ok(Self::Outgoing),
            "incoming" | "in" => Ok(Self::Incoming),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Shape and budget of a subgraph request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphQuery {
    pub root_node_id: Option<NodeId>,
    pub max_depth: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub include_members: bool,
    /// Prefix on the serialized name.
    pub namespace_filter: Option<String>,
    pub symbol_kind_filter: Option<BTreeSet<SymbolKind>>,
    pub direction: TraversalDirection,
}

impl Default for GraphQuery {
    fn default() -> Self {
        Self {
            root_node_id: None,
            max_depth: 2,
            max_nodes: 100,
            max_edges: 500,
            include_members: false,
            namespace_filter: None,
            symbol_kind_filter: None,
            direction: TraversalDirection::Outgoing,
        }
    }
}

impl GraphQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.max_nodes == 0 {
            return Err(QueryError::Validation("maxNodes must be at least 1".into()));
        }
        if self.max_edges == 0 {
            return Err(QueryError::Validation("maxEdges must be at least 1".into()));
        }
        Ok(())
    }

    fn admits(&self, node: &CodeNode) -> bool {
        if !self.include_members && node.kind.is_member() {
            return false;
        }
        if let Some(prefix) = &self.namespace_filter {
            if !node.serialized_name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.symbol_kind_filter {
            if !kinds.contains(&node.kind) {
                return false;
            }
        }
        true
    }
}

/// A bounded subgraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphData {
    /// Nodes in admission order: level by level, ascending id within a level.
    pub nodes: Vec<CodeNode>,
    /// Every edge between returned nodes, ordered by id.
    pub edges: Vec<CodeEdge>,
    /// More nodes were reachable than the budgets or depth allowed.
    pub has_more: bool,
}

struct Collector<'s> {
    snapshot: &'s Snapshot,
    admitted: Vec<NodeId>,
    admitted_set: HashSet<NodeId>,
    edge_count: usize,
}

impl<'s> Collector<'s> {
    /// Edges between `id` and admitted nodes (self-loops included).
    fn induced_edges(&self, id: NodeId) -> usize {
        let Some(index) = self.snapshot.index_of(id) else {
            return 0;
        };
        let outgoing = self
            .snapshot
            .edges_of(index, Direction::Outgoing)
            .filter(|(_, e)| e.target == id || self.admitted_set.contains(&e.target))
            .count();
        let incoming = self
            .snapshot
            .edges_of(index, Direction::Incoming)
            .filter(|(_, e)| e.source != id && self.admitted_set.contains(&e.source))
            .count();
        outgoing + incoming
    }

    fn try_admit(&mut self, id: NodeId, query: &GraphQuery) -> bool {
        if self.admitted.len() >= query.max_nodes {
            return false;
        }
        let induced = self.induced_edges(id);
        if self.edge_count + induced > query.max_edges {
            return false;
        }
        self.edge_count += induced;
        self.admitted.push(id);
        self.admitted_set.insert(id);
        true
    }

    /// Unvisited neighbors of `level` that pass the filters, ascending.
    fn next_level(
        &self,
        level: &[NodeId],
        query: &GraphQuery,
        visited: &mut HashSet<NodeId>,
    ) -> Vec<NodeId> {
        let directions: &[Direction] = match query.direction {
            TraversalDirection::Outgoing => &[Direction::Outgoing],
            TraversalDirection::Incoming => &[Direction::Incoming],
            TraversalDirection::Both => &[Direction::Outgoing, Direction::Incoming],
        };

        let mut next = BTreeSet::new();
        for id in level {
            let Some(index) = self.snapshot.index_of(*id) else {
                continue;
            };
            for direction in directions {
                for (other, _) in self.snapshot.edges_of(index, *direction) {
                    let Some(node) = self.snapshot.graph.node_weight(other) else {
                        continue;
                    };
                    if !visited.contains(&node.id) && query.admits(node) {
                        next.insert(node.id);
                    }
                }
            }
        }
        visited.extend(next.iter().copied());
        next.into_iter().collect()
    }

    fn finish(self, has_more: bool) -> GraphData {
        let nodes = self
            .admitted
            .iter()
            .filter_map(|id| self.snapshot.node(*id).cloned())
            .collect();
        let mut edges: Vec<CodeEdge> = self
            .snapshot
            .edges()
            .filter(|e| self.admitted_set.contains(&e.source) && self.admitted_set.contains(&e.target))
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.id);

        GraphData {
            nodes,
            edges,
            has_more,
        }
    }
}

impl Snapshot {
    /// Answers a bounded subgraph query.
    pub fn query(&self, query: &GraphQuery) -> Result<GraphData, QueryError> {
        query.validate()?;

        let mut visited = HashSet::new();
        let mut level: Vec<NodeId> = match query.root_node_id {
            Some(root) => {
                if !self.contains_node(root) {
                    return Err(QueryError::NodeNotFound(root));
                }
                vec![root]
            }
            None => {
                let mut roots: Vec<NodeId> = self
                    .nodes()
                    .filter(|n| n.is_top_level() && query.admits(n))
                    .map(|n| n.id)
                    .collect();
                roots.sort();
                roots
            }
        };
        visited.extend(level.iter().copied());

        let mut collector = Collector {
            snapshot: self,
            admitted: Vec::new(),
            admitted_set: HashSet::new(),
            edge_count: 0,
        };

        let mut depth = 0;
        loop {
            for id in &level {
                if !collector.try_admit(*id, query) {
                    return Ok(collector.finish(true));
                }
            }

            let next = collector.next_level(&level, query, &mut visited);
            if next.is_empty() {
                return Ok(collector.finish(false));
            }
            if depth >= query.max_depth {
                return Ok(collector.finish(true));
            }
            level = next;
            depth += 1;
        }
    }

    /// Nodes whose serialized or display name contains `term`,
    /// ordered by display name then id.
    pub fn search(&self, term: &str, limit: usize) -> Vec<&CodeNode> {
        let mut hits: Vec<&CodeNode> = self
            .search_index()
            .search(term)
            .into_iter()
            .filter_map(|id| self.node(id))
            .collect();
        hits.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Every recorded occurrence of a node, ordered by file, line and column.
    pub fn find_references(&self, id: NodeId) -> Result<Vec<&Occurrence>, QueryError> {
        if !self.contains_node(id) {
            return Err(QueryError::NodeNotFound(id));
        }
        let mut found: Vec<&Occurrence> =
            self.occurrences().iter().filter(|o| o.node == id).collect();
        found.sort_by(|a, b| {
            a.location
                .file
                .cmp(&b.location.file)
                .then_with(|| a.location.line_start.cmp(&b.location.line_start))
                .then_with(|| a.location.column_start.cmp(&b.location.column_start))
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FactBatch, IndexedRepository, SnapshotId, SnapshotSource};
    use strata_core::{EdgeId, Location, OccurrenceRole, ReferenceKind};

    struct Builder {
        nodes: Vec<CodeNode>,
        edges: Vec<CodeEdge>,
        occurrences: Vec<Occurrence>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                nodes: Vec::new(),
                edges: Vec::new(),
                occurrences: Vec::new(),
            }
        }

        fn node(mut self, name: &str, kind: SymbolKind, parent: Option<u32>) -> Self {
            let id = NodeId(self.nodes.len() as u32);
            let serialized = match parent {
                Some(p) => format!("{}::{}", self.nodes[p as usize].serialized_name, name),
                None => format!("app::{}", name),
            };
            let mut node = CodeNode::new(id, name, serialized, kind, "lib.rs");
            if let Some(p) = parent {
                node = node.with_parent(NodeId(p));
                self = self.edge(p, id.0, ReferenceKind::Containment);
            }
            self.nodes.push(node);
            self
        }

        fn edge(mut self, from: u32, to: u32, kind: ReferenceKind) -> Self {
            let id = EdgeId(self.edges.len() as u32);
            self.edges.push(CodeEdge::new(id, NodeId(from), NodeId(to), kind));
            self
        }

        fn occurrence(mut self, node: u32, file: &str, line: u32) -> Self {
            self.occurrences.push(Occurrence {
                node: NodeId(node),
                location: Location::new(file, line, 4),
                role: OccurrenceRole::Reference,
                context: None,
            });
            self
        }

        fn build(self) -> Snapshot {
            let record =
                IndexedRepository::new(SnapshotId(1), "web".into(), SnapshotSource::new("/src"));
            let mut snapshot = Snapshot::new(record);
            // Nodes first so every edge endpoint resolves.
            snapshot.apply(FactBatch {
                nodes: self.nodes,
                ..FactBatch::default()
            });
            snapshot.apply(FactBatch {
                edges: self.edges,
                occurrences: self.occurrences,
                ..FactBatch::default()
            });
            snapshot.build_search_index();
            snapshot
        }
    }

    /// Root module 0 with eight struct children 1..=8, and one grandchild 9.
    fn fan_out() -> Snapshot {
        let mut b = Builder::new().node("root", SymbolKind::Module, None);
        for i in 0..8 {
            b = b.node(&format!("Child{}", i), SymbolKind::Struct, Some(0));
        }
        b.node("Deep", SymbolKind::Struct, Some(1)).build()
    }

    fn ids(data: &GraphData) -> Vec<u32> {
        data.nodes.iter().map(|n| n.id.0).collect()
    }

    #[test]
    fn test_root_with_eight_children_truncates_at_five() {
        let snapshot = fan_out();
        let data = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                max_depth: 2,
                max_nodes: 5,
                ..GraphQuery::default()
            })
            .unwrap();

        assert_eq!(ids(&data), vec![0, 1, 2, 3, 4]);
        assert!(data.has_more);
        assert_eq!(data.edges.len(), 4);
        assert!(data
            .edges
            .iter()
            .all(|e| e.source == NodeId(0) && e.kind == ReferenceKind::Containment));
    }

    #[test]
    fn test_full_traversal_has_no_more() {
        let snapshot = fan_out();
        let data = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                max_depth: 5,
                ..GraphQuery::default()
            })
            .unwrap();

        assert_eq!(data.nodes.len(), 10);
        assert_eq!(data.edges.len(), 9);
        assert!(!data.has_more);
    }

    #[test]
    fn test_depth_limit_sets_has_more() {
        let snapshot = fan_out();
        let query = GraphQuery {
            root_node_id: Some(NodeId(0)),
            max_depth: 1,
            ..GraphQuery::default()
        };
        let data = snapshot.query(&query).unwrap();
        assert_eq!(data.nodes.len(), 9);
        assert!(data.has_more);

        // Depth 1 from a leaf reaches nothing further.
        let leaf = GraphQuery {
            root_node_id: Some(NodeId(9)),
            ..query
        };
        let data = snapshot.query(&leaf).unwrap();
        assert_eq!(ids(&data), vec![9]);
        assert!(!data.has_more);
    }

    #[test]
    fn test_edge_budget_stops_collection() {
        let snapshot = fan_out();
        let data = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                max_edges: 3,
                ..GraphQuery::default()
            })
            .unwrap();

        assert_eq!(ids(&data), vec![0, 1, 2, 3]);
        assert_eq!(data.edges.len(), 3);
        assert!(data.has_more);
    }

    #[test]
    fn test_members_excluded_unless_requested() {
        let snapshot = Builder::new()
            .node("Store", SymbolKind::Struct, None)
            .node("insert", SymbolKind::Method, Some(0))
            .node("Item", SymbolKind::Struct, Some(0))
            .build();

        let skeletal = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                ..GraphQuery::default()
            })
            .unwrap();
        assert_eq!(ids(&skeletal), vec![0, 2]);

        let full = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                include_members: true,
                ..GraphQuery::default()
            })
            .unwrap();
        assert_eq!(ids(&full), vec![0, 1, 2]);
    }

    #[test]
    fn test_rootless_query_seeds_top_level_nodes() {
        let snapshot = Builder::new()
            .node("alpha", SymbolKind::Module, None)
            .node("beta", SymbolKind::Module, None)
            .node("Gamma", SymbolKind::Struct, Some(0))
            .build();

        let data = snapshot
            .query(&GraphQuery {
                max_depth: 0,
                ..GraphQuery::default()
            })
            .unwrap();
        assert_eq!(ids(&data), vec![0, 1]);
        assert!(data.has_more);

        let filtered = snapshot
            .query(&GraphQuery {
                namespace_filter: Some("app::beta".into()),
                ..GraphQuery::default()
            })
            .unwrap();
        assert_eq!(ids(&filtered), vec![1]);
        assert!(!filtered.has_more);
    }

    #[test]
    fn test_kind_filter_and_incoming_direction() {
        let snapshot = Builder::new()
            .node("Shape", SymbolKind::Interface, None)
            .node("Square", SymbolKind::Struct, None)
            .node("draw", SymbolKind::Function, None)
            .edge(1, 0, ReferenceKind::InterfaceImplementation)
            .edge(2, 0, ReferenceKind::TypeUsage)
            .build();

        let data = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                direction: TraversalDirection::Incoming,
                symbol_kind_filter: Some([SymbolKind::Struct].into_iter().collect()),
                ..GraphQuery::default()
            })
            .unwrap();
        assert_eq!(ids(&data), vec![0, 1]);
        assert_eq!(data.edges.len(), 1);

        let outgoing = snapshot
            .query(&GraphQuery {
                root_node_id: Some(NodeId(0)),
                ..GraphQuery::default()
            })
            .unwrap();
        assert_eq!(ids(&outgoing), vec![0]);
    }

    #[test]
    fn test_query_validation_and_unknown_root() {
        let snapshot = fan_out();
        let zero_nodes = GraphQuery {
            max_nodes: 0,
            ..GraphQuery::default()
        };
        assert!(matches!(
            snapshot.query(&zero_nodes),
            Err(QueryError::Validation(_))
        ));

        let unknown = GraphQuery {
            root_node_id: Some(NodeId(99)),
            ..GraphQuery::default()
        };
        assert_eq!(
            snapshot.query(&unknown),
            Err(QueryError::NodeNotFound(NodeId(99)))
        );
    }

    #[test]
    fn test_query_is_deterministic() {
        let snapshot = fan_out();
        let query = GraphQuery {
            root_node_id: Some(NodeId(0)),
            max_nodes: 6,
            ..GraphQuery::default()
        };
        assert_eq!(snapshot.query(&query), snapshot.query(&query));
    }

    #[test]
    fn test_search_handler_orders_by_name_then_id() {
        let snapshot = Builder::new()
            .node("handlers", SymbolKind::Module, None)
            .node("RequestHandler", SymbolKind::Class, Some(0))
            .node("Router", SymbolKind::Class, None)
            .node("ClickHandler", SymbolKind::Class, None)
            .node("ClickHandler", SymbolKind::Class, None)
            .build();

        let names: Vec<(String, u32)> = snapshot
            .search("Handler", 50)
            .into_iter()
            .map(|n| (n.display_name.clone(), n.id.0))
            .collect();

        // `handlers` matches by name; `RequestHandler` also sits under it.
        assert_eq!(
            names,
            vec![
                ("ClickHandler".to_string(), 3),
                ("ClickHandler".to_string(), 4),
                ("RequestHandler".to_string(), 1),
                ("handlers".to_string(), 0),
            ]
        );
        assert_eq!(snapshot.search("handler", 2).len(), 2);
    }

    #[test]
    fn test_find_references_sorted_by_location() {
        let snapshot = Builder::new()
            .node("Store", SymbolKind::Struct, None)
            .occurrence(0, "b.rs", 3)
            .occurrence(0, "a.rs", 9)
            .occurrence(0, "a.rs", 2)
            .build();

        let found: Vec<(String, u32)> = snapshot
            .find_references(NodeId(0))
            .unwrap()
            .into_iter()
            .map(|o| (o.location.file.clone(), o.location.line_start))
            .collect();
        assert_eq!(
            found,
            vec![
                ("a.rs".to_string(), 2),
                ("a.rs".to_string(), 9),
                ("b.rs".to_string(), 3)
            ]
        );
        assert!(snapshot.find_references(NodeId(5)).is_err());
    }
}
