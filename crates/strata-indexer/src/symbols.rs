//! Snapshot-wide symbol table.
//!
//! Translates parser-local ids into snapshot `NodeId`s and resolves
//! cross-file references by name once every file has been seen.
//! Ids are handed out sequentially in file order, so an unchanged file set
//! always gets the same ids.

use std::collections::{HashMap, HashSet};
use strata_core::{
    CodeEdge, CodeNode, EdgeId, FileFacts, Location, NodeId, Occurrence, OccurrenceRole,
    ReferenceKind, ReferenceTarget, SourceFile, SymbolKind,
};
use strata_graph::FactBatch;

/// A by-name reference waiting for the whole symbol set.
#[derive(Debug, Clone)]
pub struct PendingReference {
    pub from: NodeId,
    pub name: String,
    pub kind: ReferenceKind,
    pub location: Location,
    pub context: Option<String>,
}

/// Output of translating one file.
#[derive(Debug, Default)]
pub struct Translation {
    pub batch: FactBatch,
    pub pending: Vec<PendingReference>,
    pub references: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    /// Deduplication key: serialized name + kind.
    by_key: HashMap<(String, SymbolKind), NodeId>,
    /// Serialized name to ids, ascending.
    by_serialized: HashMap<String, Vec<NodeId>>,
    /// Display name to ids, ascending.
    by_display: HashMap<String, Vec<NodeId>>,
    serialized_names: HashMap<NodeId, String>,
    edges: HashSet<(NodeId, NodeId, ReferenceKind)>,
    next_node: u32,
    next_edge: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.next_node as usize
    }

    pub fn edge_count(&self) -> usize {
        self.next_edge as usize
    }

    /// Checks that every local id in `facts` points inside the file and
    /// that parents precede their children.
    pub fn check(facts: &FileFacts) -> Result<(), String> {
        let count = facts.symbols.len();
        for (i, symbol) in facts.symbols.iter().enumerate() {
            if symbol.local_id != i {
                return Err(format!("symbol {} has local id {}", i, symbol.local_id));
            }
            if let Some(parent) = symbol.parent {
                if parent >= i {
                    return Err(format!("symbol {} declared before its parent {}", i, parent));
                }
            }
        }
        for reference in &facts.references {
            if reference.from >= count {
                return Err(format!("reference from unknown symbol {}", reference.from));
            }
            if let ReferenceTarget::Local(target) = reference.target {
                if target >= count {
                    return Err(format!("reference to unknown symbol {}", target));
                }
            }
        }
        Ok(())
    }

    /// Registers a file's symbols and intra-file references.
    ///
    /// `facts` must have passed [`SymbolTable::check`].
    pub fn translate(&mut self, facts: &FileFacts, file: SourceFile) -> Translation {
        let mut out = Translation::default();
        let mut local: Vec<NodeId> = Vec::with_capacity(facts.symbols.len());

        for symbol in &facts.symbols {
            let parent = symbol.parent.map(|p| local[p]);
            let key = (symbol.serialized_name.clone(), symbol.kind);

            let id = match self.by_key.get(&key) {
                Some(id) => *id,
                None => {
                    let id = NodeId(self.next_node);
                    self.next_node += 1;
                    self.by_key.insert(key, id);
                    self.by_serialized
                        .entry(symbol.serialized_name.clone())
                        .or_default()
                        .push(id);
                    self.by_display
                        .entry(symbol.display_name.clone())
                        .or_default()
                        .push(id);
                    self.serialized_names
                        .insert(id, symbol.serialized_name.clone());

                    let loc = &symbol.location;
                    let mut node = CodeNode::new(
                        id,
                        symbol.display_name.clone(),
                        symbol.serialized_name.clone(),
                        symbol.kind,
                        loc.file.clone(),
                    )
                    .with_position(loc.line_start, loc.column_start, loc.line_end);
                    if let Some(parent) = parent {
                        node = node.with_parent(parent);
                    }
                    if let Some(signature) = &symbol.signature {
                        node = node.with_signature(signature.clone());
                    }
                    out.batch.nodes.push(node);

                    if let Some(parent) = parent {
                        if let Some(edge) = self.edge(parent, id, ReferenceKind::Containment) {
                            out.batch.edges.push(edge);
                        }
                    }
                    id
                }
            };
            local.push(id);

            out.batch.occurrences.push(Occurrence {
                node: id,
                location: symbol.location.clone(),
                role: OccurrenceRole::Declaration,
                context: symbol.signature.clone(),
            });
        }

        for reference in &facts.references {
            let from = local[reference.from];
            match &reference.target {
                ReferenceTarget::Local(target) => {
                    let to = local[*target];
                    if let Some(edge) = self.edge(from, to, reference.kind) {
                        out.batch.edges.push(edge);
                        out.references += 1;
                    }
                    out.batch.occurrences.push(Occurrence {
                        node: to,
                        location: reference.location.clone(),
                        role: OccurrenceRole::Reference,
                        context: reference.context.clone(),
                    });
                }
                ReferenceTarget::Named(name) => out.pending.push(PendingReference {
                    from,
                    name: name.clone(),
                    kind: reference.kind,
                    location: reference.location.clone(),
                    context: reference.context.clone(),
                }),
            }
        }

        out.batch.files.push(file);
        out
    }

    /// Resolves a name against every registered symbol.
    ///
    /// Tries, in order: exact serialized name, a qualified suffix
    /// (`::name` or `.name`), then display name. Ties go to the lowest id.
    pub fn resolve(&self, name: &str) -> Option<NodeId> {
        if let Some(ids) = self.by_serialized.get(name) {
            return ids.first().copied();
        }

        let last = name.rsplit([':', '.']).next().unwrap_or(name);
        let rust_suffix = format!("::{}", name);
        let python_suffix = format!(".{}", name);
        let suffixed = self.by_display.get(last).and_then(|ids| {
            ids.iter().copied().find(|id| {
                self.serialized_names.get(id).is_some_and(|s| {
                    s.ends_with(&rust_suffix) || s.ends_with(&python_suffix)
                })
            })
        });
        if suffixed.is_some() {
            return suffixed;
        }

        self.by_display.get(name).and_then(|ids| ids.first().copied())
    }

    /// Resolves pending references into edges and occurrences.
    ///
    /// Returns the batch and the number of names that did not resolve.
    pub fn resolve_pending(&mut self, pending: Vec<PendingReference>) -> (FactBatch, usize, usize) {
        let mut batch = FactBatch::default();
        let mut unresolved = 0;
        let mut references = 0;

        for reference in pending {
            let Some(to) = self.resolve(&reference.name) else {
                unresolved += 1;
                continue;
            };
            if let Some(edge) = self.edge(reference.from, to, reference.kind) {
                batch.edges.push(edge);
                references += 1;
            }
            batch.occurrences.push(Occurrence {
                node: to,
                location: reference.location,
                role: OccurrenceRole::Reference,
                context: reference.context,
            });
        }

        (batch, references, unresolved)
    }

    /// Allocates an edge unless the same (source, target, kind) exists.
    fn edge(&mut self, source: NodeId, target: NodeId, kind: ReferenceKind) -> Option<CodeEdge> {
        if !self.edges.insert((source, target, kind)) {
            return None;
        }
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        Some(CodeEdge::new(id, source, target, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source_file(path: &str) -> SourceFile {
        SourceFile {
            path: path.into(),
            content_hash: "0".into(),
            language: "rust".into(),
            indexed_at: Utc::now(),
        }
    }

    fn facts(file: &str, symbols: &[(&str, &str, SymbolKind, Option<usize>)]) -> FileFacts {
        let mut facts = FileFacts::new("rust");
        for (serialized, display, kind, parent) in symbols {
            facts.push_symbol(*serialized, *display, *kind, Location::new(file, 1, 0), *parent);
        }
        facts
    }

    #[test]
    fn test_translate_assigns_sequential_ids_and_containment() {
        let mut table = SymbolTable::new();
        let f = facts(
            "a.rs",
            &[
                ("app", "app", SymbolKind::Module, None),
                ("app::Store", "Store", SymbolKind::Struct, Some(0)),
            ],
        );
        let t = table.translate(&f, source_file("a.rs"));

        let ids: Vec<u32> = t.batch.nodes.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(t.batch.nodes[1].parent, Some(NodeId(0)));
        assert_eq!(t.batch.edges.len(), 1);
        assert_eq!(t.batch.edges[0].kind, ReferenceKind::Containment);
        assert_eq!(t.batch.occurrences.len(), 2);
    }

    #[test]
    fn test_same_name_and_kind_deduplicates_across_files() {
        let mut table = SymbolTable::new();
        let first = facts("lib.rs", &[("app::store", "store", SymbolKind::Module, None)]);
        let second = facts(
            "store.rs",
            &[
                ("app::store", "store", SymbolKind::Module, None),
                ("app::store", "store", SymbolKind::Function, None),
            ],
        );

        table.translate(&first, source_file("lib.rs"));
        let t = table.translate(&second, source_file("store.rs"));

        // The module is reused; a function with the same name is not.
        assert_eq!(t.batch.nodes.len(), 1);
        assert_eq!(t.batch.nodes[0].kind, SymbolKind::Function);
        assert_eq!(table.node_count(), 2);
    }

    #[test]
    fn test_resolution_order() {
        let mut table = SymbolTable::new();
        let f = facts(
            "a.rs",
            &[
                ("app", "app", SymbolKind::Module, None),
                ("app::shapes::Shape", "Shape", SymbolKind::Interface, Some(0)),
                ("app::shapes::Shape::area", "area", SymbolKind::Method, Some(1)),
                ("other::area", "area", SymbolKind::Function, Some(0)),
                ("pkg.handlers.area", "area", SymbolKind::Function, Some(0)),
            ],
        );
        table.translate(&f, source_file("a.rs"));

        assert_eq!(table.resolve("other::area"), Some(NodeId(3)));
        assert_eq!(table.resolve("Shape::area"), Some(NodeId(2)));
        assert_eq!(table.resolve("handlers.area"), Some(NodeId(4)));
        assert_eq!(table.resolve("area"), Some(NodeId(2)));
        assert_eq!(table.resolve("missing"), None);
    }

    #[test]
    fn test_pending_references_collapse_duplicates() {
        let mut table = SymbolTable::new();
        let mut f = facts(
            "a.rs",
            &[
                ("app", "app", SymbolKind::Module, None),
                ("app::run", "run", SymbolKind::Function, Some(0)),
            ],
        );
        for line in [3, 4] {
            f.push_reference(
                1,
                ReferenceTarget::Named("helper".into()),
                ReferenceKind::Call,
                Location::new("a.rs", line, 4),
            );
        }
        f.push_reference(
            1,
            ReferenceTarget::Named("nowhere".into()),
            ReferenceKind::Call,
            Location::new("a.rs", 5, 4),
        );
        let t = table.translate(&f, source_file("a.rs"));
        assert_eq!(t.pending.len(), 3);

        let g = facts("b.rs", &[("util::helper", "helper", SymbolKind::Function, None)]);
        table.translate(&g, source_file("b.rs"));

        let (batch, references, unresolved) = table.resolve_pending(t.pending);
        assert_eq!(batch.edges.len(), 1);
        assert_eq!(references, 1);
        assert_eq!(batch.occurrences.len(), 2);
        assert_eq!(unresolved, 1);
    }

    #[test]
    fn test_check_rejects_bad_local_ids() {
        let mut f = facts("a.rs", &[("app", "app", SymbolKind::Module, None)]);
        assert!(SymbolTable::check(&f).is_ok());

        f.push_reference(
            0,
            ReferenceTarget::Local(7),
            ReferenceKind::Call,
            Location::new("a.rs", 1, 0),
        );
        assert!(SymbolTable::check(&f).is_err());
    }
}
