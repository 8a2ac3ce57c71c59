//! Raw per-file facts produced by a source parser.
//!
//! Identifiers here are parser-local: they are only meaningful inside the
//! `FileFacts` that carries them. The indexer translates them into snapshot
//! identities.

use crate::edge::ReferenceKind;
use crate::node::{Location, SymbolKind};
use serde::{Deserialize, Serialize};

/// Index of a symbol inside `FileFacts::symbols`.
pub type LocalId = usize;

/// A declared symbol as seen by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFact {
    pub local_id: LocalId,
    pub serialized_name: String,
    pub display_name: String,
    pub kind: SymbolKind,
    pub location: Location,
    pub signature: Option<String>,
    /// Containing symbol in the same file. Always emitted before the child.
    pub parent: Option<LocalId>,
}

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceTarget {
    /// A symbol declared in the same file.
    Local(LocalId),
    /// A name to resolve against the whole snapshot once all files are in.
    Named(String),
}

/// A typed use of one symbol by another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFact {
    pub from: LocalId,
    pub target: ReferenceTarget,
    pub kind: ReferenceKind,
    pub location: Location,
    pub context: Option<String>,
}

/// Everything the parser extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFacts {
    pub language: String,
    pub symbols: Vec<SymbolFact>,
    pub references: Vec<ReferenceFact>,
    /// Extraction problems. A non-empty list marks the whole file as failed.
    pub errors: Vec<String>,
}

impl FileFacts {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    /// Appends a symbol and returns its local id.
    pub fn push_symbol(
        &mut self,
        serialized_name: impl Into<String>,
        display_name: impl Into<String>,
        kind: SymbolKind,
        location: Location,
        parent: Option<LocalId>,
    ) -> LocalId {
        let local_id = self.symbols.len();
        self.symbols.push(SymbolFact {
            local_id,
            serialized_name: serialized_name.into(),
            display_name: display_name.into(),
            kind,
            location,
            signature: None,
            parent,
        });
        local_id
    }

    pub fn push_reference(
        &mut self,
        from: LocalId,
        target: ReferenceTarget,
        kind: ReferenceKind,
        location: Location,
    ) {
        self.references.push(ReferenceFact {
            from,
            target,
            kind,
            location,
            context: None,
        });
    }

    pub fn is_failed(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_symbol_assigns_sequential_local_ids() {
        let mut facts = FileFacts::new("rust");
        let a = facts.push_symbol("m", "m", SymbolKind::Module, Location::new("a.rs", 1, 0), None);
        let b = facts.push_symbol(
            "m::f",
            "f",
            SymbolKind::Function,
            Location::new("a.rs", 2, 0),
            Some(a),
        );
        assert_eq!((a, b), (0, 1));
        assert_eq!(facts.symbols[1].parent, Some(0));
        assert!(!facts.is_failed());
    }
}
