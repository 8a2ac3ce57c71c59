//! Symbol nodes and their locations.
//!
//! A `CodeNode` is one declared entity (type, method, field, ...) inside a
//! snapshot. Nodes refer to their container through a plain `NodeId`, never
//! through ownership, so a snapshot can be dropped in one piece.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a node inside one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Namespace,
    Module,
    Class,
    Struct,
    Enum,
    /// Interfaces and traits.
    Interface,
    Function,
    Method,
    Field,
    Property,
    Event,
    Constant,
    EnumMember,
    TypeAlias,
}

impl SymbolKind {
    /// Members hang off a type and are left out of skeletal graphs.
    pub fn is_member(self) -> bool {
        matches!(
            self,
            Self::Method | Self::Field | Self::Property | Self::Event | Self::EnumMember
        )
    }

    /// Returns true for kinds that can contain other declarations.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Namespace
                | Self::Module
                | Self::Class
                | Self::Struct
                | Self::Enum
                | Self::Interface
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Module => "module",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Interface => "interface",
            Self::Function => "function",
            Self::Method => "method",
            Self::Field => "field",
            Self::Property => "property",
            Self::Event => "event",
            Self::Constant => "constant",
            Self::EnumMember => "enum_member",
            Self::TypeAlias => "type_alias",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "namespace" => Self::Namespace,
            "module" | "mod" => Self::Module,
            "class" => Self::Class,
            "struct" => Self::Struct,
            "enum" => Self::Enum,
            "interface" | "trait" => Self::Interface,
            "function" | "fn" => Self::Function,
            "method" => Self::Method,
            "field" => Self::Field,
            "property" => Self::Property,
            "event" => Self::Event,
            "constant" | "const" => Self::Constant,
            "enum_member" | "variant" => Self::EnumMember,
            "type_alias" => Self::TypeAlias,
            other => return Err(format!("unknown symbol kind '{}'", other)),
        };
        Ok(kind)
    }
}

/// A span inside a source file. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line_start: u32,
    pub column_start: u32,
    pub line_end: u32,
    pub column_end: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line_start: line,
            column_start: column,
            line_end: line,
            column_end: column,
        }
    }

    pub fn with_end(mut self, line: u32, column: u32) -> Self {
        self.line_end = line;
        self.column_end = column;
        self
    }
}

/// A symbol declaration in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeNode {
    pub id: NodeId,

    /// Fully qualified name, e.g. `graph::store::SnapshotStore::seal`.
    pub serialized_name: String,

    /// Short name shown in UIs, e.g. `seal`.
    pub display_name: String,

    pub kind: SymbolKind,

    /// File that declares the symbol (first declaration site).
    pub file: String,

    pub line: u32,
    pub column: u32,
    pub line_end: u32,

    /// First line of the declaration, if the parser captured it.
    pub signature: Option<String>,

    /// Containing node. A lookup key, not an owner.
    pub parent: Option<NodeId>,
}

impl CodeNode {
    pub fn new(
        id: NodeId,
        display_name: impl Into<String>,
        serialized_name: impl Into<String>,
        kind: SymbolKind,
        file: impl Into<String>,
    ) -> Self {
        Self {
            id,
            serialized_name: serialized_name.into(),
            display_name: display_name.into(),
            kind,
            file: file.into(),
            line: 0,
            column: 0,
            line_end: 0,
            signature: None,
            parent: None,
        }
    }

    pub fn with_position(mut self, line: u32, column: u32, line_end: u32) -> Self {
        self.line = line;
        self.column = column;
        self.line_end = line_end;
        self
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}

/// Whether an occurrence declares the node or uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceRole {
    Declaration,
    Reference,
}

/// A concrete site where a node appears in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub node: NodeId,
    pub location: Location,
    pub role: OccurrenceRole,
    /// The trimmed source line around the site.
    pub context: Option<String>,
}

/// A source file that contributed facts to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    /// blake3 hex digest of the file content.
    pub content_hash: String,
    pub language: String,
    pub indexed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_kinds() {
        assert!(SymbolKind::Method.is_member());
        assert!(SymbolKind::Field.is_member());
        assert!(SymbolKind::Property.is_member());
        assert!(!SymbolKind::Class.is_member());
        assert!(!SymbolKind::Function.is_member());
    }

    #[test]
    fn test_kind_from_str_aliases() {
        assert_eq!("trait".parse::<SymbolKind>(), Ok(SymbolKind::Interface));
        assert_eq!("Struct".parse::<SymbolKind>(), Ok(SymbolKind::Struct));
        assert!("widget".parse::<SymbolKind>().is_err());
    }

    #[test]
    fn test_node_id_serializes_as_number() {
        let json = serde_json::to_string(&NodeId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
