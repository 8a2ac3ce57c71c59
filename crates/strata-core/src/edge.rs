//! Reference edges between symbols.
//!
//! The set of reference kinds is closed. Adding one means touching every
//! match on it, which is the point.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an edge inside one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of relationship between two code entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Class A extends class B.
    Inheritance,

    /// Type implements an interface or trait.
    InterfaceImplementation,

    /// Function A calls function B.
    Call,

    /// A signature or body mentions a type.
    TypeUsage,

    /// Method overrides (or implements) a base declaration.
    Override,

    FieldAccess,
    PropertyAccess,
    EventAccess,

    /// Container relationship (type contains method).
    Containment,

    /// Module imports a symbol.
    Import,

    /// Type appears as a generic argument.
    TypeArgument,

    /// Attribute or decorator applied to a declaration.
    AttributeUsage,

    /// Constructor call or struct literal.
    Instantiation,

    Cast,
    Throw,
    Catch,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 16] = [
        Self::Inheritance,
        Self::InterfaceImplementation,
        Self::Call,
        Self::TypeUsage,
        Self::Override,
        Self::FieldAccess,
        Self::PropertyAccess,
        Self::EventAccess,
        Self::Containment,
        Self::Import,
        Self::TypeArgument,
        Self::AttributeUsage,
        Self::Instantiation,
        Self::Cast,
        Self::Throw,
        Self::Catch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inheritance => "inheritance",
            Self::InterfaceImplementation => "interface_implementation",
            Self::Call => "call",
            Self::TypeUsage => "type_usage",
            Self::Override => "override",
            Self::FieldAccess => "field_access",
            Self::PropertyAccess => "property_access",
            Self::EventAccess => "event_access",
            Self::Containment => "containment",
            Self::Import => "import",
            Self::TypeArgument => "type_argument",
            Self::AttributeUsage => "attribute_usage",
            Self::Instantiation => "instantiation",
            Self::Cast => "cast",
            Self::Throw => "throw",
            Self::Catch => "catch",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed reference from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: ReferenceKind,
}

impl CodeEdge {
    pub fn new(id: EdgeId, source: NodeId, target: NodeId, kind: ReferenceKind) -> Self {
        Self {
            id,
            source,
            target,
            kind,
        }
    }
}
