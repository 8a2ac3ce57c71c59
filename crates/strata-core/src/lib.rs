//! Strata Core - Fact model and source parsing
//!
//! This crate defines what an index is made of (symbols, references,
//! occurrences and source files) and how facts are pulled out of code.
//!
//! # Architecture
//!
//! - `SourceParser` is the seam the indexer calls per file.
//! - `TreeSitterParser` implements it for Rust and Python.
//! - `FileFacts` is the per-file output, addressed by file-local ids.
//!   The indexer translates those into snapshot-scoped `NodeId`s.
//!
//! # Example
//!
//! ```no_run
//! use strata_core::{SourceParser, TreeSitterParser};
//! use std::path::Path;
//!
//! let parser = TreeSitterParser::new();
//! let facts = parser.extract(Path::new("src/lib.rs")).unwrap();
//! for symbol in &facts.symbols {
//!     println!("{} ({})", symbol.serialized_name, symbol.kind);
//! }
//! ```

mod edge;
mod error;
mod extract;
mod facts;
mod languages;
mod node;
mod parser;

pub use edge::{CodeEdge, EdgeId, ReferenceKind};
pub use error::{ParseError, Result};
pub use extract::TreeSitterParser;
pub use facts::{FileFacts, LocalId, ReferenceFact, ReferenceTarget, SymbolFact};
pub use node::{
    CodeNode, Location, NodeId, Occurrence, OccurrenceRole, SourceFile, SymbolKind,
};
pub use parser::SourceParser;
