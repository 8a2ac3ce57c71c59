//! Tree-sitter front-end.
//!
//! `TreeSitterParser` turns Rust and Python files into `FileFacts`. Each file
//! contributes one module symbol at the root; everything else hangs off it.
//! References are emitted by name and bound to local symbols at the end of
//! the walk when the name is unambiguous in the file.

use crate::edge::ReferenceKind;
use crate::error::{ParseError, Result};
use crate::facts::{FileFacts, LocalId, ReferenceTarget};
use crate::languages::{python, rust};
use crate::node::{Location, SymbolKind};
use crate::parser::SourceParser;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

/// Longest signature kept on a node.
const MAX_SIGNATURE_LEN: usize = 160;

/// Names that never resolve to a declared symbol.
const IGNORED_NAMES: &[&str] = &["self", "Self", "super", "crate", "cls"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    Rust,
    Python,
}

impl Lang {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
        }
    }

    fn grammar(self) -> Language {
        match self {
            Self::Rust => tree_sitter_rust::language(),
            Self::Python => tree_sitter_python::language(),
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Self::Rust => "::",
            Self::Python => ".",
        }
    }
}

/// Source parser backed by tree-sitter grammars.
///
/// A fresh `tree_sitter::Parser` is created per file, so one instance can
/// serve any number of concurrent indexing jobs.
#[derive(Debug, Default, Clone)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses source code directly (for testing or in-memory content).
    pub fn parse_source(&self, source: &str, path: &Path) -> Result<FileFacts> {
        let lang =
            Lang::from_path(path).ok_or_else(|| ParseError::UnsupportedLanguage(path.into()))?;

        let mut parser = Parser::new();
        parser
            .set_language(&lang.grammar())
            .map_err(|e| ParseError::ParserError(format!("Failed to set language: {}", e)))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ParseError::ParserError("Tree-sitter returned no tree".into()))?;

        let root = tree.root_node();
        if root.has_error() {
            debug!("syntax errors in {}, extracting what parses", path.display());
        }

        let file = path.to_string_lossy().to_string();
        let mut x = Extraction::new(source, file, lang.name(), lang.separator());

        match lang {
            Lang::Rust => {
                let module = rust::ModulePath::from_file(path);
                let scope = x.declare_root(&module.segments, root);
                x.crate_name = module.crate_name;
                rust::extract(&mut x, root, &scope);
            }
            Lang::Python => {
                let module = python::module_segments(path);
                let scope = x.declare_root(&module, root);
                x.package = python::package_of(path, &module);
                python::extract(&mut x, root, &scope);
            }
        }

        Ok(x.finish())
    }
}

impl SourceParser for TreeSitterParser {
    fn supports(&self, path: &Path) -> bool {
        Lang::from_path(path).is_some()
    }

    fn extract(&self, path: &Path) -> Result<FileFacts> {
        let source = fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
        self.parse_source(&source, path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction context
// ─────────────────────────────────────────────────────────────────────────────

/// Where declarations currently land.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub id: LocalId,
    /// Serialized name of the enclosing symbol.
    pub prefix: String,
    /// Functions declared here are methods.
    pub in_type: bool,
    /// Trait or base being implemented; methods override its members.
    pub implementing: Option<String>,
}

impl Scope {
    pub fn enter(&self, id: LocalId, prefix: impl Into<String>) -> Self {
        Self {
            id,
            prefix: prefix.into(),
            in_type: false,
            implementing: None,
        }
    }

    pub fn as_type(mut self) -> Self {
        self.in_type = true;
        self
    }
}

/// Per-file walking state shared by the language walkers.
pub(crate) struct Extraction<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    file: String,
    separator: &'static str,
    /// Rust: the crate's name, substituted for `crate::` paths.
    pub crate_name: String,
    /// Python: dotted package used to anchor relative imports.
    pub package: String,
    facts: FileFacts,
}

impl<'a> Extraction<'a> {
    fn new(source: &'a str, file: String, language: &str, separator: &'static str) -> Self {
        Self {
            source,
            lines: source.lines().collect(),
            file,
            separator,
            crate_name: String::new(),
            package: String::new(),
            facts: FileFacts::new(language),
        }
    }

    pub fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    pub fn field_text(&self, node: Node<'_>, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field)
            .map(|n| self.text(n))
            .filter(|t| !t.is_empty())
    }

    pub fn qualify(&self, prefix: &str, name: &str) -> String {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", prefix, self.separator, name)
        }
    }

    pub fn serialized(&self, id: LocalId) -> &str {
        &self.facts.symbols[id].serialized_name
    }

    fn location(&self, node: Node<'_>) -> Location {
        let start = node.start_position();
        let end = node.end_position();
        Location::new(self.file.clone(), start.row as u32 + 1, start.column as u32)
            .with_end(end.row as u32 + 1, end.column as u32)
    }

    fn line_context(&self, node: Node<'_>) -> Option<String> {
        self.lines
            .get(node.start_position().row)
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
    }

    fn declare_root(&mut self, segments: &[String], root: Node<'_>) -> Scope {
        let serialized = segments.join(self.separator);
        let display = segments.last().cloned().unwrap_or_default();
        let id = self.facts.push_symbol(
            serialized.clone(),
            display,
            SymbolKind::Module,
            self.location(root),
            None,
        );
        Scope {
            id,
            prefix: serialized,
            in_type: false,
            implementing: None,
        }
    }

    /// Declares a symbol named `name` inside `scope`.
    pub fn declare(&mut self, name: &str, kind: SymbolKind, node: Node<'_>, scope: &Scope) -> LocalId {
        let serialized = self.qualify(&scope.prefix, name);
        self.declare_qualified(name, serialized, kind, node, scope.id)
    }

    pub fn declare_qualified(
        &mut self,
        name: &str,
        serialized: String,
        kind: SymbolKind,
        node: Node<'_>,
        parent: LocalId,
    ) -> LocalId {
        let location = self.location(node);
        let id = self
            .facts
            .push_symbol(serialized, name, kind, location, Some(parent));

        let signature = self
            .text(node)
            .lines()
            .next()
            .map(|l| l.trim().trim_end_matches('{').trim_end())
            .filter(|l| !l.is_empty())
            .map(|l| l.chars().take(MAX_SIGNATURE_LEN).collect::<String>());
        self.facts.symbols[id].signature = signature;
        id
    }

    /// Emits a reference by name from `from`.
    pub fn reference(&mut self, from: LocalId, name: &str, kind: ReferenceKind, node: Node<'_>) {
        let name = name.trim();
        if name.is_empty() || IGNORED_NAMES.contains(&name) {
            return;
        }
        let location = self.location(node);
        let context = self.line_context(node);
        self.facts
            .push_reference(from, ReferenceTarget::Named(name.to_string()), kind, location);
        if let Some(last) = self.facts.references.last_mut() {
            last.context = context;
        }
    }

    /// Finds a type-like symbol declared earlier in this file.
    pub fn find_type(&self, display_name: &str) -> Option<LocalId> {
        self.facts
            .symbols
            .iter()
            .find(|s| s.display_name == display_name && s.kind.is_container() && s.parent.is_some())
            .map(|s| s.local_id)
    }

    /// Binds named references to local symbols where the name is unambiguous.
    fn finish(mut self) -> FileFacts {
        let mut by_serialized: HashMap<&str, LocalId> = HashMap::new();
        let mut by_display: HashMap<&str, Vec<LocalId>> = HashMap::new();
        for symbol in &self.facts.symbols {
            by_serialized
                .entry(symbol.serialized_name.as_str())
                .or_insert(symbol.local_id);
            by_display
                .entry(symbol.display_name.as_str())
                .or_default()
                .push(symbol.local_id);
        }

        let mut bound = Vec::with_capacity(self.facts.references.len());
        for reference in &self.facts.references {
            let ReferenceTarget::Named(name) = &reference.target else {
                bound.push(None);
                continue;
            };
            let local = by_serialized.get(name.as_str()).copied().or_else(|| {
                match by_display.get(name.as_str()).map(Vec::as_slice) {
                    Some([only]) => Some(*only),
                    _ => None,
                }
            });
            bound.push(local);
        }

        for (reference, local) in self.facts.references.iter_mut().zip(bound) {
            if let Some(id) = local {
                reference.target = ReferenceTarget::Local(id);
            }
        }

        self.facts
    }
}

/// Collects the named children of a node so walkers can recurse freely.
pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}
