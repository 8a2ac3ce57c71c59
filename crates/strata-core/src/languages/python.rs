//! Python declarations and references.

use crate::edge::ReferenceKind;
use crate::extract::{named_children, Extraction, Scope};
use crate::facts::LocalId;
use crate::node::SymbolKind;
use std::path::Path;
use tree_sitter::Node;

/// Dotted module path: the file stem plus every enclosing package directory.
pub(crate) fn module_segments(path: &Path) -> Vec<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("__main__")
        .to_string();

    let mut segments = Vec::new();
    if stem != "__init__" {
        segments.push(stem);
    }

    let mut dir = path.parent();
    while let Some(d) = dir {
        if d.as_os_str().is_empty() || !d.join("__init__.py").is_file() {
            break;
        }
        match d.file_name().and_then(|n| n.to_str()) {
            Some(name) => segments.push(name.to_string()),
            None => break,
        }
        dir = d.parent();
    }

    if segments.is_empty() {
        segments.push("__init__".to_string());
    }
    segments.reverse();
    segments
}

/// Package that relative imports in this file are anchored to.
pub(crate) fn package_of(path: &Path, segments: &[String]) -> String {
    let is_package_init = path.file_stem().and_then(|s| s.to_str()) == Some("__init__");
    let package = if is_package_init {
        segments
    } else {
        &segments[..segments.len().saturating_sub(1)]
    };
    package.join(".")
}

pub(crate) fn extract(x: &mut Extraction<'_>, root: Node<'_>, scope: &Scope) {
    block(x, root, scope);
}

fn is_statement(kind: &str) -> bool {
    matches!(
        kind,
        "class_definition"
            | "function_definition"
            | "decorated_definition"
            | "import_statement"
            | "import_from_statement"
            | "raise_statement"
            | "try_statement"
            | "expression_statement"
    )
}

fn block(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) {
    for child in named_children(node) {
        statement(x, child, scope);
    }
}

fn statement(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) {
    match node.kind() {
        "class_definition" => {
            class(x, node, scope, &[]);
        }
        "function_definition" => {
            function(x, node, scope, &[]);
        }
        "decorated_definition" => {
            let decorators: Vec<Node> = named_children(node)
                .into_iter()
                .filter(|n| n.kind() == "decorator")
                .collect();
            let Some(definition) = node.child_by_field_name("definition") else {
                return;
            };
            match definition.kind() {
                "class_definition" => class(x, definition, scope, &decorators),
                "function_definition" => function(x, definition, scope, &decorators),
                _ => None,
            };
        }
        "import_statement" => {
            let mut cursor = node.walk();
            let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
            for name in names {
                let target = match name.kind() {
                    "aliased_import" => x.field_text(name, "name").unwrap_or(""),
                    _ => x.text(name),
                };
                x.reference(scope.id, target, ReferenceKind::Import, name);
            }
        }
        "import_from_statement" => import_from(x, node, scope),
        "raise_statement" => {
            for child in named_children(node) {
                let thrown = match child.kind() {
                    "call" => child.child_by_field_name("function"),
                    "identifier" | "attribute" => Some(child),
                    _ => None,
                };
                if let Some(thrown) = thrown {
                    let name = last_segment(x.text(thrown));
                    x.reference(scope.id, name, ReferenceKind::Throw, thrown);
                }
                references(x, child, scope);
            }
        }
        "try_statement" => {
            for child in named_children(node) {
                match child.kind() {
                    "except_clause" => catch(x, child, scope),
                    "block" => block(x, child, scope),
                    _ => references(x, child, scope),
                }
            }
        }
        "expression_statement" if scope.in_type => {
            for child in named_children(node) {
                if child.kind() == "assignment" {
                    class_attribute(x, child, scope);
                } else {
                    references(x, child, scope);
                }
            }
        }
        _ => references(x, node, scope),
    }
}

fn class(
    x: &mut Extraction<'_>,
    node: Node<'_>,
    scope: &Scope,
    decorators: &[Node<'_>],
) -> Option<LocalId> {
    let name = x.field_text(node, "name")?;
    let id = x.declare(name, SymbolKind::Class, node, scope);
    decorate(x, decorators, id);

    if let Some(bases) = node.child_by_field_name("superclasses") {
        for base in named_children(bases) {
            if matches!(base.kind(), "identifier" | "attribute") {
                let name = x.text(base);
                x.reference(id, name, ReferenceKind::Inheritance, base);
            }
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        let inner = scope.enter(id, x.serialized(id)).as_type();
        block(x, body, &inner);
    }
    Some(id)
}

fn function(
    x: &mut Extraction<'_>,
    node: Node<'_>,
    scope: &Scope,
    decorators: &[Node<'_>],
) -> Option<LocalId> {
    let name = x.field_text(node, "name")?;
    let is_property = decorators.iter().any(|d| {
        let text = x.text(*d);
        text == "@property" || text.ends_with(".setter") || text.ends_with(".getter")
    });
    let kind = match (scope.in_type, is_property) {
        (true, true) => SymbolKind::Property,
        (true, false) => SymbolKind::Method,
        (false, _) => SymbolKind::Function,
    };
    let id = x.declare(name, kind, node, scope);
    decorate(x, decorators, id);

    if let Some(parameters) = node.child_by_field_name("parameters") {
        for parameter in named_children(parameters) {
            if let Some(ty) = parameter.child_by_field_name("type") {
                type_refs(x, ty, id, ReferenceKind::TypeUsage);
            }
            if let Some(value) = parameter.child_by_field_name("value") {
                let inner = scope.enter(id, x.serialized(id));
                references(x, value, &inner);
            }
        }
    }
    if let Some(ret) = node.child_by_field_name("return_type") {
        type_refs(x, ret, id, ReferenceKind::TypeUsage);
    }
    if let Some(body) = node.child_by_field_name("body") {
        let inner = scope.enter(id, x.serialized(id));
        block(x, body, &inner);
    }
    Some(id)
}

fn class_attribute(x: &mut Extraction<'_>, assignment: Node<'_>, scope: &Scope) {
    let target = assignment
        .child_by_field_name("left")
        .filter(|l| l.kind() == "identifier");
    let owner = match target {
        Some(left) => {
            let name = x.text(left);
            let id = x.declare(name, SymbolKind::Field, assignment, scope);
            if let Some(ty) = assignment.child_by_field_name("type") {
                type_refs(x, ty, id, ReferenceKind::TypeUsage);
            }
            id
        }
        None => scope.id,
    };
    if let Some(right) = assignment.child_by_field_name("right") {
        let inner = scope.enter(owner, x.serialized(owner));
        references(x, right, &inner);
    }
}

fn decorate(x: &mut Extraction<'_>, decorators: &[Node<'_>], owner: LocalId) {
    for decorator in decorators {
        let Some(expression) = named_children(*decorator).into_iter().next() else {
            continue;
        };
        let target = match expression.kind() {
            "call" => expression.child_by_field_name("function").unwrap_or(expression),
            _ => expression,
        };
        let name = x.text(target);
        x.reference(owner, name, ReferenceKind::AttributeUsage, target);
    }
}

fn import_from(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) {
    let Some(module) = node.child_by_field_name("module_name") else {
        return;
    };
    let raw = x.text(module);
    let module_path = if raw.starts_with('.') {
        let trimmed = raw.trim_start_matches('.');
        match (x.package.is_empty(), trimmed.is_empty()) {
            (true, _) => trimmed.to_string(),
            (false, true) => x.package.clone(),
            (false, false) => format!("{}.{}", x.package, trimmed),
        }
    } else {
        raw.to_string()
    };

    let mut cursor = node.walk();
    let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
    for name in names {
        let imported = match name.kind() {
            "aliased_import" => x.field_text(name, "name").unwrap_or(""),
            _ => x.text(name),
        };
        let target = if module_path.is_empty() {
            imported.to_string()
        } else {
            format!("{}.{}", module_path, imported)
        };
        x.reference(scope.id, &target, ReferenceKind::Import, name);
    }
}

fn catch(x: &mut Extraction<'_>, clause: Node<'_>, scope: &Scope) {
    let mut caught_type = false;
    for child in named_children(clause) {
        if child.kind() == "block" {
            block(x, child, scope);
            continue;
        }
        if caught_type {
            continue;
        }
        caught_type = true;
        let types = match child.kind() {
            "tuple" => named_children(child),
            "as_pattern" => named_children(child).into_iter().take(1).collect(),
            _ => vec![child],
        };
        for ty in types {
            if matches!(ty.kind(), "identifier" | "attribute") {
                let name = last_segment(x.text(ty));
                x.reference(scope.id, name, ReferenceKind::Catch, ty);
            }
        }
    }
}

fn type_refs(x: &mut Extraction<'_>, node: Node<'_>, from: LocalId, kind: ReferenceKind) {
    match node.kind() {
        "identifier" | "attribute" => {
            let name = x.text(node);
            if name != "None" {
                x.reference(from, name, kind, node);
            }
        }
        "subscript" => {
            if let Some(value) = node.child_by_field_name("value") {
                type_refs(x, value, from, kind);
            }
            let mut cursor = node.walk();
            let arguments: Vec<Node> = node
                .children_by_field_name("subscript", &mut cursor)
                .collect();
            for argument in arguments {
                type_refs(x, argument, from, ReferenceKind::TypeArgument);
            }
        }
        "string" | "none" => {}
        _ => {
            for child in named_children(node) {
                type_refs(x, child, from, kind);
            }
        }
    }
}

fn references(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) {
    let kind = node.kind();
    if kind == "block" {
        block(x, node, scope);
        return;
    }
    if is_statement(kind) && kind != "expression_statement" {
        statement(x, node, scope);
        return;
    }

    match kind {
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                match function.kind() {
                    "identifier" => {
                        let name = x.text(function);
                        let kind = if name.starts_with(char::is_uppercase) {
                            ReferenceKind::Instantiation
                        } else {
                            ReferenceKind::Call
                        };
                        x.reference(scope.id, name, kind, function);
                    }
                    "attribute" => {
                        if let Some(attribute) = function.child_by_field_name("attribute") {
                            let name = x.text(attribute);
                            x.reference(scope.id, name, ReferenceKind::Call, attribute);
                        }
                        if let Some(object) = function.child_by_field_name("object") {
                            references(x, object, scope);
                        }
                    }
                    _ => references(x, function, scope),
                }
            }
            if let Some(arguments) = node.child_by_field_name("arguments") {
                references(x, arguments, scope);
            }
        }
        "attribute" => {
            if let Some(object) = node.child_by_field_name("object") {
                if x.text(object) == "self" {
                    if let Some(attribute) = node.child_by_field_name("attribute") {
                        let name = x.text(attribute);
                        x.reference(scope.id, name, ReferenceKind::FieldAccess, attribute);
                    }
                }
                references(x, object, scope);
            }
        }
        "comment" | "string" => {}
        _ => {
            for child in named_children(node) {
                references(x, child, scope);
            }
        }
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
