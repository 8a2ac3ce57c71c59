//! Rust declarations and references.

use crate::edge::ReferenceKind;
use crate::extract::{named_children, Extraction, Scope};
use crate::facts::LocalId;
use crate::node::SymbolKind;
use std::path::Path;
use tree_sitter::Node;

/// Module path of a file, derived from its position under `src/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModulePath {
    pub crate_name: String,
    pub segments: Vec<String>,
}

impl ModulePath {
    pub fn from_file(path: &Path) -> Self {
        let components: Vec<String> = path
            .components()
            .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
            .collect();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main")
            .to_string();

        let Some(src) = components.iter().rposition(|c| c == "src") else {
            return Self {
                crate_name: stem.clone(),
                segments: vec![stem],
            };
        };

        let crate_name = match src {
            0 => "crate".to_string(),
            n => components[n - 1].replace('-', "_"),
        };

        let mut segments = vec![crate_name.clone()];
        let inner = &components[src + 1..];
        if let Some((_file, dirs)) = inner.split_last() {
            segments.extend(dirs.iter().cloned());
        }
        let is_root = inner.len() == 1 && (stem == "lib" || stem == "main");
        if !is_root && stem != "mod" {
            segments.push(stem);
        }

        Self {
            crate_name,
            segments,
        }
    }
}

pub(crate) fn extract(x: &mut Extraction<'_>, root: Node<'_>, scope: &Scope) {
    visit_children(x, root, scope);
}

fn is_item(kind: &str) -> bool {
    matches!(
        kind,
        "mod_item"
            | "struct_item"
            | "union_item"
            | "enum_item"
            | "trait_item"
            | "impl_item"
            | "function_item"
            | "function_signature_item"
            | "const_item"
            | "static_item"
            | "type_item"
            | "use_declaration"
    )
}

/// Walks a declaration list, attaching attributes to the item they precede.
fn visit_children(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) {
    let mut attributes = Vec::new();
    for child in named_children(node) {
        if child.kind() == "attribute_item" {
            attributes.push(child);
            continue;
        }
        let owner = visit(x, child, scope).unwrap_or(scope.id);
        for attribute in attributes.drain(..) {
            attribute_usage(x, attribute, owner);
        }
    }
    for attribute in attributes {
        attribute_usage(x, attribute, scope.id);
    }
}

fn visit(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) -> Option<LocalId> {
    match node.kind() {
        "mod_item" => {
            let name = x.field_text(node, "name")?;
            let id = x.declare(name, SymbolKind::Module, node, scope);
            if let Some(body) = node.child_by_field_name("body") {
                let inner = scope.enter(id, x.serialized(id));
                visit_children(x, body, &inner);
            }
            Some(id)
        }
        "struct_item" | "union_item" => {
            let name = x.field_text(node, "name")?;
            let id = x.declare(name, SymbolKind::Struct, node, scope);
            if let Some(body) = node.child_by_field_name("body") {
                fields(x, body, id);
            }
            Some(id)
        }
        "enum_item" => {
            let name = x.field_text(node, "name")?;
            let id = x.declare(name, SymbolKind::Enum, node, scope);
            let inner = scope.enter(id, x.serialized(id));
            if let Some(body) = node.child_by_field_name("body") {
                for variant in named_children(body) {
                    if variant.kind() != "enum_variant" {
                        continue;
                    }
                    let Some(variant_name) = x.field_text(variant, "name") else {
                        continue;
                    };
                    let variant_id = x.declare(variant_name, SymbolKind::EnumMember, variant, &inner);
                    if let Some(fields_node) = variant.child_by_field_name("body") {
                        fields(x, fields_node, variant_id);
                    }
                }
            }
            Some(id)
        }
        "trait_item" => {
            let name = x.field_text(node, "name")?;
            let id = x.declare(name, SymbolKind::Interface, node, scope);
            if let Some(bounds) = node.child_by_field_name("bounds") {
                type_refs(x, bounds, id, ReferenceKind::Inheritance);
            }
            if let Some(body) = node.child_by_field_name("body") {
                let inner = scope.enter(id, x.serialized(id)).as_type();
                visit_children(x, body, &inner);
            }
            Some(id)
        }
        "impl_item" => impl_block(x, node, scope),
        "function_item" | "function_signature_item" => function(x, node, scope),
        "const_item" | "static_item" => {
            let name = x.field_text(node, "name")?;
            let id = x.declare(name, SymbolKind::Constant, node, scope);
            if let Some(ty) = node.child_by_field_name("type") {
                type_refs(x, ty, id, ReferenceKind::TypeUsage);
            }
            if let Some(value) = node.child_by_field_name("value") {
                let inner = scope.enter(id, x.serialized(id));
                references(x, value, &inner);
            }
            Some(id)
        }
        "type_item" => {
            let name = x.field_text(node, "name")?;
            let id = x.declare(name, SymbolKind::TypeAlias, node, scope);
            if let Some(ty) = node.child_by_field_name("type") {
                type_refs(x, ty, id, ReferenceKind::TypeUsage);
            }
            Some(id)
        }
        "use_declaration" => {
            if let Some(argument) = node.child_by_field_name("argument") {
                imports(x, argument, scope.id, "");
            }
            None
        }
        _ => {
            references(x, node, scope);
            None
        }
    }
}

fn fields(x: &mut Extraction<'_>, body: Node<'_>, owner: LocalId) {
    let scope = Scope {
        id: owner,
        prefix: x.serialized(owner).to_string(),
        in_type: true,
        implementing: None,
    };
    for child in named_children(body) {
        match child.kind() {
            "field_declaration" => {
                let Some(name) = x.field_text(child, "name") else {
                    continue;
                };
                let id = x.declare(name, SymbolKind::Field, child, &scope);
                if let Some(ty) = child.child_by_field_name("type") {
                    type_refs(x, ty, id, ReferenceKind::TypeUsage);
                }
            }
            "attribute_item" => attribute_usage(x, child, owner),
            // Tuple fields: just the types.
            _ => type_refs(x, child, owner, ReferenceKind::TypeUsage),
        }
    }
}

fn impl_block(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) -> Option<LocalId> {
    let type_node = node.child_by_field_name("type")?;
    let type_name = base_type_name(x, type_node);
    let owner = x.find_type(&type_name);
    let prefix = match owner {
        Some(id) => x.serialized(id).to_string(),
        None => x.qualify(&scope.prefix, &type_name),
    };

    let trait_name = node
        .child_by_field_name("trait")
        .map(|t| (t, base_type_name(x, t)));
    if let (Some(from), Some((trait_node, name))) = (owner, &trait_name) {
        x.reference(from, name, ReferenceKind::InterfaceImplementation, *trait_node);
    }

    if let Some(body) = node.child_by_field_name("body") {
        let inner = Scope {
            id: owner.unwrap_or(scope.id),
            prefix,
            in_type: true,
            implementing: trait_name.map(|(_, name)| name),
        };
        visit_children(x, body, &inner);
    }
    None
}

fn function(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) -> Option<LocalId> {
    let name = x.field_text(node, "name")?;
    let kind = if scope.in_type {
        SymbolKind::Method
    } else {
        SymbolKind::Function
    };
    let id = x.declare(name, kind, node, scope);

    if let Some(base) = &scope.implementing {
        let target = format!("{}::{}", base, name);
        x.reference(id, &target, ReferenceKind::Override, node);
    }

    if let Some(parameters) = node.child_by_field_name("parameters") {
        for parameter in named_children(parameters) {
            if let Some(ty) = parameter.child_by_field_name("type") {
                type_refs(x, ty, id, ReferenceKind::TypeUsage);
            }
        }
    }
    if let Some(ret) = node.child_by_field_name("return_type") {
        type_refs(x, ret, id, ReferenceKind::TypeUsage);
    }
    if let Some(body) = node.child_by_field_name("body") {
        let inner = scope.enter(id, x.serialized(id));
        visit_children(x, body, &inner);
    }
    Some(id)
}

/// The bare type name behind generics and paths: `a::Foo<T>` -> `Foo`.
fn base_type_name(x: &Extraction<'_>, node: Node<'_>) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|t| base_type_name(x, t))
            .unwrap_or_default(),
        "scoped_type_identifier" => x.field_text(node, "name").unwrap_or("").to_string(),
        _ => x.text(node).to_string(),
    }
}

fn type_refs(x: &mut Extraction<'_>, node: Node<'_>, from: LocalId, kind: ReferenceKind) {
    match node.kind() {
        "type_identifier" => {
            let name = x.text(node);
            x.reference(from, name, kind, node);
        }
        "scoped_type_identifier" => {
            let path = absolute_path(x, x.text(node));
            x.reference(from, &path, kind, node);
        }
        "generic_type" => {
            if let Some(ty) = node.child_by_field_name("type") {
                type_refs(x, ty, from, kind);
            }
            if let Some(arguments) = node.child_by_field_name("type_arguments") {
                for argument in named_children(arguments) {
                    type_refs(x, argument, from, ReferenceKind::TypeArgument);
                }
            }
        }
        "primitive_type" | "lifetime" => {}
        _ => {
            for child in named_children(node) {
                type_refs(x, child, from, kind);
            }
        }
    }
}

fn references(x: &mut Extraction<'_>, node: Node<'_>, scope: &Scope) {
    let kind = node.kind();
    if is_item(kind) {
        visit(x, node, scope);
        return;
    }

    match kind {
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                callee(x, function, scope);
            }
            if let Some(arguments) = node.child_by_field_name("arguments") {
                references(x, arguments, scope);
            }
        }
        "struct_expression" => {
            if let Some(name) = node.child_by_field_name("name") {
                let target = absolute_path(x, &base_path(x, name));
                x.reference(scope.id, &target, ReferenceKind::Instantiation, name);
            }
            if let Some(body) = node.child_by_field_name("body") {
                references(x, body, scope);
            }
        }
        "type_cast_expression" => {
            if let Some(ty) = node.child_by_field_name("type") {
                type_refs(x, ty, scope.id, ReferenceKind::Cast);
            }
            if let Some(value) = node.child_by_field_name("value") {
                references(x, value, scope);
            }
        }
        "field_expression" => {
            if let Some(value) = node.child_by_field_name("value") {
                if x.text(value) == "self" {
                    if let Some(field) = node.child_by_field_name("field") {
                        let name = x.text(field);
                        x.reference(scope.id, name, ReferenceKind::FieldAccess, field);
                    }
                }
                references(x, value, scope);
            }
        }
        "let_declaration" => {
            if let Some(ty) = node.child_by_field_name("type") {
                type_refs(x, ty, scope.id, ReferenceKind::TypeUsage);
            }
            if let Some(value) = node.child_by_field_name("value") {
                references(x, value, scope);
            }
        }
        "block" | "declaration_list" => visit_children(x, node, scope),
        "macro_invocation" | "attribute_item" | "line_comment" | "block_comment" => {}
        _ => {
            for child in named_children(node) {
                references(x, child, scope);
            }
        }
    }
}

fn callee(x: &mut Extraction<'_>, function: Node<'_>, scope: &Scope) {
    match function.kind() {
        "identifier" => {
            let name = x.text(function);
            x.reference(scope.id, name, ReferenceKind::Call, function);
        }
        "scoped_identifier" => {
            let path = absolute_path(x, x.text(function));
            x.reference(scope.id, &path, ReferenceKind::Call, function);
        }
        "field_expression" => {
            if let Some(field) = function.child_by_field_name("field") {
                let name = x.text(field);
                x.reference(scope.id, name, ReferenceKind::Call, field);
            }
            if let Some(value) = function.child_by_field_name("value") {
                references(x, value, scope);
            }
        }
        "generic_function" => {
            if let Some(inner) = function.child_by_field_name("function") {
                callee(x, inner, scope);
            }
            if let Some(arguments) = function.child_by_field_name("type_arguments") {
                for argument in named_children(arguments) {
                    type_refs(x, argument, scope.id, ReferenceKind::TypeArgument);
                }
            }
        }
        _ => references(x, function, scope),
    }
}

/// Path text without generic arguments.
fn base_path(x: &Extraction<'_>, node: Node<'_>) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|t| base_path(x, t))
            .unwrap_or_default(),
        _ => x.text(node).to_string(),
    }
}

/// Rewrites `crate::` paths onto the crate's own name.
fn absolute_path(x: &Extraction<'_>, path: &str) -> String {
    match path.strip_prefix("crate::") {
        Some(rest) => format!("{}::{}", x.crate_name, rest),
        None => path.to_string(),
    }
}

fn imports(x: &mut Extraction<'_>, node: Node<'_>, from: LocalId, prefix: &str) {
    let join = |p: &str, name: &str| {
        if p.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", p, name)
        }
    };

    match node.kind() {
        "identifier" | "scoped_identifier" | "crate" | "self" => {
            let path = absolute_path(x, &join(prefix, x.text(node)));
            let last = path.rsplit("::").next().unwrap_or("");
            if last != "self" {
                x.reference(from, &path, ReferenceKind::Import, node);
            }
        }
        "use_as_clause" => {
            if let Some(path) = node.child_by_field_name("path") {
                imports(x, path, from, prefix);
            }
        }
        "scoped_use_list" => {
            let base = node
                .child_by_field_name("path")
                .map(|p| join(prefix, x.text(p)))
                .unwrap_or_else(|| prefix.to_string());
            if let Some(list) = node.child_by_field_name("list") {
                imports(x, list, from, &base);
            }
        }
        "use_list" => {
            for child in named_children(node) {
                imports(x, child, from, prefix);
            }
        }
        _ => {}
    }
}

fn attribute_usage(x: &mut Extraction<'_>, item: Node<'_>, owner: LocalId) {
    let Some(attribute) = named_children(item).into_iter().find(|n| n.kind() == "attribute") else {
        return;
    };
    let Some(path) = named_children(attribute).into_iter().next() else {
        return;
    };
    let name = x.text(path);
    x.reference(owner, name, ReferenceKind::AttributeUsage, path);

    if name == "derive" {
        if let Some(arguments) = attribute.child_by_field_name("arguments") {
            for derived in named_children(arguments) {
                if derived.kind() == "identifier" {
                    let trait_name = x.text(derived);
                    x.reference(owner, trait_name, ReferenceKind::AttributeUsage, derived);
                }
            }
        }
    }
}
