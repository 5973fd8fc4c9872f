//! TypeScript/JavaScript parser — functions, classes, interfaces, type
//! aliases, exports and JSDoc via tree-sitter, with component-style
//! recognition for UI code on the deep tier.

use tree_sitter::{Node, Parser};

use super::{
    chunk_pair, defined_in, file_entity, node_text, resolve_relative_target, ParseRequest,
    ParsedSource, ParserError, Result,
};
use crate::models::{ChunkKind, EntityType, FileTier, Relation, RelationKind};

pub(crate) fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let ext = req.source_path.rsplit('.').next().unwrap_or("ts");
    let language: tree_sitter::Language = if matches!(ext, "tsx" | "jsx") {
        tree_sitter_typescript::LANGUAGE_TSX.into()
    } else {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
    };

    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| ParserError::QueryError(e.to_string()))?;

    let Some(tree) = parser.parse(req.content, None) else {
        let mut parsed = ParsedSource::default();
        parsed.entities.push(file_entity(req, vec![]));
        return Ok(parsed);
    };

    let module = module_scope(req.source_path);
    let mut out = ParsedSource::default();
    let mut import_observations = Vec::new();
    let mut import_targets = Vec::new();

    let root = tree.root_node();
    collect_definitions(req, root, &module, false, &mut out);
    collect_imports(req, root, &mut import_observations, &mut import_targets);

    let file = file_entity(req, import_observations);
    let file_id = file.id.clone();
    let symbol_relations: Vec<Relation> = out
        .entities
        .iter()
        .filter(|e| e.chunk_kind == ChunkKind::Metadata)
        .map(|e| defined_in(req, e))
        .collect();
    out.relations.extend(symbol_relations);
    out.entities.push(file);

    for target_id in import_targets {
        out.relations.push(Relation {
            from_id: file_id.clone(),
            to_id: target_id,
            kind: RelationKind::Imports,
            weight: None,
        });
    }

    Ok(out)
}

fn module_scope(source_path: &str) -> String {
    let trimmed = source_path
        .trim_end_matches(".tsx")
        .trim_end_matches(".jsx")
        .trim_end_matches(".ts")
        .trim_end_matches(".js");
    trimmed.replace('/', ".")
}

fn collect_definitions(
    req: &ParseRequest<'_>,
    node: Node<'_>,
    scope: &str,
    exported: bool,
    out: &mut ParsedSource,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "export_statement" => {
                // Recurse into the wrapped declaration with the export flag set.
                collect_definitions(req, child, scope, true, out);
            }
            "function_declaration" => emit_function(req, child, scope, exported, out),
            "class_declaration" | "abstract_class_declaration" => {
                emit_class(req, child, scope, exported, out)
            }
            "interface_declaration" => {
                emit_typed(req, child, scope, exported, EntityType::Class, "interface", out)
            }
            "type_alias_declaration" => {
                emit_typed(req, child, scope, exported, EntityType::Class, "type", out)
            }
            "enum_declaration" => {
                emit_typed(req, child, scope, exported, EntityType::Class, "enum", out)
            }
            "lexical_declaration" => emit_arrow_functions(req, child, scope, exported, out),
            _ => {}
        }
    }
}

fn emit_function(
    req: &ParseRequest<'_>,
    node: Node<'_>,
    scope: &str,
    exported: bool,
    out: &mut ParsedSource,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, req.content).to_string();
    let qualified = format!("{}.{}", scope, name);
    let type_params = node
        .child_by_field_name("type_parameters")
        .map(|t| node_text(t, req.content))
        .unwrap_or("");
    let params = node
        .child_by_field_name("parameters")
        .map(|p| node_text(p, req.content))
        .unwrap_or("()");
    let return_type = node
        .child_by_field_name("return_type")
        .map(|r| node_text(r, req.content))
        .unwrap_or("");
    let is_async = node.child(0).is_some_and(|c| c.kind() == "async");
    let signature = format!(
        "{}function {}{}{}{}",
        if is_async { "async " } else { "" },
        name,
        type_params,
        params,
        return_type
    );

    let mut tags = Vec::new();
    if exported {
        tags.push("exported".to_string());
    }
    if is_async {
        tags.push("async".to_string());
    }
    if req.tier == FileTier::Deep && is_component(&name, node, req.content) {
        tags.push("component".to_string());
    }

    let doc = jsdoc_of(node, req.content);
    let body = node_text(node, req.content);
    let (meta, imp) = chunk_pair(
        req,
        EntityType::Function,
        &name,
        &qualified,
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
        &signature,
        doc.as_deref(),
        tags,
        body,
    );
    out.entities.push(meta);
    if let Some(imp) = imp {
        out.entities.push(imp);
    }
}

fn emit_class(
    req: &ParseRequest<'_>,
    node: Node<'_>,
    scope: &str,
    exported: bool,
    out: &mut ParsedSource,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, req.content).to_string();
    let qualified = format!("{}.{}", scope, name);
    let type_params = node
        .child_by_field_name("type_parameters")
        .map(|t| node_text(t, req.content))
        .unwrap_or("");
    let signature = format!("class {}{}", name, type_params);

    let mut tags = Vec::new();
    if exported {
        tags.push("exported".to_string());
    }

    let doc = jsdoc_of(node, req.content);
    let body = node_text(node, req.content);
    let (meta, imp) = chunk_pair(
        req,
        EntityType::Class,
        &name,
        &qualified,
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
        &signature,
        doc.as_deref(),
        tags,
        body,
    );
    out.entities.push(meta);
    if let Some(imp) = imp {
        out.entities.push(imp);
    }

    // Methods
    if let Some(class_body) = node.child_by_field_name("body") {
        let mut cursor = class_body.walk();
        for member in class_body.named_children(&mut cursor) {
            if member.kind() != "method_definition" {
                continue;
            }
            let Some(method_name_node) = member.child_by_field_name("name") else {
                continue;
            };
            let method_name = node_text(method_name_node, req.content).to_string();
            let method_qualified = format!("{}.{}", qualified, method_name);
            let params = member
                .child_by_field_name("parameters")
                .map(|p| node_text(p, req.content))
                .unwrap_or("()");
            let signature = format!("{}{}", method_name, params);
            let doc = jsdoc_of(member, req.content);
            let body = node_text(member, req.content);
            let (meta, imp) = chunk_pair(
                req,
                EntityType::Method,
                &method_name,
                &method_qualified,
                member.start_position().row as u32 + 1,
                member.end_position().row as u32 + 1,
                &signature,
                doc.as_deref(),
                Vec::new(),
                body,
            );
            out.entities.push(meta);
            if let Some(imp) = imp {
                out.entities.push(imp);
            }
        }
    }
}

/// Interfaces, type aliases, enums — signature-only symbols modelled as
/// class entities with a flavour tag.
fn emit_typed(
    req: &ParseRequest<'_>,
    node: Node<'_>,
    scope: &str,
    exported: bool,
    entity_type: EntityType,
    flavour: &str,
    out: &mut ParsedSource,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, req.content).to_string();
    let qualified = format!("{}.{}", scope, name);
    let type_params = node
        .child_by_field_name("type_parameters")
        .map(|t| node_text(t, req.content))
        .unwrap_or("");
    let signature = format!("{} {}{}", flavour, name, type_params);

    let mut tags = vec![flavour.to_string()];
    if exported {
        tags.push("exported".to_string());
    }

    let doc = jsdoc_of(node, req.content);
    let body = node_text(node, req.content);
    let (meta, imp) = chunk_pair(
        req,
        entity_type,
        &name,
        &qualified,
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
        &signature,
        doc.as_deref(),
        tags,
        body,
    );
    out.entities.push(meta);
    if let Some(imp) = imp {
        out.entities.push(imp);
    }
}

/// `const f = (...) => ...` bindings.
fn emit_arrow_functions(
    req: &ParseRequest<'_>,
    node: Node<'_>,
    scope: &str,
    exported: bool,
    out: &mut ParsedSource,
) {
    let mut cursor = node.walk();
    for declarator in node.named_children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(value) = declarator.child_by_field_name("value") else {
            continue;
        };
        if value.kind() != "arrow_function" {
            continue;
        }
        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name_node, req.content).to_string();
        let qualified = format!("{}.{}", scope, name);
        let params = value
            .child_by_field_name("parameters")
            .map(|p| node_text(p, req.content))
            .unwrap_or("()");
        let is_async = value.child(0).is_some_and(|c| c.kind() == "async");
        let signature = format!(
            "const {} = {}{} => …",
            name,
            if is_async { "async " } else { "" },
            params
        );

        let mut tags = Vec::new();
        if exported {
            tags.push("exported".to_string());
        }
        if is_async {
            tags.push("async".to_string());
        }
        if req.tier == FileTier::Deep && is_component(&name, value, req.content) {
            tags.push("component".to_string());
        }

        let doc = jsdoc_of(node, req.content);
        let body = node_text(declarator, req.content);
        let (meta, imp) = chunk_pair(
            req,
            EntityType::Function,
            &name,
            &qualified,
            declarator.start_position().row as u32 + 1,
            declarator.end_position().row as u32 + 1,
            &signature,
            doc.as_deref(),
            tags,
            body,
        );
        out.entities.push(meta);
        if let Some(imp) = imp {
            out.entities.push(imp);
        }
    }
}

/// Component heuristic: capitalised name whose body mentions JSX.
fn is_component(name: &str, node: Node<'_>, source: &str) -> bool {
    let capitalised = name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    if !capitalised {
        return false;
    }
    let body = node_text(node, source);
    body.contains("jsx") || body.contains("</") || body.contains("/>") || body.contains("React.createElement")
}

/// First sentence of a preceding `/** ... */` comment.
fn jsdoc_of(node: Node<'_>, source: &str) -> Option<String> {
    // Walk up through an export_statement wrapper if present.
    let anchor = match node.parent() {
        Some(p) if p.kind() == "export_statement" => p,
        _ => node,
    };
    let prev = anchor.prev_named_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let raw = node_text(prev, source);
    if !raw.starts_with("/**") {
        return None;
    }
    let cleaned: String = raw
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty() && !l.starts_with('@'))
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn collect_imports(
    req: &ParseRequest<'_>,
    root: Node<'_>,
    observations: &mut Vec<String>,
    targets: &mut Vec<String>,
) {
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() != "import_statement" {
            continue;
        }
        let Some(source_node) = child.child_by_field_name("source") else {
            continue;
        };
        let spec = node_text(source_node, req.content)
            .trim_matches(['"', '\''])
            .to_string();
        observations.push(format!("import {}", spec));
        if let Some(target) = resolve_relative_target(req, &spec, &["ts", "tsx", "js", "jsx"]) {
            targets.push(target);
        }
    }
    observations.dedup();
    targets.sort();
    targets.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, FileTier};

    fn parse_src(path: &str, content: &str, tier: FileTier) -> ParsedSource {
        let req = ParseRequest {
            collection: "demo",
            source_path: path,
            content,
            tier,
        };
        parse(&req).unwrap()
    }

    #[test]
    fn test_function_class_interface_extraction() {
        let src = "\
/** Validates a token for a user. */
export function validateToken(token: string): boolean {
  return token.length > 0;
}

export interface Session {
  id: string;
}

type Alias = string;

export class AuthService {
  check(token: string) {
    return validateToken(token);
  }
}
";
        let parsed = parse_src("src/auth.ts", src, FileTier::Standard);
        let find = |name: &str| {
            parsed
                .entities
                .iter()
                .find(|e| e.name == name && e.chunk_kind == ChunkKind::Metadata)
        };

        let f = find("validateToken").expect("function extracted");
        assert!(f.observations.iter().any(|o| o == "exported"));
        assert!(f.observations.iter().any(|o| o.contains("Validates a token")));

        assert!(find("Session").is_some());
        assert!(find("Alias").is_some());
        assert!(find("AuthService").is_some());
        let method = parsed
            .entities
            .iter()
            .find(|e| e.qualified_name == "src.auth.AuthService.check")
            .expect("method extracted");
        assert_eq!(method.entity_type, EntityType::Method);
    }

    #[test]
    fn test_arrow_function_extraction() {
        let src = "export const fetchUser = async (id: string) => {\n  return id;\n};\n";
        let parsed = parse_src("src/api.ts", src, FileTier::Standard);
        let meta = parsed
            .entities
            .iter()
            .find(|e| e.name == "fetchUser" && e.chunk_kind == ChunkKind::Metadata)
            .unwrap();
        assert!(meta.observations.iter().any(|o| o == "async"));
        assert!(meta.observations.iter().any(|o| o == "exported"));
    }

    #[test]
    fn test_component_recognition_on_deep_tier() {
        let src = "export const Button = (props: Props) => {\n  return <button>{props.label}</button>;\n};\n";
        let parsed = parse_src("src/components/Button.tsx", src, FileTier::Deep);
        let meta = parsed
            .entities
            .iter()
            .find(|e| e.name == "Button" && e.chunk_kind == ChunkKind::Metadata)
            .unwrap();
        assert!(meta.observations.iter().any(|o| o == "component"));
    }

    #[test]
    fn test_relative_import_edge() {
        let src = "import { helper } from './util';\n\nexport function f() { return helper(); }\n";
        let parsed = parse_src("src/feature/main.ts", src, FileTier::Standard);
        let imports: Vec<_> = parsed
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Imports)
            .collect();
        assert_eq!(imports.len(), 1);
        let expected = Entity::derive_id(
            "demo",
            "src/feature/util.ts",
            "src/feature/util.ts",
            crate::models::EntityType::File,
            ChunkKind::Metadata,
        );
        assert_eq!(imports[0].to_id, expected);
    }

    #[test]
    fn test_package_import_is_observation_only() {
        let src = "import React from 'react';\n";
        let parsed = parse_src("src/app.tsx", src, FileTier::Standard);
        assert!(parsed
            .relations
            .iter()
            .all(|r| r.kind != RelationKind::Imports));
        let file = parsed
            .entities
            .iter()
            .find(|e| e.entity_type == crate::models::EntityType::File)
            .unwrap();
        assert!(file.observations.iter().any(|o| o == "import react"));
    }
}
