//! Python parser — functions, methods, classes, decorators, docstrings,
//! async markers and import edges via tree-sitter.

use tree_sitter::{Node, Parser};

use super::{
    chunk_pair, defined_in, file_entity, node_text, resolve_relative_target, ParseRequest,
    ParsedSource, ParserError, Result,
};
use crate::models::{ChunkKind, Entity, EntityType, FileTier, Relation, RelationKind};

pub(crate) fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ParserError::QueryError(e.to_string()))?;

    let Some(tree) = parser.parse(req.content, None) else {
        // Parser gave up entirely — still emit the file entity.
        let mut parsed = ParsedSource::default();
        parsed.entities.push(file_entity(req, vec![]));
        return Ok(parsed);
    };

    let module = module_name(req.source_path);
    let mut out = ParsedSource::default();
    let mut import_observations = Vec::new();
    let mut import_targets = Vec::new();

    let root = tree.root_node();
    let mut walker = Walker {
        req,
        out: &mut out,
        local_functions: Vec::new(),
        local_classes: Vec::new(),
    };
    walker.collect_definitions(root, &module);
    collect_imports(req, root, &mut import_observations, &mut import_targets);

    let file = file_entity(req, import_observations);
    let file_id = file.id.clone();
    // defined_in edges from every symbol metadata chunk
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

    // Deep tier: resolve same-file call and inheritance edges.
    if req.tier == FileTier::Deep {
        resolve_local_edges(req, root, &mut out);
    }

    Ok(out)
}

fn module_name(source_path: &str) -> String {
    source_path
        .trim_end_matches(".py")
        .replace('/', ".")
}

struct Walker<'a, 'b> {
    req: &'a ParseRequest<'a>,
    out: &'b mut ParsedSource,
    local_functions: Vec<String>,
    local_classes: Vec<String>,
}

impl Walker<'_, '_> {
    fn collect_definitions(&mut self, node: Node<'_>, scope: &str) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "function_definition" => self.emit_function(child, scope, &[], false),
                "class_definition" => self.emit_class(child, scope, &[]),
                "decorated_definition" => {
                    let decorators = decorator_names(child, self.req.content);
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "function_definition" => {
                                self.emit_function(def, scope, &decorators, false)
                            }
                            "class_definition" => self.emit_class(def, scope, &decorators),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn emit_function(&mut self, node: Node<'_>, scope: &str, decorators: &[String], method: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.req.content).to_string();
        let qualified = format!("{}.{}", scope, name);
        let params = node
            .child_by_field_name("parameters")
            .map(|p| node_text(p, self.req.content))
            .unwrap_or("()");
        let is_async = node
            .child(0)
            .is_some_and(|c| c.kind() == "async");
        let signature = if is_async {
            format!("async def {}{}", name, params)
        } else {
            format!("def {}{}", name, params)
        };

        let mut tags = Vec::new();
        if is_async {
            tags.push("async".to_string());
        }
        for decorator in decorators {
            tags.push(format!("decorator:{}", decorator));
        }

        let docstring = docstring_of(node, self.req.content);
        let body = node_text(node, self.req.content);

        let (meta, imp) = chunk_pair(
            self.req,
            if method { EntityType::Method } else { EntityType::Function },
            &name,
            &qualified,
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
            &signature,
            docstring.as_deref(),
            tags,
            body,
        );
        self.out.entities.push(meta);
        if let Some(imp) = imp {
            self.out.entities.push(imp);
        }
        if !method {
            self.local_functions.push(name);
        }

        // Nested defs keep the outer function as scope
        if let Some(block) = node.child_by_field_name("body") {
            self.collect_definitions(block, &qualified);
        }
    }

    fn emit_class(&mut self, node: Node<'_>, scope: &str, decorators: &[String]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.req.content).to_string();
        let qualified = format!("{}.{}", scope, name);
        let bases = node
            .child_by_field_name("superclasses")
            .map(|s| node_text(s, self.req.content))
            .unwrap_or("");
        let signature = format!("class {}{}", name, bases);

        let mut tags: Vec<String> = decorators
            .iter()
            .map(|d| format!("decorator:{}", d))
            .collect();
        if !bases.is_empty() {
            tags.push(format!("bases:{}", bases.trim_matches(['(', ')'])));
        }

        let docstring = docstring_of(node, self.req.content);
        let body = node_text(node, self.req.content);

        let (meta, imp) = chunk_pair(
            self.req,
            EntityType::Class,
            &name,
            &qualified,
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
            &signature,
            docstring.as_deref(),
            tags,
            body,
        );
        self.out.entities.push(meta);
        if let Some(imp) = imp {
            self.out.entities.push(imp);
        }
        self.local_classes.push(name);

        // Methods live one scope down
        if let Some(block) = node.child_by_field_name("body") {
            let mut cursor = block.walk();
            for child in block.named_children(&mut cursor) {
                match child.kind() {
                    "function_definition" => self.emit_function(child, &qualified, &[], true),
                    "decorated_definition" => {
                        let decorators = decorator_names(child, self.req.content);
                        if let Some(def) = child.child_by_field_name("definition") {
                            if def.kind() == "function_definition" {
                                self.emit_function(def, &qualified, &decorators, true);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn decorator_names(decorated: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = decorated.walk();
    for child in decorated.named_children(&mut cursor) {
        if child.kind() == "decorator" {
            let text = node_text(child, source)
                .trim_start_matches('@')
                .split('(')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if !text.is_empty() {
                names.push(text);
            }
        }
    }
    names
}

/// First string expression in a def/class body, quotes stripped.
fn docstring_of(node: Node<'_>, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = node_text(string, source);
    let stripped = raw
        .trim_start_matches(['r', 'b', 'u', 'f', 'R', 'B', 'U', 'F'])
        .trim_matches(['"', '\''])
        .trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
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
        match child.kind() {
            "import_statement" | "import_from_statement" => {
                let module = child
                    .child_by_field_name("module_name")
                    .or_else(|| child.child_by_field_name("name"))
                    .map(|n| node_text(n, req.content).to_string())
                    .unwrap_or_default();

                observations.push(format!("import {}", module));

                // Relative imports become file-level edges; package imports
                // stay observations only.
                if let Some(stripped) = module.strip_prefix('.') {
                    let as_path = format!("./{}", stripped.replace('.', "/"));
                    if let Some(target) = resolve_relative_target(req, &as_path, &["py"]) {
                        targets.push(target);
                    }
                }
            }
            _ => {}
        }
    }
    observations.dedup();
    targets.sort();
    targets.dedup();
}

/// Same-file call and inheritance edges, resolved by symbol name.
fn resolve_local_edges(req: &ParseRequest<'_>, root: Node<'_>, out: &mut ParsedSource) {
    use std::collections::HashMap;

    // qualified metadata chunks by bare name (functions and classes only)
    let mut by_name: HashMap<&str, &Entity> = HashMap::new();
    for entity in &out.entities {
        if entity.chunk_kind == ChunkKind::Metadata
            && matches!(entity.entity_type, EntityType::Function | EntityType::Class)
        {
            by_name.entry(entity.name.as_str()).or_insert(entity);
        }
    }

    let mut edges: Vec<Relation> = Vec::new();

    let mut cursor = root.walk();
    for top in root.named_children(&mut cursor) {
        let (def, _decorated) = if top.kind() == "decorated_definition" {
            match top.child_by_field_name("definition") {
                Some(d) => (d, true),
                None => continue,
            }
        } else {
            (top, false)
        };

        match def.kind() {
            "function_definition" => {
                let Some(name_node) = def.child_by_field_name("name") else {
                    continue;
                };
                let caller_name = node_text(name_node, req.content);
                let Some(caller) = by_name.get(caller_name) else {
                    continue;
                };
                let mut callees = Vec::new();
                collect_call_names(def, req.content, &mut callees);
                for callee in callees {
                    if callee == caller_name {
                        continue; // recursion is not an edge worth storing twice
                    }
                    if let Some(target) = by_name.get(callee.as_str()) {
                        edges.push(Relation {
                            from_id: caller.id.clone(),
                            to_id: target.id.clone(),
                            kind: RelationKind::Calls,
                            weight: None,
                        });
                    }
                }
            }
            "class_definition" => {
                let Some(name_node) = def.child_by_field_name("name") else {
                    continue;
                };
                let class_name = node_text(name_node, req.content);
                let Some(class_entity) = by_name.get(class_name) else {
                    continue;
                };
                if let Some(bases) = def.child_by_field_name("superclasses") {
                    let mut bc = bases.walk();
                    for base in bases.named_children(&mut bc) {
                        if base.kind() == "identifier" {
                            let base_name = node_text(base, req.content);
                            if let Some(target) = by_name.get(base_name) {
                                edges.push(Relation {
                                    from_id: class_entity.id.clone(),
                                    to_id: target.id.clone(),
                                    kind: RelationKind::Inherits,
                                    weight: None,
                                });
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    edges.sort_by(|a, b| (&a.from_id, &a.to_id).cmp(&(&b.from_id, &b.to_id)));
    edges.dedup();
    out.relations.extend(edges);
}

fn collect_call_names(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    if node.kind() == "call" {
        if let Some(function) = node.child_by_field_name("function") {
            if function.kind() == "identifier" {
                out.push(node_text(function, source).to_string());
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_call_names(child, source, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileTier;

    fn parse_src(content: &str, tier: FileTier) -> ParsedSource {
        let req = ParseRequest {
            collection: "demo",
            source_path: "pkg/mod.py",
            content,
            tier,
        };
        parse(&req).unwrap()
    }

    #[test]
    fn test_function_and_class_extraction() {
        let src = "\
def top(a, b):
    \"\"\"Adds two numbers.\"\"\"
    return a + b

class Service:
    \"\"\"A service.\"\"\"

    def handle(self, req):
        return top(1, 2)
";
        let parsed = parse_src(src, FileTier::Standard);
        let names: Vec<(&str, EntityType, ChunkKind)> = parsed
            .entities
            .iter()
            .map(|e| (e.qualified_name.as_str(), e.entity_type, e.chunk_kind))
            .collect();

        assert!(names.contains(&("pkg.mod.top", EntityType::Function, ChunkKind::Metadata)));
        assert!(names.contains(&("pkg.mod.top", EntityType::Function, ChunkKind::Implementation)));
        assert!(names.contains(&("pkg.mod.Service", EntityType::Class, ChunkKind::Metadata)));
        assert!(names.contains(&(
            "pkg.mod.Service.handle",
            EntityType::Method,
            ChunkKind::Metadata
        )));
        // file entity is always present
        assert!(parsed
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::File));
    }

    #[test]
    fn test_docstring_becomes_observation() {
        let src = "def f():\n    \"\"\"Frobnicates the widget. Slowly.\"\"\"\n    pass\n";
        let parsed = parse_src(src, FileTier::Standard);
        let meta = parsed
            .entities
            .iter()
            .find(|e| e.name == "f" && e.chunk_kind == ChunkKind::Metadata)
            .unwrap();
        assert_eq!(meta.observations[0], "Frobnicates the widget");
    }

    #[test]
    fn test_async_and_decorators() {
        let src = "@app.route('/x')\nasync def handler(req):\n    pass\n";
        let parsed = parse_src(src, FileTier::Standard);
        let meta = parsed
            .entities
            .iter()
            .find(|e| e.name == "handler" && e.chunk_kind == ChunkKind::Metadata)
            .unwrap();
        assert!(meta.observations.iter().any(|o| o == "async"));
        assert!(meta.observations.iter().any(|o| o == "decorator:app.route"));
        assert!(meta.meta_str("signature").unwrap().starts_with("async def handler"));
    }

    #[test]
    fn test_relative_import_edge() {
        let src = "from .helpers import greet\n\ndef f():\n    pass\n";
        let parsed = parse_src(src, FileTier::Standard);
        let imports: Vec<&Relation> = parsed
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Imports)
            .collect();
        assert_eq!(imports.len(), 1);
        let expected = Entity::derive_id(
            "demo",
            "pkg/helpers.py",
            "pkg/helpers.py",
            EntityType::File,
            ChunkKind::Metadata,
        );
        assert_eq!(imports[0].to_id, expected);
    }

    #[test]
    fn test_deep_tier_call_edges() {
        let src = "\
def helper():
    return 1

def caller():
    return helper()
";
        let parsed = parse_src(src, FileTier::Deep);
        let calls: Vec<&Relation> = parsed
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .collect();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_inherit_edge_on_deep_tier() {
        let src = "class Base:\n    pass\n\nclass Child(Base):\n    pass\n";
        let parsed = parse_src(src, FileTier::Deep);
        assert!(parsed
            .relations
            .iter()
            .any(|r| r.kind == RelationKind::Inherits));
    }

    #[test]
    fn test_broken_source_still_partial() {
        let src = "def ok():\n    pass\n\ndef broken(:\n";
        let parsed = parse_src(src, FileTier::Standard);
        // tree-sitter recovers; at minimum the valid def and the file survive
        assert!(parsed.entities.iter().any(|e| e.name == "ok"));
    }
}
