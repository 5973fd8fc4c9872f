//! Language parsers — produce a uniform entity+relation stream from source.
//!
//! Dispatch is a bounded variant over the supported parser kinds; every
//! function/class yields two chunks (metadata + implementation) so retrieval
//! can disclose progressively.

mod config;
mod markdown;
mod markup;
mod python;
mod stylesheet;
mod typescript;

use std::collections::HashSet;

use thiserror::Error;

use crate::models::{ChunkKind, Entity, EntityType, FileTier, Relation, RelationKind};

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Query error: {0}")]
    QueryError(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;

/// Supported parser kinds. A fixed set — new languages are added here, not
/// through a runtime registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Python,
    TypeScript,
    Config,
    Markup,
    Stylesheet,
    Markdown,
}

impl ParserKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "py" => Some(Self::Python),
            "ts" | "tsx" | "js" | "jsx" => Some(Self::TypeScript),
            "json" | "yaml" | "yml" => Some(Self::Config),
            "html" | "htm" => Some(Self::Markup),
            "css" => Some(Self::Stylesheet),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn language_name(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::Config => "config",
            Self::Markup => "html",
            Self::Stylesheet => "css",
            Self::Markdown => "markdown",
        }
    }
}

/// Result of parsing a single file.
#[derive(Debug, Default)]
pub struct ParsedSource {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Everything a language module needs to build entities.
pub struct ParseRequest<'a> {
    pub collection: &'a str,
    /// Root-relative path with forward slashes.
    pub source_path: &'a str,
    pub content: &'a str,
    pub tier: FileTier,
}

/// Metadata chunks stay small — roughly 300 tokens.
const METADATA_CONTENT_MAX_BYTES: usize = 1200;

/// Parse a file into entities and relations. Deterministic for identical
/// input. A syntactically broken file yields best-effort partial results;
/// only a genuinely unsupported extension errors.
pub fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let ext = req
        .source_path
        .rsplit('.')
        .next()
        .unwrap_or("");
    let kind = ParserKind::from_extension(ext)
        .ok_or_else(|| ParserError::UnsupportedLanguage(ext.to_string()))?;

    let mut parsed = match kind {
        ParserKind::Python => python::parse(req)?,
        ParserKind::TypeScript => typescript::parse(req)?,
        ParserKind::Config => config::parse(req)?,
        ParserKind::Markup => markup::parse(req)?,
        ParserKind::Stylesheet => stylesheet::parse(req)?,
        ParserKind::Markdown => markdown::parse(req)?,
    };

    finalize(req, kind, &mut parsed);
    Ok(parsed)
}

/// Post-parse normalisation shared by all languages: tier stripping,
/// pairing invariant, local relation hygiene.
fn finalize(req: &ParseRequest<'_>, kind: ParserKind, parsed: &mut ParsedSource) {
    // Light tier: metadata-only, no implementation chunks, no relations.
    if req.tier == FileTier::Light {
        parsed
            .entities
            .retain(|e| e.chunk_kind == ChunkKind::Metadata);
        parsed.relations.clear();
    }

    for entity in &mut parsed.entities {
        if !entity.metadata.contains_key("language") {
            entity
                .metadata
                .insert("language".into(), kind.language_name().into());
        }
    }

    // Every implementation chunk must have a metadata sibling.
    let metadata_keys: HashSet<(String, String)> = parsed
        .entities
        .iter()
        .filter(|e| e.chunk_kind == ChunkKind::Metadata)
        .map(|e| (e.source_path.clone(), e.qualified_name.clone()))
        .collect();
    parsed.entities.retain(|e| {
        e.chunk_kind == ChunkKind::Metadata
            || metadata_keys.contains(&(e.source_path.clone(), e.qualified_name.clone()))
    });

    // Relations whose source id is not an entity of this parse are dropped.
    // Cross-file targets are allowed: the target may be indexed later.
    let local_ids: HashSet<&str> = parsed.entities.iter().map(|e| e.id.as_str()).collect();
    let before = parsed.relations.len();
    parsed
        .relations
        .retain(|r| local_ids.contains(r.from_id.as_str()));
    let dropped = before - parsed.relations.len();
    if dropped > 0 {
        tracing::warn!(
            "parser: dropped {} relation(s) with unknown source id in {}",
            dropped,
            req.source_path
        );
    }
}

/// Build the file-level entity every parse emits.
pub(crate) fn file_entity(req: &ParseRequest<'_>, observations: Vec<String>) -> Entity {
    let line_count = req.content.lines().count().max(1) as u32;
    let name = req
        .source_path
        .rsplit('/')
        .next()
        .unwrap_or(req.source_path)
        .to_string();
    let summary = if observations.is_empty() {
        format!("file {}", req.source_path)
    } else {
        format!("file {} — {}", req.source_path, observations.join("; "))
    };
    Entity {
        id: Entity::derive_id(
            req.collection,
            req.source_path,
            req.source_path,
            EntityType::File,
            ChunkKind::Metadata,
        ),
        entity_type: EntityType::File,
        chunk_kind: ChunkKind::Metadata,
        name,
        qualified_name: req.source_path.to_string(),
        source_path: req.source_path.to_string(),
        line_start: 1,
        line_end: line_count,
        observations,
        content: clip_metadata(&summary),
        vector: None,
        metadata: serde_json::Map::new(),
    }
}

/// Build the metadata + implementation chunk pair for a code symbol.
/// The implementation chunk is omitted on the light tier (callers strip it
/// anyway, this just avoids allocating the body twice).
#[allow(clippy::too_many_arguments)]
pub(crate) fn chunk_pair(
    req: &ParseRequest<'_>,
    entity_type: EntityType,
    name: &str,
    qualified_name: &str,
    line_start: u32,
    line_end: u32,
    signature: &str,
    intent: Option<&str>,
    tags: Vec<String>,
    body: &str,
) -> (Entity, Option<Entity>) {
    let mut observations = Vec::new();
    if let Some(intent) = intent {
        let first_sentence = intent
            .split(['.', '\n'])
            .next()
            .unwrap_or(intent)
            .trim()
            .to_string();
        if !first_sentence.is_empty() {
            observations.push(first_sentence);
        }
    }
    observations.extend(tags);

    let metadata_content = clip_metadata(&format!(
        "{} {} at {}:{}\n{}\n{}",
        entity_type.as_str(),
        qualified_name,
        req.source_path,
        line_start,
        signature,
        observations.join("; "),
    ));

    let mut meta_bag = serde_json::Map::new();
    meta_bag.insert("signature".into(), signature.into());

    let metadata = Entity {
        id: Entity::derive_id(
            req.collection,
            req.source_path,
            qualified_name,
            entity_type,
            ChunkKind::Metadata,
        ),
        entity_type,
        chunk_kind: ChunkKind::Metadata,
        name: name.to_string(),
        qualified_name: qualified_name.to_string(),
        source_path: req.source_path.to_string(),
        line_start,
        line_end,
        observations: observations.clone(),
        content: metadata_content,
        vector: None,
        metadata: meta_bag.clone(),
    };

    let implementation = if req.tier == FileTier::Light || body.trim().is_empty() {
        None
    } else {
        Some(Entity {
            id: Entity::derive_id(
                req.collection,
                req.source_path,
                qualified_name,
                entity_type,
                ChunkKind::Implementation,
            ),
            entity_type,
            chunk_kind: ChunkKind::Implementation,
            name: name.to_string(),
            qualified_name: qualified_name.to_string(),
            source_path: req.source_path.to_string(),
            line_start,
            line_end,
            observations,
            content: body.to_string(),
            vector: None,
            metadata: meta_bag,
        })
    };

    (metadata, implementation)
}

/// Edge from a symbol's metadata chunk to its containing file entity.
pub(crate) fn defined_in(req: &ParseRequest<'_>, symbol: &Entity) -> Relation {
    Relation {
        from_id: symbol.id.clone(),
        to_id: Entity::derive_id(
            req.collection,
            req.source_path,
            req.source_path,
            EntityType::File,
            ChunkKind::Metadata,
        ),
        kind: RelationKind::DefinedIn,
        weight: None,
    }
}

/// Resolve a relative import/link target against the current file and derive
/// the would-be file entity id. Returns `None` for package/absolute targets.
pub(crate) fn resolve_relative_target(
    req: &ParseRequest<'_>,
    target: &str,
    candidate_extensions: &[&str],
) -> Option<String> {
    if !(target.starts_with("./") || target.starts_with("../")) {
        return None;
    }
    let dir = match req.source_path.rfind('/') {
        Some(idx) => &req.source_path[..idx],
        None => "",
    };
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            "." | "" => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    let resolved = if joined.rsplit('/').next().is_some_and(|last| last.contains('.')) {
        joined
    } else {
        // Extensionless import: pick the first candidate extension.
        format!("{}.{}", joined, candidate_extensions.first()?)
    };
    Some(Entity::derive_id(
        req.collection,
        &resolved,
        &resolved,
        EntityType::File,
        ChunkKind::Metadata,
    ))
}

fn clip_metadata(content: &str) -> String {
    if content.len() <= METADATA_CONTENT_MAX_BYTES {
        return content.to_string();
    }
    let mut end = METADATA_CONTENT_MAX_BYTES;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &content[..end])
}

/// Text of a node, for tree-sitter based languages.
pub(crate) fn node_text<'a>(node: tree_sitter::Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req<'a>(path: &'a str, content: &'a str, tier: FileTier) -> ParseRequest<'a> {
        ParseRequest {
            collection: "demo",
            source_path: path,
            content,
            tier,
        }
    }

    #[test]
    fn test_parser_kind_dispatch() {
        assert_eq!(ParserKind::from_extension("py"), Some(ParserKind::Python));
        assert_eq!(ParserKind::from_extension("tsx"), Some(ParserKind::TypeScript));
        assert_eq!(ParserKind::from_extension("yml"), Some(ParserKind::Config));
        assert_eq!(ParserKind::from_extension("htm"), Some(ParserKind::Markup));
        assert_eq!(ParserKind::from_extension("css"), Some(ParserKind::Stylesheet));
        assert_eq!(ParserKind::from_extension("md"), Some(ParserKind::Markdown));
        assert_eq!(ParserKind::from_extension("rs"), None);
    }

    #[test]
    fn test_empty_file_yields_single_file_entity() {
        let request = req("src/empty.py", "", FileTier::Standard);
        let parsed = parse(&request).unwrap();
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.entities[0].entity_type, EntityType::File);
        assert!(parsed.relations.is_empty());
    }

    #[test]
    fn test_light_tier_strips_implementation_and_relations() {
        let content = "def f():\n    return 1\n";
        let request = req("gen/bundle_pb2.py", content, FileTier::Light);
        let parsed = parse(&request).unwrap();
        assert!(parsed
            .entities
            .iter()
            .all(|e| e.chunk_kind == ChunkKind::Metadata));
        assert!(parsed.relations.is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let content = "def f(x):\n    return x\n\nclass C:\n    def m(self):\n        pass\n";
        let request = req("src/a.py", content, FileTier::Standard);
        let one = parse(&request).unwrap();
        let two = parse(&request).unwrap();
        let ids_one: Vec<&str> = one.entities.iter().map(|e| e.id.as_str()).collect();
        let ids_two: Vec<&str> = two.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids_one, ids_two);
    }

    #[test]
    fn test_resolve_relative_target() {
        let request = req("src/pages/index.ts", "", FileTier::Standard);
        let resolved = resolve_relative_target(&request, "./widgets/button", &["ts"]);
        let expected = Entity::derive_id(
            "demo",
            "src/pages/widgets/button.ts",
            "src/pages/widgets/button.ts",
            EntityType::File,
            ChunkKind::Metadata,
        );
        assert_eq!(resolved, Some(expected));

        let upward = resolve_relative_target(&request, "../lib/util.ts", &["ts"]);
        let expected_up = Entity::derive_id(
            "demo",
            "src/lib/util.ts",
            "src/lib/util.ts",
            EntityType::File,
            ChunkKind::Metadata,
        );
        assert_eq!(upward, Some(expected_up));

        assert_eq!(resolve_relative_target(&request, "react", &["ts"]), None);
    }

    #[test]
    fn test_relations_with_unknown_source_dropped() {
        let request = req("src/a.py", "", FileTier::Standard);
        let file = file_entity(&request, vec![]);
        let known_id = file.id.clone();
        let mut parsed = ParsedSource {
            entities: vec![file],
            relations: vec![
                Relation {
                    from_id: known_id.clone(),
                    to_id: "elsewhere".into(),
                    kind: RelationKind::References,
                    weight: None,
                },
                Relation {
                    from_id: "never-produced".into(),
                    to_id: known_id,
                    kind: RelationKind::Calls,
                    weight: None,
                },
            ],
        };
        finalize(&request, ParserKind::Python, &mut parsed);
        // unknown source dropped; cross-file target kept (may be indexed later)
        assert_eq!(parsed.relations.len(), 1);
        assert_eq!(parsed.relations[0].kind, RelationKind::References);
    }

    #[test]
    fn test_clip_metadata_respects_char_boundaries() {
        let long = "п".repeat(2000);
        let clipped = clip_metadata(&long);
        assert!(clipped.len() <= METADATA_CONTENT_MAX_BYTES + '…'.len_utf8());
    }
}
