//! Markdown & design-document parser — headings, code fences and
//! requirement extraction (RFC 2119 keywords, bracketed ids, numbered
//! clauses). A document yields a document entity plus one requirement
//! entity per identified requirement.

use std::sync::OnceLock;

use regex::Regex;

use super::{chunk_pair, ParseRequest, ParsedSource, Result};
use crate::models::{ChunkKind, Entity, EntityType, Relation, RelationKind};

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})\s+(.+?)\s*$").unwrap())
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^```([A-Za-z0-9_+-]*)\s*$").unwrap())
}

fn rfc2119_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*[-*]\s*(?:The\s+system\s+)?(MUST(?:\s+NOT)?|SHALL(?:\s+NOT)?|SHOULD(?:\s+NOT)?|MAY)\s+(.+?)\s*$")
            .unwrap()
    })
}

fn req_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)\[REQ-(\d+)\]\s*(.+?)\s*$").unwrap())
}

fn numbered_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*\d+\.\s+(.*\b(?:MUST|SHALL|SHOULD|MAY)\b.+?)\s*$").unwrap()
    })
}

/// Filename patterns for design-document classification.
const DOC_TYPE_PATTERNS: &[(&str, EntityType)] = &[
    ("adr", EntityType::Adr),
    ("decision", EntityType::Adr),
    ("prd", EntityType::Prd),
    ("product-requirements", EntityType::Prd),
    ("tdd", EntityType::Tdd),
    ("technical-design", EntityType::Tdd),
    ("spec", EntityType::Spec),
    ("specification", EntityType::Spec),
];

fn detect_doc_type(source_path: &str, content: &str) -> EntityType {
    let file_name = source_path
        .rsplit('/')
        .next()
        .unwrap_or(source_path)
        .to_ascii_lowercase();
    for (pattern, doc_type) in DOC_TYPE_PATTERNS {
        if file_name.contains(pattern) {
            return *doc_type;
        }
    }
    // Content fallback: explicit headers near the top.
    let head: String = content.chars().take(400).collect::<String>().to_ascii_lowercase();
    if head.contains("architecture decision record") {
        return EntityType::Adr;
    }
    if head.contains("product requirements") {
        return EntityType::Prd;
    }
    if head.contains("technical design") {
        return EntityType::Tdd;
    }
    EntityType::Documentation
}

pub(crate) fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let mut out = ParsedSource::default();
    let doc_type = detect_doc_type(req.source_path, req.content);

    let mut observations = Vec::new();
    let title = heading_re()
        .captures(req.content)
        .map(|c| c[2].to_string());
    for cap in heading_re().captures_iter(req.content).take(15) {
        observations.push(format!("heading:{}", &cap[2]));
    }
    let mut fence_langs: Vec<String> = fence_re()
        .captures_iter(req.content)
        .map(|c| c[1].to_string())
        .filter(|l| !l.is_empty())
        .collect();
    fence_langs.sort();
    fence_langs.dedup();
    for lang in fence_langs.iter().take(10) {
        observations.push(format!("code-fence:{}", lang));
    }

    let requirements = extract_requirements(req.content);
    if !requirements.is_empty() {
        observations.push(format!("requirements:{}", requirements.len()));
    }

    let name = title.unwrap_or_else(|| {
        req.source_path
            .rsplit('/')
            .next()
            .unwrap_or(req.source_path)
            .to_string()
    });
    let intent = observations.first().cloned();
    let (doc_meta, doc_imp) = chunk_pair(
        req,
        doc_type,
        &name,
        req.source_path,
        1,
        req.content.lines().count().max(1) as u32,
        &format!("{} {}", doc_type.as_str(), req.source_path),
        intent.as_deref(),
        observations,
        req.content,
    );
    let doc_id = doc_meta.id.clone();
    out.entities.push(doc_meta);
    if let Some(imp) = doc_imp {
        out.entities.push(imp);
    }

    for requirement in requirements {
        let qualified = format!("{}#{}", req.source_path, requirement.key);
        let display: String = requirement.text.chars().take(60).collect();
        let entity = Entity {
            id: Entity::derive_id(
                req.collection,
                req.source_path,
                &qualified,
                EntityType::Requirement,
                ChunkKind::Metadata,
            ),
            entity_type: EntityType::Requirement,
            chunk_kind: ChunkKind::Metadata,
            name: format!("{}: {}", requirement.key, display),
            qualified_name: qualified,
            source_path: req.source_path.to_string(),
            line_start: requirement.line,
            line_end: requirement.line,
            observations: vec![format!("strength:{}", requirement.strength)],
            content: requirement.text,
            vector: None,
            metadata: serde_json::Map::new(),
        };
        out.relations.push(Relation {
            from_id: doc_id.clone(),
            to_id: entity.id.clone(),
            kind: RelationKind::Documents,
            weight: None,
        });
        out.entities.push(entity);
    }

    Ok(out)
}

struct ExtractedRequirement {
    key: String,
    text: String,
    strength: String,
    line: u32,
}

fn extract_requirements(content: &str) -> Vec<ExtractedRequirement> {
    let mut out: Vec<ExtractedRequirement> = Vec::new();
    let mut counter = 0usize;
    let mut seen = std::collections::HashSet::new();

    let mut push = |key: Option<String>, text: String, strength: String, line: u32| {
        let text = text.trim().to_string();
        if text.is_empty() || !seen.insert(text.clone()) {
            return;
        }
        counter += 1;
        out.push(ExtractedRequirement {
            key: key.unwrap_or_else(|| format!("REQ-{:03}", counter)),
            text,
            strength,
            line,
        });
    };

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if let Some(cap) = req_id_re().captures(line) {
            push(
                Some(format!("REQ-{}", &cap[1])),
                cap[2].to_string(),
                strength_of(&cap[2]),
                line_no,
            );
            continue;
        }
        if let Some(cap) = rfc2119_re().captures(line) {
            let keyword = cap[1].to_string();
            push(None, format!("{} {}", keyword, &cap[2]), keyword, line_no);
            continue;
        }
        if let Some(cap) = numbered_clause_re().captures(line) {
            let text = cap[1].to_string();
            push(None, text.clone(), strength_of(&text), line_no);
        }
    }

    out
}

fn strength_of(text: &str) -> String {
    for keyword in ["MUST NOT", "MUST", "SHALL NOT", "SHALL", "SHOULD NOT", "SHOULD", "MAY"] {
        if text.contains(keyword) {
            return keyword.to_string();
        }
    }
    "MUST".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileTier;

    fn parse_src(path: &str, content: &str) -> ParsedSource {
        let req = ParseRequest {
            collection: "demo",
            source_path: path,
            content,
            tier: FileTier::Standard,
        };
        parse(&req).unwrap()
    }

    #[test]
    fn test_document_entity_with_headings() {
        let src = "# Design Overview\n\n## Goals\n\n```rust\nfn main() {}\n```\n";
        let parsed = parse_src("docs/overview.md", src);
        let doc = parsed
            .entities
            .iter()
            .find(|e| e.chunk_kind == ChunkKind::Metadata && e.entity_type == EntityType::Documentation)
            .unwrap();
        assert_eq!(doc.name, "Design Overview");
        assert!(doc.observations.iter().any(|o| o == "heading:Goals"));
        assert!(doc.observations.iter().any(|o| o == "code-fence:rust"));
        // full body kept as the implementation chunk
        assert!(parsed
            .entities
            .iter()
            .any(|e| e.chunk_kind == ChunkKind::Implementation && e.content == src));
    }

    #[test]
    fn test_rfc2119_requirement_extraction() {
        let src = "# Spec\n\n- The system MUST validate tokens.\n- SHOULD cache results.\n";
        let parsed = parse_src("docs/auth-spec.md", src);
        let reqs: Vec<&Entity> = parsed
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Requirement)
            .collect();
        assert_eq!(reqs.len(), 2);
        assert!(reqs[0].content.contains("MUST validate tokens"));
        assert!(reqs[0].observations.iter().any(|o| o == "strength:MUST"));
        // one documents edge per requirement
        let edges = parsed
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Documents)
            .count();
        assert_eq!(edges, 2);
    }

    #[test]
    fn test_bracketed_requirement_ids() {
        let src = "[REQ-7] Sessions expire after 30 minutes.\n";
        let parsed = parse_src("docs/reqs.md", src);
        let req = parsed
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Requirement)
            .unwrap();
        assert!(req.name.starts_with("REQ-7:"));
    }

    #[test]
    fn test_numbered_clause_extraction() {
        let src = "1. The service MUST retry failed writes.\n2. Plain step, no keyword.\n";
        let parsed = parse_src("docs/steps.md", src);
        let reqs: Vec<&Entity> = parsed
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Requirement)
            .collect();
        assert_eq!(reqs.len(), 1);
    }

    #[test]
    fn test_doc_type_detection() {
        assert_eq!(detect_doc_type("docs/adr-001-storage.md", ""), EntityType::Adr);
        assert_eq!(detect_doc_type("docs/payments-prd.md", ""), EntityType::Prd);
        assert_eq!(detect_doc_type("docs/search-spec.md", ""), EntityType::Spec);
        assert_eq!(
            detect_doc_type("notes.md", "# Foo\nArchitecture Decision Record"),
            EntityType::Adr
        );
        assert_eq!(detect_doc_type("README.md", "# Hello"), EntityType::Documentation);
    }

    #[test]
    fn test_requirement_ids_stable_across_runs() {
        let src = "- MUST do one thing.\n- MUST do another.\n";
        let a = parse_src("docs/s.md", src);
        let b = parse_src("docs/s.md", src);
        let ids_a: Vec<&str> = a.entities.iter().map(|e| e.id.as_str()).collect();
        let ids_b: Vec<&str> = b.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
