//! Markup parser — component tags, identifiers, classes and cross-file
//! style/script edges out of HTML. Emits only relation edges plus the
//! file-level entity.

use std::sync::OnceLock;

use regex::Regex;

use super::{file_entity, resolve_relative_target, ParseRequest, ParsedSource, Result};
use crate::models::{Relation, RelationKind};

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z][A-Za-z0-9-]*)").unwrap())
}

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\bid\s*=\s*["']([^"']+)["']"#).unwrap())
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\bclass\s*=\s*["']([^"']+)["']"#).unwrap())
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\b(?:href|src)\s*=\s*["']([^"'#?]+)["']"#).unwrap())
}

pub(crate) fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let mut out = ParsedSource::default();
    let mut observations = Vec::new();

    // Component-style tags: custom elements and framework components.
    let mut component_tags: Vec<String> = tag_re()
        .captures_iter(req.content)
        .map(|c| c[1].to_string())
        .filter(|t| t.contains('-') || t.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
        .collect();
    component_tags.sort();
    component_tags.dedup();
    for tag in component_tags.iter().take(20) {
        observations.push(format!("component:{}", tag));
    }

    let mut ids: Vec<String> = id_re()
        .captures_iter(req.content)
        .map(|c| c[1].to_string())
        .collect();
    ids.sort();
    ids.dedup();
    for id in ids.iter().take(20) {
        observations.push(format!("id:{}", id));
    }

    let mut classes: Vec<String> = class_re()
        .captures_iter(req.content)
        .flat_map(|c| c[1].split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .collect();
    classes.sort();
    classes.dedup();
    for class in classes.iter().take(20) {
        observations.push(format!("class:{}", class));
    }

    let file = file_entity(req, observations);
    let file_id = file.id.clone();
    out.entities.push(file);

    // Cross-file edges to local stylesheets, scripts and pages.
    let mut targets = Vec::new();
    for cap in link_re().captures_iter(req.content) {
        let raw = &cap[1];
        if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with("//") {
            continue;
        }
        let normalised = if raw.starts_with("./") || raw.starts_with("../") {
            raw.to_string()
        } else {
            format!("./{}", raw.trim_start_matches('/'))
        };
        if let Some(target) = resolve_relative_target(req, &normalised, &["css", "js", "html"]) {
            targets.push(target);
        }
    }
    targets.sort();
    targets.dedup();
    for target in targets {
        out.relations.push(Relation {
            from_id: file_id.clone(),
            to_id: target,
            kind: RelationKind::References,
            weight: None,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKind, Entity, EntityType, FileTier};

    fn parse_src(content: &str) -> ParsedSource {
        let req = ParseRequest {
            collection: "demo",
            source_path: "site/index.html",
            content,
            tier: FileTier::Standard,
        };
        parse(&req).unwrap()
    }

    #[test]
    fn test_single_file_entity_with_observations() {
        let src = r#"<html><body>
<div id="app" class="container main"></div>
<my-widget></my-widget>
<AppHeader/>
</body></html>"#;
        let parsed = parse_src(src);
        assert_eq!(parsed.entities.len(), 1);
        let file = &parsed.entities[0];
        assert_eq!(file.entity_type, EntityType::File);
        assert!(file.observations.iter().any(|o| o == "component:my-widget"));
        assert!(file.observations.iter().any(|o| o == "component:AppHeader"));
        assert!(file.observations.iter().any(|o| o == "id:app"));
        assert!(file.observations.iter().any(|o| o == "class:container"));
        assert!(file.observations.iter().any(|o| o == "class:main"));
    }

    #[test]
    fn test_stylesheet_link_edge() {
        let src = r#"<link rel="stylesheet" href="styles/main.css">"#;
        let parsed = parse_src(src);
        assert_eq!(parsed.relations.len(), 1);
        let expected = Entity::derive_id(
            "demo",
            "site/styles/main.css",
            "site/styles/main.css",
            EntityType::File,
            ChunkKind::Metadata,
        );
        assert_eq!(parsed.relations[0].to_id, expected);
        assert_eq!(parsed.relations[0].kind, RelationKind::References);
    }

    #[test]
    fn test_external_links_ignored() {
        let src = r#"<script src="https://cdn.example.com/lib.js"></script>"#;
        let parsed = parse_src(src);
        assert!(parsed.relations.is_empty());
    }
}
