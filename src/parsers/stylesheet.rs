//! Stylesheet parser — selectors, custom properties and `@import` edges.

use std::sync::OnceLock;

use regex::Regex;

use super::{file_entity, resolve_relative_target, ParseRequest, ParsedSource, Result};
use crate::models::{Relation, RelationKind};

fn selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Class/id selectors at rule starts; keeps extraction cheap and line-stable.
    RE.get_or_init(|| Regex::new(r"(?m)^\s*([.#][A-Za-z_][A-Za-z0-9_-]*)").unwrap())
}

fn custom_prop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(--[A-Za-z][A-Za-z0-9-]*)\s*:").unwrap())
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?\s*;"#).unwrap()
    })
}

pub(crate) fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let mut out = ParsedSource::default();
    let mut observations = Vec::new();

    let mut selectors: Vec<String> = selector_re()
        .captures_iter(req.content)
        .map(|c| c[1].to_string())
        .collect();
    selectors.sort();
    selectors.dedup();
    for selector in selectors.iter().take(30) {
        observations.push(format!("selector:{}", selector));
    }

    let mut props: Vec<String> = custom_prop_re()
        .captures_iter(req.content)
        .map(|c| c[1].to_string())
        .collect();
    props.sort();
    props.dedup();
    for prop in props.iter().take(30) {
        observations.push(format!("property:{}", prop));
    }

    let file = file_entity(req, observations);
    let file_id = file.id.clone();
    out.entities.push(file);

    let mut targets = Vec::new();
    for cap in import_re().captures_iter(req.content) {
        let raw = &cap[1];
        if raw.starts_with("http") {
            continue;
        }
        let normalised = if raw.starts_with("./") || raw.starts_with("../") {
            raw.to_string()
        } else {
            format!("./{}", raw)
        };
        if let Some(target) = resolve_relative_target(req, &normalised, &["css"]) {
            targets.push(target);
        }
    }
    targets.sort();
    targets.dedup();
    for target in targets {
        out.relations.push(Relation {
            from_id: file_id.clone(),
            to_id: target,
            kind: RelationKind::Imports,
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
            source_path: "site/styles/main.css",
            content,
            tier: FileTier::Standard,
        };
        parse(&req).unwrap()
    }

    #[test]
    fn test_selectors_and_custom_properties() {
        let src = ":root {\n  --brand-color: #fff;\n}\n.button {\n  color: var(--brand-color);\n}\n#header {\n  margin: 0;\n}\n";
        let parsed = parse_src(src);
        let file = &parsed.entities[0];
        assert!(file.observations.iter().any(|o| o == "selector:.button"));
        assert!(file.observations.iter().any(|o| o == "selector:#header"));
        assert!(file.observations.iter().any(|o| o == "property:--brand-color"));
    }

    #[test]
    fn test_import_edge() {
        let src = "@import \"reset.css\";\n@import url(https://fonts.example.com/x.css);\n";
        let parsed = parse_src(src);
        assert_eq!(parsed.relations.len(), 1);
        let expected = Entity::derive_id(
            "demo",
            "site/styles/reset.css",
            "site/styles/reset.css",
            EntityType::File,
            ChunkKind::Metadata,
        );
        assert_eq!(parsed.relations[0].to_id, expected);
        assert_eq!(parsed.relations[0].kind, RelationKind::Imports);
    }
}
