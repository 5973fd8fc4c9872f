//! Structured-data parser — JSON and YAML files become configuration
//! entities keyed by their top-level keys and nested key paths.

use super::{file_entity, ParseRequest, ParsedSource, Result};
use crate::models::{ChunkKind, Entity, EntityType};

/// Nested key paths are enumerated to a bounded depth; anything deeper is a
/// value, not configuration structure.
const MAX_KEY_DEPTH: usize = 3;
const MAX_PATHS_PER_KEY: usize = 50;

pub(crate) fn parse(req: &ParseRequest<'_>) -> Result<ParsedSource> {
    let ext = req.source_path.rsplit('.').next().unwrap_or("");
    let value: Option<serde_json::Value> = match ext {
        "json" => serde_json::from_str(req.content).ok(),
        _ => serde_yaml::from_str(req.content).ok(),
    };

    let mut out = ParsedSource::default();

    let Some(serde_json::Value::Object(map)) = value else {
        // Unparseable or non-object root: just the file entity.
        out.entities.push(file_entity(req, vec![]));
        return Ok(out);
    };

    let mut key_observations = Vec::new();
    for (key, val) in &map {
        key_observations.push(key.clone());

        let mut paths = Vec::new();
        collect_key_paths(key, val, 1, &mut paths);
        paths.truncate(MAX_PATHS_PER_KEY);

        let mut observations = paths.clone();
        if looks_like_schema(val) {
            observations.push("schema".to_string());
        }

        let qualified = format!("{}#{}", req.source_path, key);
        let content = format!(
            "configuration key {} in {}\n{}",
            key,
            req.source_path,
            paths.join("\n")
        );
        let mut metadata = serde_json::Map::new();
        metadata.insert("role".into(), "configuration".into());

        out.entities.push(Entity {
            id: Entity::derive_id(
                req.collection,
                req.source_path,
                &qualified,
                EntityType::ConfigurationPattern,
                ChunkKind::Metadata,
            ),
            entity_type: EntityType::ConfigurationPattern,
            chunk_kind: ChunkKind::Metadata,
            name: key.clone(),
            qualified_name: qualified,
            source_path: req.source_path.to_string(),
            line_start: 1,
            line_end: req.content.lines().count().max(1) as u32,
            observations,
            content,
            vector: None,
            metadata,
        });
    }

    out.entities.push(file_entity(req, key_observations));
    Ok(out)
}

fn collect_key_paths(prefix: &str, value: &serde_json::Value, depth: usize, out: &mut Vec<String>) {
    out.push(prefix.to_string());
    if depth >= MAX_KEY_DEPTH {
        return;
    }
    if let serde_json::Value::Object(map) = value {
        for (key, val) in map {
            collect_key_paths(&format!("{}.{}", prefix, key), val, depth + 1, out);
        }
    }
}

fn looks_like_schema(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            map.contains_key("$schema")
                || (map.contains_key("type") && map.contains_key("properties"))
        }
        _ => false,
    }
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
    fn test_json_top_level_keys() {
        let src = r#"{"server": {"port": 8080, "tls": {"cert": "x"}}, "debug": true}"#;
        let parsed = parse_src("config/app.json", src);
        let keys: Vec<&str> = parsed
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::ConfigurationPattern)
            .map(|e| e.name.as_str())
            .collect();
        assert!(keys.contains(&"server"));
        assert!(keys.contains(&"debug"));

        let server = parsed
            .entities
            .iter()
            .find(|e| e.name == "server")
            .unwrap();
        assert!(server.observations.iter().any(|o| o == "server.port"));
        assert!(server.observations.iter().any(|o| o == "server.tls.cert"));
    }

    #[test]
    fn test_yaml_parsing() {
        let src = "database:\n  host: localhost\n  port: 5432\nlogging:\n  level: info\n";
        let parsed = parse_src("config/app.yaml", src);
        let keys: Vec<&str> = parsed
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::ConfigurationPattern)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"database"));
        assert!(keys.contains(&"logging"));
    }

    #[test]
    fn test_schema_role_detection() {
        let src = r#"{"payload": {"type": "object", "properties": {"id": {}}}}"#;
        let parsed = parse_src("schemas/payload.json", src);
        let payload = parsed
            .entities
            .iter()
            .find(|e| e.name == "payload")
            .unwrap();
        assert!(payload.observations.iter().any(|o| o == "schema"));
    }

    #[test]
    fn test_broken_config_still_yields_file_entity() {
        let parsed = parse_src("config/bad.json", "{not json");
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.entities[0].entity_type, EntityType::File);
    }
}
