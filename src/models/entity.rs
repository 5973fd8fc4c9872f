use serde::{Deserialize, Serialize};

/// What kind of indexable unit an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Function,
    Class,
    Method,
    File,
    Documentation,
    Requirement,
    Spec,
    Prd,
    Tdd,
    Adr,
    DebuggingPattern,
    ImplementationPattern,
    IntegrationPattern,
    ConfigurationPattern,
    ArchitecturePattern,
    PerformancePattern,
    KnowledgeInsight,
    ActiveIssue,
    Idea,
    /// Relation edges are stored as payload rows of this type so that graph
    /// traversal reuses the same scroll/search primitives.
    Relation,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::File => "file",
            Self::Documentation => "documentation",
            Self::Requirement => "requirement",
            Self::Spec => "spec",
            Self::Prd => "prd",
            Self::Tdd => "tdd",
            Self::Adr => "adr",
            Self::DebuggingPattern => "debugging_pattern",
            Self::ImplementationPattern => "implementation_pattern",
            Self::IntegrationPattern => "integration_pattern",
            Self::ConfigurationPattern => "configuration_pattern",
            Self::ArchitecturePattern => "architecture_pattern",
            Self::PerformancePattern => "performance_pattern",
            Self::KnowledgeInsight => "knowledge_insight",
            Self::ActiveIssue => "active_issue",
            Self::Idea => "idea",
            Self::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "function" => Self::Function,
            "class" => Self::Class,
            "method" => Self::Method,
            "file" => Self::File,
            "documentation" => Self::Documentation,
            "requirement" => Self::Requirement,
            "spec" => Self::Spec,
            "prd" => Self::Prd,
            "tdd" => Self::Tdd,
            "adr" => Self::Adr,
            "debugging_pattern" => Self::DebuggingPattern,
            "implementation_pattern" => Self::ImplementationPattern,
            "integration_pattern" => Self::IntegrationPattern,
            "configuration_pattern" => Self::ConfigurationPattern,
            "architecture_pattern" => Self::ArchitecturePattern,
            "performance_pattern" => Self::PerformancePattern,
            "knowledge_insight" => Self::KnowledgeInsight,
            "active_issue" => Self::ActiveIssue,
            "idea" => Self::Idea,
            "relation" => Self::Relation,
            _ => return None,
        })
    }

    /// Manual types are hand-authored through the write tools and survive
    /// collection recreation via the JSON mirror.
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            Self::DebuggingPattern
                | Self::ImplementationPattern
                | Self::IntegrationPattern
                | Self::ConfigurationPattern
                | Self::ArchitecturePattern
                | Self::PerformancePattern
                | Self::KnowledgeInsight
                | Self::ActiveIssue
                | Self::Idea
        )
    }

    /// Documentation-family types served by the doc tools.
    pub fn is_documentation(&self) -> bool {
        matches!(
            self,
            Self::Documentation | Self::Requirement | Self::Spec | Self::Prd | Self::Tdd | Self::Adr
        )
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Two-granularity representation for progressive disclosure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Name, signature, location, short observations.
    Metadata,
    /// Full source body, fetched only on explicit expansion.
    Implementation,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Implementation => "implementation",
        }
    }
}

/// Processing tier assigned by file discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTier {
    /// Generated/minified/declaration files: metadata-only parse.
    Light,
    Standard,
    /// Core business logic: full parse plus semantic enhancement.
    Deep,
}

impl FileTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::Deep => "deep",
        }
    }
}

/// One indexable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    pub chunk_kind: ChunkKind,
    pub name: String,
    pub qualified_name: String,
    pub source_path: String,
    pub line_start: u32,
    pub line_end: u32,
    /// Ordered short strings: docstring summary, tags, signals.
    #[serde(default)]
    pub observations: Vec<String>,
    /// Textual payload that gets embedded.
    pub content: String,
    /// Dense embedding of `content`; present only after the embed stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Opaque bag: language, visibility, complexity tier, signature...
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    /// Deterministic id: blake3 of the identity tuple, truncated to 32 hex
    /// chars. Re-indexing unchanged content must reproduce it byte for byte.
    pub fn derive_id(
        collection: &str,
        source_path: &str,
        qualified_name: &str,
        entity_type: EntityType,
        chunk_kind: ChunkKind,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(collection.as_bytes());
        hasher.update(b"\0");
        hasher.update(source_path.as_bytes());
        hasher.update(b"\0");
        hasher.update(qualified_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(entity_type.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(chunk_kind.as_str().as_bytes());
        hasher.finalize().to_hex()[..32].to_string()
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Directed relation edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub from_id: String,
    pub to_id: String,
    pub kind: RelationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Imports,
    Calls,
    Inherits,
    References,
    DefinedIn,
    Documents,
    ImplementsRequirement,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::Inherits => "inherits",
            Self::References => "references",
            Self::DefinedIn => "defined_in",
            Self::Documents => "documents",
            Self::ImplementsRequirement => "implements_requirement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "imports" => Self::Imports,
            "calls" => Self::Calls,
            "inherits" => Self::Inherits,
            "references" => Self::References,
            "defined_in" => Self::DefinedIn,
            "documents" => Self::Documents,
            "implements_requirement" => Self::ImplementsRequirement,
            _ => return None,
        })
    }
}

impl Relation {
    /// Render a relation as a store row so edges live in the same collection
    /// as ordinary entities.
    pub fn to_entity(&self, collection: &str) -> Entity {
        let qualified = format!("{}-[{}]->{}", self.from_id, self.kind.as_str(), self.to_id);
        let mut metadata = serde_json::Map::new();
        metadata.insert("from_id".into(), self.from_id.clone().into());
        metadata.insert("to_id".into(), self.to_id.clone().into());
        metadata.insert("relation_kind".into(), self.kind.as_str().into());
        if let Some(w) = self.weight {
            metadata.insert("weight".into(), w.into());
        }
        Entity {
            id: Entity::derive_id(
                collection,
                "",
                &qualified,
                EntityType::Relation,
                ChunkKind::Metadata,
            ),
            entity_type: EntityType::Relation,
            chunk_kind: ChunkKind::Metadata,
            name: self.kind.as_str().to_string(),
            qualified_name: qualified.clone(),
            source_path: String::new(),
            line_start: 0,
            line_end: 0,
            observations: Vec::new(),
            content: qualified,
            vector: None,
            metadata,
        }
    }

    /// Inverse of [`Relation::to_entity`].
    pub fn from_entity(entity: &Entity) -> Option<Relation> {
        if entity.entity_type != EntityType::Relation {
            return None;
        }
        Some(Relation {
            from_id: entity.meta_str("from_id")?.to_string(),
            to_id: entity.meta_str("to_id")?.to_string(),
            kind: RelationKind::parse(entity.meta_str("relation_kind")?)?,
            weight: entity.metadata.get("weight").and_then(|v| v.as_f64()),
        })
    }
}

/// Sanitise a project name into a collection identifier: lowercase ASCII
/// plus hyphens, runs collapsed, edges trimmed.
pub fn collection_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true; // suppress leading dash
    for ch in raw.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            'A'..='Z' => Some(ch.to_ascii_lowercase()),
            '-' => Some('-'),
            _ => Some('-'),
        };
        match mapped {
            Some('-') => {
                if !last_dash {
                    out.push('-');
                    last_dash = true;
                }
            }
            Some(c) => {
                out.push(c);
                last_dash = false;
            }
            None => {}
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("default");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_deterministic() {
        let a = Entity::derive_id("demo", "src/a.py", "mod.f", EntityType::Function, ChunkKind::Metadata);
        let b = Entity::derive_id("demo", "src/a.py", "mod.f", EntityType::Function, ChunkKind::Metadata);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_derive_id_distinguishes_chunk_kind() {
        let meta = Entity::derive_id("demo", "src/a.py", "mod.f", EntityType::Function, ChunkKind::Metadata);
        let imp = Entity::derive_id("demo", "src/a.py", "mod.f", EntityType::Function, ChunkKind::Implementation);
        assert_ne!(meta, imp);
    }

    #[test]
    fn test_derive_id_no_field_bleed() {
        // Separator must prevent "ab"+"c" colliding with "a"+"bc"
        let x = Entity::derive_id("demo", "ab", "c", EntityType::File, ChunkKind::Metadata);
        let y = Entity::derive_id("demo", "a", "bc", EntityType::File, ChunkKind::Metadata);
        assert_ne!(x, y);
    }

    #[test]
    fn test_collection_name_sanitising() {
        assert_eq!(collection_name("My Project!"), "my-project");
        assert_eq!(collection_name("foo__bar--baz"), "foo-bar-baz");
        assert_eq!(collection_name("---"), "default");
        assert_eq!(collection_name("Already-ok-123"), "already-ok-123");
    }

    #[test]
    fn test_relation_entity_round_trip() {
        let rel = Relation {
            from_id: "aaa".into(),
            to_id: "bbb".into(),
            kind: RelationKind::Calls,
            weight: Some(0.5),
        };
        let ent = rel.to_entity("demo");
        assert_eq!(ent.entity_type, EntityType::Relation);
        let back = Relation::from_entity(&ent).unwrap();
        assert_eq!(back, rel);
    }

    #[test]
    fn test_manual_types() {
        assert!(EntityType::KnowledgeInsight.is_manual());
        assert!(EntityType::ActiveIssue.is_manual());
        assert!(!EntityType::Function.is_manual());
        assert!(!EntityType::Relation.is_manual());
    }

    #[test]
    fn test_entity_type_round_trip() {
        for s in [
            "function", "class", "method", "file", "documentation", "requirement",
            "spec", "prd", "tdd", "adr", "debugging_pattern", "implementation_pattern",
            "integration_pattern", "configuration_pattern", "architecture_pattern",
            "performance_pattern", "knowledge_insight", "active_issue", "idea", "relation",
        ] {
            let t = EntityType::parse(s).unwrap();
            assert_eq!(t.as_str(), s);
        }
        assert!(EntityType::parse("nope").is_none());
    }
}
