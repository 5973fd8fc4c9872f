//! File discovery — walks a root, applies the layered ignore stack and
//! classifies surviving files into processing tiers.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;

use crate::models::FileTier;

/// Universal defaults: VCS dirs, binaries, lock files, build outputs, OS
/// artefacts. Applied first so user and project layers can re-include.
const DEFAULT_IGNORES: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    ".mnemo/",
    "node_modules/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "target/",
    "dist/",
    "build/",
    ".next/",
    "coverage/",
    "*.lock",
    "*.pyc",
    "*.so",
    "*.dylib",
    "*.dll",
    "*.exe",
    "*.o",
    "*.a",
    "*.zip",
    "*.tar",
    "*.gz",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.pdf",
    "*.woff",
    "*.woff2",
    "*.ttf",
    ".DS_Store",
    "Thumbs.db",
];

/// Extensions the parser stack understands.
const INDEXABLE_EXTENSIONS: &[&str] = &[
    "py", "ts", "tsx", "js", "jsx", "json", "yaml", "yml", "html", "htm", "css", "md", "markdown",
];

/// Path fragments that mark core business logic (deep tier).
const DEEP_PATH_MARKERS: &[&str] = &[
    "/api/", "/routes/", "/store/", "/stores/", "/auth/", "/middleware/", "/services/",
];

/// Content markers that upgrade a file to the deep tier.
const DEEP_CONTENT_MARKERS: &[&str] = &[
    "createStore(",
    "configureStore(",
    "@app.route",
    "@router.",
    "APIRouter(",
    "passport.",
    "jwt.sign",
    "jwt.decode",
    "oauth",
];

/// Build the three-layer ignore matcher. Layers are added in order —
/// defaults, then the per-user global file, then the per-project file — and
/// gitignore precedence makes later patterns win. Negation re-includes a
/// path only when no parent directory is itself excluded.
pub fn build_ignore_stack(root: &Path, extra_patterns: &[String]) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);

    for pattern in DEFAULT_IGNORES {
        let _ = builder.add_line(None, pattern);
    }

    // Per-user global ignore file
    if let Some(home) = dirs::home_dir() {
        let global = home.join(".mnemo").join("ignore");
        if global.exists() {
            let _ = builder.add(&global);
        }
    }

    // Per-project ignore file
    let project = root.join(".mnemoignore");
    if project.exists() {
        let _ = builder.add(&project);
    }

    // Operator-configured patterns from config.toml win last
    for pattern in extra_patterns {
        let _ = builder.add_line(None, pattern);
    }

    builder.build().unwrap_or_else(|e| {
        tracing::warn!("ignore stack build failed, falling back to empty: {}", e);
        Gitignore::empty()
    })
}

/// Whether the parser stack can handle this file at all.
pub fn is_indexable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| INDEXABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Classify a path into a processing tier. `content` is consulted for deep
/// markers when available; path-only classification is a safe lower bound.
pub fn classify_tier(path: &Path, content: Option<&str>) -> FileTier {
    let path_str = path.to_string_lossy().replace('\\', "/");
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    // Generated artefacts that survived the ignore stack: metadata only.
    if file_name.ends_with(".min.js")
        || file_name.ends_with(".min.css")
        || file_name.ends_with(".d.ts")
        || file_name.ends_with("_pb2.py")
        || file_name.ends_with(".generated.ts")
        || path_str.contains("/generated/")
    {
        return FileTier::Light;
    }

    let lowered = path_str.to_ascii_lowercase();
    if DEEP_PATH_MARKERS.iter().any(|m| lowered.contains(m)) {
        return FileTier::Deep;
    }

    if let Some(content) = content {
        if DEEP_CONTENT_MARKERS.iter().any(|m| content.contains(m)) {
            return FileTier::Deep;
        }
    }

    FileTier::Standard
}

/// Walk `root` and return the ordered `(path, tier)` stream. Unreadable
/// entries are logged and skipped; a single bad path never aborts the walk.
pub fn discover(root: &Path, extra_patterns: &[String]) -> Vec<(PathBuf, FileTier)> {
    let ignore_stack = build_ignore_stack(root, extra_patterns);

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .sort_by_file_name(std::ffi::OsStr::cmp)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("discovery: unreadable entry skipped: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if ignore_stack.matched_path_or_any_parents(path, false).is_ignore() {
            continue;
        }
        if !is_indexable(path) {
            continue;
        }
        files.push((path.to_path_buf(), classify_tier(path, None)));
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "x").unwrap();
    }

    #[test]
    fn test_discover_applies_default_ignores() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/app.py");
        touch(tmp.path(), "node_modules/pkg/index.js");
        touch(tmp.path(), "build/out.js");
        touch(tmp.path(), "image.png");

        let files = discover(tmp.path(), &[]);
        let names: Vec<String> = files
            .iter()
            .map(|(p, _)| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["src/app.py"]);
    }

    #[test]
    fn test_project_ignore_layer_wins() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/app.py");
        touch(tmp.path(), "src/skipme.py");
        fs::write(tmp.path().join(".mnemoignore"), "skipme.py\n").unwrap();

        let files = discover(tmp.path(), &[]);
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("src/app.py"));
    }

    #[test]
    fn test_negation_cannot_reinclude_under_excluded_parent() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "vendor/lib/keep.py");
        fs::write(tmp.path().join(".mnemoignore"), "vendor/\n!vendor/lib/keep.py\n").unwrap();

        // Strict rule: excluded parent wins over the negation.
        let files = discover(tmp.path(), &[]);
        assert!(files.is_empty());
    }

    #[test]
    fn test_extra_patterns_layer() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.py");
        touch(tmp.path(), "b.py");
        let files = discover(tmp.path(), &["b.py".to_string()]);
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("a.py"));
    }

    #[test]
    fn test_tier_classification() {
        assert_eq!(
            classify_tier(Path::new("lib/bundle.min.js"), None),
            FileTier::Light
        );
        assert_eq!(
            classify_tier(Path::new("types/index.d.ts"), None),
            FileTier::Light
        );
        assert_eq!(
            classify_tier(Path::new("src/api/users.ts"), None),
            FileTier::Deep
        );
        assert_eq!(
            classify_tier(Path::new("src/auth/session.py"), None),
            FileTier::Deep
        );
        assert_eq!(
            classify_tier(Path::new("src/util.py"), None),
            FileTier::Standard
        );
        assert_eq!(
            classify_tier(Path::new("src/store.py"), Some("store = configureStore({})")),
            FileTier::Deep
        );
    }

    #[test]
    fn test_is_indexable() {
        assert!(is_indexable(Path::new("a.py")));
        assert!(is_indexable(Path::new("a.tsx")));
        assert!(is_indexable(Path::new("README.md")));
        assert!(!is_indexable(Path::new("a.rs")));
        assert!(!is_indexable(Path::new("binary")));
    }

    #[test]
    fn test_discovery_is_ordered() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.py");
        touch(tmp.path(), "a.py");
        touch(tmp.path(), "c.py");
        let files = discover(tmp.path(), &[]);
        let names: Vec<_> = files
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.py", "b.py", "c.py"]);
    }
}
