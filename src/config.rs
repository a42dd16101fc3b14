use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"sqlite"` or `"qdrant"`. Selected once at startup.
    pub backend: String,
    /// Directory holding one SQLite file per product (sqlite backend).
    #[serde(default = "default_sqlite_dir")]
    pub sqlite_dir: PathBuf,
    /// Base URL of the Qdrant REST API (qdrant backend).
    #[serde(default)]
    pub qdrant_url: Option<String>,
    /// Environment variable holding the Qdrant API key, if required.
    #[serde(default)]
    pub qdrant_api_key_env: Option<String>,
    /// Explicit collection name overriding the `{product}_{version}`
    /// convention (qdrant backend).
    #[serde(default)]
    pub qdrant_collection: Option<String>,
}

fn default_sqlite_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            endpoint: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// One configured ingestion source. Immutable for the duration of a run.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub product: String,
    pub version: String,
    /// Per-source override of the global embedding provider.
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// GitHub issue tracker: one document per issue (body + comments).
    GithubIssues {
        /// `owner/name` repository identifier.
        repo: String,
    },
    /// Breadth-first website crawl under a root URL prefix.
    Website {
        url: String,
        #[serde(default = "default_max_depth")]
        max_depth: usize,
        #[serde(default = "default_max_pages")]
        max_pages: usize,
    },
    /// Recursive walk of a local file tree.
    LocalDirectory {
        root: PathBuf,
        /// When set, local paths are rewritten as `{prefix}{relative path}`.
        /// Paths resolving outside `root` fall back to `file://` URLs.
        #[serde(default)]
        url_rewrite_prefix: Option<String>,
        #[serde(default = "default_include_globs")]
        include_globs: Vec<String>,
        #[serde(default)]
        exclude_globs: Vec<String>,
        #[serde(default)]
        branch: Option<String>,
    },
}

fn default_max_depth() -> usize {
    5
}
fn default_max_pages() -> usize {
    500
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.rst".to_string(),
    ]
}

impl SourceConfig {
    /// Human-readable label used in logs and reports.
    pub fn label(&self) -> String {
        match &self.kind {
            SourceKind::GithubIssues { repo } => format!("github:{}", repo),
            SourceKind::Website { url, .. } => format!("website:{}", url),
            SourceKind::LocalDirectory { root, .. } => {
                format!("local:{}", root.display())
            }
        }
    }

    /// URL prefix that scopes end-of-run cleanup, or `None` for sources
    /// whose traversal is incremental and must not drive deletion.
    ///
    /// The crawler stores page urls without a trailing slash, so the
    /// website prefix is normalized the same way; otherwise the root page
    /// itself would fall outside the cleanup scope.
    pub fn cleanup_prefix(&self) -> Option<String> {
        match &self.kind {
            SourceKind::GithubIssues { .. } => None,
            SourceKind::Website { url, .. } => Some(url.trim_end_matches('/').to_string()),
            SourceKind::LocalDirectory {
                root,
                url_rewrite_prefix,
                ..
            } => Some(match url_rewrite_prefix {
                Some(prefix) => prefix.clone(),
                None => format!("file://{}", root.display()),
            }),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate storage
    match config.storage.backend.as_str() {
        "sqlite" => {}
        "qdrant" => {
            if config.storage.qdrant_url.is_none() {
                anyhow::bail!("storage.qdrant_url must be set when backend is 'qdrant'");
            }
        }
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be sqlite or qdrant.",
            other
        ),
    }

    // Validate embedding (global and per-source overrides)
    validate_embedding(&config.embedding)?;
    for source in &config.sources {
        if let Some(ref emb) = source.embedding {
            validate_embedding(emb)?;
        }
        if source.product.trim().is_empty() {
            anyhow::bail!("source '{}' has an empty product name", source.label());
        }
        if source.version.trim().is_empty() {
            anyhow::bail!("source '{}' has an empty version", source.label());
        }
        match &source.kind {
            SourceKind::GithubIssues { repo } => {
                if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
                    anyhow::bail!("source repo must be 'owner/name', got '{}'", repo);
                }
            }
            SourceKind::Website { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("website source url must be http(s): '{}'", url);
                }
            }
            SourceKind::LocalDirectory { .. } => {}
        }
    }

    // Cleanup scoping is a URL-prefix match against stored urls, so two
    // sources of the same product with nested prefixes would delete each
    // other's documents. Reject that up front.
    for (i, a) in config.sources.iter().enumerate() {
        for b in config.sources.iter().skip(i + 1) {
            if a.product != b.product {
                continue;
            }
            if let (Some(pa), Some(pb)) = (a.cleanup_prefix(), b.cleanup_prefix()) {
                if pa.starts_with(&pb) || pb.starts_with(&pa) {
                    anyhow::bail!(
                        "sources '{}' and '{}' have overlapping cleanup prefixes \
                         ('{}' vs '{}'); prefixes must be disjoint per product",
                        a.label(),
                        b.label(),
                        pa,
                        pb
                    );
                }
            }
        }
    }

    Ok(config)
}

fn validate_embedding(config: &EmbeddingConfig) -> Result<()> {
    if config.dims.is_none() || config.dims == Some(0) {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.provider
        );
    }
    if config.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.provider
        );
    }
    match config.provider.as_str() {
        "openai" | "ollama" => Ok(()),
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("docdex.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    const BASE: &str = r#"
[storage]
backend = "sqlite"
sqlite_dir = "./data"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536
"#;

    #[test]
    fn test_minimal_config_parses() {
        let (_tmp, path) = write_config(BASE);
        let config = load_config(&path).unwrap();
        assert_eq!(config.storage.backend, "sqlite");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_source_variants_parse() {
        let content = format!(
            r#"{BASE}
[[sources]]
type = "github_issues"
product = "widget"
version = "1.2"
repo = "acme/widget"

[[sources]]
type = "website"
product = "widget"
version = "1.2"
url = "https://docs.acme.dev/"

[[sources]]
type = "local_directory"
product = "widget"
version = "1.2"
root = "./docs"
url_rewrite_prefix = "https://internal.acme.dev/docs/"
"#
        );
        let (_tmp, path) = write_config(&content);
        let config = load_config(&path).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert!(matches!(
            config.sources[0].kind,
            SourceKind::GithubIssues { .. }
        ));
        assert_eq!(config.sources[0].cleanup_prefix(), None);
        // Normalized the way the crawler stores page urls.
        assert_eq!(
            config.sources[1].cleanup_prefix().as_deref(),
            Some("https://docs.acme.dev")
        );
    }

    #[test]
    fn test_qdrant_requires_url() {
        let content = r#"
[storage]
backend = "qdrant"

[embedding]
provider = "openai"
model = "m"
dims = 8
"#;
        let (_tmp, path) = write_config(content);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("qdrant_url"));
    }

    #[test]
    fn test_missing_dims_rejected() {
        let content = r#"
[storage]
backend = "sqlite"

[embedding]
provider = "openai"
model = "m"
"#;
        let (_tmp, path) = write_config(content);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let content = r#"
[storage]
backend = "sqlite"

[embedding]
provider = "acme-embed"
model = "m"
dims = 8
"#;
        let (_tmp, path) = write_config(content);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_overlapping_prefixes_rejected() {
        let content = format!(
            r#"{BASE}
[[sources]]
type = "website"
product = "widget"
version = "1.2"
url = "https://docs.acme.dev/"

[[sources]]
type = "website"
product = "widget"
version = "1.2"
url = "https://docs.acme.dev/guides/"
"#
        );
        let (_tmp, path) = write_config(&content);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("overlapping cleanup prefixes"));
    }

    #[test]
    fn test_overlapping_prefixes_allowed_across_products() {
        let content = format!(
            r#"{BASE}
[[sources]]
type = "website"
product = "widget"
version = "1.2"
url = "https://docs.acme.dev/"

[[sources]]
type = "website"
product = "gadget"
version = "2.0"
url = "https://docs.acme.dev/gadget/"
"#
        );
        let (_tmp, path) = write_config(&content);
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn test_bad_repo_rejected() {
        let content = format!(
            r#"{BASE}
[[sources]]
type = "github_issues"
product = "widget"
version = "1.2"
repo = "not-a-repo"
"#
        );
        let (_tmp, path) = write_config(&content);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("owner/name"));
    }
}
