use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where uploaded files are kept. Private documents land under
/// `<root>/<owner_id>/<doc_id>/`, public ones under `<root>/public/<doc_id>/`.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_window_tokens() -> usize {
    400
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_lexical_prefilter")]
    pub lexical_prefilter: bool,
    /// Upper bound on chunks pulled from the lexical index per query.
    #[serde(default = "default_lexical_candidate_k")]
    pub lexical_candidate_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            lexical_prefilter: default_lexical_prefilter(),
            lexical_candidate_k: default_lexical_candidate_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_lexical_prefilter() -> bool {
    true
}
fn default_lexical_candidate_k() -> i64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Program used to turn legacy `.doc` files into text.
    #[serde(default = "default_legacy_converter")]
    pub legacy_converter: String,
    /// Arguments passed before the input path.
    #[serde(default = "default_legacy_converter_args")]
    pub legacy_converter_args: Vec<String>,
    #[serde(default = "default_converter_timeout_secs")]
    pub converter_timeout_secs: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            legacy_converter: default_legacy_converter(),
            legacy_converter_args: default_legacy_converter_args(),
            converter_timeout_secs: default_converter_timeout_secs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_legacy_converter() -> String {
    "antiword".to_string()
}
fn default_legacy_converter_args() -> Vec<String> {
    vec!["-m".to_string(), "UTF-8.txt".to_string()]
}
fn default_converter_timeout_secs() -> u64 {
    60
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self::with_root(Path::new("./data"))
    }
}

impl Config {
    /// Config rooted at `dir`: database at `dir/kc.sqlite`, files under
    /// `dir/documents`, everything else at defaults.
    pub fn with_root(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("kc.sqlite"),
            },
            storage: StorageConfig {
                root: dir.join("documents"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.window_tokens == 0 {
            anyhow::bail!("chunking.window_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.window_tokens {
            anyhow::bail!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.window_tokens ({})",
                self.chunking.overlap_tokens,
                self.chunking.window_tokens
            );
        }

        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.lexical_candidate_k < 1 {
            anyhow::bail!("retrieval.lexical_candidate_k must be >= 1");
        }

        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "local" | "hash" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be local or hash.",
                other
            ),
        }

        if self.extraction.converter_timeout_secs == 0 {
            anyhow::bail!("extraction.converter_timeout_secs must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse(
            r#"
            [db]
            path = "/tmp/kc.sqlite"
            [storage]
            root = "/tmp/docs"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.window_tokens, 400);
        assert_eq!(cfg.chunking.overlap_tokens, 50);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!(cfg.retrieval.lexical_prefilter);
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.embedding.dims, 384);
        assert_eq!(cfg.extraction.legacy_converter, "antiword");
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/kc.sqlite"
            [storage]
            root = "/tmp/docs"
            [chunking]
            window_tokens = 50
            overlap_tokens = 50
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/kc.sqlite"
            [storage]
            root = "/tmp/docs"
            [embedding]
            provider = "openai"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn with_root_is_valid() {
        let cfg = Config::with_root(Path::new("/var/lib/kc"));
        cfg.validate().unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("/var/lib/kc/kc.sqlite"));
        assert_eq!(cfg.storage.root, PathBuf::from("/var/lib/kc/documents"));
    }
}
