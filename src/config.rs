use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Knowledge source locations.
///
/// Missing source files are skipped at load time (the store may come up
/// empty, which is valid); `snapshot_path` enables persistence of custom
/// additions across process restarts.
#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_faq_path")]
    pub faq_path: PathBuf,
    #[serde(default = "default_categories_path")]
    pub categories_path: PathBuf,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Remote JSON feeds ingested at startup (FAQ or category shaped).
    #[serde(default)]
    pub remote_urls: Vec<String>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            faq_path: default_faq_path(),
            categories_path: default_categories_path(),
            snapshot_path: None,
            remote_urls: Vec::new(),
        }
    }
}

fn default_faq_path() -> PathBuf {
    PathBuf::from("knowledge_base/product_faq.json")
}

fn default_categories_path() -> PathBuf {
    PathBuf::from("knowledge_base/product_categories.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default result count for `search` when the caller does not pass one.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// How many ranked documents `get_context` considers.
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,
    /// Character budget for the assembled context string.
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_top_k: default_context_top_k(),
            context_max_chars: default_context_max_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_top_k() -> usize {
    3
}
fn default_context_max_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"disabled"` or `"openai"` (any OpenAI-compatible gateway).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// API base URL. Defaults to the OpenAI endpoint; point it at a
    /// compatible gateway to use a different vendor.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.context_top_k < 1 {
        anyhow::bail!("retrieval.context_top_k must be >= 1");
    }
    if config.retrieval.context_max_chars < 1 {
        anyhow::bail!("retrieval.context_max_chars must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kb.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_defaults() {
        let (_tmp, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.context_top_k, 3);
        assert_eq!(config.retrieval.context_max_chars, 1000);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let (_tmp, path) = write_config("[embedding]\nprovider = \"openai\"\n");
        assert!(load_config(&path).is_err());

        let (_tmp, path) = write_config(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-ada-002\"\ndims = 1536\n",
        );
        let config = load_config(&path).unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let (_tmp, path) = write_config(
            "[embedding]\nprovider = \"sentence-transformers\"\nmodel = \"x\"\ndims = 384\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_zero_context_budget_rejected() {
        let (_tmp, path) = write_config("[retrieval]\ncontext_max_chars = 0\n");
        assert!(load_config(&path).is_err());
    }
}
