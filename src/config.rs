use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::EmbeddingProviderKind;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("docq.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("storage/uploads")
}
fn default_max_upload_mb() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    175
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,
    /// Base URL for Ollama providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::OllamaNomicEmbedText
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` or `"ollama"`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3.1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of chunks retrieved for a question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Hard cap on the caller-supplied k.
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_max_query_len")]
    pub max_query_len: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_k: default_max_k(),
            max_query_len: default_max_query_len(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_k() -> usize {
    20
}
fn default_max_query_len() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Load and validate a config file. A missing file yields the built-in
/// defaults; any other read failure is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(Error::Config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            )))
        }
    };

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(Error::Config("chunking.chunk_size must be > 0".to_string()));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(Error::Config(format!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap, config.chunking.chunk_size
        )));
    }
    if config.retrieval.top_k == 0 || config.retrieval.top_k > config.retrieval.max_k {
        return Err(Error::Config(format!(
            "retrieval.top_k must be in 1..={}",
            config.retrieval.max_k
        )));
    }
    if config.storage.max_upload_mb == 0 {
        return Err(Error::Config("storage.max_upload_mb must be > 0".to_string()));
    }
    match config.llm.provider.as_str() {
        "openai" | "ollama" => {}
        other => {
            return Err(Error::Config(format!(
                "unknown llm provider: '{}'. Must be openai or ollama.",
                other
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("failed to parse config file: {}", e)))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Path::new("/nonexistent/docq.toml")).unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("docq.db"));
        assert_eq!(cfg.embedding.provider, EmbeddingProviderKind::OllamaNomicEmbedText);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"docq.db\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 800);
        assert_eq!(cfg.chunking.overlap, 175);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.storage.max_upload_mb, 50);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn overlap_at_least_chunk_size_is_rejected() {
        let err = parse(
            "[db]\npath = \"docq.db\"\n[chunking]\nchunk_size = 100\noverlap = 100\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn unknown_llm_provider_is_rejected() {
        let err = parse("[db]\npath = \"docq.db\"\n[llm]\nprovider = \"bard\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn named_embedding_provider_parses() {
        let cfg = parse(
            "[db]\npath = \"docq.db\"\n[embedding]\nprovider = \"openai-small\"\n",
        )
        .unwrap();
        assert_eq!(cfg.embedding.provider.dims(), 1536);
    }
}
