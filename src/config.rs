//! TOML configuration.
//!
//! Every section is optional; a missing file behaves like an empty one
//! (see [`load_config_or_default`]). The Anthropic API key is never read from
//! the file, only from the `ANTHROPIC_API_KEY` environment variable (after an
//! optional `.env` file has been loaded by the binary).
//!
//! ```toml
//! [anthropic]
//! model = "claude-sonnet-4-20250514"
//! max_tool_rounds = 2
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 100
//!
//! [db]
//! path = "./data/rag.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the Anthropic API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Value shipped in the example `.env`; treated as "not configured".
pub const PLACEHOLDER_API_KEY: &str = "your-anthropic-api-key-here";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub anthropic: AnthropicConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub session: SessionConfig,
    pub db: DbConfig,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    /// Resolved from the environment by [`Config::with_env`], never parsed.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnthropicConfig {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_rounds: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 800,
            temperature: 0.0,
            max_tool_rounds: 2,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters of trailing sentences repeated at the start of the next chunk.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_results: 5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of user/assistant exchanges remembered per session.
    pub max_history: usize,
    /// Sessions kept in memory before the least recently used is dropped.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: 2,
            max_sessions: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
    /// `"sqlite"` or `"memory"`.
    pub backend: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rag.sqlite"),
            backend: "sqlite".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub docs_path: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Directory depth scanned below `docs_path`; 1 means only its direct children.
    pub max_depth: usize,
    pub load_on_startup: bool,
    pub clear_existing: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            docs_path: PathBuf::from("../docs"),
            include_globs: vec![
                "*.txt".to_string(),
                "*.pdf".to_string(),
                "*.docx".to_string(),
            ],
            exclude_globs: Vec::new(),
            max_depth: 1,
            load_on_startup: true,
            clear_existing: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub frontend_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            frontend_dir: PathBuf::from("../frontend"),
        }
    }
}

/// How the configured API key looks before any request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    Missing,
    Placeholder,
    Present,
}

impl Config {
    /// Picks up the API key from the process environment.
    pub fn with_env(mut self) -> Self {
        self.api_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self
    }

    pub fn api_key_status(&self) -> ApiKeyStatus {
        match self.api_key.as_deref() {
            None => ApiKeyStatus::Missing,
            Some(PLACEHOLDER_API_KEY) => ApiKeyStatus::Placeholder,
            Some(_) => ApiKeyStatus::Present,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.retrieval.max_results < 1 {
            bail!("retrieval.max_results must be >= 1");
        }
        if self.anthropic.max_tool_rounds < 1 {
            bail!("anthropic.max_tool_rounds must be >= 1");
        }
        if self.session.max_sessions < 1 {
            bail!("session.max_sessions must be >= 1");
        }
        if self.anthropic.max_tokens == 0 {
            bail!("anthropic.max_tokens must be > 0");
        }

        match self.db.backend.as_str() {
            "sqlite" | "memory" => {}
            other => bail!(
                "Unknown store backend: '{}'. Must be sqlite or memory.",
                other
            ),
        }

        match self.embedding.provider.as_str() {
            "disabled" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if matches!(self.embedding.dims, None | Some(0)) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }

        Ok(())
    }
}

/// Parses and validates a config file. The API key is not resolved here.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but falls back to defaults when `path` does not exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.retrieval.max_results, 5);
        assert_eq!(config.session.max_history, 2);
        assert_eq!(config.anthropic.max_tool_rounds, 2);
        assert_eq!(config.embedding.provider, "disabled");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[chunking]\nchunk_size = 300\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 300);
        assert_eq!(config.chunking.chunk_overlap, 100);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let config: Config =
            toml::from_str("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_embeddings_need_model_and_dims() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("embedding.model"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config: Config = toml::from_str("[db]\nbackend = \"chroma\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_status() {
        let mut config = Config::default();
        assert_eq!(config.api_key_status(), ApiKeyStatus::Missing);
        config.api_key = Some(PLACEHOLDER_API_KEY.to_string());
        assert_eq!(config.api_key_status(), ApiKeyStatus::Placeholder);
        config.api_key = Some("sk-ant-test".to_string());
        assert_eq!(config.api_key_status(), ApiKeyStatus::Present);
    }
}
