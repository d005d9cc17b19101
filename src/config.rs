//! TOML configuration.
//!
//! ```toml
//! [knowledge]
//! path = "./data/knowledge_base.json"
//!
//! [cache]
//! backend = "sqlite"          # sqlite | memory | disabled
//! path = "./data/coach.sqlite"
//!
//! [embedding]
//! provider = "local"          # local | ollama | disabled
//! model = "all-minilm-l6-v2"
//!
//! [retrieval]
//! top_k = 3
//! min_threshold = 0.45
//! confident_threshold = 0.55
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! Only `[knowledge]` is required; every other section has defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use trail_coach_core::responder::{
    Responder, Thresholds, DEFAULT_CONFIDENT_THRESHOLD, DEFAULT_FALLBACK_MESSAGE,
    DEFAULT_MIN_THRESHOLD,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    /// JSON array of knowledge entries.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            path: default_cache_path(),
        }
    }
}

fn default_cache_backend() -> String {
    "sqlite".to_string()
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/coach.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
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
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f32,
    #[serde(default = "default_confident_threshold")]
    pub confident_threshold: f32,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_threshold: default_min_threshold(),
            confident_threshold: default_confident_threshold(),
            fallback_message: default_fallback_message(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_min_threshold() -> f32 {
    DEFAULT_MIN_THRESHOLD
}
fn default_confident_threshold() -> f32 {
    DEFAULT_CONFIDENT_THRESHOLD
}
fn default_fallback_message() -> String {
    DEFAULT_FALLBACK_MESSAGE.to_string()
}

impl RetrievalConfig {
    pub fn thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::new(self.min_threshold, self.confident_threshold)?)
    }

    pub fn responder(&self) -> Result<Responder> {
        Ok(Responder::new(
            self.thresholds()?,
            self.fallback_message.clone(),
        ))
    }
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
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    config
        .retrieval
        .thresholds()
        .context("Invalid retrieval thresholds")?;

    // Validate embedding
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if config.embedding.dims.is_none() {
                anyhow::bail!("embedding.dims must be specified when provider is 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, ollama, or disabled.",
            other
        ),
    }

    // Validate cache
    match config.cache.backend.as_str() {
        "sqlite" | "memory" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown cache backend: '{}'. Must be sqlite, memory, or disabled.",
            other
        ),
    }

    Ok(config)
}
