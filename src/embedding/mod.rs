//! Embedding backends and their loaders.
//!
//! A backend is reached in two steps. An [`EmbedderLoader`] is cheap to
//! build from configuration and does nothing until the coach initializes;
//! [`EmbedderLoader::load`] then downloads or connects to the model and
//! returns a ready [`Embedder`]. The split lets the worker report model
//! loading as its own phase and drop the model on reset.
//!
//! | `provider` | Loader | Embedder |
//! |------------|--------|----------|
//! | `"local"` | [`LocalLoader`] | fastembed, in-process (feature `local-embeddings-fastembed`) |
//! | `"ollama"` | [`OllamaLoader`] | `POST {url}/api/embed` |
//! | `"disabled"` | [`DisabledLoader`] | never loads |
//!
//! Every backend returns L2-normalized vectors.
//!
//! Loaders report model progress under [`MODEL_LABEL`] as a start event
//! (0 of 1) and a finish event (1 of 1). fastembed does not expose
//! per-file download progress; on a terminal it draws its own download bar
//! on stderr, which is not forwarded as progress events.
//!
//! # Retry Strategy
//!
//! The Ollama backend retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use trail_coach_core::embedding::{normalize_l2, Embedder};
use trail_coach_core::progress::{ProgressEvent, ProgressSink};
use trail_coach_core::{CoachError, Result};

use crate::config::EmbeddingConfig;

/// Progress label for model loading.
pub const MODEL_LABEL: &str = "model";

/// Produces a ready [`Embedder`] on demand.
#[async_trait]
pub trait EmbedderLoader: Send + Sync {
    /// Identifier of the model this loader produces.
    fn model_name(&self) -> &str;

    /// Load the model. Failures are [`CoachError::ModelLoad`].
    async fn load(&self, progress: &dyn ProgressSink) -> Result<Arc<dyn Embedder>>;
}

/// Build the loader named by `config.provider`.
pub fn create_loader(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbedderLoader>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLoader)),
        "ollama" => Ok(Arc::new(OllamaLoader::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalLoader::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => anyhow::bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// A loader that always fails; used when `embedding.provider = "disabled"`.
pub struct DisabledLoader;

#[async_trait]
impl EmbedderLoader for DisabledLoader {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn load(&self, _progress: &dyn ProgressSink) -> Result<Arc<dyn Embedder>> {
        Err(CoachError::model_load(
            "disabled",
            "embedding provider is disabled; set [embedding] provider to local or ollama",
        ))
    }
}

// ============ Ollama ============

/// Loader for a local Ollama instance.
///
/// Loading sends one probe request so an unreachable server or a missing
/// model fails initialization rather than the first question.
pub struct OllamaLoader {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    timeout: Duration,
}

impl OllamaLoader {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbedderLoader for OllamaLoader {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn load(&self, progress: &dyn ProgressSink) -> Result<Arc<dyn Embedder>> {
        progress.report(ProgressEvent::new(0, 1, MODEL_LABEL));
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| CoachError::model_load(&self.model, e.to_string()))?;

        let embedder = OllamaEmbedder {
            client,
            model: self.model.clone(),
            dims: self.dims,
            url: self.url.clone(),
            max_retries: self.max_retries,
        };
        embedder
            .embed("ping")
            .await
            .map_err(|e| CoachError::model_load(&self.model, e.to_string()))?;

        progress.report(ProgressEvent::new(1, 1, MODEL_LABEL));
        Ok(Arc::new(embedder))
    }
}

/// Embedder backed by Ollama's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| CoachError::embedding("ollama", e.to_string()))?;
                        return parse_ollama_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = CoachError::embedding(
                        "ollama",
                        format!("Ollama API error {}: {}", status, body_text),
                    );
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(attempt, %status, "retrying ollama request");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(CoachError::embedding(
                        "ollama",
                        format!("connection error (is Ollama running at {}?): {}", self.url, e),
                    ));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CoachError::embedding("ollama", "embedding failed after retries")))
    }

    fn check_dims(&self, v: Vec<f32>) -> Result<Vec<f32>> {
        if v.len() != self.dims {
            return Err(CoachError::embedding(
                "ollama",
                format!(
                    "model {} returned {} dimensions, configured {}",
                    self.model,
                    v.len(),
                    self.dims
                ),
            ));
        }
        Ok(normalize_l2(v))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self
            .request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoachError::embedding("ollama", "empty embedding response"))?;
        self.check_dims(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(texts).await?;
        if vectors.len() != texts.len() {
            return Err(CoachError::embedding(
                "ollama",
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        vectors.into_iter().map(|v| self.check_dims(v)).collect()
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let invalid = |what: &str| CoachError::embedding("ollama", format!("invalid response: {}", what));

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| -> Result<Vec<f32>> {
            let values = embedding
                .as_array()
                .ok_or_else(|| invalid("embedding is not an array"))?;
            Ok(values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

// ============ Local (fastembed) ============

/// Resolve the local model name and its dimensionality.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" | "paraphrase-multilingual-minilm-l12-v2" => 384,
        "bge-small-en-v1.5" | "multilingual-e5-small" => 384,
        "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "paraphrase-multilingual-minilm-l12-v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(CoachError::model_load(
            other,
            "unknown local embedding model. Supported models: all-minilm-l6-v2, \
             paraphrase-multilingual-minilm-l12-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
        )),
    }
}

/// Loader for in-process fastembed models.
///
/// Model files are downloaded from Hugging Face on first load and cached;
/// later loads run offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalLoader {
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalLoader {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        config_to_fastembed_model(&model_name)?;
        Ok(Self { model_name, dims })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbedderLoader for LocalLoader {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn load(&self, progress: &dyn ProgressSink) -> Result<Arc<dyn Embedder>> {
        progress.report(ProgressEvent::new(0, 1, MODEL_LABEL));
        let model = config_to_fastembed_model(&self.model_name)?;
        let show_progress = atty::is(atty::Stream::Stderr);

        let name = self.model_name.clone();
        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(show_progress),
            )
            .map_err(|e| CoachError::model_load(&name, e.to_string()))
        })
        .await
        .map_err(|e| CoachError::model_load(&self.model_name, e.to_string()))??;

        progress.report(ProgressEvent::new(1, 1, MODEL_LABEL));
        Ok(Arc::new(LocalEmbedder {
            model: Arc::new(std::sync::Mutex::new(model)),
            model_name: self.model_name.clone(),
            dims: self.dims,
        }))
    }
}

/// fastembed `TextEmbedding` behind a mutex; inference runs on the
/// blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoachError::embedding("local", "empty embedding output"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| CoachError::embedding("local", "model lock poisoned"))?;
            model
                .embed(texts, None)
                .map_err(|e| CoachError::embedding("local", e.to_string()))
        })
        .await
        .map_err(|e| CoachError::embedding("local", e.to_string()))??;

        Ok(vectors.into_iter().map(normalize_l2).collect())
    }
}
