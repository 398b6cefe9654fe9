//! Embedding provider abstraction and implementations.
//!
//! Providers form a closed set of named variants ([`EmbeddingProviderKind`]),
//! each with a fixed model and dimensionality. The index collection name is
//! derived from the variant, so switching providers can never silently mix
//! vectors of different geometry.
//!
//! Implementations make a single request per batch and surface failures
//! immediately. Retry policy belongs to callers, not the provider.
//!
//! Also provides vector utilities for SQLite BLOB storage:
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 byte encoding
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`l2_normalize`] — unit-length scaling for providers that return raw vectors

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// The supported embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EmbeddingProviderKind {
    /// OpenAI `text-embedding-3-small` (1536 dims, unit-normalized).
    #[serde(rename = "openai-small")]
    OpenAiSmall,
    /// OpenAI `text-embedding-3-large` (3072 dims, unit-normalized).
    #[serde(rename = "openai-large")]
    OpenAiLarge,
    /// Ollama `nomic-embed-text` (768 dims).
    #[serde(rename = "ollama-nomic-embed-text")]
    OllamaNomicEmbedText,
    /// Ollama `mxbai-embed-large` (1024 dims).
    #[serde(rename = "ollama-mxbai-embed-large")]
    OllamaMxbaiEmbedLarge,
}

impl EmbeddingProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAiSmall => "openai-small",
            Self::OpenAiLarge => "openai-large",
            Self::OllamaNomicEmbedText => "ollama-nomic-embed-text",
            Self::OllamaMxbaiEmbedLarge => "ollama-mxbai-embed-large",
        }
    }

    /// Model identifier sent to the backend.
    pub fn model(&self) -> &'static str {
        match self {
            Self::OpenAiSmall => "text-embedding-3-small",
            Self::OpenAiLarge => "text-embedding-3-large",
            Self::OllamaNomicEmbedText => "nomic-embed-text",
            Self::OllamaMxbaiEmbedLarge => "mxbai-embed-large",
        }
    }

    pub fn dims(&self) -> usize {
        match self {
            Self::OpenAiSmall => 1536,
            Self::OpenAiLarge => 3072,
            Self::OllamaNomicEmbedText => 768,
            Self::OllamaMxbaiEmbedLarge => 1024,
        }
    }

    /// Whether the backend already returns unit-length vectors.
    pub fn is_normalized(&self) -> bool {
        matches!(self, Self::OpenAiSmall | Self::OpenAiLarge)
    }

    /// Index collection name for this provider. Derived from the variant,
    /// never user-supplied.
    pub fn collection(&self) -> String {
        format!("chunks_{}_{}", self.id().replace('-', "_"), self.dims())
    }
}

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn kind(&self) -> EmbeddingProviderKind;

    /// Embed a batch of document chunks, one vector per input in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query. Must use the same model and produce the same
    /// geometry as [`embed_documents`](Embedder::embed_documents).
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.embed_documents(&[text.to_string()]).await?;
        vecs.pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }
}

/// Validate a backend response batch: count, dimensionality, normalization.
fn finish_batch(
    kind: EmbeddingProviderKind,
    expected_count: usize,
    mut vecs: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vecs.len() != expected_count {
        return Err(Error::Embedding(format!(
            "provider returned {} embeddings for {} inputs",
            vecs.len(),
            expected_count
        )));
    }
    for v in &vecs {
        if v.len() != kind.dims() {
            return Err(Error::Embedding(format!(
                "provider returned {}-dim vector, expected {}",
                v.len(),
                kind.dims()
            )));
        }
    }
    if !kind.is_normalized() {
        for v in &mut vecs {
            l2_normalize(v);
        }
    }
    Ok(vecs)
}

// ============ OpenAI ============

/// Embedding backend using the OpenAI `POST /v1/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    kind: EmbeddingProviderKind,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(kind: EmbeddingProviderKind, timeout_secs: u64) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;
        Ok(Self {
            kind,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn kind(&self) -> EmbeddingProviderKind {
        self.kind
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.kind.model(),
            "input": texts,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("invalid OpenAI response: {}", e)))?;

        let vecs = parse_openai_embeddings(&json)?;
        finish_batch(self.kind, texts.len(), vecs)
    }
}

fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Embedding("invalid OpenAI response: missing embedding".to_string())
            })?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

// ============ Ollama ============

/// Embedding backend using a local Ollama instance's `POST /api/embed`.
pub struct OllamaEmbedder {
    kind: EmbeddingProviderKind,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(kind: EmbeddingProviderKind, url: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;
        Ok(Self {
            kind,
            url: url.unwrap_or("http://localhost:11434").to_string(),
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn kind(&self) -> EmbeddingProviderKind {
        self.kind
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.kind.model(),
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::Embedding(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("invalid Ollama response: {}", e)))?;

        let vecs = parse_ollama_embeddings(&json)?;
        finish_batch(self.kind, texts.len(), vecs)
    }
}

fn parse_ollama_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::Embedding("invalid Ollama response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                Error::Embedding("invalid Ollama response: embedding is not an array".to_string())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

/// Create the configured embedding backend.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let kind = config.provider;
    match kind {
        EmbeddingProviderKind::OpenAiSmall | EmbeddingProviderKind::OpenAiLarge => {
            Ok(Arc::new(OpenAiEmbedder::new(kind, config.timeout_secs)?))
        }
        EmbeddingProviderKind::OllamaNomicEmbedText
        | EmbeddingProviderKind::OllamaMxbaiEmbedLarge => Ok(Arc::new(OllamaEmbedder::new(
            kind,
            config.url.as_deref(),
            config.timeout_secs,
        )?)),
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale a vector to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
