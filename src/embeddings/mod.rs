//! Embedding of article text into fixed-dimensional vectors.
//!
//! The pipeline owns exactly one embedder instance, constructed once and
//! shared by reference. Implementations must be pure (same text, same
//! vector) and safe to call from concurrent ingest tasks.

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::errors::EmbedError;

/// Maps a text string to a vector of fixed dimension (C5).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The vector length this embedder produces, fixed at construction.
    fn dimension(&self) -> usize;

    /// Embed one text. Empty or whitespace-only input yields the zero
    /// vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Local, deterministic embedder: feature-hashing of lowercased
/// alphanumeric tokens, L2-normalized. No model download, no network;
/// the default provider and the backbone of the test suite.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dimension must be positive");
        Self { dim }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let hash = fnv1a(token.as_bytes());
            let bucket = ((hash >> 1) % self.dim as u64) as usize;
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Embedder backed by an OpenAI-style embeddings endpoint.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl RemoteEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.config.dimension]);
        }

        let url = self
            .config
            .api_url
            .as_deref()
            .ok_or_else(|| EmbedError::Remote("remote embedder has no api_url".into()))?;

        let payload = serde_json::json!({ "input": text });
        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbedError::Remote(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EmbedError::Remote(format!(
                "embedding endpoint returned HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::Remote(format!("parse error: {e}")))?;
        let values = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| EmbedError::Remote("missing embedding in response".into()))?;

        let vector: Vec<f32> = values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vector.len() != self.config.dimension {
            return Err(EmbedError::Dimension {
                expected: self.config.dimension,
                got: vector.len(),
            });
        }
        Ok(vector)
    }
}
