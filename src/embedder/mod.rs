//! Embedder — maps text to fixed-dimension dense vectors through a
//! pluggable provider, with retries, adaptive batching and zero-vector
//! flagging for blank input.

pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    /// Transient transport/provider failure — retried with backoff.
    #[error("Embedding error: {0}")]
    Embedding(#[from] anyhow::Error),

    /// Provider asked us to back off for a specific duration.
    #[error("Rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// Permanent per-item failure — surfaced, batch continues.
    #[error("Invalid input at index {index}: {reason}")]
    InvalidInput { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, EmbedderError>;

/// A swappable embedding backend. Each provider declares a fixed dimension;
/// mixing dimensions within a collection is forbidden and checked upstream.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// One embedded text with its bookkeeping flags.
#[derive(Debug, Clone)]
pub struct EmbeddedText {
    pub vector: Vec<f32>,
    /// True when the input was blank and replaced with a zero vector
    /// without touching the provider.
    pub zero_vector: bool,
}

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// Adaptive batch sizing: start small, ramp toward the cap while the
/// provider and memory keep up, halve on pressure.
#[derive(Debug)]
pub struct BatchRamp {
    current: usize,
    min: usize,
    max: usize,
}

impl BatchRamp {
    pub fn new() -> Self {
        Self {
            current: 5,
            min: 5,
            max: 64,
        }
    }

    pub fn size(&self) -> usize {
        self.current
    }

    pub fn ramp_up(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    pub fn halve(&mut self) {
        self.current = (self.current / 2).max(self.min);
    }
}

impl Default for BatchRamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry/zero-vector wrapper over a provider.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    #[allow(dead_code)]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Cache key: `(provider, model, content_hash)` — repeat calls within a
    /// collection must return byte-identical vectors even for a
    /// non-deterministic provider.
    pub fn cache_key(&self, content_hash: &str) -> String {
        format!("{}:{}:{}", self.provider.name(), self.provider.model(), content_hash)
    }

    /// Embed a batch. Blank texts never reach the provider: they become
    /// zero vectors flagged as such. Transient provider errors retry with
    /// exponential backoff and jitter; rate limits sleep the advised
    /// duration; a permanent error surfaces after the retry budget.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddedText>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let dimension = self.provider.dimension();
        let mut out: Vec<Option<EmbeddedText>> = vec![None; texts.len()];
        let mut to_embed = Vec::new();
        let mut to_embed_indices = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                out[i] = Some(EmbeddedText {
                    vector: vec![0.0; dimension],
                    zero_vector: true,
                });
            } else {
                to_embed.push(text.clone());
                to_embed_indices.push(i);
            }
        }

        // Permanent per-item failures surface as flagged zero vectors and
        // the rest of the batch proceeds; the loop is bounded by the batch
        // size since every pass removes at least one item.
        while !to_embed.is_empty() {
            match self.embed_with_retry(to_embed.clone()).await {
                Ok(vectors) => {
                    for (j, idx) in to_embed_indices.iter().enumerate() {
                        let vector =
                            vectors.get(j).cloned().unwrap_or_else(|| vec![0.0; dimension]);
                        out[*idx] = Some(EmbeddedText {
                            vector,
                            zero_vector: false,
                        });
                    }
                    break;
                }
                Err(EmbedderError::InvalidInput { index, reason }) if index < to_embed.len() => {
                    let original = to_embed_indices[index];
                    tracing::warn!(
                        "embedder rejected item {} ({}); zero vector substituted",
                        original,
                        reason
                    );
                    out[original] = Some(EmbeddedText {
                        vector: vec![0.0; dimension],
                        zero_vector: true,
                    });
                    to_embed.remove(index);
                    to_embed_indices.remove(index);
                }
                Err(other) => return Err(other),
            }
        }

        Ok(out.into_iter().map(|e| e.expect("all slots filled")).collect())
    }

    /// Single-text convenience for search queries.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedded = self.embed_batch(&[text.to_string()]).await?;
        Ok(embedded
            .into_iter()
            .next()
            .map(|e| e.vector)
            .unwrap_or_default())
    }

    async fn embed_with_retry(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.provider.embed(texts.clone()).await {
                Ok(vectors) => return Ok(vectors),
                Err(EmbedderError::RateLimited(advised)) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(EmbedderError::RateLimited(advised));
                    }
                    tracing::warn!("embedder rate limited, sleeping {:?}", advised);
                    tokio::time::sleep(advised).await;
                }
                Err(err @ EmbedderError::InvalidInput { .. }) => return Err(err),
                Err(EmbedderError::Embedding(e)) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(EmbedderError::Embedding(e));
                    }
                    let backoff = backoff_with_jitter(attempt);
                    tracing::warn!(
                        "embedder transient error (attempt {}/{}): {}; backing off {:?}",
                        attempt,
                        MAX_ATTEMPTS,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..base / 2 + 1);
    Duration::from_millis(base + jitter)
}
