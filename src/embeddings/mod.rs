//! Embedding generation
//!
//! The engine talks to a single remote embedding provider through the
//! `Embedder` trait; tests substitute a deterministic fake. Retries live
//! here so ingest and query share one policy.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use openai::OpenAiEmbedder;

/// Remote embedding provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension, constant per provider configuration
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        out.pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned an empty batch"))
    }
}

/// Retry schedule for embedder calls: two retries, 1s then 2s
const BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Embed a batch with the shared retry policy
pub async fn embed_batch_with_retry(
    embedder: &Arc<dyn Embedder>,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut last_err = None;
    for (attempt, backoff) in std::iter::once(None)
        .chain(BACKOFF.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = backoff {
            tokio::time::sleep(*delay).await;
        }
        match embedder.embed_batch(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) => {
                warn!("embedder batch failed (attempt {}): {e:#}", attempt + 1);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedder failed")))
}

/// Embed one text with the shared retry policy
pub async fn embed_with_retry(embedder: &Arc<dyn Embedder>, text: &str) -> Result<Vec<f32>> {
    let mut out = embed_batch_with_retry(embedder, &[text.to_string()]).await?;
    out.pop()
        .ok_or_else(|| anyhow::anyhow!("embedder returned an empty batch"))
}
