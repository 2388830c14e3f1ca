//! OpenAI-compatible embeddings client

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Embedder;

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRecord>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRecord {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings over the `/v1/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build embeddings HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("embeddings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "embeddings API returned {status}: {}",
                body.chars().take(200).collect::<String>()
            ));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .context("failed to parse embeddings response")?;

        if parsed.data.len() != texts.len() {
            return Err(anyhow!(
                "embeddings API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            ));
        }

        // The API documents order-preservation but also tags each record
        // with its input index; trust the index
        let mut out = vec![Vec::new(); texts.len()];
        for record in parsed.data {
            if record.index >= out.len() {
                return Err(anyhow!("embedding index {} out of range", record.index));
            }
            out[record.index] = record.embedding;
        }

        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
