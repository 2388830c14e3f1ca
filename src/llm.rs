//! Chat-completion client for auxiliary extraction
//!
//! One cheap LLM endpoint serves extraction, query rewrite, counting-query
//! decomposition, and reranking. The `ChatModel` trait is the seam; tests
//! script responses instead of going over the wire.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat completion provider
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a single-turn completion and return the raw text
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Chat over the `/v1/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build chat HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.1,
            max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("chat request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "chat API returned {status}: {}",
                body.chars().take(200).collect::<String>()
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse chat response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat API returned no choices"))
    }
}

/// Extract the first JSON value from potentially messy LLM output.
///
/// Strips markdown fences, then balances brackets from the first `{` or `[`.
pub fn extract_json(output: &str) -> String {
    let cleaned = output
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let open = match cleaned.find(['{', '[']) {
        Some(i) => i,
        None => return cleaned.to_string(),
    };
    let (open_ch, close_ch) = if cleaned.as_bytes()[open] == b'{' {
        ('{', '}')
    } else {
        ('[', ']')
    };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in cleaned[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open_ch && !in_string => depth += 1,
            c if c == close_ch && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return cleaned[open..open + i + c.len_utf8()].to_string();
                }
            }
            _ => {}
        }
    }

    cleaned[open..].to_string()
}
