//! Deterministic fakes shared by the integration suites
//!
//! The embedder hashes tokens into a fixed-dimension bag-of-words vector, so
//! texts sharing words land close in cosine space and tests need no network.
//! The chat fake dispatches on the system prompt and is scripted per role.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ragmem::config::RagConfig;
use ragmem::embeddings::Embedder;
use ragmem::engine::MemoryEngine;
use ragmem::llm::ChatModel;

pub const MOCK_DIM: usize = 64;

/// Token-hash bag-of-words embedder
pub struct MockEmbedder;

fn fnv(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in token.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
    {
        vector[(fnv(token) % MOCK_DIM as u64) as usize] += 1.0;
    }

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| mock_embedding(t)).collect())
    }

    fn dimension(&self) -> usize {
        MOCK_DIM
    }
}

type ChatFn = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Chat fake scripted per pipeline role; dispatch keys off the system prompt
pub struct MockChat {
    extract: ChatFn,
    profile: ChatFn,
    decompose: ChatFn,
    rerank: ChatFn,
    rewrite: ChatFn,
    pub extract_calls: AtomicUsize,
    pub decompose_calls: AtomicUsize,
    pub rerank_calls: AtomicUsize,
}

/// Default extraction: each user turn becomes one memory line, no graph data
pub fn echo_extraction(rendered: &str) -> String {
    let mut out = String::from("MEMORIES:\n");
    for line in rendered.lines() {
        if let Some(content) = line.strip_prefix("user: ") {
            out.push_str("- ");
            out.push_str(content);
            out.push('\n');
        }
    }
    out.push_str("ENTITIES:\nRELATIONSHIPS:\n");
    out
}

impl Default for MockChat {
    fn default() -> Self {
        Self {
            extract: Box::new(|user| Ok(echo_extraction(user))),
            profile: Box::new(|_| Ok(String::new())),
            decompose: Box::new(|_| Ok(String::new())),
            rerank: Box::new(|_| anyhow::bail!("rerank not scripted")),
            rewrite: Box::new(|_| anyhow::bail!("rewrite not scripted")),
            extract_calls: AtomicUsize::new(0),
            decompose_calls: AtomicUsize::new(0),
            rerank_calls: AtomicUsize::new(0),
        }
    }
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extract(mut self, f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        self.extract = Box::new(f);
        self
    }

    pub fn with_profile(mut self, f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        self.profile = Box::new(f);
        self
    }

    pub fn with_decompose(
        mut self,
        f: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.decompose = Box::new(f);
        self
    }

    pub fn with_rerank(mut self, f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        self.rerank = Box::new(f);
        self
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(&self, system: &str, user: &str, _max_tokens: u32) -> Result<String> {
        if system.starts_with("You extract long-term memories") {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            (self.extract)(user)
        } else if system.starts_with("You maintain a short biographical profile") {
            (self.profile)(user)
        } else if system.starts_with("The query asks for a count") {
            self.decompose_calls.fetch_add(1, Ordering::SeqCst);
            (self.decompose)(user)
        } else if system.starts_with("Score each candidate") {
            self.rerank_calls.fetch_add(1, Ordering::SeqCst);
            (self.rerank)(user)
        } else if system.starts_with("Rewrite") {
            (self.rewrite)(user)
        } else {
            anyhow::bail!("unexpected system prompt: {system}")
        }
    }
}

/// Config pointing at a temp cache dir, auxiliary LLM steps off by default
pub fn test_config(cache_dir: &Path) -> RagConfig {
    let mut config = RagConfig::default();
    config.api_key = "test".to_string();
    config.cache_dir = cache_dir.to_path_buf();
    config.embedding_dim = MOCK_DIM;
    config.reranker_enabled = false;
    config.query_rewrite_enabled = false;
    config.decompose_enabled = false;
    config
}

pub fn build_engine(config: RagConfig, chat: Arc<MockChat>) -> Arc<MemoryEngine> {
    Arc::new(
        MemoryEngine::new(config, Arc::new(MockEmbedder), chat)
            .expect("engine construction failed"),
    )
}

/// One-user-turn session helper
pub fn session(id: &str, content: &str, date: Option<&str>) -> ragmem::types::IngestSession {
    ragmem::types::IngestSession {
        session_id: id.to_string(),
        turns: vec![ragmem::types::SessionTurn {
            role: "user".to_string(),
            content: content.to_string(),
        }],
        date: date.map(str::to_string),
    }
}
