//! Engine assembly
//!
//! `MemoryEngine` wires the container registry, extractor client, embedder,
//! and chat model together and picks the storage backend once at startup.
//! Ingest lives in `ingest.rs`, the query pipeline in `query.rs`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::RagConfig;
use crate::container::{ContainerRegistry, ContainerStats};
use crate::embeddings::{embed_batch_with_retry, Embedder, OpenAiEmbedder};
use crate::extraction::SessionExtractor;
use crate::llm::{ChatModel, OpenAiChat};
use crate::sqlite::SqliteStore;
use crate::types::{chunk_id, Chunk};

/// Storage backend, chosen once from `DATABASE_URL`
pub enum Backend {
    /// In-memory indices with on-disk snapshots
    Memory,
    /// SQLite-backed container store; snapshots are skipped
    Relational(SqliteStore),
}

pub struct MemoryEngine {
    pub(crate) config: RagConfig,
    pub(crate) registry: ContainerRegistry,
    pub(crate) extractor: SessionExtractor,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) chat: Arc<dyn ChatModel>,
    pub(crate) backend: Backend,
}

impl MemoryEngine {
    /// Build an engine over explicit providers. Tests inject deterministic
    /// fakes through this constructor.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let backend = match &config.database_url {
            Some(url) => {
                info!("relational backend enabled ({url})");
                Backend::Relational(SqliteStore::open(url)?)
            }
            None => Backend::Memory,
        };

        Ok(Self {
            registry: ContainerRegistry::new(config.cache_dir.clone()),
            extractor: SessionExtractor::new(Arc::clone(&chat), config.extract_concurrency),
            embedder,
            chat,
            backend,
            config,
        })
    }

    /// Build an engine with the real OpenAI-compatible providers
    pub fn from_config(config: RagConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
            &config.base_url,
            &config.api_key,
            &config.embedding_model,
            config.embedding_dim,
        )?);
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(
            &config.base_url,
            &config.api_key,
            &config.llm_model,
        )?);
        Self::new(config, embedder, chat)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Known container tags across memory, disk, and the relational store
    pub fn list_containers(&self) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Memory => Ok(self.registry.list()),
            Backend::Relational(store) => {
                let mut tags = store.list_containers()?;
                tags.extend(self.registry.list());
                tags.sort();
                tags.dedup();
                Ok(tags)
            }
        }
    }

    /// Wipe one container everywhere
    pub fn clear_container(&self, tag: &str) -> Result<()> {
        self.registry.clear(tag)?;
        if let Backend::Relational(store) = &self.backend {
            store.clear(tag)?;
        }
        Ok(())
    }

    pub async fn container_stats(&self, tag: &str) -> Result<ContainerStats> {
        match &self.backend {
            Backend::Memory => {
                let container = self.registry.get_or_create(tag);
                container.ensure_loaded(self.registry.cache_root()).await;
                Ok(container.stats())
            }
            Backend::Relational(store) => {
                let chunks = store.load_chunks(tag)?;
                let facts = store.load_facts(tag)?;
                let graph = store.load_graph(tag)?;
                let profile = store.load_profile(tag)?;
                Ok(ContainerStats {
                    chunks: chunks.len(),
                    facts: facts.len(),
                    entities: graph.node_count(),
                    relationships: graph.edge_count(),
                    profile_facts: profile.len(),
                })
            }
        }
    }

    /// Snapshot every in-memory container to disk (shutdown path). No-op on
    /// the relational backend, which is always durable.
    pub fn flush_snapshots(&self) -> usize {
        match &self.backend {
            Backend::Memory => self.registry.snapshot_all(),
            Backend::Relational(_) => 0,
        }
    }

    /// Store raw text without extraction: chunk, embed, commit. The derived
    /// session id is a content hash so re-storing the same text replaces
    /// its own chunks instead of duplicating them.
    pub async fn store_text(&self, tag: &str, text: &str) -> Result<Vec<String>> {
        let session_id = format!("store-{:016x}", fnv1a_64(text.as_bytes()));
        let passages =
            crate::chunking::chunk_text(text, self.config.chunk_size, self.config.chunk_overlap);
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = embed_batch_with_retry(&self.embedder, &passages)
            .await
            .context("failed to embed stored text")?;

        let chunks: Vec<Chunk> = passages
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(idx, (content, embedding))| Chunk {
                id: chunk_id(tag, &session_id, idx),
                content,
                session_id: session_id.clone(),
                chunk_index: idx,
                date: "unknown".to_string(),
                event_date: None,
                embedding,
                metadata: None,
            })
            .collect();

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        match &self.backend {
            Backend::Memory => {
                let container = self.registry.get_or_create(tag);
                container.ensure_loaded(self.registry.cache_root()).await;
                {
                    let mut state = container.state.write();
                    state.search.add_chunks(chunks);
                }
                container.snapshot_to_disk(self.registry.cache_root())?;
            }
            Backend::Relational(store) => {
                let container = self.registry.get_or_create(tag);
                let _guard = container.state.write();
                store.add_chunks(tag, &chunks)?;
            }
        }

        Ok(ids)
    }
}

/// FNV-1a, 64-bit; stable across processes unlike the std hasher
fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
