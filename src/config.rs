//! Configuration for the retrieval engine
//!
//! All tunables in one place with environment overrides.
//! Sensible defaults; configurable in production.

use std::env;
use std::path::PathBuf;
use tracing::info;

/// Server and pipeline configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Listen port (default: 3847)
    pub port: u16,

    /// Snapshot root directory (default: ./data/cache/rag)
    pub cache_dir: PathBuf,

    /// OpenAI-compatible API key (required)
    pub api_key: String,

    /// Base URL for the embeddings/chat endpoints
    pub base_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Embedding dimension (derived from the model unless overridden)
    pub embedding_dim: usize,

    /// Chat model used for extraction, rewrite, decomposition, rerank
    pub llm_model: String,

    /// SQLite path; when set, the relational backend replaces the
    /// in-memory indices and snapshots are skipped
    pub database_url: Option<String>,

    /// Chunker target size in characters (default: 1600)
    pub chunk_size: usize,

    /// Chunker overlap in characters (default: 320)
    pub chunk_overlap: usize,

    /// LLM rerank of the candidate pool
    pub reranker_enabled: bool,

    /// LLM single-line query expansion before embedding
    pub query_rewrite_enabled: bool,

    /// Entity-graph context records in search responses
    pub graph_enabled: bool,

    /// Sub-query decomposition for counting questions
    pub decompose_enabled: bool,

    /// Overfetch floor when the reranker is active (default: 10)
    pub rerank_overfetch: usize,

    /// Process-wide cap on concurrent extractor calls (default: 300)
    pub extract_concurrency: usize,

    /// Concurrent HTTP requests served at once (default: 200)
    pub max_concurrent_requests: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            port: 3847,
            cache_dir: PathBuf::from("./data/cache/rag"),
            api_key: String::new(),
            base_url: "https://api.openai.com".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dim: 3072,
            llm_model: "gpt-5-nano".to_string(),
            database_url: None,
            chunk_size: 1600,
            chunk_overlap: 320,
            reranker_enabled: true,
            query_rewrite_enabled: false,
            graph_enabled: true,
            decompose_enabled: true,
            rerank_overfetch: 10,
            extract_concurrency: 300,
            max_concurrent_requests: 200,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => {
            let v = v.to_lowercase();
            v == "true" || v == "1" || v == "yes"
        }
        Err(_) => default,
    }
}

impl RagConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Returns an error when `OPENAI_API_KEY` is missing; the caller
    /// (main) treats that as fatal.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        config.api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is required"))?;

        if let Ok(val) = env::var("OPENAI_BASE_URL") {
            config.base_url = val.trim_end_matches('/').to_string();
        }

        if let Ok(val) = env::var("RAG_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        if let Ok(val) = env::var("RAG_CACHE_DIR") {
            config.cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("RAG_EMBEDDING_MODEL") {
            config.embedding_model = val;
        }

        // text-embedding-3-large is 3072-dim; everything else we default to
        // 1536 unless the caller pins the dimension explicitly
        config.embedding_dim = if config.embedding_model.contains("large") {
            3072
        } else {
            1536
        };
        if let Ok(val) = env::var("RAG_EMBEDDING_DIM") {
            if let Ok(dim) = val.parse() {
                config.embedding_dim = dim;
            }
        }

        if let Ok(val) = env::var("RAG_LLM_MODEL") {
            config.llm_model = val;
        }

        config.database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        if let Ok(val) = env::var("RAG_CHUNK_SIZE") {
            if let Ok(n) = val.parse() {
                config.chunk_size = n;
            }
        }

        if let Ok(val) = env::var("RAG_CHUNK_OVERLAP") {
            if let Ok(n) = val.parse() {
                config.chunk_overlap = n;
            }
        }

        config.reranker_enabled = env_bool("RAG_RERANKER", config.reranker_enabled);
        config.query_rewrite_enabled =
            env_bool("RAG_QUERY_REWRITE", config.query_rewrite_enabled);
        config.graph_enabled = env_bool("RAG_GRAPH", config.graph_enabled);
        config.decompose_enabled = env_bool("RAG_DECOMPOSE", config.decompose_enabled);

        if let Ok(val) = env::var("RAG_RERANK_OVERFETCH") {
            if let Ok(n) = val.parse() {
                config.rerank_overfetch = n;
            }
        }

        if let Ok(val) = env::var("RAG_EXTRACT_CONCURRENCY") {
            if let Ok(n) = val.parse::<usize>() {
                config.extract_concurrency = n.max(1);
            }
        }

        if let Ok(val) = env::var("RAG_MAX_CONCURRENT") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_concurrent_requests = n.max(1);
            }
        }

        Ok(config)
    }

    /// Log the active configuration at startup
    pub fn log(&self) {
        info!("Configuration:");
        info!("   Port:       {}", self.port);
        info!("   Cache dir:  {}", self.cache_dir.display());
        info!(
            "   Backend:    {}",
            if self.database_url.is_some() {
                "relational (sqlite)"
            } else {
                "in-memory + snapshots"
            }
        );
        info!(
            "   Embeddings: {} ({} dims)",
            self.embedding_model, self.embedding_dim
        );
        info!("   LLM:        {}", self.llm_model);
        info!(
            "   Chunking:   {} chars, {} overlap",
            self.chunk_size, self.chunk_overlap
        );
        info!(
            "   Features:   rerank={} rewrite={} graph={} decompose={}",
            self.reranker_enabled,
            self.query_rewrite_enabled,
            self.graph_enabled,
            self.decompose_enabled
        );
    }
}
