//! Query pipeline
//!
//! Rewrite → embed → parallel retrieval over every index → counting-query
//! decomposition → fact session boost and parent-chunk injection → optional
//! LLM rerank → graph context → profile record. Auxiliary LLM steps degrade
//! to the identity on failure; only embedding failures surface.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::container::{Container, ContainerState};
use crate::embeddings::embed_with_retry;
use crate::engine::{Backend, MemoryEngine};
use crate::graph::GraphContext;
use crate::llm::extract_json;
use crate::profile::Profile;
use crate::search::sort_scored;
use crate::types::{RetrievedItem, ScoredChunk, ScoredFact};

pub const FACT_SEARCH_LIMIT: usize = 30;
pub const SESSION_BOOST: f32 = 0.1;
pub const INJECT_TOP_FACTS: usize = 10;
pub const MAX_GRAPH_HOPS: usize = 2;
pub const MAX_SUBQUERIES: usize = 5;
const REWRITE_MAX_CHARS: usize = 500;

const REWRITE_SYSTEM_PROMPT: &str = "\
Rewrite the user's memory-search query as a single line that adds likely \
synonyms and related phrasings. Keep it under 400 characters. Output only \
the rewritten query.";

const DECOMPOSE_SYSTEM_PROMPT: &str = "\
The query asks for a count over the user's history. Write up to 5 diverse \
search sub-queries, one per line, that together would surface the items \
being counted. Output only the sub-queries.";

const RERANK_SYSTEM_PROMPT: &str = "\
Score each candidate passage for how well it answers the query, 0.0 to \
1.0. Respond with only a JSON array: [{\"index\": 0, \"score\": 0.9}, ...].";

static COUNTING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(how many|how often|how much|count|number of|total)\b").unwrap()
});

/// Does the query ask for a count?
pub fn is_counting_query(query: &str) -> bool {
    COUNTING_RE.is_match(query)
}

/// Chunk eligible for parent injection, fetched per fact session
#[derive(Debug, Clone)]
pub struct InjectionChunk {
    pub id: String,
    pub content: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub date: String,
}

/// Add the session boost to chunks whose session produced a fact hit, then
/// re-sort
pub fn apply_session_boost(results: &mut [ScoredChunk], boosted_sessions: &HashSet<String>) {
    for chunk in results.iter_mut() {
        if boosted_sessions.contains(&chunk.session_id) {
            chunk.score += SESSION_BOOST;
        }
    }
    sort_scored(results);
}

/// Parent-chunk injection: for each top fact, append any chunk of its
/// session whose content contains the fact text and is not already present.
/// Injected chunks take the fact's score and placeholder component scores.
pub fn inject_parent_chunks(
    results: &mut Vec<ScoredChunk>,
    top_facts: &[ScoredFact],
    session_chunks: &HashMap<String, Vec<InjectionChunk>>,
) {
    let mut present: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();

    for fact in top_facts.iter().take(INJECT_TOP_FACTS) {
        let Some(chunks) = session_chunks.get(&fact.session_id) else {
            continue;
        };
        for chunk in chunks {
            if chunk.content.contains(&fact.content) && !present.contains(&chunk.id) {
                present.insert(chunk.id.clone());
                results.push(ScoredChunk {
                    id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    session_id: chunk.session_id.clone(),
                    chunk_index: chunk.chunk_index,
                    date: chunk.date.clone(),
                    score: fact.score,
                    vector_score: 0.0,
                    bm25_score: 0.0,
                    rerank_score: None,
                });
            }
        }
    }

    sort_scored(results);
}

/// Union sub-query results into the main set by `(session_id, chunk_index)`,
/// keeping the existing record on collision
pub fn union_by_key(main: &mut Vec<ScoredChunk>, extra: Vec<ScoredChunk>) {
    let mut keys: HashSet<(String, usize)> = main
        .iter()
        .map(|c| (c.session_id.clone(), c.chunk_index))
        .collect();

    for chunk in extra {
        let key = (chunk.session_id.clone(), chunk.chunk_index);
        if keys.insert(key) {
            main.push(chunk);
        }
    }
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    score: f32,
}

/// Which state the pipeline reads: the shared in-memory container, or a
/// transient view hydrated from the relational store
enum QueryTarget {
    Shared(Arc<Container>),
    Owned(Box<ContainerState>),
}

impl QueryTarget {
    fn read<R>(&self, f: impl FnOnce(&ContainerState) -> R) -> R {
        match self {
            Self::Shared(container) => f(&container.state.read()),
            Self::Owned(state) => f(state),
        }
    }
}

struct RetrievalParts {
    results: Vec<ScoredChunk>,
    fact_hits: Vec<ScoredFact>,
    graph_ctx: GraphContext,
    profile_block: Option<String>,
    injection_pool: HashMap<String, Vec<InjectionChunk>>,
}

impl MemoryEngine {
    /// End-to-end retrieval for one container
    pub async fn search(
        &self,
        tag: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>> {
        let fetch_k = if self.config.reranker_enabled {
            limit.max(self.config.rerank_overfetch)
        } else {
            limit
        };

        // 1. Optional rewrite; fall back to the original on any failure
        let effective_query = if self.config.query_rewrite_enabled {
            match self.rewrite_query(query).await {
                Some(rewritten) => {
                    debug!("query rewritten: {rewritten}");
                    rewritten
                }
                None => query.to_string(),
            }
        } else {
            query.to_string()
        };

        // 2. Embed with retries
        let query_embedding = embed_with_retry(&self.embedder, &effective_query)
            .await
            .context("query embedding failed")?;

        // 3. Resolve the backend target (lazy snapshot load on the memory path)
        let target = match &self.backend {
            Backend::Memory => {
                // A container that exists neither in memory nor on disk
                // yields an empty result without being created
                let container = match self.registry.get(tag) {
                    Some(container) => container,
                    None => {
                        let dir =
                            crate::persistence::container_dir(self.registry.cache_root(), tag);
                        if !dir.exists() {
                            return Ok(Vec::new());
                        }
                        self.registry.get_or_create(tag)
                    }
                };
                container.ensure_loaded(self.registry.cache_root()).await;
                QueryTarget::Shared(container)
            }
            Backend::Relational(store) => {
                let mut state = ContainerState::default();
                state.search.add_chunks(store.load_chunks(tag)?);
                state.facts.add_facts(store.load_facts(tag)?);
                state.graph = store.load_graph(tag)?;
                state.profile = Profile::from_snapshot(crate::profile::ProfileSnapshot {
                    version: 1,
                    facts: store.load_profile(tag)?,
                });
                QueryTarget::Owned(Box::new(state))
            }
        };

        // 4. Retrieval over all indices under one read-lock section
        let graph_enabled = self.config.graph_enabled;
        let parts = target.read(|state| {
            let fact_hits = state.facts.search(&query_embedding, FACT_SEARCH_LIMIT);
            let results = state.search.search(&query_embedding, &effective_query, fetch_k);

            let graph_ctx = if graph_enabled {
                let seeds = state.graph.find_entities_in_query(query);
                if seeds.is_empty() {
                    GraphContext::default()
                } else {
                    state.graph.context(&seeds, MAX_GRAPH_HOPS)
                }
            } else {
                GraphContext::default()
            };

            let mut injection_pool: HashMap<String, Vec<InjectionChunk>> = HashMap::new();
            for fact in fact_hits.iter().take(INJECT_TOP_FACTS) {
                injection_pool
                    .entry(fact.session_id.clone())
                    .or_insert_with(|| {
                        state
                            .search
                            .chunks_by_session(&fact.session_id)
                            .into_iter()
                            .map(|c| InjectionChunk {
                                id: c.id.clone(),
                                content: c.content.clone(),
                                session_id: c.session_id.clone(),
                                chunk_index: c.chunk_index,
                                date: c.date.clone(),
                            })
                            .collect()
                    });
            }

            RetrievalParts {
                results,
                fact_hits,
                graph_ctx,
                profile_block: state.profile.format_block(),
                injection_pool,
            }
        });

        let mut results = parts.results;

        // 5. Counting-query decomposition
        if self.config.decompose_enabled && is_counting_query(query) {
            for sub_query in self.decompose_query(query).await {
                let sub_embedding = match embed_with_retry(&self.embedder, &sub_query).await {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("sub-query embedding failed, skipping '{sub_query}': {e:#}");
                        continue;
                    }
                };
                let sub_results =
                    target.read(|state| state.search.search(&sub_embedding, &sub_query, fetch_k));
                union_by_key(&mut results, sub_results);
            }
            sort_scored(&mut results);
        }

        // 6. Fact session boost + parent-chunk injection
        let boosted_sessions: HashSet<String> = parts
            .fact_hits
            .iter()
            .map(|f| f.session_id.clone())
            .collect();
        apply_session_boost(&mut results, &boosted_sessions);
        inject_parent_chunks(&mut results, &parts.fact_hits, &parts.injection_pool);

        // 7. Optional LLM rerank; failure degrades to hybrid order at `limit`
        if self.config.reranker_enabled && results.len() > limit {
            match self.rerank(query, &results, limit).await {
                Ok(reranked) => results = reranked,
                Err(e) => {
                    warn!("rerank failed, keeping hybrid order: {e:#}");
                    sort_scored(&mut results);
                    results.truncate(limit);
                }
            }
        }

        // 8-10. Assemble the heterogeneous response
        let mut items: Vec<RetrievedItem> = results
            .into_iter()
            .map(|c| RetrievedItem::Chunk {
                content: c.content,
                score: c.rerank_score.unwrap_or(c.score),
                session_id: c.session_id,
                chunk_index: c.chunk_index,
                date: c.date,
            })
            .collect();

        for node in parts.graph_ctx.entities {
            items.push(RetrievedItem::Entity {
                name: node.name,
                entity_type: node.entity_type,
                summary: node.summary,
                score: 0.0,
            });
        }
        for edge in parts.graph_ctx.relationships {
            items.push(RetrievedItem::Relationship {
                source: edge.source,
                relation: edge.relation,
                target: edge.target,
                date: edge.date,
                score: 0.0,
            });
        }

        if let Some(block) = parts.profile_block {
            items.push(RetrievedItem::Profile {
                content: block,
                score: 0.0,
            });
        }

        Ok(items)
    }

    /// Single-line query expansion; `None` means "use the original"
    async fn rewrite_query(&self, query: &str) -> Option<String> {
        let output = match self.chat.complete(REWRITE_SYSTEM_PROMPT, query, 256).await {
            Ok(o) => o,
            Err(e) => {
                warn!("query rewrite failed, using original: {e:#}");
                return None;
            }
        };

        let line = output.lines().next()?.trim().to_string();
        (!line.is_empty() && line.len() < REWRITE_MAX_CHARS).then_some(line)
    }

    /// Up to `MAX_SUBQUERIES` sub-queries for a counting question; empty on
    /// failure
    async fn decompose_query(&self, query: &str) -> Vec<String> {
        let output = match self.chat.complete(DECOMPOSE_SYSTEM_PROMPT, query, 512).await {
            Ok(o) => o,
            Err(e) => {
                warn!("query decomposition failed: {e:#}");
                return Vec::new();
            }
        };

        output
            .lines()
            .map(crate::extraction::strip_list_marker)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(MAX_SUBQUERIES)
            .map(str::to_string)
            .collect()
    }

    /// LLM rerank: JSON `[{index, score}]` over the candidates; missing
    /// indices score 0. Returns the top `limit` with rerank scores stamped.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[ScoredChunk],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        // One candidate per line; flatten embedded newlines
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "[{i}] {}",
                    truncate_chars(&c.content, 400).replace('\n', " ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Query: {query}\n\nCandidates:\n{listing}");

        let output = self.chat.complete(RERANK_SYSTEM_PROMPT, &prompt, 1024).await?;
        let entries: Vec<RerankEntry> = serde_json::from_str(&extract_json(&output))
            .context("rerank output was not a JSON array of {index, score}")?;

        let scores: HashMap<usize, f32> = entries
            .into_iter()
            .filter(|e| e.index < candidates.len())
            .map(|e| (e.index, e.score))
            .collect();

        let mut reranked: Vec<ScoredChunk> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut c = c.clone();
                c.rerank_score = Some(scores.get(&i).copied().unwrap_or(0.0));
                c
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        reranked.truncate(limit);
        Ok(reranked)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
