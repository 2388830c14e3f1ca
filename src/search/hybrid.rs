//! Hybrid search over one container's chunk set
//!
//! Dense cosine and sparse BM25 signals, each min-max normalized over the
//! candidate pool, fused by fixed weights. Ties break by vector score and
//! then id so results are stable across runs and snapshot restores.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::bm25::Bm25Index;
use crate::similarity::{cosine_similarity, min_max_normalize};
use crate::types::{Chunk, ScoredChunk};

pub const VECTOR_WEIGHT: f32 = 0.7;
pub const BM25_WEIGHT: f32 = 0.3;

/// Serialized form of the index; the postings list is rebuilt on load
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchSnapshot {
    pub version: u32,
    pub chunks: Vec<Chunk>,
}

/// Per-container chunk index
#[derive(Default)]
pub struct SearchIndex {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
    bm25: Bm25Index,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add chunks, replacing any existing chunk with the same id (re-ingest
    /// of a session is idempotent). Rebuilds the postings list.
    pub fn add_chunks(&mut self, chunks: Vec<Chunk>) {
        for chunk in chunks {
            match self.by_id.get(&chunk.id) {
                Some(&idx) => self.chunks[idx] = chunk,
                None => {
                    self.by_id.insert(chunk.id.clone(), self.chunks.len());
                    self.chunks.push(chunk);
                }
            }
        }
        self.rebuild_bm25();
    }

    fn rebuild_bm25(&mut self) {
        self.bm25 = Bm25Index::build(self.chunks.iter().map(|c| c.content.as_str()));
    }

    pub fn has_data(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.by_id.clear();
        self.bm25 = Bm25Index::default();
    }

    pub fn chunks_by_session(&self, session_id: &str) -> Vec<&Chunk> {
        self.chunks
            .iter()
            .filter(|c| c.session_id == session_id)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&idx| &self.chunks[idx])
    }

    /// Top-k fused search over the whole container
    pub fn search(&self, query_embedding: &[f32], raw_query: &str, k: usize) -> Vec<ScoredChunk> {
        if self.chunks.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut vector_scores: Vec<f32> = self
            .chunks
            .iter()
            .map(|c| cosine_similarity(query_embedding, &c.embedding))
            .collect();
        min_max_normalize(&mut vector_scores);

        let mut bm25_scores = self.bm25.scores(raw_query);
        min_max_normalize(&mut bm25_scores);

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| ScoredChunk {
                id: c.id.clone(),
                content: c.content.clone(),
                session_id: c.session_id.clone(),
                chunk_index: c.chunk_index,
                date: c.date.clone(),
                score: VECTOR_WEIGHT * vector_scores[i] + BM25_WEIGHT * bm25_scores[i],
                vector_score: vector_scores[i],
                bm25_score: bm25_scores[i],
                rerank_score: None,
            })
            .collect();

        sort_scored(&mut scored);
        scored.truncate(k);
        scored
    }

    pub fn to_snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            version: 1,
            chunks: self.chunks.clone(),
        }
    }

    pub fn from_snapshot(snapshot: SearchSnapshot) -> Self {
        let mut index = Self::new();
        index.add_chunks(snapshot.chunks);
        index
    }
}

/// Score-descending order with deterministic tie-breaks: vector score, then id
pub fn sort_scored(scored: &mut [ScoredChunk]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}
