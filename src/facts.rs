//! Atomic-fact store
//!
//! Short extracted statements with their own embeddings, searched by raw
//! cosine. Facts keep their session linkage; the query pipeline uses that
//! for session boosts and parent-chunk injection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::similarity::cosine_similarity;
use crate::types::{AtomicFact, ScoredFact};

/// Deterministic fact id
pub fn fact_id(container_tag: &str, session_id: &str, fact_index: usize) -> String {
    format!("{container_tag}_{session_id}_fact_{fact_index}")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FactSnapshot {
    pub version: u32,
    pub facts: Vec<AtomicFact>,
}

/// Per-container fact index
#[derive(Default)]
pub struct FactStore {
    facts: Vec<AtomicFact>,
    by_id: HashMap<String, usize>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add facts, replacing any existing fact with the same id
    pub fn add_facts(&mut self, facts: Vec<AtomicFact>) {
        for fact in facts {
            match self.by_id.get(&fact.id) {
                Some(&idx) => self.facts[idx] = fact,
                None => {
                    self.by_id.insert(fact.id.clone(), self.facts.len());
                    self.facts.push(fact);
                }
            }
        }
    }

    /// Cosine lookup, highest first, deterministic ties by id
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<ScoredFact> {
        let mut scored: Vec<(f32, &AtomicFact)> = self
            .facts
            .iter()
            .map(|f| (cosine_similarity(query_embedding, &f.embedding), f))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        scored
            .into_iter()
            .take(limit)
            .map(|(score, f)| ScoredFact {
                content: f.content.clone(),
                session_id: f.session_id.clone(),
                score,
            })
            .collect()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn has_data(&self) -> bool {
        !self.facts.is_empty()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
        self.by_id.clear();
    }

    pub fn to_snapshot(&self) -> FactSnapshot {
        FactSnapshot {
            version: 1,
            facts: self.facts.clone(),
        }
    }

    pub fn from_snapshot(snapshot: FactSnapshot) -> Self {
        let mut store = Self::new();
        store.add_facts(snapshot.facts);
        store
    }
}
