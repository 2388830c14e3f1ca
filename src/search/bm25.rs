//! BM25 scoring over an in-memory postings list
//!
//! The index is rebuilt from the chunk set on load and after every commit,
//! which keeps re-ingest (replace by id) and snapshot restore trivially
//! consistent. No stop-list; scores are raw BM25 and the caller normalizes.

use std::collections::HashMap;

pub const K1: f32 = 1.2;
pub const B: f32 = 0.75;

/// Lowercase, strip non-alphanumerics to whitespace, drop tokens shorter
/// than two characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

/// Inverted index with document lengths
#[derive(Debug, Default)]
pub struct Bm25Index {
    /// term -> (doc index -> term frequency)
    postings: HashMap<String, HashMap<usize, u32>>,
    doc_lens: Vec<u32>,
    total_len: u64,
}

impl Bm25Index {
    /// Build the index from scratch over the given documents
    pub fn build<'a, I>(docs: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self::default();
        for doc in docs {
            index.push_document(doc);
        }
        index
    }

    fn push_document(&mut self, text: &str) {
        let doc_idx = self.doc_lens.len();
        let tokens = tokenize(text);
        self.doc_lens.push(tokens.len() as u32);
        self.total_len += tokens.len() as u64;

        for token in tokens {
            *self
                .postings
                .entry(token)
                .or_default()
                .entry(doc_idx)
                .or_insert(0) += 1;
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lens.len()
    }

    /// BM25 scores for every indexed document against the raw query.
    /// Unmatched documents score 0.0.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let n = self.doc_lens.len();
        let mut scores = vec![0.0f32; n];
        if n == 0 {
            return scores;
        }

        let avgdl = (self.total_len as f32 / n as f32).max(1.0);

        for term in tokenize(query) {
            let Some(term_postings) = self.postings.get(&term) else {
                continue;
            };

            let df = term_postings.len() as f32;
            let idf = (1.0 + (n as f32 - df + 0.5) / (df + 0.5)).ln();

            for (&doc_idx, &tf) in term_postings {
                let tf = tf as f32;
                let dl = self.doc_lens[doc_idx] as f32;
                let denom = tf + K1 * (1.0 - B + B * dl / avgdl);
                scores[doc_idx] += idf * tf * (K1 + 1.0) / denom;
            }
        }

        scores
    }
}
