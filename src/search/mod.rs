//! Hybrid search engine: dense cosine + sparse BM25, weighted fusion

pub mod bm25;
pub mod hybrid;

pub use bm25::{tokenize, Bm25Index};
pub use hybrid::{sort_scored, SearchIndex, SearchSnapshot, BM25_WEIGHT, VECTOR_WEIGHT};
