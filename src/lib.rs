//! ragmem — long-term memory retrieval engine for conversational agents
//!
//! Ingests multi-turn conversation sessions, derives a searchable
//! representation (overlapping chunks, atomic facts, an entity graph, a user
//! profile), and answers retrieval requests with a ranked heterogeneous list
//! of passages and structured context.
//!
//! # Architecture
//! - Per-container indices behind one reader/writer lock each
//! - Hybrid retrieval: cosine + BM25, weighted fusion
//! - Atomic-fact index with session boost and parent-chunk injection
//! - Entity graph with bounded k-hop traversal
//! - In-memory indices with JSON snapshots, or a SQLite backend

pub mod chunking;
pub mod config;
pub mod container;
pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod extraction;
pub mod facts;
pub mod graph;
pub mod handlers;
pub mod ingest;
pub mod llm;
pub mod persistence;
pub mod profile;
pub mod query;
pub mod search;
pub mod similarity;
pub mod singleflight;
pub mod sqlite;
pub mod types;
pub mod validation;

// Re-export dependencies so tests and benchmarks share versions
pub use chrono;
pub use parking_lot;
