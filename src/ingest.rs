//! Ingest orchestrator
//!
//! Takes a batch of sessions for one container through extraction,
//! chunking, embedding, and a single writer-lock commit. A failing session
//! is skipped and reported; the rest of the batch proceeds.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::embeddings::{embed_batch_with_retry, Embedder};
use crate::engine::{Backend, MemoryEngine};
use crate::extraction::SessionExtraction;
use crate::facts::fact_id;
use crate::profile::parse_profile_lines;
use crate::types::{chunk_id, AtomicFact, Chunk, IngestSession};

/// Sessions extracted per wave; the global semaphore caps the fleet-wide
/// concurrency on top of this
const EXTRACTION_BATCH_SIZE: usize = 10;

/// Texts per embedder call
const EMBED_BATCH_SIZE: usize = 100;

const PROFILE_SYSTEM_PROMPT: &str = "\
You maintain a short biographical profile of a user. From the memory lines \
below, output up to 20 short third-person biographical facts (location, \
work, relationships, preferences, habits), one per line. Output only the \
facts.";

/// What an ingest call returns
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub document_ids: Vec<String>,
    pub failed_sessions: Vec<String>,
}

struct ExtractedSession {
    session: IngestSession,
    extraction: Arc<SessionExtraction>,
}

impl MemoryEngine {
    /// Ingest a batch of sessions into one container. Returns the ids of the
    /// chunks written plus the sessions whose extraction failed.
    pub async fn ingest(&self, tag: &str, sessions: Vec<IngestSession>) -> Result<IngestOutcome> {
        let container = self.registry.get_or_create(tag);
        if matches!(self.backend, Backend::Memory) {
            container.ensure_loaded(self.registry.cache_root()).await;
        }

        let mut outcome = IngestOutcome::default();
        let mut extracted: Vec<ExtractedSession> = Vec::new();

        for batch in sessions.chunks(EXTRACTION_BATCH_SIZE) {
            let futures = batch.iter().map(|session| self.extractor.extract(session));
            let results = join_all(futures).await;

            let mut batch_ok: Vec<ExtractedSession> = Vec::new();
            for (session, result) in batch.iter().zip(results) {
                match result {
                    Ok(extraction) => batch_ok.push(ExtractedSession {
                        session: session.clone(),
                        extraction,
                    }),
                    Err(e) => {
                        warn!(
                            session_id = %session.session_id,
                            "extraction failed, skipping session: {e:#}"
                        );
                        outcome.failed_sessions.push(session.session_id.clone());
                    }
                }
            }

            // Graph writes for the batch, under the container writer lock
            {
                let mut state = container.state.write();
                for es in &batch_ok {
                    let session_id = &es.session.session_id;
                    match &self.backend {
                        Backend::Memory => {
                            for entity in &es.extraction.entities {
                                state.graph.add_entity(
                                    &entity.name,
                                    &entity.entity_type,
                                    &entity.summary,
                                    session_id,
                                );
                            }
                            for rel in &es.extraction.relationships {
                                state.graph.add_relationship(
                                    &rel.source,
                                    &rel.relation,
                                    &rel.target,
                                    rel.date.as_deref(),
                                    session_id,
                                );
                            }
                        }
                        Backend::Relational(store) => {
                            for entity in &es.extraction.entities {
                                store.upsert_entity(
                                    tag,
                                    &entity.name,
                                    &entity.entity_type,
                                    &entity.summary,
                                    session_id,
                                )?;
                            }
                            for rel in &es.extraction.relationships {
                                store.add_relationship(
                                    tag,
                                    &rel.source,
                                    &rel.relation,
                                    &rel.target,
                                    rel.date.as_deref(),
                                    session_id,
                                )?;
                            }
                        }
                    }
                }
            }

            extracted.extend(batch_ok);
        }

        if extracted.is_empty() {
            return Ok(outcome);
        }

        // Build chunk and fact texts per session
        let mut chunk_texts: Vec<String> = Vec::new();
        let mut chunk_owners: Vec<(usize, usize)> = Vec::new(); // (session idx, chunk idx)
        let mut fact_texts: Vec<String> = Vec::new();
        let mut fact_owners: Vec<(usize, usize)> = Vec::new();
        let mut memories_concat = String::new();

        for (s_idx, es) in extracted.iter().enumerate() {
            let memories = es.extraction.memories_text.trim();
            if memories.is_empty() {
                continue;
            }

            let document = format!(
                "# Memories from {}\n\n{memories}",
                es.session.date_or_unknown()
            );
            for (c_idx, passage) in
                crate::chunking::chunk_text(&document, self.config.chunk_size, self.config.chunk_overlap)
                    .into_iter()
                    .enumerate()
            {
                chunk_texts.push(passage);
                chunk_owners.push((s_idx, c_idx));
            }

            for (f_idx, line) in memories
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .enumerate()
            {
                fact_texts.push(line.to_string());
                fact_owners.push((s_idx, f_idx));
            }

            memories_concat.push_str(memories);
            memories_concat.push('\n');
        }

        // Embed chunks and facts, and assemble the profile, concurrently
        let (chunk_embeddings, fact_embeddings, profile_lines) = tokio::join!(
            embed_in_batches(&self.embedder, &chunk_texts),
            embed_in_batches(&self.embedder, &fact_texts),
            self.build_profile(&memories_concat),
        );
        let chunk_embeddings = chunk_embeddings.context("chunk embedding failed")?;
        let fact_embeddings = fact_embeddings.context("fact embedding failed")?;

        let mut chunks: Vec<Chunk> = Vec::with_capacity(chunk_texts.len());
        for ((text, embedding), (s_idx, c_idx)) in chunk_texts
            .into_iter()
            .zip(chunk_embeddings)
            .zip(chunk_owners)
        {
            let session = &extracted[s_idx].session;
            chunks.push(Chunk {
                id: chunk_id(tag, &session.session_id, c_idx),
                content: text,
                session_id: session.session_id.clone(),
                chunk_index: c_idx,
                date: session.date_or_unknown().to_string(),
                event_date: None,
                embedding,
                metadata: None,
            });
        }

        let mut facts: Vec<AtomicFact> = Vec::with_capacity(fact_texts.len());
        for ((text, embedding), (s_idx, f_idx)) in fact_texts
            .into_iter()
            .zip(fact_embeddings)
            .zip(fact_owners)
        {
            let session = &extracted[s_idx].session;
            facts.push(AtomicFact {
                id: fact_id(tag, &session.session_id, f_idx),
                content: text,
                session_id: session.session_id.clone(),
                fact_index: f_idx,
                date: session.date_or_unknown().to_string(),
                event_date: None,
                embedding,
            });
        }

        outcome.document_ids = chunks.iter().map(|c| c.id.clone()).collect();

        // Single writer-lock commit of chunks, facts, and profile
        match &self.backend {
            Backend::Memory => {
                {
                    let mut state = container.state.write();
                    state.search.add_chunks(chunks);
                    state.facts.add_facts(facts);
                    state.profile.merge(&profile_lines);
                }
                container.snapshot_to_disk(self.registry.cache_root())?;
            }
            Backend::Relational(store) => {
                let _guard = container.state.write();
                store.add_chunks(tag, &chunks)?;
                store.add_facts(tag, &facts)?;
                let mut profile =
                    crate::profile::Profile::from_snapshot(crate::profile::ProfileSnapshot {
                        version: 1,
                        facts: store.load_profile(tag)?,
                    });
                profile.merge(&profile_lines);
                store.save_profile(tag, profile.facts())?;
            }
        }

        info!(
            container = tag,
            chunks = outcome.document_ids.len(),
            skipped = outcome.failed_sessions.len(),
            "ingest committed"
        );

        Ok(outcome)
    }

    /// Ask the LLM for profile facts over the batch's memory lines.
    /// Failures degrade to "no profile update".
    async fn build_profile(&self, memories_concat: &str) -> Vec<String> {
        if memories_concat.trim().is_empty() {
            return Vec::new();
        }

        match self
            .chat
            .complete(PROFILE_SYSTEM_PROMPT, memories_concat, 1024)
            .await
        {
            Ok(output) => parse_profile_lines(&output),
            Err(e) => {
                warn!("profile assembly failed, keeping existing profile: {e:#}");
                Vec::new()
            }
        }
    }
}

/// Embed texts in fixed-size batches, sequentially per container, each batch
/// with the shared retry policy
async fn embed_in_batches(
    embedder: &Arc<dyn Embedder>,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH_SIZE) {
        out.extend(embed_batch_with_retry(embedder, batch).await?);
    }
    Ok(out)
}
