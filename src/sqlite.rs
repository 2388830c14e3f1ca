//! Relational backend
//!
//! When `DATABASE_URL` is set, container state lives in SQLite instead of
//! the in-memory indices, and snapshots are skipped. Embeddings are stored
//! as bincode BLOBs; scoring runs in-process over hydrated rows with the
//! same functions as the in-memory path, so results are identical for the
//! same data.

use anyhow::{anyhow, Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::BTreeSet;
use std::path::Path;

use crate::graph::{normalize_entity_name, EntityGraph, GraphSnapshot};
use crate::types::{AtomicFact, Chunk};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    container_tag TEXT NOT NULL,
    session_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    date TEXT NOT NULL,
    event_date TEXT,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_container ON chunks(container_tag);
CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks(container_tag, session_id);

CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    container_tag TEXT NOT NULL,
    session_id TEXT NOT NULL,
    fact_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    date TEXT NOT NULL,
    event_date TEXT,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_facts_container ON facts(container_tag);

CREATE TABLE IF NOT EXISTS entities (
    container_tag TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    session_ids TEXT NOT NULL,
    PRIMARY KEY (container_tag, name)
);

CREATE TABLE IF NOT EXISTS relationships (
    container_tag TEXT NOT NULL,
    source TEXT NOT NULL,
    relation TEXT NOT NULL,
    target TEXT NOT NULL,
    date TEXT,
    session_id TEXT NOT NULL,
    PRIMARY KEY (container_tag, source, relation, target, session_id)
);

CREATE TABLE IF NOT EXISTS profiles (
    container_tag TEXT PRIMARY KEY,
    facts TEXT NOT NULL
);
";

/// SQLite-backed container store
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (and migrate) the database named by `DATABASE_URL`. Accepts a
    /// plain path or a `sqlite://` URL.
    pub fn open(database_url: &str) -> Result<Self> {
        let path = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .context("failed to build sqlite connection pool")?;

        let conn = pool.get()?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply sqlite schema")?;

        Ok(Self { pool })
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        pool.get()?.execute_batch(SCHEMA_SQL)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow!("sqlite pool exhausted: {e}"))
    }

    pub fn add_chunks(&self, tag: &str, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks \
                 (id, container_tag, session_id, chunk_index, content, date, event_date, embedding) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for chunk in chunks {
                let blob = bincode::serialize(&chunk.embedding)?;
                stmt.execute(params![
                    chunk.id,
                    tag,
                    chunk.session_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.date,
                    chunk.event_date,
                    blob,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_chunks(&self, tag: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, chunk_index, content, date, event_date, embedding \
             FROM chunks WHERE container_tag = ?1 ORDER BY session_id, chunk_index",
        )?;

        let rows = stmt.query_map([tag], |row| {
            let blob: Vec<u8> = row.get(6)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                blob,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, session_id, chunk_index, content, date, event_date, blob) = row?;
            let embedding: Vec<f32> =
                bincode::deserialize(&blob).context("corrupt chunk embedding blob")?;
            chunks.push(Chunk {
                id,
                content,
                session_id,
                chunk_index: chunk_index as usize,
                date,
                event_date,
                embedding,
                metadata: None,
            });
        }
        Ok(chunks)
    }

    pub fn add_facts(&self, tag: &str, facts: &[AtomicFact]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO facts \
                 (id, container_tag, session_id, fact_index, content, date, event_date, embedding) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for fact in facts {
                let blob = bincode::serialize(&fact.embedding)?;
                stmt.execute(params![
                    fact.id,
                    tag,
                    fact.session_id,
                    fact.fact_index as i64,
                    fact.content,
                    fact.date,
                    fact.event_date,
                    blob,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_facts(&self, tag: &str) -> Result<Vec<AtomicFact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, fact_index, content, date, event_date, embedding \
             FROM facts WHERE container_tag = ?1 ORDER BY session_id, fact_index",
        )?;

        let rows = stmt.query_map([tag], |row| {
            let blob: Vec<u8> = row.get(6)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                blob,
            ))
        })?;

        let mut facts = Vec::new();
        for row in rows {
            let (id, session_id, fact_index, content, date, event_date, blob) = row?;
            let embedding: Vec<f32> =
                bincode::deserialize(&blob).context("corrupt fact embedding blob")?;
            facts.push(AtomicFact {
                id,
                content,
                session_id,
                fact_index: fact_index as usize,
                date,
                event_date,
                embedding,
            });
        }
        Ok(facts)
    }

    /// Upsert an entity with the same merge semantics as the in-memory graph
    pub fn upsert_entity(
        &self,
        tag: &str,
        name: &str,
        entity_type: &str,
        summary: &str,
        session_id: &str,
    ) -> Result<()> {
        let name = normalize_entity_name(name);
        if name.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let existing: Option<(String, String, String)> = conn
            .query_row(
                "SELECT entity_type, summary, session_ids FROM entities \
                 WHERE container_tag = ?1 AND name = ?2",
                params![tag, name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;

        let (entity_type, summary, session_ids) = match existing {
            Some((kept_type, mut kept_summary, ids_json)) => {
                if !summary.is_empty() && !kept_summary.contains(summary) {
                    if kept_summary.is_empty() {
                        kept_summary = summary.to_string();
                    } else {
                        kept_summary.push_str("; ");
                        kept_summary.push_str(summary);
                    }
                }
                let mut ids: BTreeSet<String> =
                    serde_json::from_str(&ids_json).unwrap_or_default();
                ids.insert(session_id.to_string());
                (kept_type, kept_summary, ids)
            }
            None => {
                let mut ids = BTreeSet::new();
                ids.insert(session_id.to_string());
                (entity_type.to_string(), summary.to_string(), ids)
            }
        };

        conn.execute(
            "INSERT OR REPLACE INTO entities (container_tag, name, entity_type, summary, session_ids) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tag, name, entity_type, summary, serde_json::to_string(&session_ids)?],
        )?;
        Ok(())
    }

    pub fn add_relationship(
        &self,
        tag: &str,
        source: &str,
        relation: &str,
        target: &str,
        date: Option<&str>,
        session_id: &str,
    ) -> Result<()> {
        let source = normalize_entity_name(source);
        let target = normalize_entity_name(target);
        if source.is_empty() || target.is_empty() || relation.trim().is_empty() {
            return Ok(());
        }

        for endpoint in [&source, &target] {
            self.upsert_entity(tag, endpoint, "entity", "", session_id)?;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO relationships \
             (container_tag, source, relation, target, date, session_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![tag, source, relation.trim(), target, date, session_id],
        )?;
        Ok(())
    }

    /// Hydrate the container's graph for traversal
    pub fn load_graph(&self, tag: &str) -> Result<EntityGraph> {
        let conn = self.conn()?;

        let mut snapshot = GraphSnapshot {
            version: 1,
            nodes: Vec::new(),
            edges: Vec::new(),
        };

        let mut stmt = conn.prepare(
            "SELECT name, entity_type, summary, session_ids FROM entities \
             WHERE container_tag = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([tag], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (name, entity_type, summary, ids_json) = row?;
            snapshot.nodes.push(crate::graph::EntityNode {
                name,
                entity_type,
                summary,
                session_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT source, relation, target, date, session_id FROM relationships \
             WHERE container_tag = ?1",
        )?;
        let rows = stmt.query_map([tag], |row| {
            Ok(crate::graph::GraphEdge {
                source: row.get(0)?,
                relation: row.get(1)?,
                target: row.get(2)?,
                date: row.get(3)?,
                session_id: row.get(4)?,
            })
        })?;
        for row in rows {
            snapshot.edges.push(row?);
        }

        Ok(EntityGraph::from_snapshot(snapshot))
    }

    pub fn load_profile(&self, tag: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let facts: Option<String> = conn
            .query_row(
                "SELECT facts FROM profiles WHERE container_tag = ?1",
                [tag],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;

        Ok(facts
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default())
    }

    pub fn save_profile(&self, tag: &str, facts: &[String]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO profiles (container_tag, facts) VALUES (?1, ?2)",
            params![tag, serde_json::to_string(facts)?],
        )?;
        Ok(())
    }

    pub fn clear(&self, tag: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ["chunks", "facts", "entities", "relationships", "profiles"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE container_tag = ?1"),
                [tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_containers(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT container_tag FROM chunks \
             UNION SELECT DISTINCT container_tag FROM profiles \
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    pub fn has_data(&self, tag: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE container_tag = ?1",
            [tag],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
