//! Core data model shared across the engine

use serde::{Deserialize, Serialize};

/// One turn of a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: String,
    pub content: String,
}

/// A conversation session submitted for ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSession {
    pub session_id: String,
    pub turns: Vec<SessionTurn>,
    /// Session date, `YYYY-MM-DD`
    pub date: Option<String>,
}

impl IngestSession {
    /// Render the session as extractor input, one `role: content` line per turn
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn date_or_unknown(&self) -> &str {
        self.date.as_deref().unwrap_or("unknown")
    }
}

/// Deterministic chunk id: pure function of (container, session, index)
pub fn chunk_id(container_tag: &str, session_id: &str, chunk_index: usize) -> String {
    format!("{container_tag}_{session_id}_{chunk_index}")
}

/// An overlapping passage of session text with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A short single-line extracted statement, searchable independently of its
/// parent chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicFact {
    pub id: String,
    pub content: String,
    pub session_id: String,
    pub fact_index: usize,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    pub embedding: Vec<f32>,
}

/// A chunk scored by the hybrid engine (component scores kept for debugging
/// and for the reranker)
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub content: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub date: String,
    pub score: f32,
    pub vector_score: f32,
    pub bm25_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// A fact scored by cosine lookup
#[derive(Debug, Clone)]
pub struct ScoredFact {
    pub content: String,
    pub session_id: String,
    pub score: f32,
}

/// One record of a search response; callers discriminate on the `type` tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrievedItem {
    Chunk {
        content: String,
        score: f32,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: usize,
        date: String,
    },
    Entity {
        name: String,
        #[serde(rename = "entityType")]
        entity_type: String,
        summary: String,
        score: f32,
    },
    Relationship {
        source: String,
        relation: String,
        target: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        date: Option<String>,
        score: f32,
    },
    Profile {
        content: String,
        score: f32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        assert_eq!(chunk_id("alice", "s1", 0), "alice_s1_0");
        assert_eq!(chunk_id("alice", "s1", 0), chunk_id("alice", "s1", 0));
    }

    #[test]
    fn session_render_preserves_turn_order() {
        let session = IngestSession {
            session_id: "s1".to_string(),
            turns: vec![
                SessionTurn {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                },
                SessionTurn {
                    role: "assistant".to_string(),
                    content: "hello".to_string(),
                },
            ],
            date: None,
        };
        assert_eq!(session.render(), "user: hi\nassistant: hello");
        assert_eq!(session.date_or_unknown(), "unknown");
    }

    #[test]
    fn retrieved_item_serializes_type_tag() {
        let item = RetrievedItem::Profile {
            content: "<user_profile>\n- likes tea\n</user_profile>".to_string(),
            score: 0.0,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "profile");

        let item = RetrievedItem::Entity {
            name: "google".to_string(),
            entity_type: "organization".to_string(),
            summary: "employer".to_string(),
            score: 0.0,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "entity");
        assert_eq!(json["entityType"], "organization");
    }
}
