//! Extractor client
//!
//! Delegates structured extraction to the external LLM: a canonical
//! restatement of the session (memory lines), entities, and relationships.
//! Results are cached by session id with single-flight dedup; a global
//! semaphore caps concurrent extractions across all containers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::llm::ChatModel;
use crate::singleflight::SingleFlight;
use crate::types::IngestSession;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You extract long-term memories from a conversation session. Respond with \
exactly three sections in this order and nothing else.\n\
MEMORIES:\n\
One line per durable fact about the user, restated in third person \
(\"User ...\"). Skip small talk.\n\
ENTITIES:\n\
One line per named entity as: name | type | one-sentence summary\n\
RELATIONSHIPS:\n\
One line per relationship as: source | relation | target | date (date \
optional, YYYY-MM-DD). Use short snake_case relation names.";

/// Extracted entity before graph normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub summary: String,
}

/// Extracted relationship triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source: String,
    pub relation: String,
    pub target: String,
    pub date: Option<String>,
}

/// Parsed extractor output for one session
#[derive(Debug, Clone, Default)]
pub struct SessionExtraction {
    pub memories_text: String,
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

/// Client wrapping the chat model with caching and admission control
pub struct SessionExtractor {
    chat: Arc<dyn ChatModel>,
    semaphore: Arc<Semaphore>,
    cache: SingleFlight<String, Arc<SessionExtraction>>,
}

impl SessionExtractor {
    pub fn new(chat: Arc<dyn ChatModel>, max_concurrent: usize) -> Self {
        Self {
            chat,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cache: SingleFlight::new(),
        }
    }

    /// Extract one session. Concurrent calls for the same session id share a
    /// single in-flight request; completed extractions are served from cache.
    pub async fn extract(&self, session: &IngestSession) -> Result<Arc<SessionExtraction>> {
        let chat = Arc::clone(&self.chat);
        let semaphore = Arc::clone(&self.semaphore);
        let rendered = session.render();
        let session_id = session.session_id.clone();

        self.cache
            .run(session.session_id.clone(), move || async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("extraction semaphore closed")?;

                debug!(session_id = %session_id, "extracting session");
                let payload = chat
                    .complete(EXTRACTION_SYSTEM_PROMPT, &rendered, 2048)
                    .await
                    .with_context(|| format!("extraction failed for session {session_id}"))?;

                Ok(Arc::new(parse_extraction(&payload)))
            })
            .await
    }

    /// Drop the cached extraction for a session id
    pub fn invalidate(&self, session_id: &str) {
        self.cache.invalidate(&session_id.to_string());
    }
}

#[derive(PartialEq)]
enum Section {
    Preamble,
    Memories,
    Entities,
    Relationships,
}

/// Parse the extractor payload leniently: section headers switch state,
/// structurally invalid lines are dropped.
pub fn parse_extraction(payload: &str) -> SessionExtraction {
    let mut out = SessionExtraction::default();
    let mut memory_lines: Vec<String> = Vec::new();
    let mut section = Section::Preamble;

    for raw_line in payload.lines() {
        let line = raw_line.trim();
        let header = line.trim_end_matches(':').to_ascii_uppercase();

        match header.as_str() {
            "MEMORIES" => {
                section = Section::Memories;
                continue;
            }
            "ENTITIES" => {
                section = Section::Entities;
                continue;
            }
            "RELATIONSHIPS" => {
                section = Section::Relationships;
                continue;
            }
            _ => {}
        }

        if line.is_empty() {
            continue;
        }

        match section {
            Section::Preamble => {}
            Section::Memories => {
                let cleaned = strip_list_marker(line);
                if !cleaned.is_empty() {
                    memory_lines.push(cleaned.to_string());
                }
            }
            Section::Entities => {
                let parts: Vec<&str> = line.split('|').map(str::trim).collect();
                if parts.len() >= 3 && !parts[0].is_empty() {
                    out.entities.push(ExtractedEntity {
                        name: strip_list_marker(parts[0]).to_string(),
                        entity_type: parts[1].to_string(),
                        summary: parts[2..].join(" | "),
                    });
                }
            }
            Section::Relationships => {
                let parts: Vec<&str> = line.split('|').map(str::trim).collect();
                if (3..=4).contains(&parts.len())
                    && parts.iter().take(3).all(|p| !p.is_empty())
                {
                    out.relationships.push(ExtractedRelationship {
                        source: strip_list_marker(parts[0]).to_string(),
                        relation: parts[1].to_string(),
                        target: parts[2].to_string(),
                        date: parts.get(3).filter(|d| !d.is_empty()).map(|d| d.to_string()),
                    });
                }
            }
        }
    }

    out.memories_text = memory_lines.join("\n");
    out
}

/// Strip a leading list marker (`-`, `*`, `•`, `1.`) from a line
pub fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let stripped = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "));
    if let Some(s) = stripped {
        return s.trim();
    }

    // Numbered markers: "1. ", "12. "
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            return rest.trim();
        }
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_all_sections() {
        let payload = "\
MEMORIES:
- User lives in Berlin
- User works as a nurse

ENTITIES:
- Berlin | location | City the user lives in
Alice | person | The user's sister

RELATIONSHIPS:
user | lives_in | Berlin | 2026-01-15
alice | sibling_of | user
";
        let parsed = parse_extraction(payload);
        assert_eq!(
            parsed.memories_text,
            "User lives in Berlin\nUser works as a nurse"
        );
        assert_eq!(parsed.entities.len(), 2);
        assert_eq!(parsed.entities[0].name, "Berlin");
        assert_eq!(parsed.entities[1].entity_type, "person");
        assert_eq!(parsed.relationships.len(), 2);
        assert_eq!(parsed.relationships[0].date.as_deref(), Some("2026-01-15"));
        assert_eq!(parsed.relationships[1].date, None);
    }

    #[test]
    fn drops_malformed_lines() {
        let payload = "\
ENTITIES:
just some prose without pipes
| missing name | x
Berlin | location | ok

RELATIONSHIPS:
only | two
a | b | c | d | e
user | lives_in | Berlin
";
        let parsed = parse_extraction(payload);
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.relationships.len(), 1);
    }

    #[test]
    fn strips_markers() {
        assert_eq!(strip_list_marker("- fact"), "fact");
        assert_eq!(strip_list_marker("* fact"), "fact");
        assert_eq!(strip_list_marker("3. fact"), "fact");
        assert_eq!(strip_list_marker("fact"), "fact");
    }

    struct CountingChat {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for CountingChat {
        async fn complete(&self, _system: &str, _user: &str, _max_tokens: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("MEMORIES:\n- User likes tea\nENTITIES:\nRELATIONSHIPS:\n".to_string())
        }
    }

    fn session(id: &str) -> IngestSession {
        IngestSession {
            session_id: id.to_string(),
            turns: vec![crate::types::SessionTurn {
                role: "user".to_string(),
                content: "I like tea".to_string(),
            }],
            date: None,
        }
    }

    #[tokio::test]
    async fn caches_by_session_id() {
        let chat = Arc::new(CountingChat {
            calls: AtomicUsize::new(0),
        });
        let extractor = SessionExtractor::new(chat.clone(), 4);

        let a = extractor.extract(&session("s1")).await.unwrap();
        let b = extractor.extract(&session("s1")).await.unwrap();
        assert_eq!(a.memories_text, b.memories_text);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);

        extractor.extract(&session("s2")).await.unwrap();
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }
}
