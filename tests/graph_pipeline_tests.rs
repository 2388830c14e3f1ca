//! Graph context through the full pipeline: entities and relationships
//! extracted at ingest surface as typed records at search time.

mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{build_engine, session, test_config, MockChat};
use ragmem::types::RetrievedItem;

fn entity_names(items: &[RetrievedItem]) -> Vec<&str> {
    items
        .iter()
        .filter_map(|item| match item {
            RetrievedItem::Entity { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

fn relationships(items: &[RetrievedItem]) -> Vec<(&str, &str, &str)> {
    items
        .iter()
        .filter_map(|item| match item {
            RetrievedItem::Relationship {
                source,
                relation,
                target,
                ..
            } => Some((source.as_str(), relation.as_str(), target.as_str())),
            _ => None,
        })
        .collect()
}

fn graph_chat() -> Arc<MockChat> {
    Arc::new(MockChat::new().with_extract(|_| {
        Ok("\
MEMORIES:
- Alice works at Google in Mountain View

ENTITIES:
Alice | person | Friend of the user
Google | organization | Alice's employer
Mountain View | location | Google's home town

RELATIONSHIPS:
alice | works_at | google
google | in | mountain_view
"
        .to_string())
    }))
}

#[tokio::test]
async fn two_hop_context_reaches_indirect_neighbors() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), graph_chat());

    engine
        .ingest("u", vec![session("s1", "Alice got a job at Google", None)])
        .await
        .unwrap();

    let results = engine.search("u", "Tell me about Alice", 10).await.unwrap();

    let names = entity_names(&results);
    assert!(names.contains(&"alice"));
    assert!(names.contains(&"google"), "1-hop neighbor missing: {names:?}");
    assert!(
        names.contains(&"mountain_view"),
        "2-hop neighbor missing: {names:?}"
    );

    let rels = relationships(&results);
    assert!(rels.contains(&("alice", "works_at", "google")));
    assert!(rels.contains(&("google", "in", "mountain_view")));
}

#[tokio::test]
async fn no_seed_in_query_means_no_graph_records() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), graph_chat());

    engine
        .ingest("u", vec![session("s1", "Alice got a job at Google", None)])
        .await
        .unwrap();

    let results = engine
        .search("u", "what is the weather like", 10)
        .await
        .unwrap();
    assert!(entity_names(&results).is_empty());
    assert!(relationships(&results).is_empty());
}

#[tokio::test]
async fn graph_flag_off_suppresses_records() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.graph_enabled = false;
    let engine = build_engine(config, graph_chat());

    engine
        .ingest("u", vec![session("s1", "Alice got a job at Google", None)])
        .await
        .unwrap();

    let results = engine.search("u", "Tell me about Alice", 10).await.unwrap();
    assert!(entity_names(&results).is_empty());
    assert!(relationships(&results).is_empty());
}

#[tokio::test]
async fn graph_survives_snapshot_restart() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), graph_chat());

    engine
        .ingest("u", vec![session("s1", "Alice got a job at Google", None)])
        .await
        .unwrap();

    let restarted = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));
    let results = restarted
        .search("u", "Tell me about Alice", 10)
        .await
        .unwrap();
    assert!(entity_names(&results).contains(&"mountain_view"));
}
