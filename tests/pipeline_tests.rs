//! End-to-end pipeline tests over the in-memory backend with deterministic
//! fakes: ingest/search scenarios, injection, profile merge, decomposition,
//! rerank behavior, and persistence round-trips.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

use common::{build_engine, session, test_config, MockChat};
use ragmem::types::RetrievedItem;

fn chunk_keys(items: &[RetrievedItem]) -> Vec<(String, usize)> {
    items
        .iter()
        .filter_map(|item| match item {
            RetrievedItem::Chunk {
                session_id,
                chunk_index,
                ..
            } => Some((session_id.clone(), *chunk_index)),
            _ => None,
        })
        .collect()
}

fn chunk_contents(items: &[RetrievedItem]) -> Vec<&str> {
    items
        .iter()
        .filter_map(|item| match item {
            RetrievedItem::Chunk { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn basic_ingest_and_search() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    let outcome = engine
        .ingest(
            "alice",
            vec![session(
                "s1",
                "User loves hiking in the Alps.",
                Some("2026-02-23"),
            )],
        )
        .await
        .unwrap();
    assert_eq!(outcome.document_ids, vec!["alice_s1_0".to_string()]);
    assert!(outcome.failed_sessions.is_empty());

    let results = engine.search("alice", "Alps hiking", 10).await.unwrap();
    let contents = chunk_contents(&results);
    assert!(!contents.is_empty());
    assert!(contents[0].contains("Alps"));

    match &results[0] {
        RetrievedItem::Chunk { score, date, .. } => {
            assert!(*score > 0.5, "top score was {score}");
            assert_eq!(date, "2026-02-23");
        }
        other => panic!("expected chunk first, got {other:?}"),
    }
}

#[tokio::test]
async fn reingest_same_session_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    let first = engine
        .ingest("alice", vec![session("s1", "User plays chess.", None)])
        .await
        .unwrap();
    let second = engine
        .ingest("alice", vec![session("s1", "User plays chess.", None)])
        .await
        .unwrap();

    assert_eq!(first.document_ids, second.document_ids);
    let stats = engine.container_stats("alice").await.unwrap();
    assert_eq!(stats.chunks, 1);
}

#[tokio::test]
async fn extraction_is_cached_by_session_id() {
    let dir = TempDir::new().unwrap();
    let chat = Arc::new(MockChat::new());
    let engine = build_engine(test_config(dir.path()), Arc::clone(&chat));

    engine
        .ingest("alice", vec![session("s1", "User plays chess.", None)])
        .await
        .unwrap();
    engine
        .ingest("alice", vec![session("s1", "User plays chess.", None)])
        .await
        .unwrap();

    assert_eq!(chat.extract_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_session_is_skipped_others_proceed() {
    let dir = TempDir::new().unwrap();
    let chat = Arc::new(MockChat::new().with_extract(|rendered| {
        if rendered.contains("poison") {
            anyhow::bail!("extractor exploded");
        }
        Ok(common::echo_extraction(rendered))
    }));
    let engine = build_engine(test_config(dir.path()), chat);

    let outcome = engine
        .ingest(
            "alice",
            vec![
                session("good", "User enjoys sailing.", None),
                session("bad", "poison pill", None),
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcome.failed_sessions, vec!["bad".to_string()]);
    assert_eq!(outcome.document_ids, vec!["alice_good_0".to_string()]);
}

#[tokio::test]
async fn parent_chunk_injection_surfaces_containing_chunk() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    engine
        .ingest(
            "alice",
            vec![
                session(
                    "noise",
                    "User asked where to find the best live music the user could see.",
                    None,
                ),
                session("home", "User lives in Berlin", None),
            ],
        )
        .await
        .unwrap();

    // limit 1: the hybrid cutoff keeps only the noise chunk, injection must
    // still surface the Berlin chunk through its matching fact
    let results = engine
        .search("alice", "where does the user live", 1)
        .await
        .unwrap();

    let contents = chunk_contents(&results);
    assert!(
        contents.iter().any(|c| c.contains("Berlin")),
        "injected chunk missing from {contents:?}"
    );
}

#[tokio::test]
async fn profile_merges_and_appends_as_record() {
    let dir = TempDir::new().unwrap();
    let chat = Arc::new(MockChat::new().with_profile(|memories| {
        if memories.contains("San Francisco") {
            Ok("- Lives in San Francisco".to_string())
        } else {
            Ok("- Lives in SF".to_string())
        }
    }));
    let engine = build_engine(test_config(dir.path()), chat);

    engine
        .ingest("alice", vec![session("p1", "I live in San Francisco", None)])
        .await
        .unwrap();
    engine
        .ingest("alice", vec![session("p2", "I live in SF now", None)])
        .await
        .unwrap();

    let stats = engine.container_stats("alice").await.unwrap();
    assert_eq!(stats.profile_facts, 1);

    let results = engine.search("alice", "anything at all", 5).await.unwrap();
    let profile = results
        .iter()
        .find_map(|item| match item {
            RetrievedItem::Profile { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .expect("profile record missing");
    assert!(profile.starts_with("<user_profile>"));
    assert!(profile.contains("- Lives in SF"));
    assert!(!profile.contains("San Francisco"));
}

#[tokio::test]
async fn counting_query_unions_subquery_results() {
    let dir = TempDir::new().unwrap();

    let seed = |chat: Arc<MockChat>, cache: &std::path::Path, decompose: bool| {
        let mut config = test_config(cache);
        config.decompose_enabled = decompose;
        build_engine(config, chat)
    };

    let chat = Arc::new(
        MockChat::new()
            .with_decompose(|_| Ok("trips to Paris\ntrips to Tokyo".to_string())),
    );
    let engine = seed(Arc::clone(&chat), dir.path(), true);

    engine
        .ingest(
            "alice",
            vec![
                session("t1", "User took a trip to Paris in spring.", None),
                session("t2", "User took a trip to Tokyo in autumn.", None),
                session("t3", "User adopted a cat named Miso.", None),
            ],
        )
        .await
        .unwrap();

    let baseline_engine = seed(Arc::new(MockChat::new()), dir.path(), false);
    let baseline = baseline_engine
        .search("alice", "how many trips did I take?", 50)
        .await
        .unwrap();

    let decomposed = engine
        .search("alice", "how many trips did I take?", 50)
        .await
        .unwrap();

    assert_eq!(chat.decompose_calls.load(Ordering::SeqCst), 1);

    let baseline_keys = chunk_keys(&baseline);
    let decomposed_keys = chunk_keys(&decomposed);
    for key in &baseline_keys {
        assert!(
            decomposed_keys.contains(key),
            "decomposed set lost {key:?}"
        );
    }
}

#[tokio::test]
async fn non_counting_query_skips_decomposition() {
    let dir = TempDir::new().unwrap();
    let chat = Arc::new(MockChat::new().with_decompose(|_| Ok("should not run".to_string())));
    let mut config = test_config(dir.path());
    config.decompose_enabled = true;
    let engine = build_engine(config, Arc::clone(&chat));

    engine
        .ingest("alice", vec![session("s1", "User likes tea.", None)])
        .await
        .unwrap();
    engine.search("alice", "what does the user drink", 5).await.unwrap();

    assert_eq!(chat.decompose_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rerank_failure_degrades_to_hybrid_order() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.reranker_enabled = true;
    // MockChat's default rerank closure errors
    let chat = Arc::new(MockChat::new());
    let engine = build_engine(config, Arc::clone(&chat));

    engine
        .ingest(
            "alice",
            vec![
                session("a", "User visited Lisbon for a conference.", None),
                session("b", "User visited Porto on holiday.", None),
                session("c", "User visited Madrid for work.", None),
            ],
        )
        .await
        .unwrap();

    let results = engine.search("alice", "visited cities", 2).await.unwrap();
    assert_eq!(chat.rerank_calls.load(Ordering::SeqCst), 1);
    assert_eq!(chunk_contents(&results).len(), 2);
}

#[tokio::test]
async fn rerank_reorders_and_truncates() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.reranker_enabled = true;

    // Score whichever candidate mentions Tokyo highest, everything else 0
    let chat = Arc::new(MockChat::new().with_rerank(|prompt| {
        let mut entries = Vec::new();
        for line in prompt.lines() {
            if let Some(rest) = line.strip_prefix('[') {
                if let Some((idx, content)) = rest.split_once(']') {
                    let score = if content.contains("Tokyo") { 0.9 } else { 0.0 };
                    entries.push(format!("{{\"index\": {}, \"score\": {score}}}", idx.trim()));
                }
            }
        }
        Ok(format!("[{}]", entries.join(",")))
    }));
    let engine = build_engine(config, Arc::clone(&chat));

    engine
        .ingest(
            "alice",
            vec![
                session("a", "User visited Lisbon for a conference.", None),
                session("b", "User visited Tokyo on holiday.", None),
                session("c", "User visited Madrid for work.", None),
            ],
        )
        .await
        .unwrap();

    let results = engine.search("alice", "conference Lisbon", 2).await.unwrap();
    let contents = chunk_contents(&results);
    assert_eq!(contents.len(), 2);
    assert!(
        contents[0].contains("Tokyo"),
        "rerank winner not first: {contents:?}"
    );
}

#[tokio::test]
async fn save_then_load_in_fresh_process_yields_identical_results() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    engine
        .ingest(
            "alice",
            vec![
                session("s1", "User keeps bees on the roof.", Some("2026-03-01")),
                session("s2", "User brews kombucha weekly.", Some("2026-03-02")),
            ],
        )
        .await
        .unwrap();

    let before = engine.search("alice", "bees roof", 10).await.unwrap();

    // Fresh engine over the same cache dir simulates a restarted process
    let restarted = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));
    let after = restarted.search("alice", "bees roof", 10).await.unwrap();

    assert_eq!(
        serde_json::to_value(&before).unwrap(),
        serde_json::to_value(&after).unwrap()
    );
}

#[tokio::test]
async fn clear_then_search_returns_empty() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    engine
        .ingest("alice", vec![session("s1", "User collects stamps.", None)])
        .await
        .unwrap();
    assert!(!engine.search("alice", "stamps", 5).await.unwrap().is_empty());

    engine.clear_container("alice").unwrap();
    assert!(engine.search("alice", "stamps", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_container_returns_empty() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    let results = engine.search("ghost", "anything", 5).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn store_text_is_searchable_and_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    let ids = engine
        .store_text("alice", "The wifi password is hunter2.")
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let again = engine
        .store_text("alice", "The wifi password is hunter2.")
        .await
        .unwrap();
    assert_eq!(ids, again);

    let stats = engine.container_stats("alice").await.unwrap();
    assert_eq!(stats.chunks, 1);

    let results = engine.search("alice", "wifi password", 5).await.unwrap();
    assert!(chunk_contents(&results)[0].contains("hunter2"));
}

#[tokio::test]
async fn list_containers_sees_memory_and_disk() {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));

    engine
        .ingest("alice", vec![session("s1", "User likes tea.", None)])
        .await
        .unwrap();

    let restarted = build_engine(test_config(dir.path()), Arc::new(MockChat::new()));
    assert_eq!(
        restarted.list_containers().unwrap(),
        vec!["alice".to_string()]
    );
}
