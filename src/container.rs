//! Per-container state and the container registry
//!
//! A container is an isolated namespace (one user or scope) owning a search
//! index, fact store, entity graph, and profile behind a single
//! multi-reader/single-writer lock. The registry maps tags to containers and
//! handles lazy snapshot loading with single-flight dedup.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::facts::FactStore;
use crate::graph::EntityGraph;
use crate::persistence::{self, ContainerSnapshot};
use crate::profile::Profile;
use crate::search::SearchIndex;

/// Everything a container owns; guarded by the container lock
#[derive(Default)]
pub struct ContainerState {
    pub search: SearchIndex,
    pub facts: FactStore,
    pub graph: EntityGraph,
    pub profile: Profile,
}

/// Container stats reported by the ops surface
#[derive(Debug, Serialize)]
pub struct ContainerStats {
    pub chunks: usize,
    pub facts: usize,
    pub entities: usize,
    pub relationships: usize,
    #[serde(rename = "profileFacts")]
    pub profile_facts: usize,
}

/// One isolated namespace
pub struct Container {
    pub tag: String,
    /// Readers: search, snapshot. Writers: ingest commit, snapshot load.
    /// Never held across an await.
    pub state: RwLock<ContainerState>,
    load_once: OnceCell<()>,
}

impl Container {
    fn new(tag: String) -> Self {
        Self {
            tag,
            state: RwLock::new(ContainerState::default()),
            load_once: OnceCell::new(),
        }
    }

    /// Load the on-disk snapshot into memory exactly once per process.
    /// Concurrent callers wait on the same load.
    pub async fn ensure_loaded(&self, cache_root: &Path) {
        self.load_once
            .get_or_init(|| async {
                let snapshot = persistence::load_container(cache_root, &self.tag);
                let had_any = snapshot.search.is_some()
                    || snapshot.graph.is_some()
                    || snapshot.facts.is_some()
                    || snapshot.profile.is_some();

                let mut state = self.state.write();
                if let Some(search) = snapshot.search {
                    state.search = SearchIndex::from_snapshot(search);
                }
                if let Some(graph) = snapshot.graph {
                    state.graph = EntityGraph::from_snapshot(graph);
                }
                if let Some(facts) = snapshot.facts {
                    state.facts = FactStore::from_snapshot(facts);
                }
                if let Some(profile) = snapshot.profile {
                    state.profile = Profile::from_snapshot(profile);
                }
                drop(state);

                if had_any {
                    info!("container '{}' loaded from snapshot", self.tag);
                }
            })
            .await;
    }

    /// Serialize current state under the read lock and write it to disk
    pub fn snapshot_to_disk(&self, cache_root: &Path) -> anyhow::Result<()> {
        let snapshot = {
            let state = self.state.read();
            ContainerSnapshot {
                search: Some(state.search.to_snapshot()),
                graph: Some(state.graph.to_snapshot()),
                facts: Some(state.facts.to_snapshot()),
                profile: Some(state.profile.to_snapshot()),
            }
        };
        persistence::save_container(cache_root, &self.tag, &snapshot)
    }

    pub fn stats(&self) -> ContainerStats {
        let state = self.state.read();
        ContainerStats {
            chunks: state.search.chunk_count(),
            facts: state.facts.fact_count(),
            entities: state.graph.node_count(),
            relationships: state.graph.edge_count(),
            profile_facts: state.profile.len(),
        }
    }
}

/// Registry of containers, keyed by tag
pub struct ContainerRegistry {
    containers: DashMap<String, Arc<Container>>,
    cache_root: PathBuf,
}

impl ContainerRegistry {
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            containers: DashMap::new(),
            cache_root,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn get_or_create(&self, tag: &str) -> Arc<Container> {
        self.containers
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(Container::new(tag.to_string())))
            .clone()
    }

    /// Peek without creating
    pub fn get(&self, tag: &str) -> Option<Arc<Container>> {
        self.containers.get(tag).map(|c| c.clone())
    }

    /// Tags known in memory or on disk
    pub fn list(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .containers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        tags.extend(persistence::list_containers(&self.cache_root));
        tags.sort();
        tags.dedup();
        tags
    }

    /// Wipe a container's memory and disk state
    pub fn clear(&self, tag: &str) -> anyhow::Result<()> {
        if let Some(container) = self.containers.get(tag) {
            let mut state = container.state.write();
            state.search.clear();
            state.facts.clear();
            state.graph.clear();
            state.profile.clear();
        }
        persistence::clear_container(&self.cache_root, tag)?;
        info!("container '{tag}' cleared");
        Ok(())
    }

    /// Snapshot every in-memory container (shutdown path)
    pub fn snapshot_all(&self) -> usize {
        let mut written = 0;
        for entry in self.containers.iter() {
            match entry.value().snapshot_to_disk(&self.cache_root) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!("snapshot failed for '{}': {e:#}", entry.key()),
            }
        }
        written
    }
}
