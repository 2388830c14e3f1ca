//! On-disk container snapshots
//!
//! One directory per container with at most four files, each the versioned
//! JSON form of its index. Writes go through a temp file and rename so a
//! crash never leaves a torn file. Loads tolerate any subset existing; a
//! file that fails to parse is logged and treated as missing.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::facts::FactSnapshot;
use crate::graph::GraphSnapshot;
use crate::profile::ProfileSnapshot;
use crate::search::SearchSnapshot;

pub const SEARCH_FILE: &str = "search.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const FACTS_FILE: &str = "facts.json";
pub const PROFILE_FILE: &str = "profile.json";

/// Everything a container persists
pub struct ContainerSnapshot {
    pub search: Option<SearchSnapshot>,
    pub graph: Option<GraphSnapshot>,
    pub facts: Option<FactSnapshot>,
    pub profile: Option<ProfileSnapshot>,
}

/// Snapshot directory for one container tag
pub fn container_dir(cache_root: &Path, tag: &str) -> PathBuf {
    cache_root.join(tag)
}

/// Serialize to a temp file in the target directory, then rename into place
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .context("snapshot path has no parent directory")?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec(value).context("failed to serialize snapshot")?;
    fs::write(&tmp, &json).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to rename into {}", path.display()))?;

    Ok(())
}

/// Read and parse a snapshot file. Missing files yield `None`; corrupt files
/// are logged and also yield `None` (the component starts empty).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("failed to read snapshot {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                "corrupt snapshot {} treated as missing: {e}",
                path.display()
            );
            None
        }
    }
}

/// Write all four component snapshots for a container
pub fn save_container(cache_root: &Path, tag: &str, snapshot: &ContainerSnapshot) -> Result<()> {
    let dir = container_dir(cache_root, tag);

    if let Some(search) = &snapshot.search {
        write_json_atomic(&dir.join(SEARCH_FILE), search)?;
    }
    if let Some(graph) = &snapshot.graph {
        write_json_atomic(&dir.join(GRAPH_FILE), graph)?;
    }
    if let Some(facts) = &snapshot.facts {
        write_json_atomic(&dir.join(FACTS_FILE), facts)?;
    }
    if let Some(profile) = &snapshot.profile {
        write_json_atomic(&dir.join(PROFILE_FILE), profile)?;
    }

    debug!("snapshot written for container '{tag}'");
    Ok(())
}

/// Load whatever subset of the snapshot exists on disk
pub fn load_container(cache_root: &Path, tag: &str) -> ContainerSnapshot {
    let dir = container_dir(cache_root, tag);
    ContainerSnapshot {
        search: read_json(&dir.join(SEARCH_FILE)),
        graph: read_json(&dir.join(GRAPH_FILE)),
        facts: read_json(&dir.join(FACTS_FILE)),
        profile: read_json(&dir.join(PROFILE_FILE)),
    }
}

/// Remove a container's snapshot directory
pub fn clear_container(cache_root: &Path, tag: &str) -> Result<()> {
    let dir = container_dir(cache_root, tag);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to clear {}", dir.display())),
    }
}

/// List container tags that have snapshot directories
pub fn list_containers(cache_root: &Path) -> Vec<String> {
    let mut tags: Vec<String> = fs::read_dir(cache_root)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();
    tags.sort();
    tags
}
