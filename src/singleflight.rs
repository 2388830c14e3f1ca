//! Keyed single-flight execution
//!
//! Deduplicates concurrent async work per key: the first caller runs the
//! future, everyone else awaits the same cell. Successful results are
//! retained (the cell doubles as a cache); failures leave the cell empty so
//! a later attempt retries. Used by the extractor client (per session id)
//! and the snapshot loader (per container tag).

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct SingleFlight<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for `key` unless a previous run already succeeded; concurrent
    /// callers for the same key share one in-flight future.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> anyhow::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let cell = self.cells.entry(key).or_default().clone();
        cell.get_or_try_init(f).await.cloned()
    }

    /// Peek at a completed result without running anything
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Drop the cell for `key` so the next run starts fresh
    pub fn invalidate(&self, key: &K) {
        self.cells.remove(key);
    }

    /// Drop every cell
    pub fn clear(&self) {
        self.cells.clear();
    }
}
