//! Entity graph
//!
//! Labeled directed multigraph per container, keyed by normalized entity
//! name. Retrieval is a bounded breadth-first traversal over out- and
//! in-edges from entities spotted in the query.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::search::tokenize;

/// Per-node neighbor cap during traversal
pub const MAX_NEIGHBORS_PER_NODE: usize = 30;
/// Total relationship cap per traversal
pub const MAX_TOTAL_RELATIONSHIPS: usize = 200;

/// Canonical entity key: lowercased, whitespace collapsed to underscores
pub fn normalize_entity_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Node in the entity graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    pub name: String,
    pub entity_type: String,
    pub summary: String,
    pub session_ids: BTreeSet<String>,
}

/// Labeled edge; duplicates are collapsed on the full quad
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub session_id: String,
}

/// Traversal result: visited nodes plus the edges that realized the visit
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub entities: Vec<EntityNode>,
    pub relationships: Vec<GraphEdge>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<GraphEdge>,
}

/// Per-container entity graph
#[derive(Default)]
pub struct EntityGraph {
    nodes: HashMap<String, EntityNode>,
    edges: Vec<GraphEdge>,
    edge_keys: HashSet<(String, String, String, String)>,
    out_edges: HashMap<String, Vec<usize>>,
    in_edges: HashMap<String, Vec<usize>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or merge an entity. On merge: append the new summary when it
    /// adds content, union session ids, keep the first-seen type.
    pub fn add_entity(&mut self, name: &str, entity_type: &str, summary: &str, session_id: &str) {
        let key = normalize_entity_name(name);
        if key.is_empty() {
            return;
        }

        match self.nodes.get_mut(&key) {
            Some(node) => {
                if !summary.is_empty() && !node.summary.contains(summary) {
                    if node.summary.is_empty() {
                        node.summary = summary.to_string();
                    } else {
                        node.summary.push_str("; ");
                        node.summary.push_str(summary);
                    }
                }
                node.session_ids.insert(session_id.to_string());
            }
            None => {
                let mut session_ids = BTreeSet::new();
                session_ids.insert(session_id.to_string());
                self.nodes.insert(
                    key.clone(),
                    EntityNode {
                        name: key,
                        entity_type: entity_type.to_string(),
                        summary: summary.to_string(),
                        session_ids,
                    },
                );
            }
        }
    }

    /// Add a relationship edge, creating placeholder endpoint nodes when the
    /// extractor named an entity it never listed. Duplicate quads are dropped.
    pub fn add_relationship(
        &mut self,
        source: &str,
        relation: &str,
        target: &str,
        date: Option<&str>,
        session_id: &str,
    ) {
        let source = normalize_entity_name(source);
        let target = normalize_entity_name(target);
        if source.is_empty() || target.is_empty() || relation.trim().is_empty() {
            return;
        }

        for endpoint in [&source, &target] {
            if !self.nodes.contains_key(endpoint) {
                self.add_entity(endpoint, "entity", "", session_id);
            }
        }

        let relation = relation.trim().to_string();
        let key = (
            source.clone(),
            relation.clone(),
            target.clone(),
            session_id.to_string(),
        );
        if !self.edge_keys.insert(key) {
            return;
        }

        let idx = self.edges.len();
        self.edges.push(GraphEdge {
            source: source.clone(),
            target: target.clone(),
            relation,
            date: date.map(str::to_string),
            session_id: session_id.to_string(),
        });
        self.out_edges.entry(source).or_default().push(idx);
        self.in_edges.entry(target).or_default().push(idx);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_data(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.edge_keys.clear();
        self.out_edges.clear();
        self.in_edges.clear();
    }

    /// Node names whose normalized form appears in the query, either as a
    /// single token or as a substring of the tokenized query.
    pub fn find_entities_in_query(&self, query: &str) -> Vec<String> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }
        let token_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let joined = tokens.join(" ");

        let mut seeds: Vec<String> = self
            .nodes
            .keys()
            .filter(|name| {
                if name.contains('_') {
                    joined.contains(&name.replace('_', " "))
                } else {
                    token_set.contains(name.as_str()) || joined.contains(name.as_str())
                }
            })
            .cloned()
            .collect();

        seeds.sort();
        seeds
    }

    /// Bounded BFS from the seed entities over out- and in-edges.
    ///
    /// Caps: 30 neighbors considered per node, 200 relationships total.
    /// Entities are deduplicated by name, relationships by
    /// `(source, relation, target)`.
    pub fn context(&self, seeds: &[String], max_hops: usize) -> GraphContext {
        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_entities: HashSet<String> = HashSet::new();
        let mut seen_triples: HashSet<(String, String, String)> = HashSet::new();
        let mut out = GraphContext::default();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for seed in seeds {
            let key = normalize_entity_name(seed);
            if self.nodes.contains_key(&key) {
                queue.push_back((key, 0));
            }
        }

        while let Some((current, depth)) = queue.pop_front() {
            if out.relationships.len() >= MAX_TOTAL_RELATIONSHIPS {
                break;
            }
            if depth > max_hops || !visited.insert(current.clone()) {
                continue;
            }

            if let Some(node) = self.nodes.get(&current) {
                if seen_entities.insert(current.clone()) {
                    out.entities.push(node.clone());
                }
            }

            let mut edge_indices: Vec<usize> = Vec::new();
            if let Some(idxs) = self.out_edges.get(&current) {
                edge_indices.extend(idxs);
            }
            if let Some(idxs) = self.in_edges.get(&current) {
                edge_indices.extend(idxs);
            }
            edge_indices.truncate(MAX_NEIGHBORS_PER_NODE);

            for idx in edge_indices {
                let edge = &self.edges[idx];
                let neighbor = if edge.source == current {
                    &edge.target
                } else {
                    &edge.source
                };

                let triple = (
                    edge.source.clone(),
                    edge.relation.clone(),
                    edge.target.clone(),
                );
                if seen_triples.insert(triple) {
                    out.relationships.push(edge.clone());
                    if out.relationships.len() >= MAX_TOTAL_RELATIONSHIPS {
                        break;
                    }
                }

                if let Some(node) = self.nodes.get(neighbor) {
                    if seen_entities.insert(neighbor.clone()) {
                        out.entities.push(node.clone());
                    }
                }

                if !visited.contains(neighbor) && depth + 1 <= max_hops {
                    queue.push_back((neighbor.clone(), depth + 1));
                }
            }
        }

        out
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<EntityNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        GraphSnapshot {
            version: 1,
            nodes,
            edges: self.edges.clone(),
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.nodes.insert(node.name.clone(), node);
        }
        for edge in snapshot.edges {
            graph.add_relationship(
                &edge.source,
                &edge.relation,
                &edge.target,
                edge.date.as_deref(),
                &edge.session_id,
            );
        }
        graph
    }
}
