//! User profile store
//!
//! A small ordered list of biographical statements. The merge rule keeps the
//! newest phrasing of a fact: an incoming fact replaces any retained fact it
//! overlaps with by 0.6 or more, so "lives in SF" and "lives in San
//! Francisco" never coexist.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::extraction::strip_list_marker;

pub const OVERLAP_THRESHOLD: f32 = 0.6;

const MIN_FACT_LEN: usize = 4;
const MAX_FACT_LEN: usize = 300;

/// Word overlap between two facts: shared-word count divided by the smaller
/// word-set size. Case-insensitive; punctuation is ignored.
pub fn word_overlap(a: &str, b: &str) -> f32 {
    let words_a = word_set(a);
    let words_b = word_set(b);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let shared = words_a.intersection(&words_b).count();
    shared as f32 / words_a.len().min(words_b.len()) as f32
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub version: u32,
    pub facts: Vec<String>,
}

/// Ordered, deduplicated biographical facts
#[derive(Debug, Clone, Default)]
pub struct Profile {
    facts: Vec<String>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn facts(&self) -> &[String] {
        &self.facts
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }

    /// Merge incoming facts: replace the first overlapping retained fact in
    /// place, append when nothing overlaps.
    pub fn merge(&mut self, incoming: &[String]) {
        for fact in incoming {
            let fact = fact.trim();
            if fact.is_empty() {
                continue;
            }

            let replace_at = self
                .facts
                .iter()
                .position(|existing| word_overlap(existing, fact) >= OVERLAP_THRESHOLD);

            match replace_at {
                Some(idx) => self.facts[idx] = fact.to_string(),
                None => self.facts.push(fact.to_string()),
            }
        }
    }

    /// Render the profile block spliced into prompts by callers
    pub fn format_block(&self) -> Option<String> {
        if self.facts.is_empty() {
            return None;
        }

        let mut block = String::from("<user_profile>\n");
        for fact in &self.facts {
            block.push_str("- ");
            block.push_str(fact);
            block.push('\n');
        }
        block.push_str("</user_profile>");
        Some(block)
    }

    pub fn to_snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            version: 1,
            facts: self.facts.clone(),
        }
    }

    pub fn from_snapshot(snapshot: ProfileSnapshot) -> Self {
        Self {
            facts: snapshot.facts,
        }
    }
}

/// Parse LLM profile output: one fact per line, list markers stripped,
/// keeping lines of 4–300 characters
pub fn parse_profile_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(strip_list_marker)
        .map(str::trim)
        .filter(|line| (MIN_FACT_LEN..=MAX_FACT_LEN).contains(&line.len()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_metric() {
        let a = "Lives in San Francisco";
        let b = "Lives in SF";
        assert!(word_overlap(a, b) >= OVERLAP_THRESHOLD);

        assert_eq!(word_overlap("owns a dog", "plays chess weekly"), 0.0);
        assert_eq!(word_overlap("", "anything"), 0.0);
    }

    #[test]
    fn merge_replaces_overlapping_fact() {
        let mut profile = Profile::new();
        profile.merge(&["Lives in San Francisco".to_string()]);
        profile.merge(&["Lives in SF".to_string()]);

        assert_eq!(profile.len(), 1);
        assert_eq!(profile.facts()[0], "Lives in SF");
    }

    #[test]
    fn merge_appends_unrelated_facts() {
        let mut profile = Profile::new();
        profile.merge(&[
            "Lives in Berlin".to_string(),
            "Works as a nurse".to_string(),
        ]);
        profile.merge(&["Owns two cats".to_string()]);

        assert_eq!(profile.len(), 3);
    }

    #[test]
    fn invariant_no_two_facts_overlap() {
        let mut profile = Profile::new();
        profile.merge(&[
            "Enjoys hiking in the Alps".to_string(),
            "Prefers tea over coffee".to_string(),
            "Enjoys hiking in Switzerland".to_string(),
            "Recently moved to Madrid".to_string(),
        ]);

        let facts = profile.facts();
        for i in 0..facts.len() {
            for j in (i + 1)..facts.len() {
                assert!(
                    word_overlap(&facts[i], &facts[j]) < OVERLAP_THRESHOLD,
                    "{:?} overlaps {:?}",
                    facts[i],
                    facts[j]
                );
            }
        }
    }

    #[test]
    fn format_block() {
        let mut profile = Profile::new();
        assert!(profile.format_block().is_none());

        profile.merge(&["Lives in Berlin".to_string(), "Owns a cat".to_string()]);
        let block = profile.format_block().unwrap();
        assert!(block.starts_with("<user_profile>\n"));
        assert!(block.contains("- Lives in Berlin\n"));
        assert!(block.ends_with("</user_profile>"));
    }

    #[test]
    fn parse_lines_filters_length_and_markers() {
        let out = "- Lives in Berlin\n* Owns a cat\nno\n# header is fine actually\n";
        let lines = parse_profile_lines(out);
        assert!(lines.contains(&"Lives in Berlin".to_string()));
        assert!(lines.contains(&"Owns a cat".to_string()));
        assert!(!lines.iter().any(|l| l == "no"));

        let long = "x".repeat(400);
        assert!(parse_profile_lines(&long).is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut profile = Profile::new();
        profile.merge(&["Lives in Berlin".to_string()]);

        let json = serde_json::to_string(&profile.to_snapshot()).unwrap();
        let restored = Profile::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.facts(), profile.facts());
    }
}
