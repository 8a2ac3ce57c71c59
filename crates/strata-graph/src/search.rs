//! Search index for fast substring matching.
//!
//! An inverted n-gram index over symbol names. Each node is indexed under
//! both its display name and its serialized name, so "Handler" finds
//! `ClickHandler` as well as everything inside `app.handlers`.

use std::collections::{HashMap, HashSet};
use strata_core::NodeId;

/// Minimum n-gram length for indexing.
const MIN_NGRAM_LEN: usize = 2;

/// Maximum n-gram length for indexing.
const MAX_NGRAM_LEN: usize = 4;

/// An inverted index for substring search.
///
/// Query n-grams are looked up and intersected; the survivors are checked
/// against their full names to drop false positives.
#[derive(Debug, Default, Clone)]
pub struct SearchIndex {
    /// Lowercased names per node, for verification and prefix matching.
    names: HashMap<NodeId, Vec<String>>,
    /// Maps lowercased n-grams to NodeIds.
    ngram_index: HashMap<String, HashSet<NodeId>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a name into the index.
    pub fn insert(&mut self, name: &str, id: NodeId) {
        let lower = name.to_lowercase();
        for ngram in generate_ngrams(&lower) {
            self.ngram_index.entry(ngram).or_default().insert(id);
        }
        let names = self.names.entry(id).or_default();
        if !names.contains(&lower) {
            names.push(lower);
        }
    }

    /// Finds nodes with a name containing `query`, case-insensitively.
    ///
    /// Returns matching NodeIds sorted ascending.
    pub fn search(&self, query: &str) -> Vec<NodeId> {
        let query_lower = query.to_lowercase();
        if query_lower.is_empty() {
            return Vec::new();
        }

        // Too short for an n-gram: prefix match instead.
        if query_lower.chars().count() < MIN_NGRAM_LEN {
            let mut results: Vec<NodeId> = self
                .names
                .iter()
                .filter(|(_, names)| names.iter().any(|n| n.starts_with(&query_lower)))
                .map(|(id, _)| *id)
                .collect();
            results.sort();
            return results;
        }

        let mut candidates: Option<HashSet<NodeId>> = None;
        for ngram in generate_ngrams(&query_lower) {
            let Some(ids) = self.ngram_index.get(&ngram) else {
                return Vec::new();
            };
            match &mut candidates {
                None => candidates = Some(ids.clone()),
                Some(c) => c.retain(|id| ids.contains(id)),
            }
        }

        let mut results: Vec<NodeId> = candidates
            .unwrap_or_default()
            .into_iter()
            .filter(|id| {
                self.names
                    .get(id)
                    .is_some_and(|names| names.iter().any(|n| n.contains(&query_lower)))
            })
            .collect();

        results.sort();
        results
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn generate_ngrams(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut ngrams = Vec::new();

    for n in MIN_NGRAM_LEN..=MAX_NGRAM_LEN {
        if chars.len() >= n {
            for i in 0..=(chars.len() - n) {
                ngrams.push(chars[i..i + n].iter().collect());
            }
        }
    }

    ngrams
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn test_search_substring() {
        let mut index = SearchIndex::new();
        index.insert("validate_user", id(0));
        index.insert("validate_email", id(1));
        index.insert("send_email", id(2));

        assert_eq!(index.search("validate"), vec![id(0), id(1)]);
        assert_eq!(index.search("_user"), vec![id(0)]);
    }

    #[test]
    fn test_search_case_insensitive() {
        let mut index = SearchIndex::new();
        index.insert("ValidateUser", id(0));

        assert_eq!(index.search("validateuser"), vec![id(0)]);
        assert_eq!(index.search("VALIDATEUSER"), vec![id(0)]);
    }

    #[test]
    fn test_either_name_matches() {
        let mut index = SearchIndex::new();
        index.insert("dispatch", id(3));
        index.insert("app.handlers.dispatch", id(3));

        assert_eq!(index.search("handlers"), vec![id(3)]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_ngram_false_positive_is_dropped() {
        let mut index = SearchIndex::new();
        // Holds every n-gram of "abcda" without containing it.
        index.insert("abcdxbcda", id(0));
        assert!(index.search("abcda").is_empty());
        assert_eq!(index.search("xbcd"), vec![id(0)]);
    }

    #[test]
    fn test_short_query_uses_prefix() {
        let mut index = SearchIndex::new();
        index.insert("ab", id(0));
        index.insert("abc", id(1));
        index.insert("xab", id(2));

        assert_eq!(index.search("a"), vec![id(0), id(1)]);
    }

    #[test]
    fn test_no_match_and_empty_query() {
        let mut index = SearchIndex::new();
        index.insert("hello", id(0));

        assert!(index.search("world").is_empty());
        assert!(index.search("").is_empty());
    }
}
