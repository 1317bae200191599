//! Redirect index - which rules apply to a message.
//!
//! The [`RedirectIndex`] is built once from a validated rule set and answers
//! one question: given the channel a message arrived on, which rules fire,
//! and in what order?
//!
//! # Matching
//!
//! ```text
//! Message (channel: "C1")
//!     │
//!     ▼
//! ┌──────────────────────────────────────────┐
//! │              REDIRECT INDEX              │
//! │                                          │
//! │  rule #0  sources [C1, C5]   ✔ match     │
//! │  rule #1  sources [C2]       ✘           │
//! │  rule #2  sources [C1]       ✔ match     │
//! └──────────────────────────────────────────┘
//!     │
//!     ▼
//! [rule #0, rule #2]   (configuration order)
//! ```
//!
//! Rule counts are small, so matching is a linear scan. Order is what
//! matters: it decides delivery order when several rules share a source.

use crate::redirect::RedirectRule;
use std::collections::HashSet;
use tracing::debug;

/// Read-only lookup from source channel to the rules it triggers.
#[derive(Debug, Clone, Default)]
pub struct RedirectIndex {
    rules: Vec<RedirectRule>,

    /// Every channel that is a source of some rule, for a quick reject
    sources: HashSet<String>,
}

impl RedirectIndex {
    pub fn new(rules: Vec<RedirectRule>) -> Self {
        let sources = rules
            .iter()
            .flat_map(|r| r.sources().iter().cloned())
            .collect();

        debug!(rules = rules.len(), "Built redirect index");

        Self { rules, sources }
    }

    /// Rules whose sources contain `channel_id`, in configuration order.
    pub fn matching_rules<'a>(
        &'a self,
        channel_id: &'a str,
    ) -> impl Iterator<Item = (usize, &'a RedirectRule)> + 'a {
        let candidate = self.sources.contains(channel_id);
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, rule)| candidate && rule.has_source(channel_id))
    }

    /// Whether any rule uses `channel_id` as a source.
    pub fn is_source(&self, channel_id: &str) -> bool {
        self.sources.contains(channel_id)
    }

    pub fn rules(&self) -> &[RedirectRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of distinct source channels being watched.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::RedirectOptions;

    fn rule(sources: &[&str], destinations: &[&str]) -> RedirectRule {
        RedirectRule::new(
            sources.iter().map(|s| s.to_string()).collect(),
            destinations.iter().map(|s| s.to_string()).collect(),
            RedirectOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_matching_preserves_config_order() {
        let index = RedirectIndex::new(vec![
            rule(&["C1", "C5"], &["D1"]),
            rule(&["C2"], &["D2"]),
            rule(&["C1"], &["D3"]),
        ]);

        let matched: Vec<usize> = index.matching_rules("C1").map(|(i, _)| i).collect();
        assert_eq!(matched, vec![0, 2]);

        let destinations: Vec<&str> = index
            .matching_rules("C1")
            .flat_map(|(_, r)| r.destinations().iter().map(String::as_str))
            .collect();
        assert_eq!(destinations, vec!["D1", "D3"]);
    }

    #[test]
    fn test_no_match_for_unknown_channel() {
        let index = RedirectIndex::new(vec![rule(&["C1"], &["C2"])]);

        assert_eq!(index.matching_rules("C9").count(), 0);
        assert!(!index.is_source("C9"));
        // destinations are not sources
        assert_eq!(index.matching_rules("C2").count(), 0);
    }

    #[test]
    fn test_index_counts() {
        let index = RedirectIndex::new(vec![rule(&["C1", "C2"], &["D"]), rule(&["C2"], &["E"])]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.source_count(), 2);
        assert!(!index.is_empty());
        assert!(RedirectIndex::default().is_empty());
    }
}
