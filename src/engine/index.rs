//! Rule index: the ordered rule list plus a composite-key fast path.
//!
//! The ordered `entries` vector is the source of truth: full scans iterate
//! it (its order breaks priority ties) and removals edit it. `by_key` is a
//! fast path for exact lookups where the last write for a key wins.
//!
//! ## Invariants
//!
//! - Every key in `by_key` points at the *last* entry in `entries` carrying
//!   that key, and every entry's key is present in `by_key`.
//! - Both structures are only edited together, inside `&mut self` methods,
//!   so a caller holding the knowledge-base write lock never observes one
//!   without the other.

use super::compiler::{self, PatternToken};
use crate::normalize::normalize_pattern;
use crate::Rule;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub const THAT_SEPARATOR: &str = "|THAT:";
pub const THAT_INDEX_SEPARATOR: &str = "|THATINDEX:";
pub const TOPIC_SEPARATOR: &str = "|TOPIC:";

/// Pattern of the designated fallback rule.
pub const DEFAULT_PATTERN: &str = "DEFAULT";

/// Derive the composite key from already-normalized parts.
///
/// ```text
/// pattern [ |THAT:that [ |THATINDEX:n ] ] [ |TOPIC:topic ]
/// ```
pub fn derive_key(pattern: &str, that: Option<&str>, that_index: usize, topic: Option<&str>) -> String {
    let mut key = pattern.to_string();
    if let Some(that) = that.filter(|t| !t.is_empty()) {
        key.push_str(THAT_SEPARATOR);
        key.push_str(that);
        if that_index != 0 {
            key.push_str(THAT_INDEX_SEPARATOR);
            key.push_str(&that_index.to_string());
        }
    }
    if let Some(topic) = topic.filter(|t| !t.is_empty()) {
        key.push_str(TOPIC_SEPARATOR);
        key.push_str(topic);
    }
    key
}

/// Normalized optional rule-side text (`that`, `topic`); blank becomes `None`.
pub fn normalize_optional(text: Option<&str>) -> Option<String> {
    text.map(normalize_pattern).filter(|t| !t.is_empty())
}

/// A rule plus everything derived from it at insertion time.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub id: u64,
    pub rule: Rule,
    pub key: String,
    pub pattern: String,
    pub that: Option<String>,
    pub topic: Option<String>,
    /// Literal text of a wildcard-free pattern (`$` dropped).
    pub literal: Option<String>,
    /// Whether the pattern carries a `$` token.
    pub has_exact_token: bool,
    /// The that-pattern has no wildcards or markers.
    pub that_is_literal: bool,
    /// Words any matching input must contain.
    pub anchors: Vec<String>,
}

impl RuleEntry {
    fn new(id: u64, rule: Rule) -> Self {
        let pattern = normalize_pattern(&rule.pattern);
        let that = normalize_optional(rule.that.as_deref());
        let topic = normalize_optional(rule.topic.as_deref());
        let key = derive_key(&pattern, that.as_deref(), rule.that_index, topic.as_deref());

        let tokens = compiler::tokenize(&pattern).unwrap_or_default();
        let literal = compiler::literal_text(&tokens);
        let has_exact_token = tokens.iter().any(|t| matches!(t, PatternToken::Exact(_)));
        let anchors = compiler::anchor_words(&tokens);
        let that_is_literal = that
            .as_deref()
            .and_then(|t| compiler::tokenize(t).ok())
            .is_some_and(|tokens| compiler::literal_text(&tokens).is_some());

        RuleEntry { id, rule, key, pattern, that, topic, literal, has_exact_token, that_is_literal, anchors }
    }

    pub fn is_default(&self) -> bool {
        self.pattern == DEFAULT_PATTERN
    }
}

/// Identity key of `rule` without inserting it.
pub fn key_of(rule: &Rule) -> String {
    let pattern = normalize_pattern(&rule.pattern);
    let that = normalize_optional(rule.that.as_deref());
    let topic = normalize_optional(rule.topic.as_deref());
    derive_key(&pattern, that.as_deref(), rule.that_index, topic.as_deref())
}

#[derive(Debug, Default, Clone)]
pub struct RuleIndex {
    entries: Vec<Arc<RuleEntry>>,
    by_key: HashMap<String, Arc<RuleEntry>>,
    next_id: u64,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rule` and point its key at it.
    pub fn insert(&mut self, rule: Rule) -> Arc<RuleEntry> {
        let entry = Arc::new(RuleEntry::new(self.next_id, rule));
        self.next_id += 1;
        self.by_key.insert(entry.key.clone(), Arc::clone(&entry));
        self.entries.push(Arc::clone(&entry));
        entry
    }

    /// Remove the most recently inserted entry carrying `key`.
    ///
    /// An earlier entry with the same key (if any) becomes the exact-lookup
    /// target again, so insert-then-remove leaves the index as it was.
    pub fn remove(&mut self, key: &str) -> Option<Arc<RuleEntry>> {
        let pos = self.entries.iter().rposition(|e| e.key == key)?;
        let removed = self.entries.remove(pos);
        match self.entries.iter().rev().find(|e| e.key == key) {
            Some(previous) => {
                self.by_key.insert(key.to_string(), Arc::clone(previous));
            }
            None => {
                self.by_key.remove(key);
            }
        }
        Some(removed)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<RuleEntry>> {
        self.by_key.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RuleEntry>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.by_key.keys().cloned().collect()
    }
}
