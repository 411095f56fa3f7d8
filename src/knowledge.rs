//! The knowledge base: rules plus every named collection templates address.
//!
//! ```text
//! KnowledgeBase
//!   ├─ RuleIndex          ordered rules + composite-key map
//!   ├─ sets / topics      drive <set>/<topic> pattern markers
//!   ├─ maps / lists / arrays
//!   ├─ variables          Global scope tier
//!   ├─ properties         read-only at runtime (<bot/>, <bot name="x"/> markers)
//!   └─ substitutions      named tables: normal, person, person2, gender, denormal
//! ```
//!
//! The engine shares one knowledge base between sessions as
//! [`SharedKnowledge`]. All mutation goes through `&mut self` methods here,
//! so holding the write lock for a single call keeps the rule list and the
//! key map consistent.
//!
//! ## Invariants
//!
//! - Collection names and map keys are stored lowercased.
//! - `revision` increases on every mutation; `set_revision` only when
//!   Sets, Topics or Properties change (the inputs of pattern compilation).
//! - A rule that fails validation is never inserted.

use crate::engine::{PatternContext, RuleEntry, RuleIndex, validate_pattern};
use crate::normalize::normalize;
use crate::{EngineError, Rule, template};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Knowledge base handle shared by an engine and every evaluation it runs.
pub type SharedKnowledge = Arc<RwLock<KnowledgeBase>>;

/// Ordered `(pattern, replacement)` pairs.
pub type SubstitutionTable = Vec<(String, String)>;

/// Serializable description of a knowledge base, as produced by loaders.
///
/// Every field is optional in the JSON form:
///
/// ```json
/// {
///   "rules": [{ "pattern": "HELLO", "template": "Hi!" }],
///   "sets": { "color": ["red", "blue"] },
///   "properties": { "name": "Quill" },
///   "substitutions": { "normal": [["u", "you"]] }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSource {
    pub rules: Vec<Rule>,
    pub sets: BTreeMap<String, Vec<String>>,
    pub topics: BTreeMap<String, Vec<String>>,
    pub maps: BTreeMap<String, BTreeMap<String, String>>,
    pub lists: BTreeMap<String, Vec<String>>,
    pub arrays: BTreeMap<String, Vec<String>>,
    pub variables: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
    pub substitutions: BTreeMap<String, SubstitutionTable>,
}

impl KnowledgeSource {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Structural limits applied to every inserted rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleLimits {
    pub max_wildcards: usize,
    pub max_nesting: usize,
}

impl Default for RuleLimits {
    fn default() -> Self {
        let config = crate::Config::default();
        RuleLimits { max_wildcards: config.max_wildcards, max_nesting: config.max_nesting }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    index: RuleIndex,
    sets: BTreeMap<String, Vec<String>>,
    topics: BTreeMap<String, Vec<String>>,
    maps: BTreeMap<String, BTreeMap<String, String>>,
    lists: BTreeMap<String, Vec<String>>,
    arrays: BTreeMap<String, Vec<String>>,
    variables: BTreeMap<String, String>,
    properties: BTreeMap<String, String>,
    substitutions: BTreeMap<String, SubstitutionTable>,
    limits: RuleLimits,
    revision: u64,
    set_revision: u64,
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a knowledge base from a loader source, returning the rules that
    /// were rejected alongside it.
    pub fn from_source(source: KnowledgeSource) -> (Self, Vec<EngineError>) {
        let mut kb = KnowledgeBase::new();
        let errors = kb.extend_from(source);
        (kb, errors)
    }

    pub fn shared(self) -> SharedKnowledge {
        Arc::new(RwLock::new(self))
    }

    pub fn limits(&self) -> RuleLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: RuleLimits) {
        self.limits = limits;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_revision(&self) -> u64 {
        self.set_revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn touch_sets(&mut self) {
        self.revision += 1;
        self.set_revision += 1;
    }

    // --- Rules --------------------------------------------------------------

    /// Check a rule's pattern, that, topic and template without inserting it.
    pub fn validate_rule(&self, rule: &Rule) -> Result<(), EngineError> {
        validate_pattern(&rule.pattern, self.limits.max_wildcards)?;
        for side in [rule.that.as_deref(), rule.topic.as_deref()].into_iter().flatten() {
            if !side.trim().is_empty() {
                validate_pattern(side, self.limits.max_wildcards)?;
            }
        }
        template::parse(&rule.template, self.limits.max_nesting)
            .map_err(|err| EngineError::malformed(&rule.pattern, err.to_string()))?;
        Ok(())
    }

    /// Validate and append `rule`; it becomes the exact-lookup target for its key.
    pub fn add_rule(&mut self, rule: Rule) -> Result<Arc<RuleEntry>, EngineError> {
        self.validate_rule(&rule)?;
        self.touch();
        Ok(self.index.insert(rule))
    }

    /// Remove the most recent rule with the same identity as `rule`.
    pub fn remove_rule(&mut self, rule: &Rule) -> Option<Arc<RuleEntry>> {
        self.remove_key(&rule.key())
    }

    pub fn remove_key(&mut self, key: &str) -> Option<Arc<RuleEntry>> {
        let removed = self.index.remove(key)?;
        self.touch();
        Some(removed)
    }

    pub fn rule(&self, key: &str) -> Option<&Arc<RuleEntry>> {
        self.index.get(key)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<RuleEntry>> {
        self.index.iter()
    }

    pub fn rule_count(&self) -> usize {
        self.index.len()
    }

    /// The exact key set of the index.
    pub fn keys(&self) -> BTreeSet<String> {
        self.index.keys()
    }

    pub(crate) fn index(&self) -> &RuleIndex {
        &self.index
    }

    // --- Sets and topics ----------------------------------------------------

    /// Replace a set; members are deduplicated case-insensitively, first kept.
    pub fn define_set<I, S>(&mut self, name: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.sets.entry(key(name)).or_default();
        set.clear();
        for member in members {
            push_unique(set, member.into());
        }
        self.touch_sets();
    }

    pub fn set(&self, name: &str) -> Option<&[String]> {
        self.sets.get(&key(name)).map(Vec::as_slice)
    }

    /// Mutable access to a set, creating it when missing.
    ///
    /// Callers are responsible for keeping members unique; see
    /// [`KnowledgeBase::add_to_set`].
    pub fn set_mut(&mut self, name: &str) -> &mut Vec<String> {
        self.touch_sets();
        self.sets.entry(key(name)).or_default()
    }

    /// Add `member` unless an equal member (after normalization) exists.
    pub fn add_to_set(&mut self, name: &str, member: &str) -> bool {
        if self.set_contains(name, member) {
            return false;
        }
        self.set_mut(name).push(member.to_string());
        true
    }

    pub fn set_contains(&self, name: &str, member: &str) -> bool {
        let wanted = normalize(member);
        self.set(name).is_some_and(|set| set.iter().any(|m| normalize(m) == wanted))
    }

    pub fn set_names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn define_topic<I, S>(&mut self, name: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.insert(key(name), members.into_iter().map(Into::into).collect());
        self.touch_sets();
    }

    pub fn topic(&self, name: &str) -> Option<&[String]> {
        self.topics.get(&key(name)).map(Vec::as_slice)
    }

    // --- Maps, lists, arrays ------------------------------------------------

    pub fn map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.maps.get(&key(name))
    }

    pub fn map_get(&self, name: &str, entry: &str) -> Option<&str> {
        self.map(name)?.get(&key(entry)).map(String::as_str)
    }

    pub fn map_insert(&mut self, name: &str, entry: &str, value: impl Into<String>) -> Option<String> {
        self.touch();
        self.maps.entry(key(name)).or_default().insert(key(entry), value.into())
    }

    pub fn map_remove(&mut self, name: &str, entry: &str) -> Option<String> {
        let removed = self.maps.get_mut(&key(name))?.remove(&key(entry))?;
        self.touch();
        Some(removed)
    }

    pub fn clear_map(&mut self, name: &str) {
        self.touch();
        self.maps.entry(key(name)).or_default().clear();
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        self.lists.get(&key(name)).map(Vec::as_slice)
    }

    pub fn list_mut(&mut self, name: &str) -> &mut Vec<String> {
        self.touch();
        self.lists.entry(key(name)).or_default()
    }

    pub fn array(&self, name: &str) -> Option<&[String]> {
        self.arrays.get(&key(name)).map(Vec::as_slice)
    }

    pub fn array_mut(&mut self, name: &str) -> &mut Vec<String> {
        self.touch();
        self.arrays.entry(key(name)).or_default()
    }

    // --- Variables and properties -------------------------------------------

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(&key(name)).map(String::as_str)
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) {
        self.touch();
        self.variables.insert(key(name), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(&key(name)).map(String::as_str)
    }

    /// Load-time only: templates cannot write properties.
    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties.insert(key(name), value.into());
        self.touch_sets();
    }

    // --- Substitutions ------------------------------------------------------

    pub fn substitutions(&self, table: &str) -> Option<&[(String, String)]> {
        self.substitutions.get(&key(table)).map(Vec::as_slice)
    }

    pub fn add_substitution(&mut self, table: &str, pattern: impl Into<String>, replacement: impl Into<String>) {
        self.touch();
        self.substitutions.entry(key(table)).or_default().push((pattern.into(), replacement.into()));
    }

    // --- Bulk operations ----------------------------------------------------

    /// Fold a loader source in, returning the errors of rejected rules.
    ///
    /// Uses the same rules as [`KnowledgeBase::merge`]: scalars override,
    /// collections concatenate (Sets without duplicates), rules are appended.
    pub fn extend_from(&mut self, source: KnowledgeSource) -> Vec<EngineError> {
        for (name, members) in source.sets {
            let set = self.sets.entry(key(&name)).or_default();
            for member in members {
                push_unique(set, member);
            }
        }
        for (name, members) in source.topics {
            self.topics.entry(key(&name)).or_default().extend(members);
        }
        for (name, entries) in source.maps {
            let map = self.maps.entry(key(&name)).or_default();
            map.extend(entries.into_iter().map(|(k, v)| (key(&k), v)));
        }
        for (name, items) in source.lists {
            self.lists.entry(key(&name)).or_default().extend(items);
        }
        for (name, items) in source.arrays {
            self.arrays.entry(key(&name)).or_default().extend(items);
        }
        self.variables.extend(source.variables.into_iter().map(|(k, v)| (key(&k), v)));
        self.properties.extend(source.properties.into_iter().map(|(k, v)| (key(&k), v)));
        for (name, pairs) in source.substitutions {
            self.substitutions.entry(key(&name)).or_default().extend(pairs);
        }
        self.touch_sets();

        let mut errors = Vec::new();
        for rule in source.rules {
            if let Err(err) = self.add_rule(rule) {
                tracing::warn!(%err, "rule rejected at load time");
                errors.push(err);
            }
        }
        errors
    }

    /// Merge another knowledge base into this one.
    pub fn merge(&mut self, other: KnowledgeBase) -> Vec<EngineError> {
        let KnowledgeBase { index, sets, topics, maps, lists, arrays, variables, properties, substitutions, .. } = other;
        let rules = index.iter().map(|entry| entry.rule.clone()).collect();
        self.extend_from(KnowledgeSource {
            rules,
            sets,
            topics,
            maps,
            lists,
            arrays,
            variables,
            properties,
            substitutions,
        })
    }
}

fn push_unique(set: &mut Vec<String>, member: String) {
    let wanted = normalize(&member);
    if !wanted.is_empty() && !set.iter().any(|m| normalize(m) == wanted) {
        set.push(member);
    }
}

impl PatternContext for KnowledgeBase {
    fn set_members(&self, name: &str) -> Option<&[String]> {
        self.set(name)
    }

    fn topic_members(&self, name: &str) -> Option<&[String]> {
        self.topic(name)
    }

    fn property(&self, name: &str) -> Option<&str> {
        KnowledgeBase::property(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_rules_are_never_inserted() {
        let mut kb = KnowledgeBase::new();
        kb.add_rule(Rule::new("HELLO", "Hi!")).unwrap();
        let before = kb.keys();

        for bad in [
            Rule::new("HELLO (A|)", "x"),
            Rule::new("", "x"),
            Rule::new("HI", "<think>unclosed"),
            Rule::new("HI", "ok").with_that("(BROKEN"),
        ] {
            assert!(matches!(kb.add_rule(bad), Err(EngineError::MalformedRule { .. })));
        }
        assert_eq!(kb.keys(), before);
        assert_eq!(kb.rule_count(), 1);
    }

    #[test]
    fn sets_dedup_case_insensitively() {
        let mut kb = KnowledgeBase::new();
        kb.define_set("Colors", ["red", "Red", "blue"]);
        assert_eq!(kb.set("colors").unwrap(), &["red".to_string(), "blue".to_string()]);
        assert!(kb.set_contains("COLORS", "BLUE"));
        assert!(!kb.add_to_set("colors", "RED"));
        assert!(kb.add_to_set("colors", "green"));
        assert_eq!(kb.set("colors").unwrap().len(), 3);
    }

    #[test]
    fn revisions_track_compilation_inputs() {
        let mut kb = KnowledgeBase::new();
        let (rev, set_rev) = (kb.revision(), kb.set_revision());
        kb.set_variable("x", "1");
        assert!(kb.revision() > rev);
        assert_eq!(kb.set_revision(), set_rev);
        kb.define_set("a", ["b"]);
        assert!(kb.set_revision() > set_rev);
    }

    #[test]
    fn merge_overrides_scalars_and_concatenates_collections() {
        let mut base = KnowledgeBase::new();
        base.define_set("color", ["red"]);
        base.set_property("name", "Quill");
        base.list_mut("todo").push("write".into());
        base.add_rule(Rule::new("A", "first")).unwrap();

        let mut other = KnowledgeBase::new();
        other.define_set("color", ["RED", "green"]);
        other.set_property("name", "Ink");
        other.list_mut("todo").push("test".into());
        other.add_rule(Rule::new("B", "second")).unwrap();

        assert!(base.merge(other).is_empty());
        assert_eq!(base.set("color").unwrap(), &["red".to_string(), "green".to_string()]);
        assert_eq!(base.property("name"), Some("Ink"));
        assert_eq!(base.list("todo").unwrap(), &["write".to_string(), "test".to_string()]);
        let order: Vec<&str> = base.rules().map(|e| e.pattern.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn source_from_json_reports_bad_rules() {
        let source = KnowledgeSource::from_json(
            r#"{
                "rules": [
                    { "pattern": "HELLO", "template": "Hi!" },
                    { "pattern": "HI (X|)", "template": "never" }
                ],
                "maps": { "Capital": { "France": "Paris" } },
                "substitutions": { "normal": [["u", "you"]] }
            }"#,
        )
        .unwrap();
        let (kb, errors) = KnowledgeBase::from_source(source);
        assert_eq!(errors.len(), 1);
        assert_eq!(kb.rule_count(), 1);
        assert_eq!(kb.map_get("capital", "FRANCE"), Some("Paris"));
        assert_eq!(kb.substitutions("NORMAL").unwrap().len(), 1);
    }
}
