//! Priority-ordered rule resolution.
//!
//! ```text
//! input ─ normalize ─┬─ 1. literal scan     `$` rules equal to the input
//!                    ├─ 2. exact lookup     composite keys, wildcard-free rules
//!                    ├─ 3. full scan        anchors ▸ topic gate ▸ that gate ▸ regex
//!                    │      └─ stable sort by score, take the top
//!                    ├─ 4. re-capture       case-preserved input, merge that/topic stars
//!                    └─ 5. DEFAULT rules    same gates, best score
//! ```
//!
//! Stages 1 and 2 short-circuit. The matcher works on a borrowed
//! [`KnowledgeBase`]; callers hold the read lock for the duration of one
//! [`Matcher::find`] and release it before evaluating the winning template.
//!
//! ## That-index compatibility
//!
//! | requested | rule | compares against    |
//! |-----------|------|---------------------|
//! | 0         | 0    | most recent that    |
//! | 0         | n    | n-th most recent    |
//! | r         | 0    | r-th most recent    |
//! | r         | r    | r-th most recent    |
//! | r         | n≠r  | ineligible          |

use super::cache::Caches;
use super::compiler::{
    CompiledPattern, THAT_BONUS, THAT_EXACT_BONUS, THAT_INDEX_BONUS, TOPIC_BONUS,
};
use super::index::{RuleEntry, derive_key};
use super::metrics::{Candidate, MatchMetrics, MatchRun, StageMetrics};
use crate::knowledge::KnowledgeBase;
use crate::normalize::{normalize, normalize_preserving_case};
use crate::services::FuzzyScorer;
use crate::Bindings;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// What to match, and in which conversational context.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'q> {
    pub input: &'q str,
    pub topic: Option<&'q str>,
    /// Normalized prior bot utterances, most recent first.
    pub that_history: &'q [String],
    /// 0 = most recent.
    pub that_index: usize,
}

impl<'q> MatchQuery<'q> {
    pub fn new(input: &'q str) -> Self {
        MatchQuery { input, topic: None, that_history: &[], that_index: 0 }
    }

    pub fn with_topic(mut self, topic: Option<&'q str>) -> Self {
        self.topic = topic;
        self
    }

    pub fn with_that(mut self, that_history: &'q [String]) -> Self {
        self.that_history = that_history;
        self
    }

    pub fn with_that_index(mut self, index: usize) -> Self {
        self.that_index = index;
        self
    }
}

/// Stage of the matcher that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStage {
    Literal,
    Exact,
    Scan,
    Default,
}

#[derive(Debug, Clone)]
pub struct Match {
    pub entry: Arc<RuleEntry>,
    pub bindings: Bindings,
    pub score: i64,
    pub stage: MatchStage,
}

/// History slot a rule's that-pattern reads, or `None` when ineligible.
pub fn that_slot(requested: usize, rule: usize) -> Option<usize> {
    match (requested, rule) {
        (0, 0) => Some(0),
        (0, n) => Some(n - 1),
        (r, 0) => Some(r - 1),
        (r, n) if r == n => Some(r - 1),
        _ => None,
    }
}

pub struct Matcher<'e> {
    caches: &'e Caches,
    fuzzy: Option<&'e dyn FuzzyScorer>,
    fuzzy_threshold: f32,
}

/// Everything a rule's context gates produced.
struct Gated {
    bonus: i64,
    bindings: Bindings,
}

struct Normalized<'q> {
    query: MatchQuery<'q>,
    text: String,
    preserved: String,
    topic: String,
    words: HashSet<String>,
}

impl<'e> Matcher<'e> {
    pub fn new(caches: &'e Caches) -> Self {
        Matcher { caches, fuzzy: None, fuzzy_threshold: 1.0 }
    }

    pub fn with_fuzzy(mut self, scorer: Option<&'e dyn FuzzyScorer>, threshold: f32) -> Self {
        self.fuzzy = scorer;
        self.fuzzy_threshold = threshold;
        self
    }

    /// Best rule for `query`, or `None` (NotFound).
    pub fn find(&self, kb: &KnowledgeBase, query: MatchQuery<'_>) -> Option<Match> {
        self.find_with_metrics(kb, query).found
    }

    pub fn find_with_metrics(&self, kb: &KnowledgeBase, query: MatchQuery<'_>) -> MatchRun {
        let start = Instant::now();
        let mut metrics = MatchMetrics::default();
        let text = normalize(query.input);
        let q = Normalized {
            query,
            preserved: normalize_preserving_case(query.input),
            topic: query.topic.map(normalize).unwrap_or_default(),
            words: text.split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect(),
            text,
        };

        let found = self
            .literal_stage(kb, &q, &mut metrics.literal)
            .or_else(|| self.exact_stage(kb, &q, &mut metrics.exact))
            .or_else(|| self.scan_stage(kb, &q, &mut metrics.scan, &mut metrics.candidates))
            .or_else(|| self.default_stage(kb, &q, &mut metrics.default));

        metrics.total = start.elapsed();
        match &found {
            Some(m) => tracing::debug!(input = %q.text, key = %m.entry.key, score = m.score, stage = ?m.stage, "matched"),
            None => tracing::debug!(input = %q.text, "no rule matched"),
        }
        MatchRun { found, metrics }
    }

    fn literal_stage(&self, kb: &KnowledgeBase, q: &Normalized<'_>, stage: &mut StageMetrics) -> Option<Match> {
        let start = Instant::now();
        stage.ran = true;
        let mut best: Option<Match> = None;
        for entry in kb.index().iter().filter(|e| e.has_exact_token) {
            stage.considered += 1;
            if entry.literal.as_deref() != Some(q.text.as_str()) {
                continue;
            }
            let Some(gated) = self.gate(kb, entry, q) else {
                stage.gated += 1;
                continue;
            };
            let Some(compiled) = self.compiled(kb, &entry.pattern) else { continue };
            stage.matched += 1;
            let score = compiled.base_score() + gated.bonus;
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(Match { entry: Arc::clone(entry), bindings: gated.bindings, score, stage: MatchStage::Literal });
            }
        }
        stage.duration = start.elapsed();
        best
    }

    fn exact_stage(&self, kb: &KnowledgeBase, q: &Normalized<'_>, stage: &mut StageMetrics) -> Option<Match> {
        let start = Instant::now();
        stage.ran = true;
        let requested = q.query.that_index;
        let slot = requested.saturating_sub(1);
        let that = q.query.that_history.get(slot).map(String::as_str).filter(|t| !t.is_empty());
        let topic = (!q.topic.is_empty()).then_some(q.topic.as_str());

        let mut keys = Vec::with_capacity(4);
        if let Some(that) = that {
            if let Some(topic) = topic {
                keys.push(derive_key(&q.text, Some(that), requested, Some(topic)));
            }
            keys.push(derive_key(&q.text, Some(that), requested, None));
        }
        if let Some(topic) = topic {
            keys.push(derive_key(&q.text, None, 0, Some(topic)));
        }
        keys.push(derive_key(&q.text, None, 0, None));

        let mut found = None;
        for key in keys {
            stage.considered += 1;
            let Some(entry) = kb.rule(&key) else { continue };
            if entry.literal.is_none() {
                continue;
            }
            let Some(compiled) = self.compiled(kb, &entry.pattern) else { continue };
            let Some(gated) = self.gate(kb, entry, q) else {
                stage.gated += 1;
                continue;
            };
            if self.outranked(kb, entry, gated.bonus, q) {
                // A same-pattern rule with wildcard context scores higher; the scan decides.
                break;
            }
            stage.matched += 1;
            let score = compiled.base_score() + gated.bonus;
            found = Some(Match { entry: Arc::clone(entry), bindings: gated.bindings, score, stage: MatchStage::Exact });
            break;
        }
        stage.duration = start.elapsed();
        found
    }

    fn scan_stage(
        &self,
        kb: &KnowledgeBase,
        q: &Normalized<'_>,
        stage: &mut StageMetrics,
        candidates: &mut Vec<Candidate>,
    ) -> Option<Match> {
        let start = Instant::now();
        stage.ran = true;
        let set_revision = kb.set_revision();
        let mut scored: Vec<(i64, &Arc<RuleEntry>, Arc<CompiledPattern>, Gated)> = Vec::new();

        for entry in kb.index().iter() {
            stage.considered += 1;
            if !entry.anchors.iter().all(|w| q.words.contains(w)) {
                stage.gated += 1;
                continue;
            }
            let Some(gated) = self.gate(kb, entry, q) else {
                stage.gated += 1;
                continue;
            };
            let Some(compiled) = self.compiled(kb, &entry.pattern) else { continue };
            if self.caches.captures(&compiled, &q.text, set_revision).is_none() {
                continue;
            }
            stage.matched += 1;
            scored.push((compiled.base_score() + gated.bonus, entry, compiled, gated));
        }

        // Stable: equal scores keep rule order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.extend(scored.iter().map(|(score, entry, _, _)| Candidate { key: entry.key.clone(), score: *score }));

        let found = scored.into_iter().next().map(|(score, entry, compiled, gated)| {
            let captures = compiled
                .captures(&q.preserved)
                .or_else(|| compiled.captures(&q.text))
                .unwrap_or_default();
            let mut bindings = Bindings::from_captures(Bindings::STAR, captures);
            bindings.merge_missing(gated.bindings);
            Match { entry: Arc::clone(entry), bindings, score, stage: MatchStage::Scan }
        });
        stage.duration = start.elapsed();
        found
    }

    fn default_stage(&self, kb: &KnowledgeBase, q: &Normalized<'_>, stage: &mut StageMetrics) -> Option<Match> {
        let start = Instant::now();
        stage.ran = true;
        let mut best: Option<Match> = None;
        for entry in kb.index().iter().filter(|e| e.is_default()) {
            stage.considered += 1;
            let Some(gated) = self.gate(kb, entry, q) else {
                stage.gated += 1;
                continue;
            };
            let Some(compiled) = self.compiled(kb, &entry.pattern) else { continue };
            stage.matched += 1;
            let score = compiled.base_score() + gated.bonus;
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(Match { entry: Arc::clone(entry), bindings: gated.bindings, score, stage: MatchStage::Default });
            }
        }
        stage.duration = start.elapsed();
        best
    }

    fn compiled(&self, kb: &KnowledgeBase, pattern: &str) -> Option<Arc<CompiledPattern>> {
        match self.caches.pattern(pattern, kb) {
            Ok(compiled) => Some(compiled),
            Err(err) => {
                tracing::warn!(%err, "pattern failed to compile; rule skipped");
                None
            }
        }
    }

    /// Whether another rule with the pattern of `entry` passes its context
    /// gates with a larger bonus than `bonus`.
    fn outranked(&self, kb: &KnowledgeBase, entry: &RuleEntry, bonus: i64, q: &Normalized<'_>) -> bool {
        kb.index()
            .iter()
            .filter(|e| e.id != entry.id && e.pattern == entry.pattern && (e.that.is_some() || e.topic.is_some()))
            .any(|e| self.gate(kb, e, q).is_some_and(|g| g.bonus > bonus))
    }

    /// Apply the topic and that gates of `entry`, returning the bonus and
    /// the context bindings they produced.
    fn gate(&self, kb: &KnowledgeBase, entry: &RuleEntry, q: &Normalized<'_>) -> Option<Gated> {
        let mut bonus = 0;
        let mut bindings = Bindings::new();

        if let Some(topic) = &entry.topic {
            let compiled = self.compiled(kb, topic)?;
            let captures = self.caches.captures(&compiled, &q.topic, kb.set_revision())?;
            bindings.merge_missing(Bindings::from_captures(Bindings::TOPIC_STAR, captures));
            bonus += TOPIC_BONUS;
        }

        if let Some(that) = &entry.that {
            let slot = that_slot(q.query.that_index, entry.rule.that_index)?;
            let utterance = q.query.that_history.get(slot).map(String::as_str).unwrap_or("");
            let compiled = self.compiled(kb, that)?;
            match self.caches.captures(&compiled, utterance, kb.set_revision()) {
                Some(captures) => {
                    bindings.merge_missing(Bindings::from_captures(Bindings::THAT_STAR, captures));
                }
                None => {
                    let scorer = self.fuzzy?;
                    let score = scorer.score(that, utterance);
                    if score < self.fuzzy_threshold {
                        return None;
                    }
                    tracing::debug!(that = %that, utterance, score, "fuzzy that-match");
                }
            }
            bonus += if entry.rule.that_index != 0 {
                THAT_INDEX_BONUS
            } else if entry.that_is_literal {
                THAT_EXACT_BONUS
            } else {
                THAT_BONUS
            };
        }

        Some(Gated { bonus, bindings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rule;

    fn kb(rules: Vec<Rule>) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        for rule in rules {
            kb.add_rule(rule).unwrap();
        }
        kb
    }

    fn find(kb: &KnowledgeBase, query: MatchQuery<'_>) -> Option<Match> {
        let caches = Caches::new(64);
        Matcher::new(&caches).find(kb, query)
    }

    #[test]
    fn exact_outranks_wildcard() {
        let kb = kb(vec![Rule::new("HELLO *", "wild"), Rule::new("HELLO", "exact")]);
        let m = find(&kb, MatchQuery::new("hello")).unwrap();
        assert_eq!(m.entry.rule.template, "exact");
        assert_eq!(m.stage, MatchStage::Exact);
    }

    #[test]
    fn wildcard_captures_keep_user_casing() {
        let kb = kb(vec![Rule::new("HELLO", "Hi!"), Rule::new("HELLO *", "Hi <star/>!")]);
        let m = find(&kb, MatchQuery::new("Hello Bob")).unwrap();
        assert_eq!(m.entry.rule.template, "Hi <star/>!");
        assert_eq!(m.bindings.get("star1"), Some("Bob"));
        assert_eq!(m.stage, MatchStage::Scan);
    }

    #[test]
    fn not_found_without_default() {
        let kb = kb(vec![Rule::new("HELLO *", "Hi")]);
        assert!(find(&kb, MatchQuery::new("Bob")).is_none());
    }

    #[test]
    fn default_rule_is_the_last_resort() {
        let kb = kb(vec![
            Rule::new("DEFAULT", "weather default").with_topic("WEATHER"),
            Rule::new("DEFAULT", "plain default"),
            Rule::new("HELLO *", "Hi"),
        ]);
        let m = find(&kb, MatchQuery::new("Bob")).unwrap();
        assert_eq!((m.stage, m.entry.rule.template.as_str()), (MatchStage::Default, "plain default"));
        let m = find(&kb, MatchQuery::new("Bob").with_topic(Some("weather"))).unwrap();
        assert_eq!(m.entry.rule.template, "weather default");
    }

    #[test]
    fn topic_gating() {
        let kb = kb(vec![Rule::new("WHAT IS IT LIKE *", "forecast").with_topic("WEATHER")]);
        assert!(find(&kb, MatchQuery::new("what is it like today").with_topic(Some("sports"))).is_none());
        assert!(find(&kb, MatchQuery::new("what is it like today")).is_none());
        let m = find(&kb, MatchQuery::new("what is it like today").with_topic(Some("Weather"))).unwrap();
        assert_eq!(m.entry.rule.template, "forecast");
    }

    #[test]
    fn that_context_and_bindings() {
        let kb = kb(vec![
            Rule::new("YES", "generic yes"),
            Rule::new("YES", "coffee yes").with_that("DO YOU WANT COFFEE"),
            Rule::new("SURE *", "generic sure"),
            Rule::new("SURE *", "wanted <that_star/>").with_that("DO YOU WANT *"),
        ]);
        let history = vec!["DO YOU WANT COFFEE".to_string()];
        let m = find(&kb, MatchQuery::new("yes").with_that(&history)).unwrap();
        assert_eq!((m.stage, m.entry.rule.template.as_str()), (MatchStage::Exact, "coffee yes"));

        let m = find(&kb, MatchQuery::new("sure thing").with_that(&history)).unwrap();
        assert_eq!(m.entry.rule.template, "wanted <that_star/>");
        assert_eq!(m.bindings.get("star1"), Some("thing"));
        assert_eq!(m.bindings.get("that_star1"), Some("COFFEE"));

        let other = vec!["HOW ARE YOU".to_string()];
        let m = find(&kb, MatchQuery::new("yes").with_that(&other)).unwrap();
        assert_eq!(m.entry.rule.template, "generic yes");
        let m = find(&kb, MatchQuery::new("sure thing").with_that(&other)).unwrap();
        assert_eq!(m.entry.rule.template, "generic sure");
    }

    #[test]
    fn wildcard_that_beats_a_bare_literal() {
        let kb = kb(vec![
            Rule::new("YES", "generic"),
            Rule::new("YES", "cats yes").with_that("DO YOU LIKE *"),
            Rule::new("YES", "rain yes").with_topic("WEATHER"),
        ]);
        let history = vec!["DO YOU LIKE CATS".to_string()];
        let m = find(&kb, MatchQuery::new("yes").with_that(&history)).unwrap();
        assert_eq!((m.stage, m.entry.rule.template.as_str()), (MatchStage::Scan, "cats yes"));
        assert_eq!(m.bindings.get("that_star1"), Some("CATS"));

        // The topic-only exact key loses to the wildcard-that rule too.
        let m = find(&kb, MatchQuery::new("yes").with_that(&history).with_topic(Some("weather"))).unwrap();
        assert_eq!(m.entry.rule.template, "cats yes");

        let m = find(&kb, MatchQuery::new("yes").with_topic(Some("weather"))).unwrap();
        assert_eq!((m.stage, m.entry.rule.template.as_str()), (MatchStage::Exact, "rain yes"));
        let m = find(&kb, MatchQuery::new("yes")).unwrap();
        assert_eq!((m.stage, m.entry.rule.template.as_str()), (MatchStage::Exact, "generic"));
    }

    #[test]
    fn that_index_compatibility() {
        assert_eq!(that_slot(0, 0), Some(0));
        assert_eq!(that_slot(0, 2), Some(1));
        assert_eq!(that_slot(2, 0), Some(1));
        assert_eq!(that_slot(2, 2), Some(1));
        assert_eq!(that_slot(2, 3), None);

        let kb = kb(vec![Rule::new("OK", "older").with_that("FIRST").with_that_index(2)]);
        let history = vec!["SECOND".to_string(), "FIRST".to_string()];
        let m = find(&kb, MatchQuery::new("ok").with_that(&history)).unwrap();
        assert_eq!(m.entry.rule.template, "older");
        assert!(find(&kb, MatchQuery::new("ok").with_that(&history).with_that_index(1)).is_none());
    }

    #[test]
    fn equal_scores_keep_rule_order() {
        let kb = kb(vec![Rule::new("* LIKES *", "first"), Rule::new("* LIKES *", "second")]);
        let caches = Caches::new(64);
        let run = Matcher::new(&caches).find_with_metrics(&kb, MatchQuery::new("bob likes cats"));
        assert_eq!(run.found.unwrap().entry.rule.template, "first");
        assert_eq!(run.metrics.candidates.len(), 2);
    }

    #[test]
    fn dollar_rules_win_first() {
        let kb = kb(vec![Rule::new("WHO ARE YOU", "plain"), Rule::new("$WHO ARE YOU", "dollar")]);
        let m = find(&kb, MatchQuery::new("Who are you?")).unwrap();
        assert_eq!((m.stage, m.entry.rule.template.as_str()), (MatchStage::Literal, "dollar"));
    }

    struct Lenient;

    impl FuzzyScorer for Lenient {
        fn score(&self, _: &str, utterance: &str) -> f32 {
            if utterance.starts_with("DO YOU WANNA") { 0.9 } else { 0.1 }
        }
    }

    #[test]
    fn fuzzy_scorer_rescues_near_miss_thats() {
        let kb = kb(vec![Rule::new("YES", "coffee yes").with_that("DO YOU WANT COFFEE")]);
        let history = vec!["DO YOU WANNA COFFEE".to_string()];
        let caches = Caches::new(64);
        let strict = Matcher::new(&caches);
        assert!(strict.find(&kb, MatchQuery::new("yes").with_that(&history)).is_none());
        let fuzzy = Matcher::new(&caches).with_fuzzy(Some(&Lenient as &dyn FuzzyScorer), 0.8);
        assert!(fuzzy.find(&kb, MatchQuery::new("yes").with_that(&history)).is_some());
    }
}
