//! A deterministic, rule-based conversational response engine.
//!
//! Given user text and a conversation [`Session`], the engine picks the
//! best-matching [`Rule`] from a [`KnowledgeBase`] and evaluates its response
//! template. Templates are small markup programs: they read and write
//! layered variables, branch, re-enter the matcher (`<srai>`), learn new
//! rules at runtime and call injected external services.
//!
//! ```text
//! raw input ─▶ substitutions ─▶ normalize ─▶ Matcher ─▶ (rule, bindings)
//!                                              ▲  │
//!                                  <srai>/<sr> │  ▼
//!                               Template Evaluator ─▶ output text
//!                                  │      │
//!                      Scope Resolver    learn/unlearn, collections
//! ```
//!
//! # Example
//! ```
//! use quill::{Engine, KnowledgeBase, Rule, Session};
//!
//! let mut kb = KnowledgeBase::new();
//! kb.add_rule(Rule::new("HELLO", "Hi!")).unwrap();
//! kb.add_rule(Rule::new("HELLO *", "Hi <star/>!")).unwrap();
//!
//! let engine = Engine::new(kb);
//! let mut session = Session::new("demo");
//! assert_eq!(engine.respond("Hello Bob", &mut session), "Hi Bob!");
//! ```

extern crate self as quill;

#[macro_use]
mod macros;
mod api;
mod config;
mod engine;
mod error;
mod knowledge;
mod normalize;
mod scope;
mod services;
mod session;
mod template;

pub use api::{Engine, MatchSummary, SentenceTrace, TurnDetails, TurnResult};
pub use config::Config;
pub use engine::{CacheStats, Candidate, Match, MatchMetrics, MatchQuery, MatchStage, RuleEntry, StageMetrics};
pub use error::{EngineError, TemplateError};
pub use knowledge::{KnowledgeBase, KnowledgeSource, SharedKnowledge};
pub use normalize::{apply_substitutions, denormalize, normalize, normalize_pattern, normalize_preserving_case};
pub use scope::{Tier, VariableContext};
pub use services::{ExternalService, FuzzyScorer, Persistence, ServiceError, ServiceParams, ServiceRegistry};
pub use session::Session;
pub use template::{EVALUATION_FAILURE, Template};

use serde::{Deserialize, Serialize};

// --- Core types -------------------------------------------------------------

/// A pattern/template pair, optionally scoped by topic and prior bot utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    pub template: String,
    /// Pattern the bot's previous utterance must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub that: Option<String>,
    /// Which previous utterance `that` is compared to (0 = most recent).
    #[serde(default)]
    pub that_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Rule {
    pub fn new(pattern: impl Into<String>, template: impl Into<String>) -> Self {
        Rule { pattern: pattern.into(), template: template.into(), that: None, that_index: 0, topic: None }
    }

    pub fn with_that(mut self, that: impl Into<String>) -> Self {
        self.that = Some(that.into());
        self
    }

    pub fn with_that_index(mut self, index: usize) -> Self {
        self.that_index = index;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// The composite index key identifying this rule.
    pub fn key(&self) -> String {
        engine::key_of(self)
    }
}

/// The five wildcard kinds, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WildcardKind {
    /// `$WORD`: exact literal, highest priority.
    Dollar,
    /// `#`: zero or more tokens.
    Hash,
    /// `_`: exactly one token.
    Underscore,
    /// `^`: zero or more tokens.
    Caret,
    /// `*`: zero or more tokens, lowest priority.
    Star,
}

impl WildcardKind {
    /// Parse a standalone wildcard token (`$` is a prefix, not a token).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "#" => Some(WildcardKind::Hash),
            "_" => Some(WildcardKind::Underscore),
            "^" => Some(WildcardKind::Caret),
            "*" => Some(WildcardKind::Star),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            WildcardKind::Dollar => '$',
            WildcardKind::Hash => '#',
            WildcardKind::Underscore => '_',
            WildcardKind::Caret => '^',
            WildcardKind::Star => '*',
        }
    }
}

/// Captured wildcard values in pattern order (`star1`, `star2`, …,
/// `that_star1`, …, `topic_star1`, …).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    entries: Vec<(String, String)>,
}

impl Bindings {
    pub const STAR: &'static str = "star";
    pub const THAT_STAR: &'static str = "that_star";
    pub const TOPIC_STAR: &'static str = "topic_star";

    pub fn new() -> Self {
        Self::default()
    }

    /// Name captures `prefix1`, `prefix2`, … in order.
    pub fn from_captures(prefix: &str, captures: Vec<String>) -> Self {
        let entries =
            captures.into_iter().enumerate().map(|(i, value)| (format!("{prefix}{}", i + 1), value)).collect();
        Bindings { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Indexed lookup, 1-based: `star(Bindings::STAR, 1)` is `star1`.
    pub fn indexed(&self, prefix: &str, index: usize) -> Option<&str> {
        self.get(&format!("{prefix}{index}"))
    }

    /// Insert or overwrite in place (position is kept on overwrite).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add the entries of `other` whose names are not bound yet.
    pub fn merge_missing(&mut self, other: Bindings) {
        for (name, value) in other.entries {
            if self.get(&name).is_none() {
                self.entries.push((name, value));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
