//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a working engine.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for matching and template evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum `srai`/`sr` recursion depth before expansion stops.
    pub max_recursion_depth: usize,
    /// Number of requests/responses kept per session.
    pub history_depth: usize,
    /// Patterns with more wildcards than this are rejected.
    pub max_wildcards: usize,
    /// Maximum element nesting in a template.
    pub max_nesting: usize,
    /// Learned templates with more `srai` elements than this are rejected.
    pub max_srai_per_template: usize,
    /// Seed for `random` and `shuffle`.
    pub random_seed: u64,
    /// Timeout handed to `sraix` clients and persistence, in milliseconds.
    pub service_timeout_ms: u64,
    /// Minimum fuzzy score for a that-pattern to count as matched.
    pub fuzzy_threshold: f32,
    /// Text returned for a turn when nothing matches.
    pub no_match_response: String,
    /// Answer each input sentence separately.
    pub split_sentences: bool,
    /// Reported by `<version/>`.
    pub version: String,
    /// Entries per cache (compiled patterns, templates, match outcomes).
    pub cache_capacity: usize,
    /// Reference time for `<date/>` and `<time/>`; `None` reads the clock.
    pub fixed_time: Option<NaiveDateTime>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_recursion_depth: 9,
            history_depth: 10,
            max_wildcards: 12,
            max_nesting: 48,
            max_srai_per_template: 16,
            random_seed: 0x5eed,
            service_timeout_ms: 3_000,
            fuzzy_threshold: 0.8,
            no_match_response: String::new(),
            split_sentences: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_capacity: 1024,
            fixed_time: None,
        }
    }
}

impl Config {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
