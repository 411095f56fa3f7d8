//! Pattern matching engine.
//!
//! The engine is split into focused submodules under `src/engine/` and
//! re-exported here, so the rest of the crate addresses everything as
//! `crate::engine::X`.
//!
//! ## How the parts work together
//!
//! ```text
//! Rule ── RuleIndex::insert            (index.rs)
//!           - normalize pattern/that/topic, derive key
//!           - tokenize once: literal text, anchors   (compiler.rs)
//!                               │
//! input ── Matcher::find  (matcher.rs)  │
//!           - literal `$` scan          │
//!           - exact composite-key lookup
//!           - full scan: anchors ▸ gates ▸ compiled regex
//!                 │            ▲
//!                 │            └── Caches::pattern / captures   (cache.rs)
//!                 v
//!           Match { entry, bindings, score, stage } + MatchMetrics (metrics.rs)
//! ```
//!
//! Compiled patterns are never stored on rules: marker tokens expand to the
//! live contents of Sets/Topics/Properties, so compilation is memoized
//! against the knowledge base's `set_revision` instead.
//!
//! ## Responsibilities by module
//!
//! - `compiler.rs`: tokenizing, validating and compiling patterns; tiers and
//!   the priority score.
//! - `index.rs`: composite keys and the ordered rule list + key map.
//! - `matcher.rs`: the staged resolution algorithm and context gates.
//! - `cache.rs`: LRU memoization of compiled patterns, templates and
//!   capture outcomes.
//! - `metrics.rs`: per-stage timing and candidate traces.
//!
//! ## Debugging
//!
//! Run with `QUILL_LOG=quill=debug` to trace every match decision.

#[path = "engine/cache.rs"]
mod cache;
#[path = "engine/compiler.rs"]
mod compiler;
#[path = "engine/index.rs"]
mod index;
#[path = "engine/matcher.rs"]
mod matcher;
#[path = "engine/metrics.rs"]
mod metrics;

pub use cache::{CacheStats, Caches};
pub(crate) use compiler::{PatternContext, validate_pattern};
pub use index::{RuleEntry, RuleIndex, key_of};
pub use matcher::{Match, MatchQuery, MatchStage, Matcher};
pub use metrics::{Candidate, MatchMetrics, StageMetrics};
