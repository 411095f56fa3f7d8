//! Match metrics.
//!
//! The matcher always records which stages ran and how long they took; the
//! candidate list is kept so verbose turns can show why a rule won.
//!
//! The intended usage is:
//!
//! - `Engine::respond` for normal operation (metrics are dropped).
//! - `Engine::respond_verbose` for debugging rule priorities and for
//!   inspecting what each stage considered.

use super::matcher::{Match, MatchStage};
use std::time::Duration;

// --- Metrics -----------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct MatchMetrics {
    /// Total elapsed time for one `Matcher::find`.
    pub total: Duration,
    pub literal: StageMetrics,
    pub exact: StageMetrics,
    pub scan: StageMetrics,
    pub default: StageMetrics,
    /// Wildcard candidates from the full scan, best first.
    pub candidates: Vec<Candidate>,
}

impl MatchMetrics {
    pub fn stage(&self, stage: MatchStage) -> &StageMetrics {
        match stage {
            MatchStage::Literal => &self.literal,
            MatchStage::Exact => &self.exact,
            MatchStage::Scan => &self.scan,
            MatchStage::Default => &self.default,
        }
    }
}

/// Timing and counts for one matcher stage.
#[derive(Debug, Default, Clone)]
pub struct StageMetrics {
    pub ran: bool,
    pub duration: Duration,
    /// Rules (or keys, for the exact stage) looked at.
    pub considered: usize,
    /// Rules dropped by the anchor prefilter or by topic/that gates.
    pub gated: usize,
    pub matched: usize,
}

/// A scored full-scan candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub score: i64,
}

/// Matcher output bundled with its metrics.
#[derive(Debug, Clone)]
pub struct MatchRun {
    pub found: Option<Match>,
    pub metrics: MatchMetrics,
}
