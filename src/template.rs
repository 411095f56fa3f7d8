//! Response templates: markup parsing and evaluation.
//!
//! A template is parsed once into a [`Template`] tree (cached by the engine)
//! and evaluated against a [`VariableContext`](crate::VariableContext) for
//! every turn that selects its rule:
//!
//! ```text
//! template text ──parse──▶ Template { nodes }
//!                               │
//!                     Evaluator::evaluate(ctx)
//!                               │
//!      ┌──────────┬─────────────┼─────────────┬────────────┐
//!      ▼          ▼             ▼             ▼            ▼
//!   bindings   variables    recursion     collections   learning
//!   (star)     (get/set)    (srai/sr)     (set/map/..)  (learn/unlearn)
//! ```
//!
//! Unknown elements evaluate to their content, so markup written for a newer
//! engine still produces readable text.
//!
//! Invariants:
//! - A parse failure or an internal error yields [`EVALUATION_FAILURE`],
//!   never partially evaluated markup.
//! - Only `random` and `shuffle` advance a session's random sequence.

#[path = "template/collections.rs"]
mod collections;
#[path = "template/evaluator.rs"]
mod evaluator;
#[path = "template/learn.rs"]
mod learn;
#[path = "template/parser.rs"]
mod parser;
#[path = "template/system.rs"]
mod system;
#[path = "template/tags.rs"]
mod tags;
#[path = "template/text.rs"]
mod text;

#[cfg(test)]
#[path = "template/tests.rs"]
mod tests;

pub use evaluator::Evaluator;
pub(crate) use learn::screen_rule;
pub use parser::{Template, parse};

/// Returned for a turn whose template could not be evaluated.
pub const EVALUATION_FAILURE: &str = "I'm sorry, something went wrong while answering.";
