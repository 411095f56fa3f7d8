//! Error taxonomy.
//!
//! "No rule matched" is deliberately absent: it is an ordinary outcome and is
//! modelled as `Option::None` by the matcher. Everything here is either local
//! to one operation (a rejected learn, a failed service call) or the single
//! turn-replacing case, [`EngineError::InternalEvaluation`].

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Pattern or template failed structural validation.
    #[error("malformed rule `{pattern}`: {reason}")]
    MalformedRule { pattern: String, reason: String },

    /// Learned content carried disallowed constructs.
    #[error("rule rejected: {reason}")]
    SecurityRejected { reason: String },

    /// An `sraix` client failed, timed out, or was not registered.
    #[error("external service `{service}` failed: {reason}")]
    ExternalService { service: String, reason: String },

    /// The persistence collaborator refused a learnf/unlearnf.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Template tree could not be evaluated at all.
    #[error("template evaluation failed: {0}")]
    InternalEvaluation(String),
}

impl EngineError {
    pub(crate) fn malformed(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedRule { pattern: pattern.into(), reason: reason.into() }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        EngineError::SecurityRejected { reason: reason.into() }
    }
}

/// Markup-level failures raised while parsing a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed <{0}>")]
    Unclosed(String),

    #[error("unexpected </{found}> (expected </{expected}>)")]
    Mismatched { expected: String, found: String },

    #[error("unexpected </{0}> with no open element")]
    UnexpectedClose(String),

    #[error("malformed tag near byte {0}")]
    MalformedTag(usize),

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}

impl From<TemplateError> for EngineError {
    fn from(err: TemplateError) -> Self {
        EngineError::InternalEvaluation(err.to_string())
    }
}
