//! Template tree interpreter.
//!
//! Evaluation is a depth-first walk: each element's handler returns the text
//! that replaces it in its parent. Handlers report irrecoverable problems as
//! [`EngineError::InternalEvaluation`]; [`Evaluator::evaluate`] turns those
//! into [`EVALUATION_FAILURE`] so no half-processed markup reaches a user.
//!
//! Recursion (`srai`, `sr`) goes through [`VariableContext::child`], which
//! bumps `depth`; at `max_recursion_depth` expansion stops and the tag is
//! emitted unresolved.

use super::collections;
use super::learn;
use super::parser::{AttrValue, Element, Node, serialize_element};
use super::system::{Clock, format_clock};
use super::tags::{Substitution, Tag, Transform};
use super::text::{self, TransformArgs};
use super::EVALUATION_FAILURE;
use crate::api::Engine;
use crate::engine::{Match, MatchQuery};
use crate::normalize::{apply_substitutions, denormalize, normalize, split_sentences};
use crate::scope::VariableContext;
use crate::services::ServiceParams;
use crate::EngineError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub(crate) type Eval = Result<String, EngineError>;

/// Read target of `condition` and `li`.
#[derive(Debug, Clone)]
enum Subject {
    Name(String),
    Var(String),
}

pub struct Evaluator<'e> {
    engine: &'e Engine,
}

impl<'e> Evaluator<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Evaluator { engine }
    }

    pub(crate) fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Evaluate `template` and never fail: internal errors become the
    /// [`EVALUATION_FAILURE`] sentinel.
    pub fn evaluate(&self, template: &str, ctx: &mut VariableContext<'_>) -> String {
        match self.run(template, ctx) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, "template evaluation failed");
                EVALUATION_FAILURE.to_string()
            }
        }
    }

    /// Parse (cached) and evaluate `template`.
    pub(crate) fn run(&self, template: &str, ctx: &mut VariableContext<'_>) -> Eval {
        let parsed = self.engine.caches().template(template, self.engine.config().max_nesting)?;
        self.nodes(&parsed.nodes, ctx)
    }

    pub(crate) fn nodes(&self, nodes: &[Node], ctx: &mut VariableContext<'_>) -> Eval {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) => out.push_str(&self.element(el, ctx)?),
            }
        }
        Ok(out)
    }

    pub(crate) fn content(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        self.nodes(&el.children, ctx)
    }

    /// Attribute value, evaluating child-element attributes. Trimmed.
    pub(crate) fn attr(&self, el: &Element, name: &str, ctx: &mut VariableContext<'_>) -> Result<Option<String>, EngineError> {
        match el.attr(name) {
            Some(AttrValue::Static(v)) => Ok(Some(v.trim().to_string())),
            Some(AttrValue::Dynamic(nodes)) => Ok(Some(self.nodes(nodes, ctx)?.trim().to_string())),
            None => Ok(None),
        }
    }

    /// Attribute value with its whitespace kept (`delimiter`, `char`).
    pub(crate) fn attr_untrimmed(&self, el: &Element, name: &str, ctx: &mut VariableContext<'_>) -> Result<Option<String>, EngineError> {
        match el.attr(name) {
            Some(AttrValue::Static(v)) => Ok(Some(v.clone())),
            Some(AttrValue::Dynamic(nodes)) => Ok(Some(self.nodes(nodes, ctx)?)),
            None => Ok(None),
        }
    }

    /// Non-empty attribute value.
    pub(crate) fn attr_nonempty(&self, el: &Element, name: &str, ctx: &mut VariableContext<'_>) -> Result<Option<String>, EngineError> {
        Ok(self.attr(el, name, ctx)?.filter(|v| !v.is_empty()))
    }

    fn index_attr(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Result<usize, EngineError> {
        let raw = self.attr(el, "index", ctx)?.unwrap_or_default();
        Ok(raw.split(',').next().and_then(|n| n.trim().parse().ok()).filter(|n| *n > 0).unwrap_or(1))
    }

    fn element(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        match &el.tag {
            Tag::Star { source, fixed_index } => {
                let index = match fixed_index {
                    Some(i) => *i,
                    None => self.index_attr(el, ctx)?,
                };
                Ok(ctx.bindings.indexed(source.prefix(), index).unwrap_or("").to_string())
            }
            Tag::Get => self.get(el, ctx),
            Tag::Bot => {
                let name = match self.attr_nonempty(el, "name", ctx)? {
                    Some(name) => name,
                    None => self.content(el, ctx)?.trim().to_string(),
                };
                Ok(ctx.knowledge.read().property(&name).unwrap_or("").to_string())
            }
            Tag::Think => {
                self.content(el, ctx)?;
                Ok(String::new())
            }
            Tag::Condition => self.condition(el, ctx),
            Tag::Random => self.random(el, ctx),
            Tag::That => self.that(el, ctx),
            Tag::Request => {
                let index = self.index_attr(el, ctx)?;
                Ok(ctx.session.request(index).unwrap_or("").to_string())
            }
            Tag::Response => {
                let index = self.index_attr(el, ctx)?;
                Ok(ctx.session.response(index).unwrap_or("").to_string())
            }
            Tag::Input => {
                let index = self.index_attr(el, ctx)?;
                if index == 1 {
                    Ok(ctx.input.clone())
                } else {
                    Ok(ctx.session.request(index - 1).unwrap_or("").to_string())
                }
            }
            Tag::Srai => self.srai(el, ctx),
            Tag::Sr => self.sr(ctx),
            Tag::Sraix => self.sraix(el, ctx),
            Tag::Mutation(mutation) => learn::mutate(self, el, *mutation, ctx),
            Tag::Transform(transform) => {
                let content = self.content(el, ctx)?;
                let args = TransformArgs {
                    start: self.attr(el, "start", ctx)?,
                    end: self.attr(el, "end", ctx)?,
                    search: self.attr(el, "search", ctx)?,
                    replace: self.attr(el, "replace", ctx)?,
                    kind: self.attr(el, "type", ctx)?,
                    delimiter: self.attr_untrimmed(el, "delimiter", ctx)?,
                    limit: self.attr(el, "limit", ctx)?,
                    level: self.attr(el, "level", ctx)?,
                    fill: self.attr_untrimmed(el, "char", ctx)?,
                };
                // Only shuffling consumes a draw.
                let mut rng = if *transform == Transform::Shuffle { self.rng(ctx) } else { StdRng::seed_from_u64(0) };
                Ok(text::apply(*transform, &content, &args, &mut rng))
            }
            Tag::Substitution(substitution) => self.substitute(el, *substitution, ctx),
            Tag::Collection(kind) => collections::evaluate(self, el, *kind, ctx),
            Tag::Size => Ok(ctx.knowledge.read().rule_count().to_string()),
            Tag::Version => Ok(self.engine.config().version.clone()),
            Tag::Id => Ok(ctx.session.id().to_string()),
            Tag::Date | Tag::Time => {
                let clock = if el.tag == Tag::Date { Clock::Date } else { Clock::Time };
                let format = self.attr(el, "format", ctx)?;
                let now = self.engine.config().fixed_time.unwrap_or_else(|| chrono::Local::now().naive_local());
                Ok(format_clock(clock, now, format.as_deref()))
            }
            Tag::Normalize => Ok(normalize(&self.content(el, ctx)?)),
            Tag::Denormalize => {
                let content = self.content(el, ctx)?;
                let kb = ctx.knowledge.read();
                Ok(denormalize(&content, kb.substitutions("denormal")))
            }
            Tag::Topic => Ok(ctx.session.topic().unwrap_or("").to_string()),
            Tag::Eval
            | Tag::Li
            | Tag::Category
            | Tag::Pattern
            | Tag::Template
            | Tag::Unknown => self.content(el, ctx),
        }
    }

    // --- Variables --------------------------------------------------------------

    fn get(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        if let Some(var) = self.attr_nonempty(el, "var", ctx)? {
            return Ok(ctx.local(&var).unwrap_or("").to_string());
        }
        let name = match self.attr_nonempty(el, "name", ctx)? {
            Some(name) => name,
            None => self.content(el, ctx)?.trim().to_string(),
        };
        match ctx.lookup(&name) {
            Some((_, value)) => Ok(value),
            None => Ok(ctx.knowledge.read().property("default-get").unwrap_or("").to_string()),
        }
    }

    fn subject(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Result<Option<Subject>, EngineError> {
        if let Some(var) = self.attr_nonempty(el, "var", ctx)? {
            return Ok(Some(Subject::Var(var)));
        }
        Ok(self.attr_nonempty(el, "name", ctx)?.map(Subject::Name))
    }

    fn read(subject: &Subject, ctx: &VariableContext<'_>) -> Option<String> {
        match subject {
            Subject::Name(name) => ctx.lookup(name).map(|(_, v)| v),
            Subject::Var(var) => ctx.local(var).map(str::to_string),
        }
    }

    // --- Control ------------------------------------------------------------------

    fn condition(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        let subject = self.subject(el, ctx)?;
        if let Some(subject) = &subject {
            if let Some(expected) = self.attr(el, "value", ctx)? {
                let actual = Self::read(subject, ctx);
                return if value_matches(actual.as_deref(), &expected) { self.content(el, ctx) } else { Ok(String::new()) };
            }
        }

        let mut default: Option<&Element> = None;
        for li in el.elements().filter(|e| e.tag == Tag::Li) {
            let li_subject = self.subject(li, ctx)?.or_else(|| subject.clone());
            match self.attr(li, "value", ctx)? {
                Some(expected) => {
                    let Some(target) = &li_subject else { continue };
                    if value_matches(Self::read(target, ctx).as_deref(), &expected) {
                        return self.content(li, ctx);
                    }
                }
                None => {
                    default.get_or_insert(li);
                }
            }
        }

        let Some(li) = default else { return Ok(String::new()) };
        let fires = match &subject {
            Some(subject) => Self::read(subject, ctx).is_some_and(|v| !v.is_empty()),
            None => true,
        };
        if fires { self.content(li, ctx) } else { Ok(String::new()) }
    }

    /// Deterministic generator for one draw of this session.
    pub(crate) fn rng(&self, ctx: &mut VariableContext<'_>) -> StdRng {
        let draw = ctx.session.next_draw();
        StdRng::seed_from_u64(self.engine.config().random_seed ^ draw.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn random(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        let items: Vec<&Element> = el.elements().filter(|e| e.tag == Tag::Li).collect();
        if items.is_empty() {
            return Ok(String::new());
        }
        let pick = self.rng(ctx).gen_range(0..items.len());
        self.content(items[pick], ctx)
    }

    /// `<that index="N,M"/>`: sentence M (from the end) of response N.
    fn that(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        let raw = self.attr(el, "index", ctx)?.unwrap_or_default();
        let mut parts = raw.split(',').map(|p| p.trim().parse::<usize>().ok().filter(|n| *n > 0));
        let response = parts.next().flatten().unwrap_or(1);
        let sentence = parts.next().flatten().unwrap_or(1);
        let Some(text) = ctx.session.response(response) else { return Ok(String::new()) };
        let sentences = split_sentences(text);
        Ok(sentences.len().checked_sub(sentence).and_then(|i| sentences.get(i)).cloned().unwrap_or_default())
    }

    // --- Recursion ----------------------------------------------------------------

    fn at_depth_cap(&self, ctx: &VariableContext<'_>) -> bool {
        let capped = ctx.depth >= self.engine.config().max_recursion_depth;
        if capped {
            tracing::debug!(depth = ctx.depth, "recursion cap reached; leaving tag unexpanded");
        }
        capped
    }

    /// Run the matcher for a recursive expansion under a short read lock.
    pub(crate) fn lookup(&self, input: &str, ctx: &VariableContext<'_>) -> Option<Match> {
        let history = ctx.session.that_history();
        let topic = ctx.session.topic().map(str::to_string);
        let query = MatchQuery::new(input).with_topic(topic.as_deref()).with_that(&history);
        let kb = ctx.knowledge.read();
        self.engine.matcher().find(&kb, query)
    }

    fn expand(&self, found: Match, input: &str, ctx: &mut VariableContext<'_>) -> Eval {
        let mut child = ctx.child(found.bindings, input.to_string());
        self.run(&found.entry.rule.template, &mut child)
    }

    fn srai(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        let content = self.content(el, ctx)?;
        let input = content.trim();
        if self.at_depth_cap(ctx) {
            return Ok(format!("<srai>{input}</srai>"));
        }
        match self.lookup(input, ctx) {
            Some(found) => self.expand(found, input, ctx),
            None => Ok(format!("<srai>{input}</srai>")),
        }
    }

    fn sr(&self, ctx: &mut VariableContext<'_>) -> Eval {
        let star = ctx.bindings.indexed(crate::Bindings::STAR, 1).unwrap_or("").trim().to_string();
        if star.is_empty() || self.at_depth_cap(ctx) {
            return Ok("<sr/>".to_string());
        }
        match self.lookup(&star, ctx) {
            Some(found) => self.expand(found, &star, ctx),
            None => Ok("<sr/>".to_string()),
        }
    }

    fn sraix(&self, el: &Element, ctx: &mut VariableContext<'_>) -> Eval {
        let content = self.content(el, ctx)?;
        let service = match self.attr_nonempty(el, "service", ctx)? {
            Some(service) => Some(service),
            None => self.attr_nonempty(el, "bot", ctx)?,
        };
        let params = ServiceParams {
            bot_id: self.attr_nonempty(el, "botid", ctx)?,
            host: self.attr_nonempty(el, "host", ctx)?,
            hint: self.attr_nonempty(el, "hint", ctx)?,
        };
        let outcome = match &service {
            Some(service) => {
                self.engine.services().call(service, content.trim(), &params, self.engine.config().service_timeout())
            }
            None => Err(EngineError::ExternalService { service: String::new(), reason: "no service named".into() }),
        };
        match outcome {
            Ok(answer) => Ok(answer),
            Err(err) => {
                tracing::warn!(%err, "sraix failed; using fallback");
                match self.attr(el, "default", ctx)? {
                    Some(default) => Ok(default),
                    None => Ok(serialize_element(el)),
                }
            }
        }
    }

    // --- Substitutions --------------------------------------------------------

    fn substitute(&self, el: &Element, substitution: Substitution, ctx: &mut VariableContext<'_>) -> Eval {
        let mut content = self.content(el, ctx)?;
        if el.is_empty() {
            content = ctx.bindings.indexed(crate::Bindings::STAR, 1).unwrap_or("").to_string();
        }
        if content.trim().is_empty() {
            return Ok(String::new());
        }
        let kb = ctx.knowledge.read();
        let table = match kb.substitutions(substitution.table()) {
            Some(table) => table.to_vec(),
            None => text::default_substitutions(substitution.table()),
        };
        Ok(apply_substitutions(&table, content.trim()))
    }
}

/// Condition value test: normalized, case-insensitive; `*` means "any
/// non-empty value". Unset variables never match.
fn value_matches(actual: Option<&str>, expected: &str) -> bool {
    let Some(actual) = actual else { return false };
    if expected.trim() == "*" {
        return !actual.trim().is_empty();
    }
    normalize(actual) == normalize(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_values() {
        assert!(value_matches(Some("Happy"), "happy"));
        assert!(value_matches(Some("very happy!"), "VERY HAPPY"));
        assert!(value_matches(Some("x"), "*"));
        assert!(!value_matches(Some(""), "*"));
        assert!(!value_matches(None, "happy"));
        assert!(!value_matches(None, ""));
    }
}
