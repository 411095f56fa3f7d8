//! `<learn>`, `<learnf>`, `<unlearn>` and `<unlearnf>`.
//!
//! Each embedded `category` becomes one [`Rule`]:
//!
//! ```text
//! <learn>
//!   <category>
//!     <pattern>WHO IS <eval><star/></eval></pattern>   evaluated, markers kept
//!     <template><eval><star index="2"/></eval></template>   verbatim except eval
//!   </category>
//! </learn>
//! ```
//!
//! Pattern, that and topic children are evaluated so a teaching template can
//! splice in its own bindings, but pattern markers (`<set>name</set>`,
//! `<topic>name</topic>`, `<bot name=".."/>`) are written back as markup.
//! Plain wildcards are text and survive untouched. Inside the learned
//! template only `<eval>` runs; everything else is stored as written so it
//! executes when the learned rule fires.
//!
//! Rules that fail validation or screening are logged and skipped; the tag
//! itself always evaluates to nothing.

use super::evaluator::{Eval, Evaluator};
use super::parser::{AttrValue, Element, Node, decode_entities, parse, serialize_element, serialize_nodes};
use super::tags::{CollectionKind, Mutation, Tag};
use crate::scope::VariableContext;
use crate::services::{forget_rule, persist_rule};
use crate::{EngineError, Rule};

/// One `category` with the topic of an enclosing `<topic name="..">` wrapper.
struct Category<'t> {
    element: &'t Element,
    topic: Option<String>,
}

pub(super) fn mutate(ev: &Evaluator<'_>, el: &Element, mutation: Mutation, ctx: &mut VariableContext<'_>) -> Eval {
    let mut categories = Vec::new();
    collect(&el.children, None, &mut categories);
    if categories.is_empty() {
        tracing::debug!(tag = %el.name, "no category to learn");
    }
    for category in categories {
        let rule = build_rule(ev, &category, ctx)?;
        if mutation.removes() {
            unlearn(ev, rule, mutation, ctx);
        } else {
            learn(ev, rule, mutation, ctx);
        }
    }
    Ok(String::new())
}

fn collect<'t>(nodes: &'t [Node], topic: Option<&str>, out: &mut Vec<Category<'t>>) {
    for node in nodes {
        let Node::Element(el) = node else { continue };
        match el.tag {
            Tag::Category => out.push(Category { element: el, topic: topic.map(str::to_string) }),
            Tag::Topic => {
                let name = match el.attr("name") {
                    Some(AttrValue::Static(name)) => Some(name.trim().to_string()),
                    _ => None,
                };
                collect(&el.children, name.as_deref().or(topic), out);
            }
            _ => {}
        }
    }
}

fn build_rule(ev: &Evaluator<'_>, category: &Category<'_>, ctx: &mut VariableContext<'_>) -> Result<Rule, EngineError> {
    let mut rule = Rule::new(String::new(), String::new());
    rule.topic = category.topic.clone();
    for part in category.element.elements() {
        match part.tag {
            Tag::Pattern => rule.pattern = pattern_side(ev, &part.children, ctx)?,
            Tag::That => rule.that = Some(pattern_side(ev, &part.children, ctx)?).filter(|t| !t.is_empty()),
            Tag::Topic => rule.topic = Some(pattern_side(ev, &part.children, ctx)?).filter(|t| !t.is_empty()),
            Tag::Template => rule.template = serialize_nodes(&resolve_eval(ev, &part.children, ctx)?),
            _ => {}
        }
    }
    Ok(rule)
}

fn is_marker(el: &Element) -> bool {
    match el.tag {
        Tag::Collection(CollectionKind::Set) => el.attrs.is_empty() && !el.is_empty(),
        Tag::Topic => !el.is_empty(),
        Tag::Bot => matches!(el.attr("name"), Some(AttrValue::Static(_))),
        _ => false,
    }
}

/// Evaluate a pattern, that or topic body, keeping markers as markup.
fn pattern_side(ev: &Evaluator<'_>, nodes: &[Node], ctx: &mut VariableContext<'_>) -> Eval {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Element(el) if is_marker(el) => out.push_str(&serialize_element(el)),
            other => out.push_str(&ev.nodes(std::slice::from_ref(other), ctx)?),
        }
    }
    Ok(out.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Copy of `nodes` with each `<eval>` replaced by its evaluated text.
fn resolve_eval(ev: &Evaluator<'_>, nodes: &[Node], ctx: &mut VariableContext<'_>) -> Result<Vec<Node>, EngineError> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Text(text) => out.push(Node::Text(text.clone())),
            Node::Element(el) if el.tag == Tag::Eval => out.push(Node::Text(ev.content(el, ctx)?)),
            Node::Element(el) => {
                let mut attrs = Vec::with_capacity(el.attrs.len());
                for (name, value) in &el.attrs {
                    let value = match value {
                        AttrValue::Dynamic(nodes) => AttrValue::Dynamic(resolve_eval(ev, nodes, ctx)?),
                        AttrValue::Static(v) => AttrValue::Static(v.clone()),
                    };
                    attrs.push((name.clone(), value));
                }
                let children = resolve_eval(ev, &el.children, ctx)?;
                out.push(Node::Element(Element { attrs, children, ..el.clone() }));
            }
        }
    }
    Ok(out)
}

/// Reject learned content that carries script-like payloads or too many
/// recursive calls.
pub(crate) fn screen_rule(rule: &Rule, max_srai: usize, max_nesting: usize) -> Result<(), EngineError> {
    let probes = [
        (regex!(r"(?i)<\s*script"), "script element"),
        (regex!(r"(?i)javascript\s*:"), "javascript: url"),
        (regex!(r"(?i)<\s*system"), "system element"),
        (regex!(r"(?i)<\s*iframe"), "iframe element"),
        (regex!(r#"(?i)\bon[a-z]+\s*=\s*["']"#), "inline event handler"),
    ];
    let fields = [Some(rule.pattern.as_str()), Some(rule.template.as_str()), rule.that.as_deref(), rule.topic.as_deref()];
    for text in fields.into_iter().flatten() {
        let decoded = decode_entities(text);
        if let Some((_, what)) = probes.iter().find(|(re, _)| re.is_match(text) || re.is_match(&decoded)) {
            return Err(EngineError::rejected(format!("{what} in `{}`", rule.pattern)));
        }
    }
    let template =
        parse(&rule.template, max_nesting).map_err(|err| EngineError::malformed(&rule.pattern, err.to_string()))?;
    let calls = template.count(&Tag::Srai) + template.count(&Tag::Sr);
    if calls > max_srai {
        return Err(EngineError::rejected(format!("{calls} srai calls (limit {max_srai}) in `{}`", rule.pattern)));
    }
    Ok(())
}

fn learn(ev: &Evaluator<'_>, rule: Rule, mutation: Mutation, ctx: &mut VariableContext<'_>) {
    let engine = ev.engine();
    let config = engine.config();
    if let Err(err) = screen_rule(&rule, config.max_srai_per_template, config.max_nesting) {
        tracing::warn!(%err, "learned rule rejected");
        return;
    }
    let inserted = ctx.knowledge.write().add_rule(rule.clone());
    match inserted {
        Ok(entry) => tracing::debug!(key = %entry.key, "learned rule"),
        Err(err) => {
            tracing::warn!(%err, "learned rule rejected");
            return;
        }
    }
    if !mutation.persists() {
        return;
    }
    match engine.persistence() {
        Some(store) => {
            if let Err(err) = persist_rule(store, &rule, "learnf", config.service_timeout()) {
                tracing::warn!(%err, pattern = %rule.pattern, "could not persist learned rule");
            }
        }
        None => tracing::warn!(pattern = %rule.pattern, "learnf without a persistence store; rule kept in memory only"),
    }
}

fn unlearn(ev: &Evaluator<'_>, rule: Rule, mutation: Mutation, ctx: &mut VariableContext<'_>) {
    let removed = ctx.knowledge.write().remove_rule(&rule);
    match removed {
        Some(entry) => tracing::debug!(key = %entry.key, "unlearned rule"),
        None => tracing::debug!(pattern = %rule.pattern, "nothing to unlearn"),
    }
    if !mutation.persists() {
        return;
    }
    let engine = ev.engine();
    if let Some(store) = engine.persistence() {
        if let Err(err) = forget_rule(store, &rule, engine.config().service_timeout()) {
            tracing::warn!(%err, pattern = %rule.pattern, "could not remove persisted rule");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screening_rejects_payloads_and_srai_chains() {
        let cases = vec![
            (Rule::new("HI", "Hello"), true),
            (Rule::new("HI", "<script>alert(1)</script>"), false),
            (Rule::new("HI", "&lt;script&gt;alert(1)&lt;/script&gt;"), false),
            (Rule::new("HI", "<a href=\"javascript:go()\">x</a>"), false),
            (Rule::new("HI", "<img onerror='x'/>"), false),
            (Rule::new("HI", "<srai>A</srai><srai>B</srai><sr/>"), false),
            (Rule::new("HI", "<srai>A</srai><srai>B</srai>"), true),
            (Rule::new("HI", "<think>unclosed"), false),
        ];
        for (rule, ok) in cases {
            assert_eq!(screen_rule(&rule, 2, 16).is_ok(), ok, "{:?}", rule.template);
        }
    }

    #[test]
    fn markers_are_recognized() {
        let t = parse(r#"I LIKE <set>color</set> <bot name="name"/> <set name="x">y</set>"#, 8).unwrap();
        let markers: Vec<bool> = t
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Element(el) => Some(is_marker(el)),
                Node::Text(_) => None,
            })
            .collect();
        assert_eq!(markers, vec![true, true, false]);
    }
}
