//! Template markup parser and serializer.
//!
//! A small, strict XML-ish scanner: elements must balance, attribute values
//! must be quoted, and nesting is bounded. Comments are dropped and CDATA
//! becomes text. A `<` that cannot start a tag (`a < b`) is plain text.
//!
//! After an element's children are parsed, children named like one of the
//! tag's attributes are lifted into [`AttrValue::Dynamic`], so
//! `<get><name>x</name></get>` and `<get name="x"/>` parse to the same shape.

use super::tags::Tag;
use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Static(String),
    /// Markup evaluated at use time.
    Dynamic(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: Tag,
    /// Name as written, kept for serialization.
    pub name: String,
    pub attrs: Vec<(String, AttrValue)>,
    pub children: Vec<Node>,
    pub self_closing: bool,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.children.iter().all(|n| matches!(n, Node::Text(t) if t.trim().is_empty()))
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    pub nodes: Vec<Node>,
}

impl Template {
    pub fn to_markup(&self) -> String {
        serialize_nodes(&self.nodes)
    }

    /// Number of elements with `tag`, at any depth.
    pub fn count(&self, tag: &Tag) -> usize {
        fn walk(nodes: &[Node], tag: &Tag) -> usize {
            nodes
                .iter()
                .map(|n| match n {
                    Node::Element(el) => {
                        let own = usize::from(&el.tag == tag);
                        let attrs: usize = el
                            .attrs
                            .iter()
                            .map(|(_, v)| match v {
                                AttrValue::Dynamic(nodes) => walk(nodes, tag),
                                AttrValue::Static(_) => 0,
                            })
                            .sum();
                        own + attrs + walk(&el.children, tag)
                    }
                    Node::Text(_) => 0,
                })
                .sum()
        }
        walk(&self.nodes, tag)
    }
}

struct Frame {
    name: String,
    attrs: Vec<(String, AttrValue)>,
    children: Vec<Node>,
}

/// Parse template markup, rejecting anything nested deeper than `max_nesting`.
pub fn parse(text: &str, max_nesting: usize) -> Result<Template, TemplateError> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let Some(offset) = text[pos..].find('<') else {
            push_text(current(&mut root, &mut stack), &decode_entities(&text[pos..]));
            break;
        };
        let lt = pos + offset;
        if lt > pos {
            push_text(current(&mut root, &mut stack), &decode_entities(&text[pos..lt]));
        }
        let rest = &text[lt..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").ok_or(TemplateError::MalformedTag(lt))?;
            pos = lt + end + 3;
        } else if let Some(body) = rest.strip_prefix("<![CDATA[") {
            let end = body.find("]]>").ok_or(TemplateError::MalformedTag(lt))?;
            push_text(current(&mut root, &mut stack), &body[..end]);
            pos = lt + "<![CDATA[".len() + end + 3;
        } else if let Some(body) = rest.strip_prefix("</") {
            let end = body.find('>').ok_or(TemplateError::MalformedTag(lt))?;
            let name = body[..end].trim();
            let frame = stack.pop().ok_or_else(|| TemplateError::UnexpectedClose(name.to_string()))?;
            if !frame.name.eq_ignore_ascii_case(name) {
                return Err(TemplateError::Mismatched { expected: frame.name, found: name.to_string() });
            }
            let element = build(frame.name, frame.attrs, frame.children, false);
            current(&mut root, &mut stack).push(Node::Element(element));
            pos = lt + 2 + end + 1;
        } else if rest[1..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            let (name, attrs, self_closing, consumed) = open_tag(rest).ok_or(TemplateError::MalformedTag(lt))?;
            if stack.len() + 1 > max_nesting {
                return Err(TemplateError::TooDeep(max_nesting));
            }
            if self_closing {
                let element = build(name, attrs, Vec::new(), true);
                current(&mut root, &mut stack).push(Node::Element(element));
            } else {
                stack.push(Frame { name, attrs, children: Vec::new() });
            }
            pos = lt + consumed;
        } else {
            push_text(current(&mut root, &mut stack), "<");
            pos = lt + 1;
        }
    }

    if let Some(open) = stack.pop() {
        return Err(TemplateError::Unclosed(open.name));
    }
    Ok(Template { nodes: root })
}

fn current<'a>(root: &'a mut Vec<Node>, stack: &'a mut [Frame]) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(frame) => &mut frame.children,
        None => root,
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(last)) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Parse `<name a="b" ...>` or `<name .../>` at the start of `rest`.
/// Returns the name, attributes, self-closing flag and bytes consumed.
fn open_tag(rest: &str) -> Option<(String, Vec<(String, AttrValue)>, bool, usize)> {
    let bytes = rest.as_bytes();
    let is_name = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':');
    let mut i = 1;
    while i < bytes.len() && is_name(bytes[i]) {
        i += 1;
    }
    let name = rest[1..i].to_string();
    let mut attrs = Vec::new();

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i)? {
            b'>' => return Some((name, attrs, false, i + 1)),
            b'/' if bytes.get(i + 1) == Some(&b'>') => return Some((name, attrs, true, i + 2)),
            _ => {}
        }
        let start = i;
        while i < bytes.len() && is_name(bytes[i]) {
            i += 1;
        }
        if i == start {
            return None;
        }
        let attr = rest[start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            return None;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let quote = *bytes.get(i)?;
        if quote != b'"' && quote != b'\'' {
            return None;
        }
        let value_start = i + 1;
        let len = rest[value_start..].find(quote as char)?;
        let value = decode_entities(&rest[value_start..value_start + len]);
        attrs.push((attr, AttrValue::Static(value)));
        i = value_start + len + 1;
    }
}

fn build(name: String, mut attrs: Vec<(String, AttrValue)>, children: Vec<Node>, self_closing: bool) -> Element {
    let tag = Tag::from_name(&name);
    let liftable = tag.dynamic_attributes();
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Node::Element(el)
                if liftable.iter().any(|a| el.name.eq_ignore_ascii_case(a))
                    && !attrs.iter().any(|(n, _)| n.eq_ignore_ascii_case(&el.name)) =>
            {
                attrs.push((el.name.to_ascii_lowercase(), AttrValue::Dynamic(el.children)));
            }
            other => kept.push(other),
        }
    }
    Element { tag, name, attrs, children: kept, self_closing }
}

/// Decode the five predefined entities plus numeric references.
/// Unknown entities are kept as written.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

pub fn serialize_nodes(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(el) => out.push_str(&serialize_element(el)),
        }
    }
    out
}

pub fn serialize_element(el: &Element) -> String {
    let mut out = format!("<{}", el.name);
    let mut dynamic = String::new();
    for (name, value) in &el.attrs {
        match value {
            AttrValue::Static(v) => out.push_str(&format!(" {name}=\"{}\"", escape_attr(v))),
            AttrValue::Dynamic(nodes) => dynamic.push_str(&format!("<{name}>{}</{name}>", serialize_nodes(nodes))),
        }
    }
    if el.self_closing && el.children.is_empty() && dynamic.is_empty() {
        out.push_str("/>");
        return out;
    }
    out.push('>');
    out.push_str(&dynamic);
    out.push_str(&serialize_nodes(&el.children));
    out.push_str(&format!("</{}>", el.name));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tags::{CollectionKind, StarSource};

    #[test]
    fn parses_nested_elements_and_attributes() {
        let t = parse(r#"Hi <star index="2"/>, <set name='x'>a<get name="y"/></set>!"#, 8).unwrap();
        assert_eq!(t.nodes.len(), 5);
        let Node::Element(star) = &t.nodes[1] else { panic!("expected element") };
        assert_eq!(star.tag, Tag::Star { source: StarSource::Input, fixed_index: None });
        assert_eq!(star.attr("index"), Some(&AttrValue::Static("2".into())));
        let Node::Element(set) = &t.nodes[3] else { panic!("expected element") };
        assert_eq!(set.tag, Tag::Collection(CollectionKind::Set));
        assert_eq!(set.children.len(), 2);
    }

    #[test]
    fn lifts_attribute_children() {
        let t = parse("<get><name>fav<star/></name></get>", 8).unwrap();
        let Node::Element(get) = &t.nodes[0] else { panic!("expected element") };
        assert!(get.children.is_empty());
        assert!(matches!(get.attr("name"), Some(AttrValue::Dynamic(nodes)) if nodes.len() == 2));
    }

    #[test]
    fn structural_errors() {
        assert_eq!(parse("<think>x", 8), Err(TemplateError::Unclosed("think".into())));
        assert_eq!(parse("x</b>", 8), Err(TemplateError::UnexpectedClose("b".into())));
        assert!(matches!(parse("<a><b></a></b>", 8), Err(TemplateError::Mismatched { .. })));
        assert!(matches!(parse("<get name=x/>", 8), Err(TemplateError::MalformedTag(0))));
        assert_eq!(parse("<a><a><a></a></a></a>", 2), Err(TemplateError::TooDeep(2)));
    }

    #[test]
    fn entities_comments_and_literal_brackets() {
        let t = parse("1 &lt; 2 &amp;&#65;<!-- note --> a < b<![CDATA[<raw>]]>", 8).unwrap();
        assert_eq!(t.nodes, vec![Node::Text("1 < 2 &A a < b<raw>".into())]);
    }

    #[test]
    fn serializes_back_to_markup() {
        let source = r#"<srai>HELLO <star/></srai> &amp; <get><name>x</name></get><set name="a">1</set>"#;
        let t = parse(source, 8).unwrap();
        assert_eq!(t.to_markup(), source);
        assert_eq!(t.count(&Tag::Srai), 1);
    }
}
