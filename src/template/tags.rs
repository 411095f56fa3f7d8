//! The closed tag vocabulary.
//!
//! Element names are resolved to a [`Tag`] once, at parse time; the
//! evaluator dispatches on the enum and never re-matches names.

/// Which bindings a wildcard tag reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StarSource {
    Input,
    That,
    Topic,
}

impl StarSource {
    pub fn prefix(self) -> &'static str {
        match self {
            StarSource::Input => crate::Bindings::STAR,
            StarSource::That => crate::Bindings::THAT_STAR,
            StarSource::Topic => crate::Bindings::TOPIC_STAR,
        }
    }
}

/// Auxiliary knowledge-base collections addressable from templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Set,
    Map,
    List,
    Array,
}

/// Pure text operators over the evaluated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Uppercase,
    Lowercase,
    Formal,
    Sentence,
    Word,
    Capitalize,
    Explode,
    Reverse,
    Acronym,
    Trim,
    Substring,
    Replace,
    Pluralize,
    Shuffle,
    Length,
    Count,
    Split,
    Join,
    Indent,
    Dedent,
    Unique,
    First,
    Rest,
}

/// Substitution-table transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substitution {
    Person,
    Person2,
    Gender,
}

impl Substitution {
    pub fn table(self) -> &'static str {
        match self {
            Substitution::Person => "person",
            Substitution::Person2 => "person2",
            Substitution::Gender => "gender",
        }
    }
}

/// Mutations of the rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    Learn,
    Learnf,
    Unlearn,
    Unlearnf,
}

impl Mutation {
    pub fn persists(self) -> bool {
        matches!(self, Mutation::Learnf | Mutation::Unlearnf)
    }

    pub fn removes(self) -> bool {
        matches!(self, Mutation::Unlearn | Mutation::Unlearnf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `star`, `thatstar`, `topicstar` and their `starN` / `that_starN` forms.
    Star { source: StarSource, fixed_index: Option<usize> },
    Get,
    Bot,
    Think,
    Condition,
    Li,
    Random,
    That,
    Request,
    Response,
    Input,
    Srai,
    Sr,
    Sraix,
    Mutation(Mutation),
    Category,
    Pattern,
    Template,
    /// `<topic/>` reads the current topic; inside `learn` it wraps categories.
    Topic,
    Transform(Transform),
    Substitution(Substitution),
    Collection(CollectionKind),
    Size,
    Version,
    Id,
    Date,
    Time,
    Normalize,
    Denormalize,
    Eval,
    /// Rendered as its children.
    Unknown,
}

impl Tag {
    pub fn from_name(name: &str) -> Tag {
        let lower = name.to_ascii_lowercase();
        if let Some(tag) = star_tag(&lower) {
            return tag;
        }
        match lower.as_str() {
            "get" => Tag::Get,
            "bot" => Tag::Bot,
            "think" => Tag::Think,
            "condition" => Tag::Condition,
            "li" => Tag::Li,
            "random" => Tag::Random,
            "that" => Tag::That,
            "request" => Tag::Request,
            "response" => Tag::Response,
            "input" => Tag::Input,
            "srai" => Tag::Srai,
            "sr" => Tag::Sr,
            "sraix" => Tag::Sraix,
            "learn" => Tag::Mutation(Mutation::Learn),
            "learnf" => Tag::Mutation(Mutation::Learnf),
            "unlearn" => Tag::Mutation(Mutation::Unlearn),
            "unlearnf" => Tag::Mutation(Mutation::Unlearnf),
            "category" => Tag::Category,
            "pattern" => Tag::Pattern,
            "template" => Tag::Template,
            "topic" => Tag::Topic,
            "uppercase" => Tag::Transform(Transform::Uppercase),
            "lowercase" => Tag::Transform(Transform::Lowercase),
            "formal" => Tag::Transform(Transform::Formal),
            "sentence" => Tag::Transform(Transform::Sentence),
            "word" => Tag::Transform(Transform::Word),
            "capitalize" => Tag::Transform(Transform::Capitalize),
            "explode" => Tag::Transform(Transform::Explode),
            "reverse" => Tag::Transform(Transform::Reverse),
            "acronym" => Tag::Transform(Transform::Acronym),
            "trim" => Tag::Transform(Transform::Trim),
            "substring" => Tag::Transform(Transform::Substring),
            "replace" => Tag::Transform(Transform::Replace),
            "pluralize" => Tag::Transform(Transform::Pluralize),
            "shuffle" => Tag::Transform(Transform::Shuffle),
            "length" => Tag::Transform(Transform::Length),
            "count" => Tag::Transform(Transform::Count),
            "split" => Tag::Transform(Transform::Split),
            "join" => Tag::Transform(Transform::Join),
            "indent" => Tag::Transform(Transform::Indent),
            "dedent" => Tag::Transform(Transform::Dedent),
            "unique" => Tag::Transform(Transform::Unique),
            "first" => Tag::Transform(Transform::First),
            "rest" => Tag::Transform(Transform::Rest),
            "person" => Tag::Substitution(Substitution::Person),
            "person2" => Tag::Substitution(Substitution::Person2),
            "gender" => Tag::Substitution(Substitution::Gender),
            "set" => Tag::Collection(CollectionKind::Set),
            "map" => Tag::Collection(CollectionKind::Map),
            "list" => Tag::Collection(CollectionKind::List),
            "array" => Tag::Collection(CollectionKind::Array),
            "size" => Tag::Size,
            "version" => Tag::Version,
            "id" => Tag::Id,
            "date" => Tag::Date,
            "time" => Tag::Time,
            "normalize" => Tag::Normalize,
            "denormalize" => Tag::Denormalize,
            "eval" => Tag::Eval,
            _ => Tag::Unknown,
        }
    }

    /// Attribute names this tag also accepts as child elements,
    /// e.g. `<get><name>x</name></get>`.
    pub fn dynamic_attributes(&self) -> &'static [&'static str] {
        match self {
            Tag::Star { fixed_index: None, .. } | Tag::That | Tag::Request | Tag::Response | Tag::Input => &["index"],
            Tag::Get => &["name", "var"],
            Tag::Bot => &["name"],
            Tag::Condition | Tag::Li => &["name", "var", "value"],
            Tag::Sraix => &["service", "bot", "host", "botid", "hint", "default"],
            Tag::Collection(_) => &["name", "var", "operation", "key", "index", "delimiter", "scope"],
            Tag::Transform(Transform::Substring) => &["start", "end"],
            Tag::Transform(Transform::Replace) => &["search", "replace"],
            Tag::Transform(Transform::Length) => &["type"],
            Tag::Transform(Transform::Count) => &["search"],
            Tag::Transform(Transform::Split) => &["delimiter", "limit"],
            Tag::Transform(Transform::Join | Transform::Unique) => &["delimiter"],
            Tag::Transform(Transform::Indent) => &["level", "char"],
            Tag::Date | Tag::Time => &["format"],
            _ => &[],
        }
    }
}

fn star_tag(lower: &str) -> Option<Tag> {
    let (source, rest) = if let Some(rest) = lower.strip_prefix("that_star").or_else(|| lower.strip_prefix("thatstar")) {
        (StarSource::That, rest)
    } else if let Some(rest) = lower.strip_prefix("topic_star").or_else(|| lower.strip_prefix("topicstar")) {
        (StarSource::Topic, rest)
    } else if let Some(rest) = lower.strip_prefix("star") {
        (StarSource::Input, rest)
    } else {
        return None;
    };
    if rest.is_empty() {
        return Some(Tag::Star { source, fixed_index: None });
    }
    let index: usize = rest.parse().ok().filter(|i| *i > 0)?;
    Some(Tag::Star { source, fixed_index: Some(index) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_to_tags() {
        assert_eq!(Tag::from_name("STAR"), Tag::Star { source: StarSource::Input, fixed_index: None });
        assert_eq!(Tag::from_name("star3"), Tag::Star { source: StarSource::Input, fixed_index: Some(3) });
        assert_eq!(Tag::from_name("that_star2"), Tag::Star { source: StarSource::That, fixed_index: Some(2) });
        assert_eq!(Tag::from_name("topicstar"), Tag::Star { source: StarSource::Topic, fixed_index: None });
        assert_eq!(Tag::from_name("set"), Tag::Collection(CollectionKind::Set));
        assert_eq!(Tag::from_name("learnf"), Tag::Mutation(Mutation::Learnf));
        assert_eq!(Tag::from_name("starboard"), Tag::Unknown);
        assert_eq!(Tag::from_name("b"), Tag::Unknown);
    }
}
