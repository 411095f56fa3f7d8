//! Text transforms.
//!
//! Every operator here is a pure function of the already-evaluated content
//! and its attributes. Empty content yields empty output.

use super::tags::Transform;
use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// Attribute values a transform may read, already evaluated.
#[derive(Debug, Default, Clone)]
pub struct TransformArgs {
    pub start: Option<String>,
    pub end: Option<String>,
    pub search: Option<String>,
    pub replace: Option<String>,
    pub kind: Option<String>,
    pub delimiter: Option<String>,
    pub limit: Option<String>,
    pub level: Option<String>,
    pub fill: Option<String>,
}

pub fn apply(transform: Transform, content: &str, args: &TransformArgs, rng: &mut impl Rng) -> String {
    if content.is_empty() {
        return String::new();
    }
    match transform {
        Transform::Uppercase => content.to_uppercase(),
        Transform::Lowercase => content.to_lowercase(),
        Transform::Formal => map_words(content, |w| capitalize(&w.to_lowercase())),
        Transform::Word => map_words(content, capitalize),
        Transform::Sentence => sentence_case(content),
        Transform::Capitalize => capitalize(content),
        Transform::Explode => content.chars().filter(|c| !c.is_whitespace()).map(String::from).collect::<Vec<_>>().join(" "),
        Transform::Reverse => content.chars().rev().collect(),
        Transform::Acronym => content.split_whitespace().filter_map(|w| w.chars().next()).flat_map(char::to_uppercase).collect(),
        Transform::Trim => content.trim().to_string(),
        Transform::Substring => substring(content, args),
        Transform::Replace => match args.search.as_deref().filter(|s| !s.is_empty()) {
            Some(search) => content.replace(search, args.replace.as_deref().unwrap_or("")),
            None => content.to_string(),
        },
        Transform::Pluralize => pluralize_last(content),
        Transform::Shuffle => {
            let mut words: Vec<&str> = content.split_whitespace().collect();
            words.shuffle(rng);
            words.join(" ")
        }
        Transform::Length => length(content, args.kind.as_deref()),
        Transform::Count => match args.search.as_deref().filter(|s| !s.is_empty()) {
            Some(search) => content.matches(search).count().to_string(),
            None => content.split_whitespace().count().to_string(),
        },
        Transform::Split => split(content, args),
        Transform::Join => content.split_whitespace().collect::<Vec<_>>().join(args.delimiter.as_deref().unwrap_or(" ")),
        Transform::Indent => indent(content, args),
        Transform::Dedent => dedent(content),
        Transform::Unique => unique(content, args.delimiter.as_deref()),
        Transform::First => content.split_whitespace().next().unwrap_or("").to_string(),
        Transform::Rest => content.split_whitespace().skip(1).collect::<Vec<_>>().join(" "),
    }
}

fn map_words(content: &str, f: impl Fn(&str) -> String) -> String {
    content.split(' ').map(|w| f(w)).collect::<Vec<_>>().join(" ")
}

fn capitalize(word: &str) -> String {
    crate::normalize::capitalize_first(word)
}

/// Upper-case the first letter of each sentence, leaving the rest alone.
fn sentence_case(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut at_start = true;
    for c in content.chars() {
        if at_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            at_start = false;
        } else {
            if matches!(c, '.' | '!' | '?') {
                at_start = true;
            } else if !c.is_whitespace() {
                at_start = false;
            }
            out.push(c);
        }
    }
    out
}

/// Character range `[start, end)`, clamped to the content.
fn substring(content: &str, args: &TransformArgs) -> String {
    let chars: Vec<char> = content.chars().collect();
    let parse = |v: Option<&str>| v.and_then(|s| s.trim().parse::<usize>().ok());
    let start = parse(args.start.as_deref()).unwrap_or(0).min(chars.len());
    let end = parse(args.end.as_deref()).unwrap_or(chars.len()).clamp(start, chars.len());
    chars[start..end].iter().collect()
}

fn length(content: &str, kind: Option<&str>) -> String {
    let n = match kind.map(|k| k.trim().to_ascii_lowercase()).as_deref() {
        Some("word" | "words") => content.split_whitespace().count(),
        Some("sentence" | "sentences") => crate::normalize::split_sentences(content).len(),
        _ => content.chars().count(),
    };
    n.to_string()
}

fn split(content: &str, args: &TransformArgs) -> String {
    let delimiter = args.delimiter.as_deref().filter(|d| !d.is_empty()).unwrap_or(" ");
    let limit = args.limit.as_deref().and_then(|l| l.trim().parse::<usize>().ok()).filter(|l| *l > 0);
    let pieces: Vec<&str> = match limit {
        Some(limit) => content.splitn(limit, delimiter).collect(),
        None => content.split(delimiter).collect(),
    };
    pieces.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
}

fn indent(content: &str, args: &TransformArgs) -> String {
    let level = args.level.as_deref().and_then(|l| l.trim().parse::<usize>().ok()).unwrap_or(4);
    let fill = args.fill.as_deref().filter(|c| !c.is_empty()).unwrap_or(" ");
    let prefix = fill.repeat(level);
    content.lines().map(|line| format!("{prefix}{line}")).collect::<Vec<_>>().join("\n")
}

fn dedent(content: &str) -> String {
    let common = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    content.lines().map(|l| l.get(common..).unwrap_or(l.trim_start())).collect::<Vec<_>>().join("\n")
}

fn unique(content: &str, delimiter: Option<&str>) -> String {
    let delimiter = delimiter.filter(|d| !d.is_empty());
    let items: Vec<&str> = match delimiter {
        Some(d) => content.split(d).map(str::trim).filter(|s| !s.is_empty()).collect(),
        None => content.split_whitespace().collect(),
    };
    let mut seen = std::collections::HashSet::new();
    let kept: Vec<&str> = items.into_iter().filter(|item| seen.insert(item.to_lowercase())).collect();
    kept.join(delimiter.unwrap_or(" "))
}

// --- Pluralization ------------------------------------------------------------

static IRREGULAR_PLURALS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("child", "children"),
        ("person", "people"),
        ("man", "men"),
        ("woman", "women"),
        ("mouse", "mice"),
        ("goose", "geese"),
        ("tooth", "teeth"),
        ("foot", "feet"),
        ("ox", "oxen"),
        ("cactus", "cacti"),
        ("datum", "data"),
        ("criterion", "criteria"),
    ])
});

const UNCOUNTABLE: &[&str] = &["sheep", "fish", "deer", "series", "species", "information", "rice", "money", "news"];

fn pluralize_last(content: &str) -> String {
    let trimmed = content.trim_end();
    match trimmed.char_indices().rev().find(|(_, ch)| ch.is_whitespace()) {
        Some((split, ch)) => {
            let (head, last) = trimmed.split_at(split + ch.len_utf8());
            format!("{head}{}", pluralize(last))
        }
        None => pluralize(trimmed),
    }
}

/// Plural of an English noun; already-plural and uncountable nouns are kept.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) || looks_plural(&lower) {
        return word.to_string();
    }
    let plural = match IRREGULAR_PLURALS.get(lower.as_str()) {
        Some(irregular) => irregular.to_string(),
        None => regular_plural(&lower),
    };
    recase(word, &plural)
}

fn looks_plural(lower: &str) -> bool {
    if IRREGULAR_PLURALS.values().any(|p| *p == lower) {
        return true;
    }
    lower.ends_with('s') && !(lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is"))
}

fn regular_plural(lower: &str) -> String {
    let consonant_before = |suffix_len: usize| {
        lower[..lower.len() - suffix_len].chars().last().is_some_and(|c| !"aeiou".contains(c))
    };
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{lower}es")
    } else if lower.ends_with('y') && consonant_before(1) {
        format!("{}ies", &lower[..lower.len() - 1])
    } else if lower.ends_with("fe") {
        format!("{}ves", &lower[..lower.len() - 2])
    } else if lower.ends_with('f') && !lower.ends_with("ff") {
        format!("{}ves", &lower[..lower.len() - 1])
    } else {
        format!("{lower}s")
    }
}

fn recase(original: &str, plural: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        plural.to_uppercase()
    } else if letters.first().is_some_and(|c| c.is_uppercase()) {
        capitalize(plural)
    } else {
        plural.to_string()
    }
}

// --- Substitution tables ------------------------------------------------------

/// Fallback tables for `<person>`, `<person2>` and `<gender>` when the
/// knowledge base defines none.
pub fn default_substitutions(table: &str) -> Vec<(String, String)> {
    let pairs: &[(&str, &str)] = match table {
        "person" => &[
            ("i am", "you are"),
            ("you are", "I am"),
            ("i", "you"),
            ("me", "you"),
            ("my", "your"),
            ("mine", "yours"),
            ("myself", "yourself"),
            ("you", "me"),
            ("your", "my"),
            ("yours", "mine"),
            ("yourself", "myself"),
        ],
        "person2" => &[
            ("i", "he"),
            ("me", "him"),
            ("my", "his"),
            ("mine", "his"),
            ("he", "I"),
            ("him", "me"),
            ("his", "my"),
        ],
        "gender" => &[
            ("he", "she"),
            ("him", "her"),
            ("his", "her"),
            ("himself", "herself"),
            ("she", "he"),
            ("her", "his"),
            ("hers", "his"),
            ("herself", "himself"),
        ],
        _ => &[],
    };
    pairs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn run(t: Transform, content: &str, args: TransformArgs) -> String {
        apply(t, content, &args, &mut StdRng::seed_from_u64(7))
    }

    #[test]
    fn casing_family() {
        let cases = vec![
            (Transform::Uppercase, "hello World", "HELLO WORLD"),
            (Transform::Lowercase, "Hello WORLD", "hello world"),
            (Transform::Formal, "hELLO wORLD", "Hello World"),
            (Transform::Word, "hello mcDonald", "Hello McDonald"),
            (Transform::Sentence, "hi there. how are you? fine", "Hi there. How are you? Fine"),
            (Transform::Capitalize, "hello world", "Hello world"),
            (Transform::Explode, "ab c", "a b c"),
            (Transform::Reverse, "abc", "cba"),
            (Transform::Acronym, "as soon as possible", "ASAP"),
            (Transform::Trim, "  x  ", "x"),
            (Transform::First, "one two three", "one"),
            (Transform::Rest, "one two three", "two three"),
        ];
        for (t, input, expected) in cases {
            assert_eq!(run(t, input, TransformArgs::default()), expected, "{t:?} on {input:?}");
        }
    }

    #[test]
    fn attribute_driven_transforms() {
        let args = |f: fn(&mut TransformArgs)| {
            let mut a = TransformArgs::default();
            f(&mut a);
            a
        };
        assert_eq!(run(Transform::Substring, "abcdef", args(|a| { a.start = Some("1".into()); a.end = Some("4".into()) })), "bcd");
        assert_eq!(run(Transform::Substring, "abc", args(|a| a.start = Some("9".into()))), "");
        assert_eq!(run(Transform::Replace, "a-b-c", args(|a| { a.search = Some("-".into()); a.replace = Some("+".into()) })), "a+b+c");
        assert_eq!(run(Transform::Length, "two words", TransformArgs::default()), "9");
        assert_eq!(run(Transform::Length, "two words", args(|a| a.kind = Some("words".into()))), "2");
        assert_eq!(run(Transform::Count, "a b a", args(|a| a.search = Some("a".into()))), "2");
        assert_eq!(run(Transform::Split, "a,b,c", args(|a| a.delimiter = Some(",".into()))), "a b c");
        assert_eq!(run(Transform::Split, "a,b,c", args(|a| { a.delimiter = Some(",".into()); a.limit = Some("2".into()) })), "a b,c");
        assert_eq!(run(Transform::Join, "a b c", args(|a| a.delimiter = Some("-".into()))), "a-b-c");
        assert_eq!(run(Transform::Indent, "x\ny", args(|a| { a.level = Some("2".into()); a.fill = Some("-".into()) })), "--x\n--y");
        assert_eq!(run(Transform::Indent, "x", TransformArgs::default()), "    x");
        assert_eq!(run(Transform::Dedent, "   a\n     b", TransformArgs::default()), "a\n  b");
        assert_eq!(run(Transform::Unique, "a b A c b", TransformArgs::default()), "a b c");
        assert_eq!(run(Transform::Unique, "x;y;x", args(|a| a.delimiter = Some(";".into()))), "x;y");
    }

    #[test]
    fn pluralization() {
        let cases = vec![
            ("cat", "cats"),
            ("box", "boxes"),
            ("church", "churches"),
            ("city", "cities"),
            ("day", "days"),
            ("knife", "knives"),
            ("leaf", "leaves"),
            ("child", "children"),
            ("Person", "People"),
            ("MOUSE", "MICE"),
            ("sheep", "sheep"),
            ("cats", "cats"),
            ("children", "children"),
            ("class", "classes"),
            ("the big dog", "the big dogs"),
            ("big\u{00A0}dog", "big\u{00A0}dogs"),
            ("大きい\u{3000}cat", "大きい\u{3000}cats"),
            ("\u{00A0}", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(pluralize_last(input), expected, "pluralize({input:?})");
        }
    }

    #[test]
    fn empty_in_empty_out() {
        for t in [Transform::Uppercase, Transform::Explode, Transform::Shuffle, Transform::Length, Transform::Pluralize] {
            assert_eq!(run(t, "", TransformArgs::default()), "");
        }
    }

    #[test]
    fn shuffle_is_reproducible_for_a_seed() {
        let a = run(Transform::Shuffle, "a b c d e f", TransformArgs::default());
        let b = run(Transform::Shuffle, "a b c d e f", TransformArgs::default());
        assert_eq!(a, b);
        let mut sorted: Vec<&str> = a.split(' ').collect();
        sorted.sort_unstable();
        assert_eq!(sorted, vec!["a", "b", "c", "d", "e", "f"]);
    }
}
