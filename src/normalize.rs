//! Text normalization.
//!
//! Every piece of text that takes part in matching (user input, rule
//! patterns, that-patterns, topics) goes through the same canonicalization
//! so that comparisons can be done on plain, space-separated upper-case
//! tokens:
//!
//! ```text
//! "  Don't  stop,  me-now! "
//!   trim / uppercase        -> "DON'T  STOP,  ME-NOW!"
//!   collapse whitespace     -> "DON'T STOP, ME-NOW!"
//!   expand contractions     -> "DO NOT STOP, ME-NOW!"
//!   strip punctuation, - _  -> "DO NOT STOP ME NOW"
//! ```
//!
//! Three entry points share that pipeline:
//!
//! - [`normalize`]: the canonical, upper-cased form used as a matching key.
//! - [`normalize_preserving_case`]: identical token stream with the user's
//!   casing kept, used to recover wildcard captures as they were typed.
//! - [`normalize_pattern`]: the rule-side variant. Wildcard tokens,
//!   alternation groups and embedded `<set>`/`<topic>`/`<bot/>` markers are
//!   carried through untouched (placeholder-substitute, normalize, restore).
//!
//! ## Invariants
//!
//! - `normalize(normalize(x)) == normalize(x)`.
//! - `normalize(x)` and `normalize_preserving_case(x)` have the same number
//!   of tokens, so a capture span found on one can be replayed on the other.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Contractions expanded before apostrophes are stripped.
///
/// Expansions never contain an apostrophe, which is what keeps
/// normalization idempotent.
const CONTRACTIONS: &[(&str, &str)] = &[
    ("ain't", "is not"),
    ("aren't", "are not"),
    ("can't", "can not"),
    ("could've", "could have"),
    ("couldn't", "could not"),
    ("didn't", "did not"),
    ("doesn't", "does not"),
    ("don't", "do not"),
    ("hadn't", "had not"),
    ("hasn't", "has not"),
    ("haven't", "have not"),
    ("he'd", "he would"),
    ("he'll", "he will"),
    ("he's", "he is"),
    ("here's", "here is"),
    ("how's", "how is"),
    ("i'd", "i would"),
    ("i'll", "i will"),
    ("i'm", "i am"),
    ("i've", "i have"),
    ("isn't", "is not"),
    ("it'd", "it would"),
    ("it'll", "it will"),
    ("it's", "it is"),
    ("let's", "let us"),
    ("might've", "might have"),
    ("must've", "must have"),
    ("mustn't", "must not"),
    ("shan't", "shall not"),
    ("she'd", "she would"),
    ("she'll", "she will"),
    ("she's", "she is"),
    ("should've", "should have"),
    ("shouldn't", "should not"),
    ("that's", "that is"),
    ("there's", "there is"),
    ("they'd", "they would"),
    ("they'll", "they will"),
    ("they're", "they are"),
    ("they've", "they have"),
    ("wasn't", "was not"),
    ("we'd", "we would"),
    ("we'll", "we will"),
    ("we're", "we are"),
    ("we've", "we have"),
    ("weren't", "were not"),
    ("what're", "what are"),
    ("what's", "what is"),
    ("where's", "where is"),
    ("who's", "who is"),
    ("won't", "will not"),
    ("would've", "would have"),
    ("wouldn't", "would not"),
    ("y'all", "you all"),
    ("you'd", "you would"),
    ("you'll", "you will"),
    ("you're", "you are"),
    ("you've", "you have"),
];

/// Expansions folded back into contractions by [`denormalize`].
const RECONTRACTIONS: &[(&str, &str)] = &[
    ("do not", "don't"),
    ("does not", "doesn't"),
    ("did not", "didn't"),
    ("can not", "can't"),
    ("will not", "won't"),
    ("is not", "isn't"),
    ("are not", "aren't"),
    ("i am", "I'm"),
    ("it is", "it's"),
    ("that is", "that's"),
    ("what is", "what's"),
    ("you are", "you're"),
    ("let us", "let's"),
];

/// Characters removed outright. Apostrophes go last, after contractions.
const STRIPPED: &[char] = &['.', ',', '!', '?', ';', ':', '\''];

/// Single-character tokens that keep their meaning inside patterns.
const WILDCARD_TOKENS: &[&str] = &["*", "_", "^", "#"];

static CONTRACTION_RE: Lazy<Regex> = Lazy::new(|| {
    let mut keys: Vec<&str> = CONTRACTIONS.iter().map(|(k, _)| *k).collect();
    // Longest match first; the regex engine prefers earlier alternatives.
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let body = keys.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?i)\b(?:{body})\b")).expect("contraction table compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Input,
    PreserveCase,
    Pattern,
}

/// Canonicalize `text` into its matchable, upper-case form.
///
/// ```
/// assert_eq!(quill::normalize("  Don't   panic, Bob!  "), "DO NOT PANIC BOB");
/// ```
pub fn normalize(text: &str) -> String {
    canonicalize(text, Mode::Input)
}

/// Same as [`normalize`] but keeps the original casing of each token.
pub fn normalize_preserving_case(text: &str) -> String {
    canonicalize(text, Mode::PreserveCase)
}

/// Normalize rule-side text (patterns, that-patterns, topics).
///
/// Wildcards (`* _ ^ #`, `$` prefixes), alternation groups and embedded
/// `<set>`, `<topic>` and `<bot name=".."/>` markers survive verbatim.
pub fn normalize_pattern(text: &str) -> String {
    let mut markers: Vec<String> = Vec::new();
    let marker_re =
        regex!(r#"(?i)<set>\s*[^<]*?\s*</set>|<topic>\s*[^<]*?\s*</topic>|<bot\s+name\s*=\s*"[^"]*"\s*/>"#);
    let protected = marker_re.replace_all(text, |caps: &Captures| {
        let idx = markers.len();
        markers.push(caps[0].trim().to_string());
        format!(" \u{E000}{idx}\u{E001} ")
    });

    let canonical = canonicalize(&protected, Mode::Pattern);
    if markers.is_empty() {
        return canonical;
    }

    regex!("\u{E000}(\\d+)\u{E001}")
        .replace_all(&canonical, |caps: &Captures| {
            caps[1].parse::<usize>().ok().and_then(|i| markers.get(i).cloned()).unwrap_or_default()
        })
        .into_owned()
}

fn canonicalize(text: &str, mode: Mode) -> String {
    let trimmed = text.trim().replace(['\u{2018}', '\u{2019}'], "'");
    let cased = match mode {
        Mode::Input | Mode::Pattern => trimmed.to_uppercase(),
        Mode::PreserveCase => trimmed,
    };
    let collapsed = collapse_whitespace(&cased);
    let expanded = expand_contractions(&collapsed, mode);

    let mut out: Vec<String> = Vec::new();
    for token in expanded.split_whitespace() {
        if mode == Mode::Pattern && (WILDCARD_TOKENS.contains(&token) || token.starts_with('\u{E000}')) {
            out.push(token.to_string());
            continue;
        }
        let mut cleaned = String::with_capacity(token.len());
        for c in token.chars() {
            match c {
                '-' | '_' => cleaned.push(' '),
                c if STRIPPED.contains(&c) => {}
                c => cleaned.push(c),
            }
        }
        out.extend(cleaned.split_whitespace().map(str::to_string));
    }
    out.join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn expand_contractions(text: &str, mode: Mode) -> String {
    CONTRACTION_RE
        .replace_all(text, |caps: &Captures| {
            let matched = &caps[0];
            let key = matched.to_lowercase();
            let expansion = CONTRACTIONS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v).unwrap_or(matched);
            match mode {
                Mode::Input | Mode::Pattern => expansion.to_uppercase(),
                Mode::PreserveCase => match_case(matched, expansion),
            }
        })
        .into_owned()
}

/// Re-case `expansion` after the casing of `original`.
fn match_case(original: &str, expansion: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    let all_upper = letters.len() > 1 && letters.iter().all(|c| c.is_uppercase());
    if all_upper {
        return expansion.to_uppercase();
    }
    if letters.first().is_some_and(|c| c.is_uppercase()) {
        return capitalize_first(expansion);
    }
    expansion.to_string()
}

pub(crate) fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply an ordered substitution table in a single left-to-right pass.
///
/// Patterns are compared word by word, case-insensitively. At each position
/// the first entry (in table order) whose words match wins, and replaced
/// text is never re-scanned, so swapping tables such as `I -> you`,
/// `you -> me` behave.
pub fn apply_substitutions(table: &[(String, String)], text: &str) -> String {
    if table.is_empty() {
        return text.to_string();
    }
    let entries: Vec<(Vec<String>, &str)> = table
        .iter()
        .filter_map(|(pattern, replacement)| {
            let words: Vec<String> = pattern.split_whitespace().map(str::to_lowercase).collect();
            (!words.is_empty()).then_some((words, replacement.as_str()))
        })
        .collect();

    let tokens: Vec<&str> = text.split_whitespace().collect();
    let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    'outer: while i < tokens.len() {
        for (words, replacement) in &entries {
            let end = i + words.len();
            if end <= tokens.len() && lowered[i..end] == words[..] {
                if !replacement.is_empty() {
                    out.push(replacement.to_string());
                }
                i = end;
                continue 'outer;
            }
        }
        out.push(tokens[i].to_string());
        i += 1;
    }
    out.join(" ")
}

/// Approximately invert [`normalize`] for display.
///
/// With a `denormal` table the table is applied as-is. Without one the text
/// is lower-cased, common expansions are contracted again and the first
/// letter (and the pronoun "I") is capitalized.
pub fn denormalize(text: &str, table: Option<&[(String, String)]>) -> String {
    if let Some(table) = table.filter(|t| !t.is_empty()) {
        return apply_substitutions(table, text);
    }
    let table: Vec<(String, String)> =
        RECONTRACTIONS.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let lowered = collapse_whitespace(&text.to_lowercase());
    let contracted = apply_substitutions(&table, &lowered);
    let fixed: Vec<&str> = contracted.split(' ').map(|w| if w == "i" { "I" } else { w }).collect();
    capitalize_first(&fixed.join(" "))
}

/// Split text into sentences on `.`, `!` and `?` boundaries.
///
/// Terminal punctuation stays attached to its sentence; empty fragments are
/// dropped. Text without terminal punctuation is a single sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            while let Some(&next) = chars.peek() {
                if matches!(next, '.' | '!' | '?') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek().is_none_or(|n| n.is_whitespace()) {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form() {
        let cases = vec![
            ("hello", "HELLO"),
            ("  Hello,   World!  ", "HELLO WORLD"),
            ("don't stop", "DO NOT STOP"),
            ("I'm here; you're there.", "I AM HERE YOU ARE THERE"),
            ("Bob\u{2019}s car", "BOBS CAR"),
            ("well-known snake_case", "WELL KNOWN SNAKE CASE"),
            ("Won't you?", "WILL NOT YOU"),
            ("", ""),
            ("?!.", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize(input), expected, "normalize({input:?})");
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Hello there, General Kenobi!",
            "don't DON'T Don't",
            "a_b-c d__e",
            "  what's   up?? ",
            "it's 5 o'clock",
            "I'M FINE",
            "ß straße",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn case_preserving_variant_keeps_token_count() {
        let samples = ["Hello Bob", "I'm Bob Smith, okay?", "DON'T go", "Mary-Jane's house"];
        for s in samples {
            let upper = normalize(s);
            let kept = normalize_preserving_case(s);
            assert_eq!(upper.split(' ').count(), kept.split(' ').count(), "input {s:?}");
            assert_eq!(kept.to_uppercase(), upper);
        }
        assert_eq!(normalize_preserving_case("I'm Bob"), "I am Bob");
        assert_eq!(normalize_preserving_case("DON'T go"), "DO NOT go");
    }

    #[test]
    fn pattern_markers_survive() {
        assert_eq!(normalize_pattern("i like <set>colors</set> a lot"), "I LIKE <set>colors</set> A LOT");
        assert_eq!(normalize_pattern("my name is <bot name=\"name\"/>"), "MY NAME IS <bot name=\"name\"/>");
        assert_eq!(normalize_pattern("<topic>Games</topic> rock"), "<topic>Games</topic> ROCK");
        assert_eq!(normalize_pattern("hello _ and * or ^ #"), "HELLO _ AND * OR ^ #");
        assert_eq!(normalize_pattern("$who are you"), "$WHO ARE YOU");
        assert_eq!(normalize_pattern("i (like|love) it"), "I (LIKE|LOVE) IT");
    }

    #[test]
    fn substitutions_are_single_pass() {
        let table: Vec<(String, String)> = vec![
            ("i am".into(), "you are".into()),
            ("you are".into(), "I am".into()),
            ("i".into(), "you".into()),
            ("you".into(), "me".into()),
        ];
        assert_eq!(apply_substitutions(&table, "I am sure you are"), "you are sure I am");
        assert_eq!(apply_substitutions(&table, "I like you"), "you like me");
        assert_eq!(apply_substitutions(&[], "unchanged text"), "unchanged text");
    }

    #[test]
    fn denormalize_for_display() {
        assert_eq!(denormalize("I AM SURE IT IS FINE", None), "I'm sure it's fine");
        let table = vec![("dot com".to_string(), ".com".to_string())];
        assert_eq!(denormalize("example dot com", Some(&table)), "example .com");
    }

    #[test]
    fn sentence_splitting() {
        assert_eq!(split_sentences("Hi there. How are you?"), vec!["Hi there.", "How are you?"]);
        assert_eq!(split_sentences("no punctuation"), vec!["no punctuation"]);
        assert_eq!(split_sentences("Wait... what?!"), vec!["Wait...", "what?!"]);
        assert_eq!(split_sentences("version 1.2 is out"), vec!["version 1.2 is out"]);
        assert!(split_sentences("   ").is_empty());
    }
}
