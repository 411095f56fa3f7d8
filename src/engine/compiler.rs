//! Pattern compilation and priority scoring.
//!
//! A rule pattern is first split into [`PatternToken`]s (cheap, done once
//! at insertion time to derive gating metadata) and then, on demand,
//! compiled into a [`CompiledPattern`]: a single anchored regex over the
//! space-prefixed normalized input plus the metadata used for priority
//! scoring.
//!
//! ```text
//! "* IS <set>color</set> _"
//!   tokenize  -> [Wildcard(*), Word(IS), Set(color), Wildcard(_)]
//!   compile   -> ^((?: \S+)*?) IS (RED|BLUE|GREEN) (\S+)$
//!   score     -> tier(*) - 100*2 + 10*1 + start(1) + end(3)
//! ```
//!
//! Compilation depends on the current Set/Topic/Property contents (marker
//! tokens expand to their members), which is why compiled patterns are cached
//! against the knowledge base's `set_revision` rather than stored on rules.
//!
//! ## Tiers
//!
//! | Token        | Matches             | Tier base |
//! |--------------|---------------------|-----------|
//! | `$WORD`      | that literal word   | 10000     |
//! | (no wildcard)| exact literal       | 8000      |
//! | `#`          | zero or more tokens | 7000      |
//! | `_`          | exactly one token   | 6000      |
//! | `^`          | zero or more tokens | 5000      |
//! | `*`          | zero or more tokens | 4000      |
//!
//! A pattern's tier is the `$` tier when it carries an exact token, the
//! literal tier when it has no wildcard, and otherwise the tier of its
//! lowest-priority wildcard.

use crate::normalize::{normalize, normalize_pattern};
use crate::{EngineError, WildcardKind};
use regex::Regex;

pub const WILDCARD_PENALTY: i64 = 100;
pub const WORD_BONUS: i64 = 10;
pub const POSITION_BONUS_MIDDLE: i64 = 5;
pub const POSITION_BONUS_END: i64 = 3;
pub const POSITION_BONUS_START: i64 = 1;

pub const THAT_BONUS: i64 = 2_000;
pub const THAT_EXACT_BONUS: i64 = 3_000;
pub const THAT_INDEX_BONUS: i64 = 4_000;
pub const TOPIC_BONUS: i64 = 1_000;

bitflags::bitflags! {
    /// Which kinds of tokens occur in a pattern.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TokenKinds: u16 {
        const DOLLAR      = 1 << 0;
        const HASH        = 1 << 1;
        const UNDERSCORE  = 1 << 2;
        const CARET       = 1 << 3;
        const STAR        = 1 << 4;
        const SET_REF     = 1 << 5;
        const TOPIC_REF   = 1 << 6;
        const BOT_REF     = 1 << 7;
        const ALTERNATION = 1 << 8;
        const WORD        = 1 << 9;
    }
}

/// Lookup of the collections a pattern may reference.
pub trait PatternContext {
    fn set_members(&self, name: &str) -> Option<&[String]>;
    fn topic_members(&self, name: &str) -> Option<&[String]>;
    fn property(&self, name: &str) -> Option<&str>;
}

/// Priority tier of a whole pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Star,
    Caret,
    Underscore,
    Hash,
    Literal,
    Exact,
}

impl Tier {
    pub fn base(self) -> i64 {
        match self {
            Tier::Exact => 10_000,
            Tier::Literal => 8_000,
            Tier::Hash => 7_000,
            Tier::Underscore => 6_000,
            Tier::Caret => 5_000,
            Tier::Star => 4_000,
        }
    }

    fn of_wildcard(kind: WildcardKind) -> Tier {
        match kind {
            WildcardKind::Dollar => Tier::Exact,
            WildcardKind::Hash => Tier::Hash,
            WildcardKind::Underscore => Tier::Underscore,
            WildcardKind::Caret => Tier::Caret,
            WildcardKind::Star => Tier::Star,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    Word(String),
    /// `$WORD`: a literal with the highest priority.
    Exact(String),
    Wildcard(WildcardKind),
    Set(String),
    Topic(String),
    Bot(String),
    Alternation(Vec<String>),
}

impl PatternToken {
    /// Wildcard kind this token behaves as during matching, if any.
    ///
    /// Marker tokens are resolved lazily; tokenization alone cannot know
    /// whether a set exists, so they report `None` here.
    fn wildcard(&self) -> Option<WildcardKind> {
        match self {
            PatternToken::Wildcard(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Split a normalized pattern into tokens, validating its structure.
pub fn tokenize(pattern: &str) -> Result<Vec<PatternToken>, String> {
    let mut tokens = Vec::new();
    let mut rest = pattern.trim();

    while !rest.is_empty() {
        if let Some(after) = strip_prefix_ci(rest, "<set>") {
            let (name, tail) = take_marker(after, "</set>")?;
            tokens.push(PatternToken::Set(name));
            rest = tail;
        } else if let Some(after) = strip_prefix_ci(rest, "<topic>") {
            let (name, tail) = take_marker(after, "</topic>")?;
            tokens.push(PatternToken::Topic(name));
            rest = tail;
        } else if rest.starts_with("<bot") {
            let caps = regex!(r#"^<bot\s+name\s*=\s*"([^"]*)"\s*/>"#)
                .captures(rest)
                .ok_or_else(|| "malformed <bot/> marker".to_string())?;
            let name = caps[1].trim().to_string();
            if name.is_empty() {
                return Err("empty <bot/> name".to_string());
            }
            rest = &rest[caps[0].len()..];
            tokens.push(PatternToken::Bot(name));
        } else if rest.starts_with('<') {
            return Err("unbalanced or unsupported markup in pattern".to_string());
        } else if let Some(after) = rest.strip_prefix('(') {
            let close = after.find(')').ok_or_else(|| "unbalanced '(' in pattern".to_string())?;
            let group = &after[..close];
            if group.contains('(') {
                return Err("nested alternation groups are not supported".to_string());
            }
            let options: Vec<String> = group.split('|').map(|o| o.split_whitespace().collect::<Vec<_>>().join(" ")).collect();
            if options.len() < 2 || options.iter().any(|o| o.is_empty()) {
                return Err(format!("alternation '({group})' needs at least two non-empty options"));
            }
            if let Some(bad) = options.iter().find(|o| o.chars().any(is_disallowed_in_word)) {
                return Err(format!("disallowed character in alternation option '{bad}'"));
            }
            tokens.push(PatternToken::Alternation(options));
            rest = &after[close + 1..];
        } else if rest.starts_with(')') {
            return Err("unbalanced ')' in pattern".to_string());
        } else {
            let end = rest.find(|c: char| c.is_whitespace() || c == '<' || c == '(').unwrap_or(rest.len());
            let word = &rest[..end];
            rest = &rest[end..];
            tokens.push(classify_word(word)?);
        }
        rest = rest.trim_start();
    }

    if tokens.is_empty() {
        return Err("empty pattern".to_string());
    }
    Ok(tokens)
}

fn classify_word(word: &str) -> Result<PatternToken, String> {
    if let Some(kind) = WildcardKind::from_token(word) {
        return Ok(PatternToken::Wildcard(kind));
    }
    if let Some(literal) = word.strip_prefix('$') {
        if literal.is_empty() || literal.chars().any(is_disallowed_in_word) {
            return Err(format!("malformed exact token '{word}'"));
        }
        return Ok(PatternToken::Exact(literal.to_string()));
    }
    if word.chars().any(is_disallowed_in_word) {
        return Err(format!("disallowed character in '{word}'"));
    }
    Ok(PatternToken::Word(word.to_string()))
}

fn is_disallowed_in_word(c: char) -> bool {
    c.is_control() || matches!(c, '<' | '>' | '|' | '(' | ')' | '{' | '}' | '[' | ']' | '\\' | '"' | '`' | '*' | '^' | '#' | '$')
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

fn take_marker<'a>(after: &'a str, close: &str) -> Result<(String, &'a str), String> {
    let lower = after.to_ascii_lowercase();
    let end = lower.find(close).ok_or_else(|| format!("missing {close} in pattern"))?;
    let name = after[..end].trim();
    if name.is_empty() || name.contains('<') {
        return Err(format!("malformed marker before {close}"));
    }
    Ok((name.to_string(), &after[end + close.len()..]))
}

/// Check a rule-side pattern without compiling it.
pub fn validate_pattern(pattern: &str, max_wildcards: usize) -> Result<Vec<PatternToken>, EngineError> {
    let normalized = normalize_pattern(pattern);
    let tokens = tokenize(&normalized).map_err(|reason| EngineError::malformed(pattern, reason))?;
    let wildcards = tokens.iter().filter(|t| t.wildcard().is_some()).count();
    if wildcards > max_wildcards {
        return Err(EngineError::malformed(pattern, format!("{wildcards} wildcards (limit {max_wildcards})")));
    }
    Ok(tokens)
}

/// The plain literal text of a token list, when it has no wildcards or
/// markers. `$` prefixes are dropped.
pub fn literal_text(tokens: &[PatternToken]) -> Option<String> {
    let mut words = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            PatternToken::Word(w) | PatternToken::Exact(w) => words.push(w.as_str()),
            _ => return None,
        }
    }
    Some(words.join(" "))
}

/// Literal words every input must contain for the pattern to match.
pub fn anchor_words(tokens: &[PatternToken]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(|t| match t {
            PatternToken::Word(w) | PatternToken::Exact(w) => Some(w.to_uppercase()),
            _ => None,
        })
        .collect()
}

/// A pattern compiled against a snapshot of Sets/Topics/Properties.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    regex: Option<Regex>,
    pub kinds: TokenKinds,
    pub tier: Tier,
    pub wildcard_count: usize,
    pub literal_words: usize,
    pub position_bonus: i64,
    pub capture_count: usize,
}

impl CompiledPattern {
    /// Score from the pattern alone (no that/topic bonuses).
    pub fn base_score(&self) -> i64 {
        self.tier.base() - WILDCARD_PENALTY * self.wildcard_count as i64
            + WORD_BONUS * self.literal_words as i64
            + self.position_bonus
    }

    pub fn is_exact(&self) -> bool {
        self.wildcard_count == 0
    }

    /// Match `text` (already normalized, any casing) and return the captured
    /// wildcard values in left-to-right order.
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        let regex = self.regex.as_ref()?;
        let haystack = if text.is_empty() { String::new() } else { format!(" {text}") };
        let caps = regex.captures(&haystack)?;
        Some((1..caps.len()).map(|i| caps.get(i).map(|m| m.as_str().trim().to_string()).unwrap_or_default()).collect())
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.captures(text).is_some()
    }
}

/// Compile `pattern` against the collections in `ctx`.
pub fn compile(pattern: &str, ctx: &dyn PatternContext) -> Result<CompiledPattern, EngineError> {
    let normalized = normalize_pattern(pattern);
    let tokens = tokenize(&normalized).map_err(|reason| EngineError::malformed(pattern, reason))?;

    let mut body = String::from("(?i)^");
    let mut kinds = TokenKinds::empty();
    let mut wildcard_kinds: Vec<WildcardKind> = Vec::new();
    let mut wildcard_positions: Vec<usize> = Vec::new();
    let mut literal_words = 0usize;
    let mut capture_count = 0usize;
    let mut never_matches = false;

    for (pos, token) in tokens.iter().enumerate() {
        match token {
            PatternToken::Word(w) => {
                kinds |= TokenKinds::WORD;
                literal_words += 1;
                body.push(' ');
                body.push_str(&regex::escape(w));
            }
            PatternToken::Exact(w) => {
                kinds |= TokenKinds::DOLLAR;
                literal_words += 1;
                body.push(' ');
                body.push_str(&regex::escape(w));
            }
            PatternToken::Wildcard(kind) => {
                kinds |= match kind {
                    WildcardKind::Hash => TokenKinds::HASH,
                    WildcardKind::Underscore => TokenKinds::UNDERSCORE,
                    WildcardKind::Caret => TokenKinds::CARET,
                    WildcardKind::Star => TokenKinds::STAR,
                    WildcardKind::Dollar => TokenKinds::DOLLAR,
                };
                wildcard_kinds.push(*kind);
                wildcard_positions.push(pos);
                capture_count += 1;
                if *kind == WildcardKind::Underscore {
                    body.push_str(r" (\S+)");
                } else {
                    body.push_str(r"((?: \S+)*?)");
                }
            }
            PatternToken::Set(name) | PatternToken::Topic(name) => {
                let members = if matches!(token, PatternToken::Set(_)) {
                    kinds |= TokenKinds::SET_REF;
                    ctx.set_members(name)
                } else {
                    kinds |= TokenKinds::TOPIC_REF;
                    ctx.topic_members(name)
                };
                capture_count += 1;
                match members {
                    Some(members) => match member_alternation(members) {
                        Some(alt) => {
                            body.push_str(" (");
                            body.push_str(&alt);
                            body.push(')');
                        }
                        None => never_matches = true,
                    },
                    None => {
                        wildcard_kinds.push(WildcardKind::Underscore);
                        wildcard_positions.push(pos);
                        body.push_str(r" (\S+)");
                    }
                }
            }
            PatternToken::Bot(name) => {
                kinds |= TokenKinds::BOT_REF;
                let words = ctx.property(name).map(normalize).filter(|w| !w.is_empty());
                match words {
                    Some(words) => {
                        literal_words += words.split(' ').count();
                        body.push(' ');
                        body.push_str(&regex::escape(&words));
                    }
                    None => {
                        wildcard_kinds.push(WildcardKind::Underscore);
                        wildcard_positions.push(pos);
                        body.push_str(r" \S+");
                    }
                }
            }
            PatternToken::Alternation(options) => {
                kinds |= TokenKinds::ALTERNATION;
                literal_words += 1;
                let alt = member_alternation(options).unwrap_or_default();
                body.push_str(" (?:");
                body.push_str(&alt);
                body.push(')');
            }
        }
    }
    body.push('$');

    let tier = if kinds.contains(TokenKinds::DOLLAR) {
        Tier::Exact
    } else {
        wildcard_kinds.iter().map(|k| Tier::of_wildcard(*k)).min().unwrap_or(Tier::Literal)
    };

    let count = tokens.len();
    let position_bonus = wildcard_positions
        .iter()
        .map(|&pos| {
            if pos == 0 {
                POSITION_BONUS_START
            } else if pos + 1 == count {
                POSITION_BONUS_END
            } else {
                POSITION_BONUS_MIDDLE
            }
        })
        .sum();

    let regex = if never_matches {
        None
    } else {
        Some(Regex::new(&body).map_err(|e| EngineError::malformed(pattern, e.to_string()))?)
    };

    Ok(CompiledPattern {
        source: normalized,
        regex,
        kinds,
        tier,
        wildcard_count: wildcard_kinds.len(),
        literal_words,
        position_bonus,
        capture_count,
    })
}

/// `A|B|C` over normalized, escaped members, longest first.
fn member_alternation(members: &[String]) -> Option<String> {
    let mut options: Vec<String> = members.iter().map(|m| normalize(m)).filter(|m| !m.is_empty()).collect();
    if options.is_empty() {
        return None;
    }
    options.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    options.dedup();
    Some(options.iter().map(|o| regex::escape(o)).collect::<Vec<_>>().join("|"))
}
