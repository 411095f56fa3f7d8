//! `<date>` and `<time>` formatting.
//!
//! A `format` attribute is either a named format, a strftime string (any
//! `%` present) or a Java-style pattern such as `EEEE, MMMM d yyyy`, which
//! is translated field by field. Letter runs that are not all fields, and
//! `'quoted'` text, stay literal. Formats that chrono cannot render fall back
//! to the default named format instead of panicking.

use chrono::NaiveDateTime;
use chrono::format::{Item, StrftimeItems};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    Date,
    Time,
}

impl Clock {
    fn named(self, name: &str) -> Option<&'static str> {
        let format = match (self, name.trim().to_ascii_lowercase().as_str()) {
            (Clock::Date, "short") => "%m/%d/%y",
            (Clock::Date, "" | "medium" | "default") => "%B %d, %Y",
            (Clock::Date, "long" | "full") => "%A, %B %d, %Y",
            (Clock::Date, "iso") => "%Y-%m-%d",
            (Clock::Date, "day") => "%A",
            (Clock::Date, "month") => "%B",
            (Clock::Date, "year") => "%Y",
            (Clock::Time, "short") => "%H:%M",
            (Clock::Time, "" | "medium" | "default") => "%H:%M:%S",
            (Clock::Time, "long" | "full") => "%I:%M:%S %p",
            (Clock::Time, "iso") => "%H:%M:%S",
            (Clock::Time, "hour") => "%H",
            _ => return None,
        };
        Some(format)
    }

    fn fallback(self) -> &'static str {
        self.named("").unwrap_or("%c")
    }
}

/// strftime equivalent of a run of `count` copies of the Java pattern letter `letter`.
fn java_field(letter: char, count: usize) -> Option<&'static str> {
    let field = match (letter, count) {
        ('y', 2) => "%y",
        ('y', _) => "%Y",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', _) => "%B",
        ('E', 1..=3) => "%a",
        ('E', _) => "%A",
        ('d', 1) => "%-d",
        ('d', 2) => "%d",
        ('H', 1) => "%-H",
        ('H', 2) => "%H",
        ('h', 1) => "%-I",
        ('h', 2) => "%I",
        ('m', 1) => "%-M",
        ('m', 2) => "%M",
        ('s', 1) => "%-S",
        ('s', 2) => "%S",
        ('a', 1) => "%p",
        _ => return None,
    };
    Some(field)
}

/// Translate a word made only of pattern-letter runs, or `None` when any run
/// is not a field (so the word is literal text).
fn translate_word(word: &str) -> Option<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let letter = chars[i];
        let count = chars[i..].iter().take_while(|&&c| c == letter).count();
        out.push_str(java_field(letter, count)?);
        i += count;
    }
    Some(out)
}

fn push_literal(out: &mut String, text: &str) {
    out.push_str(&text.replace('%', "%%"));
}

/// Translate a Java-style pattern into strftime. `'...'` quotes literal text
/// and `''` is a single quote.
pub fn translate_format(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            let mut quoted = String::new();
            while let Some(q) = chars.next() {
                if q != '\'' {
                    quoted.push(q);
                } else if chars.peek() == Some(&'\'') {
                    chars.next();
                    quoted.push('\'');
                } else {
                    break;
                }
            }
            push_literal(&mut out, &quoted);
        } else if c.is_ascii_alphabetic() {
            let mut word = String::from(c);
            while let Some(&next) = chars.peek().filter(|n| n.is_ascii_alphabetic()) {
                word.push(next);
                chars.next();
            }
            match translate_word(&word) {
                Some(fields) => out.push_str(&fields),
                None => push_literal(&mut out, &word),
            }
        } else {
            push_literal(&mut out, c.encode_utf8(&mut [0; 4]));
        }
    }
    out
}

fn resolve_format(clock: Clock, format: Option<&str>) -> String {
    let Some(format) = format.filter(|f| !f.trim().is_empty()) else {
        return clock.fallback().to_string();
    };
    if let Some(named) = clock.named(format) {
        return named.to_string();
    }
    if format.contains('%') { format.to_string() } else { translate_format(format) }
}

pub fn format_clock(clock: Clock, now: NaiveDateTime, format: Option<&str>) -> String {
    let format = resolve_format(clock, format);
    let valid = StrftimeItems::new(&format).all(|item| !matches!(item, Item::Error));
    let format = if valid { format.as_str() } else { clock.fallback() };
    now.format(format).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn reference() -> NaiveDateTime {
        let date = NaiveDate::from_ymd_opt(2013, 2, 12).unwrap();
        let time = NaiveTime::from_hms_opt(16, 30, 5).unwrap();
        NaiveDateTime::new(date, time)
    }

    #[test]
    fn named_and_custom_formats() {
        let now = reference();
        let cases = vec![
            (Clock::Date, None, "February 12, 2013"),
            (Clock::Date, Some("short"), "02/12/13"),
            (Clock::Date, Some("long"), "Tuesday, February 12, 2013"),
            (Clock::Date, Some("iso"), "2013-02-12"),
            (Clock::Date, Some("dd/MM/yyyy"), "12/02/2013"),
            (Clock::Date, Some("EEEE d MMMM"), "Tuesday 12 February"),
            (Clock::Date, Some("%Y"), "2013"),
            (Clock::Time, None, "16:30:05"),
            (Clock::Time, Some("short"), "16:30"),
            (Clock::Time, Some("hh:mm a"), "04:30 PM"),
            (Clock::Time, Some("broken %"), "16:30:05"),
            (Clock::Date, Some("'Today is' EEEE"), "Today is Tuesday"),
            (Clock::Date, Some("Today EEEE"), "Today Tuesday"),
            (Clock::Date, Some("yyyyMMdd"), "20130212"),
            (Clock::Time, Some("h 'o''clock' a"), "4 o'clock PM"),
            (Clock::Date, Some("d MMM ''yy"), "12 Feb '13"),
        ];
        for (clock, format, expected) in cases {
            assert_eq!(format_clock(clock, now, format), expected, "{clock:?} {format:?}");
        }
    }
}
