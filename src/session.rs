//! Per-conversation state.
//!
//! A [`Session`] is owned by the caller and handed to the engine as
//! `&mut Session` for each turn, which is what serializes turns of the same
//! conversation. Histories are bounded FIFOs, most recent first.

use std::collections::{BTreeMap, VecDeque};

/// Topic bucket used while no topic is set.
pub const DEFAULT_TOPIC_BUCKET: &str = "default";

/// Reserved variable name mirrored into [`Session::topic`].
pub const TOPIC_VARIABLE: &str = "topic";

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    depth: usize,
    requests: VecDeque<String>,
    responses: VecDeque<String>,
    /// Normalized last sentence of each response, used as that-context.
    thats: VecDeque<String>,
    topic: Option<String>,
    vars: BTreeMap<String, String>,
    topic_vars: BTreeMap<String, BTreeMap<String, String>>,
    draws: u64,
}

impl Session {
    /// Session with the default history depth. `Engine::session` uses the
    /// engine's configured depth instead.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_history_depth(id, crate::Config::default().history_depth)
    }

    pub fn with_history_depth(id: impl Into<String>, depth: usize) -> Self {
        Session {
            id: id.into(),
            depth: depth.max(1),
            requests: VecDeque::new(),
            responses: VecDeque::new(),
            thats: VecDeque::new(),
            topic: None,
            vars: BTreeMap::new(),
            topic_vars: BTreeMap::new(),
            draws: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history_depth(&self) -> usize {
        self.depth
    }

    // --- Histories ----------------------------------------------------------

    /// Record one request/response exchange, evicting the oldest beyond depth.
    pub fn record(&mut self, request: impl Into<String>, response: impl Into<String>, that: impl Into<String>) {
        push_bounded(&mut self.requests, request.into(), self.depth);
        push_bounded(&mut self.responses, response.into(), self.depth);
        push_bounded(&mut self.thats, that.into(), self.depth);
    }

    /// `index` is 1-based, 1 = most recent.
    pub fn request(&self, index: usize) -> Option<&str> {
        nth(&self.requests, index)
    }

    pub fn response(&self, index: usize) -> Option<&str> {
        nth(&self.responses, index)
    }

    /// Normalized that-context of the `index`-th most recent response.
    pub fn that(&self, index: usize) -> Option<&str> {
        nth(&self.thats, index)
    }

    /// That-contexts, most recent first.
    pub fn that_history(&self) -> Vec<String> {
        self.thats.iter().cloned().collect()
    }

    pub fn requests(&self) -> impl Iterator<Item = &str> {
        self.requests.iter().map(String::as_str)
    }

    pub fn responses(&self) -> impl Iterator<Item = &str> {
        self.responses.iter().map(String::as_str)
    }

    // --- Topic ----------------------------------------------------------------

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Set the current topic; a blank value clears it.
    pub fn set_topic(&mut self, topic: &str) {
        let trimmed = topic.trim();
        self.topic = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    fn topic_bucket(&self) -> String {
        self.topic.as_deref().map(str::to_lowercase).unwrap_or_else(|| DEFAULT_TOPIC_BUCKET.to_string())
    }

    // --- Variables ------------------------------------------------------------

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Write a session variable. `topic` also moves the session topic.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_lowercase();
        let value = value.into();
        if name == TOPIC_VARIABLE {
            self.set_topic(&value);
        }
        self.vars.insert(name, value);
    }

    pub fn remove_var(&mut self, name: &str) -> Option<String> {
        self.vars.remove(&name.to_lowercase())
    }

    /// Variable in the bucket of the current topic.
    pub fn topic_var(&self, name: &str) -> Option<&str> {
        self.topic_vars.get(&self.topic_bucket())?.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn set_topic_var(&mut self, name: &str, value: impl Into<String>) {
        let bucket = self.topic_bucket();
        self.topic_vars.entry(bucket).or_default().insert(name.to_lowercase(), value.into());
    }

    // --- Randomness ---------------------------------------------------------

    /// Next value of the draw counter feeding `random` and `shuffle`.
    pub(crate) fn next_draw(&mut self) -> u64 {
        let draw = self.draws;
        self.draws += 1;
        draw
    }
}

fn push_bounded(queue: &mut VecDeque<String>, item: String, depth: usize) {
    queue.push_front(item);
    queue.truncate(depth);
}

fn nth(queue: &VecDeque<String>, index: usize) -> Option<&str> {
    index.checked_sub(1).and_then(|i| queue.get(i)).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histories_are_bounded_and_most_recent_first() {
        let mut s = Session::with_history_depth("s", 2);
        s.record("one", "1", "1");
        s.record("two", "2", "2");
        s.record("three", "3", "3");
        assert_eq!(s.request(1), Some("three"));
        assert_eq!(s.request(2), Some("two"));
        assert_eq!(s.request(3), None);
        assert_eq!(s.request(0), None);
        assert_eq!(s.that_history(), vec!["3".to_string(), "2".to_string()]);
    }

    #[test]
    fn topic_variable_moves_topic_and_bucket() {
        let mut s = Session::new("s");
        s.set_topic_var("mood", "calm");
        s.set_var("TOPIC", "Weather");
        assert_eq!(s.topic(), Some("Weather"));
        assert_eq!(s.topic_var("mood"), None);
        s.set_topic_var("mood", "stormy");
        s.set_var("topic", "");
        assert_eq!(s.topic(), None);
        assert_eq!(s.topic_var("mood"), Some("calm"));
    }
}
