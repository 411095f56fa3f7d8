//! Layered variable scope.
//!
//! Reads walk the tiers in precedence order and stop at the first hit:
//!
//! ```text
//! Local ─▶ Session ─▶ Topic ─▶ Global ─▶ Properties
//! (eval)   (session)  (session bucket    (knowledge base,
//!                      of current topic)  read-only)
//! ```
//!
//! Writes always name their tier. A [`VariableContext`] is created fresh for
//! every top-level evaluation; `srai` recursion derives a child with a fresh
//! local tier and `depth + 1`.

use crate::knowledge::SharedKnowledge;
use crate::session::{Session, TOPIC_VARIABLE};
use crate::Bindings;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Local,
    Session,
    Topic,
    Global,
    Properties,
}

impl Tier {
    pub const READ_ORDER: [Tier; 5] = [Tier::Local, Tier::Session, Tier::Topic, Tier::Global, Tier::Properties];

    /// Tier named by a `scope` attribute.
    pub fn from_scope(name: &str) -> Option<Tier> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Tier::Local),
            "session" => Some(Tier::Session),
            "topic" => Some(Tier::Topic),
            "global" => Some(Tier::Global),
            _ => None,
        }
    }
}

/// Per-evaluation state: scope tiers, recursion depth and active bindings.
pub struct VariableContext<'a> {
    locals: BTreeMap<String, String>,
    pub session: &'a mut Session,
    pub knowledge: &'a SharedKnowledge,
    pub depth: usize,
    pub bindings: Bindings,
    /// Normalized input that produced the active match.
    pub input: String,
}

impl<'a> VariableContext<'a> {
    pub fn new(session: &'a mut Session, knowledge: &'a SharedKnowledge, bindings: Bindings, input: String) -> Self {
        VariableContext { locals: BTreeMap::new(), session, knowledge, depth: 0, bindings, input }
    }

    /// Context for one recursive expansion.
    pub fn child(&mut self, bindings: Bindings, input: String) -> VariableContext<'_> {
        VariableContext {
            locals: BTreeMap::new(),
            session: &mut *self.session,
            knowledge: self.knowledge,
            depth: self.depth + 1,
            bindings,
            input,
        }
    }

    /// First tier holding `name`, with its value. Presence is distinct from
    /// emptiness: an explicitly empty variable is `Some((tier, ""))`.
    pub fn lookup(&self, name: &str) -> Option<(Tier, String)> {
        let name = name.trim().to_lowercase();
        if let Some(v) = self.locals.get(&name) {
            return Some((Tier::Local, v.clone()));
        }
        if let Some(v) = self.session.var(&name) {
            return Some((Tier::Session, v.to_string()));
        }
        if let Some(v) = self.session.topic_var(&name) {
            return Some((Tier::Topic, v.to_string()));
        }
        let kb = self.knowledge.read();
        if let Some(v) = kb.variable(&name) {
            return Some((Tier::Global, v.to_string()));
        }
        kb.property(&name).map(|v| (Tier::Properties, v.to_string()))
    }

    /// Local-tier value only (`var` attributes).
    pub fn local(&self, name: &str) -> Option<&str> {
        self.locals.get(&name.trim().to_lowercase()).map(String::as_str)
    }

    /// Value of `name`, empty when absent.
    pub fn get(&self, name: &str) -> String {
        self.lookup(name).map(|(_, v)| v).unwrap_or_default()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Write `name` in `tier`. Returns `false` for the read-only Properties
    /// tier, which is left untouched.
    pub fn set(&mut self, tier: Tier, name: &str, value: &str) -> bool {
        let name = name.trim().to_lowercase();
        match tier {
            Tier::Local => {
                self.locals.insert(name.clone(), value.to_string());
            }
            Tier::Session => self.session.set_var(&name, value),
            Tier::Topic => self.session.set_topic_var(&name, value),
            Tier::Global => self.knowledge.write().set_variable(&name, value),
            Tier::Properties => {
                tracing::warn!(name = %name, "properties are read-only; write ignored");
                return false;
            }
        }
        if name == TOPIC_VARIABLE && tier != Tier::Session {
            self.session.set_topic(value);
        }
        true
    }
}
