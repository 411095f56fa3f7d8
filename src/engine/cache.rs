//! Memoization for the hot paths of a turn.
//!
//! Three bounded LRU caches, each behind its own mutex:
//!
//! | Cache     | Key                                   | Value                     |
//! |-----------|---------------------------------------|---------------------------|
//! | patterns  | (normalized pattern, `set_revision`)  | compiled pattern          |
//! | templates | template text                         | parsed template tree      |
//! | outcomes  | (pattern, input, `set_revision`)      | captures, or no-match     |
//!
//! A pattern's compiled form and its captures depend only on the pattern
//! text and the Sets/Topics/Properties snapshot, which `set_revision`
//! identifies; a bumped revision makes every older entry unreachable, so
//! nothing stale is ever served. Template trees depend on the text alone.
//!
//! Caches are never required for correctness: a capacity of 1 behaves the
//! same, only slower.

use super::compiler::{self, CompiledPattern};
use crate::error::TemplateError;
use crate::knowledge::KnowledgeBase;
use crate::template::{self, Template};
use crate::EngineError;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type OutcomeKey = (String, String, u64);

/// Hit/miss counters, summed over all caches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct Caches {
    patterns: Mutex<LruCache<(String, u64), Arc<CompiledPattern>>>,
    templates: Mutex<LruCache<String, Arc<Template>>>,
    outcomes: Mutex<LruCache<OutcomeKey, Option<Vec<String>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Caches {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Caches {
            patterns: Mutex::new(LruCache::new(capacity)),
            templates: Mutex::new(LruCache::new(capacity)),
            outcomes: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Compiled form of `pattern` against the current collections of `kb`.
    pub fn pattern(&self, pattern: &str, kb: &KnowledgeBase) -> Result<Arc<CompiledPattern>, EngineError> {
        let key = (pattern.to_string(), kb.set_revision());
        if let Some(found) = self.patterns.lock().get(&key) {
            self.hit();
            return Ok(Arc::clone(found));
        }
        self.miss();
        let compiled = Arc::new(compiler::compile(pattern, kb)?);
        self.patterns.lock().put(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Captures of `compiled` against `text`, memoized per collection snapshot.
    pub fn captures(&self, compiled: &CompiledPattern, text: &str, set_revision: u64) -> Option<Vec<String>> {
        let key = (compiled.source.clone(), text.to_string(), set_revision);
        if let Some(found) = self.outcomes.lock().get(&key) {
            self.hit();
            return found.clone();
        }
        self.miss();
        let outcome = compiled.captures(text);
        self.outcomes.lock().put(key, outcome.clone());
        outcome
    }

    pub fn template(&self, text: &str, max_nesting: usize) -> Result<Arc<Template>, TemplateError> {
        if let Some(found) = self.templates.lock().get(text) {
            self.hit();
            return Ok(Arc::clone(found));
        }
        self.miss();
        let parsed = Arc::new(template::parse(text, max_nesting)?);
        self.templates.lock().put(text.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed) }
    }

    pub fn clear(&self) {
        self.patterns.lock().clear();
        self.templates.lock().clear();
        self.outcomes.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_changes_invalidate_compiled_patterns() {
        let caches = Caches::new(8);
        let mut kb = KnowledgeBase::new();
        kb.define_set("color", ["red"]);

        let first = caches.pattern("I LIKE <set>color</set>", &kb).unwrap();
        assert!(caches.captures(&first, "I LIKE RED", kb.set_revision()).is_some());
        let again = caches.pattern("I LIKE <set>color</set>", &kb).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        kb.add_to_set("color", "green");
        let refreshed = caches.pattern("I LIKE <set>color</set>", &kb).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert!(caches.captures(&refreshed, "I LIKE GREEN", kb.set_revision()).is_some());
    }

    #[test]
    fn counts_hits_and_misses() {
        let caches = Caches::new(1);
        caches.template("Hi <star/>", 8).unwrap();
        caches.template("Hi <star/>", 8).unwrap();
        caches.template("Bye", 8).unwrap();
        caches.template("Hi <star/>", 8).unwrap();
        assert_eq!(caches.stats(), CacheStats { hits: 1, misses: 3 });
        assert!(caches.template("<b>", 8).is_err());
    }
}
