use crate::engine::{CacheStats, Caches, Match, MatchMetrics, MatchQuery, MatchStage, Matcher};
use crate::knowledge::{KnowledgeBase, RuleLimits, SharedKnowledge};
use crate::normalize::{apply_substitutions, normalize, split_sentences};
use crate::scope::VariableContext;
use crate::services::{ExternalService, FuzzyScorer, Persistence, ServiceRegistry};
use crate::template::{EVALUATION_FAILURE, Evaluator, screen_rule};
use crate::{Bindings, Config, EngineError, Rule, RuleEntry, Session};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A compact view of the rule that answered one sentence.
#[derive(Debug, Clone)]
pub struct MatchSummary {
    /// Composite key of the winning rule.
    pub key: String,
    pub pattern: String,
    pub template: String,
    pub score: i64,
    pub stage: MatchStage,
    /// Wildcard captures, e.g. `("star1", "Bob")`.
    pub bindings: Vec<(String, String)>,
}

/// What happened to one input sentence.
#[derive(Debug, Clone)]
pub struct SentenceTrace {
    pub input: String,
    /// `None` when no rule matched and the no-match response was used.
    pub matched: Option<MatchSummary>,
    pub output: String,
    pub metrics: MatchMetrics,
}

/// Additional details returned by [`Engine::respond_verbose`].
///
/// This is meant for debugging rule priorities and timing without dumping
/// the knowledge base.
#[derive(Debug, Clone, Default)]
pub struct TurnDetails {
    pub sentences: Vec<SentenceTrace>,
    /// Whether evaluation failed and the turn was replaced by [`EVALUATION_FAILURE`].
    pub failed: bool,
}

/// Result from [`Engine::respond_verbose`].
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub text: String,
    /// Total elapsed time for the turn.
    pub elapsed: Duration,
    pub details: TurnDetails,
}

/// The response engine: a shared knowledge base plus the collaborators and
/// caches every turn uses.
///
/// An `Engine` is `Send + Sync`; distinct sessions may be answered from
/// several threads at once. Turns of one session are serialized by the
/// `&mut Session` they borrow.
pub struct Engine {
    knowledge: SharedKnowledge,
    config: Config,
    caches: Caches,
    services: ServiceRegistry,
    persistence: Option<Arc<dyn Persistence>>,
    fuzzy: Option<Arc<dyn FuzzyScorer>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.knowledge.read().rule_count())
            .field("config", &self.config)
            .field("services", &self.services)
            .field("persistence", &self.persistence.is_some())
            .field("fuzzy", &self.fuzzy.is_some())
            .finish()
    }
}

impl Engine {
    /// Engine over `knowledge` with the default [`Config`].
    ///
    /// # Example
    /// ```
    /// use quill::{Engine, KnowledgeBase, Rule, Session};
    ///
    /// let mut kb = KnowledgeBase::new();
    /// kb.add_rule(Rule::new("PING", "pong")).unwrap();
    /// let engine = Engine::new(kb);
    /// assert_eq!(engine.respond("ping", &mut Session::new("s")), "pong");
    /// ```
    pub fn new(knowledge: KnowledgeBase) -> Self {
        Self::with_config(knowledge, Config::default())
    }

    pub fn with_config(knowledge: KnowledgeBase, config: Config) -> Self {
        Self::from_shared(knowledge.shared(), config)
    }

    /// Engine over a knowledge base that other engines may share.
    pub fn from_shared(knowledge: SharedKnowledge, config: Config) -> Self {
        knowledge
            .write()
            .set_limits(RuleLimits { max_wildcards: config.max_wildcards, max_nesting: config.max_nesting });
        Engine {
            caches: Caches::new(config.cache_capacity),
            knowledge,
            config,
            services: ServiceRegistry::new(),
            persistence: None,
            fuzzy: None,
        }
    }

    /// Register an `<sraix>` client under `name`.
    pub fn with_service(mut self, name: &str, service: Arc<dyn ExternalService>) -> Self {
        self.services.register(name, service);
        self
    }

    /// Client for `<sraix>` names with no dedicated registration.
    pub fn with_fallback_service(mut self, service: Arc<dyn ExternalService>) -> Self {
        self.services.set_fallback(service);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_fuzzy_scorer(mut self, scorer: Arc<dyn FuzzyScorer>) -> Self {
        self.fuzzy = Some(scorer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn knowledge(&self) -> &SharedKnowledge {
        &self.knowledge
    }

    /// A fresh session keeping `history_depth` turns of history.
    pub fn session(&self, id: impl Into<String>) -> Session {
        Session::with_history_depth(id, self.config.history_depth)
    }

    pub(crate) fn caches(&self) -> &Caches {
        &self.caches
    }

    pub(crate) fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub(crate) fn persistence(&self) -> Option<&Arc<dyn Persistence>> {
        self.persistence.as_ref()
    }

    pub(crate) fn matcher(&self) -> Matcher<'_> {
        Matcher::new(&self.caches).with_fuzzy(self.fuzzy.as_deref(), self.config.fuzzy_threshold)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    // --- Turns ------------------------------------------------------------------

    /// Answer `input` and record the exchange in `session`.
    ///
    /// Never fails: unmatched sentences produce the configured
    /// `no_match_response`, and an internal evaluation failure replaces the
    /// whole turn with [`EVALUATION_FAILURE`].
    pub fn respond(&self, input: &str, session: &mut Session) -> String {
        self.turn(input, session, false).text
    }

    /// Like [`Engine::respond`], but also returns per-sentence match traces.
    pub fn respond_verbose(&self, input: &str, session: &mut Session) -> TurnResult {
        self.turn(input, session, true)
    }

    fn turn(&self, input: &str, session: &mut Session, verbose: bool) -> TurnResult {
        let start = Instant::now();
        let mut details = TurnDetails::default();
        let mut outputs: Vec<String> = Vec::new();

        for sentence in self.sentences(input) {
            let history = session.that_history();
            let topic = session.topic().map(str::to_string);
            let query = MatchQuery::new(&sentence).with_topic(topic.as_deref()).with_that(&history);
            let run = {
                let kb = self.knowledge.read();
                self.matcher().find_with_metrics(&kb, query)
            };

            let output = match &run.found {
                None => {
                    tracing::debug!(sentence = %sentence, "no match; using no-match response");
                    self.config.no_match_response.clone()
                }
                Some(found) => {
                    let mut ctx =
                        VariableContext::new(session, &self.knowledge, found.bindings.clone(), normalize(&sentence));
                    match Evaluator::new(self).run(&found.entry.rule.template, &mut ctx) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::warn!(%err, key = %found.entry.key, "evaluation failed; turn replaced");
                            details.failed = true;
                            break;
                        }
                    }
                }
            };

            if verbose {
                details.sentences.push(SentenceTrace {
                    input: sentence.clone(),
                    matched: run.found.as_ref().map(summarize),
                    output: output.clone(),
                    metrics: run.metrics,
                });
            }
            outputs.push(output);
        }

        let text = if details.failed { EVALUATION_FAILURE.to_string() } else { compact(&outputs.join(" ")) };
        let that = split_sentences(&text).last().map(|s| normalize(s)).unwrap_or_default();
        session.record(input.trim(), text.clone(), that);

        TurnResult { text, elapsed: start.elapsed(), details }
    }

    /// Input after the `normal` substitution table, split into sentences.
    /// Blank input is one empty sentence, so a DEFAULT rule can still answer.
    fn sentences(&self, input: &str) -> Vec<String> {
        let substituted = {
            let kb = self.knowledge.read();
            match kb.substitutions("normal") {
                Some(table) => apply_substitutions(table, input),
                None => input.trim().to_string(),
            }
        };
        let sentences = if self.config.split_sentences { split_sentences(&substituted) } else { vec![substituted] };
        let sentences: Vec<String> = sentences.into_iter().filter(|s| !s.trim().is_empty()).collect();
        if sentences.is_empty() { vec![String::new()] } else { sentences }
    }

    /// Best rule for `input` in the context of `session`, without evaluating it.
    pub fn find_match(&self, input: &str, session: &Session) -> Option<Match> {
        let history = session.that_history();
        let query = MatchQuery::new(input).with_topic(session.topic()).with_that(&history);
        let kb = self.knowledge.read();
        self.matcher().find(&kb, query)
    }

    /// Evaluate a template directly with explicit bindings.
    pub fn evaluate(&self, template: &str, bindings: Bindings, session: &mut Session) -> String {
        let mut ctx = VariableContext::new(session, &self.knowledge, bindings, String::new());
        Evaluator::new(self).evaluate(template, &mut ctx)
    }

    // --- Rule mutations -----------------------------------------------------------

    /// Screen and insert `rule`, as a `<learn>` tag would.
    pub fn learn(&self, rule: Rule) -> Result<Arc<RuleEntry>, EngineError> {
        screen_rule(&rule, self.config.max_srai_per_template, self.config.max_nesting)?;
        self.knowledge.write().add_rule(rule)
    }

    /// Remove the rule with `rule`'s identity. Returns whether one existed.
    pub fn unlearn(&self, rule: &Rule) -> bool {
        self.knowledge.write().remove_rule(rule).is_some()
    }
}

fn summarize(found: &Match) -> MatchSummary {
    MatchSummary {
        key: found.entry.key.clone(),
        pattern: found.entry.rule.pattern.clone(),
        template: found.entry.rule.template.clone(),
        score: found.score,
        stage: found.stage,
        bindings: found.bindings.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

/// Collapse template line breaks and surrounding whitespace.
fn compact(text: &str) -> String {
    regex!(r"\s*\n\s*").replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ServiceError, ServiceParams};
    use parking_lot::Mutex;

    fn greeter() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        kb.add_rule(Rule::new("HELLO", "Hi!")).unwrap();
        kb.add_rule(Rule::new("HELLO *", "Hi <star/>!")).unwrap();
        kb.add_rule(Rule::new("HOW ARE YOU", "Fine.\n   Thanks.")).unwrap();
        kb
    }

    #[test]
    fn respond_answers_and_records_history() {
        let engine = Engine::new(greeter());
        let mut session = Session::new("s");

        assert_eq!(engine.respond("Hello Bob", &mut session), "Hi Bob!");
        assert_eq!(engine.respond("How are you?", &mut session), "Fine. Thanks.");
        assert_eq!(session.request(1), Some("How are you?"));
        assert_eq!(session.response(2), Some("Hi Bob!"));
        assert_eq!(session.that(1), Some("THANKS"));
    }

    #[test]
    fn unmatched_sentences_use_no_match_response() {
        let config = Config { no_match_response: "Pardon?".into(), ..Config::default() };
        let engine = Engine::with_config(greeter(), config);
        let mut session = Session::new("s");
        assert_eq!(engine.respond("Bob", &mut session), "Pardon?");
        assert_eq!(engine.respond("Hello. Bob.", &mut session), "Hi! Pardon?");
    }

    #[test]
    fn verbose_turn_traces_each_sentence() {
        let engine = Engine::new(greeter());
        let mut session = Session::new("s");
        let res = engine.respond_verbose("Hello Bob. Nothing here.", &mut session);

        assert_eq!(res.text, "Hi Bob!");
        assert_eq!(res.details.sentences.len(), 2);
        let first = res.details.sentences[0].matched.as_ref().unwrap();
        assert_eq!(first.pattern, "HELLO *");
        assert!(first.bindings.contains(&("star1".to_string(), "Bob".to_string())));
        assert!(res.details.sentences[1].matched.is_none());
        assert!(res.elapsed >= res.details.sentences[0].metrics.total);
    }

    #[test]
    fn broken_template_replaces_the_turn() {
        let mut kb = greeter();
        kb.add_rule(Rule::new("BROKEN", "<think><set name=\"x\">y</set></think>ok")).unwrap();
        let config = Config { max_nesting: 1, ..Config::default() };
        let engine = Engine::with_config(kb, config);
        let mut session = Session::new("s");

        assert_eq!(engine.respond("hello", &mut session), "Hi!");
        assert_eq!(engine.respond("hello. broken", &mut session), EVALUATION_FAILURE);
        assert_eq!(session.response(1), Some(EVALUATION_FAILURE));
        assert_eq!(engine.evaluate("<think><get name=\"x\"/></think>", Bindings::new(), &mut session), EVALUATION_FAILURE);
    }

    #[test]
    fn learn_screens_and_unlearn_reports_presence() {
        let engine = Engine::new(greeter());
        let before = engine.knowledge().read().keys();

        let rule = Rule::new("WHAT IS TWO", "Four.");
        engine.learn(rule.clone()).unwrap();
        assert_eq!(engine.respond("what is two", &mut Session::new("s")), "Four.");
        assert!(engine.unlearn(&rule));
        assert!(!engine.unlearn(&rule));
        assert_eq!(engine.knowledge().read().keys(), before);

        let err = engine.learn(Rule::new("X", "<script>bad()</script>")).unwrap_err();
        assert!(matches!(err, EngineError::SecurityRejected { .. }));
    }

    struct Recorder(Mutex<Vec<String>>);

    impl Persistence for Recorder {
        fn append_rule(&self, rule: &Rule, source_tag: &str, _: Duration) -> Result<(), ServiceError> {
            self.0.lock().push(format!("{source_tag}:{}", rule.pattern));
            Ok(())
        }

        fn remove_rule(&self, rule: &Rule, _: Duration) -> Result<(), ServiceError> {
            self.0.lock().push(format!("remove:{}", rule.pattern));
            Err(ServiceError::Failed("read-only store".into()))
        }
    }

    #[test]
    fn learnf_and_unlearnf_reach_persistence() {
        let mut kb = greeter();
        kb.add_rule(Rule::new(
            "REMEMBER *",
            "<learnf><category><pattern>SAY <eval><star/></eval> *</pattern><template><star/>!</template></category></learnf>OK",
        ))
        .unwrap();
        kb.add_rule(Rule::new(
            "FORGET *",
            "<unlearnf><category><pattern>SAY <eval><star/></eval> *</pattern><template><star/>!</template></category></unlearnf>Gone",
        ))
        .unwrap();
        let store = Arc::new(Recorder(Mutex::new(Vec::new())));
        let engine = Engine::new(kb).with_persistence(store.clone());
        let mut session = Session::new("s");

        assert_eq!(engine.respond("remember cheese", &mut session), "OK");
        assert_eq!(engine.respond("say cheese now", &mut session), "now!");
        assert_eq!(engine.respond("forget cheese", &mut session), "Gone");
        assert_eq!(*store.0.lock(), vec!["learnf:SAY cheese *".to_string(), "remove:SAY cheese *".to_string()]);
    }

    struct StuckStore;

    impl Persistence for StuckStore {
        fn append_rule(&self, _: &Rule, _: &str, _: Duration) -> Result<(), ServiceError> {
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        }

        fn remove_rule(&self, _: &Rule, _: Duration) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    #[test]
    fn hung_persistence_does_not_stall_the_turn() {
        let mut kb = greeter();
        kb.add_rule(Rule::new(
            "REMEMBER *",
            "<learnf><category><pattern>SAY <eval><star/></eval></pattern><template>said</template></category></learnf>OK",
        ))
        .unwrap();
        let config = Config { service_timeout_ms: 50, ..Config::default() };
        let engine = Engine::with_config(kb, config).with_persistence(Arc::new(StuckStore));
        let mut session = engine.session("s");

        let started = Instant::now();
        assert_eq!(engine.respond("remember cheese", &mut session), "OK");
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert_eq!(engine.respond("say cheese", &mut session), "said");
    }

    #[test]
    fn engine_sessions_use_the_configured_history_depth() {
        let config = Config { history_depth: 2, ..Config::default() };
        let engine = Engine::with_config(greeter(), config);
        let mut session = engine.session("short");
        assert_eq!(session.history_depth(), 2);

        for name in ["Ann", "Bob", "Cy"] {
            engine.respond(&format!("hello {name}"), &mut session);
        }
        assert_eq!(session.response(1), Some("Hi Cy!"));
        assert_eq!(session.response(2), Some("Hi Bob!"));
        assert_eq!(session.response(3), None);
    }

    #[test]
    fn sessions_on_separate_threads_share_learned_rules() {
        let mut kb = greeter();
        kb.add_rule(Rule::new(
            "TEACH *",
            "<learn><category><pattern>WORD <eval><star/></eval></pattern><template>known</template></category></learn>OK",
        ))
        .unwrap();
        let engine = Engine::new(kb);
        let before = engine.knowledge().read().rule_count();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let engine = &engine;
                scope.spawn(move || {
                    let mut session = engine.session(format!("worker-{t}"));
                    for i in 0..25 {
                        let word = format!("w{t}x{i}");
                        assert_eq!(engine.respond(&format!("teach {word}"), &mut session), "OK");
                        assert_eq!(engine.respond(&format!("word {word}"), &mut session), "known");
                        assert_eq!(engine.respond("Hello Bob", &mut session), "Hi Bob!");
                    }
                    assert_eq!(session.request(1), Some("Hello Bob"));
                    assert_eq!(session.response(2), Some("known"));
                });
            }
        });

        assert_eq!(engine.knowledge().read().rule_count(), before + 100);
        let mut session = engine.session("late");
        assert_eq!(engine.respond("word w3x24", &mut session), "known");
    }

    struct Upper;

    impl ExternalService for Upper {
        fn invoke(&self, _: &str, content: &str, _: &ServiceParams, _: Duration) -> Result<String, ServiceError> {
            Ok(content.to_uppercase())
        }
    }

    #[test]
    fn sraix_uses_registered_service() {
        let mut kb = KnowledgeBase::new();
        kb.add_rule(Rule::new("SHOUT *", r#"<sraix service="upper"><star/></sraix>"#)).unwrap();
        let engine = Engine::new(kb).with_service("upper", Arc::new(Upper));
        assert_eq!(engine.respond("shout hey there", &mut Session::new("s")), "HEY THERE");
    }
}
