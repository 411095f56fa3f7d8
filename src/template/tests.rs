use crate::{Bindings, Config, EVALUATION_FAILURE, Engine, KnowledgeBase, Rule, Session};
use chrono::{NaiveDate, NaiveTime};

fn reference_config() -> Config {
    let date = NaiveDate::from_ymd_opt(2013, 2, 12).unwrap();
    let time = NaiveTime::from_hms_opt(4, 30, 0).unwrap();
    Config { fixed_time: Some(date.and_time(time)), max_recursion_depth: 4, ..Config::default() }
}

fn engine(rules: Vec<Rule>) -> Engine {
    let mut kb = KnowledgeBase::new();
    kb.set_property("name", "Quill");
    kb.define_set("color", ["red", "green", "blue"]);
    kb.map_insert("capital", "France", "Paris");
    for rule in rules {
        kb.add_rule(rule).unwrap();
    }
    Engine::with_config(kb, reference_config())
}

/// Play `turns` in one session, checking every response.
fn converse(name: &str, rules: Vec<Rule>, turns: &[(&str, &str)]) {
    let engine = engine(rules);
    let mut session = Session::new(name);
    for (input, expected) in turns {
        assert_eq!(engine.respond(input, &mut session), *expected, "scenario `{name}`, input {input:?}");
    }
}

#[test]
fn conversation_scenarios() {
    let cases: Vec<(&str, Vec<Rule>, Vec<(&str, &str)>)> = vec![
        (
            "greeting",
            vec![Rule::new("HELLO", "Hi!"), Rule::new("HELLO *", "Hi <star/>!")],
            vec![("Hello Bob", "Hi Bob!"), ("hello", "Hi!"), ("Bob", "")],
        ),
        (
            "capture order",
            vec![Rule::new("* IS *", "<star index=\"2\"/> describes <star/>.")],
            vec![("the sky is blue", "blue describes the sky.")],
        ),
        (
            "set membership",
            vec![
                Rule::new("ADD *", "<set name=\"pets\" operation=\"add\"><star/></set>Added."),
                Rule::new("IS * A PET", "<set name=\"pets\" operation=\"contains\"><star/></set>"),
            ],
            vec![("is cat a pet", "false"), ("add cat", "Added."), ("is Cat a pet", "true"), ("add cat", "Added.")],
        ),
        (
            "condition on a session variable",
            vec![
                Rule::new("HOW AM I", "<condition name=\"mood\" value=\"happy\">Yay</condition>"),
                Rule::new("I FEEL *", "<think><set name=\"mood\"><star/></set></think>Noted."),
            ],
            vec![("how am I", ""), ("I feel happy", "Noted."), ("how am I", "Yay"), ("I feel sad", "Noted."), ("how am I", "")],
        ),
        (
            "condition list with default",
            vec![
                Rule::new(
                    "STATUS",
                    "<condition name=\"mood\"><li value=\"happy\">Great</li><li value=\"sad\">Sorry</li><li>Hmm</li></condition>",
                ),
                Rule::new("I FEEL *", "<think><set name=\"mood\"><star/></set></think>Noted."),
            ],
            vec![("status", ""), ("I feel sad", "Noted."), ("status", "Sorry"), ("I feel odd", "Noted."), ("status", "Hmm")],
        ),
        (
            "srai",
            vec![Rule::new("HELLO *", "Hi <star/>!"), Rule::new("GREET *", "<srai>HELLO <star/></srai>")],
            vec![("greet Bob", "Hi Bob!")],
        ),
        ("recursion cap", vec![Rule::new("LOOP", "<srai>LOOP</srai>")], vec![("loop", "<srai>LOOP</srai>")]),
        ("unresolved srai", vec![Rule::new("ASK", "<srai>NOTHING HERE</srai>")], vec![("ask", "<srai>NOTHING HERE</srai>")]),
        (
            "sr",
            vec![Rule::new("HELLO", "Hi!"), Rule::new("PLEASE *", "<sr/>")],
            vec![("please hello", "Hi!"), ("please jump", "<sr/>")],
        ),
        (
            "topic gating",
            vec![
                Rule::new("WEATHER", "What about it?"),
                Rule::new("WEATHER", "Sunny.").with_topic("FORECAST"),
                Rule::new("TALK ABOUT *", "<think><set name=\"topic\"><star/></set></think>OK"),
                Rule::new("TOPIC", "<topic/>"),
            ],
            vec![("weather", "What about it?"), ("talk about forecast", "OK"), ("weather", "Sunny."), ("topic", "forecast")],
        ),
        (
            "that context",
            vec![
                Rule::new("YES", "Okay."),
                Rule::new("YES", "Great.").with_that("DO YOU LIKE CATS"),
                Rule::new("ASK", "Do you like cats?"),
            ],
            vec![("yes", "Okay."), ("ask", "Do you like cats?"), ("yes", "Great."), ("yes", "Okay.")],
        ),
        (
            "wildcard that over a bare literal",
            vec![
                Rule::new("YES", "generic"),
                Rule::new("YES", "cats yes").with_that("DO YOU LIKE *"),
                Rule::new("ASK", "Do you like cats?"),
            ],
            vec![("yes", "generic"), ("ask", "Do you like cats?"), ("yes", "cats yes"), ("yes", "generic")],
        ),
        (
            "histories",
            vec![
                Rule::new("HELLO *", "Hi <star/>!"),
                Rule::new("WHAT DID I SAY", "<request/>"),
                Rule::new("REPEAT", "<that/>"),
                Rule::new("ECHO", "<input/>"),
            ],
            vec![("hello Bob", "Hi Bob!"), ("repeat", "Hi Bob!"), ("what did I say", "repeat"), ("echo", "ECHO")],
        ),
        (
            "bot properties and default get",
            vec![Rule::new("WHO ARE YOU", "I am <bot name=\"name\"/>."), Rule::new("WHAT IS MY NAME", "[<get name=\"user\"/>]")],
            vec![("who are you", "I am Quill."), ("what is my name", "[]")],
        ),
        (
            "maps and lists",
            vec![
                Rule::new("CAPITAL OF *", "<map name=\"capital\" operation=\"get\"><key><star/></key></map>"),
                Rule::new("TODO *", "<list name=\"todo\" operation=\"add\"><star/></list>Listed."),
                Rule::new("TODOS", "<list name=\"todo\" operation=\"size\"/>: <list name=\"todo\" operation=\"list\" delimiter=\" and \"/>"),
            ],
            vec![
                ("capital of france", "Paris"),
                ("capital of spain", ""),
                ("todo milk", "Listed."),
                ("todo bread", "Listed."),
                ("todos", "2: milk and bread"),
            ],
        ),
        (
            "set markers in patterns",
            vec![Rule::new("I LIKE <set>color</set>", "<star/> is a color."), Rule::new("I LIKE *", "Why <star/>?")],
            vec![("I like green", "green is a color."), ("I like jazz", "Why jazz?")],
        ),
        (
            "person substitution",
            vec![Rule::new("I SAID *", "You said <person/>.")],
            vec![("I said I like you", "You said you like me.")],
        ),
        (
            "system tags",
            vec![Rule::new("TODAY", "<date format=\"iso\"/> <time format=\"short\"/>"), Rule::new("WHO", "<id/>")],
            vec![("today", "2013-02-12 04:30"), ("who", "system tags")],
        ),
        (
            "sraix fallbacks",
            vec![
                Rule::new("LOOKUP", "<sraix service=\"weather\" default=\"Offline.\">now</sraix>"),
                Rule::new("RAW", "<sraix service=\"weather\">now</sraix>"),
            ],
            vec![("lookup", "Offline."), ("raw", "<sraix service=\"weather\">now</sraix>")],
        ),
        (
            "learn and recall",
            vec![Rule::new(
                "TEACH * IS *",
                "<learn><category><pattern>WHAT IS <eval><star/></eval></pattern>\
                 <template><eval><star index=\"2\"/></eval> (<star/>)</template></category></learn>OK",
            )],
            vec![("what is sky", ""), ("teach sky is blue", "OK"), ("what is sky", "blue ()")],
        ),
    ];

    for (name, rules, turns) in cases {
        converse(name, rules, &turns);
    }
}

#[test]
fn learn_then_unlearn_restores_the_key_set() {
    let engine = engine(vec![
        Rule::new(
            "TEACH *",
            "<learn><topic name=\"pets\"><category><pattern><eval><star/></eval> *</pattern>\
             <template>Known.</template></category></topic></learn>",
        ),
        Rule::new(
            "FORGET *",
            "<unlearn><topic name=\"pets\"><category><pattern><eval><star/></eval> *</pattern>\
             <template>ignored</template></category></topic></unlearn>",
        ),
    ]);
    let mut session = Session::new("learn");
    let before = engine.knowledge().read().keys();

    engine.respond("teach dogs", &mut session);
    assert_eq!(engine.knowledge().read().rule_count(), before.len() + 1);
    assert_ne!(engine.knowledge().read().keys(), before);

    engine.respond("forget dogs", &mut session);
    assert_eq!(engine.knowledge().read().keys(), before);

    // Unlearning something absent is silent.
    assert_eq!(engine.respond("forget cats", &mut session), "");
    assert_eq!(engine.knowledge().read().keys(), before);
}

#[test]
fn rejected_learns_leave_the_index_untouched() {
    let engine = engine(vec![
        Rule::new(
            "INJECT",
            "<learn><category><pattern>EVIL</pattern><template>&lt;script&gt;x&lt;/script&gt;</template></category></learn>Done",
        ),
        Rule::new("WIDE", "<learn><category><pattern>* * * *</pattern><template>x</template></category></learn>Done"),
    ]);
    let config = Config { max_wildcards: 3, ..reference_config() };
    let engine = Engine::from_shared(engine.knowledge().clone(), config);
    let before = engine.knowledge().read().keys();
    let mut session = Session::new("reject");

    assert_eq!(engine.respond("inject", &mut session), "Done");
    assert_eq!(engine.respond("wide", &mut session), "Done");
    assert_eq!(engine.knowledge().read().keys(), before);
}

#[test]
fn random_is_deterministic_per_seed() {
    let rules = || vec![Rule::new("PICK", "<random><li>a</li><li>b</li><li>c</li><li>d</li></random>")];
    let play = |engine: &Engine| {
        let mut session = Session::new("dice");
        (0..8).map(|_| engine.respond("pick", &mut session)).collect::<Vec<_>>()
    };

    let first = play(&engine(rules()));
    let second = play(&engine(rules()));
    assert_eq!(first, second);
    assert!(first.iter().all(|pick| ["a", "b", "c", "d"].contains(&pick.as_str())), "{first:?}");
}

#[test]
fn direct_evaluation() {
    let engine = engine(vec![Rule::new("HELLO", "Hi!")]);
    let mut session = Session::new("direct");
    let mut bindings = Bindings::new();
    bindings.insert("star1", "world");

    let cases = vec![
        ("plain text", "plain text"),
        ("<uppercase><star/></uppercase>", "WORLD"),
        ("<get><name>missing</name></get>", ""),
        ("<think><set var=\"x\">1</set></think><get var=\"x\"/>", "1"),
        ("<srai>hello</srai> <sentence>there</sentence>", "Hi! There"),
        ("<size/>", "1"),
        ("<pluralize>big\u{00A0}dog</pluralize>", "big\u{00A0}dogs"),
        ("<think>unclosed", EVALUATION_FAILURE),
        ("a </b>", EVALUATION_FAILURE),
    ];
    for (template, expected) in cases {
        assert_eq!(engine.evaluate(template, bindings.clone(), &mut session), expected, "template {template:?}");
    }
}
