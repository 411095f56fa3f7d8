use quill::{CacheStats, MatchMetrics, SentenceTrace, StageMetrics, TurnResult};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

pub fn print_turn(input: &str, res: &TurnResult, cache: &CacheStats, color: bool) {
    let palette = ansi::Palette::new(color);
    println!("\n{}", palette.bold(palette.paint(format!("⚙  Input: \"{}\"", input), ansi::CYAN)));

    for (idx, sentence) in res.details.sentences.iter().enumerate() {
        println!("\n{}", palette.paint(format!("━━━ Sentence {} ━━━", idx + 1), ansi::GRAY));
        print_sentence(sentence, &palette);
    }

    if res.details.failed {
        println!("\n{}", palette.paint("  ✗ evaluation failed; turn replaced", ansi::RED));
    }

    println!("\n{}", palette.paint("━━━ Response ━━━", ansi::GRAY));
    if res.text.is_empty() {
        println!("{}", palette.dim("  (empty)"));
    } else {
        println!("  {}", palette.bold(palette.paint(&res.text, ansi::GREEN)));
    }

    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!(
        "  Total: {}  │  Cache: {} hits / {} misses",
        palette.paint(format!("{:?}", res.elapsed), ansi::GREEN),
        palette.paint(cache.hits.to_string(), ansi::CYAN),
        palette.dim(cache.misses.to_string()),
    );
    println!();
}

fn print_sentence(sentence: &SentenceTrace, palette: &ansi::Palette) {
    println!("  {} {}", palette.dim("text:"), palette.paint(&sentence.input, ansi::CYAN));
    print_stages(&sentence.metrics, palette);

    match &sentence.matched {
        Some(found) => {
            println!(
                "  {} {} {} {}",
                palette.paint("rule:", ansi::BLUE),
                palette.bold(palette.paint(&found.pattern, ansi::GREEN)),
                palette.dim("│ score:"),
                palette.paint(found.score.to_string(), ansi::YELLOW),
            );
            println!("      {} {}", palette.dim("key:"), palette.dim(&found.key));
            for (name, value) in &found.bindings {
                println!("      {} {}", palette.paint(format!("{name}:"), ansi::BLUE), value);
            }
            println!("      {} {}", palette.dim("template:"), preview(&found.template));
        }
        None => {
            println!("{}", palette.dim("  No rule matched"));
            println!("\n{}", palette.paint("Possible reasons:", ansi::YELLOW));
            println!("  • No pattern covers the normalized input");
            println!("  • Topic or that-context gated the candidates out");
            println!("\n{}", palette.dim("  Tip: Set QUILL_LOG=quill=debug to see match decisions"));
        }
    }
    println!("  {} {}", palette.dim("output:"), palette.paint(&sentence.output, ansi::GREEN));
}

fn print_stages(metrics: &MatchMetrics, palette: &ansi::Palette) {
    let stages: [(&str, &StageMetrics); 4] = [
        ("literal", &metrics.literal),
        ("exact", &metrics.exact),
        ("scan", &metrics.scan),
        ("default", &metrics.default),
    ];
    for (label, stage) in stages.iter().filter(|(_, s)| s.ran) {
        println!(
            "  {} {}  {} {}  {} {}",
            palette.paint(format!("{label:>8}:"), ansi::BLUE),
            if stage.matched > 0 {
                palette.paint(format!("✓ {} matched", stage.matched), ansi::GREEN)
            } else {
                palette.dim("✗ 0 matched")
            },
            palette.dim("considered:"),
            palette.paint(stage.considered.to_string(), ansi::YELLOW),
            palette.dim("gated:"),
            palette.paint(stage.gated.to_string(), ansi::YELLOW),
        );
    }
    for candidate in metrics.candidates.iter().take(5) {
        println!("    {} {}", palette.paint(format!("{:>6}", candidate.score), ansi::YELLOW), palette.dim(&candidate.key));
    }
    if metrics.candidates.len() > 5 {
        println!("    {}", palette.dim(format!("... +{} more", metrics.candidates.len() - 5)));
    }
}

fn preview(template: &str) -> String {
    let flat: String = template.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 80 { format!("{}…", flat.chars().take(80).collect::<String>()) } else { flat }
}
