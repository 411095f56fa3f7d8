mod debug_report;

use quill::{Config, Engine, KnowledgeBase, KnowledgeSource, Session};
use std::io::{self, BufRead, IsTerminal};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let engine = match build_engine(&cli) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let mut session = engine.session("cli");
    match &cli.input {
        Some(input) => answer(&engine, &mut session, input, &cli),
        None => {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        eprintln!("error: failed to read stdin: {err}");
                        std::process::exit(1);
                    }
                };
                if !line.trim().is_empty() {
                    answer(&engine, &mut session, &line, &cli);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();
}

fn answer(engine: &Engine, session: &mut Session, input: &str, cli: &CliConfig) {
    if cli.verbose {
        let res = engine.respond_verbose(input, session);
        debug_report::print_turn(input, &res, &engine.cache_stats(), cli.color);
    } else {
        println!("{}", engine.respond(input, session));
    }
}

struct CliConfig {
    input: Option<String>,
    rules: Vec<String>,
    config: Option<String>,
    seed: Option<u64>,
    verbose: bool,
    color: bool,
}

fn build_engine(cli: &CliConfig) -> Result<Engine, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = read_file(path)?;
            Config::from_json(&text).map_err(|err| format!("error: invalid config '{path}': {err}"))?
        }
        None => Config::default(),
    };
    if let Some(seed) = cli.seed {
        config.random_seed = seed;
    }

    let mut kb = KnowledgeBase::new();
    for path in &cli.rules {
        let text = read_file(path)?;
        let source = KnowledgeSource::from_json(&text).map_err(|err| format!("error: invalid rules '{path}': {err}"))?;
        for err in kb.extend_from(source) {
            eprintln!("warning: {path}: {err}");
        }
    }
    if kb.rule_count() == 0 {
        return Err(format!("error: no rules loaded\n\n{}", help_text()));
    }
    Ok(Engine::with_config(kb, config))
}

fn read_file(path: &str) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| format!("error: failed to read '{path}': {err}"))
}

fn parse_args() -> Result<CliConfig, String> {
    let mut cli = CliConfig {
        input: None,
        rules: Vec::new(),
        config: None,
        seed: None,
        verbose: false,
        color: io::stdout().is_terminal(),
    };
    let mut args = std::env::args().skip(1).peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("quill {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-v" | "--verbose" => cli.verbose = true,
            "--color" => cli.color = true,
            "--no-color" => cli.color = false,
            "-r" | "--rules" => {
                let value = args.next().ok_or_else(|| "error: --rules expects a file".to_string())?;
                cli.rules.push(value);
            }
            "-c" | "--config" => {
                let value = args.next().ok_or_else(|| "error: --config expects a file".to_string())?;
                cli.config = Some(value);
            }
            "--seed" => {
                let value = args.next().ok_or_else(|| "error: --seed expects a value".to_string())?;
                cli.seed = Some(parse_seed(&value)?);
            }
            "--" => {
                let rest = args.collect::<Vec<_>>().join(" ");
                if !rest.trim().is_empty() {
                    cli.input = Some(rest);
                }
                break;
            }
            _ if arg.starts_with("--rules=") => cli.rules.push(arg.trim_start_matches("--rules=").to_string()),
            _ if arg.starts_with("--config=") => cli.config = Some(arg.trim_start_matches("--config=").to_string()),
            _ if arg.starts_with("--seed=") => cli.seed = Some(parse_seed(arg.trim_start_matches("--seed="))?),
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                cli.input = Some(std::iter::once(arg).chain(args).collect::<Vec<_>>().join(" "));
                break;
            }
        }
    }

    if cli.rules.is_empty() {
        return Err(format!("error: at least one --rules file is required\n\n{}", help_text()));
    }
    Ok(cli)
}

fn parse_seed(value: &str) -> Result<u64, String> {
    value.parse().map_err(|_| format!("error: invalid --seed '{value}' (expected an unsigned integer)"))
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "quill {version}

Rule-based conversational response engine CLI.

Usage:
  quill --rules <file.json> [OPTIONS] [--] <input...>
  quill --rules <file.json> [OPTIONS] < conversation.txt

Without input arguments every stdin line is one turn of a single session.

Options:
  -r, --rules <file>         Knowledge source (JSON). May be repeated.
  -c, --config <file>        Engine configuration (JSON, partial allowed).
  --seed <n>                 Seed for <random> and <shuffle>.
  -v, --verbose              Print the match trace of every sentence.
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  QUILL_LOG                  Log filter, e.g. `quill=debug`. Default: warn

Exit codes:
  0  Success.
  1  Failed to load rules or configuration.
  2  Invalid arguments.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}
