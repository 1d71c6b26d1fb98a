use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use uci_harness::prelude::*;

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Runs strategic, perft and quality suites against a UCI chess engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run suites from files or directories.
    Run(RunArgs),
    /// Spawn an engine, print what it advertises and ask it for one move.
    Probe {
        #[arg(short, long)]
        engine: PathBuf,

        #[arg(long, default_value_t = 200)]
        move_time: u64,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Suite files or directories. Defaults to `./tests`.
    paths: Vec<PathBuf>,

    /// Engine executable under test.
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Argument passed to the engine. Repeatable.
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Perft verification executable.
    #[arg(long)]
    perft: Option<PathBuf>,

    /// Maximum number of engine processes alive at once.
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Think time per position, in milliseconds.
    #[arg(long)]
    move_time: Option<u64>,

    /// Time a released engine gets to exit before it is killed, in milliseconds.
    #[arg(long)]
    quit_timeout: Option<u64>,

    /// Value sent to the engine's strength option.
    #[arg(long)]
    strength: Option<i64>,

    /// Name of the engine's strength option.
    #[arg(long)]
    strength_option: Option<String>,

    /// Reuse one engine for all positions of a quality test.
    #[arg(long)]
    per_case: bool,

    /// Print a machine-readable tally at the end.
    #[arg(long)]
    extended: bool,

    /// Log to a file in the working directory.
    #[arg(long)]
    log: bool,

    /// Only print the summary.
    #[arg(short, long)]
    quiet: bool,

    /// Let engine stderr through.
    #[arg(long)]
    debug_engine_stderr: bool,
}

impl RunArgs {
    fn configuration(&self) -> Configuration {
        let mut config = Configuration::from_env();
        if let Some(engine) = &self.engine {
            config = config.with_engine(engine);
        }
        if !self.engine_args.is_empty() {
            config = config.with_engine_args(self.engine_args.clone());
        }
        if let Some(perft) = &self.perft {
            config = config.with_perft(perft);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(ms) = self.move_time {
            config = config.with_move_time(Duration::from_millis(ms));
        }
        if let Some(ms) = self.quit_timeout {
            config = config.with_quit_timeout(Duration::from_millis(ms));
        }
        if self.strength.is_some() {
            config = config.with_strength(self.strength);
        }
        if let Some(name) = &self.strength_option {
            config = config.with_strength_option(name);
        }
        if self.per_case {
            config = config.with_spawn_policy(SpawnPolicy::PerCase);
        }
        if self.extended {
            config = config.with_extended(true);
        }
        if self.log {
            config = config.with_log(true);
        }
        if self.quiet {
            config = config.with_verbose(false);
        }
        if self.debug_engine_stderr {
            config = config.with_debug_engine_stderr(true);
        }
        config
    }
}

fn main() -> anyhow::Result<ExitCode> {
    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Probe { engine, move_time } => probe(engine, Duration::from_millis(move_time)),
    }
}

fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = args.configuration();
    let paths = if args.paths.is_empty() {
        vec![std::env::current_dir()?.join("tests")]
    } else {
        args.paths.clone()
    };

    let collection = collect_suites(&paths, config.verbose())?;
    config
        .validate(collection.needs_engine())
        .context("cannot run these suites")?;

    let extended = config.extended();
    let factory = UciEngineFactory::from_config(&config);
    let report = match Harness::new(factory, config).run(collection) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("\x1b[31mrun aborted: {e}\x1b[0m");
            return Ok(ExitCode::from(2));
        }
    };

    print_summary(&report);
    if extended {
        println!("{}", report.to_json()?);
    }
    Ok(ExitCode::from(report.exit_code()))
}

fn probe(path: PathBuf, move_time: Duration) -> anyhow::Result<ExitCode> {
    let mut engine = UciEngineFactory::new(&path)
        .spawn()
        .with_context(|| format!("cannot start '{}'", path.display()))?;

    println!("name:   {}", engine.name().unwrap_or("(none)"));
    println!("author: {}", engine.author().unwrap_or("(none)"));
    println!("options:");
    for option in engine.options() {
        match &option.default {
            Some(default) => println!("  {} ({}, default {default})", option.name, option.kind),
            None => println!("  {} ({})", option.name, option.kind),
        }
    }

    engine
        .ping(Duration::from_secs(5))
        .context("engine did not answer isready")?;
    let decision = engine
        .evaluate(START_FEN, move_time)
        .context("engine did not pick a move in the start position")?;
    println!(
        "bestmove {} (depth {:?}, nodes {:?}, score {:?})",
        decision.best_move, decision.depth, decision.nodes, decision.score
    );

    engine.release();
    Ok(ExitCode::SUCCESS)
}
