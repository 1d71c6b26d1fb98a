//! A deterministic UCI engine for exercising the harness.
//!
//! It answers every `go` from a book of `<FEN> | <uci move>` lines, and falls back to the first
//! legal move in UCI order for positions the book does not know. Flags make it misbehave in the
//! ways real engines do.

use std::{
    collections::HashMap,
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
    thread,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;
use shakmaty::{fen::Fen, CastlingMode, Chess, Position};

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File of `<FEN> | <uci move>` lines.
    #[arg(long)]
    book: Option<PathBuf>,

    /// Always answer this move, whatever the position.
    #[arg(long)]
    answer: Option<String>,

    #[arg(long, default_value = "Scripted")]
    name: String,

    /// Option to advertise, as a spin from 0 to 20. Repeatable.
    #[arg(long = "option")]
    options: Vec<String>,

    /// Time spent "thinking" before answering, in milliseconds.
    #[arg(long, default_value_t = 0)]
    think_ms: u64,

    /// Never answer `go`, but still obey `quit`.
    #[arg(long)]
    hang: bool,

    /// Answer `go` with a move that does not parse.
    #[arg(long)]
    garbage: bool,

    /// Exit as soon as `go` is received.
    #[arg(long)]
    crash: bool,

    /// Never send `uciok`.
    #[arg(long)]
    no_uciok: bool,

    /// Directory where the engine keeps a file named after its pid while it runs.
    #[arg(long)]
    live_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let book = match &args.book {
        Some(path) => load_book(path)?,
        None => HashMap::new(),
    };

    let live_file = args
        .live_dir
        .as_ref()
        .map(|dir| dir.join(std::process::id().to_string()));
    if let Some(file) = &live_file {
        fs::write(file, "").context("cannot create live file")?;
    }

    let result = serve(&args, &book);

    if let Some(file) = &live_file {
        let _ = fs::remove_file(file);
    }
    result
}

fn serve(args: &Args, book: &HashMap<String, String>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    let mut position = Chess::default();
    let mut fen_key = key(START_FEN);

    for line in stdin.lock().lines() {
        let line = line?;
        let words = line.split_whitespace().collect::<Vec<_>>();
        match words.as_slice() {
            ["uci"] => {
                writeln!(out, "id name {}", args.name)?;
                writeln!(out, "id author harness tests")?;
                for option in &args.options {
                    writeln!(out, "option name {option} type spin default 0 min 0 max 20")?;
                }
                if !args.no_uciok {
                    writeln!(out, "uciok")?;
                }
            }
            ["isready"] => writeln!(out, "readyok")?,
            ["setoption", ..] | ["ucinewgame"] | ["stop"] => {}
            ["position", "startpos", ..] => {
                position = Chess::default();
                fen_key = key(START_FEN);
            }
            ["position", "fen", fen @ ..] => {
                let fen = fen.join(" ");
                position = parse(&fen)?;
                fen_key = key(&fen);
            }
            ["go", ..] => {
                if args.crash {
                    bail!("crashing on go");
                }
                if args.hang {
                    continue;
                }
                thread::sleep(Duration::from_millis(args.think_ms));
                let best = if args.garbage {
                    "zz99".to_string()
                } else if let Some(answer) = &args.answer {
                    answer.clone()
                } else if let Some(mv) = book.get(&fen_key) {
                    mv.clone()
                } else {
                    first_legal_move(&position)
                };
                let nodes = position.legal_moves().len();
                writeln!(out, "info depth 1 score cp 0 nodes {nodes} pv {best}")?;
                writeln!(out, "bestmove {best}")?;
            }
            ["quit"] => break,
            _ => writeln!(out, "info string unknown command: {line}")?,
        }
        out.flush()?;
    }
    Ok(())
}

fn load_book(path: &PathBuf) -> anyhow::Result<HashMap<String, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read book '{}'", path.display()))?;
    let mut book = HashMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((fen, mv)) = line.split_once('|') else {
            bail!("book line without '|': {line}");
        };
        book.insert(key(fen), mv.trim().to_string());
    }
    Ok(book)
}

// board, side, castling and en passant, clocks ignored
fn key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

fn parse(fen: &str) -> anyhow::Result<Chess> {
    let fen: Fen = fen.parse().context("invalid FEN")?;
    Ok(fen.into_position(CastlingMode::Standard)?)
}

fn first_legal_move(position: &Chess) -> String {
    position
        .legal_moves()
        .iter()
        .map(|m| m.to_uci(CastlingMode::Standard).to_string())
        .min()
        .unwrap_or_else(|| "0000".to_string())
}
