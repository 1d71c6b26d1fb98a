//! Counts the leaf nodes of the legal move tree of a position.
//!
//! `perft <FEN> --depth N` prints a single integer, nothing else, so the harness can read it
//! back.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use shakmaty::{fen::Fen, CastlingMode, Chess, Position};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Position to count from.
    fen: String,

    #[arg(short, long, default_value_t = 1)]
    depth: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match count(&args.fen, args.depth) {
        Ok(nodes) => {
            println!("{nodes}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("perft: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn count(fen: &str, depth: u32) -> anyhow::Result<u64> {
    let fen: Fen = fen.trim().parse().context("invalid FEN")?;
    let pos: Chess = fen
        .into_position(CastlingMode::Standard)
        .context("illegal position")?;
    Ok(perft(&pos, depth))
}

fn perft(pos: &Chess, depth: u32) -> u64 {
    let moves = pos.legal_moves();
    match depth {
        0 => 1,
        1 => moves.len() as u64,
        _ => moves
            .iter()
            .map(|m| {
                let mut child = pos.clone();
                child.play_unchecked(m);
                perft(&child, depth - 1)
            })
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_counts() {
        let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        assert_eq!(count(start, 0).unwrap(), 1);
        assert_eq!(count(start, 1).unwrap(), 20);
        assert_eq!(count(start, 2).unwrap(), 400);
        assert_eq!(count(start, 3).unwrap(), 8902);
    }

    #[test]
    fn kiwipete_counts() {
        let kiwipete = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
        assert_eq!(count(kiwipete, 1).unwrap(), 48);
        assert_eq!(count(kiwipete, 2).unwrap(), 2039);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(count("not a fen", 1).is_err());
    }
}
