//! Line-level view of the UCI protocol, from the controlling side.
//!
//! [`Command`] is what the harness writes to an engine, [`EngineMessage`] is what it reads back.
//! Only the messages needed to identify an engine, configure it and extract a decision are
//! understood; everything else is kept as [`EngineMessage::Unknown`] and ignored.

use std::{fmt, time::Duration};

/// A command sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Uci,
    IsReady,
    SetOption { name: String, value: String },
    UciNewGame,
    Position { fen: String },
    Go { movetime: Duration },
    Stop,
    Quit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Uci => write!(f, "uci"),
            Command::IsReady => write!(f, "isready"),
            Command::SetOption { name, value } => write!(f, "setoption name {name} value {value}"),
            Command::UciNewGame => write!(f, "ucinewgame"),
            Command::Position { fen } => write!(f, "position fen {fen}"),
            Command::Go { movetime } => write!(f, "go movetime {}", movetime.as_millis()),
            Command::Stop => write!(f, "stop"),
            Command::Quit => write!(f, "quit"),
        }
    }
}

/// Score reported in an `info` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Centipawns, from the side to move.
    Cp(i32),
    /// Moves to mate, negative when the engine is getting mated.
    Mate(i32),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(cp) => write!(f, "cp {cp}"),
            Score::Mate(n) => write!(f, "mate {n}"),
        }
    }
}

/// The fields of an `info` line the harness keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
}

impl Info {
    /// Overwrites the known fields with the ones present in `newer`.
    pub fn merge(&mut self, newer: Info) {
        self.depth = newer.depth.or(self.depth);
        self.nodes = newer.nodes.or(self.nodes);
        self.score = newer.score.or(self.score);
    }
}

/// An `option` advertised during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedOption {
    pub name: String,
    pub kind: String,
    pub default: Option<String>,
}

/// A line received from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    Id { key: String, value: String },
    UciOk,
    ReadyOk,
    Option(AdvertisedOption),
    Info(Info),
    /// `bestmove <move>`, any `ponder` suffix is dropped.
    BestMove { mv: String },
    Unknown(String),
}

/// Parses one line of engine output.
pub fn parse_engine_line(line: &str) -> EngineMessage {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["uciok", ..] => EngineMessage::UciOk,
        ["readyok", ..] => EngineMessage::ReadyOk,
        ["id", key, value @ ..] => EngineMessage::Id {
            key: key.to_string(),
            value: value.join(" "),
        },
        ["bestmove", mv, ..] => EngineMessage::BestMove { mv: mv.to_string() },
        ["info", rest @ ..] => EngineMessage::Info(parse_info(rest)),
        ["option", rest @ ..] => match parse_option(rest) {
            Some(option) => EngineMessage::Option(option),
            None => EngineMessage::Unknown(line.to_string()),
        },
        _ => EngineMessage::Unknown(line.to_string()),
    }
}

fn parse_info(parts: &[&str]) -> Info {
    let mut info = Info::default();
    let mut i = 0usize;
    while i < parts.len() {
        match parts[i] {
            "depth" => {
                info.depth = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "nodes" => {
                info.nodes = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "score" => {
                let value = parts.get(i + 2).and_then(|v| v.parse().ok());
                info.score = match (parts.get(i + 1), value) {
                    (Some(&"cp"), Some(v)) => Some(Score::Cp(v)),
                    (Some(&"mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => info.score,
                };
                i += 3;
            }
            // the rest of the line is free text or a move list
            "string" | "pv" => break,
            _ => i += 1,
        }
    }
    info
}

fn parse_option(parts: &[&str]) -> Option<AdvertisedOption> {
    // option name <name...> type <kind> [default <value...>] [min ..] [max ..] [var ..]*
    let name_at = parts.iter().position(|&p| p == "name")?;
    let type_at = parts.iter().position(|&p| p == "type")?;
    if type_at <= name_at + 1 {
        return None;
    }
    let name = parts[name_at + 1..type_at].join(" ");
    let kind = parts.get(type_at + 1)?.to_string();
    let default = parts.iter().position(|&p| p == "default").map(|at| {
        parts[at + 1..]
            .iter()
            .take_while(|&&p| !matches!(p, "min" | "max" | "var"))
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    });
    Some(AdvertisedOption {
        name,
        kind,
        default,
    })
}
