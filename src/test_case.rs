//! Typed test cases and the parsers that build them.
//!
//! Three kinds of cases exist:
//! - [`StrategicTestCase`]: one position from an EPD record, scored by a move → points map
//! - [`ExactCountTestCase`]: a perft node count at a given depth
//! - [`QualityTestCase`]: an ordered list of positions, each with one expected move
//!
//! Moves are stored in long algebraic (UCI) form. Moves written in short algebraic form (SAN)
//! are resolved against the test's own position when the case is built, so an unresolvable
//! move is a load error and never a runtime surprise.

use std::{fmt, str::FromStr};

use shakmaty::{fen::Fen, san::SanPlus, uci::UciMove, CastlingMode, Chess};

/// Points awarded to the best move when a record carries no partial-credit annotation.
pub const DEFAULT_BEST_MOVE_SCORE: i32 = 10;

/// A test case, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestCase {
    Strategic(StrategicTestCase),
    ExactCount(ExactCountTestCase),
    Quality(QualityTestCase),
}

impl TestCase {
    /// Whether this case needs an engine process (and therefore a worker pool slot).
    pub fn needs_engine(&self) -> bool {
        !matches!(self, TestCase::ExactCount(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TestCase::Strategic(_) => "strategic",
            TestCase::ExactCount(_) => "perft",
            TestCase::Quality(_) => "quality",
        }
    }
}

/// Where a parse went wrong inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    /// Byte offset inside the record.
    pub column: usize,
    pub reason: String,
}

impl RecordError {
    fn new(column: usize, reason: impl Into<String>) -> Self {
        Self {
            column,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column {}: {}", self.column, self.reason)
    }
}

/// Move → points table of a strategic test.
///
/// Keys are unique and keep the order of the annotation they were read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScoreMap(Vec<(UciMove, i32)>);

impl ScoreMap {
    /// Map giving `score` to `best_move` only.
    pub fn single(best_move: UciMove, score: i32) -> Self {
        Self(vec![(best_move, score)])
    }

    /// Adds an entry, refusing a move that is already present.
    pub fn insert(&mut self, mv: UciMove, score: i32) -> Result<(), String> {
        if self.0.iter().any(|(m, _)| *m == mv) {
            return Err(format!("move {mv} appears twice"));
        }
        self.0.push((mv, score));
        Ok(())
    }

    /// Points for `mv`, zero when the move is not listed.
    pub fn score_of(&self, mv: &UciMove) -> i32 {
        self.0
            .iter()
            .find_map(|(m, s)| (m == mv).then_some(*s))
            .unwrap_or(0)
    }

    /// Best score reachable in this test.
    pub fn max_score(&self) -> i32 {
        self.0.iter().map(|(_, s)| *s).max().unwrap_or(0).max(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UciMove, i32)> {
        self.0.iter().map(|(m, s)| (m, *s))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ScoreMap {
    /// Annotation form, e.g. `d4d5=10, h5h6=5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .0
            .iter()
            .map(|(m, s)| format!("{m}={s}"))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(", "))
    }
}

/// A single Strategic Test Suite position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategicTestCase {
    position: String,
    best_move: UciMove,
    id: String,
    score_map: ScoreMap,
}

impl StrategicTestCase {
    /// Parses an EPD record such as
    /// `<board> w - - bm d5; id "Undermine.029"; c0 "d5=10, Qxh6=5,";`.
    ///
    /// `bm` and `id` are required. `c0`, when present, is a comma-separated list of
    /// `<move>=<points>` pairs; a trailing comma is accepted.
    pub fn from_epd(record: &str) -> Result<Self, RecordError> {
        let record = record.trim();
        let (fields, ops_start) = split_epd_fields(record)?;
        let position = format!("{} 0 1", fields.join(" "));
        let board = parse_position(&position).map_err(|e| RecordError::new(0, e))?;

        let operations = parse_operations(&record[ops_start..], ops_start)?;
        let find = |opcode: &str| operations.iter().find(|op| op.opcode == opcode);

        let bm = find("bm").ok_or_else(|| RecordError::new(ops_start, "missing 'bm' operation"))?;
        let bm_text = bm
            .operands
            .first()
            .ok_or_else(|| RecordError::new(bm.column, "'bm' has no operand"))?;
        let best_move =
            resolve_move(&board, bm_text).map_err(|e| RecordError::new(bm.column, e))?;

        let id_op = find("id").ok_or_else(|| RecordError::new(ops_start, "missing 'id' operation"))?;
        let id = id_op
            .operands
            .first()
            .cloned()
            .ok_or_else(|| RecordError::new(id_op.column, "'id' has no operand"))?;

        let score_map = match find("c0") {
            None => ScoreMap::single(best_move.clone(), DEFAULT_BEST_MOVE_SCORE),
            Some(c0) => {
                let text = c0.operands.join(" ");
                parse_score_annotation(&board, &text).map_err(|e| RecordError::new(c0.column, e))?
            }
        };

        Ok(Self {
            position,
            best_move,
            id,
            score_map,
        })
    }

    /// Full FEN of the test position (clocks are always `0 1`).
    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn best_move(&self) -> &UciMove {
        &self.best_move
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn score_map(&self) -> &ScoreMap {
        &self.score_map
    }

    /// Serializes the case back to EPD, with every move in UCI notation.
    pub fn to_epd(&self) -> String {
        let epd_fields = self
            .position
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{epd_fields} bm {}; id \"{}\"; c0 \"{}\";",
            self.best_move, self.id, self.score_map
        )
    }
}

/// A perft count to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactCountTestCase {
    position: String,
    depth: u32,
    expected_count: u64,
}

impl ExactCountTestCase {
    pub fn new(position: &str, depth: u32, expected_count: u64) -> Result<Self, String> {
        parse_position(position)?;
        Ok(Self {
            position: position.trim().to_string(),
            depth,
            expected_count,
        })
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn expected_count(&self) -> u64 {
        self.expected_count
    }
}

/// One position of a [`QualityTestCase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityPosition {
    pub position: String,
    pub expected_move: UciMove,
}

/// An ordered list of positions the engine must all get right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityTestCase {
    positions: Vec<QualityPosition>,
}

impl QualityTestCase {
    /// Builds a case from `(fen, uci move)` pairs. Every move must be legal in its position.
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, String> {
        let mut positions = Vec::new();
        for (index, (fen, mv)) in entries.into_iter().enumerate() {
            let board = parse_position(fen).map_err(|e| format!("position {index}: {e}"))?;
            let expected_move = resolve_uci(&board, mv).map_err(|e| format!("position {index}: {e}"))?;
            positions.push(QualityPosition {
                position: fen.trim().to_string(),
                expected_move,
            });
        }
        if positions.is_empty() {
            return Err("quality test has no positions".to_string());
        }
        Ok(Self { positions })
    }

    pub fn positions(&self) -> &[QualityPosition] {
        &self.positions
    }
}

/// Parses a FEN into a legal position.
pub(crate) fn parse_position(fen: &str) -> Result<Chess, String> {
    let parsed = Fen::from_str(fen.trim()).map_err(|e| format!("invalid FEN '{fen}': {e}"))?;
    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| format!("illegal position '{fen}': {e}"))
}

/// Resolves a move written in SAN (`Qxh6`, `O-O`) or UCI (`h5h6`) against `board`.
fn resolve_move(board: &Chess, text: &str) -> Result<UciMove, String> {
    if let Ok(san) = SanPlus::from_str(text) {
        if let Ok(m) = san.san.to_move(board) {
            return Ok(m.to_uci(CastlingMode::Standard));
        }
    }
    resolve_uci(board, text).map_err(|_| format!("'{text}' is not a legal move in this position"))
}

fn resolve_uci(board: &Chess, text: &str) -> Result<UciMove, String> {
    let uci = UciMove::from_str(text.trim()).map_err(|e| format!("invalid move '{text}': {e}"))?;
    let m = uci
        .to_move(board)
        .map_err(|e| format!("illegal move '{text}': {e}"))?;
    Ok(m.to_uci(CastlingMode::Standard))
}

fn parse_score_annotation(board: &Chess, text: &str) -> Result<ScoreMap, String> {
    let mut map = ScoreMap::default();
    for pair in text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        let (mv, score) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected '<move>=<score>', got '{pair}'"))?;
        let score: i32 = score
            .parse()
            .map_err(|_| format!("invalid score '{score}' for move '{mv}'"))?;
        let mv = resolve_move(board, mv)?;
        map.insert(mv, score)?;
    }
    if map.is_empty() {
        return Err("empty 'c0' annotation".to_string());
    }
    Ok(map)
}

/// Returns the four position fields of an EPD record and the offset where operations start.
fn split_epd_fields(record: &str) -> Result<(Vec<&str>, usize), RecordError> {
    let mut fields = Vec::with_capacity(4);
    let mut offset = 0;
    while fields.len() < 4 {
        let rest = &record[offset..];
        let skipped = rest.len() - rest.trim_start().len();
        offset += skipped;
        let rest = &record[offset..];
        if rest.is_empty() {
            return Err(RecordError::new(
                offset,
                format!("expected 4 position fields, found {}", fields.len()),
            ));
        }
        let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        fields.push(&rest[..len]);
        offset += len;
    }
    Ok((fields, offset))
}

#[derive(Debug)]
struct Operation {
    opcode: String,
    operands: Vec<String>,
    column: usize,
}

/// Splits `opcode operand* ;` groups. Quoted operands may contain spaces and semicolons.
fn parse_operations(text: &str, base: usize) -> Result<Vec<Operation>, RecordError> {
    let mut operations = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut op_column = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                op_column.get_or_insert(base + i);
                let mut quoted = String::new();
                let mut closed = false;
                for (_, qc) in chars.by_ref() {
                    if qc == '"' {
                        closed = true;
                        break;
                    }
                    quoted.push(qc);
                }
                if !closed {
                    return Err(RecordError::new(base + i, "unterminated string"));
                }
                tokens.push(quoted);
            }
            ';' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                if let Some(column) = op_column.take() {
                    let mut iter = tokens.drain(..);
                    // a quoted opcode would be odd but harmless
                    let opcode = iter.next().unwrap_or_default();
                    operations.push(Operation {
                        opcode,
                        operands: iter.collect(),
                        column,
                    });
                }
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => {
                op_column.get_or_insert(base + i);
                current.push(c);
            }
        }
    }
    if !current.is_empty() || !tokens.is_empty() {
        return Err(RecordError::new(
            op_column.unwrap_or(base),
            "operation is not terminated by ';'",
        ));
    }
    Ok(operations)
}
