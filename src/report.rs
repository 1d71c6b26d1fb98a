//! Results of test cases and their aggregation.
//!
//! A [`TestResult`] is produced exactly once per case. A [`SuiteReport`] is nothing more than the
//! ordered results of one suite, and every total is a fold over them. [`RunReport`] groups the
//! suites of a run together with the records that could not be loaded.

use std::{fmt, io::Write};

use serde::{Serialize, Serializer};
use shakmaty::uci::UciMove;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

fn as_display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn as_display_opt<T: fmt::Display, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

/// Outcome of a strategic test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategicResult {
    pub id: String,
    pub position: String,
    #[serde(serialize_with = "as_display")]
    pub expected: UciMove,
    #[serde(serialize_with = "as_display_opt")]
    pub actual: Option<UciMove>,
    pub score: i32,
    pub max_score: i32,
    pub error: Option<String>,
}

/// Outcome of a perft count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExactCountResult {
    pub position: String,
    pub depth: u32,
    pub pass: bool,
    pub expected: u64,
    pub actual: Option<u64>,
    pub error: Option<String>,
}

/// Outcome of a quality test. Failure fields describe the first failing position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityResult {
    pub pass: bool,
    pub failing_index: Option<usize>,
    pub position: Option<String>,
    #[serde(serialize_with = "as_display_opt")]
    pub expected: Option<UciMove>,
    #[serde(serialize_with = "as_display_opt")]
    pub actual: Option<UciMove>,
    /// Positions the engine was asked about.
    pub evaluated: usize,
    pub error: Option<String>,
}

/// Result of exactly one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TestResult {
    Strategic(StrategicResult),
    #[serde(rename = "perft")]
    ExactCount(ExactCountResult),
    Quality(QualityResult),
}

impl TestResult {
    /// Strategic tests pass when the best move was found; the others carry their own verdict.
    pub fn passed(&self) -> bool {
        match self {
            TestResult::Strategic(r) => r.actual.as_ref() == Some(&r.expected),
            TestResult::ExactCount(r) => r.pass,
            TestResult::Quality(r) => r.pass,
        }
    }

    /// Points earned, for strategic tests.
    pub fn score(&self) -> Option<i32> {
        match self {
            TestResult::Strategic(r) => Some(r.score),
            _ => None,
        }
    }

    /// Progress marker: `.` pass, `+` partial credit, `!` failure.
    pub fn marker(&self) -> char {
        match self {
            _ if self.passed() => '.',
            TestResult::Strategic(r) if r.score > 0 => '+',
            _ => '!',
        }
    }
}

/// A result together with where its test came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub origin: String,
    pub result: TestResult,
}

impl fmt::Display for CaseReport {
    /// One failure line of the final summary.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = &self.origin;
        match &self.result {
            TestResult::ExactCount(r) => {
                let actual = r
                    .actual
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "no count".to_string());
                write!(
                    f,
                    "({origin}) perft: {} (depth {}) => {actual} (expected {})",
                    r.position, r.depth, r.expected
                )?;
            }
            TestResult::Quality(r) => {
                let position = r.position.as_deref().unwrap_or("?");
                let actual = r
                    .actual
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "no move".to_string());
                let expected = r
                    .expected
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_default();
                write!(f, "({origin}) quality: {position} => {actual} (expected {expected})")?;
            }
            TestResult::Strategic(r) => {
                let actual = r
                    .actual
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "no move".to_string());
                write!(
                    f,
                    "({origin}) strategic {}: {actual} scored {}/{} (best {})",
                    r.id, r.score, r.max_score, r.expected
                )?;
            }
        }
        let error = match &self.result {
            TestResult::Strategic(r) => r.error.as_deref(),
            TestResult::ExactCount(r) => r.error.as_deref(),
            TestResult::Quality(r) => r.error.as_deref(),
        };
        if let Some(error) = error {
            write!(f, " [{error}]")?;
        }
        Ok(())
    }
}

/// Ordered results of one suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(name: impl Into<String>, cases: Vec<CaseReport>) -> Self {
        Self {
            name: name.into(),
            cases,
        }
    }

    /// Sum of strategic scores.
    pub fn score(&self) -> i64 {
        self.cases
            .iter()
            .filter_map(|c| c.result.score())
            .map(i64::from)
            .sum()
    }

    /// Best reachable sum of strategic scores.
    pub fn max_score(&self) -> i64 {
        self.cases
            .iter()
            .filter_map(|c| match &c.result {
                TestResult::Strategic(r) => Some(i64::from(r.max_score)),
                _ => None,
            })
            .sum()
    }

    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.result.passed()).count()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Whether the suite is judged by its score rather than by pass/fail.
    pub fn is_scored(&self) -> bool {
        self.cases
            .iter()
            .any(|c| matches!(c.result, TestResult::Strategic(_)))
    }

    /// Pass/fail results that failed. Strategic results never count as failures.
    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases
            .iter()
            .filter(|c| !matches!(c.result, TestResult::Strategic(_)) && !c.result.passed())
    }

    /// Strategic results that missed the best move.
    pub fn misses(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases
            .iter()
            .filter(|c| matches!(c.result, TestResult::Strategic(_)) && !c.result.passed())
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
    /// Records that could not be loaded, already formatted.
    pub malformed: Vec<String>,
}

impl RunReport {
    pub fn score(&self) -> i64 {
        self.suites.iter().map(SuiteReport::score).sum()
    }

    pub fn max_score(&self) -> i64 {
        self.suites.iter().map(SuiteReport::max_score).sum()
    }

    pub fn passed(&self) -> usize {
        self.suites.iter().map(SuiteReport::passed).sum()
    }

    pub fn total(&self) -> usize {
        self.suites.iter().map(SuiteReport::len).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.suites.iter().flat_map(SuiteReport::failures)
    }

    /// `0` when no pass/fail test failed and every record loaded, `1` otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.failures().next().is_none() && self.malformed.is_empty() {
            0
        } else {
            1
        }
    }

    /// Machine-readable tally.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Tally<'a> {
            score: i64,
            max_score: i64,
            passed: usize,
            total: usize,
            exit_code: u8,
            #[serde(flatten)]
            report: &'a RunReport,
        }
        serde_json::to_string_pretty(&Tally {
            score: self.score(),
            max_score: self.max_score(),
            passed: self.passed(),
            total: self.total(),
            exit_code: self.exit_code(),
            report: self,
        })
    }
}

pub(crate) fn print_marker(result: &TestResult) {
    let color = match result.marker() {
        '.' => GREEN,
        '+' => YELLOW,
        _ => RED,
    };
    print!("{color}{}{RESET}", result.marker());
    let _ = std::io::stdout().flush();
}

pub(crate) fn print_suite_header(name: &str, cases: usize) {
    println!("Running {name} ({cases} tests)");
}

pub(crate) fn print_suite_subtotal(suite: &SuiteReport) {
    println!();
    if suite.is_scored() {
        println!(
            "{}: score {}/{}, {}/{} best moves",
            suite.name,
            suite.score(),
            suite.max_score(),
            suite.passed(),
            suite.len()
        );
    } else {
        println!("{}: {}/{} passed", suite.name, suite.passed(), suite.len());
    }
}

/// Prints every failure and the grand total.
pub fn print_summary(report: &RunReport) {
    let failures = report.failures().collect::<Vec<_>>();
    let misses = report
        .suites
        .iter()
        .flat_map(SuiteReport::misses)
        .collect::<Vec<_>>();

    if !failures.is_empty() || !report.malformed.is_empty() {
        println!("=====================================");
    }
    if !report.malformed.is_empty() {
        println!("{YELLOW}Malformed Tests:{RESET}");
        for malformed in &report.malformed {
            println!("  {malformed}");
        }
    }
    if !failures.is_empty() {
        println!("{RED}Failed Tests:{RESET}");
        for failure in &failures {
            println!("  {failure}");
        }
    }
    if !failures.is_empty() || !report.malformed.is_empty() {
        println!("=====================================");
    }
    if !misses.is_empty() {
        println!("Missed best moves: {}", misses.len());
        for miss in &misses {
            println!("  {miss}");
        }
    }
    println!("{}/{} passed", report.passed(), report.total());
    if report.max_score() > 0 {
        println!("score {}/{}", report.score(), report.max_score());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategic(score: i32, actual: Option<&str>) -> CaseReport {
        CaseReport {
            origin: "sts.epd:1".into(),
            result: TestResult::Strategic(StrategicResult {
                id: "X".into(),
                position: "fen".into(),
                expected: "d4d5".parse().unwrap(),
                actual: actual.map(|m| m.parse().unwrap()),
                score,
                max_score: 10,
                error: None,
            }),
        }
    }

    fn perft(expected: u64, actual: u64) -> CaseReport {
        CaseReport {
            origin: "tests/perft/start.json".into(),
            result: TestResult::ExactCount(ExactCountResult {
                position: "startpos".into(),
                depth: 1,
                pass: expected == actual,
                expected,
                actual: Some(actual),
                error: None,
            }),
        }
    }

    #[test]
    fn suite_totals_are_folds() {
        let suite = SuiteReport::new(
            "sts",
            vec![
                strategic(10, Some("d4d5")),
                strategic(5, Some("h5h6")),
                strategic(0, None),
            ],
        );
        assert_eq!(suite.score(), 15);
        assert_eq!(suite.max_score(), 30);
        assert_eq!(suite.passed(), 1);
        assert!(suite.is_scored());
        assert_eq!(suite.failures().count(), 0);
        assert_eq!(suite.misses().count(), 2);
    }

    #[test]
    fn markers() {
        assert_eq!(strategic(10, Some("d4d5")).result.marker(), '.');
        assert_eq!(strategic(5, Some("h5h6")).result.marker(), '+');
        assert_eq!(strategic(0, Some("a2a3")).result.marker(), '!');
        assert_eq!(perft(20, 19).result.marker(), '!');
    }

    #[test]
    fn scored_runs_exit_zero_boolean_failures_do_not() {
        let scored = RunReport {
            suites: vec![SuiteReport::new("sts", vec![strategic(0, None)])],
            malformed: vec![],
        };
        assert_eq!(scored.exit_code(), 0);

        let failing = RunReport {
            suites: vec![SuiteReport::new("perft", vec![perft(20, 20), perft(20, 19)])],
            malformed: vec![],
        };
        assert_eq!(failing.exit_code(), 1);

        let malformed = RunReport {
            suites: vec![],
            malformed: vec!["bad line".into()],
        };
        assert_eq!(malformed.exit_code(), 1);
    }

    #[test]
    fn failure_line_names_origin_and_values() {
        let line = perft(20, 19).to_string();
        assert_eq!(
            line,
            "(tests/perft/start.json) perft: startpos (depth 1) => 19 (expected 20)"
        );
    }

    #[test]
    fn json_tally_is_machine_readable() {
        let report = RunReport {
            suites: vec![SuiteReport::new("sts", vec![strategic(5, Some("h5h6"))])],
            malformed: vec![],
        };
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["score"], 5);
        assert_eq!(value["max_score"], 10);
        assert_eq!(value["suites"][0]["cases"][0]["result"]["kind"], "strategic");
        assert_eq!(value["suites"][0]["cases"][0]["result"]["actual"], "h5h6");
    }
}
