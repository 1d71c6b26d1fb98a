//! Parsers for the two on-disk suite formats.
//!
//! EPD suites hold one strategic position per line. JSON definitions hold either a perft
//! position with counts per depth:
//!
//! ```json
//! { "kind": "perft", "fen": "<FEN>", "counts": { "1": 20, "2": 400 } }
//! ```
//!
//! or an ordered list of quality positions:
//!
//! ```json
//! { "kind": "quality", "positions": [ { "fen": "<FEN>", "bestmove": "e2e4" } ] }
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    error::HarnessError,
    test_case::{ExactCountTestCase, QualityTestCase, StrategicTestCase, TestCase},
};

use super::SuiteCase;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Definition {
    Perft {
        fen: String,
        counts: HashMap<String, u64>,
    },
    Quality {
        positions: Vec<QualityEntry>,
    },
}

#[derive(Debug, Deserialize)]
struct QualityEntry {
    fen: String,
    bestmove: String,
}

/// Parses an EPD suite. Blank lines and lines starting with `#` are skipped.
pub(crate) fn parse_epd(origin: &str, text: &str) -> (Vec<SuiteCase>, Vec<HarnessError>) {
    let mut cases = Vec::new();
    let mut malformed = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let record = line.trim();
        if record.is_empty() || record.starts_with('#') {
            continue;
        }
        match StrategicTestCase::from_epd(record) {
            Ok(case) => cases.push(SuiteCase {
                origin: format!("{origin}:{line_number}"),
                case: TestCase::Strategic(case),
            }),
            Err(e) => malformed.push(HarnessError::malformed(
                origin,
                line_number,
                record,
                e.to_string(),
            )),
        }
    }

    (cases, malformed)
}

/// Parses a JSON definition into one case per perft depth, or a single quality case.
pub(crate) fn parse_definition(origin: &str, text: &str) -> Result<Vec<SuiteCase>, HarnessError> {
    let definition: Definition = serde_json::from_str(text).map_err(|e| {
        HarnessError::malformed(origin, e.line(), first_line(text), e.to_string())
    })?;
    let malformed = |reason: String| HarnessError::malformed(origin, 1, first_line(text), reason);

    match definition {
        Definition::Perft { fen, counts } => {
            let mut counts = counts
                .into_iter()
                .map(|(depth, count)| {
                    depth
                        .trim()
                        .parse::<u32>()
                        .map(|depth| (depth, count))
                        .map_err(|_| malformed(format!("invalid perft depth '{depth}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if counts.is_empty() {
                return Err(malformed("perft definition has no counts".to_string()));
            }
            counts.sort_unstable();

            counts
                .into_iter()
                .map(|(depth, count)| {
                    ExactCountTestCase::new(&fen, depth, count)
                        .map(|case| SuiteCase {
                            origin: origin.to_string(),
                            case: TestCase::ExactCount(case),
                        })
                        .map_err(malformed)
                })
                .collect()
        }
        Definition::Quality { positions } => {
            let case = QualityTestCase::new(
                positions
                    .iter()
                    .map(|entry| (entry.fen.as_str(), entry.bestmove.as_str())),
            )
            .map_err(malformed)?;
            Ok(vec![SuiteCase {
                origin: origin.to_string(),
                case: TestCase::Quality(case),
            }])
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn perft_definition_yields_one_case_per_depth_in_order() {
        let text = format!(r#"{{ "kind": "perft", "fen": "{START}", "counts": {{ "3": 8902, "1": 20, "2": 400 }} }}"#);
        let cases = parse_definition("start.json", &text).unwrap();
        let depths = cases
            .iter()
            .map(|c| match &c.case {
                TestCase::ExactCount(case) => (case.depth(), case.expected_count()),
                _ => panic!("not a perft case"),
            })
            .collect::<Vec<_>>();
        assert_eq!(depths, vec![(1, 20), (2, 400), (3, 8902)]);
        assert!(cases.iter().all(|c| c.origin == "start.json"));
    }

    #[test]
    fn quality_definition_is_one_case() {
        let text = format!(
            r#"{{ "kind": "quality", "positions": [ {{ "fen": "{START}", "bestmove": "e2e4" }} ] }}"#
        );
        let cases = parse_definition("q.json", &text).unwrap();
        assert_eq!(cases.len(), 1);
        assert!(matches!(cases[0].case, TestCase::Quality(_)));
    }

    #[test]
    fn bad_definitions_are_malformed() {
        for text in [
            r#"{ "kind": "tactics" }"#,
            r#"{ "kind": "perft", "fen": "nope", "counts": { "1": 20 } }"#,
            r#"{ "kind": "perft", "fen": "8/8/8/8/8/8/8/K6k w - - 0 1", "counts": { "one": 3 } }"#,
            r#"{ "kind": "quality", "positions": [] }"#,
            "not json",
        ] {
            let err = parse_definition("bad.json", text).unwrap_err();
            assert!(matches!(err, HarnessError::MalformedTestCase { .. }), "{text}");
        }
    }

    #[test]
    fn epd_skips_comments_and_reports_bad_lines() {
        let text = "\
# strategic positions
2r2rk1/pb2q2p/1pn1p2p/5p1Q/3P4/P1NB4/1P3PPP/R4RK1 w - - bm d5; id \"A\";

8/8/8 w - - bm e4; id \"B\";
";
        let (cases, malformed) = parse_epd("s.epd", text);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].origin, "s.epd:2");
        assert_eq!(malformed.len(), 1);
        assert!(matches!(
            malformed[0],
            HarnessError::MalformedTestCase { line: 4, .. }
        ));
    }
}
