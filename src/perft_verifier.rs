//! Checks exact move counts with an external perft executable.
//!
//! The verifier is invoked as `<executable> <FEN> --depth <N>` and must print the number of
//! leaf nodes as a single integer on stdout. It runs on the calling thread and holds no
//! worker pool slot.

use std::{
    io::ErrorKind,
    path::PathBuf,
    process::{Command, Stdio},
};

use tracing::{debug, instrument, warn};

use crate::{
    error::HarnessError,
    report::{ExactCountResult, TestResult},
    test_case::ExactCountTestCase,
};

#[derive(Debug, Clone)]
pub struct PerftVerifier {
    executable: PathBuf,
}

impl PerftVerifier {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Counts the leaves of `case` and compares them with the expected count.
    ///
    /// Fails with [`HarnessError::ProcessSpawn`] only if the executable cannot be started.
    /// Any other problem is a failed result without an actual count.
    #[instrument(skip_all, fields(depth = case.depth()))]
    pub fn verify(&self, case: &ExactCountTestCase) -> Result<TestResult, HarnessError> {
        let (actual, error) = match self.count(case.position(), case.depth())? {
            Ok(count) => (Some(count), None),
            Err(reason) => {
                warn!(position = case.position(), %reason);
                (None, Some(reason))
            }
        };
        debug!(?actual, expected = case.expected_count());

        Ok(TestResult::ExactCount(ExactCountResult {
            position: case.position().to_string(),
            depth: case.depth(),
            pass: actual == Some(case.expected_count()),
            expected: case.expected_count(),
            actual,
            error,
        }))
    }

    // outer error is fatal, inner error fails the case
    fn count(&self, fen: &str, depth: u32) -> Result<Result<u64, String>, HarnessError> {
        let output = Command::new(&self.executable)
            .arg(fen)
            .arg("--depth")
            .arg(depth.to_string())
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| HarnessError::ProcessSpawn {
                path: self.executable.clone(),
                reason: match e.kind() {
                    ErrorKind::NotFound => "executable not found".to_string(),
                    _ => e.to_string(),
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(Err(format!(
                "verifier exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_count(&stdout))
    }
}

fn parse_count(stdout: &str) -> Result<u64, String> {
    let mut tokens = stdout.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(count), None) => count
            .parse()
            .map_err(|_| format!("verifier printed '{count}' instead of a count")),
        (None, _) => Err("verifier printed nothing".to_string()),
        (Some(_), Some(_)) => Err(format!(
            "verifier printed more than a count: '{}'",
            stdout.trim()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_a_single_integer() {
        assert_eq!(parse_count("20\n"), Ok(20));
        assert_eq!(parse_count("  8902 "), Ok(8902));
        assert!(parse_count("").is_err());
        assert!(parse_count("nodes: 20").is_err());
        assert!(parse_count("-3").is_err());
    }

    #[test]
    fn missing_verifier_is_fatal() {
        let case = ExactCountTestCase::new(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            1,
            20,
        )
        .unwrap();
        let err = PerftVerifier::new("/definitely/not/a/perft")
            .verify(&case)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[test]
    fn unexpected_output_fails_the_case() {
        // `echo` prints its arguments back, which is not a count
        let case = ExactCountTestCase::new("8/8/8/8/8/8/8/K6k w - - 0 1", 1, 3).unwrap();
        let TestResult::ExactCount(result) = PerftVerifier::new("echo").verify(&case).unwrap()
        else {
            panic!("expected a perft result");
        };
        assert!(!result.pass);
        assert_eq!(result.actual, None);
        assert!(result.error.is_some());
    }
}
