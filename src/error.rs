//! Error taxonomy of the harness.
//!
//! [`HarnessError::ProcessSpawn`] and [`HarnessError::InvalidConfiguration`] are fatal to a run,
//! nothing can be evaluated with a missing engine. Timeouts and protocol errors are scored
//! as a failure of the unit they happened in, and malformed records are reported and skipped
//! at load time. A move that does not match the expected one is not an error at all, it is a
//! [`TestResult`](crate::report::TestResult).

use std::{path::PathBuf, time::Duration};

/// Errors raised while loading test cases or talking to an engine.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A test record could not be turned into a [`TestCase`](crate::test_case::TestCase).
    #[error("malformed test case ({origin}, line {line}): {reason}\n  record: {raw}")]
    MalformedTestCase {
        origin: String,
        line: usize,
        raw: String,
        reason: String,
    },

    /// The engine (or verifier) executable could not be launched or never finished its handshake.
    #[error("could not spawn '{}': {reason}", path.display())]
    ProcessSpawn { path: PathBuf, reason: String },

    /// No answer arrived before the deadline.
    #[error("engine did not answer '{waited_for}' within {after:?}")]
    ProtocolTimeout {
        waited_for: &'static str,
        after: Duration,
    },

    /// The engine answered something the harness cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The harness was configured in a way it cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Errors that must abort the whole run instead of failing a single unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::ProcessSpawn { .. } | HarnessError::InvalidConfiguration(_)
        )
    }

    pub(crate) fn malformed(
        origin: impl Into<String>,
        line: usize,
        raw: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        HarnessError::MalformedTestCase {
            origin: origin.into(),
            line,
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_configuration_errors_are_fatal() {
        let spawn = HarnessError::ProcessSpawn {
            path: PathBuf::from("/nope"),
            reason: "not found".to_string(),
        };
        assert!(spawn.is_fatal());
        assert!(HarnessError::InvalidConfiguration("no engine".into()).is_fatal());
        assert!(!HarnessError::Protocol("bad".into()).is_fatal());
        assert!(!HarnessError::ProtocolTimeout {
            waited_for: "bestmove",
            after: Duration::from_millis(10)
        }
        .is_fatal());
        assert!(!HarnessError::malformed("a.epd", 3, "xx", "no bm").is_fatal());
    }

    #[test]
    fn malformed_message_carries_record() {
        let err = HarnessError::malformed("suite.epd", 7, "8/8 w - - id \"x\";", "missing 'bm'");
        let msg = err.to_string();
        assert!(msg.contains("suite.epd, line 7"));
        assert!(msg.contains("missing 'bm'"));
        assert!(msg.contains("8/8 w - - id"));
    }
}
