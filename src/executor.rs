//! Runs one test case against the engine and scores the answer.
//!
//! Engines are held in an [`EngineGuard`] for exactly the span of the exchange, so they are
//! released on every way out of a unit, including `?` and panics. The caller holds the
//! worker pool slot around [`Executor::run`] and drops it only once `run` has returned, which
//! is after the engine is gone.

use tracing::{debug, instrument};

use crate::{
    configuration::{Configuration, SpawnPolicy},
    engine::{Decision, Engine, EngineFactory, EngineGuard},
    error::HarnessError,
    perft_verifier::PerftVerifier,
    report::{ExactCountResult, QualityResult, StrategicResult, TestResult},
    test_case::{QualityPosition, QualityTestCase, StrategicTestCase, TestCase},
};

/// Per-run executor shared by every unit of work.
pub struct Executor<'a, F: EngineFactory> {
    factory: &'a F,
    verifier: &'a PerftVerifier,
    config: &'a Configuration,
}

impl<'a, F: EngineFactory> Executor<'a, F> {
    pub fn new(factory: &'a F, verifier: &'a PerftVerifier, config: &'a Configuration) -> Self {
        Self {
            factory,
            verifier,
            config,
        }
    }

    /// Runs `case` and returns its result.
    ///
    /// Timeouts and protocol errors become failed results. An `Err` is only returned when an
    /// engine (or the verifier) could not be spawned.
    #[instrument(skip_all, fields(kind = case.kind()))]
    pub fn run(&self, case: &TestCase) -> Result<TestResult, HarnessError> {
        match case {
            TestCase::Strategic(case) => self.run_strategic(case),
            TestCase::Quality(case) => self.run_quality(case),
            TestCase::ExactCount(case) => self.verifier.verify(case),
        }
    }

    fn spawn(&self) -> Result<EngineGuard<F::Engine>, HarnessError> {
        self.factory.spawn().map(EngineGuard::new)
    }

    fn prepare(&self, engine: &mut F::Engine) -> Result<(), HarnessError> {
        if let Some((name, value)) = self.config.strength_setting() {
            engine.configure(name, &value)?;
        }
        Ok(())
    }

    fn run_strategic(&self, case: &StrategicTestCase) -> Result<TestResult, HarnessError> {
        let mut engine = self.spawn()?;
        let decision = self
            .prepare(&mut engine)
            .and_then(|()| engine.evaluate(case.position(), self.config.move_time));
        drop(engine);
        debug!(id = case.id(), ?decision);
        Ok(score_strategic(case, decision))
    }

    fn run_quality(&self, case: &QualityTestCase) -> Result<TestResult, HarnessError> {
        let move_time = self.config.move_time;
        let mut shared: Option<EngineGuard<F::Engine>> = None;

        for (index, position) in case.positions().iter().enumerate() {
            let fen = position.position.as_str();
            let decision = match self.config.spawn_policy {
                SpawnPolicy::PerPosition => {
                    let mut engine = self.spawn()?;
                    self.prepare(&mut engine)
                        .and_then(|()| engine.evaluate(fen, move_time))
                }
                SpawnPolicy::PerCase => match shared.as_mut() {
                    Some(engine) => engine
                        .new_game()
                        .and_then(|()| engine.evaluate(fen, move_time)),
                    None => {
                        let engine = shared.insert(self.spawn()?);
                        self.prepare(engine)
                            .and_then(|()| engine.evaluate(fen, move_time))
                    }
                },
            };

            match decision {
                Ok(decision) if decision.best_move == position.expected_move => continue,
                Ok(decision) => {
                    return Ok(quality_failure(index, position, Some(decision), None));
                }
                Err(e) => return Ok(quality_failure(index, position, None, Some(e))),
            }
        }

        Ok(TestResult::Quality(QualityResult {
            pass: true,
            failing_index: None,
            position: None,
            expected: None,
            actual: None,
            evaluated: case.positions().len(),
            error: None,
        }))
    }
}

/// Scores an engine answer: the points of the returned move, zero if unlisted or on error.
pub fn score_strategic(
    case: &StrategicTestCase,
    decision: Result<Decision, HarnessError>,
) -> TestResult {
    let (actual, error) = match decision {
        Ok(decision) => (Some(decision.best_move), None),
        Err(e) => (None, Some(e.to_string())),
    };
    let score = actual
        .as_ref()
        .map(|mv| case.score_map().score_of(mv))
        .unwrap_or(0);
    TestResult::Strategic(StrategicResult {
        id: case.id().to_string(),
        position: case.position().to_string(),
        expected: case.best_move().clone(),
        actual,
        score,
        max_score: case.score_map().max_score(),
        error,
    })
}

fn quality_failure(
    index: usize,
    position: &QualityPosition,
    decision: Option<Decision>,
    error: Option<HarnessError>,
) -> TestResult {
    TestResult::Quality(QualityResult {
        pass: false,
        failing_index: Some(index),
        position: Some(position.position.clone()),
        expected: Some(position.expected_move.clone()),
        actual: decision.map(|d| d.best_move),
        evaluated: index + 1,
        error: error.map(|e| e.to_string()),
    })
}

/// Result recorded for a case whose unit could not produce one itself.
pub fn failed_result(case: &TestCase, reason: String) -> TestResult {
    match case {
        TestCase::Strategic(case) => score_strategic(case, Err(HarnessError::Protocol(reason))),
        TestCase::ExactCount(case) => TestResult::ExactCount(ExactCountResult {
            position: case.position().to_string(),
            depth: case.depth(),
            pass: false,
            expected: case.expected_count(),
            actual: None,
            error: Some(reason),
        }),
        TestCase::Quality(case) => TestResult::Quality(QualityResult {
            pass: false,
            failing_index: Some(0),
            position: case.positions().first().map(|p| p.position.clone()),
            expected: case.positions().first().map(|p| p.expected_move.clone()),
            actual: None,
            evaluated: 0,
            error: Some(reason),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use shakmaty::uci::UciMove;

    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
    const AFTER_D4: &str = "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1";

    /// Answers from a fixed list of moves, shared by every engine it spawns.
    struct ScriptedFactory {
        answers: Mutex<Vec<&'static str>>,
        spawned: AtomicUsize,
        released: AtomicUsize,
        evaluated: AtomicUsize,
        configured: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedFactory {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().copied().collect()),
                spawned: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                evaluated: AtomicUsize::new(0),
                configured: Mutex::new(vec![]),
            }
        }
    }

    struct ScriptedEngine<'a> {
        factory: &'a ScriptedFactory,
        released: bool,
    }

    impl Engine for ScriptedEngine<'_> {
        fn configure(&mut self, name: &str, value: &str) -> Result<(), HarnessError> {
            self.factory
                .configured
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string()));
            Ok(())
        }

        fn new_game(&mut self) -> Result<(), HarnessError> {
            Ok(())
        }

        fn evaluate(&mut self, _fen: &str, _limit: Duration) -> Result<Decision, HarnessError> {
            self.factory.evaluated.fetch_add(1, Ordering::SeqCst);
            match self.factory.answers.lock().unwrap().pop() {
                Some("timeout") => Err(HarnessError::ProtocolTimeout {
                    waited_for: "bestmove",
                    after: Duration::from_millis(1),
                }),
                Some(mv) => Ok(Decision {
                    best_move: mv.parse().unwrap(),
                    nodes: Some(1),
                    depth: None,
                    score: None,
                }),
                None => Err(HarnessError::Protocol("script exhausted".into())),
            }
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.factory.released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl<'f> EngineFactory for &'f ScriptedFactory {
        type Engine = ScriptedEngine<'f>;

        fn spawn(&self) -> Result<ScriptedEngine<'f>, HarnessError> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedEngine {
                factory: *self,
                released: false,
            })
        }
    }

    fn sts() -> StrategicTestCase {
        StrategicTestCase::from_epd(
            r#"2r2rk1/pb2q2p/1pn1p2p/5p1Q/3P4/P1NB4/1P3PPP/R4RK1 w - - bm d5; id "X"; c0 "d5=10, Qxh6=5,";"#,
        )
        .unwrap()
    }

    fn quality() -> QualityTestCase {
        QualityTestCase::new([(START, "e2e4"), (AFTER_E4, "e7e5"), (AFTER_D4, "d7d5")]).unwrap()
    }

    fn run(factory: &ScriptedFactory, config: &Configuration, case: TestCase) -> TestResult {
        let verifier = PerftVerifier::new("perft");
        Executor::new(&factory, &verifier, config).run(&case).unwrap()
    }

    #[test]
    fn strategic_scores_partial_credit() {
        let factory = ScriptedFactory::new(&["h5h6"]);
        let result = run(&factory, &Configuration::new(), TestCase::Strategic(sts()));
        assert_eq!(result.score(), Some(5));
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn strategic_unlisted_move_scores_zero() {
        let factory = ScriptedFactory::new(&["a1b1"]);
        let result = run(&factory, &Configuration::new(), TestCase::Strategic(sts()));
        assert_eq!(result.score(), Some(0));
        assert!(!result.passed());
    }

    #[test]
    fn timeout_scores_zero_and_still_releases() {
        let factory = ScriptedFactory::new(&["timeout"]);
        let TestResult::Strategic(result) =
            run(&factory, &Configuration::new(), TestCase::Strategic(sts()))
        else {
            panic!("expected a strategic result");
        };
        assert_eq!(result.score, 0);
        assert!(result.error.unwrap().contains("bestmove"));
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quality_stops_at_first_wrong_move() {
        let factory = ScriptedFactory::new(&["e2e4", "g8f6", "d7d5"]);
        let TestResult::Quality(result) =
            run(&factory, &Configuration::new(), TestCase::Quality(quality()))
        else {
            panic!("expected a quality result");
        };
        assert!(!result.pass);
        assert_eq!(result.failing_index, Some(1));
        assert_eq!(result.actual, Some("g8f6".parse::<UciMove>().unwrap()));
        assert_eq!(result.expected, Some("e7e5".parse::<UciMove>().unwrap()));
        // the third position is never asked
        assert_eq!(factory.evaluated.load(Ordering::SeqCst), 2);
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 2);
        assert_eq!(factory.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn quality_passes_with_one_engine_per_case() {
        let factory = ScriptedFactory::new(&["e2e4", "e7e5", "d7d5"]);
        let config = Configuration::new().with_spawn_policy(SpawnPolicy::PerCase);
        let result = run(&factory, &config, TestCase::Quality(quality()));
        assert!(result.passed());
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn strength_is_configured_before_evaluating() {
        let factory = ScriptedFactory::new(&["d4d5"]);
        let config = Configuration::new().with_strength(Some(4));
        let result = run(&factory, &config, TestCase::Strategic(sts()));
        assert_eq!(result.score(), Some(10));
        assert_eq!(
            *factory.configured.lock().unwrap(),
            vec![("Skill Level".to_string(), "4".to_string())]
        );
    }

    #[test]
    fn failed_result_is_a_failure_of_the_right_kind() {
        let case = TestCase::Quality(quality());
        let result = failed_result(&case, "unit panicked".into());
        assert!(!result.passed());
        assert!(matches!(result, TestResult::Quality(_)));
    }
}
