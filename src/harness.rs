//! The suite aggregator.
//!
//! [`Harness`] runs suites one after the other. Inside a suite every case is one unit of work:
//! units that need an engine take a [`WorkerPool`] slot *before* their thread is started and
//! hand it back only after their engine is released, perft units run on the aggregator thread
//! without a slot. Results are collected over a channel as they complete and stored by
//! submission index, so a [`SuiteReport`] is always in file order.
//!
//! # Failure handling
//!
//! - A timeout, protocol error or panic inside a unit becomes a failed result for that unit.
//! - A spawn failure is fatal: no further unit is started, every unit already running is
//!   waited for, then the run stops with the spawn error.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use uci_harness::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_engine("./my-engine").with_concurrency(4);
//!     let factory = UciEngineFactory::from_config(&config);
//!     let suites = collect_suites(&[PathBuf::from("tests/suites")], config.verbose())?;
//!
//!     let report = Harness::new(factory, config).run(suites)?;
//!     print_summary(&report);
//!     std::process::exit(report.exit_code().into());
//! }
//! ```

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::mpsc,
    thread,
};

use tracing::{error, info, instrument, trace, warn};

use crate::{
    configuration::Configuration,
    engine::EngineFactory,
    error::HarnessError,
    executor::{failed_result, Executor},
    logger::init_logger,
    perft_verifier::PerftVerifier,
    report::{
        print_marker, print_suite_header, print_suite_subtotal, CaseReport, RunReport,
        SuiteReport, TestResult,
    },
    test_case::TestCase,
    test_collector::{Collection, Suite},
    worker_pool::WorkerPool,
};

/// Runs collected suites against one engine factory.
pub struct Harness<F: EngineFactory> {
    factory: F,
    verifier: PerftVerifier,
    config: Configuration,
}

impl<F: EngineFactory> Harness<F> {
    #[instrument(skip_all)]
    pub fn new(factory: F, config: Configuration) -> Self {
        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("could not create log file: {e}");
            }
        }
        trace!(?config);

        Self {
            factory,
            verifier: PerftVerifier::new(config.perft_path.clone()),
            config,
        }
    }

    /// Runs every suite of `collection` with a fresh pool of `concurrency` slots.
    pub fn run(&self, collection: Collection) -> Result<RunReport, HarnessError> {
        let pool = WorkerPool::new(self.config.concurrency);
        self.run_with_pool(collection, &pool)
    }

    /// Runs every suite of `collection`, gating engine units with `pool`.
    ///
    /// Malformed records of the collection are carried over into the report.
    pub fn run_with_pool(
        &self,
        collection: Collection,
        pool: &WorkerPool,
    ) -> Result<RunReport, HarnessError> {
        self.config.validate(collection.needs_engine())?;
        let executor = Executor::new(&self.factory, &self.verifier, &self.config);

        let mut report = RunReport {
            suites: Vec::with_capacity(collection.suites.len()),
            malformed: collection.malformed.iter().map(|e| e.to_string()).collect(),
        };

        for suite in &collection.suites {
            let suite_report = self.run_suite(suite, pool, &executor)?;
            info!(
                suite = %suite_report.name,
                score = suite_report.score(),
                passed = suite_report.passed(),
                total = suite_report.len()
            );
            if self.config.verbose {
                print_suite_subtotal(&suite_report);
            }
            report.suites.push(suite_report);
        }

        Ok(report)
    }

    #[instrument(skip_all, fields(suite = %suite.name, cases = suite.cases.len()))]
    fn run_suite(
        &self,
        suite: &Suite,
        pool: &WorkerPool,
        executor: &Executor<'_, F>,
    ) -> Result<SuiteReport, HarnessError> {
        let verbose = self.config.verbose;
        if verbose {
            print_suite_header(&suite.name, suite.cases.len());
        }

        let mut results = Results::new(suite.cases.len(), verbose);

        thread::scope(|s| {
            let (tx_result, rx_result) =
                mpsc::channel::<(usize, Result<TestResult, HarnessError>)>();

            for (index, entry) in suite.cases.iter().enumerate() {
                if !entry.case.needs_engine() {
                    results.record(index, &entry.case, run_unit(executor, &entry.case));
                } else {
                    let slot = pool.acquire();
                    // pick up whatever finished while waiting for the slot
                    while let Ok((index, outcome)) = rx_result.try_recv() {
                        let case = &suite.cases[index].case;
                        results.record(index, case, outcome);
                    }
                    if results.fatal.is_some() {
                        break;
                    }

                    let tx_result = tx_result.clone();
                    s.spawn(move || {
                        let _slot = slot;
                        let outcome = run_unit(executor, &entry.case);
                        let _ = tx_result.send((index, outcome));
                    });
                }

                if results.fatal.is_some() {
                    break;
                }
            }

            drop(tx_result);
            // not finished <=> a unit is running <=> a result to receive
            for (index, outcome) in rx_result {
                results.record(index, &suite.cases[index].case, outcome);
            }
        });

        if let Some(e) = results.fatal {
            if verbose {
                println!();
            }
            error!("aborting suite: {e}");
            return Err(e);
        }

        let cases = suite
            .cases
            .iter()
            .zip(results.slots)
            .map(|(entry, result)| CaseReport {
                origin: entry.origin.clone(),
                result: result.unwrap_or_else(|| {
                    failed_result(&entry.case, "unit produced no result".to_string())
                }),
            })
            .collect();
        Ok(SuiteReport::new(suite.name.clone(), cases))
    }
}

/// Runs one unit, turning a panic into a failed result.
fn run_unit<F: EngineFactory>(
    executor: &Executor<'_, F>,
    case: &TestCase,
) -> Result<TestResult, HarnessError> {
    panic::catch_unwind(AssertUnwindSafe(|| executor.run(case))).unwrap_or_else(|payload| {
        let reason = format!("unit panicked: {}", panic_message(payload.as_ref()));
        warn!(kind = case.kind(), %reason);
        Ok(failed_result(case, reason))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Results of one suite, indexed by submission order.
struct Results {
    slots: Vec<Option<TestResult>>,
    fatal: Option<HarnessError>,
    verbose: bool,
}

impl Results {
    fn new(len: usize, verbose: bool) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
            fatal: None,
            verbose,
        }
    }

    fn record(&mut self, index: usize, case: &TestCase, outcome: Result<TestResult, HarnessError>) {
        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_fatal() => {
                error!(index, "{e}");
                // the first fatal error is the one reported
                self.fatal.get_or_insert(e);
                return;
            }
            Err(e) => failed_result(case, e.to_string()),
        };
        if self.verbose {
            print_marker(&result);
        }
        self.slots[index] = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use shakmaty::uci::UciMove;

    use super::*;
    use crate::{
        engine::{Decision, Engine},
        test_case::StrategicTestCase,
        test_collector::SuiteCase,
    };

    /// Engine that always answers `answer`, tracking how many are alive at once.
    struct CountingFactory {
        answer: &'static str,
        live: AtomicUsize,
        max_live: AtomicUsize,
        spawned: AtomicUsize,
        released: AtomicUsize,
        fail_spawn_after: Option<usize>,
        panic_on: Option<&'static str>,
    }

    impl CountingFactory {
        fn new(answer: &'static str) -> Self {
            Self {
                answer,
                live: AtomicUsize::new(0),
                max_live: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                fail_spawn_after: None,
                panic_on: None,
            }
        }
    }

    struct CountingEngine<'a> {
        factory: &'a CountingFactory,
        released: bool,
    }

    impl Engine for CountingEngine<'_> {
        fn configure(&mut self, _: &str, _: &str) -> Result<(), HarnessError> {
            Ok(())
        }

        fn new_game(&mut self) -> Result<(), HarnessError> {
            Ok(())
        }

        fn evaluate(&mut self, fen: &str, _: Duration) -> Result<Decision, HarnessError> {
            if self.factory.panic_on.is_some_and(|p| fen.starts_with(p)) {
                panic!("engine exploded");
            }
            std::thread::sleep(Duration::from_millis(3));
            Ok(Decision {
                best_move: self.factory.answer.parse().unwrap(),
                nodes: None,
                depth: None,
                score: None,
            })
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.factory.live.fetch_sub(1, Ordering::SeqCst);
                self.factory.released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl<'f> EngineFactory for &'f CountingFactory {
        type Engine = CountingEngine<'f>;

        fn spawn(&self) -> Result<CountingEngine<'f>, HarnessError> {
            let spawned = self.spawned.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn_after.is_some_and(|n| spawned >= n) {
                return Err(HarnessError::ProcessSpawn {
                    path: "engine".into(),
                    reason: "gone".into(),
                });
            }
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(now, Ordering::SeqCst);
            Ok(CountingEngine {
                factory: *self,
                released: false,
            })
        }
    }

    const POSITION: &str = "2r2rk1/pb2q2p/1pn1p2p/5p1Q/3P4/P1NB4/1P3PPP/R4RK1 w - -";

    fn suite(cases: usize) -> Collection {
        let cases = (0..cases)
            .map(|i| SuiteCase {
                origin: format!("sts.epd:{}", i + 1),
                case: TestCase::Strategic(
                    StrategicTestCase::from_epd(&format!(
                        r#"{POSITION} bm d5; id "S.{i}"; c0 "d5=10, Qxh6=5,";"#
                    ))
                    .unwrap(),
                ),
            })
            .collect();
        Collection {
            suites: vec![Suite {
                name: "sts.epd".to_string(),
                cases,
            }],
            malformed: vec![],
        }
    }

    fn config(concurrency: usize) -> Configuration {
        Configuration::new()
            .with_engine("engine")
            .with_concurrency(concurrency)
            .with_verbose(false)
    }

    #[test]
    fn live_engines_never_exceed_concurrency() {
        for concurrency in [1, 2, 4] {
            let factory = CountingFactory::new("h5h6");
            let pool = WorkerPool::new(concurrency);
            let report = Harness::new(&factory, config(concurrency))
                .run_with_pool(suite(12), &pool)
                .unwrap();
            assert_eq!(report.total(), 12);
            assert!(factory.max_live.load(Ordering::SeqCst) <= concurrency);
            assert!(pool.peak() <= concurrency);
            assert_eq!(pool.in_use(), 0);
            assert_eq!(factory.released.load(Ordering::SeqCst), 12);
        }
    }

    #[test]
    fn total_does_not_depend_on_concurrency() {
        let factory = CountingFactory::new("h5h6");
        let serial = Harness::new(&factory, config(1)).run(suite(10)).unwrap();
        let parallel = Harness::new(&factory, config(4)).run(suite(10)).unwrap();
        assert_eq!(serial.score(), 50);
        assert_eq!(serial.score(), parallel.score());
        let folded = parallel.suites[0]
            .cases
            .iter()
            .filter_map(|c| c.result.score())
            .map(i64::from)
            .sum::<i64>();
        assert_eq!(parallel.suites[0].score(), folded);
    }

    #[test]
    fn results_keep_submission_order() {
        let factory = CountingFactory::new("d4d5");
        let report = Harness::new(&factory, config(3)).run(suite(6)).unwrap();
        let ids = report.suites[0]
            .cases
            .iter()
            .map(|c| match &c.result {
                TestResult::Strategic(r) => r.id.clone(),
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, (0..6).map(|i| format!("S.{i}")).collect::<Vec<_>>());
        assert_eq!(report.passed(), 6);
    }

    #[test]
    fn panicking_unit_fails_alone() {
        let mut factory = CountingFactory::new("d4d5");
        factory.panic_on = Some("2r2rk1");
        let mut collection = suite(1);
        collection.suites[0].cases.push(SuiteCase {
            origin: "sts.epd:2".to_string(),
            case: TestCase::Strategic(
                StrategicTestCase::from_epd(
                    r#"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - bm e4; id "start";"#,
                )
                .unwrap(),
            ),
        });

        let report = Harness::new(&factory, config(2)).run(collection).unwrap();
        let cases = &report.suites[0].cases;
        let TestResult::Strategic(exploded) = &cases[0].result else {
            unreachable!()
        };
        assert_eq!(exploded.score, 0);
        assert!(exploded.error.as_deref().unwrap().contains("engine exploded"));
        // the sibling still ran and answered d4d5, which is not e4
        let TestResult::Strategic(sibling) = &cases[1].result else {
            unreachable!()
        };
        assert_eq!(sibling.actual, Some("d4d5".parse::<UciMove>().unwrap()));
        assert_eq!(factory.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn spawn_failure_aborts_after_draining_running_units() {
        let mut factory = CountingFactory::new("d4d5");
        factory.fail_spawn_after = Some(3);
        let err = Harness::new(&factory, config(2))
            .run(suite(20))
            .unwrap_err();
        assert!(err.is_fatal());
        // no unit is left behind holding an engine
        assert_eq!(factory.live.load(Ordering::SeqCst), 0);
        assert!(factory.spawned.load(Ordering::SeqCst) < 20);
    }

    #[test]
    fn missing_engine_is_rejected_before_running() {
        let factory = CountingFactory::new("d4d5");
        let config = Configuration::new().with_verbose(false);
        let err = Harness::new(&factory, config).run(suite(1)).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfiguration(_)));
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 0);
    }
}
