//! # UCI Harness
//!
//! A test harness for chess engines speaking the UCI protocol, running test suites against an
//! engine executable with a bounded number of engine processes alive at once.
//!
//! It provides:
//! - Loading of EPD strategic suites and JSON perft / quality definitions (`collect_suites`)
//! - Process handles for UCI engines that are always released, even on error paths
//!   (`UciEngine`)
//! - A counting worker pool bounding the number of live engines (`WorkerPool`)
//! - Suite execution and scoring (`Harness`), with per-unit failure isolation
//! - Exact move count verification against an external perft executable (`PerftVerifier`)
//!
//! Three kinds of test cases exist:
//! - **strategic**: one EPD position, scored with partial credit from its `c0` annotation
//! - **perft**: a leaf count at a given depth, pass or fail
//! - **quality**: an ordered list of positions, each with one expected move, pass or fail
//!
//! # Documentation Overview
//!
//! - For suite execution and failure handling, see the [`harness`] module.
//! - For configuring concurrency, think time and timeouts, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the record formats, see [`test_case`] and [`test_collector`].
//! - For plugging in another kind of engine, implement the [`Engine`](crate::engine::Engine) and
//!   [`EngineFactory`](crate::engine::EngineFactory) traits.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use uci_harness::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new()
//!         .with_engine("./target/release/my-engine")
//!         .with_concurrency(4)
//!         .with_strength(Some(10));
//!
//!     let factory = UciEngineFactory::from_config(&config);
//!     let suites = collect_suites(&[PathBuf::from("suites/sts")], config.verbose())?;
//!
//!     let report = Harness::new(factory, config).run(suites)?;
//!     print_summary(&report);
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod configuration;
pub mod engine;
pub mod error;
pub mod executor;
pub mod harness;
mod logger;
pub mod perft_verifier;
pub mod report;
pub mod test_case;
pub mod test_collector;
pub mod uci;
pub mod worker_pool;

pub use anyhow;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use uci_harness::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::{Configuration, SpawnPolicy};
    pub use crate::engine::{Engine, EngineFactory, UciEngine, UciEngineFactory};
    pub use crate::error::HarnessError;
    pub use crate::harness::Harness;
    pub use crate::perft_verifier::PerftVerifier;
    pub use crate::report::{print_summary, RunReport, SuiteReport, TestResult};
    pub use crate::test_case::TestCase;
    pub use crate::test_collector::{collect_suites, Collection, Suite};
    pub use crate::worker_pool::WorkerPool;
}
