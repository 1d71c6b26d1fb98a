//! Config for the harness behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive, set the value to `"true"` to enable one.
//!
//! - `HARNESS_ENGINE`: Path to the engine under test
//! - `HARNESS_PERFT`: Path to the perft verification executable (default: `perft` next to the
//!   running executable, or on the `PATH`)
//! - `HARNESS_CONCURRENCY`: Maximum number of live engine processes (default: physical CPUs)
//! - `HARNESS_MOVE_TIME_MS`: Think time per position in milliseconds (default: `500`)
//! - `HARNESS_STRENGTH`: Value for the engine strength option (default: unset)
//! - `HARNESS_VERBOSE`: Print progress to stdout (default: `true`)
//! - `HARNESS_LOG`: Enable logging to a file (default: `false`)
//! - `HARNESS_EXTENDED`: Print a machine-readable tally at the end (default: `false`)
//! - `HARNESS_DEBUG_ENGINE_STDERR`: Let engine stderr through (default: `false`)

use std::{path::PathBuf, time::Duration};

use crate::error::HarnessError;

/// Whether engines are shared between the positions of a quality test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnPolicy {
    /// A fresh engine process for every position.
    #[default]
    PerPosition,
    /// One engine per test case, with `ucinewgame` between positions.
    PerCase,
}

/// Configuration for harness behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) engine_path: Option<PathBuf>,
    pub(crate) engine_args: Vec<String>,
    pub(crate) perft_path: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) move_time: Duration,
    pub(crate) grace: Duration,
    pub(crate) startup_timeout: Duration,
    pub(crate) quit_timeout: Duration,
    pub(crate) strength: Option<i64>,
    pub(crate) strength_option: String,
    pub(crate) spawn_policy: SpawnPolicy,
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) extended: bool,
    pub(crate) debug_engine_stderr: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - No engine is configured. `perft` is taken from the directory of the running executable
    ///   if it exists there, and looked up on the `PATH` otherwise.
    /// - At most one engine per physical CPU is alive at once.
    /// - Engines think 500 ms per position, with 2 s of grace before a timeout.
    /// - Engines get 5 s to complete their handshake and 1 s to quit.
    /// - No strength option is sent (`Skill Level` would be used if one is set).
    /// - Every position of a quality test gets a fresh engine.
    /// - Progress is printed, nothing is logged to file, no JSON tally is printed.
    pub fn new() -> Self {
        Self {
            engine_path: None,
            engine_args: vec![],
            perft_path: default_perft_path(),
            concurrency: num_cpus::get_physical().max(1),
            move_time: Duration::from_millis(500),
            grace: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(5),
            quit_timeout: Duration::from_secs(1),
            strength: None,
            strength_option: "Skill Level".to_string(),
            spawn_policy: SpawnPolicy::PerPosition,
            verbose: true,
            log: false,
            extended: false,
            debug_engine_stderr: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Unset or
    /// unparsable values fall back to the defaults of [`Configuration::new()`].
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.parse().ok()
        }

        let defaults = Self::new();
        Self {
            engine_path: std::env::var_os("HARNESS_ENGINE").map(PathBuf::from),
            perft_path: std::env::var_os("HARNESS_PERFT")
                .map(PathBuf::from)
                .unwrap_or(defaults.perft_path),
            concurrency: get_env_parsed("HARNESS_CONCURRENCY").unwrap_or(defaults.concurrency),
            move_time: get_env_parsed("HARNESS_MOVE_TIME_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.move_time),
            strength: get_env_parsed("HARNESS_STRENGTH"),
            verbose: get_env_flag("HARNESS_VERBOSE", true),
            log: get_env_flag("HARNESS_LOG", false),
            extended: get_env_flag("HARNESS_EXTENDED", false),
            debug_engine_stderr: get_env_flag("HARNESS_DEBUG_ENGINE_STDERR", false),
            ..defaults
        }
    }

    /// Set the engine executable under test.
    pub fn with_engine(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    /// Extra arguments passed to the engine executable.
    pub fn with_engine_args(mut self, args: Vec<String>) -> Self {
        self.engine_args = args;
        self
    }

    /// Set the perft verification executable.
    pub fn with_perft(mut self, path: impl Into<PathBuf>) -> Self {
        self.perft_path = path.into();
        self
    }

    /// Set the maximum number of engine processes alive at any instant.
    pub fn with_concurrency(mut self, value: usize) -> Self {
        self.concurrency = value;
        self
    }

    /// Set the think time given to the engine for each position.
    pub fn with_move_time(mut self, value: Duration) -> Self {
        self.move_time = value;
        self
    }

    /// Extra time allowed on top of the move time before a decision times out.
    pub fn with_grace(mut self, value: Duration) -> Self {
        self.grace = value;
        self
    }

    pub fn with_startup_timeout(mut self, value: Duration) -> Self {
        self.startup_timeout = value;
        self
    }

    pub fn with_quit_timeout(mut self, value: Duration) -> Self {
        self.quit_timeout = value;
        self
    }

    /// Set the strength sent to engines advertising the strength option.
    pub fn with_strength(mut self, value: Option<i64>) -> Self {
        self.strength = value;
        self
    }

    /// Name of the option used for [`with_strength`](Self::with_strength).
    pub fn with_strength_option(mut self, name: impl Into<String>) -> Self {
        self.strength_option = name.into();
        self
    }

    pub fn with_spawn_policy(mut self, value: SpawnPolicy) -> Self {
        self.spawn_policy = value;
        self
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable the machine-readable tally.
    pub fn with_extended(mut self, value: bool) -> Self {
        self.extended = value;
        self
    }

    /// Enable or disable engine stderr output (debug purposes only).
    pub fn with_debug_engine_stderr(mut self, value: bool) -> Self {
        self.debug_engine_stderr = value;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn move_time(&self) -> Duration {
        self.move_time
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Option name and value to send to every engine before it evaluates anything.
    pub(crate) fn strength_setting(&self) -> Option<(&str, String)> {
        self.strength
            .map(|value| (self.strength_option.as_str(), value.to_string()))
    }

    /// Rejects configurations the harness cannot run with.
    pub fn validate(&self, needs_engine: bool) -> Result<(), HarnessError> {
        if self.concurrency == 0 {
            return Err(HarnessError::InvalidConfiguration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if needs_engine && self.engine_path.is_none() {
            return Err(HarnessError::InvalidConfiguration(
                "suites need an engine but none was configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// The `perft` binary built alongside the harness, if any.
fn default_perft_path() -> PathBuf {
    let name = format!("perft{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
