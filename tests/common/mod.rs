#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};
use uci_harness::prelude::*;

pub const SCRIPTED_ENGINE: &str = env!("CARGO_BIN_EXE_scripted-engine");
pub const PERFT: &str = env!("CARGO_BIN_EXE_perft");

pub const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

struct DebugOnly;
impl<S> Filter<S> for DebugOnly {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::DEBUG
    }
}

/// Prints harness debug output while a test runs.
pub fn init_debug_logger() {
    let format = fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);

    let reg = Registry::default().with(fmt::layer().event_format(format).with_filter(DebugOnly));
    let _ = tracing::subscriber::set_global_default(reg);
}

pub fn suites_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/suites")
}

pub fn book() -> String {
    suites_dir().join("engine.book").display().to_string()
}

/// Configuration running the scripted engine with the fixture book.
pub fn config(concurrency: usize) -> Configuration {
    Configuration::new()
        .with_engine(SCRIPTED_ENGINE)
        .with_engine_args(vec!["--book".to_string(), book()])
        .with_perft(PERFT)
        .with_concurrency(concurrency)
        .with_move_time(Duration::from_millis(20))
        .with_verbose(false)
}

pub fn harness(config: Configuration) -> Harness<UciEngineFactory> {
    Harness::new(UciEngineFactory::from_config(&config), config)
}

/// Number of scripted engines still running with `--live-dir dir`.
pub fn live_engines(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Engine that answers the handshake, then floods `info` lines after `go` and never moves.
pub const FLOODING_ENGINE: &str = r#"while read -r line; do
  case "$line" in
    uci) echo "id name Flood"; echo uciok ;;
    isready) echo readyok ;;
    go*) while :; do echo "info depth 1 nodes 1"; done ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Writes an executable `/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn shell_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Script body that starts a long `sleep` holding the engine's stdout, records its pid in
/// `pid_file`, and never answers.
pub fn wrapper_with_child(pid_file: &Path) -> String {
    format!("sleep 15 &\necho $! > '{}'\nwait\n", pid_file.display())
}

/// Whether `pid` names a running (not zombie) process, waiting up to `within` for it to die.
#[cfg(target_os = "linux")]
pub fn still_running(pid: &str, within: Duration) -> bool {
    let deadline = std::time::Instant::now() + within;
    loop {
        let running = std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| {
                // state is the first field after the parenthesized command name
                !stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| rest.trim_start().starts_with('Z'))
            })
            .unwrap_or(false);
        if !running || std::time::Instant::now() >= deadline {
            return running;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
