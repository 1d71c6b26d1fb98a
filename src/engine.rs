//! Engine process handles.
//!
//! An [`Engine`] is one live engine, owned by the single unit of work that spawned it. The
//! process-backed implementation is [`UciEngine`]; it is built by a [`UciEngineFactory`] and
//! walks through the states of [`EngineState`]:
//!
//! ```text
//! Spawning -> Ready -> Busy -> Ready (...) -> Quitting -> Closed
//! ```
//!
//! Releasing is idempotent and also happens on drop, so a handle that goes out of scope on an
//! error path never leaves its process behind.

use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command as Process, Stdio},
    str::FromStr,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use shakmaty::uci::UciMove;
use tracing::{debug, instrument, trace, warn};

use crate::{
    configuration::Configuration,
    error::HarnessError,
    uci::{parse_engine_line, AdvertisedOption, Command, EngineMessage, Info, Score},
};

/// How long a released engine's output may stay open before its reader thread is detached.
const READER_DRAIN: Duration = Duration::from_millis(200);

/// What an engine answered to one `go`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub best_move: UciMove,
    pub nodes: Option<u64>,
    pub depth: Option<u32>,
    pub score: Option<Score>,
}

/// One live engine. Implementations must make [`Engine::release`] idempotent.
pub trait Engine {
    /// Sets an option if the engine advertised it, does nothing otherwise.
    fn configure(&mut self, name: &str, value: &str) -> Result<(), HarnessError>;

    /// Tells the engine the next position is unrelated to the previous one.
    fn new_game(&mut self) -> Result<(), HarnessError>;

    /// Asks for a move in `fen`, thinking for `time_limit`.
    fn evaluate(&mut self, fen: &str, time_limit: Duration) -> Result<Decision, HarnessError>;

    /// Shuts the engine down and waits for it to exit.
    fn release(&mut self);
}

/// Something that can launch engines. Shared by every unit of a run.
pub trait EngineFactory: Sync {
    type Engine: Engine;

    /// Launches a new engine and completes its handshake.
    fn spawn(&self) -> Result<Self::Engine, HarnessError>;
}

/// Releases the wrapped engine when dropped.
pub struct EngineGuard<E: Engine>(E);

impl<E: Engine> EngineGuard<E> {
    pub fn new(engine: E) -> Self {
        Self(engine)
    }
}

impl<E: Engine> std::ops::Deref for EngineGuard<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.0
    }
}

impl<E: Engine> std::ops::DerefMut for EngineGuard<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.0
    }
}

impl<E: Engine> Drop for EngineGuard<E> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A point in time, and the budget it was computed from.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Spawning,
    Ready,
    Busy,
    Quitting,
    Closed,
}

/// Engine running in a child process, spoken to over its stdin/stdout.
///
/// Stdout is read by a dedicated thread which forwards every line through a channel, so every
/// wait on the engine is a bounded `recv_timeout`.
#[derive(Debug)]
pub struct UciEngine {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    state: EngineState,
    name: Option<String>,
    author: Option<String>,
    options: Vec<AdvertisedOption>,
    grace: Duration,
    quit_timeout: Duration,
}

impl UciEngine {
    /// Launches `path` and runs the `uci` / `isready` handshake.
    #[instrument(skip_all, fields(engine = %path.as_ref().display()))]
    pub fn spawn(
        path: impl AsRef<Path>,
        args: &[String],
        startup_timeout: Duration,
        grace: Duration,
        quit_timeout: Duration,
        inherit_stderr: bool,
    ) -> Result<UciEngine, HarnessError> {
        let path = path.as_ref().to_path_buf();
        let spawn_error = |reason: String| HarnessError::ProcessSpawn {
            path: path.clone(),
            reason,
        };

        let mut process = Process::new(&path);
        process
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so killing the engine also kills what it started
            process.process_group(0);
        }
        let mut child = process.spawn().map_err(|e| spawn_error(e.to_string()))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = kill_process_group(&mut child);
                let _ = child.wait();
                return Err(spawn_error("engine pipes unavailable".to_string()));
            }
        };

        let (tx, lines) = mpsc::channel();
        let reader = thread::Builder::new()
            .name("engine-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| spawn_error(format!("could not start reader thread: {e}")));
        let reader = match reader {
            Ok(reader) => reader,
            Err(e) => {
                let _ = kill_process_group(&mut child);
                let _ = child.wait();
                return Err(e);
            }
        };

        let mut engine = UciEngine {
            path: path.clone(),
            child,
            stdin: Some(stdin),
            lines,
            reader: Some(reader),
            state: EngineState::Spawning,
            name: None,
            author: None,
            options: vec![],
            grace,
            quit_timeout,
        };

        // on failure `engine` is dropped here, which tears the process down
        engine
            .handshake(startup_timeout)
            .map_err(|e| spawn_error(e.to_string()))?;
        engine.state = EngineState::Ready;
        debug!(name = ?engine.name, options = engine.options.len(), "engine ready");
        Ok(engine)
    }

    fn handshake(&mut self, timeout: Duration) -> Result<(), HarnessError> {
        let deadline = Deadline::after(timeout);
        self.send(&Command::Uci)?;
        loop {
            match parse_engine_line(&self.next_line(deadline, "uciok")?) {
                EngineMessage::Id { key, value } if key == "name" => self.name = Some(value),
                EngineMessage::Id { key, value } if key == "author" => self.author = Some(value),
                EngineMessage::Option(option) => self.options.push(option),
                EngineMessage::UciOk => break,
                _ => {}
            }
        }
        self.sync(deadline)
    }

    /// Engine name from `id name`, if it sent one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Options advertised during the handshake.
    pub fn options(&self) -> &[AdvertisedOption] {
        &self.options
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn supports_option(&self, name: &str) -> bool {
        self.options
            .iter()
            .any(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// `isready` / `readyok` round trip.
    pub fn ping(&mut self, timeout: Duration) -> Result<(), HarnessError> {
        self.ensure_ready()?;
        self.sync(Deadline::after(timeout))
    }

    fn sync(&mut self, deadline: Deadline) -> Result<(), HarnessError> {
        self.send(&Command::IsReady)?;
        loop {
            if let EngineMessage::ReadyOk = parse_engine_line(&self.next_line(deadline, "readyok")?)
            {
                return Ok(());
            }
        }
    }

    fn ensure_ready(&self) -> Result<(), HarnessError> {
        match self.state {
            EngineState::Ready => Ok(()),
            state => Err(HarnessError::Protocol(format!(
                "engine is {state:?}, not ready"
            ))),
        }
    }

    fn send(&mut self, command: &Command) -> Result<(), HarnessError> {
        trace!(%command, "->");
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| HarnessError::Protocol("engine input is closed".to_string()))?;
        writeln!(stdin, "{command}")?;
        stdin.flush()?;
        Ok(())
    }

    fn next_line(&self, deadline: Deadline, waited_for: &'static str) -> Result<String, HarnessError> {
        let timed_out = || HarnessError::ProtocolTimeout {
            waited_for,
            after: deadline.budget,
        };
        // queued lines are still returned by a zero timeout, so check the clock first
        let now = Instant::now();
        if now >= deadline.at {
            return Err(timed_out());
        }
        match self.lines.recv_timeout(deadline.at - now) {
            Ok(line) => {
                trace!(%line, "<-");
                Ok(line)
            }
            Err(RecvTimeoutError::Timeout) => Err(timed_out()),
            Err(RecvTimeoutError::Disconnected) => Err(HarnessError::Protocol(format!(
                "engine closed its output while waiting for '{waited_for}'"
            ))),
        }
    }

    /// Joins the stdout reader once the engine output is closed, or leaves it behind.
    fn drain_reader(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        let deadline = Instant::now() + READER_DRAIN;
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            // exits on its own once the receiver is dropped or the pipe closes
            debug!("engine output still open, reader thread detached");
        }
    }

    fn wait_for_exit(&mut self, max_duration: Duration) -> bool {
        let deadline = Instant::now() + max_duration;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5).min(max_duration / 10));
                }
                Ok(None) => return false,
                Err(e) => {
                    warn!("could not poll engine process: {e}");
                    return false;
                }
            }
        }
    }
}

impl Engine for UciEngine {
    fn configure(&mut self, name: &str, value: &str) -> Result<(), HarnessError> {
        self.ensure_ready()?;
        if !self.supports_option(name) {
            debug!(option = name, "option not advertised, skipped");
            return Ok(());
        }
        self.send(&Command::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    fn new_game(&mut self) -> Result<(), HarnessError> {
        self.ensure_ready()?;
        self.send(&Command::UciNewGame)
    }

    #[instrument(skip(self), fields(engine = %self.path.display()))]
    fn evaluate(&mut self, fen: &str, time_limit: Duration) -> Result<Decision, HarnessError> {
        self.ensure_ready()?;
        self.state = EngineState::Busy;
        let deadline = Deadline::after(time_limit + self.grace);

        self.sync(deadline)?;
        self.send(&Command::Position {
            fen: fen.to_string(),
        })?;
        self.send(&Command::Go {
            movetime: time_limit,
        })?;

        let mut info = Info::default();
        loop {
            let line = self.next_line(deadline, "bestmove")?;
            match parse_engine_line(&line) {
                EngineMessage::Info(newer) => info.merge(newer),
                EngineMessage::BestMove { mv } => {
                    let best_move = UciMove::from_str(&mv).map_err(|e| {
                        HarnessError::Protocol(format!("invalid bestmove '{mv}': {e}"))
                    })?;
                    // a timed out engine stays Busy and is never asked again
                    self.state = EngineState::Ready;
                    return Ok(Decision {
                        best_move,
                        nodes: info.nodes,
                        depth: info.depth,
                        score: info.score,
                    });
                }
                _ => {}
            }
        }
    }

    #[instrument(skip(self), fields(engine = %self.path.display()))]
    fn release(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        let busy = self.state == EngineState::Busy;
        self.state = EngineState::Quitting;
        if busy && self.send(&Command::Stop).is_err() {
            trace!("could not send stop");
        }
        if self.send(&Command::Quit).is_err() {
            trace!("could not send quit, engine already gone");
        }
        // closing stdin lets engines that ignore `quit` see EOF
        self.stdin = None;

        if !self.wait_for_exit(self.quit_timeout) {
            warn!(pid = self.child.id(), "engine did not quit in time, killing it");
            if let Err(e) = kill_process_group(&mut self.child) {
                warn!("could not kill engine process: {e}");
            }
            if let Err(e) = self.child.wait() {
                warn!("could not reap engine process: {e}");
            }
        }
        self.drain_reader();
        self.state = EngineState::Closed;
        debug!("engine released");
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Kills the engine and every process left in its group.
///
/// Must only be called before `child` is reaped, while its pid still names its group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return child.kill();
    };
    // SAFETY: kill(2) has no memory effects, the group is led by our unreaped child
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    child.kill()
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

/// Spawns [`UciEngine`]s for one configured executable.
#[derive(Debug, Clone)]
pub struct UciEngineFactory {
    path: PathBuf,
    args: Vec<String>,
    startup_timeout: Duration,
    grace: Duration,
    quit_timeout: Duration,
    inherit_stderr: bool,
}

impl UciEngineFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let defaults = Configuration::new();
        Self {
            path: path.into(),
            args: vec![],
            startup_timeout: defaults.startup_timeout,
            grace: defaults.grace,
            quit_timeout: defaults.quit_timeout,
            inherit_stderr: false,
        }
    }

    /// Factory for the engine and timeouts described by `config`.
    ///
    /// Without a configured engine every spawn fails; [`Configuration::validate`] rejects
    /// that case before anything is run.
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            path: config.engine_path.clone().unwrap_or_default(),
            args: config.engine_args.clone(),
            startup_timeout: config.startup_timeout,
            grace: config.grace,
            quit_timeout: config.quit_timeout,
            inherit_stderr: config.debug_engine_stderr,
        }
    }

    /// Extra command-line arguments passed to the engine.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Time a released engine gets to exit before it is killed.
    pub fn with_quit_timeout(mut self, timeout: Duration) -> Self {
        self.quit_timeout = timeout;
        self
    }
}

impl EngineFactory for UciEngineFactory {
    type Engine = UciEngine;

    fn spawn(&self) -> Result<UciEngine, HarnessError> {
        UciEngine::spawn(
            &self.path,
            &self.args,
            self.startup_timeout,
            self.grace,
            self.quit_timeout,
            self.inherit_stderr,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let factory = UciEngineFactory::new("/definitely/not/an/engine");
        let err = factory.spawn().unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn silent_process_fails_handshake_in_bounded_time() {
        // `cat` echoes `uci` back but never says `uciok`
        let factory = UciEngineFactory::new("cat").with_startup_timeout(Duration::from_millis(200));
        let start = Instant::now();
        let err = factory.spawn().unwrap_err();
        assert!(matches!(err, HarnessError::ProcessSpawn { .. }), "{err}");
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn guard_releases_on_drop() {
        struct Counting<'a>(&'a std::cell::Cell<u32>);
        impl Engine for Counting<'_> {
            fn configure(&mut self, _: &str, _: &str) -> Result<(), HarnessError> {
                Ok(())
            }
            fn new_game(&mut self) -> Result<(), HarnessError> {
                Ok(())
            }
            fn evaluate(&mut self, _: &str, _: Duration) -> Result<Decision, HarnessError> {
                Err(HarnessError::Protocol("nope".into()))
            }
            fn release(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let released = std::cell::Cell::new(0);
        {
            let mut guard = EngineGuard::new(Counting(&released));
            assert!(guard.evaluate("fen", Duration::ZERO).is_err());
        }
        assert_eq!(released.get(), 1);
    }
}
