//! Process session
//!
//! A [`Session`] owns one child process: its lifecycle, stdin, the two output
//! buffers, the search cursors and the idle counter. Everything the child does
//! arrives as pump events, which the session applies in order whenever one of
//! its operations runs, so no locking is involved.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::task::AbortHandle;

use crate::buffer::{CaptureMode, LineBuffer, Stream};
use crate::error::{Error, ErrorKind};
use crate::log::Logger;
use crate::pump::{ExitInfo, Pump, PumpEvent};
use crate::ticker::{IdleTicker, DEFAULT_TICK_INTERVAL};
use crate::wait::{Cursors, WaitOutcome};

/// What a test asks for when it requests a session
#[derive(Debug, Clone, Default)]
pub struct SessionAttributes {
    pub name: String,
    pub description: String,
    pub args: Vec<String>,
}

impl SessionAttributes {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// How to launch and observe the CLI under test
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Executable to run. Passed to the OS unchanged.
    pub command: String,
    /// Working directory of the child
    pub working_dir: PathBuf,
    /// Length of one idle tick
    pub tick_interval: Duration,
    /// How output reads become buffer entries
    pub capture: CaptureMode,
    /// Appended to every `write`
    pub line_ending: String,
}

impl SessionConfig {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            capture: CaptureMode::default(),
            line_ending: "\n".into(),
        }
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn capture(mut self, mode: CaptureMode) -> Self {
        self.capture = mode;
        self
    }

    pub fn line_ending(mut self, ending: impl Into<String>) -> Self {
        self.line_ending = ending.into();
        self
    }
}

/// Lifecycle of the child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Stopped(ExitInfo),
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::NotStarted => f.write_str("not started"),
            LifecycleState::Starting => f.write_str("starting"),
            LifecycleState::Running => f.write_str("running"),
            LifecycleState::Stopped(exit) => write!(f, "stopped ({})", exit),
        }
    }
}

/// Teardown handle shared between a session and whoever must clean it up.
///
/// Aborting the pump drops the `Child`, which was spawned with
/// `kill_on_drop`, so a still-running process is killed.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    pump: Rc<RefCell<Option<AbortHandle>>>,
}

impl SessionHandle {
    fn attach(&self, abort: AbortHandle) {
        if let Some(previous) = self.pump.borrow_mut().replace(abort) {
            previous.abort();
        }
    }

    /// Tear the process down. Returns true if a live process was killed.
    /// Safe to call any number of times.
    pub fn cleanup(&self) -> bool {
        match self.pump.borrow_mut().take() {
            Some(abort) => {
                let live = !abort.is_finished();
                abort.abort();
                live
            }
            None => false,
        }
    }
}

/// What applying one pump event changed
#[derive(Debug, Clone, Copy)]
pub(crate) enum Notice {
    Spawned,
    Output(Stream),
    Tick(u64),
    Exited(ExitInfo),
    Quiet,
}

/// One interactive session with the CLI under test
pub struct Session {
    name: String,
    description: String,
    args: Vec<String>,
    config: SessionConfig,
    state: LifecycleState,
    pub(crate) stdout: LineBuffer,
    pub(crate) stderr: LineBuffer,
    pub(crate) cursors: Cursors,
    pub(crate) ticker: IdleTicker,
    pump: Option<Pump>,
    stdin: Option<ChildStdin>,
    handle: SessionHandle,
    pub(crate) logger: Rc<dyn Logger>,
}

impl Session {
    pub fn new(config: SessionConfig, attrs: SessionAttributes, logger: Rc<dyn Logger>) -> Self {
        Self {
            name: attrs.name,
            description: attrs.description,
            args: attrs.args,
            stdout: LineBuffer::new(config.capture),
            stderr: LineBuffer::new(config.capture),
            config,
            state: LifecycleState::NotStarted,
            cursors: Cursors::default(),
            ticker: IdleTicker::new(),
            pump: None,
            stdin: None,
            handle: SessionHandle::default(),
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory of the test. Use it for files the test reads or writes.
    pub fn dir(&self) -> &Path {
        &self.config.working_dir
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn idle_seconds(&self) -> u64 {
        self.ticker.idle_seconds()
    }

    /// A handle that can tear this session down after it has been moved away
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Start the CLI.
    ///
    /// Resolves once the process is confirmed running. A non-zero `timeout`
    /// bounds that confirmation; on expiry the pending process is torn down.
    pub async fn start(&mut self, timeout: Duration) -> Result<(), Error> {
        self.drain();
        if matches!(self.state, LifecycleState::Starting | LifecycleState::Running) {
            let err = Error::already_started();
            self.logger.error(&err.message);
            return Err(err);
        }

        self.logger.log(&format!(
            "Starting: {} in {}",
            self.config.command,
            self.config.working_dir.display()
        ));

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let (pump, stdin) = match Pump::spawn(&mut command, self.config.tick_interval) {
            Ok(spawned) => spawned,
            Err(e) => {
                let err = Error::new(
                    ErrorKind::Spawn,
                    format!("failed to start '{}': {}", self.config.command, e),
                );
                self.logger.error(&err.message);
                return Err(err);
            }
        };
        self.handle.attach(pump.abort_handle());
        self.pump = Some(pump);
        self.stdin = Some(stdin);
        self.state = LifecycleState::Starting;
        self.log_timeout(timeout);

        let outcome = self
            .wait_for(timeout, |_, notice| matches!(notice, Notice::Spawned).then_some(()))
            .await;
        match outcome {
            WaitOutcome::Ready(()) => Ok(()),
            WaitOutcome::TimedOut => {
                self.logger.error("Timed out waiting to spawn.");
                self.abandon_start();
                Err(Error::timeout(format!(
                    "timed out after {}ms waiting for '{}' to start",
                    timeout.as_millis(),
                    self.config.command
                )))
            }
            WaitOutcome::Ended => {
                self.abandon_start();
                Err(Error::new(
                    ErrorKind::Spawn,
                    format!("'{}' ended before it was confirmed running", self.config.command),
                ))
            }
        }
    }

    fn abandon_start(&mut self) {
        self.handle.cleanup();
        self.pump = None;
        self.stdin = None;
        self.state = LifecycleState::NotStarted;
    }

    /// Write a line to the CLI's stdin. The configured line ending is appended.
    pub async fn write(&mut self, text: &str) -> Result<(), Error> {
        self.drain();
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Stopped(_) => {
                return Err(Error::new(
                    ErrorKind::NotRunning,
                    "CLI not running, cannot write to stdin",
                ));
            }
            _ => return Err(Error::not_started("write to stdin")),
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::NotRunning, "stdin of the CLI is closed")
        })?;

        let mut line = String::with_capacity(text.len() + self.config.line_ending.len());
        line.push_str(text);
        line.push_str(&self.config.line_ending);
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        tracing::debug!(session = %self.name, text, "wrote to stdin");
        Ok(())
    }

    /// Wait until the CLI stops on its own, or report that it already has.
    pub async fn until_stopped(&mut self, timeout: Duration) -> Result<WaitOutcome<ExitInfo>, Error> {
        self.drain();
        match self.state {
            LifecycleState::NotStarted => {
                let err = Error::not_started("wait for it to stop");
                self.logger.error(&err.message);
                return Err(err);
            }
            LifecycleState::Stopped(exit) => {
                self.logger.log("CLI is already stopped");
                return Ok(WaitOutcome::Ready(exit));
            }
            _ => {}
        }

        self.logger.log("Waiting for CLI to stop on its own.");
        self.log_timeout(timeout);
        let outcome = self
            .wait_for(timeout, |_, notice| match notice {
                Notice::Exited(exit) => Some(*exit),
                _ => None,
            })
            .await;
        match &outcome {
            WaitOutcome::Ready(exit) => self.logger.log(&format!("CLI stopped on its own ({}).", exit)),
            WaitOutcome::TimedOut => self.logger.error("Timed out waiting to stop."),
            WaitOutcome::Ended => self.logger.error("CLI output closed without an exit status."),
        }
        Ok(outcome)
    }

    /// Send SIGINT to the CLI. Reports (and returns) `NotRunning` when there
    /// is nothing to stop.
    pub fn force_stop(&mut self) -> Result<(), Error> {
        self.drain();
        let delivered = match (&self.state, &self.pump) {
            (LifecycleState::Running, Some(pump)) => pump.interrupt(),
            _ => false,
        };
        if delivered {
            self.logger.log("Passing SIGINT to process");
            Ok(())
        } else {
            let err = Error::not_running();
            self.logger.error(&err.message);
            Err(err)
        }
    }

    /// Stop the ticker, detach from the process and kill it if it is still
    /// running. Idempotent.
    pub fn cleanup(&mut self) {
        self.drain();
        self.ticker.stop();
        self.stdin = None;
        self.pump = None;
        if self.handle.cleanup() {
            self.logger.log("Force quitting CLI on cleanup");
        }
        if matches!(self.state, LifecycleState::Starting | LifecycleState::Running) {
            self.state = LifecycleState::Stopped(ExitInfo::killed());
        }
    }

    /// Do nothing for a while
    pub async fn sleep(&self, duration: Duration) {
        self.logger.log(&format!("Sleeping for {}ms", duration.as_millis()));
        tokio::time::sleep(duration).await;
    }

    /// Pause the test and read one line from the console
    pub async fn readline(&self, prompt: &str) -> Result<String, Error> {
        let mut out = tokio::io::stdout();
        out.write_all(prompt.as_bytes()).await?;
        out.write_all(b" ").await?;
        out.flush().await?;

        let mut answer = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut answer).await?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Write to the test log
    pub fn log(&self, message: &str) {
        self.logger.log(&format!("({}) {}", self.name, message));
    }

    /// Write an error to the test log
    pub fn error(&self, message: &str) {
        self.logger.error(&format!("({}) {}", self.name, message));
    }

    /// Everything written to stdout so far
    pub fn get_stdout(&mut self) -> Vec<String> {
        self.drain();
        self.stdout.lines().to_vec()
    }

    /// Everything written to stderr so far
    pub fn get_stderr(&mut self) -> Vec<String> {
        self.drain();
        self.stderr.lines().to_vec()
    }

    /// Most recent entry on `stream`
    pub(crate) fn latest(&mut self, stream: Stream) -> Option<&str> {
        self.drain();
        match stream {
            Stream::Stdout => self.stdout.last(),
            Stream::Stderr => self.stderr.last(),
        }
    }

    pub(crate) fn require_started(&self, what: &str) -> Result<(), Error> {
        if self.state == LifecycleState::NotStarted {
            let err = Error::not_started(what);
            self.logger.error(&err.message);
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn log_timeout(&self, timeout: Duration) {
        if !timeout.is_zero() {
            self.logger.log(&format!("Will timeout in {} ms", timeout.as_millis()));
        }
    }

    /// Apply every event the pump has queued so far
    pub(crate) fn drain(&mut self) {
        loop {
            let Some(event) = self.pump.as_mut().and_then(Pump::try_recv) else {
                break;
            };
            self.apply(event);
        }
    }

    /// Apply events until `check` accepts one or `timeout` (if non-zero)
    /// elapses. Only one of the two can win.
    pub(crate) async fn wait_for<T>(
        &mut self,
        timeout: Duration,
        mut check: impl FnMut(&mut Session, &Notice) -> Option<T>,
    ) -> WaitOutcome<T> {
        let deadline = async {
            if timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(timeout).await
            }
        };
        tokio::pin!(deadline);

        loop {
            let Some(pump) = self.pump.as_mut() else {
                return WaitOutcome::Ended;
            };
            let event = tokio::select! {
                biased;
                event = pump.recv() => event,
                () = &mut deadline => return WaitOutcome::TimedOut,
            };
            let Some(event) = event else {
                return WaitOutcome::Ended;
            };
            let notice = self.apply(event);
            if let Some(value) = check(&mut *self, &notice) {
                return WaitOutcome::Ready(value);
            }
        }
    }

    fn apply(&mut self, event: PumpEvent) -> Notice {
        match event {
            PumpEvent::Spawned { pid } => {
                self.state = LifecycleState::Running;
                self.ticker.start();
                match pid {
                    Some(pid) => self.logger.log(&format!("CLI started (pid {})", pid)),
                    None => self.logger.log("CLI started"),
                }
                Notice::Spawned
            }
            PumpEvent::Output(stream, text) => {
                tracing::debug!(session = %self.name, %stream, chunk = %text.trim_end(), "output");
                self.ticker.record_output();
                match stream {
                    Stream::Stdout => self.stdout.push_chunk(&text),
                    Stream::Stderr => self.stderr.push_chunk(&text),
                };
                Notice::Output(stream)
            }
            PumpEvent::Tick => match self.ticker.tick() {
                Some(idle) => Notice::Tick(idle),
                None => Notice::Quiet,
            },
            PumpEvent::Exited(exit) => {
                self.ticker.stop();
                self.stdout.flush();
                self.stderr.flush();
                self.stdin = None;
                self.state = LifecycleState::Stopped(exit);
                if let Some(signal) = exit.signal {
                    self.logger.log(&format!("child process terminated due to receipt of signal {}", signal));
                } else if let Some(code) = exit.code.filter(|c| *c != 0) {
                    self.logger.log(&format!("child process exited with code {}", code));
                }
                Notice::Exited(exit)
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("command", &self.config.command)
            .field("args", &self.args)
            .field("state", &self.state)
            .field("stdout", &self.stdout.len())
            .field("stderr", &self.stderr.len())
            .finish()
    }
}
