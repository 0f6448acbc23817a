//! Harness errors

use std::fmt;

/// The kind of harness error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// `start` called while the CLI is starting or running
    AlreadyStarted,
    /// Operation needs a session that has been started
    NotStarted,
    /// The child process could not be created
    Spawn,
    /// A wait, start or stop exceeded its deadline
    Timeout,
    /// The process ended before the awaited condition could be met
    ProcessEnded,
    /// `force-stop` (or `write`) with no running process
    NotRunning,
    /// Command succeeded but was expected to fail (! prefix)
    UnexpectedSuccess,
    /// The CLI stopped with an unexpected exit code
    ExitCodeMismatch,
    /// Invalid script syntax
    SyntaxError,
    /// Invalid usage of a command
    UsageError,
    /// Skip the test
    Skip,
    /// Stop the script (not an error)
    Stop,
    /// IO error
    Io,
    /// Other error
    Other,
}

/// A harness error, optionally carrying the script location it came from
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub command: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
            command: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn with_command(mut self, cmd: impl Into<String>) -> Self {
        self.command = Some(cmd.into());
        self
    }

    pub fn already_started() -> Self {
        Self::new(
            ErrorKind::AlreadyStarted,
            "CLI already started; use force-stop or wait until the process ends",
        )
    }

    pub fn not_started(what: &str) -> Self {
        Self::new(ErrorKind::NotStarted, format!("CLI has not started, cannot {}", what))
    }

    pub fn not_running() -> Self {
        Self::new(ErrorKind::NotRunning, "CLI not running, nothing to force stop")
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, msg)
    }

    pub fn usage(cmd: &str, expected: &str) -> Self {
        Self::new(ErrorKind::UsageError, format!("usage: {} {}", cmd, expected))
    }

    pub fn skip(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Skip, msg)
    }

    pub fn is_skip(&self) -> bool {
        self.kind == ErrorKind::Skip
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if let Some(ref cmd) = self.command {
            write!(f, " {}: ", cmd)?;
        } else if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = Error::timeout("timed out waiting for stdout to include '20'")
            .with_location("math.txtar", 4)
            .with_command("stdout-includes");
        assert_eq!(
            err.to_string(),
            "math.txtar:4: stdout-includes: timed out waiting for stdout to include '20'"
        );
    }

    #[test]
    fn test_display_bare() {
        let err = Error::not_running();
        assert_eq!(err.to_string(), "CLI not running, nothing to force stop");
        assert_eq!(err.kind, ErrorKind::NotRunning);
    }
}
