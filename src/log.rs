//! Test log
//!
//! Sessions never print directly; they report through a [`Logger`] handed to
//! them at construction. [`TracingLogger`] forwards to `tracing`,
//! [`CaptureLogger`] additionally keeps the entries so a failing test can show
//! what happened.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Logging capability injected into a session
pub trait Logger {
    /// Informational message
    fn log(&self, message: &str);
    /// Error message
    fn error(&self, message: &str);
}

/// Forwards every message to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Severity of a captured entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// A captured log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Level::Info => write!(f, "# {}", self.message),
            Level::Error => write!(f, "!!! {}", self.message),
        }
    }
}

/// Records entries (and forwards them to `tracing`).
///
/// Clones share the same entry list, so the runner can hand one clone to the
/// session factory and read the log back once the test has settled.
#[derive(Debug, Clone, Default)]
pub struct CaptureLogger {
    entries: Rc<RefCell<Vec<LogEntry>>>,
}

impl CaptureLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Render the log one entry per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.borrow().iter() {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    fn push(&self, level: Level, message: &str) {
        self.entries.borrow_mut().push(LogEntry {
            level,
            message: message.to_string(),
        });
    }
}

impl Logger for CaptureLogger {
    fn log(&self, message: &str) {
        tracing::info!("{}", message);
        self.push(Level::Info, message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
        self.push(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_shares_entries_between_clones() {
        let log = CaptureLogger::new();
        let other = log.clone();
        other.log("Starting: python3 in /tmp");
        log.error("Timed out waiting to spawn.");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Level::Info);
        assert_eq!(entries[1].level, Level::Error);
        assert_eq!(log.render(), "# Starting: python3 in /tmp\n!!! Timed out waiting to spawn.\n");
    }
}
