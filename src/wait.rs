//! Wait engine
//!
//! "Wait until" operations over a session's output. Line waits scan the
//! target buffer incrementally: each query identifier owns a cursor per
//! stream, so a repeated query resumes after its previous match instead of
//! rescanning (and re-matching) old output.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::buffer::{LineBuffer, Stream};
use crate::error::{Error, ErrorKind};
use crate::session::{Notice, Session};

/// Result of a wait that did not fail outright
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The condition became true
    Ready(T),
    /// The timeout elapsed first
    TimedOut,
    /// The process ended and its output closed, so the condition can no
    /// longer become true
    Ended,
}

impl<T> WaitOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            WaitOutcome::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Turn a non-ready outcome into an error; `what` completes
    /// "timed out waiting for ...".
    pub fn into_result(self, what: &str) -> Result<T, Error> {
        match self {
            WaitOutcome::Ready(value) => Ok(value),
            WaitOutcome::TimedOut => Err(Error::timeout(format!("timed out waiting for {}", what))),
            WaitOutcome::Ended => Err(Error::new(
                ErrorKind::ProcessEnded,
                format!("CLI ended while waiting for {}", what),
            )),
        }
    }
}

/// Options shared by the line waits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    /// Also consider output that arrived before the wait but after this
    /// identifier's previous match
    pub backtrack: bool,
    /// Zero waits forever
    pub timeout: Duration,
}

impl WaitOptions {
    /// No backtracking, timeout in milliseconds
    pub fn timeout_ms(ms: u64) -> Self {
        Self {
            backtrack: false,
            timeout: Duration::from_millis(ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backtrack(mut self) -> Self {
        self.backtrack = true;
        self
    }
}

type Predicate = Box<dyn Fn(&str) -> bool>;

/// A condition over the entries of one stream
pub struct WaitQuery {
    /// Cursor key; queries sharing an id continue from each other
    pub id: String,
    /// Verb phrase for the log ("include 'ready'")
    pub description: String,
    pub stream: Stream,
    pub options: WaitOptions,
    predicate: Predicate,
}

impl WaitQuery {
    pub fn new(
        stream: Stream,
        id: impl Into<String>,
        description: impl Into<String>,
        predicate: impl Fn(&str) -> bool + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            stream,
            options: WaitOptions::default(),
            predicate: Box::new(predicate),
        }
    }

    /// An entry contains `search`
    pub fn includes(stream: Stream, search: &str) -> Self {
        let needle = search.to_string();
        Self::new(
            stream,
            format!("includes_{}", search),
            format!("include '{}'", search),
            move |line| line.contains(needle.as_str()),
        )
    }

    /// An entry is exactly `search`
    pub fn equals(stream: Stream, search: &str) -> Self {
        let expected = search.to_string();
        Self::new(
            stream,
            format!("equals_{}", search),
            format!("equal '{}'", search),
            move |line| line == expected,
        )
    }

    pub fn with_options(mut self, options: WaitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn matches(&self, line: &str) -> bool {
        (self.predicate)(line)
    }
}

impl fmt::Debug for WaitQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQuery")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Next unscanned buffer index per (stream, query id)
#[derive(Debug, Default)]
pub struct Cursors {
    positions: HashMap<Stream, HashMap<String, usize>>,
}

impl Cursors {
    pub fn position(&self, stream: Stream, id: &str) -> usize {
        self.positions
            .get(&stream)
            .and_then(|ids| ids.get(id))
            .copied()
            .unwrap_or(0)
    }

    /// The only way a cursor moves: forward, never back
    fn advance(&mut self, stream: Stream, id: &str, to: usize) {
        let ids = self.positions.entry(stream).or_default();
        match ids.get_mut(id) {
            Some(pos) => *pos = (*pos).max(to),
            None => {
                ids.insert(id.to_string(), to);
            }
        }
    }

    /// Skip everything already buffered
    pub fn skip_to_end(&mut self, stream: Stream, id: &str, buffer: &LineBuffer) {
        self.advance(stream, id, buffer.len());
    }

    /// Find the first unscanned entry accepted by `predicate`, returning its
    /// absolute index. The cursor moves past the match, or to the end of the
    /// buffer when nothing matched.
    pub fn scan(
        &mut self,
        stream: Stream,
        id: &str,
        buffer: &LineBuffer,
        predicate: impl Fn(&str) -> bool,
    ) -> Option<usize> {
        let lines = buffer.lines();
        let start = self.position(stream, id).min(lines.len());
        let found = lines[start..]
            .iter()
            .position(|line| predicate(line))
            .map(|offset| start + offset);
        self.advance(stream, id, found.map_or(lines.len(), |index| index + 1));
        found
    }
}

fn scan_session(session: &mut Session, query: &WaitQuery) -> Option<usize> {
    let buffer = match query.stream {
        Stream::Stdout => &session.stdout,
        Stream::Stderr => &session.stderr,
    };
    session
        .cursors
        .scan(query.stream, &query.id, buffer, |line| query.matches(line))
}

impl Session {
    /// Wait until an entry of `query.stream` satisfies the query. Resolves
    /// with the matched entry's index.
    pub async fn until_output(&mut self, query: WaitQuery) -> Result<WaitOutcome<usize>, Error> {
        self.require_started(&format!("wait for {} to {}", query.stream, query.description))?;
        self.drain();

        if !query.options.backtrack {
            let buffer = match query.stream {
                Stream::Stdout => &self.stdout,
                Stream::Stderr => &self.stderr,
            };
            self.cursors.skip_to_end(query.stream, &query.id, buffer);
        }

        if let Some(index) = scan_session(self, &query) {
            self.logger.log(&format!("{} already satisfies: {}", query.stream, query.description));
            return Ok(WaitOutcome::Ready(index));
        }

        self.logger.log(&format!("Waiting for {} to {}", query.stream, query.description));
        self.log_timeout(query.options.timeout);

        let outcome = self
            .wait_for(query.options.timeout, |session, notice| match notice {
                Notice::Output(stream) if *stream == query.stream => scan_session(session, &query),
                Notice::Exited(_) => scan_session(session, &query),
                _ => None,
            })
            .await;

        match &outcome {
            WaitOutcome::Ready(_) => {
                self.logger.log(&format!("{} now satisfies: {}", query.stream, query.description));
            }
            WaitOutcome::TimedOut => {
                self.logger.error(&format!(
                    "Timed out waiting for {} to {}",
                    query.stream, query.description
                ));
            }
            WaitOutcome::Ended => {
                self.logger.error(&format!(
                    "CLI ended before {} could {}",
                    query.stream, query.description
                ));
            }
        }
        Ok(outcome)
    }

    /// Wait until a stdout entry contains `search`
    pub async fn until_stdout_includes(
        &mut self,
        search: &str,
        options: WaitOptions,
    ) -> Result<WaitOutcome<usize>, Error> {
        self.until_output(WaitQuery::includes(Stream::Stdout, search).with_options(options))
            .await
    }

    /// Wait until a stderr entry contains `search`
    pub async fn until_stderr_includes(
        &mut self,
        search: &str,
        options: WaitOptions,
    ) -> Result<WaitOutcome<usize>, Error> {
        self.until_output(WaitQuery::includes(Stream::Stderr, search).with_options(options))
            .await
    }

    /// Wait until a stdout entry is exactly `search`
    pub async fn until_stdout_equals(
        &mut self,
        search: &str,
        options: WaitOptions,
    ) -> Result<WaitOutcome<usize>, Error> {
        self.until_output(WaitQuery::equals(Stream::Stdout, search).with_options(options))
            .await
    }

    /// Wait until a stderr entry is exactly `search`
    pub async fn until_stderr_equals(
        &mut self,
        search: &str,
        options: WaitOptions,
    ) -> Result<WaitOutcome<usize>, Error> {
        self.until_output(WaitQuery::equals(Stream::Stderr, search).with_options(options))
            .await
    }

    /// Wait until a stdout entry passes `predicate`.
    ///
    /// `id` keys the search cursor: calling again with the same id continues
    /// after the previous match. `description` is what the log shows.
    pub async fn until_stdout_passes(
        &mut self,
        id: &str,
        description: &str,
        options: WaitOptions,
        predicate: impl Fn(&str) -> bool + 'static,
    ) -> Result<WaitOutcome<usize>, Error> {
        self.until_output(WaitQuery::new(Stream::Stdout, id, description, predicate).with_options(options))
            .await
    }

    /// Stderr counterpart of [`Session::until_stdout_passes`]
    pub async fn until_stderr_passes(
        &mut self,
        id: &str,
        description: &str,
        options: WaitOptions,
        predicate: impl Fn(&str) -> bool + 'static,
    ) -> Result<WaitOutcome<usize>, Error> {
        self.until_output(WaitQuery::new(Stream::Stderr, id, description, predicate).with_options(options))
            .await
    }

    /// Wait until stdout and stderr have both been silent for `seconds`
    /// ticks. Resolves with the idle count reached.
    pub async fn until_output_idle_seconds(
        &mut self,
        seconds: u64,
        timeout: Duration,
    ) -> Result<WaitOutcome<u64>, Error> {
        self.require_started("wait for idle output")?;
        self.drain();

        let idle = self.ticker.idle_seconds();
        if idle >= seconds {
            self.logger.log(&format!("Output has already been idle for {} seconds.", seconds));
            return Ok(WaitOutcome::Ready(idle));
        }

        self.logger.log(&format!("Waiting for idle seconds {}", seconds));
        self.log_timeout(timeout);
        let outcome = self
            .wait_for(timeout, |_, notice| match notice {
                Notice::Tick(idle) if *idle >= seconds => Some(*idle),
                _ => None,
            })
            .await;

        match &outcome {
            WaitOutcome::Ready(idle) => {
                self.logger.log(&format!("Output has been idle for {} seconds. ({})", idle, seconds));
            }
            WaitOutcome::TimedOut => self.logger.error("Timed out waiting for idle output."),
            WaitOutcome::Ended => self.logger.error("CLI ended before its output went idle."),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CaptureMode;

    fn buffer(lines: &[&str]) -> LineBuffer {
        let mut buf = LineBuffer::new(CaptureMode::Chunks);
        for line in lines {
            buf.push_chunk(line);
        }
        buf
    }

    #[test]
    fn test_same_id_never_rematches_a_line() {
        let buf = buffer(&["ready", "busy", "ready"]);
        let mut cursors = Cursors::default();
        let ready = |line: &str| line.contains("ready");

        assert_eq!(cursors.scan(Stream::Stdout, "includes_ready", &buf, ready), Some(0));
        assert_eq!(cursors.position(Stream::Stdout, "includes_ready"), 1);
        assert_eq!(cursors.scan(Stream::Stdout, "includes_ready", &buf, ready), Some(2));
        assert_eq!(cursors.scan(Stream::Stdout, "includes_ready", &buf, ready), None);
        assert_eq!(cursors.position(Stream::Stdout, "includes_ready"), 3);
    }

    #[test]
    fn test_skip_to_end_hides_buffered_output() {
        let buf = buffer(&["ready"]);
        let mut cursors = Cursors::default();
        cursors.skip_to_end(Stream::Stdout, "q", &buf);
        assert_eq!(cursors.scan(Stream::Stdout, "q", &buf, |l| l == "ready"), None);
    }

    #[test]
    fn test_cursors_are_per_stream_and_id() {
        let buf = buffer(&["ready"]);
        let mut cursors = Cursors::default();
        assert_eq!(cursors.scan(Stream::Stdout, "a", &buf, |_| true), Some(0));
        assert_eq!(cursors.scan(Stream::Stderr, "a", &buf, |_| true), Some(0));
        assert_eq!(cursors.scan(Stream::Stdout, "b", &buf, |_| true), Some(0));
    }

    #[test]
    fn test_cursor_never_moves_back() {
        let buf = buffer(&["x", "y"]);
        let mut cursors = Cursors::default();
        cursors.skip_to_end(Stream::Stdout, "q", &buf);
        cursors.advance(Stream::Stdout, "q", 0);
        assert_eq!(cursors.position(Stream::Stdout, "q"), 2);
    }

    #[test]
    fn test_equals_is_exact() {
        let query = WaitQuery::equals(Stream::Stdout, "20");
        assert!(query.matches("20"));
        assert!(!query.matches("120"));
        let query = WaitQuery::includes(Stream::Stdout, "20");
        assert!(query.matches("120"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(WaitOutcome::Ready(3).into_result("x").unwrap(), 3);
        let err = WaitOutcome::<usize>::TimedOut.into_result("stdout to include '20'").unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "timed out waiting for stdout to include '20'");
        let err = WaitOutcome::<usize>::Ended.into_result("x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProcessEnded);
    }
}
