//! Output wait commands: {stdout,stderr}-{includes,equals,matches} and idle

use async_trait::async_trait;
use similar::TextDiff;

use super::parse_flags;
use crate::buffer::Stream;
use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::{Error, ErrorKind};
use crate::state::State;
use crate::wait::{WaitOptions, WaitOutcome, WaitQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Match {
    /// The entry contains the text
    Includes,
    /// The entry is exactly the text
    Equals,
    /// The entry matches a regular expression
    Matches,
}

/// Wait for an output entry of one stream to satisfy a condition
pub(super) struct WaitOutputCmd {
    pub stream: Stream,
    pub mode: Match,
}

impl WaitOutputCmd {
    pub fn name(&self) -> String {
        let verb = match self.mode {
            Match::Includes => "includes",
            Match::Equals => "equals",
            Match::Matches => "matches",
        };
        format!("{}-{}", self.stream, verb)
    }

    fn query(&self, pattern: &str) -> Result<WaitQuery, Error> {
        Ok(match self.mode {
            Match::Includes => WaitQuery::includes(self.stream, pattern),
            Match::Equals => WaitQuery::equals(self.stream, pattern),
            Match::Matches => {
                let re = compile_regex(&self.name(), pattern)?;
                WaitQuery::new(
                    self.stream,
                    format!("matches_{}", pattern),
                    format!("match /{}/", pattern),
                    move |line| re.is_match(line),
                )
            }
        })
    }
}

#[async_trait(?Send)]
impl Cmd for WaitOutputCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let name = self.name();
        let flags = parse_flags(&name, args, &["-backtrack", "-timeout", "-id"])?;
        let [pattern] = flags.positional.as_slice() else {
            return Err(Error::usage(&name, "[-backtrack] [-timeout=D] [-id=ID] <text>"));
        };

        let mut query = self.query(pattern)?;
        if let Some(ref id) = flags.id {
            query.id = id.clone();
        }
        let mut options = WaitOptions::default().with_timeout(flags.timeout());
        if flags.backtrack {
            options = options.with_backtrack();
        }
        let what = format!("{} to {}", self.stream, query.description);

        let session = state.session();
        let outcome = session.until_output(query.with_options(options)).await?;

        if self.mode == Match::Equals && !outcome.is_ready() {
            let latest = session.latest(self.stream).unwrap_or_default();
            let diff = equals_diff(self.stream, latest, pattern);
            if !diff.is_empty() {
                state.logf(&diff);
            }
        }

        outcome.into_result(&what)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        let summary = match self.mode {
            Match::Includes => format!("Wait for a {} entry containing text", self.stream),
            Match::Equals => format!("Wait for a {} entry equal to text", self.stream),
            Match::Matches => format!("Wait for a {} entry matching a regex", self.stream),
        };
        CmdUsage {
            summary,
            args: "[-backtrack] [-timeout=D] [-id=ID] <text>".into(),
            regexp: self.mode == Match::Matches,
        }
    }
}

/// Compile a regex with a size limit to mitigate ReDoS (CWE-1333).
fn compile_regex(cmd: &str, pattern: &str) -> Result<regex::Regex, Error> {
    regex::RegexBuilder::new(pattern)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| Error::new(ErrorKind::SyntaxError, format!("{}: invalid regex: {}", cmd, e)))
}

/// Wait until both output streams have been silent for N ticks
pub(super) struct IdleCmd;

#[async_trait(?Send)]
impl Cmd for IdleCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let flags = parse_flags("idle", args, &["-timeout"])?;
        let seconds: u64 = match flags.positional.as_slice() {
            [n] => n
                .parse()
                .map_err(|_| Error::new(ErrorKind::UsageError, format!("idle: invalid tick count {:?}", n)))?,
            _ => return Err(Error::usage("idle", "[-timeout=D] <seconds>")),
        };
        let outcome: WaitOutcome<u64> = state
            .session()
            .until_output_idle_seconds(seconds, flags.timeout())
            .await?;
        outcome.into_result(&format!("{} idle seconds", seconds))?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Wait until the CLI's output has been idle".into(),
            args: "[-timeout=D] <seconds>".into(),
            regexp: false,
        }
    }
}

/// Unified diff of the latest entry against the expected text
fn equals_diff(stream: Stream, latest: &str, expected: &str) -> String {
    TextDiff::from_lines(latest, expected)
        .unified_diff()
        .header(&format!("latest {}", stream), "expected")
        .to_string()
}
