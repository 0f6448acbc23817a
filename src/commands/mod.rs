//! Built-in script commands
//!
//! Each command drives the script's session: attribute setup, lifecycle,
//! output waits and a little flow control.

mod flow;
mod lifecycle;
mod output;

use std::collections::HashMap;
use std::time::Duration;

use crate::buffer::Stream;
use crate::engine::BoxedCmd;
use crate::error::{Error, ErrorKind};

/// Return the default set of built-in commands
pub fn default_commands() -> HashMap<String, BoxedCmd> {
    let mut cmds: HashMap<String, BoxedCmd> = HashMap::new();
    cmds.insert("name".into(), Box::new(lifecycle::AttrCmd::Name));
    cmds.insert("description".into(), Box::new(lifecycle::AttrCmd::Description));
    cmds.insert("args".into(), Box::new(lifecycle::AttrCmd::Args));
    cmds.insert("start".into(), Box::new(lifecycle::StartCmd));
    cmds.insert("write".into(), Box::new(lifecycle::WriteCmd));
    cmds.insert("stopped".into(), Box::new(lifecycle::StoppedCmd));
    cmds.insert("force-stop".into(), Box::new(lifecycle::ForceStopCmd));
    for stream in [Stream::Stdout, Stream::Stderr] {
        for mode in [output::Match::Includes, output::Match::Equals, output::Match::Matches] {
            let cmd = output::WaitOutputCmd { stream, mode };
            cmds.insert(cmd.name(), Box::new(cmd));
        }
    }
    cmds.insert("idle".into(), Box::new(output::IdleCmd));
    cmds.insert("sleep".into(), Box::new(flow::SleepCmd));
    cmds.insert("log".into(), Box::new(flow::LogCmd { error: false }));
    cmds.insert("error".into(), Box::new(flow::LogCmd { error: true }));
    cmds.insert("readline".into(), Box::new(flow::ReadlineCmd));
    cmds.insert("stop".into(), Box::new(flow::StopCmd));
    cmds.insert("skip".into(), Box::new(flow::SkipCmd));
    cmds
}

/// Flags understood by the session commands
#[derive(Debug, Default)]
pub(crate) struct Flags {
    pub backtrack: bool,
    pub timeout: Option<Duration>,
    pub id: Option<String>,
    pub code: Option<i32>,
    pub positional: Vec<String>,
}

impl Flags {
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::ZERO)
    }
}

/// Split `args` into the flags in `allowed` and positional arguments.
///
/// Flags may appear anywhere before `--`; anything that is not an allowed
/// flag is positional.
pub(crate) fn parse_flags(cmd: &str, args: &[String], allowed: &[&str]) -> Result<Flags, Error> {
    let mut flags = Flags::default();
    let mut flags_done = false;

    for arg in args {
        if !flags_done {
            if arg == "--" {
                flags_done = true;
                continue;
            }
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg.as_str(), None),
            };
            if allowed.contains(&name) {
                let bad_value = |e: String| Error::new(ErrorKind::UsageError, format!("{}: {}: {}", cmd, name, e));
                match (name, value) {
                    ("-backtrack", None) => flags.backtrack = true,
                    ("-timeout", Some(v)) => flags.timeout = Some(parse_duration(v).map_err(bad_value)?),
                    ("-id", Some(v)) if !v.is_empty() => flags.id = Some(v.to_string()),
                    ("-code", Some(v)) => {
                        flags.code = Some(v.parse().map_err(|_| bad_value(format!("invalid exit code {:?}", v)))?)
                    }
                    _ => {
                        return Err(Error::new(
                            ErrorKind::UsageError,
                            format!("{}: malformed flag {}", cmd, arg),
                        ))
                    }
                }
                continue;
            }
        }
        flags.positional.push(arg.clone());
    }
    Ok(flags)
}

/// Parse a duration: a bare integer is milliseconds, otherwise a sequence of
/// number+unit pairs such as "1s", "1.5s" or "1m30s".
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| format!("invalid duration {:?}", s));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    if rest.is_empty() {
        return Err("empty duration".into());
    }
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let value: f64 = number.parse().map_err(|_| format!("invalid duration {:?}", s))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let secs_per_unit = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {:?}", s)),
            _ => return Err(format!("unknown unit {:?} in duration {:?}", unit, s)),
        };
        total = Duration::try_from_secs_f64(value * secs_per_unit)
            .ok()
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration {:?} out of range", s))?;
        rest = tail;
    }
    Ok(total)
}
