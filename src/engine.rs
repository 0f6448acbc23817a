//! Script engine
//!
//! The Engine holds the command registry. It is stateless config: one engine
//! can run many scripts, each against its own [`State`].

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, ErrorKind};
use crate::parser::ArgFragment;
use crate::state::State;

/// Result returned by a command execution
#[derive(Debug)]
pub enum CmdResult {
    /// Command completed successfully
    Ok,
    /// Command completed, script should stop
    Stop(String),
    /// Command completed, test should be skipped
    Skip(String),
}

/// Usage information for a command
pub struct CmdUsage {
    /// One-line summary
    pub summary: String,
    /// Argument syntax
    pub args: String,
    /// The first non-flag argument is a regular expression: variables
    /// expanded into it are escaped
    pub regexp: bool,
}

/// A command that can be executed in a script
#[async_trait(?Send)]
pub trait Cmd {
    /// Execute the command
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error>;

    /// Return usage information
    fn usage(&self) -> CmdUsage;
}

/// A boxed command
pub type BoxedCmd = Box<dyn Cmd>;

/// The script engine
pub struct Engine {
    /// Registered commands
    pub commands: HashMap<String, BoxedCmd>,
    /// Whether to suppress command logging
    pub quiet: bool,
}

impl Engine {
    /// Create a new engine with the built-in commands
    pub fn new() -> Self {
        Self {
            commands: crate::commands::default_commands(),
            quiet: false,
        }
    }

    /// Register a custom command
    pub fn register_command(&mut self, name: impl Into<String>, cmd: BoxedCmd) {
        self.commands.insert(name.into(), cmd);
    }

    /// (name, args, summary) of every command, sorted by name
    pub fn command_help(&self) -> Vec<(String, String, String)> {
        let mut help: Vec<_> = self
            .commands
            .iter()
            .map(|(name, cmd)| {
                let usage = cmd.usage();
                (name.clone(), usage.args, usage.summary)
            })
            .collect();
        help.sort_by(|a, b| a.0.cmp(&b.0));
        help
    }

    /// Execute a script (the comment section of a txtar archive). Returns the
    /// pass message.
    pub async fn execute(&self, state: &mut State, script: &str, filename: &str) -> Result<String, Error> {
        for (i, line) in script.lines().enumerate() {
            let line_number = i + 1;

            if line.starts_with('#') {
                if !self.quiet {
                    state.logf(line.trim_start_matches('#').trim());
                }
                continue;
            }

            let parsed = match crate::parser::parse_line(line, line_number) {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    return Err(Error::syntax(e.message).with_location(filename, line_number));
                }
            };

            if !self.quiet {
                state.logf(&format!("> {}", parsed.raw.trim()));
            }

            let cmd = self.commands.get(&parsed.command).ok_or_else(|| {
                Error::syntax(format!("unknown command: {}", parsed.command)).with_location(filename, line_number)
            })?;

            let regexp_arg = if cmd.usage().regexp {
                first_non_flag(&parsed.raw_args)
            } else {
                None
            };
            let args = expand_args(state, &parsed.raw_args, regexp_arg);

            match cmd.run(state, &args).await {
                Ok(CmdResult::Ok) => {
                    if parsed.negate {
                        return Err(Error::new(
                            ErrorKind::UnexpectedSuccess,
                            format!("command succeeded unexpectedly: {}", parsed.raw.trim()),
                        )
                        .with_location(filename, line_number));
                    }
                }
                Ok(CmdResult::Stop(msg)) => {
                    state.logf(&format!("STOP: {}", msg));
                    return Ok(msg);
                }
                Ok(CmdResult::Skip(msg)) => {
                    return Err(Error::skip(msg).with_location(filename, line_number));
                }
                Err(e) if parsed.negate => {
                    if !self.quiet {
                        state.logf(&format!("[expected failure: {}]", e.message));
                    }
                }
                Err(e) if parsed.may_fail => {
                    if !self.quiet {
                        state.logf(&format!("[allowed failure: {}]", e.message));
                    }
                }
                Err(e) => {
                    return Err(e.with_location(filename, line_number).with_command(&parsed.command));
                }
            }
        }

        Ok("script completed".into())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand arguments from raw fragments.
///
/// Quoted fragments are kept verbatim. Unquoted fragments have variables
/// expanded, escaped for regex use in the argument at `regexp_arg`.
pub fn expand_args(state: &State, raw_args: &[Vec<ArgFragment>], regexp_arg: Option<usize>) -> Vec<String> {
    raw_args
        .iter()
        .enumerate()
        .map(|(i, frags)| {
            let in_regexp = regexp_arg == Some(i);
            frags
                .iter()
                .map(|frag| {
                    if frag.quoted {
                        frag.s.clone()
                    } else {
                        state.expand_env(&frag.s, in_regexp)
                    }
                })
                .collect()
        })
        .collect()
}

/// Index of the first argument that is not a flag. `--` ends the flags.
pub fn first_non_flag(raw_args: &[Vec<ArgFragment>]) -> Option<usize> {
    let mut after_separator = false;
    for (i, frags) in raw_args.iter().enumerate() {
        let quoted = frags.first().is_some_and(|f| f.quoted);
        let text: String = frags.iter().map(|f| f.s.as_str()).collect();
        if after_separator || quoted || !text.starts_with('-') {
            return Some(i);
        }
        if text == "--" {
            after_separator = true;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    #[test]
    fn test_first_non_flag() {
        let line = parse_line("stdout-matches -backtrack -timeout=1s ^v[0-9]+$", 1).unwrap().unwrap();
        assert_eq!(first_non_flag(&line.raw_args), Some(2));
        let line = parse_line("stdout-matches -- -1", 1).unwrap().unwrap();
        assert_eq!(first_non_flag(&line.raw_args), Some(1));
        let line = parse_line("stdout-matches '-1'", 1).unwrap().unwrap();
        assert_eq!(first_non_flag(&line.raw_args), Some(0));
    }

    #[test]
    fn test_registry_has_session_commands() {
        let engine = Engine::new();
        for name in ["start", "write", "stdout-includes", "stderr-equals", "idle", "stopped", "force-stop"] {
            assert!(engine.commands.contains_key(name), "missing {}", name);
        }
        let help = engine.command_help();
        assert!(help.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}
