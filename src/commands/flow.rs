//! Flow control commands: sleep, log, error, readline, stop, skip

use async_trait::async_trait;

use super::parse_duration;
use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::{Error, ErrorKind};
use crate::state::State;

pub(super) struct SleepCmd;

#[async_trait(?Send)]
impl Cmd for SleepCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let [duration] = args else {
            return Err(Error::usage("sleep", "<duration>"));
        };
        let duration = parse_duration(duration)
            .map_err(|e| Error::new(ErrorKind::UsageError, format!("sleep: {}", e)))?;
        state.session().sleep(duration).await;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Sleep for a duration".into(),
            args: "<duration>".into(),
            regexp: false,
        }
    }
}

/// Write a line to the test log, tagged with the session name
pub(super) struct LogCmd {
    pub error: bool,
}

#[async_trait(?Send)]
impl Cmd for LogCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let message = args.join(" ");
        let session = state.session();
        if self.error {
            session.error(&message);
        } else {
            session.log(&message);
        }
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: if self.error {
                "Write an error to the test log".into()
            } else {
                "Write a message to the test log".into()
            },
            args: "[message...]".into(),
            regexp: false,
        }
    }
}

/// Pause for console input and keep it in a variable
pub(super) struct ReadlineCmd;

#[async_trait(?Send)]
impl Cmd for ReadlineCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let Some((var, prompt)) = args.split_first() else {
            return Err(Error::usage("readline", "<var> [prompt...]"));
        };
        let prompt = if prompt.is_empty() {
            format!("{}?", var)
        } else {
            prompt.join(" ")
        };
        let answer = state.session().readline(&prompt).await?;
        state.setvar(var.clone(), answer);
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Read a console line into a variable".into(),
            args: "<var> [prompt...]".into(),
            regexp: false,
        }
    }
}

pub(super) struct StopCmd;

#[async_trait(?Send)]
impl Cmd for StopCmd {
    async fn run(&self, _state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        if args.len() > 1 {
            return Err(Error::usage("stop", "[msg]"));
        }
        let msg = args.first().cloned().unwrap_or_else(|| "stopped".into());
        Ok(CmdResult::Stop(msg))
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Stop script execution".into(),
            args: "[message]".into(),
            regexp: false,
        }
    }
}

pub(super) struct SkipCmd;

#[async_trait(?Send)]
impl Cmd for SkipCmd {
    async fn run(&self, _state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let msg = if args.is_empty() {
            "skipped".to_string()
        } else {
            args.join(" ")
        };
        Ok(CmdResult::Skip(msg))
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Skip the test".into(),
            args: "[reason]".into(),
            regexp: false,
        }
    }
}
