//! Session setup and lifecycle commands: name, description, args, start,
//! write, stopped, force-stop

use async_trait::async_trait;

use super::parse_flags;
use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::{Error, ErrorKind};
use crate::state::State;

/// Set one of the session attributes. Only valid before the session exists.
pub(super) enum AttrCmd {
    Name,
    Description,
    Args,
}

impl AttrCmd {
    fn command(&self) -> &'static str {
        match self {
            AttrCmd::Name => "name",
            AttrCmd::Description => "description",
            AttrCmd::Args => "args",
        }
    }
}

#[async_trait(?Send)]
impl Cmd for AttrCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        if state.has_session() {
            return Err(Error::new(
                ErrorKind::UsageError,
                format!("{}: the session already exists; set attributes before using it", self.command()),
            ));
        }
        match self {
            AttrCmd::Name => {
                if args.is_empty() {
                    return Err(Error::usage("name", "<name>"));
                }
                state.attrs.name = args.join(" ");
            }
            AttrCmd::Description => state.attrs.description = args.join(" "),
            AttrCmd::Args => state.attrs.args = args.to_vec(),
        }
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        let (summary, args) = match self {
            AttrCmd::Name => ("Name the session", "<name>"),
            AttrCmd::Description => ("Describe the session", "[text...]"),
            AttrCmd::Args => ("Set the CLI's arguments", "[arg...]"),
        };
        CmdUsage {
            summary: summary.into(),
            args: args.into(),
            regexp: false,
        }
    }
}

pub(super) struct StartCmd;

#[async_trait(?Send)]
impl Cmd for StartCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let flags = parse_flags("start", args, &["-timeout"])?;
        if !flags.positional.is_empty() {
            return Err(Error::usage("start", "[-timeout=D]"));
        }
        state.session().start(flags.timeout()).await?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Start the CLI".into(),
            args: "[-timeout=D]".into(),
            regexp: false,
        }
    }
}

/// Send one line to the CLI. Arguments are joined with spaces.
pub(super) struct WriteCmd;

#[async_trait(?Send)]
impl Cmd for WriteCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let text = args.join(" ");
        state.session().write(&text).await?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Write a line to the CLI's stdin".into(),
            args: "[text...]".into(),
            regexp: false,
        }
    }
}

pub(super) struct StoppedCmd;

#[async_trait(?Send)]
impl Cmd for StoppedCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        let flags = parse_flags("stopped", args, &["-timeout", "-code"])?;
        if !flags.positional.is_empty() {
            return Err(Error::usage("stopped", "[-timeout=D] [-code=N]"));
        }
        let exit = state
            .session()
            .until_stopped(flags.timeout())
            .await?
            .into_result("the CLI to stop")?;
        if let Some(want) = flags.code {
            if exit.code != Some(want) {
                return Err(Error::new(
                    ErrorKind::ExitCodeMismatch,
                    format!("CLI stopped with {}, want exit code {}", exit, want),
                ));
            }
        }
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Wait for the CLI to stop on its own".into(),
            args: "[-timeout=D] [-code=N]".into(),
            regexp: false,
        }
    }
}

/// Interrupt the CLI. Nothing running is reported in the log, not failed.
pub(super) struct ForceStopCmd;

#[async_trait(?Send)]
impl Cmd for ForceStopCmd {
    async fn run(&self, state: &mut State, args: &[String]) -> Result<CmdResult, Error> {
        if !args.is_empty() {
            return Err(Error::usage("force-stop", ""));
        }
        match state.session().force_stop() {
            Err(e) if e.kind == ErrorKind::NotRunning => Ok(CmdResult::Ok),
            other => other.map(|()| CmdResult::Ok),
        }
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Send SIGINT to the CLI".into(),
            args: "".into(),
            regexp: false,
        }
    }
}
