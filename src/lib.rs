//! emx-clidrive: an interactive session harness for black-box CLI testing
//!
//! # Overview
//!
//! A test starts the CLI under test as a child process, writes lines to its
//! stdin and waits for conditions on what it prints: an entry that includes
//! or equals some text, a regex match, a stretch of idle output, or the
//! process stopping. Every wait resolves exactly once, either ready or timed
//! out. Output is kept per stream, and each query remembers how far it has
//! already scanned, so repeating a query never matches the same entry twice.
//!
//! Tests are written in Rust against [`Session`], or as scripts in txtar
//! archives run by the [`Engine`]. Either way the [`TestRunner`] runs them
//! one after another and kills whatever a test left running before its
//! result is recorded.
//!
//! # Script Syntax
//!
//! ```text
//! # Section comment
//! name math
//! description adds numbers
//! args -q
//! start -timeout=2s
//! write '1 + 1'
//! stdout-includes 2 -timeout=1s
//! ! stdout-equals 20 -timeout=200ms
//! write quit
//! stopped -code=0
//!
//! -- input.txt --
//! fixture files land in $WORK
//! ```
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `name`, `description`, `args` | Session attributes, before first use |
//! | `start` | Start the CLI |
//! | `write` | Write a line to stdin |
//! | `stdout-includes`, `stderr-includes` | Wait for an entry containing text |
//! | `stdout-equals`, `stderr-equals` | Wait for an entry equal to text |
//! | `stdout-matches`, `stderr-matches` | Wait for an entry matching a regex |
//! | `idle` | Wait for N idle ticks |
//! | `stopped` | Wait for the CLI to exit |
//! | `force-stop` | Send SIGINT |
//! | `sleep`, `log`, `error`, `readline` | Helpers |
//! | `stop`, `skip` | Flow control |
//!
//! # Prefixes
//!
//! - `!` - Command must fail
//! - `?` - Command may succeed or fail

mod buffer;
mod commands;
mod engine;
mod error;
mod log;
mod parser;
mod pump;
mod runner;
mod session;
mod state;
mod ticker;
mod wait;

pub use buffer::{CaptureMode, LineBuffer, Stream};
pub use commands::default_commands;
pub use engine::{expand_args, first_non_flag, Cmd, CmdResult, CmdUsage, Engine};
pub use error::{Error, ErrorKind};
pub use log::{CaptureLogger, Level, LogEntry, Logger, TracingLogger};
pub use parser::{parse_line, ArgFragment, ScriptLine};
pub use pump::ExitInfo;
pub use runner::{
    RunConfig, ScriptFuture, SessionFactory, TestCaseResult, TestResult, TestRunner, TestRunnerBuilder, TestUnit,
};
pub use session::{LifecycleState, Session, SessionAttributes, SessionConfig, SessionHandle};
pub use state::State;
pub use ticker::{IdleTicker, DEFAULT_TICK_INTERVAL};
pub use wait::{Cursors, WaitOptions, WaitOutcome, WaitQuery};

// Convenience functions for cargo test integration
pub use runner::{run, run_and_assert};
