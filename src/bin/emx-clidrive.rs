//! emx-clidrive CLI
//!
//! Run interactive CLI test scripts from txtar files against a CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use emx_clidrive::{CaptureMode, Engine, RunConfig, TestRunner, DEFAULT_TICK_INTERVAL};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emx-clidrive")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Drive an interactive CLI through txtar test scripts")]
struct Cli {
    /// Directory (or single file) of test scripts
    #[arg(short = 'f', long = "folder", default_value = "./tests")]
    folder: PathBuf,

    /// The CLI under test
    #[arg(short = 'c', long = "cli")]
    cli: Option<String>,

    /// Only run these tests (by file stem); repeat or separate with commas
    #[arg(short = 't', long = "tests", value_delimiter = ',')]
    tests: Vec<String>,

    /// Keep working directories after test (for debugging)
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// Root directory for working directories
    #[arg(long = "workdir")]
    workdir: Option<PathBuf>,

    /// Idle tick length in milliseconds
    #[arg(long = "tick", default_value_t = DEFAULT_TICK_INTERVAL.as_millis() as u64)]
    tick: u64,

    /// Capture output line by line instead of read by read
    #[arg(long = "lines")]
    lines: bool,

    /// File extensions to match [default: .txtar]
    #[arg(long = "ext", default_value = ".txtar")]
    extensions: Vec<String>,

    /// Verbose output: show the log of passing tests too
    #[arg(short, long)]
    verbose: bool,

    /// List available commands
    #[arg(long = "list-commands")]
    list_commands: bool,

    /// Show number of tests without running
    #[arg(long = "count")]
    count: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG=emx_clidrive=debug shows raw output chunks as they arrive
    let default_filter = if cli.verbose { "emx_clidrive=info" } else { "off" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.list_commands {
        print_commands();
        return ExitCode::SUCCESS;
    }

    let config = RunConfig {
        dir: cli.folder,
        command: cli.cli.unwrap_or_default(),
        tests: cli.tests,
        workdir_root: cli.workdir,
        preserve_work: cli.keep,
        verbose: cli.verbose,
        extensions: cli.extensions,
        tick_interval: Duration::from_millis(cli.tick.max(1)),
        capture: if cli.lines { CaptureMode::Lines } else { CaptureMode::Chunks },
        ..Default::default()
    };
    let runner = TestRunner::new(config);

    if cli.count {
        return match runner.count_tests() {
            Ok(count) => {
                println!("Found {} test(s)", count);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if runner.config().command.is_empty() {
        eprintln!("error: no CLI to test; pass --cli <program>");
        return ExitCode::FAILURE;
    }

    let result = match runner.run_all().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for case in &result.cases {
        print!("{}", case.report(cli.verbose));
    }
    println!();
    println!("{}", result.summary());

    if result.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_commands() {
    println!("Built-in commands:");
    println!();
    for (name, args, summary) in Engine::new().command_help() {
        println!("  {:<16} {} {}", name, summary, args);
    }
    println!();
    println!("Prefixes:");
    println!("  !                Command must fail");
    println!("  ?                Command may fail or succeed");
}
