//! Run the txtar scripts in tests/testdata against /bin/sh, plus runner
//! behaviour for Rust-defined test units.
//!
//! Environment variables:
//!   CLIDRIVE_VERBOSE=1  print the log of passing tests too
//!   CLIDRIVE_KEEP=1     preserve working directories
#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use emx_clidrive::{RunConfig, SessionAttributes, TestRunner, TestUnit, WaitOptions};

fn testdata() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/testdata")
}

fn sh_config(dir: PathBuf) -> RunConfig {
    RunConfig {
        dir,
        command: "/bin/sh".into(),
        tick_interval: Duration::from_millis(100),
        verbose: std::env::var("CLIDRIVE_VERBOSE").is_ok(),
        preserve_work: std::env::var("CLIDRIVE_KEEP").is_ok(),
        ..Default::default()
    }
}

#[tokio::test]
async fn testdata_scripts_pass() {
    let runner = TestRunner::new(sh_config(testdata()));
    let result = runner.run_all().await.unwrap();

    for case in &result.cases {
        eprint!("{}", case.report(runner.config().verbose));
    }
    assert_eq!(result.cases.len(), 5);
    assert!(result.all_passed(), "{}", result.summary());
    assert_eq!(result.skipped_count(), 1);

    let repl = result.cases.iter().find(|c| c.name == "repl").unwrap();
    assert!(repl.log.contains("--- latest stdout"), "{}", repl.log);
    assert!(repl.log.contains("+20"));

    let skipped = result.cases.iter().find(|c| c.skipped).unwrap();
    assert_eq!(skipped.name, "skip");
    assert_eq!(skipped.message, "needs a terminal");
}

#[tokio::test]
async fn selected_tests_only() {
    let config = RunConfig {
        tests: vec!["exit".into()],
        ..sh_config(testdata())
    };
    let runner = TestRunner::new(config);
    assert_eq!(runner.count_tests().unwrap(), 1);

    let result = runner.run_all().await.unwrap();
    assert_eq!(result.cases[0].name, "exit");
    assert!(result.cases[0].passed);
    assert!(result.cases[0].log.contains("# Test: exiting\n"));
}

#[tokio::test]
async fn failing_script_reports_location_and_keeps_workdir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("silent.txtar"),
        "start -timeout=5s\nstdout-includes never -timeout=200ms\n",
    )
    .unwrap();

    let runner = TestRunner::new(sh_config(dir.path().to_path_buf()));
    let result = runner.run_all().await.unwrap();
    let case = &result.cases[0];

    assert!(!case.passed);
    assert!(case.message.contains("silent.txtar:2: stdout-includes: timed out waiting for stdout to include 'never'"));
    assert!(case.log.contains("!!! Timed out waiting for stdout to include 'never'"));
    assert!(case.log.contains("# Force quitting CLI on cleanup"));

    let workdir = case.workdir.clone().unwrap();
    assert!(workdir.exists());
    std::fs::remove_dir_all(workdir).unwrap();
}

#[tokio::test]
async fn syntax_errors_fail_the_script() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.txtar"), "start\nwrite 'unterminated\n").unwrap();
    std::fs::write(dir.path().join("unknown.txtar"), "frobnicate\n").unwrap();

    let runner = TestRunner::new(sh_config(dir.path().to_path_buf()));
    let result = runner.run_all().await.unwrap();
    assert_eq!(result.failed_count(), 2);

    let bad = result.cases.iter().find(|c| c.name == "bad").unwrap();
    assert!(bad.message.contains("bad.txtar:2: unterminated quoted argument"));
    let unknown = result.cases.iter().find(|c| c.name == "unknown").unwrap();
    assert!(unknown.message.contains("unknown command: frobnicate"));

    for case in &result.cases {
        if let Some(ref wd) = case.workdir {
            let _ = std::fs::remove_dir_all(wd);
        }
    }
}

fn wrong_sum() -> anyhow::Result<String> {
    anyhow::bail!("expected 2, got 3")
}

fn explode() -> anyhow::Result<String> {
    panic!("boom")
}

#[tokio::test]
async fn units_are_cleaned_up_before_results_are_recorded() {
    let runner = TestRunner::new(sh_config(testdata()));

    let leaves_running = TestUnit::new("leaves-running", std::env::temp_dir(), |factory| async move {
        let attrs = SessionAttributes::new("cat")
            .description("never stopped")
            .args(["-c", "cat"]);
        let mut session = factory.create(attrs);
        session.start(Duration::from_secs(5)).await?;
        session.write("ping").await?;
        session
            .until_stdout_includes("ping", WaitOptions::timeout_ms(5000).with_backtrack())
            .await?
            .into_result("stdout to include 'ping'")?;
        Ok::<_, anyhow::Error>("echoed".to_string())
    });
    let fails = TestUnit::new("fails", std::env::temp_dir(), |_factory| async move { wrong_sum() });
    let panics = TestUnit::new("panics", std::env::temp_dir(), |_factory| async move { explode() });

    let result = runner.run_units(vec![leaves_running, fails, panics]).await;
    let [ok, failed, panicked] = result.cases.as_slice() else {
        panic!("expected three results");
    };

    assert!(ok.passed, "{}", ok.log);
    assert_eq!(ok.message, "echoed");
    assert!(ok.log.contains("# Test: cat\n# Description: never stopped\n"));
    assert!(ok.log.contains("# Force quitting CLI on cleanup"));
    assert!(ok.log.contains("# Test resolved with: echoed"));

    assert!(!failed.passed);
    assert_eq!(failed.message, "expected 2, got 3");
    assert!(failed.log.contains("!!! Test rejected with: expected 2, got 3"));

    assert!(!panicked.passed);
    assert_eq!(panicked.message, "script panicked: boom");
    assert_eq!(result.summary().split(' ').next(), Some("1"));
}
