//! Session and wait engine tests, driving /bin/sh as the CLI under test.
#![cfg(unix)]

use std::rc::Rc;
use std::time::Duration;

use emx_clidrive::{
    CaptureLogger, CaptureMode, ErrorKind, LifecycleState, Session, SessionAttributes, SessionConfig, WaitOptions,
    WaitOutcome,
};
use pretty_assertions::assert_eq;

const STARTUP: Duration = Duration::from_secs(5);

fn sh(script: &str, capture: CaptureMode) -> (Session, CaptureLogger) {
    let log = CaptureLogger::new();
    let config = SessionConfig::new("/bin/sh", std::env::temp_dir())
        .tick_interval(Duration::from_millis(100))
        .capture(capture);
    let attrs = SessionAttributes::new("sh")
        .description("shell under test")
        .args(["-c", script]);
    (Session::new(config, attrs, Rc::new(log.clone())), log)
}

fn wait(ms: u64) -> WaitOptions {
    WaitOptions::timeout_ms(ms)
}

#[tokio::test]
async fn operations_before_start_report_not_started() {
    let (mut session, log) = sh("read x", CaptureMode::Chunks);

    let err = session.write("hello").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);

    let err = session.until_stdout_includes("x", wait(100)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);

    let err = session.until_output_idle_seconds(1, Duration::ZERO).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);

    let err = session.until_stopped(Duration::ZERO).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);

    let err = session.force_stop().unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotRunning);
    assert!(log.render().contains("!!! CLI not running, nothing to force stop"));
    assert_eq!(session.state(), LifecycleState::NotStarted);
}

#[tokio::test]
async fn start_then_start_again_is_rejected() {
    let (mut session, _log) = sh("read x", CaptureMode::Chunks);
    session.start(STARTUP).await.unwrap();
    assert_eq!(session.state(), LifecycleState::Running);

    let err = session.start(STARTUP).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyStarted);
    session.cleanup();
}

#[tokio::test]
async fn spawn_failure_leaves_session_not_started() {
    let log = CaptureLogger::new();
    let config = SessionConfig::new("/nonexistent/clidrive-cli", std::env::temp_dir());
    let mut session = Session::new(config, SessionAttributes::new("missing"), Rc::new(log.clone()));

    let err = session.start(STARTUP).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Spawn);
    assert_eq!(session.state(), LifecycleState::NotStarted);
}

#[tokio::test]
async fn echoes_written_lines() {
    let (mut session, log) = sh(r#"while read line; do echo "got $line"; done"#, CaptureMode::Chunks);
    session.start(STARTUP).await.unwrap();

    session.write("hello").await.unwrap();
    let outcome = session
        .until_stdout_includes("got hello", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert!(outcome.is_ready());
    assert!(session.get_stdout().iter().any(|chunk| chunk.contains("got hello")));

    let rendered = log.render();
    assert!(rendered.contains("# Starting: /bin/sh in"));
    assert!(rendered.contains("# Will timeout in 5000 ms"));
    session.cleanup();
}

#[tokio::test]
async fn stderr_is_kept_apart_from_stdout() {
    let (mut session, _log) = sh("echo oops >&2; read x", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();

    let outcome = session
        .until_stderr_equals("oops", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Ready(0));
    assert!(session.get_stdout().is_empty());
    session.cleanup();
}

#[tokio::test]
async fn equals_does_not_match_a_longer_line() {
    let (mut session, _log) = sh("echo 120; read x; echo 20; read y", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();
    session
        .until_stdout_equals("120", wait(5000).with_backtrack())
        .await
        .unwrap()
        .into_result("120")
        .unwrap();

    let outcome = session
        .until_stdout_equals("20", wait(300).with_backtrack())
        .await
        .unwrap();
    assert!(outcome.is_timed_out());

    session.write("go").await.unwrap();
    let outcome = session
        .until_stdout_equals("20", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Ready(1));
    session.cleanup();
}

#[tokio::test]
async fn backtrack_never_rematches_a_line() {
    let (mut session, _log) = sh(r"printf 'ready\nbusy\nready\n'; read x", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();

    let first = session
        .until_stdout_includes("ready", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(first, WaitOutcome::Ready(0));

    let second = session
        .until_stdout_includes("ready", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(second, WaitOutcome::Ready(2));

    let third = session
        .until_stdout_includes("ready", wait(300).with_backtrack())
        .await
        .unwrap();
    assert!(third.is_timed_out());
    session.cleanup();
}

#[tokio::test]
async fn second_wait_sees_line_arriving_later() {
    let (mut session, _log) = sh("echo ready; read a; echo busy; echo ready; read b", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();

    let first = session
        .until_stdout_includes("ready", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(first, WaitOutcome::Ready(0));

    session.write("next").await.unwrap();
    let second = session
        .until_stdout_includes("ready", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(second, WaitOutcome::Ready(2));
    assert_eq!(session.get_stdout(), vec!["ready", "busy", "ready"]);
    session.cleanup();
}

#[tokio::test]
async fn fresh_wait_ignores_output_already_buffered() {
    let (mut session, _log) = sh("echo ready; read x", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = session.until_stdout_includes("ready", wait(300)).await.unwrap();
    assert!(outcome.is_timed_out());
    assert_eq!(session.get_stdout(), vec!["ready"]);

    // Behind this id's cursor now; another id can still backtrack to it
    let again = session
        .until_stdout_includes("ready", wait(300).with_backtrack())
        .await
        .unwrap();
    assert!(again.is_timed_out());
    let other = session
        .until_stdout_passes("fresh", "be 'ready'", wait(300).with_backtrack(), |line| line == "ready")
        .await
        .unwrap();
    assert_eq!(other, WaitOutcome::Ready(0));
    session.cleanup();
}

#[tokio::test]
async fn repeated_wait_without_backtrack_follows_new_output() {
    let (mut session, _log) = sh(
        "sleep 0.3; echo ready; sleep 0.3; echo busy; echo ready; read x",
        CaptureMode::Lines,
    );
    session.start(STARTUP).await.unwrap();

    let first = session.until_stdout_includes("ready", wait(5000)).await.unwrap();
    assert_eq!(first, WaitOutcome::Ready(0));

    let second = session.until_stdout_includes("ready", wait(5000)).await.unwrap();
    assert_eq!(second, WaitOutcome::Ready(2));
    assert_eq!(session.get_stdout(), vec!["ready", "busy", "ready"]);
    session.cleanup();
}

#[tokio::test]
async fn custom_predicate_uses_its_own_cursor() {
    let (mut session, _log) = sh("echo v1; echo v2; read x", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();

    let opts = wait(5000).with_backtrack();
    let version = |line: &str| line.starts_with('v');
    let a = session
        .until_stdout_passes("version", "start with 'v'", opts, version)
        .await
        .unwrap();
    let b = session
        .until_stdout_passes("version", "start with 'v'", opts, version)
        .await
        .unwrap();
    let other = session
        .until_stdout_passes("other", "start with 'v'", opts, version)
        .await
        .unwrap();
    assert_eq!((a, b, other), (WaitOutcome::Ready(0), WaitOutcome::Ready(1), WaitOutcome::Ready(0)));
    session.cleanup();
}

#[tokio::test]
async fn idle_wait_counts_silent_ticks() {
    let (mut session, log) = sh("echo hi; read x", CaptureMode::Chunks);
    session.start(STARTUP).await.unwrap();
    session
        .until_stdout_includes("hi", wait(5000).with_backtrack())
        .await
        .unwrap()
        .into_result("hi")
        .unwrap();

    let outcome = session
        .until_output_idle_seconds(3, Duration::from_secs(5))
        .await
        .unwrap();
    let idle = outcome.ready().unwrap();
    assert!(idle >= 3);
    assert!(session.idle_seconds() >= 3);

    let again = session.until_output_idle_seconds(2, Duration::ZERO).await.unwrap();
    assert!(again.is_ready());
    assert!(log.render().contains("Output has already been idle for 2 seconds."));
    session.cleanup();
}

#[tokio::test]
async fn idle_wait_times_out_while_output_keeps_coming() {
    let (mut session, _log) = sh("while true; do echo tick; sleep 0.05; done", CaptureMode::Chunks);
    session.start(STARTUP).await.unwrap();

    let outcome = session
        .until_output_idle_seconds(2, Duration::from_millis(600))
        .await
        .unwrap();
    assert!(outcome.is_timed_out());
    session.cleanup();
}

#[tokio::test]
async fn until_stopped_reports_exit_code() {
    let (mut session, _log) = sh("echo bye; exit 3", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();

    let exit = session
        .until_stopped(Duration::from_secs(5))
        .await
        .unwrap()
        .ready()
        .unwrap();
    assert_eq!(exit.code, Some(3));
    assert!(matches!(session.state(), LifecycleState::Stopped(_)));
    assert_eq!(session.get_stdout(), vec!["bye"]);

    // Already stopped: resolves immediately
    let again = session.until_stopped(Duration::from_millis(10)).await.unwrap();
    assert_eq!(again, WaitOutcome::Ready(exit));

    let err = session.write("late").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotRunning);
}

#[tokio::test]
async fn wait_after_exit_ends_instead_of_hanging() {
    let (mut session, _log) = sh("echo done", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();

    let outcome = session
        .until_stdout_includes("never printed", WaitOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Ended);

    let err = outcome.into_result("stdout to include 'never printed'").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProcessEnded);
}

#[tokio::test]
async fn force_stop_interrupts_the_cli() {
    let (mut session, log) = sh("read x", CaptureMode::Chunks);
    session.start(STARTUP).await.unwrap();

    session.force_stop().unwrap();
    let exit = session
        .until_stopped(Duration::from_secs(5))
        .await
        .unwrap()
        .ready()
        .unwrap();
    assert!(!exit.success());
    assert!(log.render().contains("# Passing SIGINT to process"));

    let err = session.force_stop().unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotRunning);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let (mut session, log) = sh("read x", CaptureMode::Chunks);
    let handle = session.handle();
    session.start(STARTUP).await.unwrap();

    session.cleanup();
    assert!(matches!(session.state(), LifecycleState::Stopped(_)));
    session.cleanup();
    assert!(!handle.cleanup());

    let quits = log
        .entries()
        .iter()
        .filter(|e| e.message == "Force quitting CLI on cleanup")
        .count();
    assert_eq!(quits, 1);
}

#[tokio::test]
async fn restart_after_stop_keeps_buffers() {
    let (mut session, _log) = sh("echo run", CaptureMode::Lines);
    session.start(STARTUP).await.unwrap();
    let _ = session.until_stopped(Duration::from_secs(5)).await.unwrap();

    session.start(STARTUP).await.unwrap();
    let _ = session.until_stopped(Duration::from_secs(5)).await.unwrap();
    assert_eq!(session.get_stdout(), vec!["run", "run"]);
}

#[tokio::test]
async fn log_and_error_are_tagged_with_the_session_name() {
    let (session, log) = sh("true", CaptureMode::Chunks);
    session.log("checking");
    session.error("went wrong");
    let rendered = log.render();
    assert!(rendered.contains("# (sh) checking\n"));
    assert!(rendered.contains("!!! (sh) went wrong\n"));
}

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn python_repl_round_trip() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let log = CaptureLogger::new();
    let config = SessionConfig::new("python3", std::env::temp_dir()).tick_interval(Duration::from_millis(100));
    let attrs = SessionAttributes::new("python").description("interactive python").args(["-i", "-q"]);
    let mut session = Session::new(config, attrs, Rc::new(log.clone()));
    session.start(STARTUP).await.unwrap();

    let prompt = session
        .until_stderr_includes(">>>", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert!(prompt.is_ready());

    session.write("10+10").await.unwrap();
    let sum = session
        .until_stdout_includes("20", wait(5000).with_backtrack())
        .await
        .unwrap();
    assert_eq!(sum, WaitOutcome::Ready(0));

    session.write("exit()").await.unwrap();
    let exit = session
        .until_stopped(Duration::from_secs(1))
        .await
        .unwrap()
        .ready()
        .unwrap();
    assert_eq!(exit.code, Some(0));
    assert!(matches!(session.state(), LifecycleState::Stopped(_)));
}
