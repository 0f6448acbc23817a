//! Test runner
//!
//! Runs test units one after another. A unit is a script that receives a
//! [`SessionFactory`]; every session it creates is torn down once the script
//! settles, before the unit's result is recorded, so no child process
//! outlives its test.
//!
//! Units come either from Rust code ([`TestUnit::new`]) or from txtar
//! archives discovered in a directory, whose comment section is run by the
//! script [`Engine`].

use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tracing::Instrument;

use crate::buffer::CaptureMode;
use crate::engine::Engine;
use crate::error::{Error, ErrorKind};
use crate::log::{CaptureLogger, Logger};
use crate::session::{Session, SessionAttributes, SessionConfig, SessionHandle};
use crate::state::State;
use crate::ticker::DEFAULT_TICK_INTERVAL;

/// What a test script returns: a pass message, or the reason it failed
pub type ScriptFuture = LocalBoxFuture<'static, anyhow::Result<String>>;

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory containing test archives
    pub dir: PathBuf,
    /// The CLI under test
    pub command: String,
    /// Only run these tests (by name); empty runs everything discovered
    pub tests: Vec<String>,
    /// Root directory for temp working directories
    pub workdir_root: Option<PathBuf>,
    /// Preserve working directories after test (for debugging)
    pub preserve_work: bool,
    /// Verbose mode: print the test log of passing tests too
    pub verbose: bool,
    /// File extensions to scan (default: [".txtar"])
    pub extensions: Vec<String>,
    /// Length of one idle tick
    pub tick_interval: Duration,
    /// How CLI output is split into entries
    pub capture: CaptureMode,
    /// Appended to every line written to the CLI
    pub line_ending: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tests"),
            command: String::new(),
            tests: Vec::new(),
            workdir_root: None,
            preserve_work: false,
            verbose: false,
            extensions: vec![".txtar".into()],
            tick_interval: DEFAULT_TICK_INTERVAL,
            capture: CaptureMode::default(),
            line_ending: "\n".into(),
        }
    }
}

/// Result of running all tests
#[derive(Debug)]
pub struct TestResult {
    /// Individual results, in the order the tests ran
    pub cases: Vec<TestCaseResult>,
    /// Total duration
    pub duration: Duration,
}

impl TestResult {
    /// Check if all tests passed
    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(|c| c.passed || c.skipped)
    }

    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed && !c.skipped).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed && !c.skipped).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.cases.iter().filter(|c| c.skipped).count()
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} skipped ({}ms)",
            self.passed_count(),
            self.failed_count(),
            self.skipped_count(),
            self.duration.as_millis(),
        )
    }
}

/// Result of a single test
#[derive(Debug)]
pub struct TestCaseResult {
    pub name: String,
    /// Source archive, for discovered tests
    pub file: Option<PathBuf>,
    pub passed: bool,
    pub skipped: bool,
    /// The script's pass message, or why it failed / was skipped
    pub message: String,
    /// Test log
    pub log: String,
    pub duration: Duration,
    /// Working directory (if preserved)
    pub workdir: Option<PathBuf>,
}

impl TestCaseResult {
    fn failed(name: String, file: Option<PathBuf>, message: String, started: Instant) -> Self {
        Self {
            name,
            file,
            passed: false,
            skipped: false,
            message,
            log: String::new(),
            duration: started.elapsed(),
            workdir: None,
        }
    }

    /// Human readable report block for this case
    pub fn report(&self, verbose: bool) -> String {
        let mut out = String::new();
        if self.skipped {
            out.push_str(&format!("SKIP  {} - {}\n", self.name, self.message));
            return out;
        }
        let show_log = if self.passed {
            out.push_str(&format!("PASS  {} ({}ms)\n", self.name, self.duration.as_millis()));
            verbose
        } else {
            out.push_str(&format!("FAIL  {}\n", self.name));
            for line in self.message.lines() {
                out.push_str(&format!("      {}\n", line));
            }
            true
        };
        if show_log && !self.log.is_empty() {
            out.push_str("      --- log ---\n");
            for line in self.log.lines() {
                out.push_str(&format!("      {}\n", line));
            }
        }
        if let Some(ref wd) = self.workdir {
            out.push_str(&format!("      workdir: {}\n", wd.display()));
        }
        out
    }
}

/// One test: a name, a working directory and a script
pub struct TestUnit {
    pub name: String,
    pub working_dir: PathBuf,
    file: Option<PathBuf>,
    workdir_guard: Option<tempfile::TempDir>,
    script: Box<dyn FnOnce(SessionFactory) -> ScriptFuture>,
}

impl TestUnit {
    pub fn new<F, Fut>(name: impl Into<String>, working_dir: impl Into<PathBuf>, script: F) -> Self
    where
        F: FnOnce(SessionFactory) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<String>> + 'static,
    {
        Self {
            name: name.into(),
            working_dir: working_dir.into(),
            file: None,
            workdir_guard: None,
            script: Box::new(move |factory| script(factory).boxed_local()),
        }
    }

    fn with_file(mut self, file: &Path) -> Self {
        self.file = Some(file.to_path_buf());
        self
    }

    fn with_workdir(mut self, dir: tempfile::TempDir) -> Self {
        self.workdir_guard = Some(dir);
        self
    }
}

/// Hands sessions to a test script and remembers them for cleanup
#[derive(Clone)]
pub struct SessionFactory {
    config: SessionConfig,
    logger: CaptureLogger,
    handles: Rc<RefCell<Vec<SessionHandle>>>,
}

impl SessionFactory {
    pub fn new(config: SessionConfig, logger: CaptureLogger) -> Self {
        Self {
            config,
            logger,
            handles: Rc::default(),
        }
    }

    /// Create a session for the CLI under test
    pub fn create(&self, attrs: SessionAttributes) -> Session {
        self.logger.log(&format!("Test: {}", attrs.name));
        if !attrs.description.is_empty() {
            self.logger.log(&format!("Description: {}", attrs.description));
        }
        let session = Session::new(self.config.clone(), attrs, Rc::new(self.logger.clone()));
        self.handles.borrow_mut().push(session.handle());
        session
    }

    /// The CLI under test
    pub fn command(&self) -> &str {
        &self.config.command
    }

    /// Working directory of the test
    pub fn dir(&self) -> &Path {
        &self.config.working_dir
    }

    pub fn logger(&self) -> &CaptureLogger {
        &self.logger
    }

    /// Tear down every session created so far
    pub fn cleanup(&self) {
        let handles: Vec<SessionHandle> = self.handles.borrow_mut().drain(..).collect();
        for handle in handles {
            if handle.cleanup() {
                self.logger.log("Force quitting CLI on cleanup");
            }
        }
    }
}

/// The test runner
pub struct TestRunner {
    engine: Rc<Engine>,
    config: RunConfig,
}

impl TestRunner {
    /// Create a new runner with the given config
    pub fn new(config: RunConfig) -> Self {
        Self {
            engine: Rc::new(Engine::new()),
            config,
        }
    }

    /// Create a new runner with a custom engine
    pub fn with_engine(engine: Engine, config: RunConfig) -> Self {
        Self {
            engine: Rc::new(engine),
            config,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Discover test archives in the configured directory
    pub fn discover(&self) -> Result<Vec<PathBuf>, Error> {
        let dir = &self.config.dir;
        if !dir.exists() {
            return Err(Error::new(
                ErrorKind::Io,
                format!("test directory not found: {}", dir.display()),
            ));
        }

        let mut files = Vec::new();
        if dir.is_file() {
            files.push(dir.clone());
        } else {
            self.scan_dir(dir, &mut files)?;
        }
        files.retain(|f| self.is_selected(f));
        files.sort();

        for wanted in &self.config.tests {
            if !files.iter().any(|f| test_name(f) == *wanted) {
                tracing::warn!(test = %wanted, "requested test not found");
            }
        }
        Ok(files)
    }

    fn scan_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), Error> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.scan_dir(&path, files)?;
            } else if self.is_test_file(&path) {
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_test_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.config.extensions.iter().any(|ext| name.ends_with(ext.as_str())))
    }

    fn is_selected(&self, path: &Path) -> bool {
        self.config.tests.is_empty() || self.config.tests.iter().any(|t| *t == test_name(path))
    }

    /// Count the number of tests that would be run
    pub fn count_tests(&self) -> Result<usize, Error> {
        Ok(self.discover()?.len())
    }

    /// Discover and run every test archive
    pub async fn run_all(&self) -> Result<TestResult, Error> {
        let start = Instant::now();
        let files = self.discover()?;

        let mut cases = Vec::with_capacity(files.len());
        for file in &files {
            let case_start = Instant::now();
            let case = match self.load(file) {
                Ok(unit) => self.run_unit(unit).await,
                Err(message) => TestCaseResult::failed(test_name(file), Some(file.clone()), message, case_start),
            };
            cases.push(case);
        }

        Ok(TestResult {
            cases,
            duration: start.elapsed(),
        })
    }

    /// Run the given units in order
    pub async fn run_units(&self, units: Vec<TestUnit>) -> TestResult {
        let start = Instant::now();
        let mut cases = Vec::with_capacity(units.len());
        for unit in units {
            cases.push(self.run_unit(unit).await);
        }
        TestResult {
            cases,
            duration: start.elapsed(),
        }
    }

    /// Run one unit: call its script, wait for it to settle, clean up its
    /// sessions, then record the outcome. Panics count as failures.
    pub async fn run_unit(&self, unit: TestUnit) -> TestCaseResult {
        let start = Instant::now();
        let TestUnit {
            name,
            working_dir,
            file,
            workdir_guard,
            script,
        } = unit;

        let logger = CaptureLogger::new();
        let factory = SessionFactory::new(self.session_config(&working_dir), logger.clone());
        let sessions = factory.clone();

        let span = tracing::info_span!("test", name = %name);
        let settled = AssertUnwindSafe(async move { script(factory).await })
            .catch_unwind()
            .instrument(span)
            .await;

        sessions.cleanup();

        let (passed, skipped, message) = match settled {
            Ok(Ok(message)) => (true, false, message),
            Ok(Err(e)) => match e.downcast_ref::<Error>() {
                Some(err) if err.is_skip() => (true, true, err.message.clone()),
                _ => (false, false, format!("{:#}", e)),
            },
            Err(panic) => (false, false, format!("script panicked: {}", panic_message(panic.as_ref()))),
        };
        if skipped {
            logger.log(&format!("Test skipped: {}", message));
        } else if passed {
            logger.log(&format!("Test resolved with: {}", message));
        } else {
            logger.error(&format!("Test rejected with: {}", message));
        }

        let workdir = match workdir_guard {
            Some(dir) if self.config.preserve_work || !passed => {
                let path = dir.path().to_path_buf();
                std::mem::forget(dir); // leak to preserve
                Some(path)
            }
            _ => None,
        };

        TestCaseResult {
            name,
            file,
            passed,
            skipped,
            message,
            log: logger.render(),
            duration: start.elapsed(),
            workdir,
        }
    }

    fn session_config(&self, working_dir: &Path) -> SessionConfig {
        SessionConfig::new(self.config.command.clone(), working_dir)
            .tick_interval(self.config.tick_interval)
            .capture(self.config.capture)
            .line_ending(self.config.line_ending.clone())
    }

    /// Parse an archive, seed a fresh working directory with its files and
    /// wrap its script as a unit.
    fn load(&self, file: &Path) -> Result<TestUnit, String> {
        let name = test_name(file);
        let data = std::fs::read_to_string(file).map_err(|e| format!("failed to read file: {}", e))?;
        let archive = emx_txtar::Decoder::new()
            .decode(&data)
            .map_err(|e| format!("failed to parse txtar: {}", e))?;
        let tmpdir = self
            .create_workdir(&name)
            .map_err(|e| format!("failed to create workdir: {}", e))?;
        extract_files(tmpdir.path(), &archive).map_err(|e| format!("failed to extract files: {}", e))?;

        let engine = Rc::clone(&self.engine);
        let script = archive.comment.clone();
        let filename = file.display().to_string();
        let workdir = tmpdir.path().to_path_buf();

        let session_name = name.clone();
        let unit = TestUnit::new(name, workdir.clone(), move |factory| async move {
            let mut state = State::new(factory, session_name, workdir);
            let message = engine.execute(&mut state, &script, &filename).await?;
            Ok::<_, anyhow::Error>(message)
        });
        Ok(unit.with_file(file).with_workdir(tmpdir))
    }

    fn create_workdir(&self, name: &str) -> Result<tempfile::TempDir, std::io::Error> {
        let prefix = format!("clidrive-{}-", name);
        if let Some(ref root) = self.config.workdir_root {
            std::fs::create_dir_all(root)?;
            tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
        } else {
            tempfile::Builder::new().prefix(&prefix).tempdir()
        }
    }
}

fn test_name(file: &Path) -> String {
    file.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Write the archive's files into `workdir`. Names may not leave it.
fn extract_files(workdir: &Path, archive: &emx_txtar::Archive) -> Result<(), std::io::Error> {
    for file in &archive.files {
        let relative = Path::new(&file.name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("archive file '{}' escapes the working directory", file.name),
            ));
        }
        let path = workdir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &file.data)?;
    }
    Ok(())
}

/// Builder API for convenient test runner construction
pub struct TestRunnerBuilder {
    config: RunConfig,
    engine: Option<Engine>,
}

impl TestRunnerBuilder {
    /// Start building a runner for the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            config: RunConfig {
                dir: dir.into(),
                ..Default::default()
            },
            engine: None,
        }
    }

    /// The CLI under test
    pub fn cli(mut self, command: impl Into<String>) -> Self {
        self.config.command = command.into();
        self
    }

    /// Only run the named tests
    pub fn tests<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.tests = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory root
    pub fn workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workdir_root = Some(root.into());
        self
    }

    /// Preserve working directories after tests
    pub fn preserve_work(mut self, preserve: bool) -> Self {
        self.config.preserve_work = preserve;
        self
    }

    /// Enable verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn capture(mut self, mode: CaptureMode) -> Self {
        self.config.capture = mode;
        self
    }

    /// Use a custom engine
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build and return the runner
    pub fn build(self) -> TestRunner {
        match self.engine {
            Some(engine) => TestRunner::with_engine(engine, self.config),
            None => TestRunner::new(self.config),
        }
    }

    /// Build and run all tests
    pub async fn run(self) -> Result<TestResult, Error> {
        self.build().run_all().await
    }
}

/// Convenience function: create a runner builder for a directory
pub fn run(dir: impl Into<PathBuf>) -> TestRunnerBuilder {
    TestRunnerBuilder::new(dir)
}

/// Run test archives against `cli` and integrate with `#[test]` by panicking
/// on failure.
///
/// Usage in cargo tests:
/// ```rust,ignore
/// #[test]
/// fn cli_scripts() {
///     emx_clidrive::run_and_assert("tests/testdata", env!("CARGO_BIN_EXE_mycli"));
/// }
/// ```
pub fn run_and_assert(dir: impl Into<PathBuf>, cli: impl Into<String>) {
    let config = RunConfig {
        dir: dir.into(),
        command: cli.into(),
        verbose: std::env::var("CLIDRIVE_VERBOSE").is_ok(),
        preserve_work: std::env::var("CLIDRIVE_KEEP").is_ok(),
        ..Default::default()
    };
    let verbose = config.verbose;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let result = runtime
        .block_on(TestRunner::new(config).run_all())
        .expect("failed to run tests");

    for case in &result.cases {
        eprint!("{}", case.report(verbose));
    }
    eprintln!("\n{}", result.summary());

    if !result.all_passed() {
        panic!("{} test(s) failed", result.failed_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let case = |name: &str, passed: bool, skipped: bool| TestCaseResult {
            name: name.into(),
            file: None,
            passed,
            skipped,
            message: String::new(),
            log: String::new(),
            duration: Duration::ZERO,
            workdir: None,
        };
        let result = TestResult {
            cases: vec![case("a", true, false), case("b", false, false), case("c", true, true)],
            duration: Duration::from_millis(12),
        };
        assert!(!result.all_passed());
        assert_eq!(result.summary(), "1 passed, 1 failed, 1 skipped (12ms)");
    }

    #[test]
    fn test_report_failure_shows_log() {
        let case = TestCaseResult {
            name: "math".into(),
            file: None,
            passed: false,
            skipped: false,
            message: "timed out waiting for stdout to include '20'".into(),
            log: "# Starting: python3 in /tmp\n".into(),
            duration: Duration::ZERO,
            workdir: None,
        };
        let report = case.report(false);
        assert!(report.starts_with("FAIL  math\n"));
        assert!(report.contains("      timed out waiting for stdout to include '20'\n"));
        assert!(report.contains("# Starting: python3 in /tmp"));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
