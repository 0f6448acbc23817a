//! Child process event pump
//!
//! A started session owns one pump task. The task owns the `Child`, reads both
//! output pipes, runs the idle interval and reaps the process, reporting all of
//! it as one ordered event stream. The session applies those events itself,
//! so it stays the only writer of its buffers.

use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::buffer::Stream;

const READ_CHUNK_SIZE: usize = 8192;

/// How long readers get to reach EOF once the child has exited
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if it was killed by one (unix)
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }

    /// The exit reported for a process torn down by cleanup
    pub(crate) fn killed() -> Self {
        #[cfg(unix)]
        let signal = Some(libc::SIGKILL);
        #[cfg(not(unix))]
        let signal = None;
        Self { code: None, signal }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum PumpEvent {
    Spawned { pid: Option<u32> },
    Output(Stream, String),
    Tick,
    Exited(ExitInfo),
}

/// Session-side end of a running pump
pub(crate) struct Pump {
    events: mpsc::UnboundedReceiver<PumpEvent>,
    interrupt: mpsc::UnboundedSender<()>,
    abort: AbortHandle,
}

impl Pump {
    /// Spawn `command` and start pumping its events.
    ///
    /// The command must have all three stdio handles piped.
    pub(crate) fn spawn(command: &mut Command, tick_interval: Duration) -> io::Result<(Self, ChildStdin)> {
        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::other("stdin pipe was unexpectedly not available")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::other("stdout pipe was unexpectedly not available")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            io::Error::other("stderr pipe was unexpectedly not available")
        })?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let (interrupt, interrupt_rx) = mpsc::unbounded_channel();

        let mut readers = JoinSet::new();
        readers.spawn(read_stream(stdout, Stream::Stdout, event_tx.clone()));
        readers.spawn(read_stream(stderr, Stream::Stderr, event_tx.clone()));

        let task = tokio::spawn(run(child, readers, event_tx, interrupt_rx, tick_interval));

        Ok((
            Self {
                events,
                interrupt,
                abort: task.abort_handle(),
            },
            stdin,
        ))
    }

    /// Next event; `None` once the pump has finished and every event was taken
    pub(crate) async fn recv(&mut self) -> Option<PumpEvent> {
        self.events.recv().await
    }

    /// Next already-queued event, without waiting
    pub(crate) fn try_recv(&mut self) -> Option<PumpEvent> {
        self.events.try_recv().ok()
    }

    /// Ask the pump to deliver SIGINT. Returns false if the pump is gone.
    pub(crate) fn interrupt(&self) -> bool {
        self.interrupt.send(()).is_ok()
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

async fn run(
    mut child: Child,
    mut readers: JoinSet<()>,
    events: mpsc::UnboundedSender<PumpEvent>,
    mut interrupt: mpsc::UnboundedReceiver<()>,
    tick_interval: Duration,
) {
    if events.send(PumpEvent::Spawned { pid: child.id() }).is_err() {
        return;
    }

    let mut ticks = interval_at(Instant::now() + tick_interval, tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = interrupt.recv() => send_interrupt(&mut child),
            _ = ticks.tick() => {
                if events.send(PumpEvent::Tick).is_err() {
                    // session dropped; dropping the child kills it
                    return;
                }
            }
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            tracing::warn!(error = %e, "failed to wait for child process");
            ExitInfo::default()
        }
    };

    let drained = tokio::time::timeout(EXIT_DRAIN_GRACE, async {
        while readers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::debug!("output pipes still open after exit; dropping readers");
    }

    let _ = events.send(PumpEvent::Exited(exit));
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet (`id()` is
    // `None` after reaping).
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        tracing::warn!(pid, error = %io::Error::last_os_error(), "failed to deliver SIGINT");
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "failed to stop child process");
    }
}

async fn read_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: Stream,
    events: mpsc::UnboundedSender<PumpEvent>,
) {
    let mut tmp = [0u8; READ_CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(%stream, error = %e, "read failed");
                break;
            }
        };
        pending.extend_from_slice(&tmp[..n]);
        let text = take_utf8(&mut pending);
        if text.is_empty() {
            continue;
        }
        if events.send(PumpEvent::Output(stream, text)).is_err() {
            return;
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        let _ = events.send(PumpEvent::Output(stream, text));
    }
}

/// Take the decodable prefix of `pending`, leaving an incomplete trailing
/// UTF-8 sequence in place for the next read.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let text = s.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let rest = pending.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_utf8_holds_back_split_sequence() {
        // "é" is 0xC3 0xA9
        let mut pending = vec![b'c', b'a', b'f', 0xC3];
        assert_eq!(take_utf8(&mut pending), "caf");
        assert_eq!(pending, vec![0xC3]);
        pending.push(0xA9);
        assert_eq!(take_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        assert_eq!(take_utf8(&mut pending), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_exit_info_display() {
        let exit = ExitInfo { code: Some(0), signal: None };
        assert!(exit.success());
        assert_eq!(exit.to_string(), "exit code 0");
        let exit = ExitInfo { code: None, signal: Some(2) };
        assert!(!exit.success());
        assert_eq!(exit.to_string(), "signal 2");
    }
}
