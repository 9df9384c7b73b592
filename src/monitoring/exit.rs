//! Exit monitoring for bridged processes
//!
//! One monitor runs per spawned child. It blocks on the child's state changes,
//! reports each one to a [`StatusSink`], and stops after the child exits or is
//! killed. Nothing flows back to the spawning call.

use chrono::{DateTime, Local};
use log::{error, info};
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Decoded process state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitEvent {
    /// Exited normally with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
    /// Stopped by a signal
    Stopped(i32),
    /// Resumed after a stop
    Continued,
}

impl ExitEvent {
    /// No further transitions follow a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitEvent::Exited(_) | ExitEvent::Signaled(_))
    }

    #[cfg(unix)]
    pub fn from_wait_status(status: nix::sys::wait::WaitStatus) -> Option<Self> {
        use nix::sys::wait::WaitStatus;

        match status {
            WaitStatus::Exited(_, code) => Some(ExitEvent::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ExitEvent::Signaled(signal as i32)),
            WaitStatus::Stopped(_, signal) => Some(ExitEvent::Stopped(signal as i32)),
            WaitStatus::Continued(_) => Some(ExitEvent::Continued),
            _ => None,
        }
    }
}

impl fmt::Display for ExitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitEvent::Exited(code) => write!(f, "exited, status={}", code),
            ExitEvent::Signaled(signal) => write!(f, "killed by signal {}", signal),
            ExitEvent::Stopped(signal) => write!(f, "stopped by signal {}", signal),
            ExitEvent::Continued => write!(f, "continued"),
        }
    }
}

/// One observed transition, timestamped when it was seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub pid: u32,
    pub event: ExitEvent,
    pub observed_at: DateTime<Local>,
}

impl StatusRecord {
    pub fn now(pid: u32, event: ExitEvent) -> Self {
        Self {
            pid,
            event,
            observed_at: Local::now(),
        }
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} child {} status: {}",
            self.observed_at.format("%Y-%m-%d %H:%M:%S"),
            self.pid,
            self.event
        )
    }
}

/// Destination for monitor output
pub trait StatusSink: Send + Sync {
    fn record(&self, record: &StatusRecord);

    /// The wait primitive failed; the monitor stops after this
    fn wait_failed(&self, pid: u32, err: &io::Error) {
        error!(target: "external_start", "child {}: wait failed: {}", pid, err);
    }
}

/// Writes status lines to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn record(&self, record: &StatusRecord) {
        info!(target: "external_start", "{}", record);
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<StatusRecord>,
    failures: Vec<(u32, String)>,
}

/// Keeps status records in memory and also logs them
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<(Mutex<MemoryState>, Condvar)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every record seen so far
    pub fn records(&self) -> Vec<StatusRecord> {
        self.state().records.clone()
    }

    /// Records for one process
    pub fn records_for(&self, pid: u32) -> Vec<StatusRecord> {
        self.state()
            .records
            .iter()
            .filter(|r| r.pid == pid)
            .cloned()
            .collect()
    }

    /// Wait failures as `(pid, message)`
    pub fn failures(&self) -> Vec<(u32, String)> {
        self.state().failures.clone()
    }

    /// Block until `pred` holds for the records seen so far.
    ///
    /// Returns false if `timeout` elapses first.
    pub fn wait_until<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[StatusRecord]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if pred(&state.records) {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            state = cvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }

    /// Block until `pid` has a terminal record or `timeout` elapses
    pub fn wait_terminal(&self, pid: u32, timeout: Duration) -> Option<StatusRecord> {
        let terminal = |r: &StatusRecord| r.pid == pid && r.event.is_terminal();
        if !self.wait_until(timeout, |records| records.iter().any(terminal)) {
            return None;
        }
        self.state().records.iter().find(|r| terminal(*r)).cloned()
    }
}

impl StatusSink for MemorySink {
    fn record(&self, record: &StatusRecord) {
        LogSink.record(record);
        self.state().records.push(record.clone());
        self.inner.1.notify_all();
    }

    fn wait_failed(&self, pid: u32, err: &io::Error) {
        error!(target: "external_start", "child {}: wait failed: {}", pid, err);
        self.state().failures.push((pid, err.to_string()));
        self.inner.1.notify_all();
    }
}

/// Follow a child until it exits or is killed.
///
/// Stops and reports through the sink on the first wait failure.
#[cfg(unix)]
pub fn watch_pid(pid: nix::unistd::Pid, sink: &dyn StatusSink) {
    use nix::sys::wait::{waitpid, WaitPidFlag};

    let raw_pid = pid.as_raw() as u32;
    loop {
        let status = match waitpid(pid, Some(WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED)) {
            Ok(status) => status,
            Err(errno) => {
                sink.wait_failed(raw_pid, &io::Error::from(errno));
                return;
            }
        };

        let Some(event) = ExitEvent::from_wait_status(status) else {
            continue;
        };
        sink.record(&StatusRecord::now(raw_pid, event));
        if event.is_terminal() {
            return;
        }
    }
}
