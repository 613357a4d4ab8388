//! Coprocess supervision.
//!
//! A [`Coprocess`] owns a child process and four helper threads:
//!
//! - a writer feeding stdin from a single-slot channel,
//! - a reader turning stdout into lines,
//! - a forwarder logging every stderr line,
//! - a watchdog that kills the process when a row makes no progress for a
//!   whole sampling period, or when the pipeline is cancelled.
//!
//! Lifecycle: `Created -> Initializing -> Running -> Terminating ->
//! Terminated`. Termination closes stdin, sends SIGTERM when graceful, and
//! SIGKILL once the grace period is over.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::CmdError;

use super::proto::LineTransport;

/// How long an exit status is awaited after stdout closed.
const EXIT_PROBE: Duration = Duration::from_millis(500);
pub(crate) const POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Initializing,
    Running,
    Terminating,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Created => "created",
            ProcessState::Initializing => "initializing",
            ProcessState::Running => "running",
            ProcessState::Terminating => "terminating",
            ProcessState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// What to run and how to supervise it.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub executable: String,
    pub args: Vec<String>,
    /// Watchdog sampling period.
    pub row_timeout: Duration,
    pub termination_grace: Duration,
    pub expected_exit_code: i32,
    /// Log labels.
    pub table: String,
    pub transformer: String,
}

impl ProcessConfig {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            row_timeout: Duration::from_secs(2),
            termination_grace: Duration::from_secs(2),
            expected_exit_code: 0,
            table: String::new(),
            transformer: String::new(),
        }
    }
}

/// State shared with the helper threads.
struct Shared {
    pid: u32,
    child: Mutex<Child>,
    state: Mutex<ProcessState>,
    exit: Mutex<Option<ExitStatus>>,
    stdin: Mutex<Option<Sender<Vec<u8>>>>,
    progress: AtomicU64,
    in_flight: AtomicBool,
    stalled: AtomicBool,
    terminated: CancelToken,
    grace: Duration,
}

impl Shared {
    fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Polls for an exit status until `timeout` runs out.
    fn wait_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = *self.exit.lock() {
                return Some(status);
            }
            match self.child.lock().try_wait() {
                Ok(Some(status)) => {
                    *self.exit.lock() = Some(status);
                    return Some(status);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "cannot poll process status");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL);
        }
    }

    /// Runs the termination sequence once. Concurrent callers wait until
    /// the first one is done.
    fn terminate(&self, graceful: bool) {
        {
            let mut state = self.state.lock();
            let current = *state;
            match current {
                ProcessState::Terminated => return,
                ProcessState::Terminating => {
                    drop(state);
                    let _ = self.terminated.signal().recv();
                    return;
                }
                _ => *state = ProcessState::Terminating,
            }
        }
        self.stdin.lock().take();

        let mut status = self.wait_exit(Duration::ZERO);
        if status.is_none() && graceful {
            signal_term(self.pid);
            status = self.wait_exit(self.grace);
        }
        if status.is_none() {
            let mut child = self.child.lock();
            if let Err(err) = child.kill() {
                debug!(pid = self.pid, error = %err, "kill failed");
            }
            match child.wait() {
                Ok(s) => status = Some(s),
                Err(err) => warn!(pid = self.pid, error = %err, "cannot reap process"),
            }
            if let Some(s) = status {
                *self.exit.lock() = Some(s);
            }
        }
        info!(pid = self.pid, status = ?status, graceful, "process terminated");
        self.set_state(ProcessState::Terminated);
        self.terminated.cancel();
    }
}

#[cfg(unix)]
fn signal_term(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn signal_term(_pid: u32) {}

pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Logs each stderr line of a child process.
pub(crate) fn forward_stderr<R: Read + Send + 'static>(
    stderr: R,
    table: String,
    transformer: String,
    pid: u32,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    warn!(
                        table = %table,
                        transformer = %transformer,
                        pid,
                        line = %line.trim_end(),
                        "coprocess stderr"
                    );
                }
                Err(err) => {
                    debug!(pid, error = %err, "stderr closed");
                    break;
                }
            }
        }
    })
}

/// Sends each stdout line (terminator included) until EOF.
pub(crate) fn read_lines<R: Read + Send + 'static>(
    stdout: R,
    tx: Sender<std::io::Result<Vec<u8>>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    })
}

/// A supervised row-in/row-out child process.
pub struct Coprocess {
    shared: Arc<Shared>,
    config: ProcessConfig,
    stdout: Receiver<std::io::Result<Vec<u8>>>,
    stop_watchdog: Option<Sender<()>>,
    watchdog: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
}

impl Coprocess {
    /// Starts the process and its helper threads.
    pub fn spawn(config: ProcessConfig, cancel: &CancelToken) -> Result<Self, CmdError> {
        debug!(executable = %config.executable, args = ?config.args, "starting process");
        let mut child = Command::new(&config.executable)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CmdError::Spawn {
                executable: config.executable.clone(),
                source,
            })?;
        let pid = child.id();
        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());

        let (stdin_tx, stdin_rx) = bounded::<Vec<u8>>(1);
        let shared = Arc::new(Shared {
            pid,
            child: Mutex::new(child),
            state: Mutex::new(ProcessState::Created),
            exit: Mutex::new(None),
            stdin: Mutex::new(Some(stdin_tx)),
            progress: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            terminated: CancelToken::new(),
            grace: config.termination_grace,
        });
        shared.set_state(ProcessState::Initializing);

        let (Some(mut stdin), Some(stdout), Some(stderr)) = pipes else {
            shared.terminate(false);
            return Err(CmdError::Protocol("process pipes are not available".to_string()));
        };

        thread::spawn(move || {
            for line in stdin_rx {
                if let Err(err) = stdin.write_all(&line).and_then(|_| stdin.flush()) {
                    debug!(pid, error = %err, "stdin closed");
                    break;
                }
            }
        });

        let (stdout_tx, stdout_rx) = unbounded();
        read_lines(stdout, stdout_tx);
        let stderr = forward_stderr(stderr, config.table.clone(), config.transformer.clone(), pid);

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let watchdog = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            let period = config.row_timeout;
            thread::spawn(move || watch(&shared, &cancel, &stop_rx, period))
        };

        shared.set_state(ProcessState::Running);
        info!(
            table = %config.table,
            transformer = %config.transformer,
            pid,
            executable = %config.executable,
            "process started"
        );
        Ok(Self {
            shared,
            config,
            stdout: stdout_rx,
            stop_watchdog: Some(stop_tx),
            watchdog: Some(watchdog),
            stderr: Some(stderr),
        })
    }

    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Marks a row as sent. The watchdog only fires while a row is in
    /// flight.
    pub fn begin_row(&self) {
        self.shared.progress.fetch_add(1, Ordering::SeqCst);
        self.shared.in_flight.store(true, Ordering::SeqCst);
    }

    pub fn end_row(&self) {
        self.shared.in_flight.store(false, Ordering::SeqCst);
        self.shared.progress.fetch_add(1, Ordering::SeqCst);
    }

    /// Stops the process: SIGTERM first when `graceful`, SIGKILL after the
    /// grace period or right away otherwise.
    pub fn terminate(&self, graceful: bool) {
        self.shared.terminate(graceful);
    }

    /// Closes stdin and waits for the process to exit by itself. A process
    /// that is still running after the grace period is terminated and its
    /// exit code is not checked.
    pub fn shutdown(&mut self) -> Result<(), CmdError> {
        self.stop_watchdog.take();
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }

        {
            let mut state = self.shared.state.lock();
            if *state != ProcessState::Running {
                return Ok(());
            }
            *state = ProcessState::Terminating;
        }
        self.shared.stdin.lock().take();

        match self.shared.wait_exit(self.config.termination_grace) {
            Some(status) => {
                self.shared.set_state(ProcessState::Terminated);
                self.shared.terminated.cancel();
                if let Some(handle) = self.stderr.take() {
                    let _ = handle.join();
                }
                let actual = exit_code(status);
                info!(pid = self.pid(), code = actual, "process exited");
                if actual != self.config.expected_exit_code {
                    return Err(CmdError::UnexpectedExitCode {
                        expected: self.config.expected_exit_code,
                        actual,
                    });
                }
                Ok(())
            }
            None => {
                warn!(pid = self.pid(), "process did not exit after stdin was closed");
                self.shared.set_state(ProcessState::Running);
                self.shared.terminate(true);
                Ok(())
            }
        }
    }

    /// Error for a closed stdin or stdout.
    fn stream_closed(&self, cancel: &CancelToken) -> CmdError {
        if cancel.is_cancelled() {
            return self.cancelled();
        }
        if self.shared.stalled.load(Ordering::SeqCst) {
            return CmdError::RowTransformationTimeout;
        }
        match self.shared.wait_exit(EXIT_PROBE) {
            Some(status) if exit_code(status) != self.config.expected_exit_code => {
                self.shared.terminate(false);
                CmdError::UnexpectedExitCode {
                    expected: self.config.expected_exit_code,
                    actual: exit_code(status),
                }
            }
            _ => {
                self.shared.terminate(false);
                CmdError::UnexpectedEof
            }
        }
    }

    fn cancelled(&self) -> CmdError {
        self.shared.terminate(true);
        CmdError::Cancelled
    }

    fn ensure_running(&self) -> Result<(), CmdError> {
        match self.state() {
            ProcessState::Running => Ok(()),
            _ if self.shared.stalled.load(Ordering::SeqCst) => {
                Err(CmdError::RowTransformationTimeout)
            }
            state => Err(CmdError::NotRunning(state)),
        }
    }
}

impl LineTransport for Coprocess {
    fn write_line(&mut self, line: &[u8], cancel: &CancelToken) -> Result<(), CmdError> {
        self.ensure_running()?;
        let Some(stdin) = self.shared.stdin.lock().clone() else {
            return Err(CmdError::NotRunning(self.state()));
        };
        select! {
            send(stdin, line.to_vec()) -> res => match res {
                Ok(()) => Ok(()),
                Err(_) => Err(self.stream_closed(cancel)),
            },
            recv(cancel.signal()) -> _ => Err(self.cancelled()),
            recv(self.shared.terminated.signal()) -> _ => Err(self.stream_closed(cancel)),
        }
    }

    fn read_line(&mut self, cancel: &CancelToken) -> Result<Vec<u8>, CmdError> {
        self.ensure_running()?;
        select! {
            recv(self.stdout) -> msg => match msg {
                Ok(Ok(line)) => Ok(line),
                Ok(Err(err)) => {
                    self.shared.terminate(false);
                    Err(CmdError::Io(err))
                }
                Err(_) => Err(self.stream_closed(cancel)),
            },
            recv(cancel.signal()) -> _ => Err(self.cancelled()),
            recv(self.shared.terminated.signal()) -> _ => Err(self.stream_closed(cancel)),
        }
    }
}

impl Drop for Coprocess {
    fn drop(&mut self) {
        self.stop_watchdog.take();
        self.shared.terminate(true);
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
    }
}

/// Samples the progress counter every `period`. Two equal samples while a
/// row is in flight mean the row took at least one full period.
fn watch(shared: &Shared, cancel: &CancelToken, stop: &Receiver<()>, period: Duration) {
    let mut last = shared.progress.load(Ordering::SeqCst);
    loop {
        select! {
            recv(stop) -> _ => return,
            recv(shared.terminated.signal()) -> _ => return,
            recv(cancel.signal()) -> _ => {
                debug!(pid = shared.pid, "cancelled, terminating process");
                shared.terminate(true);
                return;
            }
            default(period) => {
                let now = shared.progress.load(Ordering::SeqCst);
                if shared.in_flight.load(Ordering::SeqCst) && now == last {
                    error!(
                        pid = shared.pid,
                        timeout_ms = period.as_millis() as u64,
                        "row transformation stalled, killing process"
                    );
                    shared.stalled.store(true, Ordering::SeqCst);
                    shared.terminate(false);
                    return;
                }
                last = now;
            }
        }
    }
}
