//! Watch-mode runner.
//!
//! The benchmarked command is a long-lived watcher (a dev server, a file
//! watcher) that prints a marker every time it finishes a unit of work. Each
//! iteration runs a separate trigger command and measures the watcher from the
//! trigger until the marker shows up on its stdout.

use std::process::{Command as ProcessCommand, Stdio};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::capture::run_captures;
use crate::command::Command;
use crate::error::{BenchError, Result};
use crate::metric::MetricGroup;
use crate::process::{exit_code_of, MonitoredProcess, ProcessHandle, ProcessSample, Subscription};
use crate::runner::Benchmark;
use crate::state::{MachineState, RunState};

pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_millis(10_000);

/// What to trigger and what to wait for in watch mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Substring that marks the end of one unit of work on stdout.
    pub matcher: String,
    /// How long to wait for the marker before the iteration fails.
    pub timeout: Duration,
    /// Run to completion before each iteration, e.g. `touch src/index.js`.
    pub command: Command,
}

impl WatchOptions {
    pub fn new(matcher: impl Into<String>, command: Command) -> Self {
        Self {
            matcher: matcher.into(),
            timeout: DEFAULT_WATCH_TIMEOUT,
            command,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Matched,
    TimedOut,
    Closed,
}

/// Reads stdout chunks until one contains `matcher`, the deadline passes, or
/// the stream ends. Chunks are matched one at a time.
fn await_marker(stdout: &Subscription<Vec<u8>>, matcher: &str, timeout: Duration) -> Marker {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match stdout.recv_timeout(remaining) {
            Ok(chunk) if String::from_utf8_lossy(&chunk).contains(matcher) => {
                return Marker::Matched
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => return Marker::TimedOut,
            Err(RecvTimeoutError::Disconnected) => return Marker::Closed,
        }
    }
}

/// Runs the trigger command without a shell and returns its exit code.
fn run_trigger(command: &Command) -> Result<i32> {
    let output = ProcessCommand::new(command.program())
        .args(command.args())
        .current_dir(command.cwd())
        .stdin(Stdio::null())
        .output()
        .map_err(|e| BenchError::Spawn(format!("{}: {}", command, e)))?;
    Ok(exit_code_of(output.status))
}

/// Subscriptions opened before the trigger runs, so the marker and the first
/// samples of the iteration are not missed.
struct Window {
    stdout: Subscription<Vec<u8>>,
    samples: Vec<Subscription<ProcessSample>>,
}

impl Benchmark {
    /// Runs the benchmark in watch mode.
    ///
    /// The command is started once and kept alive across iterations. After its
    /// first marker, each iteration runs `watch.command` and samples the
    /// command's process tree until the next marker.
    ///
    /// Two retry budgets of `retries` each apply. Launch and trigger failures
    /// count against one that resets whenever the watcher becomes ready or a
    /// trigger succeeds. Failures after a successful trigger (timeouts, empty
    /// captures, the watcher dying) count against a second one that only an
    /// accepted iteration resets. A watcher that dies is restarted.
    ///
    /// # Errors
    ///
    /// [`BenchError::MaximumRetriesExceeded`] when wrong exit codes exhaust a
    /// budget, the last failure of any other retryable kind, or any
    /// non-retryable error immediately.
    pub fn run_watch(&self, watch: &WatchOptions) -> Result<Vec<MetricGroup>> {
        let mut state = RunState::new();

        while !state.is_done(self.iterations()) {
            if let Err(e) = self.watch_session(watch, &mut state) {
                state.transition_to(MachineState::Failed);
                return Err(e);
            }
        }

        state.transition_to(MachineState::Completed);
        self.report(&state.aggregate);
        Ok(state.aggregate)
    }

    /// Runs one watcher until the requested iterations are done or it has to
    /// be restarted. `Ok(())` with iterations left means restart.
    fn watch_session(&self, watch: &WatchOptions, state: &mut RunState) -> Result<()> {
        state.transition_to(MachineState::Running);
        let process = MonitoredProcess::new(self.command().clone(), false);
        let ready = process.subscribe_stdout();
        let mut handle = process.run()?;

        debug!("Waiting for '{}' from {}", watch.matcher, self.command());
        let launch_error = match await_marker(&ready, &watch.matcher, watch.timeout) {
            Marker::Matched => None,
            Marker::TimedOut => Some(BenchError::Timeout(watch.timeout_ms())),
            Marker::Closed => Some(self.watcher_exited(state, &mut handle)),
        };
        if let Some(e) = launch_error {
            return self.retry_or_propagate(state, e);
        }
        drop(ready);
        state.reset_failures();

        while !state.is_done(self.iterations()) {
            let window = match self.trigger(&process, &mut handle, watch, state) {
                Ok(window) => window,
                Err(e) if !e.is_retryable() => return Err(e),
                // A dead watcher cannot be retried in place; restart the session.
                Err(e) if handle.exit_code().is_some() => {
                    return state.retry_capture_or_fail(e, self.retries())
                }
                Err(e) => {
                    state.retry_or_fail(e, self.retries())?;
                    continue;
                }
            };

            match self.measure(&process, &mut handle, watch, state, window) {
                Ok(groups) => {
                    debug!("{} finished successfully", state.debug_prefix());
                    state.record_success(groups)?;
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    state.retry_capture_or_fail(e, self.retries())?;
                    if handle.exit_code().is_some() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    fn retry_or_propagate(&self, state: &mut RunState, error: BenchError) -> Result<()> {
        if error.is_retryable() {
            state.retry_or_fail(error, self.retries())
        } else {
            Err(error)
        }
    }

    /// Opens the iteration's subscriptions, then runs the trigger command and
    /// checks both exit codes.
    fn trigger(
        &self,
        process: &MonitoredProcess,
        handle: &mut ProcessHandle,
        watch: &WatchOptions,
        state: &mut RunState,
    ) -> Result<Window> {
        state.transition_to(MachineState::Running);
        process.reset_elapsed_timer()?;

        let window = Window {
            stdout: process.subscribe_stdout(),
            samples: self
                .captures()
                .iter()
                .map(|_| process.subscribe_stats())
                .collect(),
        };

        let trigger_code = run_trigger(&watch.command)?;
        if let Some(code) = handle.exit_code() {
            return Err(self.unexpected_exit(state, code));
        }
        let expected = self.command().expected_exit_code();
        if trigger_code != expected {
            debug!(
                "{} {} exited with {} but {} was expected",
                state.debug_prefix(),
                watch.command,
                trigger_code,
                expected
            );
            return Err(BenchError::WrongExitCode {
                expected,
                actual: trigger_code,
            });
        }
        state.reset_failures();
        Ok(window)
    }

    /// Runs every capture until the marker shows up or the timeout passes.
    fn measure(
        &self,
        process: &MonitoredProcess,
        handle: &mut ProcessHandle,
        watch: &WatchOptions,
        state: &RunState,
        window: Window,
    ) -> Result<Vec<MetricGroup>> {
        debug!("{} starting", state.debug_prefix());
        if window.samples.is_empty() {
            return Err(BenchError::CaptureEmpty);
        }

        let Window { stdout, samples } = window;
        let ids: Vec<u64> = samples.iter().map(Subscription::id).collect();
        let (groups, marker) = thread::scope(|scope| {
            let gate = scope.spawn(move || {
                let marker = await_marker(&stdout, &watch.matcher, watch.timeout);
                for id in ids {
                    process.end_stats_subscription(id);
                }
                marker
            });
            let groups = run_captures(self.captures(), samples);
            let marker = gate
                .join()
                .map_err(|_| BenchError::Monitor("marker thread panicked".into()));
            (groups, marker)
        });

        match marker? {
            Marker::Matched => groups,
            Marker::TimedOut => {
                debug!(
                    "{} no '{}' within {}ms",
                    state.debug_prefix(),
                    watch.matcher,
                    watch.timeout_ms()
                );
                Err(BenchError::Timeout(watch.timeout_ms()))
            }
            Marker::Closed => Err(self.watcher_exited(state, handle)),
        }
    }

    fn watcher_exited(&self, state: &RunState, handle: &mut ProcessHandle) -> BenchError {
        match handle.wait() {
            Ok(code) => self.unexpected_exit(state, code),
            Err(e) => e,
        }
    }

    fn unexpected_exit(&self, state: &RunState, code: i32) -> BenchError {
        match self.check_exit_code(state, code) {
            Err(e) => e,
            Ok(()) => BenchError::WatchedProcessExited(code),
        }
    }
}
