//! Fixed-iteration benchmark runner.

use tracing::debug;

use crate::capture::{run_captures, Capture};
use crate::command::Command;
use crate::error::{BenchError, Result};
use crate::metric::MetricGroup;
use crate::process::MonitoredProcess;
use crate::reporter::Reporter;
use crate::state::{MachineState, RunState};

pub const DEFAULT_ITERATIONS: u32 = 5;
pub const DEFAULT_RETRIES: u32 = 5;

/// A benchmark definition: what to run, how to measure it, and how often.
pub struct Benchmark {
    command: Command,
    captures: Vec<Box<dyn Capture>>,
    reporters: Vec<Box<dyn Reporter>>,
    iterations: u32,
    retries: u32,
}

impl Benchmark {
    /// Creates a benchmark with default iterations and retries and no captures
    /// or reporters.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            captures: Vec::new(),
            reporters: Vec::new(),
            iterations: DEFAULT_ITERATIONS,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_capture(mut self, capture: impl Capture + 'static) -> Self {
        self.captures.push(Box::new(capture));
        self
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn captures(&self) -> &[Box<dyn Capture>] {
        &self.captures
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Runs the command until `iterations` attempts have succeeded.
    ///
    /// Each attempt spawns a fresh monitored process. Failed attempts are
    /// retried in place while the run-wide failure count stays below
    /// `retries`; the count is never reset between iterations. The final
    /// aggregate is handed to every reporter and returned.
    ///
    /// # Errors
    ///
    /// [`BenchError::MaximumRetriesExceeded`] when wrong exit codes use up the
    /// retry budget, the last failure for any other retryable kind, or any
    /// non-retryable error (e.g. a spawn failure) immediately.
    pub fn run(&self) -> Result<Vec<MetricGroup>> {
        let mut state = RunState::new();
        if self.iterations == 0 {
            state.transition_to(MachineState::Completed);
            return Ok(state.aggregate);
        }

        while !state.is_done(self.iterations) {
            state.transition_to(MachineState::Running);
            debug!("{} starting", state.debug_prefix());

            match self.attempt(&state) {
                Ok(groups) => {
                    debug!("{} finished successfully", state.debug_prefix());
                    state.record_success(groups)?;
                }
                Err(e) if e.is_retryable() => state.retry_or_fail(e, self.retries)?,
                Err(e) => {
                    state.transition_to(MachineState::Failed);
                    return Err(e);
                }
            }
        }

        state.transition_to(MachineState::Completed);
        self.report(&state.aggregate);
        Ok(state.aggregate)
    }

    fn attempt(&self, state: &RunState) -> Result<Vec<MetricGroup>> {
        let process = MonitoredProcess::new(self.command.clone(), true);
        let subscriptions = self
            .captures
            .iter()
            .map(|_| process.subscribe_stats())
            .collect();

        let mut handle = process.run()?;
        let groups = run_captures(&self.captures, subscriptions)?;
        let exit_code = handle.wait()?;

        if groups.is_empty() {
            return Err(BenchError::CaptureEmpty);
        }
        self.check_exit_code(state, exit_code)?;
        Ok(groups)
    }

    pub(crate) fn check_exit_code(&self, state: &RunState, exit_code: i32) -> Result<()> {
        let expected = self.command.expected_exit_code();
        if exit_code != expected {
            debug!(
                "{} exited with {} but {} was expected",
                state.debug_prefix(),
                exit_code,
                expected
            );
            return Err(BenchError::WrongExitCode {
                expected,
                actual: exit_code,
            });
        }
        Ok(())
    }

    pub(crate) fn report(&self, groups: &[MetricGroup]) {
        if groups.is_empty() {
            return;
        }
        for reporter in &self.reporters {
            reporter.report(&self.command, groups);
        }
    }
}
