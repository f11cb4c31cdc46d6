//! Run state shared by the fixed-iteration and watch runners.
//!
//! The state machine is `Idle -> Running -> {Succeeded, Retrying, Failed}`,
//! looping back to `Running` until the requested iterations are reached and the
//! run becomes `Completed`.

use tracing::debug;

use crate::aggregate::merge_groups;
use crate::error::{BenchError, Result};
use crate::metric::MetricGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Running,
    Succeeded,
    Retrying,
    Failed,
    Completed,
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub machine_state: MachineState,
    /// Accepted iterations so far.
    pub successful_runs: u32,
    /// Failures counted against the retry budget. The watch runner resets it
    /// whenever the watcher becomes ready or a trigger succeeds.
    pub failed_runs: u32,
    /// Watch-mode failures after a successful trigger (timeouts, empty
    /// captures, a watcher dying mid-iteration). Only an accepted iteration
    /// clears it.
    pub capture_failures: u32,
    /// Running merge of every accepted iteration, empty until the first one.
    pub aggregate: Vec<MetricGroup>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            machine_state: MachineState::Idle,
            successful_runs: 0,
            failed_runs: 0,
            capture_failures: 0,
            aggregate: Vec::new(),
        }
    }

    pub fn transition_to(&mut self, state: MachineState) {
        self.machine_state = state;
    }

    /// Prefix used in debug narration, e.g. `Run #2:`.
    pub fn debug_prefix(&self) -> String {
        format!("Run #{}:", self.successful_runs + 1)
    }

    pub fn is_done(&self, iterations: u32) -> bool {
        self.successful_runs >= iterations
    }

    /// Folds an accepted iteration into the aggregate.
    pub fn record_success(&mut self, groups: Vec<MetricGroup>) -> Result<()> {
        self.aggregate = merge_groups(&self.aggregate, groups)?;
        self.successful_runs += 1;
        self.capture_failures = 0;
        self.transition_to(MachineState::Succeeded);
        Ok(())
    }

    /// Counts a failure and decides whether to retry.
    ///
    /// Returns `Ok(())` while `failed_runs < retries`. Once the budget is spent,
    /// a wrong exit code becomes [`BenchError::MaximumRetriesExceeded`]; any
    /// other error is returned unchanged.
    pub fn retry_or_fail(&mut self, error: BenchError, retries: u32) -> Result<()> {
        self.failed_runs += 1;
        let failures = self.failed_runs;
        self.retry_within(error, failures, retries)
    }

    /// Same as [`retry_or_fail`](Self::retry_or_fail), but counted against
    /// `capture_failures`, which trigger successes do not reset.
    pub fn retry_capture_or_fail(&mut self, error: BenchError, retries: u32) -> Result<()> {
        self.capture_failures += 1;
        let failures = self.capture_failures;
        self.retry_within(error, failures, retries)
    }

    fn retry_within(&mut self, error: BenchError, failures: u32, retries: u32) -> Result<()> {
        if failures < retries {
            debug!(
                "{} failed ({}), retrying ({}/{})",
                self.debug_prefix(),
                error,
                failures,
                retries
            );
            self.transition_to(MachineState::Retrying);
            return Ok(());
        }

        self.transition_to(MachineState::Failed);
        match error {
            BenchError::WrongExitCode { .. } => Err(BenchError::MaximumRetriesExceeded(retries)),
            other => Err(other),
        }
    }

    pub fn reset_failures(&mut self) {
        self.failed_runs = 0;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;

    fn wrong_exit() -> BenchError {
        BenchError::WrongExitCode {
            expected: 0,
            actual: 1,
        }
    }

    fn groups(value: f64) -> Vec<MetricGroup> {
        vec![MetricGroup::new(
            "Process Stats",
            vec![Metric::new("Elapsed Time", "ms", value)],
        )]
    }

    #[test]
    fn test_new_state_is_idle() {
        let state = RunState::new();
        assert_eq!(state.machine_state, MachineState::Idle);
        assert_eq!(state.successful_runs, 0);
        assert!(state.aggregate.is_empty());
        assert_eq!(state.debug_prefix(), "Run #1:");
    }

    #[test]
    fn test_record_success_merges() {
        let mut state = RunState::new();
        state.record_success(groups(10.0)).unwrap();
        state.record_success(groups(20.0)).unwrap();

        assert_eq!(state.successful_runs, 2);
        assert_eq!(state.machine_state, MachineState::Succeeded);
        assert_eq!(state.aggregate[0].metrics[0].value, 15.0);
        assert!(state.is_done(2));
        assert!(!state.is_done(3));
    }

    #[test]
    fn test_retry_or_fail_translates_wrong_exit_code() {
        let mut state = RunState::new();
        assert!(state.retry_or_fail(wrong_exit(), 3).is_ok());
        assert!(state.retry_or_fail(wrong_exit(), 3).is_ok());
        assert_eq!(state.machine_state, MachineState::Retrying);

        let err = state.retry_or_fail(wrong_exit(), 3).unwrap_err();
        assert!(matches!(err, BenchError::MaximumRetriesExceeded(3)));
        assert_eq!(state.machine_state, MachineState::Failed);
    }

    #[test]
    fn test_retry_or_fail_passes_other_errors_through() {
        let mut state = RunState::new();
        let err = state.retry_or_fail(BenchError::Timeout(50), 1).unwrap_err();
        assert!(matches!(err, BenchError::Timeout(50)));
    }

    #[test]
    fn test_capture_failures_survive_trigger_reset() {
        let mut state = RunState::new();
        state.retry_capture_or_fail(BenchError::Timeout(50), 2).unwrap();
        state.reset_failures();

        let err = state
            .retry_capture_or_fail(BenchError::Timeout(50), 2)
            .unwrap_err();
        assert!(matches!(err, BenchError::Timeout(50)));
        assert_eq!(state.machine_state, MachineState::Failed);
    }

    #[test]
    fn test_capture_failures_cleared_by_success() {
        let mut state = RunState::new();
        state.retry_capture_or_fail(BenchError::CaptureEmpty, 2).unwrap();
        state.record_success(groups(1.0)).unwrap();

        assert_eq!(state.capture_failures, 0);
        assert!(state
            .retry_capture_or_fail(BenchError::CaptureEmpty, 2)
            .is_ok());
    }

    #[test]
    fn test_capture_budget_translates_wrong_exit_code() {
        let mut state = RunState::new();
        let err = state.retry_capture_or_fail(wrong_exit(), 1).unwrap_err();
        assert!(matches!(err, BenchError::MaximumRetriesExceeded(1)));
        assert_eq!(state.failed_runs, 0);
    }

    #[test]
    fn test_failures_accumulate_across_successes() {
        let mut state = RunState::new();
        state.retry_or_fail(wrong_exit(), 3).unwrap();
        state.record_success(groups(1.0)).unwrap();
        state.retry_or_fail(wrong_exit(), 3).unwrap();
        state.record_success(groups(1.0)).unwrap();

        // Budget is shared by the whole run unless explicitly reset.
        assert!(state.retry_or_fail(wrong_exit(), 3).is_err());
    }

    #[test]
    fn test_reset_failures_restores_budget() {
        let mut state = RunState::new();
        state.retry_or_fail(wrong_exit(), 2).unwrap();
        state.reset_failures();
        assert!(state.retry_or_fail(wrong_exit(), 2).is_ok());
    }

    #[test]
    fn test_zero_retries_fails_on_first_error() {
        let mut state = RunState::new();
        assert!(state.retry_or_fail(wrong_exit(), 0).is_err());
    }
}
