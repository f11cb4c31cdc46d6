use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn procbench_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("procbench").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

// ---- Argument validation ----

#[test]
fn missing_command_fails() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No command to benchmark was given"));
}

#[test]
fn watch_matcher_without_command_fails() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--watch-matcher", "compiled", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("A watch matcher requires a watch command"));
}

#[test]
fn unreadable_config_fails() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--config", "missing.toml", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

// ---- Fixed-iteration runs ----

#[cfg(unix)]
#[test]
fn successful_run_reports_metrics() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--iterations", "2", "--", "sleep", "0.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[benchmark] Benchmarking process over 2 iterations, with up to 5 retries.",
        ))
        .stdout(predicate::str::contains("[benchmark] sleep 0.1 (at "))
        .stdout(predicate::str::contains("[benchmark] Process Stats"))
        .stdout(predicate::str::contains("Elapsed Time:"))
        .stdout(predicate::str::contains("Peak Memory usage:"));
}

#[cfg(unix)]
#[test]
fn wrong_exit_code_exhausts_retries() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--iterations", "1", "--retries", "2", "--", "exit", "1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Process Stats").not())
        .stderr(predicate::str::contains(
            "Maximum number of retries (2) for command was exceeded.",
        ));
}

#[cfg(unix)]
#[test]
fn expected_exit_code_flag() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--iterations", "1", "--exit-code", "3", "--", "exit", "3"])
        .assert()
        .success();
}

#[cfg(unix)]
#[test]
fn zero_iterations_is_a_failure() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--iterations", "0", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No metrics were captured"));
}

#[cfg(unix)]
#[test]
fn verbose_narrates_runs() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--verbose", "--iterations", "1", "--", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run #1: starting"))
        .stdout(predicate::str::contains("Run #1: finished successfully"));
}

// ---- Config file and log sinks ----

#[cfg(unix)]
#[test]
fn config_file_sets_defaults_and_flags_override() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("bench.toml"),
        "iterations = 4\nretries = 1\nprefix = \"[cfg]\"\n",
    )
    .unwrap();

    procbench_cmd(&tmp)
        .args(["--config", "bench.toml", "--iterations", "1", "--", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[cfg] Benchmarking process over 1 iterations, with up to 1 retries.",
        ));
}

#[cfg(unix)]
#[test]
fn output_file_receives_log_lines() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("bench.log");
    fs::write(&log, "stale\n").unwrap();

    procbench_cmd(&tmp)
        .args(["--output-file", "bench.log", "--overwrite-output-file"])
        .args(["--prefix", "[ci]", "--iterations", "1", "--", "true"])
        .assert()
        .success();

    let content = fs::read_to_string(&log).unwrap();
    assert!(!content.contains("stale"));
    assert!(content.contains("[ci] Process Stats"));
    assert!(!content.contains('\x1b'));
}

// ---- Watch mode ----

#[cfg(unix)]
#[test]
fn watch_mode_measures_rebuilds() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--iterations", "2"])
        .args(["--watch-matcher", "rebuilt"])
        .args(["--watch-command", "touch trigger"])
        .args(["--watch-timeout", "5000"])
        .args([
            "--",
            "echo rebuilt; while true; do if [ -f trigger ]; then rm -f trigger; echo rebuilt; fi; sleep 0.05; done",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Process Stats"));
}

#[cfg(unix)]
#[test]
fn watch_mode_times_out() {
    let tmp = TempDir::new().unwrap();

    procbench_cmd(&tmp)
        .args(["--iterations", "1", "--retries", "1"])
        .args(["--watch-matcher", "never"])
        .args(["--watch-command", "true"])
        .args(["--watch-timeout", "100"])
        .args(["--", "sleep", "5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Timed out after 100ms"));
}
