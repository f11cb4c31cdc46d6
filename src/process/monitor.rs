//! Runs one command under a shell and monitors its process tree.
//!
//! A [`MonitoredProcess`] exposes three broadcast channels (resource samples,
//! stdout chunks, stderr chunks). Calling [`MonitoredProcess::run`] spawns the
//! command and a poller thread that samples the tree every [`POLL_INTERVAL`].
//! The poller owns the child and is the only place teardown happens, so
//! teardown runs exactly once whether the process exits on its own or the
//! returned [`ProcessHandle`] is stopped or dropped.

use std::io::Read;
use std::process::{Child, Command as ProcessCommand, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use sysinfo::Pid;
use tracing::debug;

use crate::command::Command;
use crate::error::{BenchError, Result};
use crate::signal::active_registry;

use super::channel::{Broadcast, Subscription};
use super::sample::ProcessSample;
use super::tree::{kill_group, kill_members, kill_tree, TreeSampler, TreeUsage};

/// How often the process tree is sampled.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 8192;

/// Upper bound on waiting for output readers after the tree is gone.
/// A process that left the group can still hold the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A single-use monitored run of a [`Command`].
pub struct MonitoredProcess {
    command: Command,
    use_process_time: bool,
    timer: Arc<Mutex<Instant>>,
    stats: Broadcast<ProcessSample>,
    stdout: Broadcast<Vec<u8>>,
    stderr: Broadcast<Vec<u8>>,
    started: AtomicBool,
}

impl MonitoredProcess {
    /// Creates a monitor for `command`.
    ///
    /// With `use_process_time`, sample elapsed time is measured from spawn.
    /// Without it, elapsed time is measured from the last call to
    /// [`reset_elapsed_timer`](Self::reset_elapsed_timer).
    pub fn new(command: Command, use_process_time: bool) -> Self {
        Self {
            command,
            use_process_time,
            timer: Arc::new(Mutex::new(Instant::now())),
            stats: Broadcast::new(),
            stdout: Broadcast::new(),
            stderr: Broadcast::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn subscribe_stats(&self) -> Subscription<ProcessSample> {
        self.stats.subscribe()
    }

    pub fn subscribe_stdout(&self) -> Subscription<Vec<u8>> {
        self.stdout.subscribe()
    }

    pub fn subscribe_stderr(&self) -> Subscription<Vec<u8>> {
        self.stderr.subscribe()
    }

    /// Ends one stats subscription early, e.g. at an iteration boundary.
    pub fn end_stats_subscription(&self, id: u64) {
        self.stats.unsubscribe(id);
    }

    /// Restarts the wall-clock timer used for sample elapsed time.
    ///
    /// # Errors
    ///
    /// Fails when the monitor was created with `use_process_time`.
    pub fn reset_elapsed_timer(&self) -> Result<()> {
        if self.use_process_time {
            return Err(BenchError::ProcessTimeTimer);
        }
        let mut timer = self
            .timer
            .lock()
            .map_err(|e| BenchError::Monitor(format!("timer lock poisoned: {}", e)))?;
        *timer = Instant::now();
        Ok(())
    }

    /// Spawns the command and starts sampling.
    ///
    /// Subscriptions made before this call see every sample and output chunk.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::AlreadyStarted`] on a second call and
    /// [`BenchError::Spawn`] when the shell cannot be started.
    pub fn run(&self) -> Result<ProcessHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BenchError::AlreadyStarted);
        }
        if !self.use_process_time {
            self.reset_elapsed_timer()?;
        }

        let mut child = shell_command(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BenchError::Spawn(format!("{}: {}", self.command, e)))?;
        let spawned_at = Instant::now();
        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let broadcast = self.stdout.clone();
            readers.push(thread::spawn(move || forward_output(stdout, broadcast)));
        }
        if let Some(stderr) = child.stderr.take() {
            let broadcast = self.stderr.clone();
            readers.push(thread::spawn(move || forward_output(stderr, broadcast)));
        }

        let token = active_registry().register(pid);
        let exit_code = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = mpsc::channel();

        let poller = Poller {
            child,
            pid,
            clock: if self.use_process_time {
                Clock::Process(spawned_at)
            } else {
                Clock::Timer(Arc::clone(&self.timer))
            },
            stats: self.stats.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            readers,
            members: Vec::new(),
            registry_token: token,
            exit_code: Arc::clone(&exit_code),
        };
        let join = thread::spawn(move || poller.run(stop_rx));

        debug!("Spawned pid {} for {}", pid, self.command);
        Ok(ProcessHandle {
            pid,
            stop_tx,
            exit_code,
            poller: Some(join),
        })
    }
}

/// Handle to a running monitored process.
///
/// Dropping the handle stops monitoring and kills the process tree.
pub struct ProcessHandle {
    pid: u32,
    stop_tx: Sender<()>,
    exit_code: Arc<Mutex<Option<i32>>>,
    poller: Option<JoinHandle<Result<i32>>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The exit code once the process has exited and been torn down.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.lock().ok().and_then(|code| *code)
    }

    /// Blocks until the process exits on its own and returns its exit code.
    ///
    /// Calling it again returns the same code.
    pub fn wait(&mut self) -> Result<i32> {
        self.join()
    }

    /// Stops polling, kills the process tree and returns the resulting exit code.
    pub fn stop(&mut self) -> Result<i32> {
        let _ = self.stop_tx.send(());
        self.join()
    }

    fn join(&mut self) -> Result<i32> {
        match self.poller.take() {
            Some(poller) => poller
                .join()
                .map_err(|_| BenchError::Monitor("poller thread panicked".into()))?,
            None => self
                .exit_code()
                .ok_or_else(|| BenchError::Monitor("process already joined".into())),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.poller.is_some() {
            let _ = self.stop_tx.send(());
            let _ = self.join();
        }
    }
}

enum Clock {
    Process(Instant),
    Timer(Arc<Mutex<Instant>>),
}

impl Clock {
    fn elapsed_ms(&self) -> u64 {
        let elapsed = match self {
            Clock::Process(spawned_at) => spawned_at.elapsed(),
            Clock::Timer(timer) => timer
                .lock()
                .map(|started| started.elapsed())
                .unwrap_or_default(),
        };
        elapsed.as_millis() as u64
    }
}

/// Owns the child for the lifetime of a run.
struct Poller {
    child: Child,
    pid: u32,
    clock: Clock,
    stats: Broadcast<ProcessSample>,
    stdout: Broadcast<Vec<u8>>,
    stderr: Broadcast<Vec<u8>>,
    readers: Vec<JoinHandle<()>>,
    /// Tree members seen so far, so reparented children can still be killed.
    members: Vec<(Pid, u64)>,
    registry_token: u64,
    exit_code: Arc<Mutex<Option<i32>>>,
}

impl Poller {
    fn run(mut self, stop_rx: Receiver<()>) -> Result<i32> {
        let mut sampler = TreeSampler::new();

        let exited = loop {
            if let Some(usage) = sampler.sample(self.pid) {
                let sample = self.to_sample(&usage);
                self.remember(usage.members);
                self.stats.send(sample);
            }

            match self.child.try_wait() {
                Ok(Some(status)) => break Ok(Some(status)),
                Ok(None) => {}
                Err(e) => break Err(BenchError::Io(e)),
            }

            match stop_rx.recv_timeout(POLL_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break Ok(None),
            }
        };

        self.teardown(exited)
    }

    fn to_sample(&self, usage: &TreeUsage) -> ProcessSample {
        ProcessSample {
            pid: usage.pid,
            parent_pid: usage.parent_pid,
            creation_time: usage.start_time.saturating_mul(1000),
            elapsed: self.clock.elapsed_ms(),
            timestamp: Utc::now().timestamp_millis(),
            process_count: usage.process_count,
            cpu_percent: usage.cpu_percent,
            memory_bytes: usage.memory_bytes,
        }
    }

    fn remember(&mut self, members: Vec<(Pid, u64)>) {
        for member in members {
            if !self.members.contains(&member) {
                self.members.push(member);
            }
        }
    }

    fn kill_remaining(&mut self) {
        kill_tree(self.pid, &self.members);
        kill_group(self.pid);
        // The root may ignore SIGTERM; make sure it is gone before reaping.
        let _ = self.child.kill();
    }

    /// Waits for the output readers to hit end of file, so every chunk is
    /// broadcast before the channels close. Readers still blocked after
    /// [`OUTPUT_DRAIN_TIMEOUT`] are left to finish on their own.
    fn drain_output(&mut self) {
        let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
        while !self.readers.iter().all(JoinHandle::is_finished) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        for reader in std::mem::take(&mut self.readers) {
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                debug!("Output reader for pid {} still blocked, detaching", self.pid);
            }
        }
    }

    /// Kills what is left of the tree, reaps the root, flushes pending output
    /// and closes every channel.
    fn teardown(mut self, exited: Result<Option<ExitStatus>>) -> Result<i32> {
        let status = match exited {
            Ok(Some(status)) => {
                // The group outlives its leader; this reaches children that
                // were started and backgrounded between two samples.
                kill_group(self.pid);
                let root = Pid::from_u32(self.pid);
                let orphans: Vec<_> = self
                    .members
                    .iter()
                    .copied()
                    .filter(|(pid, _)| *pid != root)
                    .collect();
                kill_members(&orphans);
                Ok(status)
            }
            Ok(None) => {
                self.kill_remaining();
                self.child.wait().map_err(BenchError::Io)
            }
            Err(e) => {
                self.kill_remaining();
                let _ = self.child.wait();
                Err(e)
            }
        };

        self.drain_output();
        self.stats.close();
        self.stdout.close();
        self.stderr.close();

        active_registry().unregister(self.registry_token);

        let code = exit_code_of(status?);
        if let Ok(mut exit_code) = self.exit_code.lock() {
            *exit_code = Some(code);
        }
        debug!("Pid {} finished with exit code {}", self.pid, code);
        Ok(code)
    }
}

fn forward_output(mut reader: impl Read, broadcast: Broadcast<Vec<u8>>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => broadcast.send(buf[..n].to_vec()),
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &Command) -> ProcessCommand {
    use std::os::unix::process::CommandExt;

    let mut shell = ProcessCommand::new("sh");
    shell
        .arg("-c")
        .arg(command.shell_line())
        .current_dir(command.cwd())
        .process_group(0);
    shell
}

#[cfg(windows)]
fn shell_command(command: &Command) -> ProcessCommand {
    let mut shell = ProcessCommand::new("cmd");
    shell.arg("/C").arg(command.shell_line()).current_dir(command.cwd());
    shell
}

/// Maps an exit status to a code; on Unix a signal death becomes `128 + signal`.
pub(crate) fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

    fn sh(line: &str) -> Command {
        Command::from_line(line, PathBuf::from("."), 0).unwrap()
    }

    fn is_alive(pid: u32) -> bool {
        let mut system = System::new();
        let pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(pid).is_some()
    }

    #[test]
    fn test_exit_code_is_reported() {
        let process = MonitoredProcess::new(sh("exit 3"), true);
        let mut handle = process.run().unwrap();
        assert_eq!(handle.wait().unwrap(), 3);
    }

    #[test]
    fn test_run_is_single_use() {
        let process = MonitoredProcess::new(sh("true"), true);
        let mut handle = process.run().unwrap();
        assert!(matches!(process.run(), Err(BenchError::AlreadyStarted)));
        handle.wait().unwrap();
    }

    #[test]
    fn test_spawn_error_for_missing_directory() {
        let command = Command::new("true", vec![], "/definitely/not/a/dir", 0);
        let process = MonitoredProcess::new(command, true);
        assert!(matches!(process.run(), Err(BenchError::Spawn(_))));
    }

    #[test]
    fn test_stats_stream_ends_at_exit() {
        let process = MonitoredProcess::new(sh("sleep 0.3"), true);
        let stats = process.subscribe_stats();
        let mut handle = process.run().unwrap();

        let samples: Vec<_> = stats.collect();
        assert_eq!(handle.wait().unwrap(), 0);

        assert!(!samples.is_empty());
        for pair in samples.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_stdout_chunks_are_broadcast() {
        let process = MonitoredProcess::new(sh("echo hello-monitor"), true);
        let stdout = process.subscribe_stdout();
        let mut handle = process.run().unwrap();

        let output: Vec<u8> = stdout.flatten().collect();
        handle.wait().unwrap();
        assert!(String::from_utf8_lossy(&output).contains("hello-monitor"));
    }

    #[test]
    fn test_stderr_chunks_are_broadcast() {
        let process = MonitoredProcess::new(sh("echo oops 1>&2"), true);
        let stderr = process.subscribe_stderr();
        let mut handle = process.run().unwrap();

        let output: Vec<u8> = stderr.flatten().collect();
        handle.wait().unwrap();
        assert!(String::from_utf8_lossy(&output).contains("oops"));
    }

    #[test]
    fn test_reset_timer_rejected_with_process_time() {
        let process = MonitoredProcess::new(sh("true"), true);
        assert!(matches!(
            process.reset_elapsed_timer(),
            Err(BenchError::ProcessTimeTimer)
        ));
    }

    #[test]
    fn test_reset_timer_restarts_elapsed() {
        let process = MonitoredProcess::new(sh("sleep 1"), false);
        let mut handle = process.run().unwrap();
        thread::sleep(Duration::from_millis(450));

        process.reset_elapsed_timer().unwrap();
        let stats = process.subscribe_stats();
        let first = stats.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(first.elapsed < 300, "elapsed was {}", first.elapsed);

        handle.stop().unwrap();
    }

    #[test]
    fn test_stop_kills_process_tree() {
        let process = MonitoredProcess::new(sh("sleep 30 & sleep 30; wait"), true);
        let stats = process.subscribe_stats();
        let mut handle = process.run().unwrap();
        let pid = handle.pid();

        // Let at least one sample record the children.
        let sample = stats.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sample.pid, pid);
        thread::sleep(POLL_INTERVAL * 2);

        let code = handle.stop().unwrap();
        assert_ne!(code, 0);

        thread::sleep(Duration::from_millis(200));
        assert!(!is_alive(pid));
        assert_ne!(active_registry().active_pid(), Some(pid));
    }

    #[test]
    fn test_drop_kills_process() {
        let process = MonitoredProcess::new(sh("sleep 30"), true);
        let handle = process.run().unwrap();
        let pid = handle.pid();
        drop(handle);

        thread::sleep(Duration::from_millis(200));
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_output_written_just_before_exit_is_kept() {
        let process = MonitoredProcess::new(sh("seq 1 20000"), true);
        let stdout = process.subscribe_stdout();
        let mut handle = process.run().unwrap();

        let output: Vec<u8> = stdout.flatten().collect();
        assert_eq!(handle.wait().unwrap(), 0);
        assert!(String::from_utf8_lossy(&output).ends_with("19999\n20000\n"));
    }

    #[test]
    fn test_backgrounded_child_is_killed_when_shell_exits() {
        let process = MonitoredProcess::new(sh("sleep 31 & echo $!"), true);
        let stdout = process.subscribe_stdout();
        let mut handle = process.run().unwrap();

        let output: Vec<u8> = stdout.flatten().collect();
        assert_eq!(handle.wait().unwrap(), 0);

        let background: u32 = String::from_utf8_lossy(&output).trim().parse().unwrap();
        thread::sleep(Duration::from_millis(300));
        assert!(!is_alive(background), "pid {} survived teardown", background);
    }

    #[test]
    fn test_exit_code_available_after_wait() {
        let process = MonitoredProcess::new(sh("exit 2"), true);
        let mut handle = process.run().unwrap();
        assert_eq!(handle.wait().unwrap(), 2);
        assert_eq!(handle.exit_code(), Some(2));
        assert_eq!(handle.wait().unwrap(), 2);
    }
}
