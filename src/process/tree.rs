//! Process tree enumeration, usage sampling and tree termination using sysinfo.

use std::collections::{HashMap, VecDeque};

use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

/// Resource usage of one process tree at a single point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeUsage {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    /// Root start time in seconds since the Unix epoch.
    pub start_time: u64,
    /// Processes in the tree other than the root.
    pub process_count: usize,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// Every member of the tree with its start time, root first.
    pub members: Vec<(Pid, u64)>,
}

/// Samples a process tree.
///
/// Holds a `sysinfo::System` between refreshes so CPU usage can be computed
/// from the delta between two consecutive samples.
pub struct TreeSampler {
    system: System,
}

impl TreeSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refreshes every process and aggregates usage for the tree under `root`.
    ///
    /// Returns `None` when the root is no longer in the process table.
    pub fn sample(&mut self, root: u32) -> Option<TreeUsage> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let root_pid = Pid::from_u32(root);
        let root_process = self.system.process(root_pid)?;
        let members = tree_members(&self.system, root_pid);

        let mut cpu_percent = 0.0;
        let mut memory_bytes = 0;
        for (pid, _) in members.iter().filter(|(pid, _)| *pid != root_pid) {
            if let Some(process) = self.system.process(*pid) {
                cpu_percent += f64::from(process.cpu_usage());
                memory_bytes += process.memory();
            }
        }

        Some(TreeUsage {
            pid: root,
            parent_pid: root_process.parent().map(|pid| pid.as_u32()),
            start_time: root_process.start_time(),
            process_count: members.len().saturating_sub(1),
            cpu_percent,
            memory_bytes,
            members,
        })
    }
}

impl Default for TreeSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Lists the tree rooted at `root`, root included, breadth first.
fn tree_members(system: &System, root: Pid) -> Vec<(Pid, u64)> {
    let Some(root_process) = system.process(root) else {
        return Vec::new();
    };

    let mut children: HashMap<Pid, Vec<(Pid, u64)>> = HashMap::new();
    for (pid, process) in system.processes() {
        // Linux lists threads next to processes; only count real processes.
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children
                .entry(parent)
                .or_default()
                .push((*pid, process.start_time()));
        }
    }

    let mut members = vec![(root, root_process.start_time())];
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &(child, start_time) in children.get(&pid).into_iter().flatten() {
            members.push((child, start_time));
            queue.push_back(child);
        }
    }
    members
}

fn terminate(process: &Process) -> bool {
    process
        .kill_with(Signal::Term)
        .unwrap_or_else(|| process.kill())
}

/// Signals every process in the tree under `root`, plus any previously seen
/// members that are still alive, deepest processes first.
///
/// Returns how many processes were signalled.
pub fn kill_tree(root: u32, known: &[(Pid, u64)]) -> usize {
    let system = refreshed_system();
    let mut targets = tree_members(&system, Pid::from_u32(root));
    for member in known {
        if !targets.iter().any(|(pid, _)| *pid == member.0) {
            targets.push(*member);
        }
    }
    signal_members(&system, &targets)
}

/// Signals previously seen members that are still alive, last seen first.
///
/// Used once the root has exited and its children were reparented.
pub fn kill_members(known: &[(Pid, u64)]) -> usize {
    signal_members(&refreshed_system(), known)
}

/// Kills every process in the process group led by `leader`.
///
/// Monitored commands are spawned as group leaders, so this also reaches
/// children that were started and left behind between two samples. Returns
/// whether any process in the group was signalled.
#[cfg(unix)]
pub fn kill_group(leader: u32) -> bool {
    use nix::sys::signal::{killpg, Signal as UnixSignal};
    use nix::unistd::Pid as UnixPid;

    match i32::try_from(leader) {
        Ok(pgid) if pgid > 1 => killpg(UnixPid::from_raw(pgid), UnixSignal::SIGKILL).is_ok(),
        _ => false,
    }
}

/// Process groups are a Unix concept; elsewhere only the tree walk applies.
#[cfg(not(unix))]
pub fn kill_group(_leader: u32) -> bool {
    false
}

fn refreshed_system() -> System {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing(),
    );
    system
}

/// Each member is paired with its start time so a recycled pid is never
/// mistaken for a former member.
fn signal_members(system: &System, members: &[(Pid, u64)]) -> usize {
    members
        .iter()
        .rev()
        .filter_map(|(pid, start_time)| {
            system
                .process(*pid)
                .filter(|process| process.start_time() == *start_time)
        })
        .filter(|process| terminate(process))
        .count()
}
