/// One poll observation of a monitored process tree.
///
/// Timing fields come from the root process. `process_count`, `cpu_percent`
/// and `memory_bytes` are summed over every live descendant, leaving out the
/// shell wrapper that owns the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    /// Start of the root process, in milliseconds since the Unix epoch.
    pub creation_time: u64,
    /// Milliseconds elapsed, either since spawn or since the last timer reset.
    pub elapsed: u64,
    /// When the sample was taken, in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub process_count: usize,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}
