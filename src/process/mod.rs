//! Process monitoring.
//!
//! Spawns a command under a shell, samples CPU, memory and process count of
//! its whole process tree, and guarantees the tree is torn down afterwards.

mod channel;
mod monitor;
mod sample;
mod tree;

pub use channel::{Broadcast, Subscription};
pub use monitor::{MonitoredProcess, ProcessHandle, POLL_INTERVAL};
pub(crate) use monitor::exit_code_of;
pub use sample::ProcessSample;
pub use tree::{kill_group, kill_members, kill_tree, TreeSampler, TreeUsage};
