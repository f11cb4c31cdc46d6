//! Process-wide shutdown hook.
//!
//! At most one monitored process is active at a time. It registers itself here
//! while running so that, if the host receives SIGINT or SIGTERM, its whole
//! process tree is terminated before the host exits instead of being orphaned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{BenchError, Result};
use crate::process::{kill_group, kill_tree};

/// Exit code used when the host is interrupted.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveProcess {
    token: u64,
    pid: u32,
}

/// Tracks the single active monitored process.
pub struct ActiveRegistry {
    slot: Mutex<Option<ActiveProcess>>,
    next_token: AtomicU64,
}

impl ActiveRegistry {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    /// Marks `pid` as active. The returned token is needed to unregister it.
    pub fn register(&self, pid: u32) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(ActiveProcess { token, pid });
        }
        token
    }

    /// Clears the active process, unless a newer one has replaced it.
    pub fn unregister(&self, token: u64) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.is_some_and(|active| active.token == token) {
                *slot = None;
            }
        }
    }

    pub fn active_pid(&self) -> Option<u32> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.map(|active| active.pid))
    }

    fn take_pid(&self) -> Option<u32> {
        self.slot
            .lock()
            .ok()
            .and_then(|mut slot| slot.take().map(|active| active.pid))
    }
}

impl Default for ActiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static ACTIVE: ActiveRegistry = ActiveRegistry::new();

/// The process-wide registry consulted by the shutdown hook.
pub fn active_registry() -> &'static ActiveRegistry {
    &ACTIVE
}

/// Installs the SIGINT/SIGTERM handler that kills the active process tree and
/// exits with code 130.
///
/// # Errors
///
/// Returns an error if a handler was already installed or registration fails.
pub fn install_shutdown_hook() -> Result<()> {
    ctrlc::set_handler(|| {
        if let Some(pid) = ACTIVE.take_pid() {
            kill_tree(pid, &[]);
            kill_group(pid);
        }
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
    .map_err(|e| BenchError::SignalHandler(e.to_string()))
}
