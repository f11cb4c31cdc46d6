use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Process exited with {actual} but {expected} was expected")]
    WrongExitCode { expected: i32, actual: i32 },

    #[error("Timed out after {0}ms waiting for the watch matcher")]
    Timeout(u64),

    #[error("Nothing was captured")]
    CaptureEmpty,

    #[error("Maximum number of retries ({0}) for command was exceeded.")]
    MaximumRetriesExceeded(u32),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Watched process exited early with code {0}")]
    WatchedProcessExited(i32),

    #[error("Cannot aggregate metrics: {0}")]
    MetricMismatch(String),

    #[error("Cannot reset elapsed timer when using process time. Set 'use_process_time' to false.")]
    ProcessTimeTimer,

    #[error("Monitored process was already started")]
    AlreadyStarted,

    #[error("Process monitor failed: {0}")]
    Monitor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to register signal handler: {0}")]
    SignalHandler(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BenchError {
    /// Whether the owning runner may retry the attempt that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BenchError::WrongExitCode { .. }
                | BenchError::Timeout(_)
                | BenchError::CaptureEmpty
                | BenchError::WatchedProcessExited(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
