pub mod aggregate;
pub mod capture;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod metric;
pub mod process;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod state;
pub mod watch;

pub use capture::{Capture, ProcessStatsCapture};
pub use command::Command;
pub use config::{Config, Settings};
pub use error::{BenchError, Result};
pub use metric::{Metric, MetricGroup};
pub use process::{MonitoredProcess, ProcessHandle, ProcessSample};
pub use reporter::{DefaultReporter, Reporter};
pub use runner::Benchmark;
pub use state::{MachineState, RunState};
pub use watch::WatchOptions;
