//! Benchmark configuration.
//!
//! Settings come from two layers: an optional TOML file (`--config`) and the
//! command-line flags. Every key is optional in both layers; flags win over the
//! file and anything left unset falls back to the built-in defaults.
//!
//! ```toml
//! iterations = 10
//! retries = 3
//! exit_code = 0
//! cwd = "./app"
//! prefix = "[bench]"
//!
//! # Watch mode: both keys are required together
//! watch_matcher = "compiled successfully"
//! watch_command = "touch src/index.js"
//! watch_timeout = 10000
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::command::Command;
use crate::error::{BenchError, Result};
use crate::runner::{DEFAULT_ITERATIONS, DEFAULT_RETRIES};
use crate::watch::{WatchOptions, DEFAULT_WATCH_TIMEOUT};

pub const DEFAULT_PREFIX: &str = "[benchmark]";

/// One layer of settings, as read from a config file or from CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub iterations: Option<u32>,
    pub retries: Option<u32>,
    pub exit_code: Option<i32>,
    pub cwd: Option<PathBuf>,
    pub prefix: Option<String>,
    pub watch_matcher: Option<String>,
    /// Milliseconds.
    pub watch_timeout: Option<u64>,
    /// Whitespace-separated program and arguments, run without a shell.
    pub watch_command: Option<String>,
}

impl Config {
    /// Reads a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Config`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("Failed to read config file at {:?}: {}", path, e))
        })?;
        toml::from_str(&content).map_err(|e| {
            BenchError::Config(format!("Failed to parse config file at {:?}: {}", path, e))
        })
    }

    /// Layers `overrides` on top of `self`; set values in `overrides` win.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            iterations: overrides.iterations.or(self.iterations),
            retries: overrides.retries.or(self.retries),
            exit_code: overrides.exit_code.or(self.exit_code),
            cwd: overrides.cwd.or(self.cwd),
            prefix: overrides.prefix.or(self.prefix),
            watch_matcher: overrides.watch_matcher.or(self.watch_matcher),
            watch_timeout: overrides.watch_timeout.or(self.watch_timeout),
            watch_command: overrides.watch_command.or(self.watch_command),
        }
    }

    /// Fills in defaults and checks the result for consistency.
    ///
    /// A missing `cwd` resolves to the current directory.
    pub fn resolve(self) -> Result<Settings> {
        validate_config(&self).map_err(|e| BenchError::Config(e.to_string()))?;

        let cwd = match self.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()?,
        };
        let exit_code = self.exit_code.unwrap_or(0);

        let watch = match (self.watch_matcher, self.watch_command) {
            (Some(matcher), Some(line)) => {
                let command = Command::from_line(&line, &cwd, exit_code)
                    .ok_or_else(|| BenchError::Config(ConfigError::EmptyWatchCommand.to_string()))?;
                let timeout = self
                    .watch_timeout
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WATCH_TIMEOUT);
                Some(WatchOptions::new(matcher, command).with_timeout(timeout))
            }
            _ => None,
        };

        Ok(Settings {
            iterations: self.iterations.unwrap_or(DEFAULT_ITERATIONS),
            retries: self.retries.unwrap_or(DEFAULT_RETRIES),
            exit_code,
            cwd,
            prefix: self.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            watch,
        })
    }
}

/// Fully resolved settings for one benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub iterations: u32,
    pub retries: u32,
    pub exit_code: i32,
    pub cwd: PathBuf,
    pub prefix: String,
    /// Present only in watch mode.
    pub watch: Option<WatchOptions>,
}

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A watch matcher was given without a watch command.
    MatcherWithoutCommand,
    /// A watch command was given without a watch matcher.
    CommandWithoutMatcher,
    /// The watch command contains no program.
    EmptyWatchCommand,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MatcherWithoutCommand => write!(
                f,
                "A watch matcher requires a watch command. Set `watch_command` or remove `watch_matcher`"
            ),
            ConfigError::CommandWithoutMatcher => write!(
                f,
                "A watch command requires a watch matcher. Set `watch_matcher` or remove `watch_command`"
            ),
            ConfigError::EmptyWatchCommand => write!(f, "The watch command is empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Checks that watch settings are given together.
pub fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    match (&config.watch_matcher, &config.watch_command) {
        (Some(_), None) => Err(ConfigError::MatcherWithoutCommand),
        (None, Some(_)) => Err(ConfigError::CommandWithoutMatcher),
        (Some(_), Some(line)) if line.trim().is_empty() => Err(ConfigError::EmptyWatchCommand),
        _ => Ok(()),
    }
}
