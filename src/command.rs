//! The command being benchmarked.

use std::fmt;
use std::path::{Path, PathBuf};

/// An external command to run, along with the exit code that counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    expected_exit_code: i32,
}

impl Command {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        cwd: impl Into<PathBuf>,
        expected_exit_code: i32,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            expected_exit_code,
        }
    }

    /// Builds a command from whitespace-separated words, e.g. `"node build.js"`.
    ///
    /// Returns `None` when `line` has no words.
    pub fn from_line(line: &str, cwd: impl Into<PathBuf>, expected_exit_code: i32) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self::new(program, words.collect(), cwd, expected_exit_code))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn expected_exit_code(&self) -> i32 {
        self.expected_exit_code
    }

    /// The program and its arguments as a single shell line.
    pub fn shell_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.shell_line(), self.cwd.display())
    }
}
