//! Log output for the CLI.
//!
//! Every line carries the configured prefix. Console lines are colored by
//! level; info and debug go to stdout, warnings and errors to stderr. An
//! optional file sink receives the same lines without color.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::DEFAULT_PREFIX;
use crate::error::{BenchError, Result};

/// ANSI color codes for terminal output.
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub verbose: bool,
    pub prefix: String,
    pub output_file: Option<PathBuf>,
    /// Truncate `output_file` instead of appending to it.
    pub overwrite: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            prefix: DEFAULT_PREFIX.to_string(),
            output_file: None,
            overwrite: false,
        }
    }
}

impl LogOptions {
    pub fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }
}

fn level_style(level: Level) -> Option<String> {
    match level {
        Level::ERROR => Some(format!("{}{}", colors::BOLD, colors::RED)),
        Level::WARN => Some(colors::YELLOW.to_string()),
        Level::DEBUG | Level::TRACE => Some(colors::DIM.to_string()),
        Level::INFO => None,
    }
}

/// Formats events as `<prefix> <message>`.
#[derive(Debug, Clone)]
struct PrefixFormat {
    prefix: String,
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for PrefixFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let style = if self.ansi {
            level_style(*event.metadata().level())
        } else {
            None
        };

        if let Some(style) = &style {
            write!(writer, "{}", style)?;
        }
        write!(writer, "{} ", self.prefix)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        if style.is_some() {
            write!(writer, "{}", colors::RESET)?;
        }
        writeln!(writer)
    }
}

fn open_output_file(options: &LogOptions) -> Result<Option<File>> {
    let Some(path) = &options.output_file else {
        return Ok(None);
    };
    let mut open = OpenOptions::new();
    open.create(true);
    if options.overwrite {
        open.write(true).truncate(true);
    } else {
        open.append(true);
    }
    let file = open.open(path).map_err(|e| {
        BenchError::Logging(format!("Failed to open output file {:?}: {}", path, e))
    })?;
    Ok(Some(file))
}

/// Console output: info and debug to `stdout`, warnings and errors to
/// `stderr`. Each stream decides on colors for itself, so piping one of them
/// does not leave escape codes in it.
fn console_layers<S, O, E>(
    options: &LogOptions,
    stdout: O,
    stdout_ansi: bool,
    stderr: E,
    stderr_ansi: bool,
) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    O: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    E: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let out = tracing_subscriber::fmt::layer()
        .event_format(PrefixFormat {
            prefix: options.prefix.clone(),
            ansi: stdout_ansi,
        })
        .with_ansi(stdout_ansi)
        .with_writer(stdout.with_min_level(Level::INFO))
        .with_filter(options.level());

    let err = tracing_subscriber::fmt::layer()
        .event_format(PrefixFormat {
            prefix: options.prefix.clone(),
            ansi: stderr_ansi,
        })
        .with_ansi(stderr_ansi)
        .with_writer(stderr.with_max_level(Level::WARN))
        .with_filter(options.level());

    out.and_then(err)
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails when the output file cannot be opened or a global subscriber is
/// already installed.
pub fn init(options: &LogOptions) -> Result<()> {
    let console = console_layers(
        options,
        std::io::stdout,
        std::io::stdout().is_terminal(),
        std::io::stderr,
        std::io::stderr().is_terminal(),
    );

    let file = open_output_file(options)?.map(|file| {
        tracing_subscriber::fmt::layer()
            .event_format(PrefixFormat {
                prefix: options.prefix.clone(),
                ansi: false,
            })
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(options.level())
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| BenchError::Logging(e.to_string()))
}
