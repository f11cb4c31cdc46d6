//! procbench CLI entry point.
//!
//! Parses command-line arguments, layers them over an optional config file,
//! and runs the benchmark in fixed-iteration or watch mode.

use std::path::PathBuf;

use clap::Parser;
use procbench::config::{Config, DEFAULT_PREFIX};
use procbench::logging::{self, LogOptions};
use procbench::signal::install_shutdown_hook;
use procbench::{
    BenchError, Benchmark, Command, DefaultReporter, ProcessStatsCapture, Result,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "procbench")]
#[command(
    version,
    about = "Benchmark a command by sampling the CPU, memory and process count of its process tree",
    after_help = "EXAMPLES:
    # Run a build five times and report averages and peaks
    procbench -- npm run build

    # Ten iterations, allowing up to two failed attempts
    procbench --iterations 10 --retries 2 -- ./scripts/build.sh

    # Watch mode: time a dev server's rebuild after each touch
    procbench --watch-matcher 'compiled successfully' \\
        --watch-command 'touch src/index.js' -- npm start

CONFIG FILE:
    --config reads a TOML file with the keys iterations, retries, exit_code,
    cwd, prefix, watch_matcher, watch_timeout and watch_command.
    Flags given on the command line override values from the file."
)]
struct Cli {
    /// Command to benchmark, run under a shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,

    /// Log debug output for every run
    #[arg(short, long)]
    verbose: bool,

    /// Exit code that counts as success [default: 0]
    #[arg(long, allow_negative_numbers = true)]
    exit_code: Option<i32>,

    /// Number of successful runs to measure [default: 5]
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Failed runs tolerated before giving up [default: 5]
    #[arg(short, long)]
    retries: Option<u32>,

    /// Working directory for the command [default: current directory]
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Also write log lines to this file
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Truncate the output file instead of appending to it
    #[arg(long, requires = "output_file")]
    overwrite_output_file: bool,

    /// Prefix for every log line [default: "[benchmark]"]
    #[arg(long)]
    prefix: Option<String>,

    /// Text on stdout that marks a finished unit of work (enables watch mode)
    #[arg(long)]
    watch_matcher: Option<String>,

    /// Milliseconds to wait for the watch matcher [default: 10000]
    #[arg(long)]
    watch_timeout: Option<u64>,

    /// Command run before each watch iteration, without a shell
    #[arg(long)]
    watch_command: Option<String>,

    /// TOML file with default settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The settings given explicitly on the command line.
    fn overrides(&self) -> Config {
        Config {
            iterations: self.iterations,
            retries: self.retries,
            exit_code: self.exit_code,
            cwd: self.cwd.clone(),
            prefix: self.prefix.clone(),
            watch_matcher: self.watch_matcher.clone(),
            watch_timeout: self.watch_timeout,
            watch_command: self.watch_command.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let file_config = cli.config.as_deref().map(Config::load).transpose();
    let prefix = cli
        .prefix
        .clone()
        .or_else(|| {
            file_config
                .as_ref()
                .ok()
                .and_then(|config| config.as_ref()?.prefix.clone())
        })
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

    let log_options = LogOptions {
        verbose: cli.verbose,
        prefix,
        output_file: cli.output_file.clone(),
        overwrite: cli.overwrite_output_file,
    };
    if let Err(e) = logging::init(&log_options) {
        eprintln!("{} {}", log_options.prefix, e);
        std::process::exit(1);
    }

    let result = file_config.and_then(|file| run(&cli, file.unwrap_or_default()));
    let code = match result {
        Ok(true) => 0,
        Ok(false) => {
            error!("No metrics were captured");
            1
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

/// Runs the benchmark and reports whether it produced any metric groups.
fn run(cli: &Cli, file: Config) -> Result<bool> {
    let Some((program, args)) = cli.command.split_first() else {
        return Err(BenchError::Config(
            "No command to benchmark was given. Usage: procbench [OPTIONS] -- <COMMAND>...".into(),
        ));
    };
    let settings = file.merge(cli.overrides()).resolve()?;
    let command = Command::new(
        program.clone(),
        args.to_vec(),
        &settings.cwd,
        settings.exit_code,
    );

    install_shutdown_hook()?;

    info!(
        "Benchmarking process over {} iterations, with up to {} retries.",
        settings.iterations, settings.retries
    );
    info!("{}", command);

    let benchmark = Benchmark::new(command)
        .with_capture(ProcessStatsCapture)
        .with_reporter(DefaultReporter)
        .with_iterations(settings.iterations)
        .with_retries(settings.retries);

    let groups = match &settings.watch {
        Some(watch) => benchmark.run_watch(watch)?,
        None => benchmark.run()?,
    };
    Ok(!groups.is_empty())
}
