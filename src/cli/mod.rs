use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::TriageConfig;

pub mod output;
pub mod scan;

pub use output::Output;

#[derive(Parser)]
#[command(
    name = "yara-triage",
    version = crate::VERSION,
    about = "Bulk malware-sample triage: unpack archives and match every member against YARA rules",
    long_about = "yara-triage unpacks each sample with an external extraction tool, sanitizes hostile \
                  member names, matches the sample and every member against a compiled rule set, \
                  and writes one flat record per rule match."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Append log output to this file instead of stderr
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract and scan samples against a rules directory
    Scan(scan::ScanArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let output = Output::new(self.verbose > 0, self.quiet);

        match self.command {
            Some(Commands::Scan(args)) => {
                let overrides = args.config_overrides(self.log_file.as_deref());
                let config = TriageConfig::load(self.config.as_deref(), Some(overrides))?;
                setup_logging(self.verbose, self.quiet, config.logging.file.as_deref())?;

                scan::execute(args, &config, &output).await
            }
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}

/// Install the tracing subscriber
///
/// With a log file every event is appended there (quiet mode does not silence it);
/// otherwise events go to stderr unless `quiet` is set.
fn setup_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let fallback = match (verbose, log_file.is_some()) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        (2, _) => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None if quiet => {}
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}
