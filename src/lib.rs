//! # yara-triage - bulk malware-sample triage
//!
//! yara-triage takes a list of (usually archived) samples and a directory of YARA
//! rules, recursively unpacks each sample, matches the sample and every extracted
//! member against the compiled rules, and emits one flat record per match.
//!
//! - **Bounded extraction**: at most N extraction subprocesses in flight
//! - **Off-scheduler matching**: CPU-bound matching runs on a dedicated worker pool
//! - **Hostile names handled**: unsafe member paths are sanitized before they are touched
//! - **Failure isolation**: a bad sample or member never loses results from the rest
//!
//! ## Quick Start
//!
//! ```bash
//! # Scan every file under ./samples with the rules in ./rules
//! yara-triage scan --rules ./rules ./samples
//!
//! # Original dataset layout (<dir>/<name>/<name>), first 10 samples, JSON lines
//! yara-triage scan --rules ./rules --layout nested --limit 10 --format jsonl ./malware_samples
//! ```
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//! use yara_triage::triage::{BatchLimits, BatchRunner, CommandExtractor, TracingSink};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runner = BatchRunner::new(
//!     Arc::new(CommandExtractor::new(
//!         "7z",
//!         vec!["x".into(), "{archive}".into(), "-o{dest}".into(), "-y".into()],
//!     )),
//!     BatchLimits::default(),
//!     Arc::new(TracingSink),
//! );
//! let samples = vec![PathBuf::from("samples/a.7z")];
//! let outcome = runner.run(Path::new("rules"), &["yar".to_string()], &samples).await?;
//!
//! for record in &outcome.records {
//!     println!("{} matched {} in {}", record.file_path, record.rule, record.sub_file_basename);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod parallel;
pub mod reports;
pub mod triage;

pub use cli::{Cli, Output};
pub use config::TriageConfig;

/// Result type alias for yara-triage operations
pub type Result<T> = anyhow::Result<T>;

/// Crate version, reported by `--version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
