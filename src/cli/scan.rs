use anyhow::{Result, bail};
use clap::Args;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::output::{Output, ProgressReporter};
use crate::config::{ReportFormat, SampleLayout, TriageConfig};
use crate::reports::ReportGenerator;
use crate::triage::{BatchLimits, BatchRunner, CommandExtractor, TracingSink, collect_samples};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Sample files, or directories to enumerate samples from
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Directory of rule files (searched recursively)
    #[arg(short, long, value_name = "DIR")]
    pub rules: PathBuf,

    /// Report file to write
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum)]
    pub format: Option<ReportFormat>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,

    /// How samples are laid out inside sample directories
    #[arg(long, value_enum)]
    pub layout: Option<SampleLayout>,

    /// Process at most this many samples (0 = all)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Maximum extraction subprocesses in flight
    #[arg(long)]
    pub max_extractions: Option<usize>,

    /// Matching worker threads (0 = auto)
    #[arg(long)]
    pub match_workers: Option<usize>,

    /// Extraction program to run instead of 7z
    #[arg(long, value_name = "PROGRAM")]
    pub extractor_program: Option<String>,

    /// Extraction argument template; repeat per argument, with {archive} and {dest} placeholders
    #[arg(long = "extractor-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub extractor_args: Vec<String>,
}

impl ScanArgs {
    /// Config overrides for the options actually given on the command line
    pub fn config_overrides(&self, log_file: Option<&Path>) -> Value {
        let mut sections = Map::new();
        let mut section = |name: &str, key: &str, value: Value| {
            let entry = sections.entry(name.to_string()).or_insert_with(|| json!({}));
            if let Some(table) = entry.as_object_mut() {
                table.insert(key.to_string(), value);
            }
        };

        if let Some(path) = &self.output {
            section("output", "path", json!(path.to_string_lossy()));
        }
        if let Some(format) = self.format {
            section("output", "format", json!(format));
        }
        if self.pretty {
            section("output", "pretty", json!(true));
        }
        if let Some(layout) = self.layout {
            section("samples", "layout", json!(layout));
        }
        if let Some(limit) = self.limit {
            section("samples", "limit", json!(limit));
        }
        if let Some(max) = self.max_extractions {
            section("concurrency", "max_extractions", json!(max));
        }
        if let Some(workers) = self.match_workers {
            section("concurrency", "match_workers", json!(workers));
        }
        if let Some(program) = &self.extractor_program {
            section("extractor", "program", json!(program));
        }
        if !self.extractor_args.is_empty() {
            section("extractor", "args", json!(self.extractor_args));
        }
        if let Some(file) = log_file {
            section("logging", "file", json!(file.to_string_lossy()));
        }

        Value::Object(sections)
    }
}

/// Expand directories into samples; explicit files are taken as given
fn gather_samples(paths: &[PathBuf], config: &TriageConfig) -> Result<Vec<PathBuf>> {
    let mut samples = Vec::new();
    for path in paths {
        if path.is_dir() {
            samples.extend(collect_samples(path, config.samples.layout, 0)?);
        } else {
            samples.push(path.clone());
        }
    }

    if config.samples.limit > 0 {
        samples.truncate(config.samples.limit);
    }
    Ok(samples)
}

pub async fn execute(args: ScanArgs, config: &TriageConfig, output: &Output) -> Result<()> {
    if !args.rules.is_dir() {
        bail!("Rules directory not found: {}", args.rules.display());
    }

    let samples = gather_samples(&args.paths, config)?;
    if samples.is_empty() {
        output.warning("No samples found");
    }

    output.info(&format!(
        "Scanning {} samples with rules from {}",
        samples.len(),
        args.rules.display()
    ));

    let limits = BatchLimits::from_config(&config.concurrency);
    output.verbose(&format!(
        "Extractor '{}', {} concurrent extractions, {} match workers",
        config.extractor.program, limits.max_extractions, limits.match_workers
    ));

    let progress = Arc::new(ProgressReporter::new(
        output.progress_bar(samples.len() as u64, "Overall Progress"),
    ));
    let runner = BatchRunner::new(
        Arc::new(CommandExtractor::from_config(&config.extractor)),
        limits,
        Arc::new(TracingSink),
    )
    .with_progress(progress.clone());

    let outcome = runner.run(&args.rules, &config.rules.extensions, &samples).await?;
    progress.finish();

    ReportGenerator::write_report(
        &outcome.records,
        &config.output.path,
        config.output.format,
        config.output.pretty,
    )?;

    output.batch_summary(&outcome.summary, &config.output.path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ScanArgs,
    }

    fn parse(argv: &[&str]) -> ScanArgs {
        Harness::parse_from(std::iter::once("scan").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_only_given_options_become_overrides() {
        let args = parse(&["-r", "rules", "samples"]);
        assert_eq!(args.config_overrides(None), json!({}));
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = parse(&[
            "-r",
            "rules",
            "--format",
            "jsonl",
            "--max-extractions",
            "2",
            "--extractor-program",
            "bsdtar",
            "--extractor-arg",
            "-xf",
            "--extractor-arg",
            "{archive}",
            "--extractor-arg",
            "-C",
            "--extractor-arg",
            "{dest}",
            "samples",
        ]);

        let overrides = args.config_overrides(Some(Path::new("scan.log")));
        let config = TriageConfig::load(None, Some(overrides)).unwrap();

        assert_eq!(config.output.format, ReportFormat::Jsonl);
        assert_eq!(config.concurrency.max_extractions, 2);
        assert_eq!(config.extractor.program, "bsdtar");
        assert_eq!(config.extractor.args, vec!["-xf", "{archive}", "-C", "{dest}"]);
        assert_eq!(config.logging.file, Some(PathBuf::from("scan.log")));
        // untouched sections keep their defaults
        assert_eq!(config.rules.extensions, vec!["yar"]);
    }

    #[test]
    fn test_gather_samples_mixes_files_and_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let batch = dir.path().join("batch");
        std::fs::create_dir(&batch).unwrap();
        std::fs::write(batch.join("one.7z"), b"1").unwrap();
        std::fs::write(batch.join("two.7z"), b"2").unwrap();
        let single = dir.path().join("single.zip");

        let mut config = TriageConfig::default();
        let samples = gather_samples(&[single.clone(), batch.clone()], &config).unwrap();
        assert_eq!(samples, vec![single.clone(), batch.join("one.7z"), batch.join("two.7z")]);

        config.samples.limit = 2;
        assert_eq!(gather_samples(&[single, batch], &config).unwrap().len(), 2);
    }
}
