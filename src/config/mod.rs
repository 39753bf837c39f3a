//! Configuration management for yara-triage
//!
//! Configuration is layered with figment, lowest priority first:
//! embedded `default-config.toml`, `yara-triage.toml` in the working directory,
//! an explicit `--config` file, `YARA_TRIAGE_*` environment variables, and CLI overrides.

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Repository-local config file picked up automatically
const LOCAL_CONFIG_FILE: &str = "yara-triage.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TriageConfig {
    pub extractor: ExtractorConfig,
    pub concurrency: ConcurrencyConfig,
    pub rules: RulesConfig,
    pub samples: SamplesConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// External extraction tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Program to run (looked up on PATH)
    pub program: String,

    /// Argument template; `{archive}` and `{dest}` are substituted per call
    pub args: Vec<String>,
}

/// The two independent back-pressure knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum extraction subprocesses in flight at once
    pub max_extractions: usize,

    /// Matching worker threads (0 = auto)
    pub match_workers: usize,

    /// Upper bound applied to the matching pool size
    pub max_match_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule-source file extensions, without the leading dot
    pub extensions: Vec<String>,
}

/// How sample paths are enumerated from a samples directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SampleLayout {
    /// Every regular file below the directory
    Flat,
    /// `<dir>/<name>/<name>` per sample
    Nested,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplesConfig {
    pub layout: SampleLayout,

    /// Maximum samples to process (0 = no limit)
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// One JSON array of records
    Json,
    /// One record per line
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub format: ReportFormat,
    pub pretty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append-only diagnostic log; `None` logs to stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("yara_scan_errors.log")),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "7z".to_string(),
            args: vec![
                "x".to_string(),
                "{archive}".to_string(),
                "-o{dest}".to_string(),
                "-y".to_string(),
            ],
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_extractions: 4,
            match_workers: 0,
            max_match_workers: 32,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["yar".to_string()],
        }
    }
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            layout: SampleLayout::Flat,
            limit: 0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("yara_rule_matches.json"),
            format: ReportFormat::Json,
            pretty: false,
        }
    }
}

impl TriageConfig {
    /// Load the layered configuration
    ///
    /// `cli_overrides` is any serializable value shaped like (a subset of) this struct;
    /// `None` fields must be skipped by the caller's serializer so they don't clobber
    /// lower layers.
    pub fn load<T: Serialize>(
        custom_config: Option<&str>,
        cli_overrides: Option<T>,
    ) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");

        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .merge(Toml::file(LOCAL_CONFIG_FILE));

        if let Some(path) = custom_config {
            if !std::path::Path::new(path).is_file() {
                anyhow::bail!("Config file not found: {path}");
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("YARA_TRIAGE_").split("__"));

        if let Some(overrides) = cli_overrides {
            tracing::trace!("CONFIG LOAD: Applying CLI overrides");
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: TriageConfig = figment
            .extract()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.max_extractions == 0 {
            anyhow::bail!("concurrency.max_extractions must be at least 1");
        }
        if self.concurrency.max_match_workers == 0 {
            anyhow::bail!("concurrency.max_match_workers must be at least 1");
        }
        if self.extractor.program.trim().is_empty() {
            anyhow::bail!("extractor.program cannot be empty");
        }
        if !self.extractor.args.iter().any(|a| a.contains("{archive}")) {
            anyhow::bail!("extractor.args must reference {{archive}}");
        }
        if !self.extractor.args.iter().any(|a| a.contains("{dest}")) {
            anyhow::bail!("extractor.args must reference {{dest}}");
        }
        if self.rules.extensions.is_empty() {
            anyhow::bail!("rules.extensions cannot be empty");
        }
        Ok(())
    }
}
