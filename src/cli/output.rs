//! Styled terminal output for the CLI
//!
//! Human-facing messages go to stdout (errors to stderr); diagnostics go
//! through `tracing` and never through here.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::triage::{BatchSummary, DiagnosticKind, ProgressObserver};

/// Output handler for consistent CLI formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    verbose: bool,
    quiet: bool,
}

impl Output {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("⚠").yellow(), message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("ℹ").blue(), message);
        }
    }

    /// Only printed with `-v`
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", style("ℹ").dim(), style(message).dim());
        }
    }

    pub fn header(&self, title: &str) {
        if !self.quiet {
            println!("\n{}", style(title).bold().underlined());
        }
    }

    pub fn key_value(&self, key: &str, value: &str, highlight: bool) {
        if !self.quiet {
            let styled_value = if highlight {
                style(value).green().bold()
            } else {
                style(value).white()
            };
            println!("  {:<22} {}", style(key).dim(), styled_value);
        }
    }

    /// Progress bar over samples; hidden in quiet mode
    pub fn progress_bar(&self, len: u64, message: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        let bar_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(bar_style);
        pb.set_message(message.to_string());
        pb
    }

    /// End-of-run summary
    pub fn batch_summary(&self, summary: &BatchSummary, report: &Path) {
        self.header("Triage Summary");
        self.key_value("Samples", &summary.samples.to_string(), false);
        self.key_value("Match records", &summary.records.to_string(), summary.records > 0);
        self.key_value("Report", &report.display().to_string(), false);
        self.key_value("Elapsed", &format!("{:.2?}", summary.elapsed), false);

        let total = summary.diagnostic_total();
        if total == 0 {
            self.success("No recovered failures");
            return;
        }

        self.warning(&format!("{total} recovered failures (see log)"));
        for kind in DiagnosticKind::ALL {
            let count = summary.diagnostics.get(&kind).copied().unwrap_or(0);
            if count > 0 {
                self.key_value(kind.label(), &count.to_string(), false);
            }
        }
    }
}

/// Drives the "Overall Progress" bar from batch events
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("Overall Progress: done");
    }
}

impl ProgressObserver for ProgressReporter {
    fn on_sample_finished(&self, sample: &Path, records: usize) {
        self.bar.inc(1);
        if records > 0 {
            self.bar.println(format!(
                "{} {} ({} matches)",
                style("❯").cyan(),
                sample.display(),
                records
            ));
        }
    }
}
