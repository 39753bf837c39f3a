//! Batch driver: one rule set, many samples, two independent bounds
//!
//! Extraction subprocesses are admitted through a semaphore; rule matching runs
//! on a separate worker pool. Samples run concurrently and their records are
//! concatenated in completion order.

use anyhow::{Context, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::data::ResultRecord;
use super::diagnostics::{CountingSink, DiagnosticKind, DiagnosticSink};
use super::extract::Extractor;
use super::orchestrator::ScanOrchestrator;
use super::rules::{Matcher, RuleMatcher, RuleSet};
use crate::config::ConcurrencyConfig;
use crate::parallel::WorkerPool;

/// The two back-pressure knobs of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Extraction subprocesses allowed in flight at once
    pub max_extractions: usize,
    /// Threads in the matching pool
    pub match_workers: usize,
}

impl BatchLimits {
    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        Self {
            max_extractions: config.max_extractions.max(1),
            match_workers: WorkerPool::calculate_optimal_workers(
                config.match_workers,
                config.max_match_workers,
            ),
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from_config(&ConcurrencyConfig::default())
    }
}

/// Notified as each sample finishes; purely informational
pub trait ProgressObserver: Send + Sync {
    fn on_sample_finished(&self, sample: &Path, records: usize);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub samples: usize,
    pub records: usize,
    pub diagnostics: BTreeMap<DiagnosticKind, usize>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn diagnostic_total(&self) -> usize {
        self.diagnostics.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub records: Vec<ResultRecord>,
    pub summary: BatchSummary,
}

pub struct BatchRunner {
    extractor: Arc<dyn Extractor>,
    limits: BatchLimits,
    diagnostics: Arc<dyn DiagnosticSink>,
    progress: Option<Arc<dyn ProgressObserver>>,
    workspace_parent: Option<PathBuf>,
}

impl BatchRunner {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        limits: BatchLimits,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            extractor,
            limits,
            diagnostics,
            progress: None,
            workspace_parent: None,
        }
    }

    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn with_workspace_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_parent = Some(dir.into());
        self
    }

    /// Compile the rules under `rules_dir`, then scan every sample
    ///
    /// A rule set that fails to compile aborts the run before any sample is touched.
    pub async fn run(
        &self,
        rules_dir: &Path,
        extensions: &[String],
        samples: &[PathBuf],
    ) -> Result<BatchOutcome> {
        let rules = RuleSet::compile(rules_dir, extensions)
            .with_context(|| format!("Failed to compile rules in {}", rules_dir.display()))?;
        self.run_with_matcher(Arc::new(rules), samples).await
    }

    /// Scan every sample against an already-built matcher
    pub async fn run_with_matcher(
        &self,
        matcher: Arc<dyn Matcher>,
        samples: &[PathBuf],
    ) -> Result<BatchOutcome> {
        let started = Instant::now();
        let counting = Arc::new(CountingSink::new(self.diagnostics.clone()));
        let sink: Arc<dyn DiagnosticSink> = counting.clone();

        let pool = Arc::new(WorkerPool::new(self.limits.match_workers)?);
        tracing::info!(
            "Scanning {} samples (max {} extractions, {} match workers)",
            samples.len(),
            self.limits.max_extractions,
            pool.workers()
        );

        let rule_matcher = RuleMatcher::new(matcher, pool, sink.clone());
        let gate = Arc::new(Semaphore::new(self.limits.max_extractions.max(1)));
        let mut orchestrator =
            ScanOrchestrator::new(self.extractor.clone(), rule_matcher, gate, sink);
        if let Some(parent) = &self.workspace_parent {
            orchestrator = orchestrator.with_workspace_parent(parent);
        }

        let mut pending: FuturesUnordered<_> = samples
            .iter()
            .map(|sample| {
                let orchestrator = &orchestrator;
                async move { (sample, orchestrator.scan_sample(sample).await) }
            })
            .collect();

        let mut records = Vec::new();
        while let Some((sample, sample_records)) = pending.next().await {
            if let Some(progress) = &self.progress {
                progress.on_sample_finished(sample, sample_records.len());
            }
            records.extend(sample_records);
        }

        let summary = BatchSummary {
            samples: samples.len(),
            records: records.len(),
            diagnostics: counting.counts().into_iter().collect(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Batch finished: {} samples, {} records, {} diagnostics in {:.2?}",
            summary.samples,
            summary.records,
            summary.diagnostic_total(),
            summary.elapsed
        );

        Ok(BatchOutcome { records, summary })
    }
}
