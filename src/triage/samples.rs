//! Sample list enumeration

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SampleLayout;

/// List the samples under `dir`, sorted, keeping at most `limit` (0 = all)
///
/// `Nested` yields `<dir>/<name>/<name>` for every entry of `dir` whether or not
/// that file exists; missing ones are reported later by the orchestrator.
pub fn collect_samples(dir: &Path, layout: SampleLayout, limit: usize) -> Result<Vec<PathBuf>> {
    let mut samples = match layout {
        SampleLayout::Flat => flat(dir)?,
        SampleLayout::Nested => nested(dir)?,
    };
    samples.sort();

    if limit > 0 {
        samples.truncate(limit);
    }
    tracing::debug!("Collected {} samples from {}", samples.len(), dir.display());
    Ok(samples)
}

fn flat(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut samples = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry
            .with_context(|| format!("Failed to walk samples directory {}", dir.display()))?;
        if entry.file_type().is_file() {
            samples.push(entry.into_path());
        }
    }
    Ok(samples)
}

fn nested(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read samples directory {}", dir.display()))?;

    let mut samples = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let name = entry.file_name();
        samples.push(entry.path().join(name));
    }
    Ok(samples)
}
