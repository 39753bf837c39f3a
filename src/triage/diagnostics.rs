//! Diagnostic sink for recovered per-sample and per-file failures
//!
//! Every condition the pipeline swallows (missing sample, failed extraction,
//! unreadable member, failed rename) is reported here instead of through
//! process-wide state, so tests can capture exactly what was recorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A recovered failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    SampleMissing {
        sample: PathBuf,
    },
    ExtractionFailed {
        sample: PathBuf,
        /// Exit code, `None` when the tool could not be started or was killed by a signal
        status: Option<i32>,
        stderr: String,
    },
    UnreadableFile {
        path: PathBuf,
        reason: String,
    },
    SanitizeFailed {
        path: PathBuf,
        reason: String,
    },
    WorkspaceCleanupFailed {
        workspace: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    SampleMissing,
    ExtractionFailed,
    UnreadableFile,
    SanitizeFailed,
    WorkspaceCleanupFailed,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 5] = [
        DiagnosticKind::SampleMissing,
        DiagnosticKind::ExtractionFailed,
        DiagnosticKind::UnreadableFile,
        DiagnosticKind::SanitizeFailed,
        DiagnosticKind::WorkspaceCleanupFailed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::SampleMissing => "missing samples",
            DiagnosticKind::ExtractionFailed => "extraction failures",
            DiagnosticKind::UnreadableFile => "unreadable files",
            DiagnosticKind::SanitizeFailed => "sanitize failures",
            DiagnosticKind::WorkspaceCleanupFailed => "cleanup failures",
        }
    }
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::SampleMissing { .. } => DiagnosticKind::SampleMissing,
            Diagnostic::ExtractionFailed { .. } => DiagnosticKind::ExtractionFailed,
            Diagnostic::UnreadableFile { .. } => DiagnosticKind::UnreadableFile,
            Diagnostic::SanitizeFailed { .. } => DiagnosticKind::SanitizeFailed,
            Diagnostic::WorkspaceCleanupFailed { .. } => DiagnosticKind::WorkspaceCleanupFailed,
        }
    }
}

/// Receives recovered failures
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing`; the subscriber decides where they land
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::SampleMissing { sample } => {
                tracing::info!("File not found: {}", sample.display());
            }
            Diagnostic::ExtractionFailed {
                sample,
                status,
                stderr,
            } => {
                tracing::error!(
                    "Error extracting file {} (status {:?}): {}",
                    sample.display(),
                    status,
                    stderr.trim()
                );
            }
            Diagnostic::UnreadableFile { path, reason } => {
                tracing::error!("Could not scan file {}: {}", path.display(), reason);
            }
            Diagnostic::SanitizeFailed { path, reason } => {
                tracing::warn!("Could not sanitize {}: {}", path.display(), reason);
            }
            Diagnostic::WorkspaceCleanupFailed { workspace, reason } => {
                tracing::warn!("Could not remove workspace {}: {}", workspace.display(), reason);
            }
        }
    }
}

/// Collects diagnostics in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|d| d.kind() == kind).count())
            .unwrap_or(0)
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, diagnostic: Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(diagnostic);
        }
    }
}

/// Counts diagnostics per kind and forwards them to an inner sink
pub struct CountingSink {
    inner: Arc<dyn DiagnosticSink>,
    counts: [AtomicUsize; 5],
}

impl CountingSink {
    pub fn new(inner: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            inner,
            counts: Default::default(),
        }
    }

    pub fn counts(&self) -> HashMap<DiagnosticKind, usize> {
        DiagnosticKind::ALL
            .iter()
            .enumerate()
            .map(|(i, kind)| (*kind, self.counts[i].load(Ordering::Relaxed)))
            .collect()
    }
}

impl DiagnosticSink for CountingSink {
    fn record(&self, diagnostic: Diagnostic) {
        let index = DiagnosticKind::ALL
            .iter()
            .position(|k| *k == diagnostic.kind())
            .unwrap_or(0);
        self.counts[index].fetch_add(1, Ordering::Relaxed);
        self.inner.record(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        sink.record(Diagnostic::SampleMissing {
            sample: PathBuf::from("a"),
        });
        sink.record(Diagnostic::UnreadableFile {
            path: PathBuf::from("b"),
            reason: "denied".to_string(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), DiagnosticKind::SampleMissing);
        assert_eq!(sink.count(DiagnosticKind::UnreadableFile), 1);
        assert_eq!(sink.count(DiagnosticKind::ExtractionFailed), 0);
    }

    #[test]
    fn test_counting_sink_forwards_and_counts() {
        let memory = Arc::new(MemorySink::new());
        let counting = CountingSink::new(memory.clone());

        for _ in 0..3 {
            counting.record(Diagnostic::ExtractionFailed {
                sample: PathBuf::from("x.7z"),
                status: Some(2),
                stderr: "corrupt".to_string(),
            });
        }

        let counts = counting.counts();
        assert_eq!(counts[&DiagnosticKind::ExtractionFailed], 3);
        assert_eq!(counts[&DiagnosticKind::SampleMissing], 0);
        assert_eq!(memory.events().len(), 3);
    }
}
