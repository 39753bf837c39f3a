//! Bulk sample triage: extract, sanitize, match, aggregate
//!
//! Components, leaves first:
//!
//! - [`sanitize`]: filesystem-safe names for untrusted archive members
//! - [`extract`]: the external extraction tool behind the [`Extractor`] trait
//! - [`rules`]: rule compilation and per-file matching
//! - [`orchestrator`]: the per-sample state machine
//! - [`batch`]: fan-out across samples under the extraction admission limit
//!
//! Recovered failures go to a [`DiagnosticSink`]; only rule configuration errors
//! abort a batch.

pub mod batch;
pub mod data;
pub mod diagnostics;
pub mod extract;
pub mod orchestrator;
pub mod rules;
pub mod samples;
pub mod sanitize;

pub use batch::{BatchLimits, BatchOutcome, BatchRunner, BatchSummary, ProgressObserver};
pub use data::{CandidateFile, MatchDetail, MatchInstance, MetaValue, ResultRecord};
pub use diagnostics::{
    CountingSink, Diagnostic, DiagnosticKind, DiagnosticSink, MemorySink, TracingSink,
};
pub use extract::{CommandExtractor, ExtractOutcome, Extractor};
pub use orchestrator::ScanOrchestrator;
pub use rules::{EngineError, Matcher, RuleError, RuleMatcher, RuleSet};
pub use samples::collect_samples;
