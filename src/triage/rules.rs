//! Rule compilation and per-file matching
//!
//! Every rule-source file under the rules directory is compiled into one
//! `RuleSet`, with the file's basename (extension stripped) as its namespace.
//! Matching results are flattened into `MatchDetail`s, one per matching rule,
//! carrying every instance of every matched pattern.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

use super::data::{MatchDetail, MatchInstance, MetaValue};
use super::diagnostics::{Diagnostic, DiagnosticSink};
use crate::parallel::WorkerPool;

/// Rule set cannot be built; fatal for the whole batch
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("duplicate rule file basename '{key}': {} and {}", .first.display(), .second.display())]
    DuplicateBasename {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("failed to read rule file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile rule file {}: {message}", .path.display())]
    Compile { path: PathBuf, message: String },

    #[error("failed to walk rules directory {}: {message}", .dir.display())]
    Walk { dir: PathBuf, message: String },

    #[error("no rule files ({}) found under {}", .extensions.join(", "), .dir.display())]
    NoRules {
        dir: PathBuf,
        extensions: Vec<String>,
    },
}

/// The engine could not process one file
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot open {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },

    #[error("scan of {} failed: {message}", .path.display())]
    Scan { path: PathBuf, message: String },
}

/// Matches one file against a compiled rule set
pub trait Matcher: Send + Sync {
    fn match_file(&self, path: &Path) -> Result<Vec<MatchDetail>, EngineError>;
}

/// Find rule-source files below `dir`, keyed by basename without extension
///
/// Two files with the same key anywhere in the tree are a configuration error.
pub fn discover_rule_files(
    dir: &Path,
    extensions: &[String],
) -> Result<BTreeMap<String, PathBuf>, RuleError> {
    let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RuleError::Walk {
            dir: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        // Symlinked rule files count; `Path::is_file` follows the link
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let has_rule_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext));
        if !has_rule_extension {
            continue;
        }

        let Some(key) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if let Some(first) = files.get(&key) {
            return Err(RuleError::DuplicateBasename {
                key,
                first: first.clone(),
                second: path.to_path_buf(),
            });
        }
        files.insert(key, path.to_path_buf());
    }

    if files.is_empty() {
        return Err(RuleError::NoRules {
            dir: dir.to_path_buf(),
            extensions: extensions.to_vec(),
        });
    }

    Ok(files)
}

/// Compiled, immutable rules shared read-only by every matching call
pub struct RuleSet {
    rules: yara_x::Rules,
}

impl RuleSet {
    /// Compile every rule file under `dir`
    pub fn compile(dir: &Path, extensions: &[String]) -> Result<Self, RuleError> {
        let sources = discover_rule_files(dir, extensions)?;
        Self::from_sources(sources)
    }

    /// Compile the given files, each into the namespace named by its key
    pub fn from_sources(sources: BTreeMap<String, PathBuf>) -> Result<Self, RuleError> {
        let mut compiler = yara_x::Compiler::new();

        for (key, path) in &sources {
            let source = fs::read_to_string(path).map_err(|source| RuleError::Read {
                path: path.clone(),
                source,
            })?;

            // `include` directives resolve against the including file's directory
            if let Some(parent) = path.parent() {
                compiler.add_include_dir(parent);
            }
            compiler.new_namespace(key);

            let code =
                yara_x::SourceCode::from(source.as_str()).with_origin(path.to_string_lossy());
            compiler.add_source(code).map_err(|e| RuleError::Compile {
                path: path.clone(),
                message: e.to_string(),
            })?;
        }

        let rules = compiler.build();
        tracing::info!("Compiled {} rule files", sources.len());
        Ok(Self { rules })
    }

    /// Match raw bytes; `path` is only used for error reporting
    pub fn match_bytes(&self, path: &Path, data: &[u8]) -> Result<Vec<MatchDetail>, EngineError> {
        let mut scanner = yara_x::Scanner::new(&self.rules);
        let results = scanner.scan(data).map_err(|e| EngineError::Scan {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut details = Vec::new();
        for rule in results.matching_rules() {
            let tags = rule.tags().map(|tag| tag.identifier().to_string()).collect();
            let meta = rule
                .metadata()
                .map(|(key, value)| (key.to_string(), meta_value(value)))
                .collect();

            // A pattern may match the same file many times; keep every instance
            let mut matches = Vec::new();
            for pattern in rule.patterns() {
                let identifier = pattern.identifier();
                for instance in pattern.matches() {
                    matches.push(MatchInstance::new(
                        instance.range().start as u64,
                        identifier,
                        instance.data(),
                    ));
                }
            }

            details.push(MatchDetail {
                rule: rule.identifier().to_string(),
                tags,
                namespace: rule.namespace().to_string(),
                meta,
                matches,
            });
        }

        Ok(details)
    }
}

impl Matcher for RuleSet {
    fn match_file(&self, path: &Path) -> Result<Vec<MatchDetail>, EngineError> {
        let data = fs::read(path).map_err(|e| EngineError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.match_bytes(path, &data)
    }
}

#[allow(unreachable_patterns)]
fn meta_value(value: yara_x::MetaValue<'_>) -> MetaValue {
    match value {
        yara_x::MetaValue::Integer(i) => MetaValue::Integer(i),
        yara_x::MetaValue::Float(f) => MetaValue::Float(f),
        yara_x::MetaValue::Bool(b) => MetaValue::Bool(b),
        yara_x::MetaValue::String(s) => MetaValue::String(s.to_string()),
        yara_x::MetaValue::Bytes(b) => MetaValue::String(String::from_utf8_lossy(b).into_owned()),
        other => MetaValue::String(format!("{other:?}")),
    }
}

/// Match one file, converting engine failures into "no matches" plus a diagnostic
pub fn match_file(
    matcher: &dyn Matcher,
    path: &Path,
    diagnostics: &dyn DiagnosticSink,
) -> Vec<MatchDetail> {
    match matcher.match_file(path) {
        Ok(details) => details,
        Err(e) => {
            diagnostics.record(Diagnostic::UnreadableFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            Vec::new()
        }
    }
}

/// Matcher bound to the matching worker pool
#[derive(Clone)]
pub struct RuleMatcher {
    matcher: Arc<dyn Matcher>,
    pool: Arc<WorkerPool>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl RuleMatcher {
    pub fn new(
        matcher: Arc<dyn Matcher>,
        pool: Arc<WorkerPool>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            matcher,
            pool,
            diagnostics,
        }
    }

    /// Match on the worker pool, suspending the calling task until done
    pub async fn match_file_async(&self, path: &Path) -> Vec<MatchDetail> {
        let matcher = self.matcher.clone();
        let diagnostics = self.diagnostics.clone();
        let owned = path.to_path_buf();

        let result = self
            .pool
            .run(move || match_file(matcher.as_ref(), &owned, diagnostics.as_ref()))
            .await;

        match result {
            Ok(details) => details,
            Err(e) => {
                self.diagnostics.record(Diagnostic::UnreadableFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                Vec::new()
            }
        }
    }
}
