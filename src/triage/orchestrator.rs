//! Per-sample pipeline: extract, discover, sanitize, match, clean up
//!
//! ```text
//! Created ──▶ Extracting ──▶ Discovering ──▶ Scanning ──▶ Cleaned
//!    │             │ (failure: continue with the sample alone)  ▲
//!    └─ missing ───┴──────────────────────────────────────────────┘
//! ```
//!
//! Every failure after `Created` is isolated to the file it concerns. The
//! workspace is removed whatever happened before.

use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use super::data::{CandidateFile, ResultRecord, basename};
use super::diagnostics::{Diagnostic, DiagnosticSink};
use super::extract::{ExtractOutcome, Extractor};
use super::rules::RuleMatcher;
use super::sanitize;

const WORKSPACE_PREFIX: &str = "yara-triage-";

/// A candidate ready for matching, with the path reported in its records
struct ScanTarget {
    path: PathBuf,
    relative: PathBuf,
}

/// Drives one sample at a time through the pipeline
///
/// Cheap to clone; all state is shared read-only or owned per call.
#[derive(Clone)]
pub struct ScanOrchestrator {
    extractor: Arc<dyn Extractor>,
    matcher: RuleMatcher,
    extraction_gate: Arc<Semaphore>,
    diagnostics: Arc<dyn DiagnosticSink>,
    workspace_parent: Option<PathBuf>,
}

impl ScanOrchestrator {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        matcher: RuleMatcher,
        extraction_gate: Arc<Semaphore>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            extractor,
            matcher,
            extraction_gate,
            diagnostics,
            workspace_parent: None,
        }
    }

    /// Create workspaces under `dir` instead of the system temp directory
    pub fn with_workspace_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_parent = Some(dir.into());
        self
    }

    /// Scan one sample and every member extracted from it
    ///
    /// Never fails: anything that goes wrong is recorded as a diagnostic and the
    /// affected file contributes no records.
    pub async fn scan_sample(&self, sample: &Path) -> Vec<ResultRecord> {
        // Directories and dangling links are not samples
        if !sample.is_file() {
            self.diagnostics.record(Diagnostic::SampleMissing {
                sample: sample.to_path_buf(),
            });
            return Vec::new();
        }

        let workspace = match self.create_workspace() {
            Ok(workspace) => Some(workspace),
            Err(e) => {
                // Without a workspace nothing can be extracted; the sample itself is still scanned
                self.diagnostics.record(Diagnostic::ExtractionFailed {
                    sample: sample.to_path_buf(),
                    status: None,
                    stderr: format!("failed to create workspace: {e}"),
                });
                None
            }
        };

        if let Some(workspace) = &workspace {
            self.extract(sample, workspace.path()).await;
        }

        let candidates = self.discover(sample, workspace.as_ref().map(TempDir::path));
        let number_of_files = candidates.len();
        tracing::debug!(
            "Discovered {} candidate files for {}",
            number_of_files,
            sample.display()
        );

        let targets = self.prepare(sample, workspace.as_ref().map(TempDir::path), candidates);
        let records = self.scan_targets(sample, targets, number_of_files).await;

        if let Some(workspace) = workspace {
            self.cleanup(workspace);
        }

        tracing::info!(
            "Scanned {}: {} files, {} matches",
            sample.display(),
            number_of_files,
            records.len()
        );
        records
    }

    fn create_workspace(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        match &self.workspace_parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
    }

    async fn extract(&self, sample: &Path, workspace: &Path) {
        let outcome = match self.extraction_gate.acquire().await {
            Ok(_permit) => self.extractor.extract(sample, workspace).await,
            Err(e) => ExtractOutcome::Failed {
                status: None,
                stderr: format!("extraction gate closed: {e}"),
            },
        };

        if let ExtractOutcome::Failed { status, stderr } = outcome {
            self.diagnostics.record(Diagnostic::ExtractionFailed {
                sample: sample.to_path_buf(),
                status,
                stderr,
            });
        }
    }

    /// The sample followed by every regular file in the workspace, sorted by path
    fn discover(&self, sample: &Path, workspace: Option<&Path>) -> Vec<CandidateFile> {
        let mut candidates = vec![CandidateFile::original(sample)];
        let Some(workspace) = workspace else {
            return candidates;
        };

        for entry in WalkDir::new(workspace).min_depth(1).sort_by_file_name() {
            match entry {
                // Symlinks are not followed; a member must not point the scanner
                // outside its workspace
                Ok(entry) if entry.file_type().is_file() => {
                    candidates.push(CandidateFile::member(entry.into_path()));
                }
                Ok(_) => {}
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| workspace.to_path_buf());
                    self.diagnostics.record(Diagnostic::UnreadableFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        candidates
    }

    /// Sanitize unsafe members one at a time, in discovery order
    fn prepare(
        &self,
        sample: &Path,
        workspace: Option<&Path>,
        candidates: Vec<CandidateFile>,
    ) -> Vec<ScanTarget> {
        let mut targets = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let Some(root) = workspace.filter(|_| candidate.is_extracted_member) else {
                targets.push(ScanTarget {
                    relative: PathBuf::from(basename(sample)),
                    path: candidate.path,
                });
                continue;
            };

            let relative = candidate.path.strip_prefix(root).unwrap_or(&candidate.path);
            let path = if sanitize::is_safe_path(relative) {
                candidate.path.clone()
            } else {
                match sanitize::relocate(root, &candidate.path) {
                    Ok(moved) => moved,
                    Err(e) => {
                        self.diagnostics.record(Diagnostic::SanitizeFailed {
                            path: candidate.path.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                }
            };

            let relative = path
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            targets.push(ScanTarget { path, relative });
        }

        targets
    }

    async fn scan_targets(
        &self,
        sample: &Path,
        targets: Vec<ScanTarget>,
        number_of_files: usize,
    ) -> Vec<ResultRecord> {
        let scans = targets.iter().map(|target| self.matcher.match_file_async(&target.path));
        let results = join_all(scans).await;

        targets
            .iter()
            .zip(results)
            .flat_map(|(target, details)| {
                details.into_iter().map(move |detail| {
                    ResultRecord::new(
                        sample,
                        &target.path,
                        &target.relative,
                        number_of_files,
                        detail,
                    )
                })
            })
            .collect()
    }

    fn cleanup(&self, workspace: TempDir) {
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            self.diagnostics.record(Diagnostic::WorkspaceCleanupFailed {
                workspace: path,
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parallel::WorkerPool;
    use crate::triage::data::{MatchDetail, MatchInstance};
    use crate::triage::diagnostics::{DiagnosticKind, MemorySink};
    use crate::triage::rules::{EngineError, Matcher};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Mutex;

    /// Reports every occurrence of a byte marker, like a single-string rule would
    pub(crate) struct MarkerMatcher {
        pub marker: &'static [u8],
        pub seen: Mutex<Vec<PathBuf>>,
        /// Basename the engine refuses to scan
        pub failing: Option<&'static str>,
    }

    impl MarkerMatcher {
        pub(crate) fn new(marker: &'static [u8]) -> Self {
            Self {
                marker,
                seen: Mutex::new(Vec::new()),
                failing: None,
            }
        }

        pub(crate) fn failing_on(mut self, name: &'static str) -> Self {
            self.failing = Some(name);
            self
        }
    }

    impl Matcher for MarkerMatcher {
        fn match_file(&self, path: &Path) -> Result<Vec<MatchDetail>, EngineError> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            if self.failing.is_some_and(|name| path.file_name() == Some(name.as_ref())) {
                return Err(EngineError::Scan {
                    path: path.to_path_buf(),
                    message: "internal engine error".to_string(),
                });
            }
            let data = fs::read(path).map_err(|e| EngineError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

            let matches: Vec<MatchInstance> = data
                .windows(self.marker.len())
                .enumerate()
                .filter(|(_, window)| *window == self.marker)
                .map(|(offset, window)| MatchInstance::new(offset as u64, "$a", window))
                .collect();
            if matches.is_empty() {
                return Ok(Vec::new());
            }

            Ok(vec![MatchDetail {
                rule: "marker".to_string(),
                tags: Vec::new(),
                namespace: "markers".to_string(),
                meta: BTreeMap::new(),
                matches,
            }])
        }
    }

    /// Writes fixed members into the destination, optionally failing afterwards
    pub(crate) struct MemberExtractor {
        pub members: Vec<(PathBuf, Vec<u8>)>,
        pub fail: bool,
    }

    #[async_trait]
    impl Extractor for MemberExtractor {
        async fn extract(&self, _archive: &Path, dest: &Path) -> ExtractOutcome {
            for (relative, content) in &self.members {
                let path = dest.join(relative);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, content).unwrap();
            }
            if self.fail {
                ExtractOutcome::Failed {
                    status: Some(2),
                    stderr: "Can not open the file as archive".to_string(),
                }
            } else {
                ExtractOutcome::Extracted
            }
        }
    }

    fn orchestrator(
        extractor: MemberExtractor,
        matcher: Arc<MarkerMatcher>,
        sink: Arc<MemorySink>,
        workspaces: &Path,
    ) -> ScanOrchestrator {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let rule_matcher = RuleMatcher::new(matcher, pool, sink.clone());
        ScanOrchestrator::new(Arc::new(extractor), rule_matcher, Arc::new(Semaphore::new(1)), sink)
            .with_workspace_parent(workspaces)
    }

    fn sample_with(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_plain_file_match_at_offset() {
        let dir = TempDir::new().unwrap();
        let sample = sample_with(dir.path(), "plain.bin", b"0123456789MALWARE");
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(
            MemberExtractor { members: vec![], fail: true },
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            dir.path(),
        );

        let records = orch.scan_sample(&sample).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sub_file_basename, "plain.bin");
        assert_eq!(records[0].sub_file_path, "plain.bin");
        assert_eq!(records[0].number_of_files, 1);
        assert_eq!(records[0].matches[0].offset, 10);
        assert_eq!(sink.count(DiagnosticKind::ExtractionFailed), 1);
    }

    #[tokio::test]
    async fn test_missing_sample_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let workspaces = dir.path().join("ws");
        fs::create_dir(&workspaces).unwrap();
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(
            MemberExtractor { members: vec![], fail: false },
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            &workspaces,
        );

        let records = orch.scan_sample(&dir.path().join("absent.7z")).await;

        assert!(records.is_empty());
        assert_eq!(sink.count(DiagnosticKind::SampleMissing), 1);
        assert_eq!(fs::read_dir(&workspaces).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_directory_sample_is_missing() {
        let dir = TempDir::new().unwrap();
        let workspaces = dir.path().join("ws");
        fs::create_dir(&workspaces).unwrap();
        let not_a_file = dir.path().join("unpacked");
        fs::create_dir(&not_a_file).unwrap();
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(
            MemberExtractor { members: vec![], fail: false },
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            &workspaces,
        );

        let records = orch.scan_sample(&not_a_file).await;

        assert!(records.is_empty());
        assert_eq!(sink.count(DiagnosticKind::SampleMissing), 1);
        assert_eq!(fs::read_dir(&workspaces).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_members_counted_and_workspace_removed() {
        let dir = TempDir::new().unwrap();
        let workspaces = dir.path().join("ws");
        fs::create_dir(&workspaces).unwrap();
        let sample = sample_with(dir.path(), "bundle.7z", b"not really an archive");
        let sink = Arc::new(MemorySink::new());
        let extractor = MemberExtractor {
            members: vec![
                (PathBuf::from("a/payload.exe"), b"xxMALWARE".to_vec()),
                (PathBuf::from("b/payload.exe"), b"MALWARE".to_vec()),
                (PathBuf::from("readme.txt"), b"clean".to_vec()),
            ],
            fail: false,
        };
        let orch = orchestrator(
            extractor,
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            &workspaces,
        );

        let mut records = orch.scan_sample(&sample).await;
        records.sort_by(|a, b| a.sub_file_path.cmp(&b.sub_file_path));

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.number_of_files == 4));
        assert!(records.iter().all(|r| r.sub_file_basename == "payload.exe"));
        assert_eq!(records[0].sub_file_path, Path::new("a").join("payload.exe").to_string_lossy());
        assert_eq!(records[1].sub_file_path, Path::new("b").join("payload.exe").to_string_lossy());
        assert_eq!(records[0].file_path, sample.to_string_lossy());
        assert!(sink.events().is_empty());
        assert_eq!(fs::read_dir(&workspaces).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_archive_still_scans_partial_members() {
        let dir = TempDir::new().unwrap();
        let sample = sample_with(dir.path(), "broken.zip", b"PK\x03\x04garbage");
        let sink = Arc::new(MemorySink::new());
        let extractor = MemberExtractor {
            members: vec![(PathBuf::from("half.bin"), b"MALWARE".to_vec())],
            fail: true,
        };
        let orch = orchestrator(
            extractor,
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            dir.path(),
        );

        let records = orch.scan_sample(&sample).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sub_file_basename, "half.bin");
        assert_eq!(records[0].number_of_files, 2);
        assert_eq!(sink.count(DiagnosticKind::ExtractionFailed), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unsafe_member_is_relocated_before_scanning() {
        let dir = TempDir::new().unwrap();
        let sample = sample_with(dir.path(), "hostile.7z", b"archive");
        let sink = Arc::new(MemorySink::new());
        let matcher = Arc::new(MarkerMatcher::new(b"MALWARE"));
        let extractor = MemberExtractor {
            members: vec![(PathBuf::from("dir\x01ctl/evil\x07name.bin"), b"MALWARE".to_vec())],
            fail: false,
        };
        let orch = orchestrator(extractor, matcher.clone(), sink.clone(), dir.path());

        let records = orch.scan_sample(&sample).await;

        assert_eq!(records.len(), 1);
        let scanned = &records[0].sub_file_path;
        assert!(scanned.starts_with("dirctl/evil"), "unexpected path {scanned}");
        assert!(scanned.chars().all(|c| !c.is_control()));
        assert_eq!(records[0].sub_file_basename.len(), "evil\x07name.bin".len());

        // matcher only ever saw the sanitized location
        let seen = matcher.seen.lock().unwrap();
        assert!(seen.iter().all(|p| sanitize::is_safe_path(p)));
        assert!(sink.events().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_member_is_relocated() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let sample = sample_with(dir.path(), "latin1.zip", b"archive");
        let sink = Arc::new(MemorySink::new());
        let extractor = MemberExtractor {
            members: vec![(PathBuf::from(OsStr::from_bytes(b"caf\xe9.txt")), b"MALWARE".to_vec())],
            fail: false,
        };
        let orch = orchestrator(
            extractor,
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            dir.path(),
        );

        let records = orch.scan_sample(&sample).await;

        assert_eq!(records.len(), 1);
        assert!(records[0].sub_file_basename.starts_with("caf"));
        assert!(records[0].sub_file_basename.ends_with(".txt"));
        assert!(records[0].sub_file_basename.is_ascii());
    }

    /// `x\x01` sanitizes to `x`, which is already a regular file
    #[cfg(unix)]
    #[tokio::test]
    async fn test_sanitize_failure_leaves_siblings_scanned() {
        let dir = TempDir::new().unwrap();
        let workspaces = dir.path().join("ws");
        fs::create_dir(&workspaces).unwrap();
        let sample = sample_with(dir.path(), "collide.7z", b"archive");
        let sink = Arc::new(MemorySink::new());
        let extractor = MemberExtractor {
            members: vec![
                (PathBuf::from("x"), b"MALWARE".to_vec()),
                (PathBuf::from("x\x01/evil.bin"), b"MALWARE".to_vec()),
                (PathBuf::from("ok.bin"), b"MALWARE".to_vec()),
            ],
            fail: false,
        };
        let orch = orchestrator(
            extractor,
            Arc::new(MarkerMatcher::new(b"MALWARE")),
            sink.clone(),
            &workspaces,
        );

        let mut records = orch.scan_sample(&sample).await;
        records.sort_by(|a, b| a.sub_file_path.cmp(&b.sub_file_path));

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.number_of_files == 4));
        assert_eq!(records[0].sub_file_path, "ok.bin");
        assert_eq!(records[1].sub_file_path, "x");
        assert_eq!(sink.count(DiagnosticKind::SanitizeFailed), 1);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(fs::read_dir(&workspaces).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_leaves_siblings_scanned() {
        let dir = TempDir::new().unwrap();
        let sample = sample_with(dir.path(), "pair.7z", b"archive");
        let sink = Arc::new(MemorySink::new());
        let matcher = Arc::new(MarkerMatcher::new(b"MALWARE").failing_on("bad.bin"));
        let extractor = MemberExtractor {
            members: vec![
                (PathBuf::from("bad.bin"), b"MALWARE".to_vec()),
                (PathBuf::from("good.bin"), b"MALWARE".to_vec()),
            ],
            fail: false,
        };
        let orch = orchestrator(extractor, matcher.clone(), sink.clone(), dir.path());

        let records = orch.scan_sample(&sample).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sub_file_basename, "good.bin");
        assert_eq!(records[0].number_of_files, 3);
        assert_eq!(sink.count(DiagnosticKind::UnreadableFile), 1);
        assert_eq!(matcher.seen.lock().unwrap().len(), 3);
    }
}
