//! Archive extraction through an external tool

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ExtractorConfig;

const ARCHIVE_PLACEHOLDER: &str = "{archive}";
const DEST_PLACEHOLDER: &str = "{dest}";

/// Result of one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted,
    /// Non-zero exit, signal, or the tool could not be started
    Failed {
        status: Option<i32>,
        stderr: String,
    },
}

impl ExtractOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractOutcome::Extracted)
    }
}

/// Unpacks one archive into a destination directory
///
/// Implementations must not fail the caller: anything that goes wrong is
/// reported through `ExtractOutcome::Failed` so the sample is still scanned
/// as a plain file.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, archive: &Path, dest: &Path) -> ExtractOutcome;
}

/// Runs an external program such as `7z x <archive> -o<dest> -y`
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: OsString,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<OsString>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(&config.program, config.args.clone())
    }

    /// Expand the argument template for one call
    pub fn build_args(&self, archive: &Path, dest: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|template| substitute(template, archive.as_os_str(), dest.as_os_str()))
            .collect()
    }
}

/// Replace every placeholder in `template`, keeping non-UTF-8 paths intact
fn substitute(template: &str, archive: &OsStr, dest: &OsStr) -> OsString {
    let mut result = OsString::new();
    let mut rest = template;

    loop {
        let next = [(ARCHIVE_PLACEHOLDER, archive), (DEST_PLACEHOLDER, dest)]
            .into_iter()
            .filter_map(|(placeholder, value)| {
                rest.find(placeholder).map(|at| (at, placeholder, value))
            })
            .min_by_key(|(at, _, _)| *at);

        match next {
            Some((at, placeholder, value)) => {
                result.push(&rest[..at]);
                result.push(value);
                rest = &rest[at + placeholder.len()..];
            }
            None => {
                result.push(rest);
                return result;
            }
        }
    }
}

#[async_trait]
impl Extractor for CommandExtractor {
    async fn extract(&self, archive: &Path, dest: &Path) -> ExtractOutcome {
        let args = self.build_args(archive, dest);
        tracing::debug!("Extracting {} into {}", archive.display(), dest.display());

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => ExtractOutcome::Extracted,
            Ok(output) => ExtractOutcome::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => ExtractOutcome::Failed {
                status: None,
                stderr: format!("failed to run {}: {e}", self.program.to_string_lossy()),
            },
        }
    }
}
