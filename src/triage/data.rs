//! Data structures flowing through the triage pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A path to be scanned: the original sample or a member discovered in its workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,

    /// Only extracted members are eligible for sanitization
    pub is_extracted_member: bool,
}

impl CandidateFile {
    pub fn original(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            is_extracted_member: false,
        }
    }

    pub fn member(path: PathBuf) -> Self {
        Self {
            path,
            is_extracted_member: true,
        }
    }
}

/// Scalar rule metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// One occurrence of a matched pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInstance {
    /// Byte offset within the scanned file
    pub offset: u64,

    /// Pattern identifier, e.g. `$a`
    pub identifier: String,

    /// Matched bytes as lowercase hex
    pub data: String,
}

impl MatchInstance {
    pub fn new(offset: u64, identifier: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            offset,
            identifier: identifier.into(),
            data: hex::encode(bytes),
        }
    }

    /// Decode `data` back into the raw matched bytes
    pub fn bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.data)
    }
}

/// One matching rule for one scanned file, with every pattern instance it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub rule: String,
    pub tags: Vec<String>,
    pub namespace: String,
    pub meta: BTreeMap<String, MetaValue>,
    pub matches: Vec<MatchInstance>,
}

/// One flattened output row
///
/// Produced once per `MatchDetail` per candidate file. Field names are the
/// contract consumed by the report writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// The sample this record came from
    pub file_path: String,

    /// Basename of the file that was actually scanned
    pub sub_file_basename: String,

    /// Scanned file relative to the sample's workspace (the basename for the sample itself)
    pub sub_file_path: String,

    /// Candidate files discovered for the sample, matched or not
    pub number_of_files: usize,

    pub rule: String,
    pub tags: Vec<String>,
    pub namespace: String,
    pub meta: BTreeMap<String, MetaValue>,
    pub matches: Vec<MatchInstance>,
}

impl ResultRecord {
    pub fn new(
        sample: &Path,
        scanned: &Path,
        relative: &Path,
        number_of_files: usize,
        detail: MatchDetail,
    ) -> Self {
        Self {
            file_path: sample.to_string_lossy().into_owned(),
            sub_file_basename: basename(scanned),
            sub_file_path: relative.to_string_lossy().into_owned(),
            number_of_files,
            rule: detail.rule,
            tags: detail.tags,
            namespace: detail.namespace,
            meta: detail.meta,
            matches: detail.matches,
        }
    }
}

/// Final path segment as a lossy string, empty when there is none
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
