//! Persisted result reports
//!
//! Records are written exactly as the pipeline produced them: a JSON array of
//! record objects, or one record per line.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::ReportFormat;
use crate::triage::ResultRecord;

pub struct ReportGenerator;

impl ReportGenerator {
    /// Render the records in the requested format
    pub fn render(records: &[ResultRecord], format: ReportFormat, pretty: bool) -> Result<String> {
        let content = match format {
            ReportFormat::Json if pretty => serde_json::to_string_pretty(records)?,
            ReportFormat::Json => serde_json::to_string(records)?,
            ReportFormat::Jsonl => {
                let mut lines = String::new();
                for record in records {
                    lines.push_str(&serde_json::to_string(record)?);
                    lines.push('\n');
                }
                lines
            }
        };
        Ok(content)
    }

    /// Write the report to `path`, creating parent directories as needed
    pub fn write_report(
        records: &[ResultRecord],
        path: &Path,
        format: ReportFormat,
        pretty: bool,
    ) -> Result<()> {
        let content = Self::render(records, format, pretty)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory {}", parent.display())
            })?;
        }

        let mut file = fs::File::create(path)
            .with_context(|| format!("Failed to create report {}", path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write report {}", path.display()))?;

        tracing::info!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::{MatchDetail, MatchInstance, MetaValue};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn record(rule: &str) -> ResultRecord {
        let mut meta = BTreeMap::new();
        meta.insert("severity".to_string(), MetaValue::String("high".to_string()));
        ResultRecord::new(
            &PathBuf::from("/samples/a/a"),
            &PathBuf::from("/tmp/ws/inner.exe"),
            &PathBuf::from("inner.exe"),
            3,
            MatchDetail {
                rule: rule.to_string(),
                tags: vec!["trojan".to_string()],
                namespace: "family".to_string(),
                meta,
                matches: vec![MatchInstance::new(10, "$a", b"MALWARE")],
            },
        )
    }

    #[test]
    fn test_json_array_of_records() {
        let content =
            ReportGenerator::render(&[record("one"), record("two")], ReportFormat::Json, false)
                .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        let rows = parsed.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["file_path"], "/samples/a/a");
        assert_eq!(rows[0]["sub_file_basename"], "inner.exe");
        assert_eq!(rows[0]["number_of_files"], 3);
        assert_eq!(rows[1]["rule"], "two");
        assert_eq!(rows[0]["meta"]["severity"], "high");
        assert_eq!(rows[0]["matches"][0]["offset"], 10);
        assert_eq!(rows[0]["matches"][0]["data"], "4d414c57415245");
    }

    #[test]
    fn test_jsonl_one_record_per_line() {
        let content =
            ReportGenerator::render(&[record("one"), record("two")], ReportFormat::Jsonl, false)
                .unwrap();

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: ResultRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.rule, "two");
    }

    #[test]
    fn test_empty_report_is_empty_array() {
        assert_eq!(ReportGenerator::render(&[], ReportFormat::Json, false).unwrap(), "[]");
    }

    #[test]
    fn test_write_report_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/nested/matches.json");

        ReportGenerator::write_report(&[record("one")], &path, ReportFormat::Json, true).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"rule\": \"one\""));
    }
}
