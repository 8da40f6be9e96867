use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::backend::ImportReport;
use crate::data::hash::MARKDOWN_SENTINEL;
use crate::models::{FileType, ResultStatus, StatusCounts};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report CSV: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Aggregate view over stored import reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total: usize,
    pub counts: StatusCounts,
    pub total_size: u64,
    pub file_types: BTreeMap<FileType, usize>,
    /// Message and occurrence count, most frequent first.
    pub error_summary: Vec<(String, usize)>,
    pub warning_summary: Vec<(String, usize)>,
    pub unique_hashes: usize,
    pub duplicate_count: usize,
}

impl ReportStats {
    pub fn from_reports(reports: &[ImportReport]) -> Self {
        let mut file_types = BTreeMap::new();
        let mut errors: HashMap<&str, usize> = HashMap::new();
        let mut warnings: HashMap<&str, usize> = HashMap::new();
        let mut hashes = HashSet::new();
        let mut hashed = 0;

        for r in reports.iter().map(|r| &r.report) {
            *file_types.entry(r.file_type).or_insert(0) += 1;
            for e in &r.errors {
                *errors.entry(e.as_str()).or_insert(0) += 1;
            }
            for w in &r.warnings {
                *warnings.entry(w.as_str()).or_insert(0) += 1;
            }
            if r.hash != MARKDOWN_SENTINEL {
                hashed += 1;
                hashes.insert(r.hash.as_str());
            }
        }

        Self {
            total: reports.len(),
            counts: StatusCounts::tally(reports.iter().map(|r| &r.report.status)),
            total_size: reports.iter().map(|r| r.report.size).sum(),
            file_types,
            error_summary: ranked(errors),
            warning_summary: ranked(warnings),
            unique_hashes: hashes.len(),
            duplicate_count: hashed - hashes.len(),
        }
    }
}

fn ranked(counts: HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(msg, n)| (msg.to_string(), n))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Reports whose file name or hash contains `query` (case-insensitive),
/// optionally limited to one status, newest first.
pub fn filter_reports(
    reports: &[ImportReport],
    query: &str,
    status: Option<ResultStatus>,
) -> Vec<ImportReport> {
    let query = query.trim().to_lowercase();
    let mut matched: Vec<ImportReport> = reports
        .iter()
        .filter(|r| status.map_or(true, |s| r.report.status == s))
        .filter(|r| {
            query.is_empty()
                || r.report.file_name.to_lowercase().contains(&query)
                || r.report.hash.to_lowercase().contains(&query)
        })
        .cloned()
        .collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matched
}

const CSV_HEADER: [&str; 9] = [
    "id",
    "created_at",
    "file_name",
    "file_type",
    "size",
    "hash",
    "status",
    "errors",
    "warnings",
];

/// Write reports as CSV via a temp file + rename. Multi-valued columns are
/// joined with `; `.
pub fn write_reports_csv(path: &Path, reports: &[ImportReport]) -> Result<(), ReportError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let mut writer = csv::WriterBuilder::new().from_path(&temp_path)?;
    writer.write_record(CSV_HEADER)?;
    for r in reports {
        writer.write_record(&[
            r.id.clone(),
            r.created_at.to_rfc3339(),
            r.report.file_name.clone(),
            r.report.file_type.to_string(),
            r.report.size.to_string(),
            r.report.hash.clone(),
            r.report.status.to_string(),
            r.report.errors.join("; "),
            r.report.warnings.join("; "),
        ])?;
    }
    writer.flush()?;
    drop(writer);

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NewImportReport;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn report(
        id: &str,
        name: &str,
        file_type: FileType,
        hash: &str,
        errors: &[&str],
        warnings: &[&str],
        age_minutes: i64,
    ) -> ImportReport {
        let errors: Vec<String> = errors.iter().map(|s| s.to_string()).collect();
        let warnings: Vec<String> = warnings.iter().map(|s| s.to_string()).collect();
        ImportReport {
            id: id.to_string(),
            report: NewImportReport {
                file_name: name.to_string(),
                file_type,
                size: 10,
                hash: hash.to_string(),
                status: ResultStatus::derive(&errors, &warnings),
                errors,
                warnings,
                extracted_fields: vec![],
                code_blocks: vec![],
                canonical_content: String::new(),
            },
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    fn sample() -> Vec<ImportReport> {
        vec![
            report("1", "nda.json", FileType::Json, "aaa", &[], &[], 30),
            report("2", "NDA-copy.json", FileType::Json, "aaa", &[], &["Duplicate"], 20),
            report("3", "broken.json", FileType::Json, "bbb", &["JSON validation error: x"], &[], 10),
            report("4", "guide.md", FileType::Markdown, MARKDOWN_SENTINEL, &[], &["Guidance", "Duplicate"], 5),
            report("5", "other.md", FileType::Markdown, MARKDOWN_SENTINEL, &[], &["Guidance"], 1),
        ]
    }

    #[test]
    fn test_stats() {
        let stats = ReportStats::from_reports(&sample());
        assert_eq!(stats.total, 5);
        assert_eq!(stats.counts.success, 1);
        assert_eq!(stats.counts.warning, 3);
        assert_eq!(stats.counts.error, 1);
        assert_eq!(stats.total_size, 50);
        assert_eq!(stats.file_types[&FileType::Json], 3);
        assert_eq!(stats.file_types[&FileType::Markdown], 2);
        assert_eq!(
            stats.warning_summary,
            vec![("Duplicate".to_string(), 2), ("Guidance".to_string(), 2)]
        );
        assert_eq!(stats.error_summary.len(), 1);
        assert_eq!(stats.unique_hashes, 2);
        assert_eq!(stats.duplicate_count, 1);
    }

    #[test]
    fn test_stats_empty() {
        assert_eq!(ReportStats::from_reports(&[]), ReportStats::default());
    }

    #[test]
    fn test_filter_by_query_and_status() {
        let reports = sample();

        let nda: Vec<String> = filter_reports(&reports, "nda", None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(nda, vec!["2", "1"]);

        let by_hash = filter_reports(&reports, "BBB", None);
        assert_eq!(by_hash.len(), 1);
        assert_eq!(by_hash[0].id, "3");

        let warnings: Vec<String> = filter_reports(&reports, "", Some(ResultStatus::Warning))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(warnings, vec!["5", "4", "2"]);
    }

    #[test]
    fn test_write_reports_csv() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("reports.csv");
        write_reports_csv(&path, &sample()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[3][2], "guide.md");
        assert_eq!(&rows[3][8], "Guidance; Duplicate");
        assert!(!tmp.path().join("out").join(".reports.csv.tmp").exists());
    }
}
