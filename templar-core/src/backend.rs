use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{FileType, ProcessingResult, ResultStatus};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend rejected {call}: {message}")]
    Rejected { call: &'static str, message: String },
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Arguments of `create_import_report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImportReport {
    pub file_name: String,
    pub file_type: FileType,
    pub size: u64,
    pub hash: String,
    pub status: ResultStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub extracted_fields: Vec<String>,
    pub code_blocks: Vec<String>,
    pub canonical_content: String,
}

impl From<&ProcessingResult> for NewImportReport {
    fn from(result: &ProcessingResult) -> Self {
        Self {
            file_name: result.file_name.clone(),
            file_type: result.file_type,
            size: result.byte_size as u64,
            hash: result.content_hash.clone(),
            status: result.status,
            errors: result.errors.clone(),
            warnings: result.warnings.clone(),
            extracted_fields: result.extracted_field_names.clone(),
            code_blocks: result.code_blocks.clone(),
            canonical_content: result.canonical_content.clone(),
        }
    }
}

/// A persisted import report as the backend returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub id: String,
    #[serde(flatten)]
    pub report: NewImportReport,
    pub created_at: DateTime<Utc>,
}

impl ImportReport {
    pub fn new(id: String, report: &NewImportReport) -> Self {
        Self {
            id,
            report: report.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Arguments of `create_template`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTemplate {
    pub name: String,
    /// Flattened field names, parents before children.
    pub fields: Vec<String>,
    pub content: String,
    pub category: String,
    pub size: u64,
    pub format: String,
    pub preview_image: String,
    pub file_reference: Vec<u8>,
    /// JSON `{"isParsed": bool, "fields": [...]}` describing the form tree.
    pub dynamic_structure: Option<String>,
}

/// Arguments of `create_template_details_tab`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDetailsTab {
    pub template_id: String,
    pub markdown_content: String,
    pub preview_image: Option<String>,
    pub file_reference: Option<Vec<u8>>,
}

/// The remote actor surface the import pipeline submits to.
#[async_trait]
pub trait TemplateBackend: Send + Sync {
    async fn create_import_report(&self, report: &NewImportReport) -> Result<String, BackendError>;

    async fn create_template(&self, template: &NewTemplate) -> Result<String, BackendError>;

    async fn create_template_details_tab(&self, tab: &NewDetailsTab) -> Result<String, BackendError>;

    /// Snapshot current state before a save so it can be rolled back.
    async fn create_backup(&self) -> Result<String, BackendError>;
}

/// In-process backend that keeps every submission in memory.
pub struct MemoryBackend {
    next_id: AtomicUsize,
    reports: DashMap<String, ImportReport>,
    templates: DashMap<String, NewTemplate>,
    details_tabs: DashMap<String, NewDetailsTab>,
    backups: DashMap<String, DateTime<Utc>>,
    rejected_templates: DashSet<String>,
    reject_backups: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            reports: DashMap::new(),
            templates: DashMap::new(),
            details_tabs: DashMap::new(),
            backups: DashMap::new(),
            rejected_templates: DashSet::new(),
            reject_backups: AtomicBool::new(false),
        }
    }

    /// Ids sort in creation order.
    fn next_id(&self, kind: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{kind}-{n:08}")
    }

    /// Make `create_template` fail for templates with this name.
    pub fn reject_template(&self, name: &str) {
        self.rejected_templates.insert(name.to_string());
    }

    /// Make `create_backup` fail.
    pub fn reject_backups(&self, reject: bool) {
        self.reject_backups.store(reject, Ordering::SeqCst);
    }

    pub fn import_reports(&self) -> Vec<ImportReport> {
        let mut reports: Vec<ImportReport> =
            self.reports.iter().map(|r| r.value().clone()).collect();
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        reports
    }

    /// Templates as `(id, template)` in creation order.
    pub fn templates(&self) -> Vec<(String, NewTemplate)> {
        let mut templates: Vec<(String, NewTemplate)> = self
            .templates
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        templates.sort_by(|a, b| a.0.cmp(&b.0));
        templates
    }

    pub fn details_tab_for(&self, template_id: &str) -> Option<NewDetailsTab> {
        self.details_tabs
            .iter()
            .find(|r| r.value().template_id == template_id)
            .map(|r| r.value().clone())
    }

    pub fn details_tab_count(&self) -> usize {
        self.details_tabs.len()
    }

    pub fn backup_count(&self) -> usize {
        self.backups.len()
    }
}

#[async_trait]
impl TemplateBackend for MemoryBackend {
    async fn create_import_report(&self, report: &NewImportReport) -> Result<String, BackendError> {
        let id = self.next_id("report");
        self.reports
            .insert(id.clone(), ImportReport::new(id.clone(), report));
        Ok(id)
    }

    async fn create_template(&self, template: &NewTemplate) -> Result<String, BackendError> {
        if self.rejected_templates.contains(&template.name) {
            return Err(BackendError::Rejected {
                call: "createTemplate",
                message: format!("template '{}' refused", template.name),
            });
        }
        let id = self.next_id("template");
        self.templates.insert(id.clone(), template.clone());
        Ok(id)
    }

    async fn create_template_details_tab(&self, tab: &NewDetailsTab) -> Result<String, BackendError> {
        if !self.templates.contains_key(&tab.template_id) {
            return Err(BackendError::UnknownTemplate(tab.template_id.clone()));
        }
        let id = self.next_id("tab");
        self.details_tabs.insert(id.clone(), tab.clone());
        Ok(id)
    }

    async fn create_backup(&self) -> Result<String, BackendError> {
        if self.reject_backups.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                call: "createBackup",
                message: "backups are unavailable".to_string(),
            });
        }
        let id = self.next_id("backup");
        self.backups.insert(id.clone(), Utc::now());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report(name: &str) -> NewImportReport {
        NewImportReport {
            file_name: name.to_string(),
            file_type: FileType::Json,
            size: 2,
            hash: "0".repeat(64),
            status: ResultStatus::Success,
            errors: vec![],
            warnings: vec![],
            extracted_fields: vec![],
            code_blocks: vec![],
            canonical_content: "{}".to_string(),
        }
    }

    fn sample_template(name: &str) -> NewTemplate {
        NewTemplate {
            name: name.to_string(),
            fields: vec![],
            content: "{}".to_string(),
            category: "Legal".to_string(),
            size: 2,
            format: "json".to_string(),
            preview_image: String::new(),
            file_reference: b"{}".to_vec(),
            dynamic_structure: None,
        }
    }

    #[tokio::test]
    async fn test_reports_listed_in_creation_order() {
        let backend = MemoryBackend::new();
        for name in ["c.json", "a.json", "b.json"] {
            backend.create_import_report(&sample_report(name)).await.unwrap();
        }
        let names: Vec<String> = backend
            .import_reports()
            .into_iter()
            .map(|r| r.report.file_name)
            .collect();
        assert_eq!(names, vec!["c.json", "a.json", "b.json"]);
    }

    #[tokio::test]
    async fn test_details_tab_requires_known_template() {
        let backend = MemoryBackend::new();
        let tab = NewDetailsTab {
            template_id: "template-missing".to_string(),
            markdown_content: "# hi".to_string(),
            preview_image: None,
            file_reference: None,
        };
        assert!(matches!(
            backend.create_template_details_tab(&tab).await,
            Err(BackendError::UnknownTemplate(_))
        ));

        let id = backend.create_template(&sample_template("Lease")).await.unwrap();
        let tab = NewDetailsTab { template_id: id.clone(), ..tab };
        backend.create_template_details_tab(&tab).await.unwrap();
        assert_eq!(backend.details_tab_for(&id).unwrap().markdown_content, "# hi");
    }

    #[tokio::test]
    async fn test_rejections() {
        let backend = MemoryBackend::new();
        backend.reject_template("Bad");
        assert!(backend.create_template(&sample_template("Bad")).await.is_err());
        assert!(backend.create_template(&sample_template("Good")).await.is_ok());

        backend.reject_backups(true);
        assert!(backend.create_backup().await.is_err());
        backend.reject_backups(false);
        assert!(backend.create_backup().await.is_ok());
        assert_eq!(backend.backup_count(), 1);
    }

    #[test]
    fn test_import_report_serializes_flat() {
        let report = ImportReport::new("r1".to_string(), &sample_report("nda.json"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["fileName"], "nda.json");
        assert_eq!(json["fileType"], "json");
        assert_eq!(json["status"], "success");
        let back: ImportReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
