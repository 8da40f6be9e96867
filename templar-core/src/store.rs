use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::{
    BackendError, ImportReport, NewDetailsTab, NewImportReport, NewTemplate, TemplateBackend,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read/write store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse store JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("no backup with id {0}")]
    UnknownBackup(String),
    #[error("backup snapshot {} is missing", .0.display())]
    MissingSnapshot(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTemplate {
    pub id: String,
    pub name: String,
    pub fields: Vec<String>,
    pub content: String,
    pub category: String,
    pub size: u64,
    pub format: String,
    pub preview_image: String,
    /// Hex of the uploaded bytes.
    pub file_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_structure: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDetailsTab {
    pub id: String,
    pub template_id: String,
    pub markdown_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub id: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the store persists, as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    #[serde(default)]
    pub import_reports: Vec<ImportReport>,
    #[serde(default)]
    pub templates: Vec<StoredTemplate>,
    #[serde(default)]
    pub details_tabs: Vec<StoredDetailsTab>,
    #[serde(default)]
    pub backups: Vec<BackupEntry>,
}

impl StoreData {
    /// Load from disk. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write via a temp file in the same directory, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let parent = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        let temp_path = parent.join(format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        std::fs::write(&temp_path, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// A [`TemplateBackend`] persisted to a single JSON file. Backups are full
/// copies written to `backups/` next to the store file.
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let data = StoreData::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Apply `change` and persist; the in-memory state is only kept if the
    /// write succeeds.
    fn commit<T>(&self, change: impl FnOnce(&mut StoreData) -> T) -> Result<T, StoreError> {
        let mut data = self.lock()?;
        let mut next = data.clone();
        let out = change(&mut next);
        next.save(&self.path)?;
        *data = next;
        Ok(out)
    }

    pub fn import_reports(&self) -> Result<Vec<ImportReport>, StoreError> {
        Ok(self.lock()?.import_reports.clone())
    }

    pub fn templates(&self) -> Result<Vec<StoredTemplate>, StoreError> {
        Ok(self.lock()?.templates.clone())
    }

    pub fn details_tabs(&self) -> Result<Vec<StoredDetailsTab>, StoreError> {
        Ok(self.lock()?.details_tabs.clone())
    }

    pub fn backups(&self) -> Result<Vec<BackupEntry>, StoreError> {
        Ok(self.lock()?.backups.clone())
    }

    /// Replace reports, templates and details tabs with the contents of a
    /// backup snapshot. The backup list itself is kept, so later backups
    /// stay restorable.
    pub fn restore_backup(&self, id: &str) -> Result<BackupEntry, StoreError> {
        let entry = self
            .lock()?
            .backups
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownBackup(id.to_string()))?;

        let snapshot_path = PathBuf::from(&entry.path);
        if !snapshot_path.exists() {
            return Err(StoreError::MissingSnapshot(snapshot_path));
        }
        let snapshot = StoreData::load(&snapshot_path)?;
        self.commit(|data| {
            data.import_reports = snapshot.import_reports;
            data.templates = snapshot.templates;
            data.details_tabs = snapshot.details_tabs;
        })?;
        tracing::info!("Restored backup {} from {}", id, snapshot_path.display());
        Ok(entry)
    }

    fn backups_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or(Path::new("."))
            .join("backups")
    }
}

#[async_trait]
impl TemplateBackend for JsonStore {
    async fn create_import_report(&self, report: &NewImportReport) -> Result<String, BackendError> {
        let id = Uuid::new_v4().to_string();
        let record = ImportReport::new(id.clone(), report);
        self.commit(|data| data.import_reports.push(record))?;
        Ok(id)
    }

    async fn create_template(&self, template: &NewTemplate) -> Result<String, BackendError> {
        let id = Uuid::new_v4().to_string();
        let record = StoredTemplate {
            id: id.clone(),
            name: template.name.clone(),
            fields: template.fields.clone(),
            content: template.content.clone(),
            category: template.category.clone(),
            size: template.size,
            format: template.format.clone(),
            preview_image: template.preview_image.clone(),
            file_reference: hex::encode(&template.file_reference),
            dynamic_structure: template.dynamic_structure.clone(),
            created_at: Utc::now(),
        };
        self.commit(|data| data.templates.push(record))?;
        Ok(id)
    }

    async fn create_template_details_tab(&self, tab: &NewDetailsTab) -> Result<String, BackendError> {
        let known = self
            .lock()?
            .templates
            .iter()
            .any(|t| t.id == tab.template_id);
        if !known {
            return Err(BackendError::UnknownTemplate(tab.template_id.clone()));
        }

        let id = Uuid::new_v4().to_string();
        let record = StoredDetailsTab {
            id: id.clone(),
            template_id: tab.template_id.clone(),
            markdown_content: tab.markdown_content.clone(),
            preview_image: tab.preview_image.clone(),
            file_reference: tab.file_reference.as_ref().map(hex::encode),
            created_at: Utc::now(),
        };
        self.commit(|data| data.details_tabs.push(record))?;
        Ok(id)
    }

    async fn create_backup(&self) -> Result<String, BackendError> {
        let id = Uuid::new_v4().to_string();
        let backup_path = self.backups_dir().join(format!("{id}.json"));
        let snapshot = self.lock()?.clone();
        snapshot.save(&backup_path)?;
        tracing::info!("Backup {} written to {}", id, backup_path.display());

        let entry = BackupEntry {
            id: id.clone(),
            path: backup_path.to_string_lossy().to_string(),
            created_at: Utc::now(),
        };
        self.commit(|data| data.backups.push(entry))?;
        Ok(id)
    }
}
