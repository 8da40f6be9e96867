use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "templar.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read templar.yaml: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse templar.yaml: {0}")]
    Yaml(#[from] serde_yml::Error),
}

/// Import limits and defaults, read from `templar.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    /// Largest accepted `.zip` upload, in bytes.
    pub max_archive_bytes: u64,
    /// Largest accepted individually selected file, in bytes.
    pub max_file_bytes: u64,
    pub default_category: String,
    pub preview_image: String,
    /// Where the JSON store lives. Falls back to the user data directory.
    pub store_path: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: 100 * 1024 * 1024,
            max_file_bytes: 50 * 1024 * 1024,
            default_category: "Legal".to_string(),
            preview_image: "/assets/generated/tree-structure-form-generator.dim_600x500.png"
                .to_string(),
            store_path: None,
        }
    }
}

impl ImportConfig {
    /// Resolved store location: the configured path, else `<data dir>/templar/store.json`.
    pub fn resolved_store_path(&self) -> Option<PathBuf> {
        self.store_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("templar").join("store.json")))
    }
}

/// Load `templar.yaml` from `dir`. A missing file yields the defaults.
pub fn load_config(dir: &Path) -> Result<ImportConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return Ok(ImportConfig::default());
    }
    load_config_file(&config_path)
}

/// Load an explicit config file.
pub fn load_config_file(path: &Path) -> Result<ImportConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: ImportConfig = serde_yml::from_str(&content)?;
    Ok(config)
}
