//! One upload session: process a batch, let the operator review it, save it.
//!
//! The session is an explicit state machine:
//!
//! ```text
//! Idle -> Processing -> Ready -> Saving -> Done
//!              |                   |
//!              +------> Failed <---+
//! ```
//!
//! All methods take `&self`, so a session can be shared behind an `Arc` and
//! driven from several tasks. A second `process` or `save` that arrives while
//! either is in flight is rejected with [`SessionError::Busy`], never queued.
//! The state lock is only held between awaits.

use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::{BackendError, NewImportReport, TemplateBackend};
use crate::config::ImportConfig;
use crate::data::archive::{read_archive, ArchiveError};
use crate::data::hash::{hash_content, ContentHasher, Sha256Hasher};
use crate::data::matcher::match_files;
use crate::models::{ParsedTemplate, ProcessingResult, RawEntry, ResultStatus, StatusCounts};
use crate::pipeline::{build_templates, details_tab, new_template, BatchProcessor};

/// Synthetic file name given to pasted content.
pub const PASTED_FILE_NAME: &str = "pasted-content.json";
const ACCEPTED_FILE_EXTENSIONS: [&str; 3] = ["json", "md", "txt"];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Please wait for the current operation to complete")]
    Busy,
    #[error("nothing to save: session is {0}")]
    NotReady(SessionState),
    #[error("{0} file(s) have errors; resolve them before saving")]
    UnresolvedErrors(usize),
    #[error("archive is {size} bytes, limit is {limit}")]
    ArchiveTooLarge { size: u64, limit: u64 },
    #[error("failed to read archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("No files found in ZIP archive. Please ensure files are stored (not compressed) or use a standard ZIP format.")]
    EmptyArchive,
    #[error("Please provide content to process.")]
    NoContent,
    #[error("no acceptable files selected ({0} rejected)")]
    NoAcceptedFiles(usize),
    #[error("{call} failed: {source}")]
    Backend {
        call: &'static str,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Processing,
    Ready,
    Saving,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Processing | SessionState::Saving)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Processing => "processing",
            SessionState::Ready => "ready",
            SessionState::Saving => "saving",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the operator handed over.
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// A `.zip` with stored entries.
    Archive(Vec<u8>),
    /// Individually selected files as `(name, bytes)`.
    Files(Vec<(String, Vec<u8>)>),
    /// Text typed or pasted in; treated as one JSON file.
    Pasted(String),
}

/// A selected file that was not processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedFile {
    pub file_name: String,
    pub reason: String,
}

/// Everything a finished `process` produced, for review.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub results: Vec<ProcessingResult>,
    pub templates: Vec<ParsedTemplate>,
    pub unmatched: Vec<String>,
    pub rejected: Vec<RejectedFile>,
    pub skipped_compressed: Vec<String>,
    /// Digest of the uploaded archive itself.
    pub archive_hash: Option<String>,
    pub duplicate_hashes: Vec<String>,
    pub counts: StatusCounts,
}

impl ProcessOutcome {
    pub fn error_count(&self) -> usize {
        self.counts.error
    }
}

/// Ids created by a `save`, plus the failures that did not stop it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub backup_id: String,
    pub report_ids: Vec<String>,
    pub template_ids: Vec<String>,
    pub details_tab_ids: Vec<String>,
    pub errors: Vec<String>,
}

struct Inner {
    state: SessionState,
    outcome: Option<ProcessOutcome>,
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks a busy state for the length of one `process` or `save` call.
///
/// If the call's future is dropped before [`InFlight::finish`] runs, the
/// session moves to Failed so it can be reset. An abandoned save keeps its
/// reviewed outcome; an abandoned process has none.
struct InFlight<'a> {
    inner: &'a Mutex<Inner>,
    busy: SessionState,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(inner: &'a Mutex<Inner>, busy: SessionState) -> Self {
        Self {
            inner,
            busy,
            done: false,
        }
    }

    fn finish(mut self, state: SessionState, outcome: Option<ProcessOutcome>) {
        let mut inner = lock_inner(self.inner);
        inner.state = state;
        inner.outcome = outcome;
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = lock_inner(self.inner);
        if inner.state != self.busy {
            return;
        }
        warn!("{} abandoned before it finished", self.busy);
        inner.state = SessionState::Failed;
        if self.busy == SessionState::Processing {
            inner.outcome = None;
        }
    }
}

pub struct ImportSession<B: TemplateBackend> {
    backend: Arc<B>,
    hasher: Arc<dyn ContentHasher>,
    config: ImportConfig,
    inner: Mutex<Inner>,
    progress: watch::Sender<u8>,
}

impl<B: TemplateBackend> ImportSession<B> {
    pub fn new(backend: Arc<B>, config: ImportConfig) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            backend,
            hasher: Arc::new(Sha256Hasher),
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                outcome: None,
            }),
            progress,
        }
    }

    /// Use a different digest capability.
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Percent complete of the current `process`, 0 to 100.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// The last successful `process` result, while it is still current.
    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.lock().outcome.clone()
    }

    /// Edit a reviewed template in place. Only allowed while Ready.
    pub fn edit_template<T>(
        &self,
        index: usize,
        edit: impl FnOnce(&mut ParsedTemplate) -> T,
    ) -> Result<Option<T>, SessionError> {
        let mut inner = self.lock();
        if inner.state.is_busy() {
            return Err(SessionError::Busy);
        }
        if inner.state != SessionState::Ready {
            return Err(SessionError::NotReady(inner.state));
        }
        Ok(inner
            .outcome
            .as_mut()
            .and_then(|o| o.templates.get_mut(index))
            .map(edit))
    }

    /// Return to Idle, dropping any processed batch.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state.is_busy() {
            return Err(SessionError::Busy);
        }
        inner.state = SessionState::Idle;
        inner.outcome = None;
        self.progress.send_replace(0);
        Ok(())
    }

    /// Run a batch through the pipeline. Per-file failures land in the
    /// results; only batch-level failures return an error.
    pub async fn process(&self, source: ImportSource) -> Result<ProcessOutcome, SessionError> {
        {
            let mut inner = self.lock();
            if inner.state.is_busy() {
                warn!("process rejected: session is {}", inner.state);
                return Err(SessionError::Busy);
            }
            inner.state = SessionState::Processing;
            inner.outcome = None;
        }
        let flight = InFlight::new(&self.inner, SessionState::Processing);
        self.progress.send_replace(0);

        match self.run(source).await {
            Ok(outcome) => {
                flight.finish(SessionState::Ready, Some(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => {
                warn!("batch failed: {}", e);
                flight.finish(SessionState::Failed, None);
                Err(e)
            }
        }
    }

    async fn run(&self, source: ImportSource) -> Result<ProcessOutcome, SessionError> {
        let mut outcome = ProcessOutcome::default();
        let entries = self.collect_entries(source, &mut outcome)?;
        self.progress.send_replace(20);

        let matched = match_files(&entries);
        outcome.unmatched = matched.unmatched;

        let total = entries.len();
        let mut processor = BatchProcessor::new(self.hasher.as_ref());
        for (processed, (name, content)) in entries.iter().enumerate() {
            let entry = RawEntry::new(name.clone(), content.clone());
            if entry.file_type().is_template_source() {
                outcome.results.push(processor.process(&entry));
            }
            self.progress
                .send_replace((20 + (processed + 1) * 70 / total) as u8);
            tokio::task::yield_now().await;
        }
        outcome.duplicate_hashes = processor.into_duplicates();

        outcome.templates = build_templates(&matched.bundles, &self.config);
        outcome.counts = StatusCounts::tally(outcome.results.iter().map(|r| &r.status));
        self.progress.send_replace(100);

        info!(
            "Processed {} files: {} success, {} warnings, {} errors",
            outcome.results.len(),
            outcome.counts.success,
            outcome.counts.warning,
            outcome.counts.error
        );
        Ok(outcome)
    }

    /// Turn the source into named text entries, in upload order.
    fn collect_entries(
        &self,
        source: ImportSource,
        outcome: &mut ProcessOutcome,
    ) -> Result<IndexMap<String, String>, SessionError> {
        match source {
            ImportSource::Archive(bytes) => {
                let size = bytes.len() as u64;
                if size > self.config.max_archive_bytes {
                    return Err(SessionError::ArchiveTooLarge {
                        size,
                        limit: self.config.max_archive_bytes,
                    });
                }
                outcome.archive_hash =
                    Some(hash_content(self.hasher.as_ref(), &bytes).into_string());
                self.progress.send_replace(5);

                let contents = read_archive(&bytes)?;
                self.progress.send_replace(10);
                outcome.skipped_compressed = contents.skipped_compressed;
                if contents.entries.is_empty() {
                    return Err(SessionError::EmptyArchive);
                }
                info!("Extracted {} files from ZIP archive", contents.entries.len());
                Ok(contents.entries)
            }
            ImportSource::Files(files) => {
                let mut entries = IndexMap::new();
                for (name, bytes) in files {
                    match self.check_file(&name, bytes.len() as u64) {
                        Some(reason) => {
                            warn!("rejected {}: {}", name, reason);
                            outcome.rejected.push(RejectedFile {
                                file_name: name,
                                reason,
                            });
                        }
                        None => {
                            let entry = RawEntry::from_bytes(name, &bytes);
                            entries.insert(entry.name, entry.content);
                        }
                    }
                }
                if entries.is_empty() {
                    return Err(SessionError::NoAcceptedFiles(outcome.rejected.len()));
                }
                Ok(entries)
            }
            ImportSource::Pasted(text) => {
                if text.trim().is_empty() {
                    return Err(SessionError::NoContent);
                }
                Ok(IndexMap::from([(PASTED_FILE_NAME.to_string(), text)]))
            }
        }
    }

    fn check_file(&self, name: &str, size: u64) -> Option<String> {
        let lower = name.to_lowercase();
        let accepted = ACCEPTED_FILE_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")));
        if !accepted {
            return Some("Only .json, .md and .txt files are supported".to_string());
        }
        if size > self.config.max_file_bytes {
            return Some(format!(
                "File exceeds the {} MB limit",
                self.config.max_file_bytes / (1024 * 1024)
            ));
        }
        None
    }

    /// Submit the reviewed batch: one backup, one report per result, then
    /// each template and its details tab.
    ///
    /// A failure inside one template skips that template's remaining calls
    /// and is collected in [`SaveSummary::errors`]; the rest still go out.
    pub async fn save(&self) -> Result<SaveSummary, SessionError> {
        let outcome = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Processing | SessionState::Saving => {
                    warn!("save rejected: session is {}", inner.state);
                    return Err(SessionError::Busy);
                }
                SessionState::Ready => {}
                other => return Err(SessionError::NotReady(other)),
            }
            let outcome = inner.outcome.clone().unwrap_or_default();
            let errors = outcome
                .results
                .iter()
                .filter(|r| r.status == ResultStatus::Error)
                .count();
            if errors > 0 {
                return Err(SessionError::UnresolvedErrors(errors));
            }
            inner.state = SessionState::Saving;
            outcome
        };
        let flight = InFlight::new(&self.inner, SessionState::Saving);

        let backup_id = match self.backend.create_backup().await {
            Ok(id) => id,
            Err(source) => {
                warn!("backup failed, nothing saved: {}", source);
                flight.finish(SessionState::Failed, Some(outcome));
                return Err(SessionError::Backend {
                    call: "createBackup",
                    source,
                });
            }
        };
        info!("Backup {} created", backup_id);

        let mut summary = SaveSummary {
            backup_id,
            ..Default::default()
        };

        for result in &outcome.results {
            match self
                .backend
                .create_import_report(&NewImportReport::from(result))
                .await
            {
                Ok(id) => summary.report_ids.push(id),
                Err(e) => summary
                    .errors
                    .push(format!("import report for {}: {}", result.file_name, e)),
            }
        }

        for template in &outcome.templates {
            let template_id = match self
                .backend
                .create_template(&new_template(template, &self.config))
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    summary.errors.push(format!("template {}: {}", template.name, e));
                    continue;
                }
            };
            summary.template_ids.push(template_id.clone());

            if let Some(tab) = details_tab(template, &template_id) {
                match self.backend.create_template_details_tab(&tab).await {
                    Ok(id) => summary.details_tab_ids.push(id),
                    Err(e) => summary
                        .errors
                        .push(format!("details tab for {}: {}", template.name, e)),
                }
            }
        }

        if summary.errors.is_empty() {
            info!(
                "Saved {} reports and {} templates",
                summary.report_ids.len(),
                summary.template_ids.len()
            );
        } else {
            warn!("Save finished with {} error(s)", summary.errors.len());
        }
        flight.finish(SessionState::Done, Some(outcome));
        Ok(summary)
    }
}
