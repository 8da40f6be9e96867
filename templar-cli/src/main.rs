use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use templar_core::backend::{MemoryBackend, TemplateBackend};
use templar_core::config::ImportConfig;
use templar_core::models::{ProcessingResult, ResultStatus};
use templar_core::report::{filter_reports, write_reports_csv, ReportStats};
use templar_core::session::{ImportSession, ImportSource, ProcessOutcome, SaveSummary};
use templar_core::store::JsonStore;

#[derive(Parser)]
#[command(
    name = "templar",
    about = "Bulk import of contract templates: validate, infer forms, audit"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a templar.yaml (default: ./templar.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the JSON store location
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a ZIP archive or individual files and print the per-file
    /// report without saving anything
    Process {
        #[command(flatten)]
        input: InputArgs,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process input and save reports and templates into the store.
    /// Refused while any file has errors.
    Import {
        #[command(flatten)]
        input: InputArgs,

        /// Run the full save against an in-memory backend
        #[arg(long)]
        dry_run: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored import reports, newest first
    Reports {
        /// Case-insensitive match on file name or hash
        #[arg(long, default_value = "")]
        search: String,

        /// Only reports with this status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Also write the listed reports to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Summarize stored import reports
    Stats {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List backups taken before each save, oldest first
    Backups {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll reports, templates and details tabs back to a backup
    Restore {
        /// Backup id, as printed by `templar backups`
        id: String,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// A .zip archive, or one or more .json/.md/.txt files
    paths: Vec<PathBuf>,

    /// Read a single JSON template from stdin instead
    #[arg(long, conflicts_with = "paths")]
    stdin: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusFilter {
    Success,
    Warning,
    Error,
}

impl From<StatusFilter> for ResultStatus {
    fn from(s: StatusFilter) -> Self {
        match s {
            StatusFilter::Success => ResultStatus::Success,
            StatusFilter::Warning => ResultStatus::Warning,
            StatusFilter::Error => ResultStatus::Error,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => templar_core::config::load_config_file(path)?,
        None => templar_core::config::load_config(&std::env::current_dir()?)?,
    };
    if let Some(store) = cli.store {
        config.store_path = Some(store);
    }

    let code = match cli.command {
        Commands::Process { input, json } => run_process(&input, config, json).await?,
        Commands::Import {
            input,
            dry_run,
            json,
        } => {
            if dry_run {
                run_import(&input, Arc::new(MemoryBackend::new()), config, json).await?
            } else {
                let store = Arc::new(open_store(&config)?);
                tracing::info!("Using store {}", store.path().display());
                run_import(&input, store, config, json).await?
            }
        }
        Commands::Reports {
            search,
            status,
            json,
            csv,
        } => {
            run_reports(&config, &search, status.map(Into::into), json, csv.as_deref())?;
            0
        }
        Commands::Stats { json } => {
            run_stats(&config, json)?;
            0
        }
        Commands::Backups { json } => {
            run_backups(&config, json)?;
            0
        }
        Commands::Restore { id } => {
            run_restore(&config, &id)?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn open_store(config: &ImportConfig) -> anyhow::Result<JsonStore> {
    let path = config
        .resolved_store_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory; pass --store"))?;
    Ok(JsonStore::open(&path)?)
}

/// A single `.zip` is an archive; anything else is a set of selected files.
fn read_source(input: &InputArgs) -> anyhow::Result<ImportSource> {
    if input.stdin {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(ImportSource::Pasted(text));
    }

    match input.paths.as_slice() {
        [] => anyhow::bail!("No input given. Pass a .zip, some files, or --stdin"),
        [single] if is_zip(single) => Ok(ImportSource::Archive(std::fs::read(single)?)),
        paths => {
            let mut files = Vec::with_capacity(paths.len());
            for path in paths {
                if is_zip(path) {
                    anyhow::bail!("{} must be imported on its own", path.display());
                }
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                files.push((name, std::fs::read(path)?));
            }
            Ok(ImportSource::Files(files))
        }
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

async fn run_process(input: &InputArgs, config: ImportConfig, json_output: bool) -> anyhow::Result<i32> {
    let session = ImportSession::new(Arc::new(MemoryBackend::new()), config);
    let outcome = session.process(read_source(input)?).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(if outcome.error_count() > 0 { 1 } else { 0 })
}

async fn run_import<B: TemplateBackend>(
    input: &InputArgs,
    backend: Arc<B>,
    config: ImportConfig,
    json_output: bool,
) -> anyhow::Result<i32> {
    let session = ImportSession::new(backend, config);
    let outcome = session.process(read_source(input)?).await?;

    if outcome.error_count() > 0 {
        if json_output {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            print_outcome(&outcome);
            println!(
                "\nNot saved: {} file(s) have errors. Fix them and run import again.",
                outcome.error_count()
            );
        }
        return Ok(1);
    }

    let summary = session.save().await?;
    if json_output {
        let output = json!({
            "outcome": outcome,
            "save": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_outcome(&outcome);
        print_summary(&summary);
    }
    Ok(if summary.errors.is_empty() { 0 } else { 1 })
}

fn status_tag(status: ResultStatus) -> &'static str {
    match status {
        ResultStatus::Success => "[OK]",
        ResultStatus::Warning => "[WARN]",
        ResultStatus::Error => "[ERROR]",
    }
}

fn print_result(result: &ProcessingResult) {
    println!(
        "  {} {} ({}, {} bytes)",
        status_tag(result.status),
        result.file_name,
        result.file_type,
        result.byte_size
    );
    for e in &result.errors {
        println!("      error: {}", e);
    }
    for w in &result.warnings {
        println!("      warning: {}", w);
    }
    if !result.extracted_field_names.is_empty() {
        println!("      fields: {}", result.extracted_field_names.join(", "));
    }
}

fn print_outcome(outcome: &ProcessOutcome) {
    if let Some(hash) = &outcome.archive_hash {
        println!("Archive SHA-256: {}\n", hash);
    }

    println!("Files:");
    for result in &outcome.results {
        print_result(result);
    }
    for rejected in &outcome.rejected {
        println!("  [SKIP] {}: {}", rejected.file_name, rejected.reason);
    }
    for name in &outcome.skipped_compressed {
        println!("  [SKIP] {}: compressed entries are not supported", name);
    }
    if !outcome.unmatched.is_empty() {
        println!("\nUnmatched: {}", outcome.unmatched.join(", "));
    }
    if !outcome.duplicate_hashes.is_empty() {
        println!("Duplicate content hashes: {}", outcome.duplicate_hashes.len());
    }

    if !outcome.templates.is_empty() {
        println!("\nTemplates:");
        for template in &outcome.templates {
            let guidance = if template.markdown_content.is_some() {
                " + guidance"
            } else {
                ""
            };
            println!(
                "  {} [{}] {} field(s){} from {}",
                template.name,
                template.category,
                template.flatten_field_names().len(),
                guidance,
                template.source_file_name
            );
        }
    }

    println!(
        "\nProcessed {} files: {} success, {} warnings, {} errors",
        outcome.results.len(),
        outcome.counts.success,
        outcome.counts.warning,
        outcome.counts.error
    );
}

fn print_summary(summary: &SaveSummary) {
    println!(
        "\nSaved {} report(s), {} template(s), {} details tab(s) (backup {})",
        summary.report_ids.len(),
        summary.template_ids.len(),
        summary.details_tab_ids.len(),
        summary.backup_id
    );
    for e in &summary.errors {
        println!("  [ERROR] {}", e);
    }
}

fn run_reports(
    config: &ImportConfig,
    search: &str,
    status: Option<ResultStatus>,
    json_output: bool,
    csv_path: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let reports = filter_reports(&store.import_reports()?, search, status);

    if let Some(path) = csv_path {
        write_reports_csv(path, &reports)?;
        tracing::info!("Wrote {} report(s) to {}", reports.len(), path.display());
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No import reports found.");
        return Ok(());
    }
    println!("{} report(s):\n", reports.len());
    for r in &reports {
        let hash = short_hash(&r.report.hash);
        println!(
            "  {} {} {} ({}, {} bytes, {})",
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            status_tag(r.report.status),
            r.report.file_name,
            r.report.file_type,
            r.report.size,
            hash
        );
    }
    Ok(())
}

/// First 12 characters of a hash for display. Not every stored hash is hex.
fn short_hash(hash: &str) -> String {
    if hash.chars().count() > 12 {
        format!("{}...", hash.chars().take(12).collect::<String>())
    } else {
        hash.to_string()
    }
}

fn run_stats(config: &ImportConfig, json_output: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = ReportStats::from_reports(&store.import_reports()?);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Reports: {}", stats.total);
    println!(
        "  success: {}, warning: {}, error: {}",
        stats.counts.success, stats.counts.warning, stats.counts.error
    );
    println!("Total size: {} bytes", stats.total_size);
    println!(
        "Unique hashes: {} ({} duplicate(s))",
        stats.unique_hashes, stats.duplicate_count
    );
    if !stats.file_types.is_empty() {
        println!("\nBy file type:");
        for (file_type, count) in &stats.file_types {
            println!("  {}: {}", file_type, count);
        }
    }
    for (title, summary) in [
        ("Most common errors", &stats.error_summary),
        ("Most common warnings", &stats.warning_summary),
    ] {
        if summary.is_empty() {
            continue;
        }
        println!("\n{}:", title);
        for (message, count) in summary.iter().take(10) {
            println!("  {:>4}  {}", count, message);
        }
    }
    Ok(())
}

fn run_backups(config: &ImportConfig, json_output: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let backups = store.backups()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups found.");
        return Ok(());
    }
    for backup in &backups {
        println!(
            "  {} {} ({})",
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.id,
            backup.path
        );
    }
    Ok(())
}

fn run_restore(config: &ImportConfig, id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let backup = store.restore_backup(id)?;
    println!(
        "Restored backup {} from {}: {} report(s), {} template(s), {} details tab(s)",
        backup.id,
        backup.created_at.format("%Y-%m-%d %H:%M:%S"),
        store.import_reports()?.len(),
        store.templates()?.len(),
        store.details_tabs()?.len()
    );
    Ok(())
}
