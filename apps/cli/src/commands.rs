//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use lexsync_core::{IngestionPipeline, ProgressReporter};
use lexsync_fetch::AdapterRegistry;
use lexsync_index::{DeterministicEmbedder, InMemoryIndex, UpsertCoordinator};
use lexsync_shared::{
    AppConfig, FetchPolicy, RunMode, RunReport, SourceReport, UpsertPolicy, init_config,
    load_config, resolve_db_path,
};
use lexsync_store::VersionStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LexSync — keep regulation text fresh, versioned, and searchable.
#[derive(Parser)]
#[command(
    name = "lexsync",
    version,
    about = "Change-detection ingestion for weekly-refreshed regulation sources.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Ingestion mode flag.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum Mode {
    /// Re-fetch and re-diff every document each source publishes.
    Full,
    /// Only documents changed since the last completed run.
    Incremental,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Full => RunMode::Full,
            Mode::Incremental => RunMode::Incremental,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one ingestion pass over the configured sources.
    Run {
        /// Ingestion mode.
        #[arg(short, long, default_value = "incremental")]
        mode: Mode,

        /// Database path (defaults to the configured location).
        #[arg(long)]
        db: Option<String>,

        /// Restrict the run to these source ids (repeatable).
        #[arg(short, long)]
        source: Vec<String>,
    },

    /// Show the version lineage of one document.
    History {
        /// Document id (`source_id:external_id`).
        document_id: String,

        /// Database path (defaults to the configured location).
        #[arg(long)]
        db: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "lexsync=info",
        1 => "lexsync=debug",
        _ => "lexsync=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { mode, db, source } => cmd_run(mode, db.as_deref(), &source).await,
        Command::History { document_id, db } => cmd_history(&document_id, db.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(mode: Mode, db: Option<&str>, source_filter: &[String]) -> Result<()> {
    let config = load_config()?;

    let sources: Vec<_> = if source_filter.is_empty() {
        config.sources.clone()
    } else {
        config
            .sources
            .iter()
            .filter(|s| source_filter.iter().any(|f| f == &s.id))
            .cloned()
            .collect()
    };
    if sources.is_empty() {
        return Err(eyre!(
            "no sources to ingest — add [[sources]] entries to the config or check --source filters"
        ));
    }

    let db_path = match db {
        Some(p) => PathBuf::from(p),
        None => resolve_db_path(&config)?,
    };
    let store = Arc::new(VersionStore::open(&db_path).await?);
    let registry = Arc::new(AdapterRegistry::new().map_err(|e| eyre!("adapter setup: {e}"))?);

    // The in-memory index is the built-in backend; external vector
    // stores plug in through the SemanticIndex trait.
    let index = Arc::new(InMemoryIndex::new());
    let coordinator = Arc::new(UpsertCoordinator::new(
        Arc::new(DeterministicEmbedder::new(256)),
        index,
        UpsertPolicy::from(&config),
    ));

    let pipeline = IngestionPipeline::new(
        store,
        registry,
        coordinator,
        FetchPolicy::from(&config),
        config.defaults.max_chunk_bytes,
    );

    // First ctrl-C requests a graceful stop: in-flight documents finish,
    // the rest are reported as skipped.
    let cancel = CancellationToken::new();
    let handler = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested, finishing in-flight work");
            handler.cancel();
        }
    });

    let run_mode = RunMode::from(mode);
    info!(mode = %run_mode, sources = sources.len(), "starting ingestion");

    let reporter = Arc::new(CliProgress::new());
    let report = pipeline
        .run_ingestion(&sources, run_mode, &cancel, reporter)
        .await?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("  Run {} ({})", report.run_id, report.mode);
    println!("  Time: {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();
    for source in &report.sources {
        print_source(source);
    }
    if !report.is_clean() {
        println!("  Some sources did not complete cleanly; see entries above.");
        println!();
    }
}

fn print_source(source: &SourceReport) {
    println!("  {} [{}]", source.source_id, source.state);
    println!(
        "    new {}  changed {}  unchanged {}  removed {}  skipped {}  failed {}",
        source.counts.new,
        source.counts.changed,
        source.counts.unchanged,
        source.counts.removed,
        source.skipped.len(),
        source.failed.len(),
    );
    for entry in &source.skipped {
        println!("    skipped {}: {}", entry.document_id, entry.error);
    }
    for entry in &source.failed {
        println!("    failed  {}: {}", entry.document_id, entry.error);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_started(&self, source_id: &str) {
        self.spinner.set_message(format!("Fetching {source_id}"));
    }

    fn document_processed(&self, document_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Processing [{current}/{total}] {document_id}"));
    }

    fn source_finished(&self, report: &SourceReport) {
        self.spinner
            .set_message(format!("Finished {} [{}]", report.source_id, report.state));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

async fn cmd_history(document_id: &str, db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let db_path = match db {
        Some(p) => PathBuf::from(p),
        None => resolve_db_path(&config)?,
    };
    let store = VersionStore::open(&db_path).await?;

    let versions = store.history(document_id).await?;
    if versions.is_empty() {
        return Err(eyre!("no versions recorded for '{document_id}'"));
    }
    let status = store.document_status(document_id).await?;

    println!();
    println!("  {document_id}");
    if let Some(status) = status {
        println!("  Status: {status:?}");
    }
    println!();
    for version in &versions {
        println!(
            "  v{}  {}  chunks {}  fingerprint {}",
            version.version_no,
            version.retrieved_at.to_rfc3339(),
            version.chunk_ids.len(),
            &version.fingerprint[..12.min(version.fingerprint.len())],
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
