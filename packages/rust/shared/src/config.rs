//! Application configuration for LexSync.
//!
//! User config lives at `~/.lexsync/lexsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LexSyncError, Result};
use crate::types::JurisdictionTier;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "lexsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".lexsync";

// ---------------------------------------------------------------------------
// Config structs (matching lexsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Registered regulation sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Database file path (relative paths resolve against the config dir).
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum fetch attempts per document (first try + retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in ms (doubled per attempt).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay in ms.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Consecutive terminal failures before a source's circuit opens.
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    /// Per-attempt fetch deadline in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Maximum chunk size in bytes before sentence-level splitting.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Chunks per embedding batch.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Concurrent embedding batches in flight.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,

    /// Per-batch embedding deadline in seconds.
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            circuit_threshold: default_circuit_threshold(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_chunk_bytes: default_max_chunk_bytes(),
            embed_batch_size: default_embed_batch_size(),
            embed_concurrency: default_embed_concurrency(),
            embed_timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_db_path() -> String {
    "lexsync.db".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_circuit_threshold() -> u32 {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_chunk_bytes() -> usize {
    2048
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_embed_concurrency() -> usize {
    4
}
fn default_embed_timeout_secs() -> u64 {
    60
}

/// `[[sources]]` entry — a registered regulation source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable source identifier, used as the document id prefix.
    pub id: String,

    /// Regulatory tier the source publishes at.
    pub jurisdiction: JurisdictionTier,

    /// Root URL of the source's listing endpoint.
    pub base_url: String,

    /// Minimum ms between successive fetches from this source.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,

    /// Which adapter implementation serves this source.
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

fn default_politeness_delay_ms() -> u64 {
    200
}
fn default_adapter() -> String {
    "http-feed".into()
}

// ---------------------------------------------------------------------------
// Runtime policies (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch policy — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Maximum attempts per document, including the first.
    pub max_attempts: u32,
    /// Base backoff delay, doubled per failed attempt.
    pub backoff_base: Duration,
    /// Cap on a single backoff delay.
    pub backoff_cap: Duration,
    /// Consecutive terminal failures before the source circuit opens.
    pub circuit_threshold: u32,
    /// Per-attempt fetch deadline.
    pub fetch_timeout: Duration,
}

impl From<&AppConfig> for FetchPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.defaults.max_attempts,
            backoff_base: Duration::from_millis(config.defaults.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.defaults.backoff_cap_ms),
            circuit_threshold: config.defaults.circuit_threshold,
            fetch_timeout: Duration::from_secs(config.defaults.fetch_timeout_secs),
        }
    }
}

/// Runtime embedding/index policy.
#[derive(Debug, Clone)]
pub struct UpsertPolicy {
    /// Chunks per embedding batch.
    pub batch_size: usize,
    /// Concurrent batches in flight.
    pub concurrency: usize,
    /// Per-batch deadline.
    pub embed_timeout: Duration,
}

impl From<&AppConfig> for UpsertPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.defaults.embed_batch_size.max(1),
            concurrency: config.defaults.embed_concurrency.max(1),
            embed_timeout: Duration::from_secs(config.defaults.embed_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.lexsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LexSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.lexsync/lexsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LexSyncError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| LexSyncError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate_sources(&config)?;
    Ok(config)
}

/// Resolve the database path: absolute paths pass through, relative paths
/// land under the config directory.
pub fn resolve_db_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = Path::new(&config.defaults.db_path);
    if raw.is_absolute() {
        return Ok(raw.to_path_buf());
    }
    Ok(config_dir()?.join(raw))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LexSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LexSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LexSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject duplicate source ids and malformed base URLs before any run starts.
fn validate_sources(config: &AppConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for source in &config.sources {
        if source.id.is_empty() {
            return Err(LexSyncError::validation("source id must not be empty"));
        }
        if !seen.insert(source.id.as_str()) {
            return Err(LexSyncError::validation(format!(
                "duplicate source id '{}'",
                source.id
            )));
        }
        url::Url::parse(&source.base_url).map_err(|e| {
            LexSyncError::validation(format!(
                "source '{}' has invalid base_url '{}': {e}",
                source.id, source.base_url
            ))
        })?;
    }
    Ok(())
}
