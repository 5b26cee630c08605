//! Configuration management for the Circles indexer.
//!
//! This module handles loading configuration from:
//! - TOML files, with `${VAR_NAME}` placeholders expanded from the environment
//! - `CIRCLES_*` environment variables (override the file)
//! - Default values (fallbacks)

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use circles_core::{DEFAULT_HOPS, DEFAULT_PAGE_SIZE, DEFAULT_SOLVER_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Subgraph (external indexer) access
    pub indexer: IndexerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Chain listener configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Full rebuild schedule
    #[serde(default)]
    pub rebuild: RebuildConfig,

    /// Incremental updater settings
    #[serde(default)]
    pub updater: UpdaterConfig,

    /// Solver snapshot export
    #[serde(default)]
    pub export: ExportConfig,

    /// External solver process
    #[serde(default)]
    pub pathfinder: PathfinderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC URL
    pub rpc_url: String,

    /// Chain ID (100 for Gnosis Chain)
    pub chain_id: u64,
}

/// Contract addresses configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Circles hub (Trust events, send limits, token registry)
    pub hub: Address,
}

/// Subgraph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// GraphQL endpoints in failover order
    pub endpoints: Vec<String>,

    /// Safes per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Interval between endpoint health probes
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://circles.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Block number to start syncing from (0 = from genesis, see
    /// [`Config::warnings`])
    #[serde(default)]
    pub start_block: u64,

    /// Polling interval in seconds for new blocks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Number of blocks per log query
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Number of confirmations to wait before processing blocks
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            confirmations: default_confirmations(),
        }
    }
}

/// Rebuild configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Seconds between scheduled full rebuilds.
    ///
    /// **Must be > 0** - tokio::time::interval panics on zero.
    #[serde(default = "default_rebuild_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_rebuild_interval_secs(),
        }
    }
}

/// Incremental updater configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Edge refreshes running at once per event
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Capacity of the event channel between listener and updater
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Solver input file
    #[serde(default = "default_edges_file")]
    pub edges_file: PathBuf,

    /// Quiet period after a write before exporting
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            edges_file: default_edges_file(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Solver process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathfinderConfig {
    /// Solver executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Arguments placed before the edge file and request arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the solver after this many milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Hops used when a request does not specify any
    #[serde(default = "default_hops")]
    pub default_hops: u32,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            timeout_ms: default_timeout_ms(),
            default_hops: default_hops(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    5 // Gnosis Chain block time
}

fn default_batch_size() -> u64 {
    1000
}

fn default_confirmations() -> u64 {
    2
}

fn default_rebuild_interval_secs() -> u64 {
    3600
}

fn default_max_concurrency() -> usize {
    8
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_edges_file() -> PathBuf {
    PathBuf::from("edges.json")
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_executable() -> PathBuf {
    PathBuf::from("pathfinder")
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SOLVER_TIMEOUT_MS
}

fn default_hops() -> u32 {
    DEFAULT_HOPS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// `${VAR_NAME}` placeholders are expanded before parsing, then
    /// `CIRCLES_DATABASE_URL`, `CIRCLES_RPC_URL` and
    /// `CIRCLES_INDEXER_ENDPOINTS` (comma separated) override the file.
    ///
    /// # Example
    /// ```no_run
    /// # use circles_indexer::config::Config;
    /// let config = Config::from_file("circles-indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        let mut config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string. No environment lookups.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Apply `CIRCLES_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CIRCLES_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(url) = lookup("CIRCLES_RPC_URL") {
            self.network.rpc_url = url;
        }
        if let Some(endpoints) = lookup("CIRCLES_INDEXER_ENDPOINTS") {
            self.indexer.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Settings that are valid but probably unintended.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.sync.start_block == 0 {
            warnings.push(
                "sync.start_block is 0: a fresh database scans every Transfer log since genesis; \
                 set it to the hub deployment block"
                    .to_string(),
            );
        }
        warnings
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            bail!("Network RPC URL cannot be empty");
        }
        if self.network.chain_id == 0 {
            bail!("Chain ID must be non-zero");
        }

        if self.contracts.hub.is_zero() {
            bail!("Contracts hub must be a non-zero address");
        }

        if self.indexer.endpoints.is_empty() {
            bail!("At least one indexer endpoint is required");
        }
        if let Some(endpoint) = self
            .indexer
            .endpoints
            .iter()
            .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
        {
            bail!("Indexer endpoint must be an http(s) URL (got '{}')", endpoint);
        }
        if self.indexer.page_size == 0 {
            bail!("Indexer page_size must be > 0");
        }
        if self.indexer.request_timeout_secs == 0 {
            bail!("Indexer request_timeout_secs must be > 0");
        }
        if self.indexer.health_check_interval_secs == 0 {
            bail!("Indexer health_check_interval_secs must be > 0");
        }

        if self.database.url.is_empty() {
            bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.poll_interval_secs == 0 {
            bail!("Sync poll_interval_secs must be > 0");
        }
        if self.sync.batch_size == 0 {
            bail!("Sync batch_size must be > 0");
        }

        if self.rebuild.interval_secs == 0 {
            bail!("Rebuild interval_secs must be > 0 (tokio interval cannot be zero)");
        }

        if self.updater.max_concurrency == 0 {
            bail!("Updater max_concurrency must be > 0");
        }
        if self.updater.channel_capacity == 0 {
            bail!("Updater channel_capacity must be > 0");
        }

        if self.export.edges_file.as_os_str().is_empty() {
            bail!("Export edges_file cannot be empty");
        }

        if self.pathfinder.executable.as_os_str().is_empty() {
            bail!("Pathfinder executable cannot be empty");
        }
        if self.pathfinder.timeout_ms == 0 {
            bail!("Pathfinder timeout_ms must be > 0");
        }
        if self.pathfinder.default_hops == 0 {
            bail!("Pathfinder default_hops must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }
}

/// Expand `${VAR_NAME}` placeholders from the environment.
///
/// Placeholders inside TOML comments are left as they are. A `#` inside a
/// quoted string does not start a comment.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());

    for (line_no, line) in input.split_inclusive('\n').enumerate() {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut rest = line.char_indices().peekable();

        while let Some((i, ch)) = rest.next() {
            if escaped {
                escaped = false;
                output.push(ch);
                continue;
            }

            match (quote, ch) {
                (Some('"'), '\\') => escaped = true,
                (Some(q), c) if c == q => quote = None,
                (None, '"') | (None, '\'') => quote = Some(ch),
                (None, '#') => {
                    output.push_str(&line[i..]);
                    break;
                }
                (_, '$') if rest.peek().map(|&(_, c)| c) == Some('{') => {
                    let start = i + 2;
                    let Some(len) = line[start..].find('}') else {
                        bail!("Unclosed environment variable placeholder on line {}", line_no + 1);
                    };
                    let name = &line[start..start + len];
                    if name.is_empty() {
                        bail!("Empty environment variable name on line {}", line_no + 1);
                    }
                    let value = std::env::var(name).with_context(|| {
                        format!(
                            "Environment variable '{}' is not set (referenced on line {})",
                            name,
                            line_no + 1
                        )
                    })?;
                    output.push_str(&value);

                    while let Some((j, _)) = rest.next() {
                        if j == start + len {
                            break;
                        }
                    }
                    continue;
                }
                _ => {}
            }

            output.push(ch);
        }
    }

    Ok(output)
}
