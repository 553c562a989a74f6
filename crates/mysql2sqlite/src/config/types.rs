//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ChangeDetection;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MySQL/MariaDB).
    pub source: SourceConfig,

    /// Replica configuration (SQLite).
    pub target: TargetConfig,

    /// Sync behavior configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Tables to replicate.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Source database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disabled, preferred, required, verify_ca, verify_identity
    /// (default: preferred).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Maximum pooled connections. Defaults to `sync.workers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    /// Connection acquire timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Replica (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,

    /// Create the parent directory when it is missing (default: false).
    #[serde(default)]
    pub create_directories: bool,

    /// Create missing replica tables from the source schema (default: false).
    #[serde(default)]
    pub create_missing_tables: bool,

    /// How long a writer waits on a locked database, in milliseconds
    /// (default: 5000).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tables processed concurrently (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rows per target transaction (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per source query (default: 1000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Abort the run after this many seconds (default: no limit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Seconds between passes in watch mode (default: 300).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// What to do when source and replica schemas differ (default: fail).
    #[serde(default)]
    pub schema_drift: DriftPolicy,

    /// Retry behavior for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            run_timeout_secs: None,
            interval_secs: default_interval(),
            schema_drift: DriftPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Run-level timeout, if configured.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Schema drift policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Any drift fails the table with a schema error.
    #[default]
    Fail,

    /// Log the drift and replicate the columns both sides have.
    Warn,
}

/// Retry behavior for transient extraction and apply failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per table, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Ceiling for the backoff delay in milliseconds (default: 30000).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Delay multiplier per attempt (default: 2.0).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Change detection mode as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    Full,
    Watermark,
    SoftDelete,
}

/// One replicated table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name in the source database.
    pub source: String,

    /// Table name in the replica (default: same as `source`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Primary key override, for source tables without one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,

    /// Change detection mode.
    pub mode: TableMode,

    /// Watermark column (watermark and soft_delete modes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_column: Option<String>,

    /// Soft-delete marker column (soft_delete mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_column: Option<String>,

    /// Indexes created along with the table when it is bootstrapped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexConfig>,
}

impl TableConfig {
    /// Replica table name; also the checkpoint key.
    pub fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }

    /// Resolve the configured mode into a change detection strategy.
    ///
    /// Returns `None` when a column the mode needs is not configured;
    /// validation reports that case before any table is processed.
    pub fn change_detection(&self) -> Option<ChangeDetection> {
        match self.mode {
            TableMode::Full => Some(ChangeDetection::Full),
            TableMode::Watermark => Some(ChangeDetection::WatermarkColumn {
                column: self.watermark_column.clone()?,
            }),
            TableMode::SoftDelete => Some(ChangeDetection::SoftDeleteAware {
                watermark_column: self.watermark_column.clone()?,
                deleted_column: self.deleted_column.clone()?,
            }),
        }
    }
}

/// Index on a bootstrapped replica table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index name (default: `idx_<table>_<columns>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Indexed columns, in order.
    pub columns: Vec<String>,

    /// Create a UNIQUE index (default: false).
    #[serde(default)]
    pub unique: bool,
}

impl IndexConfig {
    /// Effective index name for a table.
    pub fn name_for(&self, table: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("idx_{}_{}", table, self.columns.join("_")))
    }
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_ssl_mode() -> String {
    "preferred".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    500
}

fn default_page_size() -> usize {
    1_000
}

fn default_interval() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}
