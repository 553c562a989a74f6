//! # mysql2sqlite
//!
//! Incremental MySQL to SQLite replication for mail-server account data
//! (domains, mailboxes, aliases).
//!
//! Each run extracts changed rows from the source per table, maps them to
//! SQLite storage classes and upserts them into a replica file that local
//! mail services read. Every table carries its own watermark, stored in the
//! replica and advanced in the same transaction as the rows it covers:
//!
//! - **Watermark mode**: rows with a change column above the stored watermark
//! - **Soft-delete mode**: as watermark mode, with flagged rows removed
//! - **Full mode**: the whole table every pass, rows gone upstream purged
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql2sqlite::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mysql2sqlite::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let report = orchestrator.sync(CancellationToken::new()).await;
//!     println!("Run {} finished: {}", report.run_id, report.status);
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod target;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, DriftPolicy, SourceConfig, SyncConfig, TableConfig, TableMode, TargetConfig};
pub use crate::core::{
    ChangeDetection, ChangeOp, ChangeRow, RunReport, RunStatus, SchemaDrift, SourceValue,
    SyncOutcome, SyncResult, TableSpec, TargetValue, Watermark, WatermarkValue,
};
pub use error::{ReplicaError, Result, TypeMappingError};
pub use orchestrator::{HealthCheckResult, Orchestrator, SchemaCheck};
pub use retry::{Clock, RetryPolicy, SystemClock};
pub use source::{MysqlReader, SourceReader};
pub use target::TargetDb;
