//! Error types for the replication engine.
//!
//! Errors are scoped the way the engine contains them:
//!
//! | Variant | Scope | Retryable |
//! |---------|-------|-----------|
//! | `Config` | whole run (nothing is synced) | no |
//! | `Schema` | one table | no |
//! | `TypeMapping` | one row (excluded, counted) | no |
//! | `Extraction` | one table | when `transient` |
//! | `Apply` | one table (batch rolled back) | when `transient` |
//! | `Checkpoint` | one table | no |
//! | `Cancelled` / `TimedOut` | in-flight tables | no |

use thiserror::Error;

/// A value could not be represented in the target column without loss.
///
/// Row-level: the row carrying the value is excluded from its batch and
/// counted in `rows_failed`, the rest of the batch still commits.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("column '{column}': {message}")]
pub struct TypeMappingError {
    /// Column the value belongs to.
    pub column: String,
    /// What was lost or why the value is not representable.
    pub message: String,
}

impl TypeMappingError {
    pub fn new(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// Configuration error (invalid YAML, missing fields, inconsistent tables).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Table missing, primary key undeterminable, or schema drift.
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// Per-row type mapping failure.
    #[error("Type mapping error: {0}")]
    TypeMapping(#[from] TypeMappingError),

    /// Reading changes from the source failed.
    #[error("Extraction failed for table {table}: {message}")]
    Extraction {
        table: String,
        message: String,
        transient: bool,
    },

    /// Writing a batch to the target failed; the batch was rolled back.
    #[error("Apply failed for table {table}: {message}")]
    Apply {
        table: String,
        message: String,
        transient: bool,
    },

    /// Reading or writing the checkpoint table failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Target database error outside of a table's apply phase.
    #[error("Target database error: {0}")]
    Target(#[from] sqlx::Error),

    /// IO error (config file, replica directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, SIGTERM) before the table committed.
    #[error("Sync cancelled")]
    Cancelled,

    /// Run-level timeout expired before the table committed.
    #[error("Sync run timed out after {0}s")]
    TimedOut(u64),
}

impl ReplicaError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        ReplicaError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Schema error
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicaError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a transient Extraction error (connectivity, query failure).
    pub fn extraction(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ReplicaError::Extraction {
            table: table.into(),
            message: message.to_string(),
            transient: true,
        }
    }

    /// Create an Extraction error that retrying will not fix (undecodable value).
    pub fn extraction_permanent(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ReplicaError::Extraction {
            table: table.into(),
            message: message.to_string(),
            transient: false,
        }
    }

    /// Create an Apply error from a target database failure.
    ///
    /// SQLite `BUSY`/`LOCKED` is classified as transient.
    pub fn apply(table: impl Into<String>, err: &sqlx::Error) -> Self {
        ReplicaError::Apply {
            table: table.into(),
            message: err.to_string(),
            transient: is_sqlite_busy(err),
        }
    }

    /// Whether the orchestrator should retry the table after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicaError::Extraction { transient, .. } => *transient,
            ReplicaError::Apply { transient, .. } => *transient,
            ReplicaError::Pool { .. } => true,
            _ => false,
        }
    }

    /// Process exit code for errors that abort the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReplicaError::Config(_) | ReplicaError::Yaml(_) => 3,
            ReplicaError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Check if an error is a retryable SQLite busy/locked error
pub(crate) fn is_sqlite_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                if code == "5" || code == "6" {
                    return true;
                }
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
