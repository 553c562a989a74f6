//! Per-table watermark storage inside the replica.
//!
//! Watermarks live in the replica itself so that a watermark write can share
//! a transaction with the rows it covers: either both are visible or neither.
//! `last_value` relies on SQLite's dynamic typing (INTEGER for ids and FULL
//! pass counters, canonical TEXT for timestamps, NULL before any row is seen).

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::core::{Watermark, WatermarkValue};
use crate::error::{ReplicaError, Result};

/// Name of the checkpoint table in the replica.
pub const CHECKPOINT_TABLE: &str = "_mysql2sqlite_checkpoints";

/// Checkpoint store backed by the replica database.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint table if it does not exist.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT PRIMARY KEY,
                last_value,
                last_success_at TEXT NOT NULL
            )",
            CHECKPOINT_TABLE
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicaError::Checkpoint(format!("creating checkpoint table: {}", e)))?;

        debug!("Checkpoint table ready");
        Ok(())
    }

    /// Load the watermark of a table, if one was ever saved.
    pub async fn load(&self, table: &str) -> Result<Option<Watermark>> {
        let row = sqlx::query(&format!(
            "SELECT table_name, last_value, typeof(last_value) AS kind, last_success_at \
             FROM {} WHERE table_name = ?",
            CHECKPOINT_TABLE
        ))
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReplicaError::Checkpoint(format!("loading watermark for {}: {}", table, e)))?;

        row.as_ref().map(row_to_watermark).transpose()
    }

    /// Persist a watermark on the caller's connection.
    ///
    /// Called inside the transaction of a table's last batch.
    pub async fn save(&self, conn: &mut SqliteConnection, watermark: &Watermark) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (table_name, last_value, last_success_at) VALUES (?, ?, ?) \
             ON CONFLICT (table_name) DO UPDATE SET \
                last_value = excluded.last_value, \
                last_success_at = excluded.last_success_at",
            CHECKPOINT_TABLE
        );
        let query = sqlx::query(&sql).bind(watermark.table_name.clone());

        let query = match watermark.last_value {
            Some(WatermarkValue::Integer(v)) => query.bind(Some(v)),
            Some(ts @ WatermarkValue::Timestamp(_)) => query.bind(Some(ts.to_string())),
            None => query.bind(None::<String>),
        };

        query
            .bind(watermark.last_success_at.to_rfc3339())
            .execute(conn)
            .await
            .map_err(|e| {
                ReplicaError::Checkpoint(format!(
                    "saving watermark for {}: {}",
                    watermark.table_name, e
                ))
            })?;
        Ok(())
    }

    /// All stored watermarks, ordered by table name.
    pub async fn list(&self) -> Result<Vec<Watermark>> {
        let rows = sqlx::query(&format!(
            "SELECT table_name, last_value, typeof(last_value) AS kind, last_success_at \
             FROM {} ORDER BY table_name",
            CHECKPOINT_TABLE
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReplicaError::Checkpoint(format!("listing watermarks: {}", e)))?;

        rows.iter().map(row_to_watermark).collect()
    }

    /// Delete a table's watermark so the next pass re-extracts everything.
    ///
    /// Returns whether a watermark existed.
    pub async fn reset(&self, table: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE table_name = ?",
            CHECKPOINT_TABLE
        ))
        .bind(table)
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicaError::Checkpoint(format!("resetting watermark for {}: {}", table, e)))?;

        let existed = result.rows_affected() > 0;
        info!(table = %table, existed, "Reset watermark");
        Ok(existed)
    }
}

fn row_to_watermark(row: &SqliteRow) -> Result<Watermark> {
    let decode = |e: sqlx::Error| ReplicaError::Checkpoint(format!("decoding checkpoint: {}", e));

    let table_name: String = row.try_get("table_name").map_err(decode)?;
    let kind: String = row.try_get("kind").map_err(decode)?;
    let last_value = match kind.as_str() {
        "null" => None,
        "integer" => Some(WatermarkValue::Integer(
            row.try_get::<i64, _>("last_value").map_err(decode)?,
        )),
        "text" => {
            let text: String = row.try_get("last_value").map_err(decode)?;
            Some(WatermarkValue::parse_timestamp(&text).ok_or_else(|| {
                ReplicaError::Checkpoint(format!(
                    "watermark for {} is not a timestamp: {:?}",
                    table_name, text
                ))
            })?)
        }
        other => {
            return Err(ReplicaError::Checkpoint(format!(
                "watermark for {} has unexpected storage class {}",
                table_name, other
            )))
        }
    };

    let success_text: String = row.try_get("last_success_at").map_err(decode)?;
    let last_success_at = DateTime::parse_from_rfc3339(&success_text)
        .map_err(|e| {
            ReplicaError::Checkpoint(format!(
                "last_success_at for {} is invalid: {}",
                table_name, e
            ))
        })?
        .with_timezone(&Utc);

    Ok(Watermark {
        table_name,
        last_value,
        last_success_at,
    })
}
