//! SQLite replica database.
//!
//! Opens the replica file in WAL mode with a busy timeout, verifies its
//! storage location, introspects replica tables and creates missing ones.
//! Row writes happen in [`crate::apply`] through transactions begun here.

pub mod sql;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite};
use tracing::{debug, info};

use crate::config::{IndexConfig, TargetConfig};
use crate::core::{Affinity, ColumnSpec, TargetColumn, TargetTable};
use crate::error::{ReplicaError, Result};

/// Handle to the replica database.
pub struct TargetDb {
    pool: SqlitePool,
    path: PathBuf,
}

impl TargetDb {
    /// Open (creating if needed) the replica database.
    ///
    /// The parent directory must exist unless `create_directories` is set.
    pub async fn open(config: &TargetConfig, max_conns: u32) -> Result<Self> {
        verify_storage(&config.path, config.create_directories)?;

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns.max(1))
            .connect_with(options)
            .await
            .map_err(|e| ReplicaError::pool(e, "opening SQLite replica"))?;

        info!(path = %config.path.display(), "Opened SQLite replica");

        Ok(Self {
            pool,
            path: config.path.clone(),
        })
    }

    /// Path of the replica file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check out one connection for a table's writes.
    ///
    /// Temporary tables are per connection, so a pass that tracks seen keys
    /// runs all of its transactions on the connection returned here.
    pub async fn acquire(&self) -> std::result::Result<PoolConnection<Sqlite>, sqlx::Error> {
        self.pool.acquire().await
    }

    /// Check connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ReplicaError::pool(e, "testing SQLite replica"))?;
        Ok(())
    }

    /// Introspect a replica table. Returns `None` if it does not exist.
    pub async fn describe_table(&self, table: &str) -> Result<Option<TargetTable>> {
        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(rows.len());
        let mut pk: Vec<(i64, String)> = Vec::new();
        for row in &rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let pk_position: i64 = row.try_get("pk")?;
            if pk_position > 0 {
                pk.push((pk_position, name.clone()));
            }
            columns.push(TargetColumn {
                affinity: Affinity::from_declared(&declared),
                name,
                declared,
                nullable: not_null == 0,
            });
        }
        pk.sort();

        let unique_keys = self.load_unique_keys(table).await?;

        debug!(
            table = %table,
            columns = columns.len(),
            unique_keys = unique_keys.len(),
            "Loaded SQLite table metadata"
        );

        Ok(Some(TargetTable {
            name: table.to_string(),
            columns,
            primary_key: pk.into_iter().map(|(_, name)| name).collect(),
            unique_keys,
        }))
    }

    /// Column sets of the table's UNIQUE indexes.
    async fn load_unique_keys(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let indexes: Vec<String> = sqlx::query_scalar(
            r#"SELECT name FROM pragma_index_list(?) WHERE "unique" = 1 AND partial = 0"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(indexes.len());
        for index in indexes {
            let columns: Vec<Option<String>> =
                sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(index.as_str())
                    .fetch_all(&self.pool)
                    .await?;
            // Expression indexes have NULL column names and cannot serve as
            // a conflict target for plain columns.
            if let Some(columns) = columns.into_iter().collect::<Option<Vec<_>>>() {
                keys.push(columns);
            }
        }
        Ok(keys)
    }

    /// Create a replica table and its configured indexes in one transaction.
    pub async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        primary_key: &[String],
        indexes: &[IndexConfig],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::create_table_sql(table, columns, primary_key))
            .execute(&mut *tx)
            .await?;
        for index in indexes {
            sqlx::query(&sql::create_index_sql(table, index))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(
            table = %table,
            indexes = indexes.len(),
            "Created replica table"
        );
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Make sure the replica's directory exists, creating it when allowed.
fn verify_storage(path: &Path, create_directories: bool) -> Result<()> {
    if path.is_dir() {
        return Err(ReplicaError::Config(format!(
            "target.path {} is a directory",
            path.display()
        )));
    }

    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.is_dir() {
        return Ok(());
    }

    if create_directories {
        std::fs::create_dir_all(parent)?;
        info!(directory = %parent.display(), "Created replica directory");
        Ok(())
    } else {
        Err(ReplicaError::Config(format!(
            "replica directory {} does not exist (set target.create_directories to create it)",
            parent.display()
        )))
    }
}
