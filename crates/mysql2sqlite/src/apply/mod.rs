//! Applying changes to the replica.
//!
//! Rows are mapped first (MAPPING phase), then written in batches, one SQLite
//! transaction per batch (APPLYING phase). A row that SQLite rejects with a
//! constraint violation is excluded on its own; any other failure rolls the
//! current batch back and fails the table. The checkpoint is written in the
//! last batch's transaction, and only when no row was excluded.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::core::change::MAX_ROW_ERRORS;
use crate::core::{
    ChangeOp, ChangeRow, ColumnSpec, SyncOutcome, SyncResult, TableSpec, TargetValue, Watermark,
    WatermarkValue,
};
use crate::error::{ReplicaError, Result};
use crate::target::{sql, TargetDb};
use crate::typemap;

/// A change row converted to SQLite values.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub operation: ChangeOp,
    /// Key values, in key order.
    pub key: Vec<TargetValue>,
    /// Column values aligned with `TableSpec::columns` (empty for deletes).
    pub values: Vec<TargetValue>,
    /// Printable key, for row error messages.
    pub key_display: String,
}

/// Output of the MAPPING phase.
#[derive(Debug, Clone, Default)]
pub struct MappedChanges {
    pub rows: Vec<MappedRow>,
    /// One message per excluded row, prefixed with its key.
    pub failures: Vec<String>,
}

/// What the pass does with the stored watermark.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatermarkPlan {
    /// Watermark loaded before extraction.
    pub previous: Option<WatermarkValue>,
    /// Watermark reported by the extractor.
    pub observed: Option<WatermarkValue>,
    /// Delete replica rows whose key the pass did not see (FULL mode).
    pub purge_unseen: bool,
}

impl WatermarkPlan {
    /// Value to store on success: never lower than the previous one.
    pub fn next_value(&self) -> Option<WatermarkValue> {
        match self.observed {
            Some(observed) => Some(observed.max_with(self.previous)),
            None => self.previous,
        }
    }
}

/// Writes mapped changes and checkpoints to the replica.
pub struct Applier {
    target: Arc<TargetDb>,
    checkpoints: CheckpointStore,
    batch_size: usize,
}

#[derive(Default)]
struct Counters {
    applied: u64,
    deleted: u64,
    failed: u64,
    errors: Vec<String>,
}

impl Counters {
    fn exclude(&mut self, table: &str, message: String) {
        warn!(table = %table, "Row excluded: {}", message);
        self.failed += 1;
        if self.errors.len() < MAX_ROW_ERRORS {
            self.errors.push(message);
        }
    }
}

impl Applier {
    pub fn new(target: Arc<TargetDb>, checkpoints: CheckpointStore, batch_size: usize) -> Self {
        Self {
            target,
            checkpoints,
            batch_size: batch_size.max(1),
        }
    }

    /// Map and write one pass.
    pub async fn apply(
        &self,
        spec: &TableSpec,
        rows: Vec<ChangeRow>,
        plan: WatermarkPlan,
    ) -> Result<SyncResult> {
        let mapped = Self::map_rows(spec, rows);
        self.write(spec, mapped, plan).await
    }

    /// Convert change rows to SQLite values, excluding rows that do not fit.
    pub fn map_rows(spec: &TableSpec, rows: Vec<ChangeRow>) -> MappedChanges {
        let mut mapped = MappedChanges::default();
        let pk_indices = spec.pk_indices();

        for row in rows {
            match map_row(spec, &pk_indices, &row) {
                Ok(m) => mapped.rows.push(m),
                Err(message) => mapped
                    .failures
                    .push(format!("row {}: {}", row.key_display(), message)),
            }
        }

        if !mapped.failures.is_empty() {
            debug!(
                table = %spec.target_name,
                failed = mapped.failures.len(),
                "Rows failed type mapping"
            );
        }
        mapped
    }

    /// Write mapped rows in batches and record the checkpoint.
    pub async fn write(
        &self,
        spec: &TableSpec,
        mapped: MappedChanges,
        plan: WatermarkPlan,
    ) -> Result<SyncResult> {
        let started = Instant::now();
        let table = spec.target_name.as_str();
        let apply_err = |e: sqlx::Error| ReplicaError::apply(table, &e);

        let mut counters = Counters::default();
        for failure in mapped.failures {
            counters.exclude(table, failure);
        }

        let columns = spec.column_names();
        let upsert = sql::upsert_sql(table, &columns, &spec.primary_key);
        let delete = sql::delete_sql(table, &spec.primary_key);
        let seen_key = sql::insert_seen_key_sql(&spec.primary_key);

        let mut conn = self.target.acquire().await.map_err(apply_err)?;

        if plan.purge_unseen {
            let key_columns: Vec<ColumnSpec> = spec
                .pk_indices()
                .into_iter()
                .map(|i| spec.columns[i].clone())
                .collect();
            sqlx::query(&sql::drop_seen_keys_sql())
                .execute(&mut *conn)
                .await
                .map_err(apply_err)?;
            sqlx::query(&sql::create_seen_keys_sql(&key_columns))
                .execute(&mut *conn)
                .await
                .map_err(apply_err)?;
        }

        // An empty pass still commits one transaction for the checkpoint.
        let batches: Vec<&[MappedRow]> = if mapped.rows.is_empty() {
            vec![&[]]
        } else {
            mapped.rows.chunks(self.batch_size).collect()
        };
        let last_batch = batches.len() - 1;
        let mut stored = plan.previous;

        for (batch_num, batch) in batches.into_iter().enumerate() {
            let mut tx = Connection::begin(&mut *conn).await.map_err(apply_err)?;

            for row in batch {
                let result = match row.operation {
                    ChangeOp::Upsert => {
                        let mut query = sqlx::query(&upsert);
                        for value in &row.values {
                            query = sql::bind_value(query, value);
                        }
                        query.execute(&mut *tx).await
                    }
                    ChangeOp::Delete => {
                        let mut query = sqlx::query(&delete);
                        for value in &row.key {
                            query = sql::bind_value(query, value);
                        }
                        query.execute(&mut *tx).await
                    }
                };

                match result {
                    Ok(done) => match row.operation {
                        ChangeOp::Upsert => {
                            counters.applied += 1;
                            if plan.purge_unseen {
                                record_seen(&mut tx, &seen_key, &row.key)
                                    .await
                                    .map_err(apply_err)?;
                            }
                        }
                        ChangeOp::Delete => counters.deleted += done.rows_affected(),
                    },
                    Err(e) if is_row_violation(&e) => {
                        counters.exclude(table, format!("row {}: {}", row.key_display, e));
                    }
                    // Dropping `tx` rolls the batch back.
                    Err(e) => return Err(apply_err(e)),
                }
            }

            if batch_num == last_batch && counters.failed == 0 {
                if plan.purge_unseen {
                    let purged = sqlx::query(&sql::purge_unseen_sql(table, &spec.primary_key))
                        .execute(&mut *tx)
                        .await
                        .map_err(apply_err)?;
                    counters.deleted += purged.rows_affected();
                }

                stored = plan.next_value();
                self.checkpoints
                    .save(
                        &mut tx,
                        &Watermark {
                            table_name: table.to_string(),
                            last_value: stored,
                            last_success_at: Utc::now(),
                        },
                    )
                    .await?;
            }

            tx.commit().await.map_err(apply_err)?;
            debug!(
                table = %table,
                batch = batch_num + 1,
                rows = batch.len(),
                "Committed batch"
            );
        }

        if plan.purge_unseen {
            sqlx::query(&sql::drop_seen_keys_sql())
                .execute(&mut *conn)
                .await
                .map_err(apply_err)?;
        }

        let outcome = if counters.failed == 0 {
            SyncOutcome::Success
        } else {
            SyncOutcome::Partial
        };

        info!(
            table = %table,
            applied = counters.applied,
            deleted = counters.deleted,
            failed = counters.failed,
            watermark = ?stored,
            "Applied changes"
        );

        Ok(SyncResult {
            table_name: table.to_string(),
            rows_applied: counters.applied,
            rows_deleted: counters.deleted,
            rows_failed: counters.failed,
            new_watermark: stored,
            outcome,
            error: None,
            attempts: 1,
            row_errors: counters.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn map_row(
    spec: &TableSpec,
    pk_indices: &[usize],
    row: &ChangeRow,
) -> std::result::Result<MappedRow, String> {
    let map = |i: usize| -> std::result::Result<TargetValue, String> {
        let column = &spec.columns[i];
        let value = row
            .values
            .get(i)
            .ok_or_else(|| format!("column '{}' missing from row", column.name))?;
        let mapped = typemap::map_value(column, value).map_err(|e| e.to_string())?;
        if mapped.is_null() && !column.nullable {
            return Err(format!("column '{}': NULL in NOT NULL column", column.name));
        }
        Ok(mapped)
    };

    let (key, values) = match row.operation {
        ChangeOp::Delete => (
            pk_indices.iter().map(|&i| map(i)).collect::<std::result::Result<_, _>>()?,
            Vec::new(),
        ),
        ChangeOp::Upsert => {
            let values: Vec<TargetValue> = (0..spec.columns.len())
                .map(map)
                .collect::<std::result::Result<_, _>>()?;
            (pk_indices.iter().map(|&i| values[i].clone()).collect(), values)
        }
    };

    Ok(MappedRow {
        operation: row.operation,
        key,
        values,
        key_display: row.key_display(),
    })
}

async fn record_seen(
    conn: &mut SqliteConnection,
    statement: &str,
    key: &[TargetValue],
) -> std::result::Result<(), sqlx::Error> {
    let mut query = sqlx::query(statement);
    for value in key {
        query = sql::bind_value(query, value);
    }
    query.execute(conn).await?;
    Ok(())
}

/// Constraint violations that exclude a single row.
fn is_row_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => matches!(
            db_err.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
                | ErrorKind::ForeignKeyViolation
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Affinity, ChangeDetection, SourceType, SourceValue};

    fn spec() -> TableSpec {
        TableSpec {
            source_name: "mailbox".into(),
            target_name: "mailbox".into(),
            primary_key: vec!["username".into()],
            columns: vec![
                ColumnSpec::new("username", SourceType::Text, Affinity::Text).not_null(),
                ColumnSpec::new("quota", SourceType::Integer { unsigned: true }, Affinity::Integer),
                ColumnSpec::new("maildir", SourceType::Text, Affinity::Text).not_null(),
            ],
            mode: ChangeDetection::Full,
        }
    }

    fn row(spec: &TableSpec, values: Vec<SourceValue>) -> ChangeRow {
        ChangeRow::from_values(spec, values)
    }

    #[test]
    fn test_map_rows_excludes_bad_rows() {
        let spec = spec();
        let rows = vec![
            row(&spec, vec!["a@x.org".into(), SourceValue::UInt(1024), "x.org/a/".into()]),
            row(&spec, vec!["b@x.org".into(), SourceValue::UInt(u64::MAX), "x.org/b/".into()]),
            row(&spec, vec!["c@x.org".into(), SourceValue::Null, SourceValue::Null]),
        ];
        let mapped = Applier::map_rows(&spec, rows);

        assert_eq!(mapped.rows.len(), 1);
        assert_eq!(mapped.rows[0].key, vec![TargetValue::Text("a@x.org".into())]);
        assert_eq!(mapped.rows[0].values[1], TargetValue::Integer(1024));
        assert_eq!(mapped.failures.len(), 2);
        assert!(mapped.failures[0].starts_with("row ('b@x.org'): column 'quota'"));
        assert!(mapped.failures[1].contains("NULL in NOT NULL column"));
    }

    #[test]
    fn test_delete_maps_key_only() {
        let mut spec = spec();
        spec.columns.push(ColumnSpec::new("deleted", SourceType::Boolean, Affinity::Integer));
        spec.mode = ChangeDetection::SoftDeleteAware {
            watermark_column: "quota".into(),
            deleted_column: "deleted".into(),
        };
        let rows = vec![row(
            &spec,
            vec!["a@x.org".into(), SourceValue::UInt(3), SourceValue::Null, SourceValue::Bool(true)],
        )];
        let mapped = Applier::map_rows(&spec, rows);
        assert!(mapped.failures.is_empty());
        assert_eq!(mapped.rows[0].operation, ChangeOp::Delete);
        assert!(mapped.rows[0].values.is_empty());
    }

    #[test]
    fn test_watermark_plan_never_decreases() {
        let plan = WatermarkPlan {
            previous: Some(WatermarkValue::Integer(250)),
            observed: Some(WatermarkValue::Integer(100)),
            purge_unseen: false,
        };
        assert_eq!(plan.next_value(), Some(WatermarkValue::Integer(250)));

        let plan = WatermarkPlan {
            previous: Some(WatermarkValue::Integer(100)),
            observed: None,
            purge_unseen: false,
        };
        assert_eq!(plan.next_value(), Some(WatermarkValue::Integer(100)));
        assert_eq!(WatermarkPlan::default().next_value(), None);
    }
}
