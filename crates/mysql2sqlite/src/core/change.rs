//! Change rows, watermarks and the per-table / per-run outcome records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::schema::TableSpec;
use super::value::{SourceValue, WatermarkValue};

/// Number of row error messages kept on a [`SyncResult`].
pub const MAX_ROW_ERRORS: usize = 10;

/// What the applier does with a change row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

/// One extracted source row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    /// Primary key values, in key order.
    pub primary_key: Vec<SourceValue>,
    /// Column values aligned with [`TableSpec::columns`].
    pub values: Vec<SourceValue>,
    pub operation: ChangeOp,
    /// Watermark column value of this row (watermark modes only).
    pub watermark: Option<WatermarkValue>,
}

impl ChangeRow {
    /// Build a row from values aligned with `TableSpec::columns`.
    ///
    /// The primary key and watermark are projected out of `values`; the
    /// operation is `Delete` when the soft-delete marker is set.
    pub fn from_values(spec: &TableSpec, values: Vec<SourceValue>) -> Self {
        let primary_key = spec
            .pk_indices()
            .into_iter()
            .map(|i| values.get(i).cloned().unwrap_or(SourceValue::Null))
            .collect();
        let watermark = spec
            .watermark_index()
            .and_then(|i| values.get(i))
            .and_then(SourceValue::to_watermark);
        let operation = match spec.deleted_index().and_then(|i| values.get(i)) {
            Some(marker) if marker.is_truthy() => ChangeOp::Delete,
            _ => ChangeOp::Upsert,
        };

        Self {
            primary_key,
            values,
            operation,
            watermark,
        }
    }

    /// Value of a column by name.
    pub fn get<'a>(&'a self, spec: &TableSpec, column: &str) -> Option<&'a SourceValue> {
        spec.column_index(column).and_then(|i| self.values.get(i))
    }

    /// Human-readable primary key, used in row error messages.
    pub fn key_display(&self) -> String {
        let parts: Vec<String> = self.primary_key.iter().map(|v| v.to_string()).collect();
        format!("({})", parts.join(", "))
    }
}

/// Persisted change cursor of one target table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Watermark {
    pub table_name: String,
    /// `None` until a pass has observed at least one row.
    pub last_value: Option<WatermarkValue>,
    pub last_success_at: DateTime<Utc>,
}

/// Pipeline phase of a table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePhase {
    Pending,
    Extracting,
    Mapping,
    Applying,
    Committed,
    Failed,
}

impl fmt::Display for TablePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TablePhase::Pending => "pending",
            TablePhase::Extracting => "extracting",
            TablePhase::Mapping => "mapping",
            TablePhase::Applying => "applying",
            TablePhase::Committed => "committed",
            TablePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one table's pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Every change applied and the watermark advanced.
    Success,
    /// Some rows were excluded; committed rows stand, watermark unchanged.
    Partial,
    /// Nothing from this pass is visible beyond batches already committed.
    Failed,
}

/// Per-table result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub table_name: String,
    pub rows_applied: u64,
    pub rows_deleted: u64,
    pub rows_failed: u64,
    /// Watermark stored after this pass.
    pub new_watermark: Option<WatermarkValue>,
    pub outcome: SyncOutcome,
    pub error: Option<String>,
    pub attempts: u32,
    /// First few row-level failure messages.
    pub row_errors: Vec<String>,
    pub duration_ms: u64,
}

impl SyncResult {
    /// A result for a table that never got past the given error.
    pub fn failed(table_name: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            table_name: table_name.into(),
            rows_applied: 0,
            rows_deleted: 0,
            rows_failed: 0,
            new_watermark: None,
            outcome: SyncOutcome::Failed,
            error: Some(error.to_string()),
            attempts: 0,
            row_errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Whether at least one transaction of this table committed.
    pub fn committed(&self) -> bool {
        self.outcome != SyncOutcome::Failed
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    /// Aggregate table outcomes into a run status.
    pub fn from_results(results: &[SyncResult]) -> Self {
        if results.iter().all(|r| r.outcome == SyncOutcome::Success) {
            RunStatus::Success
        } else if results.iter().any(SyncResult::committed) {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }

    /// Process exit code for this status.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Partial => 2,
            RunStatus::Failed => 1,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of one replication run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub results: Vec<SyncResult>,
}

impl RunReport {
    /// Result for a target table, if it took part in the run.
    pub fn result(&self, table_name: &str) -> Option<&SyncResult> {
        self.results.iter().find(|r| r.table_name == table_name)
    }

    /// Serialize the report as pretty JSON.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Affinity, ChangeDetection, ColumnSpec, SourceType};

    fn alias_spec() -> TableSpec {
        TableSpec {
            source_name: "alias".into(),
            target_name: "alias".into(),
            primary_key: vec!["address".into()],
            columns: vec![
                ColumnSpec::new("address", SourceType::Text, Affinity::Text).not_null(),
                ColumnSpec::new("goto", SourceType::Text, Affinity::Text),
                ColumnSpec::new("version", SourceType::Integer { unsigned: false }, Affinity::Integer),
                ColumnSpec::new("deleted", SourceType::Boolean, Affinity::Integer),
            ],
            mode: ChangeDetection::SoftDeleteAware {
                watermark_column: "version".into(),
                deleted_column: "deleted".into(),
            },
        }
    }

    fn result(name: &str, outcome: SyncOutcome) -> SyncResult {
        SyncResult {
            outcome,
            error: None,
            ..SyncResult::failed(name, "")
        }
    }

    #[test]
    fn test_change_row_projection() {
        let spec = alias_spec();
        let row = ChangeRow::from_values(
            &spec,
            vec!["a@x.org".into(), "b@x.org".into(), SourceValue::Int(7), SourceValue::Bool(false)],
        );
        assert_eq!(row.primary_key, vec![SourceValue::from("a@x.org")]);
        assert_eq!(row.watermark, Some(WatermarkValue::Integer(7)));
        assert_eq!(row.operation, ChangeOp::Upsert);
        assert_eq!(row.get(&spec, "goto"), Some(&SourceValue::from("b@x.org")));
        assert_eq!(row.key_display(), "('a@x.org')");
    }

    #[test]
    fn test_soft_deleted_row_becomes_delete() {
        let spec = alias_spec();
        let row = ChangeRow::from_values(
            &spec,
            vec!["a@x.org".into(), SourceValue::Null, SourceValue::Int(9), SourceValue::Int(1)],
        );
        assert_eq!(row.operation, ChangeOp::Delete);
    }

    #[test]
    fn test_run_status_aggregation() {
        assert_eq!(RunStatus::from_results(&[]), RunStatus::Success);
        assert_eq!(
            RunStatus::from_results(&[result("a", SyncOutcome::Success), result("b", SyncOutcome::Success)]),
            RunStatus::Success
        );
        assert_eq!(
            RunStatus::from_results(&[result("a", SyncOutcome::Success), result("b", SyncOutcome::Failed)]),
            RunStatus::Partial
        );
        assert_eq!(
            RunStatus::from_results(&[result("a", SyncOutcome::Partial)]),
            RunStatus::Partial
        );
        assert_eq!(
            RunStatus::from_results(&[result("a", SyncOutcome::Failed), result("b", SyncOutcome::Failed)]),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::Partial.exit_code(), 2);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
    }
}
