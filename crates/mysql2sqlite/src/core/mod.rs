//! Core types shared by every stage of the replication pipeline.
//!
//! - [`value`]: closed source/target/watermark value enums
//! - [`schema`]: table and column metadata, affinity, schema drift
//! - [`change`]: change rows, watermarks, per-table and per-run results
//! - [`identifier`]: identifier validation and quoting

pub mod change;
pub mod identifier;
pub mod schema;
pub mod value;

pub use change::{
    ChangeOp, ChangeRow, RunReport, RunStatus, SyncOutcome, SyncResult, TablePhase, Watermark,
};
pub use schema::{
    Affinity, ChangeDetection, ColumnSpec, SchemaDrift, SourceColumn, SourceTable, SourceType,
    TableSpec, TargetColumn, TargetTable,
};
pub use value::{SourceValue, TargetValue, WatermarkValue};
