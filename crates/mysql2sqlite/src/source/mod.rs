//! Source database access.
//!
//! The engine reads the source only through [`SourceReader`], so the
//! extractor and catalog can be exercised against any implementation.
//! [`MysqlReader`] is the production one.

mod mysql;

pub use mysql::MysqlReader;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{SourceTable, SourceValue, TableSpec};
use crate::error::Result;

/// Lower bound on the watermark column for the first page.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkFilter {
    /// Watermark column name.
    pub column: String,
    /// Rows must have `column > after`; `None` selects all non-NULL values.
    pub after: Option<SourceValue>,
}

/// One keyset-paginated page request.
///
/// Rows are returned ordered by `order_by` ascending. When `after` is set,
/// only rows whose `order_by` tuple compares strictly greater are returned.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub spec: Arc<TableSpec>,
    /// Ordering (and keyset) columns.
    pub order_by: Vec<String>,
    /// Watermark predicate (watermark modes only).
    pub watermark: Option<WatermarkFilter>,
    /// Keyset cursor: `order_by` values of the last row already returned.
    pub after: Option<Vec<SourceValue>>,
    /// Maximum rows to return.
    pub limit: usize,
}

impl PageRequest {
    /// Positions of the `order_by` columns in the `TableSpec` column list.
    pub fn order_indices(&self) -> Vec<usize> {
        self.order_by
            .iter()
            .filter_map(|c| self.spec.column_index(c))
            .collect()
    }
}

/// Read schema and rows from the source database.
///
/// Implementations must only issue reads.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Introspect a table. Returns `None` if the table does not exist.
    async fn describe_table(&self, table: &str) -> Result<Option<SourceTable>>;

    /// Fetch one page of rows, values aligned with `request.spec.columns`.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Vec<SourceValue>>>;

    /// Check connectivity.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier (e.g., "mysql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self) {}
}
