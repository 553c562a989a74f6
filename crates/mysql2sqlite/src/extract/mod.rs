//! Change extraction.
//!
//! A background task pages through the source with keyset pagination and
//! hands pages to the consumer over a bounded channel. The consumer decides
//! how far to read; dropping the stream stops the producer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::{ChangeDetection, ChangeRow, TableSpec, WatermarkValue};
use crate::error::{ReplicaError, Result};
use crate::source::{PageRequest, SourceReader, WatermarkFilter};

/// Pages buffered ahead of the consumer.
const READ_AHEAD: usize = 2;

/// Everything one pass extracted.
#[derive(Debug, Clone, Default)]
pub struct ExtractedChanges {
    pub rows: Vec<ChangeRow>,
    /// Highest watermark observed (watermark modes) or the next pass
    /// counter (FULL mode). `None` when a watermark pass saw no rows.
    pub new_watermark: Option<WatermarkValue>,
}

/// Reads changed rows from the source.
pub struct ChangeExtractor {
    source: Arc<dyn SourceReader>,
    page_size: usize,
}

impl ChangeExtractor {
    pub fn new(source: Arc<dyn SourceReader>, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
        }
    }

    /// Start extracting rows changed after `previous`.
    ///
    /// Nothing is read until the stream is polled. The same `previous`
    /// yields the same rows, or a superset if the source changed meanwhile.
    pub fn extract(&self, spec: Arc<TableSpec>, previous: Option<WatermarkValue>) -> ChangeStream {
        let (tx, rx) = mpsc::channel(READ_AHEAD);

        let order_by = order_columns(&spec);
        let watermark = spec
            .mode
            .watermark_column()
            .map(|column| WatermarkFilter {
                column: column.to_string(),
                after: previous.as_ref().map(WatermarkValue::to_source_value),
            });

        let new_watermark = match spec.mode {
            ChangeDetection::Full => Some(WatermarkValue::Integer(match previous {
                Some(WatermarkValue::Integer(n)) => n.saturating_add(1),
                _ => 1,
            })),
            _ => None,
        };

        let producer = tokio::spawn(produce_pages(
            Arc::clone(&self.source),
            PageRequest {
                spec: Arc::clone(&spec),
                order_by,
                watermark,
                after: None,
                limit: self.page_size,
            },
            tx,
        ));

        ChangeStream {
            table: spec.target_name.clone(),
            tracks_watermark: spec.mode.watermark_column().is_some(),
            rx,
            producer,
            new_watermark,
            rows_read: 0,
            finished: false,
        }
    }
}

/// Keyset order: the watermark column first (watermark modes), then the key.
fn order_columns(spec: &TableSpec) -> Vec<String> {
    let mut order_by: Vec<String> = spec
        .mode
        .watermark_column()
        .map(str::to_string)
        .into_iter()
        .collect();
    for pk in &spec.primary_key {
        if !order_by.iter().any(|c| c.eq_ignore_ascii_case(pk)) {
            order_by.push(pk.clone());
        }
    }
    order_by
}

async fn produce_pages(
    source: Arc<dyn SourceReader>,
    mut request: PageRequest,
    tx: mpsc::Sender<Result<Vec<ChangeRow>>>,
) {
    let table = request.spec.target_name.clone();
    let order_indices = request.order_indices();
    let mut page_num = 0usize;

    loop {
        let values = match source.fetch_page(&request).await {
            Ok(values) => values,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let count = values.len();
        if count == 0 {
            break;
        }
        page_num += 1;

        if let Some(last) = values.last() {
            request.after = Some(
                order_indices
                    .iter()
                    .filter_map(|&i| last.get(i).cloned())
                    .collect(),
            );
        }

        let rows = values
            .into_iter()
            .map(|v| ChangeRow::from_values(&request.spec, v))
            .collect();

        debug!(table = %table, page = page_num, rows = count, "Read page");

        // Receiver gone: the consumer stopped reading.
        if tx.send(Ok(rows)).await.is_err() {
            return;
        }

        if count < request.limit {
            break;
        }
    }
}

/// Lazily produced pages of one table's changes.
pub struct ChangeStream {
    table: String,
    tracks_watermark: bool,
    rx: mpsc::Receiver<Result<Vec<ChangeRow>>>,
    producer: JoinHandle<()>,
    new_watermark: Option<WatermarkValue>,
    rows_read: u64,
    finished: bool,
}

impl ChangeStream {
    /// Next page, or `None` once the source is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ChangeRow>>> {
        match self.rx.recv().await {
            Some(Ok(rows)) => {
                self.rows_read += rows.len() as u64;
                if self.tracks_watermark {
                    for wm in rows.iter().filter_map(|r| r.watermark) {
                        self.new_watermark = Some(wm.max_with(self.new_watermark));
                    }
                }
                Ok(Some(rows))
            }
            Some(Err(e)) => Err(e),
            None if self.finished => Ok(None),
            None => {
                // Every sender is gone, so the producer has returned or panicked.
                self.finished = true;
                match (&mut self.producer).await {
                    Err(e) if e.is_panic() => Err(ReplicaError::extraction_permanent(
                        &self.table,
                        "page reader panicked",
                    )),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Read every remaining page.
    pub async fn collect_all(mut self) -> Result<ExtractedChanges> {
        let mut rows = Vec::new();
        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }
        debug!(table = %self.table, rows = rows.len(), "Extraction complete");
        Ok(ExtractedChanges {
            rows,
            new_watermark: self.new_watermark,
        })
    }

    /// Watermark implied by the rows read so far.
    pub fn new_watermark(&self) -> Option<WatermarkValue> {
        self.new_watermark
    }

    /// Rows read so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Affinity, ColumnSpec, SourceType};

    fn spec(mode: ChangeDetection) -> TableSpec {
        TableSpec {
            source_name: "alias".into(),
            target_name: "alias".into(),
            primary_key: vec!["address".into()],
            columns: vec![
                ColumnSpec::new("address", SourceType::Text, Affinity::Text).not_null(),
                ColumnSpec::new("version", SourceType::Integer { unsigned: false }, Affinity::Integer),
            ],
            mode,
        }
    }

    #[test]
    fn test_order_columns_watermark_first() {
        let spec = spec(ChangeDetection::WatermarkColumn {
            column: "version".into(),
        });
        assert_eq!(order_columns(&spec), vec!["version".to_string(), "address".to_string()]);
    }

    #[test]
    fn test_order_columns_full_mode_is_key() {
        assert_eq!(order_columns(&spec(ChangeDetection::Full)), vec!["address".to_string()]);
    }

    #[test]
    fn test_order_columns_watermark_in_key() {
        let mut spec = spec(ChangeDetection::WatermarkColumn {
            column: "address".into(),
        });
        spec.primary_key = vec!["address".into()];
        assert_eq!(order_columns(&spec), vec!["address".to_string()]);
    }
}
