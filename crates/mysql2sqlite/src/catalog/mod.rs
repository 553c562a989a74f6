//! Run-scoped schema catalog.
//!
//! Reconciles a source table with its replica counterpart into a
//! [`TableSpec`]. One catalog lives for one run; nothing is cached across
//! runs, so upstream schema changes are picked up on the next pass.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{DriftPolicy, TableConfig};
use crate::core::{ChangeDetection, ColumnSpec, SchemaDrift, SourceTable, TableSpec, TargetTable};
use crate::error::{ReplicaError, Result};
use crate::source::SourceReader;
use crate::target::TargetDb;
use crate::typemap;

/// How the catalog treats mismatches and missing replica tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogOptions {
    pub drift_policy: DriftPolicy,
    pub create_missing_tables: bool,
}

/// Describes configured tables against both databases.
pub struct SchemaCatalog {
    source: Arc<dyn SourceReader>,
    target: Arc<TargetDb>,
    options: CatalogOptions,
    specs: Mutex<HashMap<String, Arc<TableSpec>>>,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn SourceReader>, target: Arc<TargetDb>, options: CatalogOptions) -> Self {
        Self {
            source,
            target,
            options,
            specs: Mutex::new(HashMap::new()),
        }
    }

    /// Build (or return the cached) spec for a configured table.
    pub async fn describe(&self, config: &TableConfig) -> Result<Arc<TableSpec>> {
        let name = config.target_name();
        if let Some(spec) = self.specs.lock().await.get(name) {
            return Ok(Arc::clone(spec));
        }

        let (source, target) = self.load_pair(config, self.options.create_missing_tables).await?;
        let spec = Arc::new(self.build_spec(config, &source, &target)?);

        self.specs
            .lock()
            .await
            .insert(name.to_string(), Arc::clone(&spec));
        Ok(spec)
    }

    /// Report drift for a table without building a spec or creating anything.
    pub async fn check(&self, config: &TableConfig) -> Result<BTreeSet<SchemaDrift>> {
        let (source, target) = self.load_pair(config, false).await?;
        Ok(Self::diff(&source, &target))
    }

    /// Compare a source table with its replica.
    pub fn diff(source: &SourceTable, target: &TargetTable) -> BTreeSet<SchemaDrift> {
        let mut drift = BTreeSet::new();

        for column in &source.columns {
            let Some(replica) = target.column(&column.name) else {
                drift.insert(SchemaDrift::ColumnAdded {
                    column: column.name.clone(),
                });
                continue;
            };
            if !typemap::is_compatible(column.source_type, replica.affinity) {
                drift.insert(SchemaDrift::TypeChanged {
                    column: column.name.clone(),
                    source_type: column.source_type,
                    target_affinity: replica.affinity,
                });
            }
            // Key columns are created NOT NULL whatever the source says.
            let is_key = source
                .primary_key
                .iter()
                .any(|k| k.eq_ignore_ascii_case(&column.name));
            if column.nullable && !replica.nullable && !is_key {
                drift.insert(SchemaDrift::NullabilityChanged {
                    column: column.name.clone(),
                });
            }
        }

        for column in &target.columns {
            if source.column(&column.name).is_none() {
                drift.insert(SchemaDrift::ColumnRemoved {
                    column: column.name.clone(),
                });
            }
        }

        if !source.primary_key.is_empty() && !target.has_unique_key(&source.primary_key) {
            drift.insert(SchemaDrift::PrimaryKeyChanged {
                source_key: source.primary_key.clone(),
                target_key: target.primary_key.clone(),
            });
        }

        drift
    }

    /// Introspect both sides, applying the configured primary key override.
    async fn load_pair(
        &self,
        config: &TableConfig,
        create_missing: bool,
    ) -> Result<(SourceTable, TargetTable)> {
        let name = config.target_name();

        let mut source = self
            .source
            .describe_table(&config.source)
            .await?
            .ok_or_else(|| {
                ReplicaError::schema(name, format!("table '{}' not found in source", config.source))
            })?;

        if !config.primary_key.is_empty() {
            for column in &config.primary_key {
                if source.column(column).is_none() {
                    return Err(ReplicaError::schema(
                        name,
                        format!("configured primary key column '{}' not found in source", column),
                    ));
                }
            }
            source.primary_key = config.primary_key.clone();
        }
        if source.primary_key.is_empty() {
            return Err(ReplicaError::schema(
                name,
                "primary key cannot be determined (none in source, none configured)",
            ));
        }

        let target = match self.target.describe_table(name).await? {
            Some(target) => target,
            None if create_missing => {
                self.bootstrap(config, &source).await?;
                self.target.describe_table(name).await?.ok_or_else(|| {
                    ReplicaError::schema(name, "replica table missing after creation")
                })?
            }
            None => {
                return Err(ReplicaError::schema(name, "table not found in replica"));
            }
        };

        Ok((source, target))
    }

    /// Create a missing replica table from the source description.
    async fn bootstrap(&self, config: &TableConfig, source: &SourceTable) -> Result<()> {
        let columns: Vec<ColumnSpec> = source
            .columns
            .iter()
            .map(|c| {
                let is_key = source
                    .primary_key
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(&c.name));
                ColumnSpec {
                    name: c.name.clone(),
                    source_type: c.source_type,
                    target_type: typemap::natural_affinity(c.source_type),
                    nullable: c.nullable && !is_key,
                }
            })
            .collect();

        self.target
            .create_table(
                config.target_name(),
                &columns,
                &source.primary_key,
                &config.indexes,
            )
            .await
    }

    fn build_spec(
        &self,
        config: &TableConfig,
        source: &SourceTable,
        target: &TargetTable,
    ) -> Result<TableSpec> {
        let name = config.target_name();
        let mode = config.change_detection().ok_or_else(|| {
            ReplicaError::schema(name, "change detection mode is missing a column")
        })?;

        let drift = Self::diff(source, target);
        if !drift.is_empty() {
            let listed = drift
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let fatal = drift
                .iter()
                .any(|d| matches!(d, SchemaDrift::PrimaryKeyChanged { .. }));
            if fatal || self.options.drift_policy == DriftPolicy::Fail {
                return Err(ReplicaError::schema(name, format!("schema drift: {}", listed)));
            }
            for d in &drift {
                warn!(table = %name, "Schema drift: {}", d);
            }
        }

        // Replicate the columns both sides have, in source order.
        let columns: Vec<ColumnSpec> = source
            .columns
            .iter()
            .filter_map(|c| {
                target.column(&c.name).map(|t| ColumnSpec {
                    name: c.name.clone(),
                    source_type: c.source_type,
                    target_type: t.affinity,
                    nullable: t.nullable,
                })
            })
            .collect();

        let required = source
            .primary_key
            .iter()
            .map(String::as_str)
            .chain(mode.watermark_column())
            .chain(mode.deleted_column());
        for column in required {
            if source.column(column).is_none() {
                return Err(ReplicaError::schema(
                    name,
                    format!("column '{}' not found in source", column),
                ));
            }
            if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)) {
                return Err(ReplicaError::schema(
                    name,
                    format!("column '{}' is needed for replication but missing from replica", column),
                ));
            }
        }

        if let Some(wm) = mode.watermark_column().and_then(|c| source.column(c)) {
            if !wm.source_type.is_watermark_capable() {
                return Err(ReplicaError::schema(
                    name,
                    format!(
                        "watermark column '{}' is {}, expected an integer, date or datetime column",
                        wm.name, wm.source_type
                    ),
                ));
            }
            if wm.nullable {
                warn!(
                    table = %name,
                    column = %wm.name,
                    "Watermark column is nullable; rows where it is NULL are not replicated"
                );
            }
        }

        // Use the source's spelling of configured column names.
        let canonical = |n: &str| {
            source
                .column(n)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| n.to_string())
        };
        let primary_key = source.primary_key.iter().map(|k| canonical(k)).collect();
        let mode = match mode {
            ChangeDetection::Full => ChangeDetection::Full,
            ChangeDetection::WatermarkColumn { column } => ChangeDetection::WatermarkColumn {
                column: canonical(&column),
            },
            ChangeDetection::SoftDeleteAware {
                watermark_column,
                deleted_column,
            } => ChangeDetection::SoftDeleteAware {
                watermark_column: canonical(&watermark_column),
                deleted_column: canonical(&deleted_column),
            },
        };

        info!(
            table = %name,
            source = %source.name,
            mode = mode.name(),
            columns = columns.len(),
            "Described table"
        );

        Ok(TableSpec {
            source_name: source.name.clone(),
            target_name: name.to_string(),
            primary_key,
            columns,
            mode,
        })
    }
}
