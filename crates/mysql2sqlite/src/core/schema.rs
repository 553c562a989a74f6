//! Schema metadata for replicated tables.
//!
//! [`SourceTable`] and [`TargetTable`] are raw introspection results from each
//! side. The schema catalog reconciles them into an immutable [`TableSpec`],
//! the unit every later stage of the pipeline works on.

use std::fmt;

use serde::Serialize;

/// Source column type family, derived from MySQL `INFORMATION_SCHEMA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Integer { unsigned: bool },
    Boolean,
    Decimal { precision: u32, scale: u32 },
    Float,
    Text,
    Blob,
    Date,
    Time,
    DateTime,
}

impl SourceType {
    /// Classify a MySQL column from `DATA_TYPE` and `COLUMN_TYPE`.
    ///
    /// Types without a dedicated family (enum, set, json, spatial) are
    /// replicated as text, like any unknown type.
    pub fn from_mysql(data_type: &str, column_type: &str, precision: u32, scale: u32) -> Self {
        let data_type = data_type.to_lowercase();
        let column_type = column_type.to_lowercase();
        let unsigned = column_type.contains("unsigned");

        match data_type.as_str() {
            "tinyint" if column_type.starts_with("tinyint(1)") && !unsigned => SourceType::Boolean,
            "bool" | "boolean" => SourceType::Boolean,
            "bit" if column_type == "bit(1)" => SourceType::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
                SourceType::Integer { unsigned }
            }
            "bit" => SourceType::Integer { unsigned: true },
            "decimal" | "numeric" | "dec" | "fixed" => SourceType::Decimal { precision, scale },
            "float" | "double" | "double precision" | "real" => SourceType::Float,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                SourceType::Blob
            }
            "date" => SourceType::Date,
            "time" => SourceType::Time,
            "datetime" | "timestamp" => SourceType::DateTime,
            _ => SourceType::Text,
        }
    }

    /// Whether a column of this type can carry a watermark.
    pub fn is_watermark_capable(&self) -> bool {
        matches!(
            self,
            SourceType::Integer { .. } | SourceType::Date | SourceType::DateTime
        )
    }

    /// Whether the source reads this type through its canonical text form.
    ///
    /// Decimal and temporal values are selected as `CAST(.. AS CHAR)` so that
    /// out-of-range decimals and zero dates survive decoding.
    pub fn reads_as_text(&self) -> bool {
        matches!(
            self,
            SourceType::Decimal { .. } | SourceType::Date | SourceType::Time | SourceType::DateTime
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Integer { unsigned: true } => write!(f, "integer unsigned"),
            SourceType::Integer { unsigned: false } => write!(f, "integer"),
            SourceType::Boolean => write!(f, "boolean"),
            SourceType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            SourceType::Float => write!(f, "float"),
            SourceType::Text => write!(f, "text"),
            SourceType::Blob => write!(f, "blob"),
            SourceType::Date => write!(f, "date"),
            SourceType::Time => write!(f, "time"),
            SourceType::DateTime => write!(f, "datetime"),
        }
    }
}

/// SQLite column affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Determine affinity from a declared column type, following the rules
    /// in section 3.1 of the SQLite datatype documentation (order matters).
    pub fn from_declared(declared: &str) -> Self {
        let decl = declared.to_uppercase();
        if decl.contains("INT") {
            Affinity::Integer
        } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
            Affinity::Text
        } else if decl.contains("BLOB") || decl.trim().is_empty() {
            Affinity::Blob
        } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// A declared type name that yields this affinity.
    pub fn declared_name(&self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Text => "TEXT",
            Affinity::Blob => "BLOB",
            Affinity::Real => "REAL",
            Affinity::Numeric => "NUMERIC",
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.declared_name())
    }
}

/// How changes are detected for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Re-read the whole table every pass.
    Full,
    /// Rows with `column` strictly greater than the stored watermark.
    WatermarkColumn { column: String },
    /// Like `WatermarkColumn`, and rows with `deleted_column` set become deletes.
    SoftDeleteAware {
        watermark_column: String,
        deleted_column: String,
    },
}

impl ChangeDetection {
    /// Column carrying the watermark, if the mode has one.
    pub fn watermark_column(&self) -> Option<&str> {
        match self {
            ChangeDetection::Full => None,
            ChangeDetection::WatermarkColumn { column } => Some(column),
            ChangeDetection::SoftDeleteAware {
                watermark_column, ..
            } => Some(watermark_column),
        }
    }

    /// Column carrying the soft-delete marker, if the mode has one.
    pub fn deleted_column(&self) -> Option<&str> {
        match self {
            ChangeDetection::SoftDeleteAware { deleted_column, .. } => Some(deleted_column),
            _ => None,
        }
    }

    /// Short mode name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeDetection::Full => "full",
            ChangeDetection::WatermarkColumn { .. } => "watermark",
            ChangeDetection::SoftDeleteAware { .. } => "soft_delete",
        }
    }
}

/// A replicated column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub source_type: SourceType,
    pub target_type: Affinity,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, source_type: SourceType, target_type: Affinity) -> Self {
        Self {
            name: name.into(),
            source_type,
            target_type,
            nullable: true,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Immutable description of one replicated table, produced by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSpec {
    /// Table name in the source database.
    pub source_name: String,
    /// Table name in the replica; also the checkpoint key.
    pub target_name: String,
    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,
    /// Replicated columns, in source ordinal order.
    pub columns: Vec<ColumnSpec>,
    /// Change detection mode.
    pub mode: ChangeDetection,
}

impl TableSpec {
    /// Position of a column in [`TableSpec::columns`].
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Positions of the primary key columns, in key order.
    pub fn pk_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.column_index(pk))
            .collect()
    }

    /// Position of the watermark column, if the mode has one.
    pub fn watermark_index(&self) -> Option<usize> {
        self.mode
            .watermark_column()
            .and_then(|c| self.column_index(c))
    }

    /// Position of the soft-delete column, if the mode has one.
    pub fn deleted_index(&self) -> Option<usize> {
        self.mode.deleted_column().and_then(|c| self.column_index(c))
    }

    /// Column names in replication order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Column as introspected from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    pub source_type: SourceType,
    pub nullable: bool,
    /// Raw `COLUMN_TYPE`, kept for drift reports.
    pub declared: String,
}

/// Table as introspected from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub name: String,
    pub columns: Vec<SourceColumn>,
    pub primary_key: Vec<String>,
}

impl SourceTable {
    pub fn column(&self, name: &str) -> Option<&SourceColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Column as introspected from the replica.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetColumn {
    pub name: String,
    pub declared: String,
    pub affinity: Affinity,
    pub nullable: bool,
}

/// Table as introspected from the replica.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTable {
    pub name: String,
    pub columns: Vec<TargetColumn>,
    /// Primary key columns in key order (empty for rowid-only tables).
    pub primary_key: Vec<String>,
    /// Column sets of UNIQUE indexes, usable as upsert conflict targets.
    pub unique_keys: Vec<Vec<String>>,
}

impl TargetTable {
    pub fn column(&self, name: &str) -> Option<&TargetColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether `key` (any order) is the primary key or a unique index.
    pub fn has_unique_key(&self, key: &[String]) -> bool {
        let same = |candidate: &[String]| {
            candidate.len() == key.len()
                && key
                    .iter()
                    .all(|k| candidate.iter().any(|c| c.eq_ignore_ascii_case(k)))
        };
        (!self.primary_key.is_empty() && same(&self.primary_key))
            || self.unique_keys.iter().any(|u| same(u))
    }
}

/// A schema mismatch between source and replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaDrift {
    /// Column exists in the source but not in the replica.
    ColumnAdded { column: String },
    /// Column exists in the replica but not in the source.
    ColumnRemoved { column: String },
    /// Source type cannot be stored faithfully under the replica's affinity.
    TypeChanged {
        column: String,
        source_type: SourceType,
        target_affinity: Affinity,
    },
    /// Source allows NULL where the replica does not.
    NullabilityChanged { column: String },
    /// Replica has no primary key or unique index on the replicated key.
    PrimaryKeyChanged {
        source_key: Vec<String>,
        target_key: Vec<String>,
    },
}

impl fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaDrift::ColumnAdded { column } => {
                write!(f, "column '{}' added in source", column)
            }
            SchemaDrift::ColumnRemoved { column } => {
                write!(f, "column '{}' missing from source", column)
            }
            SchemaDrift::TypeChanged {
                column,
                source_type,
                target_affinity,
            } => write!(
                f,
                "column '{}' is {} in source but {} in replica",
                column, source_type, target_affinity
            ),
            SchemaDrift::NullabilityChanged { column } => {
                write!(f, "column '{}' is nullable in source but NOT NULL in replica", column)
            }
            SchemaDrift::PrimaryKeyChanged {
                source_key,
                target_key,
            } => write!(
                f,
                "primary key ({}) in source but ({}) in replica",
                source_key.join(", "),
                target_key.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_from_mysql() {
        assert_eq!(
            SourceType::from_mysql("int", "int(11)", 10, 0),
            SourceType::Integer { unsigned: false }
        );
        assert_eq!(
            SourceType::from_mysql("bigint", "bigint(20) unsigned", 20, 0),
            SourceType::Integer { unsigned: true }
        );
        assert_eq!(
            SourceType::from_mysql("tinyint", "tinyint(1)", 3, 0),
            SourceType::Boolean
        );
        assert_eq!(
            SourceType::from_mysql("tinyint", "tinyint(4)", 3, 0),
            SourceType::Integer { unsigned: false }
        );
        assert_eq!(SourceType::from_mysql("bit", "bit(1)", 1, 0), SourceType::Boolean);
        assert_eq!(
            SourceType::from_mysql("decimal", "decimal(10,2)", 10, 2),
            SourceType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(SourceType::from_mysql("VARCHAR", "varchar(255)", 0, 0), SourceType::Text);
        assert_eq!(SourceType::from_mysql("enum", "enum('a','b')", 0, 0), SourceType::Text);
        assert_eq!(SourceType::from_mysql("mediumblob", "mediumblob", 0, 0), SourceType::Blob);
        assert_eq!(SourceType::from_mysql("timestamp", "timestamp", 0, 0), SourceType::DateTime);
    }

    #[test]
    fn test_affinity_rules() {
        assert_eq!(Affinity::from_declared("INTEGER"), Affinity::Integer);
        assert_eq!(Affinity::from_declared("bigint unsigned"), Affinity::Integer);
        assert_eq!(Affinity::from_declared("VARCHAR(255)"), Affinity::Text);
        assert_eq!(Affinity::from_declared("CLOB"), Affinity::Text);
        assert_eq!(Affinity::from_declared("BLOB"), Affinity::Blob);
        assert_eq!(Affinity::from_declared(""), Affinity::Blob);
        assert_eq!(Affinity::from_declared("DOUBLE PRECISION"), Affinity::Real);
        assert_eq!(Affinity::from_declared("DECIMAL(10,5)"), Affinity::Numeric);
        assert_eq!(Affinity::from_declared("DATETIME"), Affinity::Numeric);
        // "CHARINT" contains INT, and rule 1 wins.
        assert_eq!(Affinity::from_declared("CHARINT"), Affinity::Integer);
    }

    #[test]
    fn test_table_spec_indices() {
        let spec = TableSpec {
            source_name: "mailbox".into(),
            target_name: "mailbox".into(),
            primary_key: vec!["username".into()],
            columns: vec![
                ColumnSpec::new("username", SourceType::Text, Affinity::Text).not_null(),
                ColumnSpec::new("quota", SourceType::Integer { unsigned: false }, Affinity::Integer),
                ColumnSpec::new("modified", SourceType::DateTime, Affinity::Text),
            ],
            mode: ChangeDetection::WatermarkColumn {
                column: "Modified".into(),
            },
        };
        assert_eq!(spec.pk_indices(), vec![0]);
        assert_eq!(spec.watermark_index(), Some(2));
        assert_eq!(spec.deleted_index(), None);
        assert!(!spec.columns[0].nullable);
    }

    #[test]
    fn test_target_unique_key_match() {
        let table = TargetTable {
            name: "alias".into(),
            columns: vec![],
            primary_key: vec![],
            unique_keys: vec![vec!["address".into(), "domain".into()]],
        };
        assert!(table.has_unique_key(&["domain".to_string(), "address".to_string()]));
        assert!(!table.has_unique_key(&["address".to_string()]));
    }

    #[test]
    fn test_drift_display() {
        let drift = SchemaDrift::TypeChanged {
            column: "quota".into(),
            source_type: SourceType::Integer { unsigned: false },
            target_affinity: Affinity::Text,
        };
        assert_eq!(
            drift.to_string(),
            "column 'quota' is integer in source but TEXT in replica"
        );
    }
}
