//! MySQL/MariaDB source reader.
//!
//! Uses SQLx for connection pooling and async query execution. Integer,
//! decimal, temporal and character columns are selected through `CAST` so
//! that every value decodes from one of a handful of wire types; zero dates
//! and out-of-range decimals then survive as text instead of failing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow,
    MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Row, ValueRef};
use tracing::{debug, info};

use super::{PageRequest, SourceReader};
use crate::config::SourceConfig;
use crate::core::identifier::{quote_mysql, quote_mysql_list};
use crate::core::value::{DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use crate::core::{ColumnSpec, SourceColumn, SourceTable, SourceType, SourceValue};
use crate::error::{ReplicaError, Result};

/// MySQL/MariaDB source reader implementation.
pub struct MysqlReader {
    pool: MySqlPool,
    database: String,
}

impl MysqlReader {
    /// Create a new MySQL reader from configuration.
    pub async fn new(config: &SourceConfig, max_conns: u32) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(parse_ssl_mode(&config.ssl_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| ReplicaError::pool(e, "creating MySQL source pool"))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| ReplicaError::pool(e, "testing MySQL source connection"))?;

        info!(
            "Connected to MySQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<SourceColumn>> {
        // CAST to CHAR to handle collation differences
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
                CAST(COLUMN_TYPE AS CHAR(1024)) AS COLUMN_TYPE,
                CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED) AS num_precision,
                CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) AS num_scale,
                IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReplicaError::extraction(table, e))?;

        rows.iter()
            .map(|row| {
                let data_type: String = row.try_get("DATA_TYPE")?;
                let declared: String = row.try_get("COLUMN_TYPE")?;
                let precision: i64 = row.try_get("num_precision")?;
                let scale: i64 = row.try_get("num_scale")?;
                Ok(SourceColumn {
                    name: row.try_get("COLUMN_NAME")?,
                    source_type: SourceType::from_mysql(
                        &data_type,
                        &declared,
                        u32::try_from(precision).unwrap_or(0),
                        u32::try_from(scale).unwrap_or(0),
                    ),
                    nullable: row.try_get::<i64, _>("is_nullable")? == 1,
                    declared,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| ReplicaError::extraction(table, e))
    }

    async fn load_primary_key(&self, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReplicaError::extraction(table, e))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("COLUMN_NAME"))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ReplicaError::extraction(table, e))
    }
}

#[async_trait]
impl SourceReader for MysqlReader {
    async fn describe_table(&self, table: &str) -> Result<Option<SourceTable>> {
        let columns = self.load_columns(table).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let primary_key = self.load_primary_key(table).await?;

        debug!(
            table = %table,
            columns = columns.len(),
            "Loaded MySQL table metadata, primary key ({})",
            primary_key.join(", ")
        );

        Ok(Some(SourceTable {
            name: table.to_string(),
            columns,
            primary_key,
        }))
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Vec<SourceValue>>> {
        let table = &request.spec.target_name;
        let (sql, params) = build_page_query(request);

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = bind_value(query, param);
        }

        let rows: Vec<MySqlRow> = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReplicaError::extraction(table, e))?;

        rows.iter()
            .map(|row| row_to_values(row, &request.spec.columns))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ReplicaError::extraction_permanent(table, e))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ReplicaError::pool(e, "testing MySQL connection"))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_ssl_mode(mode: &str) -> MySqlSslMode {
    match mode {
        "disabled" => MySqlSslMode::Disabled,
        "required" => MySqlSslMode::Required,
        "verify_ca" => MySqlSslMode::VerifyCa,
        "verify_identity" => MySqlSslMode::VerifyIdentity,
        _ => MySqlSslMode::Preferred,
    }
}

/// Select expression for a column, aliased back to its own name.
fn select_expr(column: &ColumnSpec) -> String {
    let ident = quote_mysql(&column.name);
    match column.source_type {
        SourceType::Integer { unsigned: false } | SourceType::Boolean => {
            format!("CAST({} AS SIGNED) AS {}", ident, ident)
        }
        SourceType::Integer { unsigned: true } => format!("CAST({} AS UNSIGNED) AS {}", ident, ident),
        SourceType::Float | SourceType::Blob => ident,
        SourceType::Decimal { .. }
        | SourceType::Text
        | SourceType::Date
        | SourceType::Time
        | SourceType::DateTime => format!("CAST({} AS CHAR) AS {}", ident, ident),
    }
}

/// Build the keyset-paginated SELECT for a page and its bind parameters.
pub(crate) fn build_page_query(request: &PageRequest) -> (String, Vec<SourceValue>) {
    let spec = &request.spec;
    let select_list = spec
        .columns
        .iter()
        .map(select_expr)
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", select_list, quote_mysql(&spec.source_name));
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(filter) = &request.watermark {
        match &filter.after {
            Some(value) => {
                conditions.push(format!("{} > ?", quote_mysql(&filter.column)));
                params.push(value.clone());
            }
            None => conditions.push(format!("{} IS NOT NULL", quote_mysql(&filter.column))),
        }
    }

    if let Some(after) = &request.after {
        if request.order_by.len() == 1 {
            conditions.push(format!("{} > ?", quote_mysql(&request.order_by[0])));
        } else {
            let placeholders = vec!["?"; request.order_by.len()].join(", ");
            conditions.push(format!(
                "({}) > ({})",
                quote_mysql_list(&request.order_by),
                placeholders
            ));
        }
        params.extend(after.iter().cloned());
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !request.order_by.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", quote_mysql_list(&request.order_by)));
    }

    sql.push_str(&format!(" LIMIT {}", request.limit));

    (sql, params)
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SourceValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SourceValue::Null => query.bind(None::<String>),
        SourceValue::Int(v) => query.bind(*v),
        SourceValue::UInt(v) => query.bind(*v),
        SourceValue::Float(v) => query.bind(*v),
        SourceValue::Decimal(v) => query.bind(v.to_string()),
        SourceValue::Text(v) => query.bind(v.clone()),
        SourceValue::Blob(v) => query.bind(v.clone()),
        SourceValue::Date(v) => query.bind(*v),
        SourceValue::Time(v) => query.bind(*v),
        SourceValue::DateTime(v) => query.bind(*v),
        SourceValue::Bool(v) => query.bind(*v),
    }
}

/// Decode a row into values aligned with `columns`.
fn row_to_values(
    row: &MySqlRow,
    columns: &[ColumnSpec],
) -> std::result::Result<Vec<SourceValue>, String> {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            decode_column(row, i, col).map_err(|e| format!("column '{}': {}", col.name, e))
        })
        .collect()
}

fn decode_column(
    row: &MySqlRow,
    i: usize,
    col: &ColumnSpec,
) -> std::result::Result<SourceValue, sqlx::Error> {
    if row.try_get_raw(i)?.is_null() {
        return Ok(SourceValue::Null);
    }

    let value = match col.source_type {
        SourceType::Integer { unsigned: false } => SourceValue::Int(row.try_get::<i64, _>(i)?),
        SourceType::Integer { unsigned: true } => SourceValue::UInt(row.try_get::<u64, _>(i)?),
        // tinyint(1) may hold any tinyint; only 0 and 1 are booleans.
        SourceType::Boolean => match row.try_get::<i64, _>(i)? {
            0 => SourceValue::Bool(false),
            1 => SourceValue::Bool(true),
            other => SourceValue::Int(other),
        },
        SourceType::Float => match row.try_get::<f64, _>(i) {
            Ok(v) => SourceValue::Float(v),
            Err(_) => SourceValue::Float(f64::from(row.try_get::<f32, _>(i)?)),
        },
        SourceType::Blob => SourceValue::Blob(row.try_get::<Vec<u8>, _>(i)?),
        SourceType::Text => SourceValue::Text(row.try_get::<String, _>(i)?),
        SourceType::Decimal { .. } => text_or(row.try_get::<String, _>(i)?, |s| {
            Decimal::from_str_exact(s).ok().map(SourceValue::Decimal)
        }),
        SourceType::Date => text_or(row.try_get::<String, _>(i)?, |s| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(SourceValue::Date)
        }),
        SourceType::Time => text_or(row.try_get::<String, _>(i)?, |s| {
            NaiveTime::parse_from_str(s, TIME_FORMAT)
                .ok()
                .map(SourceValue::Time)
        }),
        SourceType::DateTime => text_or(row.try_get::<String, _>(i)?, |s| {
            NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
                .ok()
                .map(SourceValue::DateTime)
        }),
    };

    Ok(value)
}

/// Parse canonical text into a typed value, keeping the text when the value
/// has no typed form (zero dates, negative TIME, decimals beyond 28 digits).
fn text_or(text: String, parse: impl FnOnce(&str) -> Option<SourceValue>) -> SourceValue {
    parse(&text).unwrap_or(SourceValue::Text(text))
}
