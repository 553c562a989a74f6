//! SQLite statement builders and parameter binding.

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use crate::config::IndexConfig;
use crate::core::identifier::{quote_sqlite, quote_sqlite_list};
use crate::core::{ColumnSpec, TargetValue};

/// Temp table holding the keys seen by a FULL pass.
pub const SEEN_KEYS_TABLE: &str = "_mysql2sqlite_seen";

/// Single-row upsert keyed on `key`.
///
/// Updates every non-key column on conflict, or does nothing when the table
/// has only key columns.
pub fn upsert_sql(table: &str, columns: &[String], key: &[String]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO",
        quote_sqlite(table),
        quote_sqlite_list(columns),
        placeholders,
        quote_sqlite_list(key)
    );

    let non_key: Vec<&String> = columns
        .iter()
        .filter(|c| !key.iter().any(|k| k.eq_ignore_ascii_case(c)))
        .collect();

    if non_key.is_empty() {
        sql.push_str(" NOTHING");
    } else {
        let update_set = non_key
            .iter()
            .map(|c| format!("{} = excluded.{}", quote_sqlite(c), quote_sqlite(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" UPDATE SET {}", update_set));
    }

    sql
}

/// Delete one row by key.
pub fn delete_sql(table: &str, key: &[String]) -> String {
    format!("DELETE FROM {} WHERE {}", quote_sqlite(table), key_predicate(key, None))
}

/// `CREATE TABLE` for a bootstrapped replica table.
pub fn create_table_sql(table: &str, columns: &[ColumnSpec], primary_key: &[String]) -> String {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote_sqlite(&c.name), c.target_type.declared_name());
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();
    if !primary_key.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", quote_sqlite_list(primary_key)));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_sqlite(table),
        defs.join(",\n    ")
    )
}

/// `CREATE INDEX` for a configured index.
pub fn create_index_sql(table: &str, index: &IndexConfig) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_sqlite(&index.name_for(table)),
        quote_sqlite(table),
        quote_sqlite_list(&index.columns)
    )
}

/// Temp table for seen keys, with column affinities matching the replica
/// so that key comparison in the purge behaves like the upsert's conflict check.
pub fn create_seen_keys_sql(key_columns: &[ColumnSpec]) -> String {
    let defs = key_columns
        .iter()
        .map(|c| format!("{} {}", quote_sqlite(&c.name), c.target_type.declared_name()))
        .collect::<Vec<_>>()
        .join(", ");
    let names: Vec<&str> = key_columns.iter().map(|c| c.name.as_str()).collect();
    format!(
        "CREATE TEMP TABLE {} ({}, PRIMARY KEY ({}))",
        quote_sqlite(SEEN_KEYS_TABLE),
        defs,
        quote_sqlite_list(&names)
    )
}

pub fn drop_seen_keys_sql() -> String {
    format!("DROP TABLE IF EXISTS temp.{}", quote_sqlite(SEEN_KEYS_TABLE))
}

pub fn insert_seen_key_sql(key: &[String]) -> String {
    format!(
        "INSERT OR IGNORE INTO temp.{} ({}) VALUES ({})",
        quote_sqlite(SEEN_KEYS_TABLE),
        quote_sqlite_list(key),
        vec!["?"; key.len()].join(", ")
    )
}

/// Delete every replica row whose key is not in the seen-keys table.
pub fn purge_unseen_sql(table: &str, key: &[String]) -> String {
    let target = quote_sqlite(table);
    format!(
        "DELETE FROM {t} WHERE NOT EXISTS (SELECT 1 FROM temp.{s} AS s WHERE {p})",
        t = target,
        s = quote_sqlite(SEEN_KEYS_TABLE),
        p = key_predicate(key, Some((&target, "s")))
    )
}

/// `a = ? AND b = ?`, or `t.a = s.a AND ...` when joining two tables.
fn key_predicate(key: &[String], join: Option<(&str, &str)>) -> String {
    key.iter()
        .map(|k| {
            let col = quote_sqlite(k);
            match join {
                Some((left, right)) => format!("{}.{} = {}.{}", right, col, left, col),
                None => format!("{} = ?", col),
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Bind a target value to a SQLite query.
pub fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &TargetValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        TargetValue::Null => query.bind(None::<i64>),
        TargetValue::Integer(v) => query.bind(*v),
        TargetValue::Real(v) => query.bind(*v),
        TargetValue::Text(v) => query.bind(v.clone()),
        TargetValue::Blob(v) => query.bind(v.clone()),
    }
}
