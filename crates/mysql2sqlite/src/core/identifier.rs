//! Identifier validation and quoting.
//!
//! Identifiers cannot be bound as statement parameters, so every table and
//! column name that ends up in generated SQL goes through this module:
//! validated first, then quoted with the dialect's quote character and any
//! embedded quote characters doubled.

use crate::error::{ReplicaError, Result};

/// MySQL caps identifiers at 64 characters; SQLite has no limit.
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ReplicaError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(ReplicaError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ReplicaError::Config(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier using backticks.
pub fn quote_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a SQLite identifier using double quotes.
pub fn quote_sqlite(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a list of SQLite identifiers as a comma-separated list.
pub fn quote_sqlite_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_sqlite(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quote a list of MySQL identifiers as a comma-separated list.
pub fn quote_mysql_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_mysql(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}
