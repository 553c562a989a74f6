//! Configuration validation.

use std::collections::HashSet;

use super::{Config, TableConfig, TableMode};
use crate::checkpoint::CHECKPOINT_TABLE;
use crate::core::identifier::validate_identifier;
use crate::error::{ReplicaError, Result};

const SSL_MODES: &[&str] = &[
    "disabled",
    "preferred",
    "required",
    "verify_ca",
    "verify_identity",
];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(ReplicaError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(ReplicaError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(ReplicaError::Config("source.user is required".into()));
    }
    if !SSL_MODES.contains(&config.source.ssl_mode.as_str()) {
        return Err(ReplicaError::Config(format!(
            "source.ssl_mode must be one of {}, got '{}'",
            SSL_MODES.join(", "),
            config.source.ssl_mode
        )));
    }

    // Target validation
    if config.target.path.as_os_str().is_empty() {
        return Err(ReplicaError::Config("target.path is required".into()));
    }

    // Sync validation
    let sync = &config.sync;
    if sync.workers == 0 {
        return Err(ReplicaError::Config("sync.workers must be at least 1".into()));
    }
    if sync.batch_size == 0 {
        return Err(ReplicaError::Config("sync.batch_size must be at least 1".into()));
    }
    if sync.page_size == 0 {
        return Err(ReplicaError::Config("sync.page_size must be at least 1".into()));
    }
    if let Some(0) = sync.run_timeout_secs {
        return Err(ReplicaError::Config(
            "sync.run_timeout_secs must be at least 1".into(),
        ));
    }
    if sync.retry.max_attempts == 0 {
        return Err(ReplicaError::Config(
            "sync.retry.max_attempts must be at least 1".into(),
        ));
    }
    if sync.retry.backoff_factor.is_nan() || sync.retry.backoff_factor < 1.0 {
        return Err(ReplicaError::Config(
            "sync.retry.backoff_factor must be at least 1.0".into(),
        ));
    }
    if let Some(max) = config.source.max_connections {
        if (max as usize) < sync.workers {
            return Err(ReplicaError::Config(format!(
                "source.max_connections ({}) must be at least sync.workers ({})",
                max, sync.workers
            )));
        }
    }

    // Table validation
    let mut targets = HashSet::new();
    for table in &config.tables {
        validate_table(table)?;
        if !targets.insert(table.target_name().to_lowercase()) {
            return Err(ReplicaError::Config(format!(
                "table '{}' is configured more than once",
                table.target_name()
            )));
        }
    }

    Ok(())
}

fn validate_table(table: &TableConfig) -> Result<()> {
    let name = table.target_name();
    validate_identifier(&table.source)?;
    validate_identifier(name)?;

    if name.eq_ignore_ascii_case(CHECKPOINT_TABLE) {
        return Err(ReplicaError::Config(format!(
            "table name '{}' is reserved for checkpoints",
            name
        )));
    }

    let mut pk_seen = HashSet::new();
    for column in &table.primary_key {
        validate_identifier(column)?;
        if !pk_seen.insert(column.to_lowercase()) {
            return Err(ReplicaError::Config(format!(
                "tables.{}.primary_key lists '{}' twice",
                name, column
            )));
        }
    }

    match table.mode {
        TableMode::Full => {
            if table.watermark_column.is_some() || table.deleted_column.is_some() {
                return Err(ReplicaError::Config(format!(
                    "tables.{}: mode 'full' takes no watermark_column or deleted_column",
                    name
                )));
            }
        }
        TableMode::Watermark => {
            if table.watermark_column.is_none() {
                return Err(ReplicaError::Config(format!(
                    "tables.{}.watermark_column is required for mode 'watermark'",
                    name
                )));
            }
            if table.deleted_column.is_some() {
                return Err(ReplicaError::Config(format!(
                    "tables.{}.deleted_column requires mode 'soft_delete'",
                    name
                )));
            }
        }
        TableMode::SoftDelete => {
            let (Some(watermark), Some(deleted)) = (&table.watermark_column, &table.deleted_column)
            else {
                return Err(ReplicaError::Config(format!(
                    "tables.{}: mode 'soft_delete' requires watermark_column and deleted_column",
                    name
                )));
            };
            if watermark.eq_ignore_ascii_case(deleted) {
                return Err(ReplicaError::Config(format!(
                    "tables.{}: watermark_column and deleted_column must differ",
                    name
                )));
            }
        }
    }

    for column in table.watermark_column.iter().chain(table.deleted_column.iter()) {
        validate_identifier(column)?;
    }

    for index in &table.indexes {
        if index.columns.is_empty() {
            return Err(ReplicaError::Config(format!(
                "tables.{}: index needs at least one column",
                name
            )));
        }
        for column in &index.columns {
            validate_identifier(column)?;
        }
        validate_identifier(&index.name_for(name))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, SourceConfig, SyncConfig, TargetConfig};

    fn table(source: &str, mode: TableMode) -> TableConfig {
        TableConfig {
            source: source.to_string(),
            target: None,
            primary_key: Vec::new(),
            mode,
            watermark_column: None,
            deleted_column: None,
            indexes: Vec::new(),
        }
    }

    fn valid_config() -> Config {
        let mut mailbox = table("mailbox", TableMode::Watermark);
        mailbox.watermark_column = Some("modified".to_string());

        Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                port: 3306,
                database: "mail".to_string(),
                user: "replica".to_string(),
                password: "password".to_string(),
                ssl_mode: "disabled".to_string(),
                max_connections: None,
                connect_timeout_secs: 10,
            },
            target: TargetConfig {
                path: "/tmp/mail.db".into(),
                create_directories: false,
                create_missing_tables: false,
                busy_timeout_ms: 5_000,
            },
            sync: SyncConfig::default(),
            tables: vec![table("domain", TableMode::Full), mailbox],
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_table_list_is_valid() {
        let mut config = valid_config();
        config.tables.clear();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_path() {
        let mut config = valid_config();
        config.target.path = "".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_ssl_mode() {
        let mut config = valid_config();
        config.source.ssl_mode = "maybe".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_and_batch_size() {
        let mut config = valid_config();
        config.sync.workers = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.sync.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_pool_smaller_than_workers() {
        let mut config = valid_config();
        config.sync.workers = 8;
        config.source.max_connections = Some(4);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_watermark_mode_requires_column() {
        let mut config = valid_config();
        config.tables.push(table("alias", TableMode::Watermark));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("watermark_column is required"));
    }

    #[test]
    fn test_soft_delete_requires_both_columns() {
        let mut config = valid_config();
        let mut alias = table("alias", TableMode::SoftDelete);
        alias.watermark_column = Some("modified".into());
        config.tables.push(alias);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_full_mode_rejects_watermark_column() {
        let mut config = valid_config();
        let mut domain = table("domain2", TableMode::Full);
        domain.watermark_column = Some("modified".into());
        config.tables.push(domain);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_target_tables() {
        let mut config = valid_config();
        let mut dup = table("domain_copy", TableMode::Full);
        dup.target = Some("DOMAIN".into());
        config.tables.push(dup);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_reserved_checkpoint_table() {
        let mut config = valid_config();
        let mut t = table("anything", TableMode::Full);
        t.target = Some(CHECKPOINT_TABLE.into());
        config.tables.push(t);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_index_without_columns() {
        let mut config = valid_config();
        config.tables[0].indexes.push(IndexConfig {
            name: None,
            columns: Vec::new(),
            unique: false,
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
