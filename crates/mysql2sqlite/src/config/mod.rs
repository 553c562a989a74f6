//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{ReplicaError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicaError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up a table by its replica name.
    pub fn table(&self, target_name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.target_name() == target_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source:
  host: db.example.org
  database: mail
  user: replica
  password: secret
target:
  path: /var/lib/mysql2sqlite/mail.db
  create_directories: true
sync:
  workers: 2
  schema_drift: warn
tables:
  - source: domain
    mode: full
  - source: mailbox
    mode: watermark
    watermark_column: modified
  - source: alias
    target: virtual_alias
    mode: soft_delete
    watermark_column: modified
    deleted_column: deleted
    indexes:
      - columns: [goto]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.ssl_mode, "preferred");
        assert!(config.target.create_directories);
        assert!(!config.target.create_missing_tables);
        assert_eq!(config.target.busy_timeout_ms, 5_000);
        assert_eq!(config.sync.workers, 2);
        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.sync.schema_drift, DriftPolicy::Warn);
        assert_eq!(config.sync.retry.max_attempts, 3);
        assert_eq!(config.tables.len(), 3);
    }

    #[test]
    fn test_table_lookup_by_target_name() {
        let config = Config::from_yaml(YAML).unwrap();
        let alias = config.table("virtual_alias").unwrap();
        assert_eq!(alias.source, "alias");
        assert_eq!(
            alias.change_detection(),
            Some(crate::core::ChangeDetection::SoftDeleteAware {
                watermark_column: "modified".into(),
                deleted_column: "deleted".into(),
            })
        );
        assert_eq!(alias.indexes[0].name_for("virtual_alias"), "idx_virtual_alias_goto");
        assert!(config.table("alias").is_none());
    }

    #[test]
    fn test_missing_section_is_yaml_error() {
        let err = Config::from_yaml("source:\n  host: x\n").unwrap_err();
        assert!(matches!(err, crate::error::ReplicaError::Yaml(_)));
    }
}
