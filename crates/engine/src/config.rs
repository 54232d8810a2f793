//! Migration configuration

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{MigrateError, MigrateResult};

/// Default name of the tracking table
pub const DEFAULT_MIGRATION_TABLE: &str = "_yoyo_migration";

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migration_table: String,
    /// Treat every step failure as ignored
    pub force: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migration_table: DEFAULT_MIGRATION_TABLE.to_string(),
            force: false,
        }
    }
}

impl MigrateConfig {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_migration_table(mut self, table: impl Into<String>) -> Self {
        self.migration_table = table.into();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Validate the configuration before it is used to build SQL
    pub fn validate(&self) -> MigrateResult<()> {
        validate_table_name(&self.migration_table)
    }
}

/// The tracking table name is interpolated into SQL, so it must be a plain
/// (optionally schema-qualified) identifier
pub fn validate_table_name(name: &str) -> MigrateResult<()> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let re = IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("identifier pattern is valid")
    });

    if re.is_match(name) {
        Ok(())
    } else {
        Err(MigrateError::Config(format!(
            "'{}' is not a valid migration table name",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MigrateConfig::default();
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(config.migration_table, "_yoyo_migration");
        assert!(!config.force);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("another_migration_table").is_ok());
        assert!(validate_table_name("ops.migrations").is_ok());
        assert!(validate_table_name("1table").is_err());
        assert!(validate_table_name("t; DROP TABLE users").is_err());
        assert!(validate_table_name("").is_err());
    }
}
