//! SQL dialect differences that matter to the tracking table

use sqlx::AnyConnection;

use crate::error::{MigrateError, MigrateResult};

/// Database backends the engine knows how to track migrations on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Resolve the dialect from sqlx's backend name
    pub fn from_backend_name(name: &str) -> MigrateResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(MigrateError::Connection(format!(
                "Unsupported database backend '{}'",
                other
            ))),
        }
    }

    /// Resolve the dialect of a live connection
    pub fn of(conn: &AnyConnection) -> MigrateResult<Self> {
        Self::from_backend_name(conn.backend_name())
    }

    /// Bind placeholder for the `n`th (1-based) parameter
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Expression yielding the current UTC time as a `TIMESTAMP`
    pub fn utc_now(&self) -> &'static str {
        match self {
            Dialect::Postgres => "(now() AT TIME ZONE 'UTC')",
            Dialect::MySql => "UTC_TIMESTAMP()",
            Dialect::Sqlite => "CURRENT_TIMESTAMP",
        }
    }

    /// Expression rendering a column as text
    pub fn as_text(&self, column: &str) -> String {
        match self {
            Dialect::Postgres => format!("CAST({} AS VARCHAR)", column),
            Dialect::MySql => format!("CAST({} AS CHAR)", column),
            Dialect::Sqlite => format!("CAST({} AS TEXT)", column),
        }
    }

    /// Whether DDL participates in transactions.
    ///
    /// MySQL commits implicitly around DDL, so the tracking row for a unit is
    /// written as an immediately following auto-committed statement there.
    pub fn transactional_ddl(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }
}
