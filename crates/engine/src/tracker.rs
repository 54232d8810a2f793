//! State tracking - the table recording which migrations are applied
//!
//! A row's existence is the only meaning of "applied". Rows are written and
//! deleted on whatever connection the caller passes in, which is the open
//! transaction of the unit's last step wherever the backend allows it.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{AnyConnection, Row};
use tracing::debug;

use crate::config::validate_table_name;
use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};
use crate::step::Direction;

/// Migration status in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub id: String,
    pub applied_at_utc: DateTime<Utc>,
}

/// Reads and writes the tracking table
#[derive(Debug, Clone)]
pub struct StateTracker {
    table: String,
}

impl StateTracker {
    /// Create a tracker for the named table
    pub fn new(table: impl Into<String>) -> MigrateResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the tracking table if it does not exist yet
    pub async fn ensure_schema(&self, conn: &mut AnyConnection) -> MigrateResult<()> {
        debug!("Ensuring migration table {} exists", self.table);
        sqlx::query(&self.create_table_sql())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Ids of all applied migrations
    pub async fn applied_ids(&self, conn: &mut AnyConnection) -> MigrateResult<HashSet<String>> {
        let rows = sqlx::query(&format!("SELECT id FROM {}", self.table))
            .fetch_all(&mut *conn)
            .await?;

        let mut ids = HashSet::with_capacity(rows.len());
        for row in rows {
            ids.insert(row.try_get::<String, _>(0)?);
        }
        Ok(ids)
    }

    /// All applied records, ascending by id
    pub async fn applied_records(
        &self,
        conn: &mut AnyConnection,
    ) -> MigrateResult<Vec<AppliedRecord>> {
        let dialect = Dialect::of(conn)?;
        let sql = format!(
            "SELECT id, {} AS applied_at_utc FROM {} ORDER BY id",
            dialect.as_text("applied_at_utc"),
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let applied_at: Option<String> = row.try_get("applied_at_utc")?;
            records.push(AppliedRecord {
                applied_at_utc: parse_timestamp(&id, applied_at.as_deref())?,
                id,
            });
        }
        Ok(records)
    }

    /// Insert the row marking `id` as applied
    pub async fn record_applied(&self, id: &str, conn: &mut AnyConnection) -> MigrateResult<()> {
        let dialect = Dialect::of(conn)?;
        let sql = format!(
            "INSERT INTO {} (id, applied_at_utc) VALUES ({}, {})",
            self.table,
            dialect.placeholder(1),
            dialect.utc_now()
        );
        debug!("Recording {} as applied", id);
        sqlx::query(&sql).bind(id.to_string()).execute(&mut *conn).await?;
        Ok(())
    }

    /// Delete the row for `id`
    pub async fn record_rolled_back(
        &self,
        id: &str,
        conn: &mut AnyConnection,
    ) -> MigrateResult<()> {
        let dialect = Dialect::of(conn)?;
        let sql = format!(
            "DELETE FROM {} WHERE id = {}",
            self.table,
            dialect.placeholder(1)
        );
        debug!("Removing applied record for {}", id);
        sqlx::query(&sql).bind(id.to_string()).execute(&mut *conn).await?;
        Ok(())
    }

    /// Apply the tracking change that completing `direction` implies
    pub async fn record(
        &self,
        id: &str,
        direction: Direction,
        conn: &mut AnyConnection,
    ) -> MigrateResult<()> {
        match direction {
            Direction::Apply => self.record_applied(id, conn).await,
            Direction::Rollback => self.record_rolled_back(id, conn).await,
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id VARCHAR(255) NOT NULL PRIMARY KEY,\n    \
                applied_at_utc TIMESTAMP\n\
            )",
            self.table
        )
    }
}

fn parse_timestamp(id: &str, value: Option<&str>) -> MigrateResult<DateTime<Utc>> {
    let value = value.ok_or_else(|| decode_error(format!("Applied record '{}' has no timestamp", id)))?;
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| {
            decode_error(format!(
                "Applied record '{}' has unreadable timestamp '{}': {}",
                id, value, e
            ))
        })?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn decode_error(message: String) -> MigrateError {
    MigrateError::Database(sqlx::Error::Decode(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_rejects_unsafe_table_names() {
        assert!(StateTracker::new("_yoyo_migration").is_ok());
        assert!(StateTracker::new("x; DROP TABLE y").is_err());
    }

    #[test]
    fn test_create_table_sql() {
        let tracker = StateTracker::new("test_migrations").unwrap();
        let sql = tracker.create_table_sql();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS test_migrations"));
        assert!(sql.contains("id VARCHAR(255) NOT NULL PRIMARY KEY"));
        assert!(sql.contains("applied_at_utc TIMESTAMP"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let plain = parse_timestamp("a", Some("2024-03-01 12:30:45")).unwrap();
        assert_eq!((plain.year(), plain.month(), plain.day()), (2024, 3, 1));
        assert_eq!(plain.hour(), 12);

        let fractional = parse_timestamp("a", Some("2024-03-01 12:30:45.123456")).unwrap();
        assert_eq!(fractional.nanosecond(), 123_456_000);

        assert!(parse_timestamp("a", None).is_err());
        assert!(parse_timestamp("a", Some("yesterday")).is_err());
    }
}
