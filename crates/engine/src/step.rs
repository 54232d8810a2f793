//! Steps - the smallest executable unit of a migration
//!
//! A step pairs a forward action with an optional reverse action. Actions are
//! either SQL text or a procedure receiving the live connection; the executor
//! runs both through [`Action::execute`] without caring which one it holds.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::{AnyConnection, Executor};
use tracing::debug;

use crate::error::MigrateError;

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Run forward actions
    Apply,
    /// Run reverse actions
    Rollback,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Apply => "apply",
            Direction::Rollback => "rollback",
        }
    }

    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Apply => Direction::Rollback,
            Direction::Rollback => Direction::Apply,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which directions may fail without halting the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoreErrors {
    #[default]
    None,
    Apply,
    Rollback,
    All,
}

impl IgnoreErrors {
    /// Whether a failure in `direction` is swallowed by this policy
    pub fn matches(&self, direction: Direction) -> bool {
        match self {
            IgnoreErrors::None => false,
            IgnoreErrors::All => true,
            IgnoreErrors::Apply => direction == Direction::Apply,
            IgnoreErrors::Rollback => direction == Direction::Rollback,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == IgnoreErrors::None
    }
}

impl FromStr for IgnoreErrors {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(IgnoreErrors::None),
            "apply" => Ok(IgnoreErrors::Apply),
            "rollback" => Ok(IgnoreErrors::Rollback),
            "all" => Ok(IgnoreErrors::All),
            other => Err(MigrateError::Load(format!(
                "ignore_errors must be one of apply, rollback, all (got '{}')",
                other
            ))),
        }
    }
}

/// Signature of a procedural action
pub type ProcedureFn =
    dyn for<'c> Fn(&'c mut AnyConnection) -> BoxFuture<'c, anyhow::Result<()>> + Send + Sync;

/// A single directional action
#[derive(Clone)]
pub enum Action {
    /// SQL text, executed unprepared so it may contain several statements
    Sql(String),
    /// Code run against the live connection
    Procedure(Arc<ProcedureFn>),
}

impl Action {
    /// Build a SQL action
    pub fn sql(statement: impl Into<String>) -> Self {
        Action::Sql(statement.into())
    }

    /// Build a procedural action
    ///
    /// ```rust,ignore
    /// let action = Action::procedure(|conn| Box::pin(async move {
    ///     sqlx::query("UPDATE users SET active = 1").execute(&mut *conn).await?;
    ///     Ok(())
    /// }));
    /// ```
    pub fn procedure<F>(f: F) -> Self
    where
        F: for<'c> Fn(&'c mut AnyConnection) -> BoxFuture<'c, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Action::Procedure(Arc::new(f))
    }

    /// True for SQL actions holding only whitespace
    pub fn is_empty(&self) -> bool {
        matches!(self, Action::Sql(sql) if sql.trim().is_empty())
    }

    /// Run the action against the connection
    pub async fn execute(&self, conn: &mut AnyConnection) -> anyhow::Result<()> {
        match self {
            Action::Sql(sql) => {
                debug!(" - executing {:?}", sql);
                conn.execute(sql.as_str()).await?;
                Ok(())
            }
            Action::Procedure(procedure) => procedure(conn).await,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            Action::Procedure(_) => f.write_str("Procedure(..)"),
        }
    }
}

impl From<&str> for Action {
    fn from(sql: &str) -> Self {
        Action::sql(sql)
    }
}

impl From<String> for Action {
    fn from(sql: String) -> Self {
        Action::Sql(sql)
    }
}

/// Forward action, optional reverse action and error-tolerance policy
#[derive(Debug, Clone)]
pub struct Step {
    apply: Action,
    rollback: Option<Action>,
    ignore_errors: IgnoreErrors,
}

impl Step {
    /// Create a step with a forward action only
    pub fn new(apply: impl Into<Action>) -> Self {
        Self {
            apply: apply.into(),
            rollback: None,
            ignore_errors: IgnoreErrors::None,
        }
    }

    /// Set the reverse action
    pub fn with_rollback(mut self, rollback: impl Into<Action>) -> Self {
        self.rollback = Some(rollback.into());
        self
    }

    /// Set the error-tolerance policy
    pub fn ignore_errors(mut self, policy: IgnoreErrors) -> Self {
        self.ignore_errors = policy;
        self
    }

    pub fn apply_action(&self) -> &Action {
        &self.apply
    }

    pub fn rollback_action(&self) -> Option<&Action> {
        self.rollback.as_ref()
    }

    pub fn policy(&self) -> IgnoreErrors {
        self.ignore_errors
    }

    /// Action for a direction; `None` when rolling back a step without reverse
    pub fn action(&self, direction: Direction) -> Option<&Action> {
        match direction {
            Direction::Apply => Some(&self.apply),
            Direction::Rollback => self.rollback.as_ref(),
        }
    }

    /// Run the step in `direction`; a missing reverse action is a no-op
    pub async fn execute(
        &self,
        direction: Direction,
        conn: &mut AnyConnection,
    ) -> anyhow::Result<()> {
        match self.action(direction) {
            Some(action) => action.execute(conn).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_errors_matching() {
        assert!(!IgnoreErrors::None.matches(Direction::Apply));
        assert!(!IgnoreErrors::None.matches(Direction::Rollback));
        assert!(IgnoreErrors::Apply.matches(Direction::Apply));
        assert!(!IgnoreErrors::Apply.matches(Direction::Rollback));
        assert!(IgnoreErrors::Rollback.matches(Direction::Rollback));
        assert!(!IgnoreErrors::Rollback.matches(Direction::Apply));
        assert!(IgnoreErrors::All.matches(Direction::Apply));
        assert!(IgnoreErrors::All.matches(Direction::Rollback));
    }

    #[test]
    fn test_ignore_errors_parsing() {
        assert_eq!("apply".parse::<IgnoreErrors>().unwrap(), IgnoreErrors::Apply);
        assert_eq!("ROLLBACK".parse::<IgnoreErrors>().unwrap(), IgnoreErrors::Rollback);
        assert_eq!("all".parse::<IgnoreErrors>().unwrap(), IgnoreErrors::All);
        assert!("sometimes".parse::<IgnoreErrors>().is_err());
    }

    #[test]
    fn test_step_actions_by_direction() {
        let step = Step::new("CREATE TABLE foo (id INT)").with_rollback("DROP TABLE foo");
        assert!(matches!(step.action(Direction::Apply), Some(Action::Sql(sql)) if sql.starts_with("CREATE")));
        assert!(matches!(step.action(Direction::Rollback), Some(Action::Sql(sql)) if sql.starts_with("DROP")));
        assert_eq!(step.policy(), IgnoreErrors::None);

        let forward_only = Step::new("INSERT INTO foo VALUES (1)");
        assert!(forward_only.action(Direction::Rollback).is_none());
    }

    #[test]
    fn test_empty_action_detection() {
        assert!(Action::sql("   \n").is_empty());
        assert!(!Action::sql("SELECT 1").is_empty());
        let procedure = Action::procedure(|_conn| Box::pin(async move { Ok(()) }));
        assert!(!procedure.is_empty());
        assert_eq!(format!("{:?}", procedure), "Procedure(..)");
    }
}
