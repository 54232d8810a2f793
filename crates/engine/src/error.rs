//! Error types for the migration engine
//!
//! Failures are classified so callers can report the kind, the unit and the
//! step involved. Ignored step failures are not errors at all: they are
//! collected as [`IgnoredError`] values on the run report.

use std::fmt;

use crate::step::Direction;

/// Boxed error carried as the source of a failed step
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Malformed or duplicate migration definitions
    #[error("Load error: {0}")]
    Load(String),

    /// The connection could not be established or the URL is unusable
    #[error("Connection error: {0}")]
    Connection(String),

    /// A step failed and its policy did not allow the failure to be ignored
    #[error("Step {step_index} of migration '{unit_id}' failed during {direction}: {source}")]
    StepExecution {
        unit_id: String,
        step_index: usize,
        direction: Direction,
        #[source]
        source: BoxError,
    },

    /// Tracking table or transaction bookkeeping failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrateError {
    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::Load(_) => "load",
            MigrateError::Connection(_) => "connection",
            MigrateError::StepExecution { .. } => "step_execution",
            MigrateError::Database(_) => "database",
            MigrateError::Config(_) => "config",
        }
    }

    /// Id of the migration unit involved, if the error concerns one
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            MigrateError::StepExecution { unit_id, .. } => Some(unit_id),
            _ => None,
        }
    }

    /// Declaration index of the failing step, if the error concerns one
    pub fn step_index(&self) -> Option<usize> {
        match self {
            MigrateError::StepExecution { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }
}

/// A step or group failure swallowed by its `ignore_errors` policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredError {
    pub unit_id: String,
    /// Declaration index of the failing step; a group failure is reported
    /// against the step that broke it
    pub step_index: usize,
    pub direction: Direction,
    pub message: String,
}

impl fmt::Display for IgnoredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ignored error in step {} of '{}' during {}: {}",
            self.step_index, self.unit_id, self.direction, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_execution_error_accessors() {
        let err = MigrateError::StepExecution {
            unit_id: "0002-add-bar".to_string(),
            step_index: 1,
            direction: Direction::Apply,
            source: "no such table: bar".into(),
        };

        assert_eq!(err.kind(), "step_execution");
        assert_eq!(err.unit_id(), Some("0002-add-bar"));
        assert_eq!(err.step_index(), Some(1));
        let message = err.to_string();
        assert!(message.contains("Step 1 of migration '0002-add-bar' failed during apply"));
        assert!(message.contains("no such table: bar"));
    }

    #[test]
    fn test_other_errors_have_no_unit() {
        let err = MigrateError::Load("duplicate id 0001".to_string());
        assert_eq!(err.kind(), "load");
        assert_eq!(err.unit_id(), None);
        assert_eq!(err.step_index(), None);
    }

    #[test]
    fn test_ignored_error_display() {
        let ignored = IgnoredError {
            unit_id: "0001".to_string(),
            step_index: 2,
            direction: Direction::Rollback,
            message: "boom".to_string(),
        };
        assert_eq!(
            ignored.to_string(),
            "ignored error in step 2 of '0001' during rollback: boom"
        );
    }
}
