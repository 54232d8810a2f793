//! Migration units
//!
//! A migration is an identified, ordered collection of steps. Its steps either
//! run in independent per-step transactions or share a single transaction
//! group with one group-level error policy.

use std::path::PathBuf;

use crate::error::{MigrateError, MigrateResult};
use crate::loader::LoadContext;
use crate::step::{Direction, IgnoreErrors, Step};

/// Identifier of the special unit run after every apply
pub const POST_APPLY_ID: &str = "post-apply";

/// How a unit's steps are grouped into transactions
#[derive(Debug, Clone)]
pub enum StepLayout {
    /// Each step commits on its own and carries its own policy
    Independent(Vec<Step>),
    /// All steps share one transaction; only the group policy applies
    Group {
        steps: Vec<Step>,
        ignore_errors: IgnoreErrors,
    },
}

/// Represents a database migration
#[derive(Debug, Clone)]
pub struct Migration {
    id: String,
    layout: StepLayout,
    post_apply: bool,
    /// Where the migration came from, if it was loaded from disk
    path: Option<PathBuf>,
    /// Raw definition text, kept for display
    source: Option<String>,
}

impl Migration {
    /// Create a migration whose steps run in independent transactions
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        let id = id.into();
        let post_apply = id == POST_APPLY_ID;
        Self {
            id,
            layout: StepLayout::Independent(steps),
            post_apply,
            path: None,
            source: None,
        }
    }

    /// Create a migration whose steps share one transaction
    pub fn transaction(
        id: impl Into<String>,
        steps: Vec<Step>,
        ignore_errors: IgnoreErrors,
    ) -> Self {
        let mut migration = Self::new(id, Vec::new());
        migration.layout = StepLayout::Group {
            steps,
            ignore_errors,
        };
        migration
    }

    /// Build a migration by declaring steps on a fresh [`LoadContext`]
    pub fn build<F>(id: impl Into<String>, declare: F) -> MigrateResult<Self>
    where
        F: FnOnce(&mut LoadContext) -> MigrateResult<()>,
    {
        let mut ctx = LoadContext::new(id);
        declare(&mut ctx)?;
        ctx.finish()
    }

    pub(crate) fn with_origin(mut self, path: Option<PathBuf>, source: Option<String>) -> Self {
        self.path = path;
        self.source = source;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn layout(&self) -> &StepLayout {
        &self.layout
    }

    pub fn steps(&self) -> &[Step] {
        match &self.layout {
            StepLayout::Independent(steps) => steps,
            StepLayout::Group { steps, .. } => steps,
        }
    }

    pub fn is_transaction_group(&self) -> bool {
        matches!(self.layout, StepLayout::Group { .. })
    }

    /// Group-level policy, if the unit is a transaction group
    pub fn group_ignore_errors(&self) -> Option<IgnoreErrors> {
        match self.layout {
            StepLayout::Group { ignore_errors, .. } => Some(ignore_errors),
            StepLayout::Independent(_) => None,
        }
    }

    pub fn is_post_apply(&self) -> bool {
        self.post_apply
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Steps paired with their declaration index, in execution order for
    /// `direction` (reverse order when rolling back)
    pub fn ordered_steps(&self, direction: Direction) -> Vec<(usize, &Step)> {
        let mut steps: Vec<(usize, &Step)> = self.steps().iter().enumerate().collect();
        if direction == Direction::Rollback {
            steps.reverse();
        }
        steps
    }

    /// Check structural validity of the step definitions
    pub fn validate(&self) -> MigrateResult<()> {
        if self.id.trim().is_empty() {
            return Err(MigrateError::Load("migration id must not be empty".to_string()));
        }

        for (index, step) in self.steps().iter().enumerate() {
            if step.apply_action().is_empty() && step.rollback_action().is_some() {
                return Err(MigrateError::Load(format!(
                    "step {} of '{}' has a rollback action but no apply action",
                    index, self.id
                )));
            }
            if self.is_transaction_group() && !step.policy().is_none() {
                return Err(MigrateError::Load(format!(
                    "step {} of '{}': ignore_errors cannot be specified within a transaction",
                    index, self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_apply_detection() {
        assert!(Migration::new("post-apply", vec![]).is_post_apply());
        assert!(!Migration::new("0001-post-apply-cleanup", vec![]).is_post_apply());
    }

    #[test]
    fn test_rollback_order_is_reversed() {
        let migration = Migration::new(
            "0001",
            vec![Step::new("A"), Step::new("B"), Step::new("C")],
        );

        let apply: Vec<usize> = migration
            .ordered_steps(Direction::Apply)
            .iter()
            .map(|(i, _)| *i)
            .collect();
        let rollback: Vec<usize> = migration
            .ordered_steps(Direction::Rollback)
            .iter()
            .map(|(i, _)| *i)
            .collect();

        assert_eq!(apply, vec![0, 1, 2]);
        assert_eq!(rollback, vec![2, 1, 0]);
    }

    #[test]
    fn test_validate_rejects_rollback_without_apply() {
        let migration = Migration::new("0001", vec![Step::new("").with_rollback("DROP TABLE x")]);
        let err = migration.validate().unwrap_err();
        assert!(err.to_string().contains("rollback action but no apply action"));
    }

    #[test]
    fn test_validate_rejects_step_policy_inside_group() {
        let migration = Migration::transaction(
            "0001",
            vec![Step::new("SELECT 1").ignore_errors(IgnoreErrors::All)],
            IgnoreErrors::None,
        );
        assert!(migration.validate().is_err());

        let ok = Migration::transaction("0002", vec![Step::new("SELECT 1")], IgnoreErrors::All);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.group_ignore_errors(), Some(IgnoreErrors::All));
    }
}
