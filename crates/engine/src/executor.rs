//! Transaction executor - runs one migration's steps under its policy
//!
//! Every transaction opened here ends in exactly one commit or rollback. A
//! `sqlx::Transaction` that is dropped without a commit rolls back, so early
//! returns and connection teardown never leave a half-committed unit.

use sqlx::{Any, AnyConnection, Connection, Transaction};
use tracing::{error, info, warn};

use crate::dialect::Dialect;
use crate::error::{IgnoredError, MigrateError, MigrateResult};
use crate::migration::{Migration, StepLayout};
use crate::step::{Direction, IgnoreErrors, Step};
use crate::tracker::StateTracker;

/// Run-wide overrides of the per-step policies
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPolicy {
    /// Treat every failure as ignored
    pub force: bool,
}

/// What happened to a unit that did not fail fatally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The unit's effects committed and the tracking table reflects it.
    /// Steps whose failures were ignored are listed.
    Committed { ignored: Vec<IgnoredError> },
    /// An ignored failure discarded the unit; nothing was recorded
    Discarded { ignored: Vec<IgnoredError> },
}

impl UnitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, UnitOutcome::Committed { .. })
    }

    pub fn ignored(&self) -> &[IgnoredError] {
        match self {
            UnitOutcome::Committed { ignored } | UnitOutcome::Discarded { ignored } => ignored,
        }
    }

    pub fn into_ignored(self) -> Vec<IgnoredError> {
        match self {
            UnitOutcome::Committed { ignored } | UnitOutcome::Discarded { ignored } => ignored,
        }
    }
}

/// Executes migrations against a connection
#[derive(Debug, Clone)]
pub struct TransactionExecutor<'t> {
    tracker: &'t StateTracker,
    policy: ExecutionPolicy,
}

impl<'t> TransactionExecutor<'t> {
    pub fn new(tracker: &'t StateTracker, policy: ExecutionPolicy) -> Self {
        Self { tracker, policy }
    }

    /// Run `migration` in `direction`.
    ///
    /// The post-apply unit is never recorded and its failures are always
    /// ignored.
    pub async fn execute(
        &self,
        migration: &Migration,
        direction: Direction,
        conn: &mut AnyConnection,
    ) -> MigrateResult<UnitOutcome> {
        match direction {
            Direction::Apply => info!("Applying {}", migration.id()),
            Direction::Rollback => info!("Rolling back {}", migration.id()),
        }

        let dialect = Dialect::of(conn)?;
        match migration.layout() {
            StepLayout::Group { ignore_errors, .. } => {
                self.run_group(migration, *ignore_errors, direction, dialect, conn)
                    .await
            }
            StepLayout::Independent(_) => {
                self.run_independent(migration, direction, dialect, conn)
                    .await
            }
        }
    }

    /// All steps share one transaction; any failure discards the whole unit
    async fn run_group(
        &self,
        migration: &Migration,
        group_policy: IgnoreErrors,
        direction: Direction,
        dialect: Dialect,
        conn: &mut AnyConnection,
    ) -> MigrateResult<UnitOutcome> {
        let records = !migration.is_post_apply();
        let mut tx = conn.begin().await?;

        for (index, step) in migration.ordered_steps(direction) {
            info!(" - {} step {}", direction.as_str(), index);
            if let Err(err) = step.execute(direction, &mut *tx).await {
                rollback_quietly(tx, migration.id()).await;
                if self.tolerates(migration, group_policy, direction) {
                    let ignored = ignored_error(migration, index, direction, &err);
                    warn!("{}; transaction rolled back", ignored);
                    return Ok(UnitOutcome::Discarded {
                        ignored: vec![ignored],
                    });
                }
                return Err(step_error(migration, index, direction, err));
            }
        }

        if records && dialect.transactional_ddl() {
            self.tracker.record(migration.id(), direction, &mut *tx).await?;
        }
        tx.commit().await?;
        if records && !dialect.transactional_ddl() {
            self.tracker.record(migration.id(), direction, conn).await?;
        }

        Ok(UnitOutcome::Committed {
            ignored: Vec::new(),
        })
    }

    /// Each step commits on its own; ignored failures let the unit continue.
    /// A fatal failure reverses the steps that already committed.
    async fn run_independent(
        &self,
        migration: &Migration,
        direction: Direction,
        dialect: Dialect,
        conn: &mut AnyConnection,
    ) -> MigrateResult<UnitOutcome> {
        let records = !migration.is_post_apply();
        let ordered = migration.ordered_steps(direction);
        let last = ordered.len().checked_sub(1);

        let mut executed: Vec<(usize, &Step)> = Vec::new();
        let mut recorded = false;
        let mut ignored = Vec::new();

        for (position, (index, step)) in ordered.into_iter().enumerate() {
            info!(" - {} step {}", direction.as_str(), index);
            let mut tx = conn.begin().await?;

            match step.execute(direction, &mut *tx).await {
                Ok(()) => {
                    executed.push((index, step));
                    // The tracking row rides along with the final step's commit.
                    if records && Some(position) == last && dialect.transactional_ddl() {
                        self.tracker.record(migration.id(), direction, &mut *tx).await?;
                        recorded = true;
                    }
                    tx.commit().await?;
                }
                Err(err) => {
                    rollback_quietly(tx, migration.id()).await;
                    if self.tolerates(migration, step.policy(), direction) {
                        let failure = ignored_error(migration, index, direction, &err);
                        warn!("{}", failure);
                        ignored.push(failure);
                        continue;
                    }
                    let err = step_error(migration, index, direction, err);
                    undo_steps(migration, &executed, direction, conn).await;
                    return Err(err);
                }
            }
        }

        if executed.is_empty() && !ignored.is_empty() {
            return Ok(UnitOutcome::Discarded { ignored });
        }
        if records && !recorded {
            self.tracker.record(migration.id(), direction, conn).await?;
        }

        Ok(UnitOutcome::Committed { ignored })
    }

    fn tolerates(&self, migration: &Migration, policy: IgnoreErrors, direction: Direction) -> bool {
        self.policy.force || migration.is_post_apply() || policy.matches(direction)
    }
}

async fn rollback_quietly(tx: Transaction<'_, Any>, id: &str) {
    if let Err(e) = tx.rollback().await {
        // Dropping the connection still discards the transaction server-side.
        warn!("Failed to roll back transaction for {}: {}", id, e);
    }
}

/// Reverse the steps of a failed unit that already committed, newest first,
/// so the unit leaves no effects behind. Failures here are logged and do not
/// replace the step error being returned.
async fn undo_steps(
    migration: &Migration,
    executed: &[(usize, &Step)],
    direction: Direction,
    conn: &mut AnyConnection,
) {
    let reverse = direction.reverse();
    for (index, step) in executed.iter().rev() {
        info!(" - undoing step {} ({})", index, reverse);
        let mut tx = match conn.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("Cannot undo step {} of {}: {}", index, migration.id(), e);
                return;
            }
        };

        let undone = match step.execute(reverse, &mut *tx).await {
            Ok(()) => tx.commit().await.map_err(anyhow::Error::from),
            Err(e) => {
                rollback_quietly(tx, migration.id()).await;
                Err(e)
            }
        };
        if let Err(e) = undone {
            error!(
                "Failed to undo step {} of {} during {}: {:#}",
                index,
                migration.id(),
                reverse,
                e
            );
        }
    }
}

fn ignored_error(
    migration: &Migration,
    index: usize,
    direction: Direction,
    err: &anyhow::Error,
) -> IgnoredError {
    IgnoredError {
        unit_id: migration.id().to_string(),
        step_index: index,
        direction,
        message: format!("{:#}", err),
    }
}

fn step_error(
    migration: &Migration,
    index: usize,
    direction: Direction,
    err: anyhow::Error,
) -> MigrateError {
    error!(
        "Step {} of {} failed during {}: {:#}",
        index,
        migration.id(),
        direction,
        err
    );
    MigrateError::StepExecution {
        unit_id: migration.id().to_string(),
        step_index: index,
        direction,
        source: err.into(),
    }
}
