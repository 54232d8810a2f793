//! Operation controller - apply, rollback and reapply over resolved migrations
//!
//! The controller owns the connection for the whole run. Units execute one at
//! a time; a fatal step error stops the loop immediately while everything
//! committed before it stays committed.

use std::collections::HashSet;

use sqlx::AnyConnection;
use tracing::info;

use crate::config::MigrateConfig;
use crate::connection::{self, DatabaseUrl};
use crate::error::{IgnoredError, MigrateResult};
use crate::executor::{ExecutionPolicy, TransactionExecutor, UnitOutcome};
use crate::loader::Loader;
use crate::migration::Migration;
use crate::registry::Registry;
use crate::resolver::{self, Selection};
use crate::step::Direction;
use crate::tracker::{AppliedRecord, StateTracker};

/// Answer of a confirmation callback for one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Execute this unit
    Run,
    /// Leave this unit out and carry on with the next one
    Skip,
    /// Stop without running any further unit; not an error
    Quit,
}

/// Asked before each unit is executed
pub trait Confirm {
    fn confirm(&mut self, migration: &Migration, direction: Direction) -> Confirmation;
}

impl<F> Confirm for F
where
    F: FnMut(&Migration, Direction) -> Confirmation,
{
    fn confirm(&mut self, migration: &Migration, direction: Direction) -> Confirmation {
        self(migration, direction)
    }
}

/// Confirms every unit; used for batch runs
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRun;

impl Confirm for AlwaysRun {
    fn confirm(&mut self, _migration: &Migration, _direction: Direction) -> Confirmation {
        Confirmation::Run
    }
}

/// Result of one apply or rollback invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: Direction,
    /// Units whose effects committed and were recorded, in execution order
    pub completed: Vec<String>,
    /// Units dropped by an ignored failure
    pub discarded: Vec<String>,
    /// Units the confirmation callback skipped
    pub skipped: Vec<String>,
    pub ignored: Vec<IgnoredError>,
    /// The confirmation callback asked to stop
    pub quit: bool,
    pub post_apply_ran: bool,
}

impl RunReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            completed: Vec::new(),
            discarded: Vec::new(),
            skipped: Vec::new(),
            ignored: Vec::new(),
            quit: false,
            post_apply_ran: false,
        }
    }

    fn absorb(&mut self, id: &str, outcome: UnitOutcome) {
        if outcome.is_committed() {
            self.completed.push(id.to_string());
        } else {
            self.discarded.push(id.to_string());
        }
        self.ignored.extend(outcome.into_ignored());
    }
}

/// Both halves of a reapply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapplyReport {
    pub rollback: RunReport,
    pub apply: RunReport,
}

/// A registry migration and its applied record, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub id: String,
    pub applied: Option<AppliedRecord>,
}

/// Runs migration operations over one exclusively owned connection
pub struct Migrator {
    conn: AnyConnection,
    registry: Registry,
    tracker: StateTracker,
    policy: ExecutionPolicy,
    schema_ready: bool,
}

impl Migrator {
    /// Create a migrator over an open connection
    pub fn new(conn: AnyConnection, registry: Registry, config: &MigrateConfig) -> MigrateResult<Self> {
        config.validate()?;
        Ok(Self {
            conn,
            registry,
            tracker: StateTracker::new(config.migration_table.clone())?,
            policy: ExecutionPolicy {
                force: config.force,
            },
            schema_ready: false,
        })
    }

    /// Connect to `url` and load the registry from the configured directory
    pub async fn open(
        url: &DatabaseUrl,
        config: &MigrateConfig,
        loader: &dyn Loader,
    ) -> MigrateResult<Self> {
        config.validate()?;
        let registry = Registry::load(&config.migrations_dir, loader)?;
        let conn = connection::connect(url).await?;
        Self::new(conn, registry, config)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// The connection owned by this run
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut self.conn
    }

    pub fn into_connection(self) -> AnyConnection {
        self.conn
    }

    /// Ids recorded in the tracking table
    pub async fn applied_ids(&mut self) -> MigrateResult<HashSet<String>> {
        self.ensure_schema().await?;
        self.tracker.applied_ids(&mut self.conn).await
    }

    /// Every registry migration with its applied record, ascending by id
    pub async fn status(&mut self) -> MigrateResult<Vec<MigrationStatus>> {
        self.ensure_schema().await?;
        let mut records = self.tracker.applied_records(&mut self.conn).await?;

        Ok(self
            .registry
            .migrations()
            .iter()
            .map(|m| {
                let applied = records
                    .iter()
                    .position(|r| r.id == m.id())
                    .map(|pos| records.swap_remove(pos));
                MigrationStatus {
                    id: m.id().to_string(),
                    applied,
                }
            })
            .collect())
    }

    /// Apply pending migrations, then run the post-apply unit
    pub async fn apply(
        &mut self,
        selection: &Selection,
        confirm: &mut dyn Confirm,
    ) -> MigrateResult<RunReport> {
        self.ensure_schema().await?;
        let applied = self.tracker.applied_ids(&mut self.conn).await?;
        let targets = resolver::pending(&self.registry, &applied, selection);
        info!("{} migration(s) to apply", targets.len());

        let executor = TransactionExecutor::new(&self.tracker, self.policy);
        let mut report = RunReport::new(Direction::Apply);
        run_units(&executor, &targets, Direction::Apply, &mut self.conn, confirm, &mut report).await?;

        if !report.quit {
            if let Some(hook) = self.registry.post_apply() {
                let outcome = executor.execute(hook, Direction::Apply, &mut self.conn).await?;
                report.ignored.extend(outcome.into_ignored());
                report.post_apply_ran = true;
            }
        }

        Ok(report)
    }

    /// Roll back applied migrations, most recent id first
    pub async fn rollback(
        &mut self,
        selection: &Selection,
        confirm: &mut dyn Confirm,
    ) -> MigrateResult<RunReport> {
        self.ensure_schema().await?;
        let applied = self.tracker.applied_ids(&mut self.conn).await?;
        let targets = resolver::to_rollback(&self.registry, &applied, selection);
        info!("{} migration(s) to roll back", targets.len());

        let executor = TransactionExecutor::new(&self.tracker, self.policy);
        let mut report = RunReport::new(Direction::Rollback);
        run_units(&executor, &targets, Direction::Rollback, &mut self.conn, confirm, &mut report).await?;

        Ok(report)
    }

    /// Roll back the selection, then apply again exactly what was reverted
    pub async fn reapply(
        &mut self,
        selection: &Selection,
        confirm: &mut dyn Confirm,
    ) -> MigrateResult<ReapplyReport> {
        let rollback = self.rollback(selection, confirm).await?;
        let reverted = Selection::ids(rollback.completed.iter().cloned());
        let apply = self.apply(&reverted, &mut AlwaysRun).await?;
        Ok(ReapplyReport { rollback, apply })
    }

    async fn ensure_schema(&mut self) -> MigrateResult<()> {
        if !self.schema_ready {
            self.tracker.ensure_schema(&mut self.conn).await?;
            self.schema_ready = true;
        }
        Ok(())
    }
}

async fn run_units(
    executor: &TransactionExecutor<'_>,
    targets: &[&Migration],
    direction: Direction,
    conn: &mut AnyConnection,
    confirm: &mut dyn Confirm,
    report: &mut RunReport,
) -> MigrateResult<()> {
    for migration in targets {
        match confirm.confirm(migration, direction) {
            Confirmation::Run => {}
            Confirmation::Skip => {
                info!("Skipping {}", migration.id());
                report.skipped.push(migration.id().to_string());
                continue;
            }
            Confirmation::Quit => {
                info!("Stopping before {}", migration.id());
                report.quit = true;
                break;
            }
        }

        let outcome = executor.execute(migration, direction, conn).await?;
        report.absorb(migration.id(), outcome);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    #[test]
    fn test_closures_are_confirmations() {
        let migration = Migration::new("0001", vec![Step::new("SELECT 1")]);
        let mut asked = Vec::new();
        let mut confirm = |m: &Migration, d: Direction| {
            asked.push((m.id().to_string(), d));
            Confirmation::Skip
        };

        assert_eq!(confirm.confirm(&migration, Direction::Apply), Confirmation::Skip);
        assert_eq!(AlwaysRun.confirm(&migration, Direction::Rollback), Confirmation::Run);
        drop(confirm);
        assert_eq!(asked, vec![("0001".to_string(), Direction::Apply)]);
    }

    #[test]
    fn test_report_absorbs_outcomes() {
        let mut report = RunReport::new(Direction::Apply);
        let ignored = IgnoredError {
            unit_id: "0002".to_string(),
            step_index: 0,
            direction: Direction::Apply,
            message: "boom".to_string(),
        };

        report.absorb("0001", UnitOutcome::Committed { ignored: vec![] });
        report.absorb(
            "0002",
            UnitOutcome::Discarded {
                ignored: vec![ignored.clone()],
            },
        );

        assert_eq!(report.completed, vec!["0001".to_string()]);
        assert_eq!(report.discarded, vec!["0002".to_string()]);
        assert_eq!(report.ignored, vec![ignored]);
    }
}
