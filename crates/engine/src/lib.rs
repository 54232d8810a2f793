//! # ratchet-engine: migration resolution and execution
//!
//! Applies an ordered set of migrations to a database and keeps a tracking
//! table that always lists exactly the migrations whose effects committed.
//!
//! ```rust,no_run
//! use ratchet_engine::{AlwaysRun, DatabaseUrl, MigrateConfig, Migrator, Selection, SqlFileLoader};
//!
//! # async fn run() -> ratchet_engine::MigrateResult<()> {
//! let url = DatabaseUrl::parse("sqlite:///app.db")?;
//! let config = MigrateConfig::new("migrations");
//! let mut migrator = Migrator::open(&url, &config, &SqlFileLoader::new()).await?;
//! let report = migrator.apply(&Selection::All, &mut AlwaysRun).await?;
//! println!("applied {:?}", report.completed);
//! # Ok(())
//! # }
//! ```
//!
//! Concurrent runs against the same tracking table are not coordinated.

pub mod config;
pub mod connection;
pub mod controller;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod loader;
pub mod migration;
pub mod registry;
pub mod resolver;
pub mod step;
pub mod tracker;

pub use config::{MigrateConfig, DEFAULT_MIGRATION_TABLE};
pub use connection::{connect, DatabaseUrl, Scheme};
pub use controller::{
    AlwaysRun, Confirm, Confirmation, MigrationStatus, Migrator, ReapplyReport, RunReport,
};
pub use dialect::Dialect;
pub use error::{IgnoredError, MigrateError, MigrateResult};
pub use executor::{ExecutionPolicy, TransactionExecutor, UnitOutcome};
pub use loader::{LoadContext, Loader, SqlFileLoader};
pub use migration::{Migration, StepLayout, POST_APPLY_ID};
pub use registry::Registry;
pub use resolver::Selection;
pub use step::{Action, Direction, IgnoreErrors, Step};
pub use tracker::{AppliedRecord, StateTracker};
