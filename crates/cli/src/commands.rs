//! The operations behind each subcommand

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use console::style;
use ratchet_engine::{
    AlwaysRun, Confirm, DatabaseUrl, Direction, MigrateConfig, Migrator, Registry, RunReport,
    Selection, SqlFileLoader, DEFAULT_MIGRATION_TABLE,
};
use regex::Regex;
use tracing::debug;

use crate::interactive::{self, InteractiveConfirm};
use crate::settings::CachedSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Apply,
    Rollback,
    Reapply,
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directory holding the migration files
    pub migrations_dir: PathBuf,

    /// Database connection string, e.g. postgres://user@host/db
    #[arg(env = "DATABASE_URL")]
    pub database: Option<String>,

    /// Only consider migrations whose id matches this regular expression
    #[arg(short = 'm', long = "match", value_name = "PATTERN")]
    pub pattern: Option<String>,

    /// Run every selected migration without asking
    #[arg(short, long)]
    pub batch: bool,

    /// Ignore all step failures
    #[arg(short, long)]
    pub force: bool,

    /// Ask for the database password
    #[arg(short, long)]
    pub prompt_password: bool,

    /// Neither read nor write the settings cache
    #[arg(long)]
    pub no_cache: bool,

    /// Name of the tracking table
    #[arg(long, value_name = "NAME")]
    pub migration_table: Option<String>,
}

/// Connection settings after merging arguments with the cache
#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolved {
    database: String,
    migration_table: String,
}

impl Resolved {
    fn from_args(args: &RunArgs, cached: &CachedSettings) -> Result<Self> {
        let database = args
            .database
            .clone()
            .or_else(|| cached.database_url.clone())
            .ok_or_else(|| {
                anyhow!("No database given: pass a connection string, set DATABASE_URL or cache one")
            })?;
        let migration_table = args
            .migration_table
            .clone()
            .or_else(|| cached.migration_table.clone())
            .unwrap_or_else(|| DEFAULT_MIGRATION_TABLE.to_string());
        Ok(Self {
            database,
            migration_table,
        })
    }

    fn as_settings(&self) -> CachedSettings {
        CachedSettings {
            database_url: Some(self.database.clone()),
            migration_table: Some(self.migration_table.clone())
                .filter(|table| table != DEFAULT_MIGRATION_TABLE),
        }
    }
}

pub async fn run(operation: Operation, args: RunArgs) -> Result<()> {
    let cached = if args.no_cache {
        CachedSettings::default()
    } else {
        CachedSettings::load(&args.migrations_dir)?
    };
    let resolved = Resolved::from_args(&args, &cached)?;

    let mut url = DatabaseUrl::parse(&resolved.database)?;
    if args.prompt_password {
        let password = interactive::prompt_password(&url.redacted())?;
        url = url.with_password(&password)?;
    }
    debug!("Using {}", url.redacted());

    let config = MigrateConfig::new(&args.migrations_dir)
        .with_migration_table(resolved.migration_table.clone())
        .with_force(args.force);
    let mut migrator = Migrator::open(&url, &config, &SqlFileLoader::new()).await?;

    remember(&args, &cached, &resolved)?;

    let selection = select(args.pattern.as_deref(), migrator.registry())?;
    let mut confirm: Box<dyn Confirm> = if args.batch {
        Box::new(AlwaysRun)
    } else {
        Box::new(InteractiveConfirm::new())
    };

    match operation {
        Operation::Apply => {
            let report = migrator.apply(&selection, &mut *confirm).await?;
            print_report(&report);
        }
        Operation::Rollback => {
            let report = migrator.rollback(&selection, &mut *confirm).await?;
            print_report(&report);
        }
        Operation::Reapply => {
            let report = migrator.reapply(&selection, &mut *confirm).await?;
            print_report(&report.rollback);
            print_report(&report.apply);
        }
        Operation::Status => print_status(&mut migrator, &selection).await?,
    }

    Ok(())
}

/// Offer to cache settings that differ from what is stored
fn remember(args: &RunArgs, cached: &CachedSettings, resolved: &Resolved) -> Result<()> {
    if args.batch || args.no_cache {
        return Ok(());
    }
    let settings = resolved.as_settings();
    if &settings == cached {
        return Ok(());
    }

    let path = CachedSettings::path_in(&args.migrations_dir);
    if interactive::confirm_cache(&path.display().to_string())? {
        settings.save(&args.migrations_dir)?;
        println!("Saved settings to {}", path.display());
    }
    Ok(())
}

fn select(pattern: Option<&str>, registry: &Registry) -> Result<Selection> {
    match pattern {
        Some(pattern) => {
            let regex = Regex::new(pattern)
                .with_context(|| format!("Invalid --match pattern '{}'", pattern))?;
            Ok(Selection::ids(registry.matching(&regex)))
        }
        None => Ok(Selection::All),
    }
}

fn print_report(report: &RunReport) {
    let done = match report.direction {
        Direction::Apply => "Applied",
        Direction::Rollback => "Rolled back",
    };

    for id in &report.completed {
        println!("{} {}", style(done).green(), id);
    }
    for id in &report.discarded {
        println!("{} {} (failure ignored)", style("Discarded").yellow(), id);
    }
    for id in &report.skipped {
        println!("{} {}", style("Skipped").dim(), id);
    }
    for ignored in &report.ignored {
        println!("{} {}", style("warning:").yellow(), ignored);
    }
    if report.post_apply_ran {
        println!("{} post-apply", style("Ran").green());
    }

    if report.quit {
        println!("Stopped.");
    } else if report.completed.is_empty() && report.discarded.is_empty() && report.skipped.is_empty()
    {
        match report.direction {
            Direction::Apply => println!("No migrations to apply."),
            Direction::Rollback => println!("No migrations to roll back."),
        }
    }
}

async fn print_status(migrator: &mut Migrator, selection: &Selection) -> Result<()> {
    let statuses = migrator.status().await?;

    println!("{}", style("Migration status").bold());
    for status in statuses.iter().filter(|s| selection.contains(&s.id)) {
        match &status.applied {
            Some(record) => println!(
                "  {} {}  {}",
                style("A").green(),
                status.id,
                style(record.applied_at_utc.format("%Y-%m-%d %H:%M:%S UTC")).dim()
            ),
            None => println!("  {} {}", style("U").yellow(), status.id),
        }
    }
    println!("\nA = applied, U = unapplied");
    Ok(())
}
