mod commands;
mod interactive;
mod settings;

use std::io;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use console::style;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::{Operation, RunArgs};

#[derive(Parser, Debug)]
#[command(name = "ratchet")]
#[command(version, about = "Apply, roll back and reapply database migrations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More output; repeat for more (-vvv)
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Output level from 0 (errors only) to 3 (debug); takes precedence over -v
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=3))]
    verbosity: Option<u8>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Apply(RunArgs),

    /// Roll back applied migrations
    Rollback(RunArgs),

    /// Roll back migrations and apply them again
    Reapply(RunArgs),

    /// Show which migrations are applied
    Status(RunArgs),
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        match self.verbosity.unwrap_or(self.verbose) {
            0 => "error",
            1 => "warn",
            2 => "info",
            _ => "debug",
        }
    }

    fn into_operation(self) -> (Operation, RunArgs) {
        match self.command {
            Commands::Apply(args) => (Operation::Apply, args),
            Commands::Rollback(args) => (Operation::Rollback, args),
            Commands::Reapply(args) => (Operation::Reapply, args),
            Commands::Status(args) => (Operation::Status, args),
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("error"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_filter());

    let (operation, args) = cli.into_operation();
    match commands::run(operation, args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
