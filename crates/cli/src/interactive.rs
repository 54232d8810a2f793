//! Interactive prompts: per-migration confirmation and password entry

use std::fmt;

use anyhow::{Context, Result};
use console::style;
use inquire::{Confirm as ConfirmPrompt, Password, Select};
use ratchet_engine::{Confirm, Confirmation, Direction, Migration};
use tracing::warn;

/// One answer to the per-migration question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Yes,
    No,
    AllRemaining,
    View,
    Quit,
}

impl Choice {
    pub const ALL: [Choice; 5] = [
        Choice::Yes,
        Choice::No,
        Choice::AllRemaining,
        Choice::View,
        Choice::Quit,
    ];
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Choice::Yes => "yes",
            Choice::No => "no, skip it",
            Choice::AllRemaining => "all remaining",
            Choice::View => "view this migration",
            Choice::Quit => "quit",
        };
        f.write_str(label)
    }
}

/// Asks before every migration unless told to run all remaining ones
#[derive(Debug, Default)]
pub struct InteractiveConfirm {
    run_remaining: bool,
}

impl InteractiveConfirm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn a choice into an answer; `None` means ask again
    pub fn resolve(&mut self, choice: Choice, migration: &Migration) -> Option<Confirmation> {
        match choice {
            Choice::Yes => Some(Confirmation::Run),
            Choice::No => Some(Confirmation::Skip),
            Choice::AllRemaining => {
                self.run_remaining = true;
                Some(Confirmation::Run)
            }
            Choice::View => {
                show_source(migration);
                None
            }
            Choice::Quit => Some(Confirmation::Quit),
        }
    }
}

impl Confirm for InteractiveConfirm {
    fn confirm(&mut self, migration: &Migration, direction: Direction) -> Confirmation {
        if self.run_remaining {
            return Confirmation::Run;
        }

        let verb = match direction {
            Direction::Apply => "Apply",
            Direction::Rollback => "Roll back",
        };
        let message = format!("{} {}?", verb, migration.id());

        loop {
            let choice = Select::new(&message, Choice::ALL.to_vec())
                .with_help_message("↑↓ to move, enter to select")
                .prompt();
            match choice {
                Ok(choice) => {
                    if let Some(answer) = self.resolve(choice, migration) {
                        return answer;
                    }
                }
                Err(e) => {
                    warn!("Prompt failed ({}); stopping", e);
                    return Confirmation::Quit;
                }
            }
        }
    }
}

fn show_source(migration: &Migration) {
    println!();
    if let Some(path) = migration.path() {
        println!("{}", style(path.display()).bold());
    }
    match migration.source() {
        Some(source) => println!("{}", source),
        None => println!("{} was declared in code", migration.id()),
    }
    println!();
}

pub fn prompt_password(target: &str) -> Result<String> {
    Password::new(&format!("Password for {}:", target))
        .without_confirmation()
        .prompt()
        .context("Failed to read password")
}

/// Ask whether the connection settings should be written to `location`
pub fn confirm_cache(location: &str) -> Result<bool> {
    ConfirmPrompt::new(&format!("Save connection settings to {}?", location))
        .with_default(false)
        .with_help_message("Saved in plain text and may contain your database password")
        .prompt()
        .context("Failed to get confirmation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_engine::Step;

    fn migration() -> Migration {
        Migration::new("0001-create-foo", vec![Step::new("CREATE TABLE foo (id INT)")])
    }

    #[test]
    fn test_choices_resolve() {
        let migration = migration();
        let mut confirm = InteractiveConfirm::new();

        assert_eq!(confirm.resolve(Choice::Yes, &migration), Some(Confirmation::Run));
        assert_eq!(confirm.resolve(Choice::No, &migration), Some(Confirmation::Skip));
        assert_eq!(confirm.resolve(Choice::Quit, &migration), Some(Confirmation::Quit));
        assert_eq!(confirm.resolve(Choice::View, &migration), None);
    }

    #[test]
    fn test_all_remaining_stops_asking() {
        let migration = migration();
        let mut confirm = InteractiveConfirm::new();

        assert_eq!(
            confirm.resolve(Choice::AllRemaining, &migration),
            Some(Confirmation::Run)
        );
        assert_eq!(
            confirm.confirm(&migration, Direction::Rollback),
            Confirmation::Run
        );
    }

    #[test]
    fn test_choice_labels() {
        let labels: Vec<String> = Choice::ALL.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            labels,
            vec!["yes", "no, skip it", "all remaining", "view this migration", "quit"]
        );
    }
}
