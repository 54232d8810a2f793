//! Migration loading
//!
//! Turning a migration source into steps is delegated to a [`Loader`]. Each
//! source gets its own [`LoadContext`], so steps declared while loading one
//! migration can never leak into another.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{MigrateError, MigrateResult};
use crate::migration::Migration;
use crate::step::{IgnoreErrors, Step};

/// Turns a migration source file into steps
pub trait Loader: Send + Sync {
    /// Whether this loader understands the file at `path`
    fn accepts(&self, path: &Path) -> bool;

    /// Declare the steps found at `path` on `ctx`
    fn load(&self, path: &Path, ctx: &mut LoadContext) -> MigrateResult<()>;
}

/// Per-migration collector for `step` and `transaction` declarations
#[derive(Debug)]
pub struct LoadContext {
    id: String,
    steps: Vec<Step>,
    group: Option<(Vec<Step>, IgnoreErrors)>,
    path: Option<PathBuf>,
    source: Option<String>,
}

impl LoadContext {
    /// Create an empty context for the migration `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            group: None,
            path: None,
            source: None,
        }
    }

    pub(crate) fn for_path(id: impl Into<String>, path: &Path) -> Self {
        let mut ctx = Self::new(id);
        ctx.path = Some(path.to_path_buf());
        ctx
    }

    /// Id of the migration being loaded
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Keep the raw definition text alongside the migration
    pub fn record_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    /// Declare a step running in its own transaction
    pub fn step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Declare a group of steps sharing one transaction
    pub fn transaction(
        &mut self,
        steps: Vec<Step>,
        ignore_errors: IgnoreErrors,
    ) -> MigrateResult<&mut Self> {
        if self.group.is_some() {
            return Err(MigrateError::Load(format!(
                "'{}' declares more than one transaction; transactions cannot be nested or repeated",
                self.id
            )));
        }
        self.group = Some((steps, ignore_errors));
        Ok(self)
    }

    /// Produce the validated migration
    pub fn finish(self) -> MigrateResult<Migration> {
        let migration = match self.group {
            Some((group_steps, ignore_errors)) => {
                if !self.steps.is_empty() {
                    return Err(MigrateError::Load(format!(
                        "'{}' mixes a transaction with free-standing steps",
                        self.id
                    )));
                }
                Migration::transaction(self.id, group_steps, ignore_errors)
            }
            None => Migration::new(self.id, self.steps),
        };
        migration.validate()?;
        Ok(migration.with_origin(self.path, self.source))
    }
}

/// Loads `.sql` files
///
/// ```sql
/// -- transaction ignore_errors=all
/// -- step
/// -- apply
/// CREATE TABLE foo (id INT);
/// -- rollback
/// DROP TABLE foo;
/// ```
///
/// `-- Up migration` / `-- Down migration` are accepted as section markers.
/// A file without any `-- step` marker is a single step, and lines outside a
/// `-- rollback` section belong to the apply action.
#[derive(Debug, Clone, Default)]
pub struct SqlFileLoader;

impl SqlFileLoader {
    pub fn new() -> Self {
        Self
    }

    /// Parse migration content into steps on `ctx`
    pub fn parse(&self, content: &str, ctx: &mut LoadContext) -> MigrateResult<()> {
        let mut group: Option<IgnoreErrors> = None;
        let mut drafts: Vec<StepDraft> = Vec::new();
        let mut section = Section::Apply;

        for (number, line) in content.lines().enumerate() {
            let trimmed = line.trim();

            if let Some(comment) = trimmed.strip_prefix("--") {
                match Marker::parse(comment).map_err(|e| {
                    MigrateError::Load(format!("{} line {}: {}", ctx.id(), number + 1, e))
                })? {
                    Some(Marker::Transaction(policy)) => {
                        if group.is_some() {
                            return Err(MigrateError::Load(format!(
                                "{} line {}: only one transaction marker is allowed",
                                ctx.id(),
                                number + 1
                            )));
                        }
                        group = Some(policy);
                    }
                    Some(Marker::Step(policy)) => {
                        drafts.push(StepDraft::new(policy));
                        section = Section::Apply;
                    }
                    Some(Marker::Section(next)) => {
                        if drafts.is_empty() {
                            drafts.push(StepDraft::new(IgnoreErrors::None));
                        }
                        section = next;
                    }
                    None => {}
                }
                continue;
            }

            if trimmed.is_empty() && drafts.is_empty() {
                continue;
            }
            if drafts.is_empty() {
                drafts.push(StepDraft::new(IgnoreErrors::None));
            }
            if let Some(draft) = drafts.last_mut() {
                draft.push(section, line);
            }
        }

        let steps: Vec<Step> = drafts.into_iter().filter_map(StepDraft::into_step).collect();
        match group {
            Some(policy) => {
                ctx.transaction(steps, policy)?;
            }
            None => {
                for step in steps {
                    ctx.step(step);
                }
            }
        }
        Ok(())
    }
}

impl Loader for SqlFileLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.is_file() && path.extension().map_or(false, |ext| ext == "sql")
    }

    fn load(&self, path: &Path, ctx: &mut LoadContext) -> MigrateResult<()> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrateError::Load(format!("Failed to read migration file {}: {}", path.display(), e))
        })?;
        self.parse(&content, ctx)?;
        ctx.record_source(content);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Apply,
    Rollback,
}

enum Marker {
    Transaction(IgnoreErrors),
    Step(IgnoreErrors),
    Section(Section),
}

impl Marker {
    fn parse(comment: &str) -> MigrateResult<Option<Marker>> {
        static MARKER: OnceLock<Regex> = OnceLock::new();
        let re = MARKER.get_or_init(|| {
            Regex::new(
                r"(?i)^\s*(transaction|step|apply|rollback|up|down)(?:\s+migration)?\s*(?:ignore_errors\s*=\s*(\w+))?\s*$",
            )
            .expect("marker pattern is valid")
        });

        let Some(caps) = re.captures(comment) else {
            return Ok(None);
        };
        let policy = match caps.get(2) {
            Some(value) => value.as_str().parse::<IgnoreErrors>()?,
            None => IgnoreErrors::None,
        };
        let keyword = caps[1].to_ascii_lowercase();

        let marker = match keyword.as_str() {
            "transaction" => Marker::Transaction(policy),
            "step" => Marker::Step(policy),
            _ if !policy.is_none() => {
                return Err(MigrateError::Load(format!(
                    "ignore_errors is only valid on step or transaction markers, not '{}'",
                    keyword
                )))
            }
            "apply" | "up" => Marker::Section(Section::Apply),
            _ => Marker::Section(Section::Rollback),
        };
        Ok(Some(marker))
    }
}

struct StepDraft {
    apply: Vec<String>,
    rollback: Vec<String>,
    policy: IgnoreErrors,
}

impl StepDraft {
    fn new(policy: IgnoreErrors) -> Self {
        Self {
            apply: Vec::new(),
            rollback: Vec::new(),
            policy,
        }
    }

    fn push(&mut self, section: Section, line: &str) {
        match section {
            Section::Apply => self.apply.push(line.to_string()),
            Section::Rollback => self.rollback.push(line.to_string()),
        }
    }

    fn into_step(self) -> Option<Step> {
        let apply = self.apply.join("\n").trim().to_string();
        let rollback = self.rollback.join("\n").trim().to_string();
        if apply.is_empty() && rollback.is_empty() {
            return None;
        }

        let mut step = Step::new(apply).ignore_errors(self.policy);
        if !rollback.is_empty() {
            step = step.with_rollback(rollback);
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Action, Direction};

    fn parse(content: &str) -> MigrateResult<Migration> {
        let mut ctx = LoadContext::new("0001-test");
        SqlFileLoader::new().parse(content, &mut ctx)?;
        ctx.finish()
    }

    fn sql(action: Option<&Action>) -> &str {
        match action {
            Some(Action::Sql(sql)) => sql,
            other => panic!("expected SQL action, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_file_is_single_step() {
        let migration = parse("CREATE TABLE test (id INT);\n").unwrap();
        assert_eq!(migration.steps().len(), 1);
        assert!(!migration.is_transaction_group());
        assert_eq!(
            sql(migration.steps()[0].action(Direction::Apply)),
            "CREATE TABLE test (id INT);"
        );
        assert!(migration.steps()[0].rollback_action().is_none());
    }

    #[test]
    fn test_up_down_sections() {
        let content = "-- Migration: create users\n-- Up migration\nCREATE TABLE users (id INT);\n\n-- Down migration  \nDROP TABLE users;\n";
        let migration = parse(content).unwrap();
        assert_eq!(migration.steps().len(), 1);
        let step = &migration.steps()[0];
        assert_eq!(sql(step.action(Direction::Apply)), "CREATE TABLE users (id INT);");
        assert_eq!(sql(step.action(Direction::Rollback)), "DROP TABLE users;");
    }

    #[test]
    fn test_multiple_steps_with_policies() {
        let content = "\
-- step
CREATE TABLE test (id INT);
-- step
INSERT INTO test VALUES (1);
-- rollback
DELETE FROM test WHERE id = 1;
-- step ignore_errors=apply
INSERT INTO test VALUES ('a', 'b');
";
        let migration = parse(content).unwrap();
        let steps = migration.steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].policy(), IgnoreErrors::None);
        assert_eq!(sql(steps[1].action(Direction::Rollback)), "DELETE FROM test WHERE id = 1;");
        assert_eq!(steps[2].policy(), IgnoreErrors::Apply);
    }

    #[test]
    fn test_transaction_marker_builds_group() {
        let content = "\
-- transaction ignore_errors=all
-- step
INSERT INTO test VALUES (1);
-- step
INSERT INTO test VALUES (2);
";
        let migration = parse(content).unwrap();
        assert!(migration.is_transaction_group());
        assert_eq!(migration.group_ignore_errors(), Some(IgnoreErrors::All));
        assert_eq!(migration.steps().len(), 2);
    }

    #[test]
    fn test_step_policy_inside_transaction_is_rejected() {
        let content = "-- transaction\n-- step ignore_errors=apply\nSELECT 1;\n";
        assert!(matches!(parse(content), Err(MigrateError::Load(_))));
    }

    #[test]
    fn test_rollback_without_apply_is_rejected() {
        let content = "-- step\n-- rollback\nDROP TABLE test;\n";
        let err = parse(content).unwrap_err();
        assert!(err.to_string().contains("rollback action but no apply action"));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let content = "-- step ignore_errors=sometimes\nSELECT 1;\n";
        assert!(matches!(parse(content), Err(MigrateError::Load(_))));
    }

    #[test]
    fn test_ordinary_comments_are_skipped() {
        let content = "-- update the stepping stones\n-- stepwise\nSELECT 1;\n";
        let migration = parse(content).unwrap();
        assert_eq!(migration.steps().len(), 1);
        assert_eq!(sql(migration.steps()[0].action(Direction::Apply)), "SELECT 1;");
    }

    #[test]
    fn test_context_rejects_mixed_layout() {
        let mut ctx = LoadContext::new("0001");
        ctx.step(Step::new("SELECT 1"));
        ctx.transaction(vec![Step::new("SELECT 2")], IgnoreErrors::None).unwrap();
        assert!(ctx.finish().is_err());

        let mut ctx = LoadContext::new("0002");
        ctx.transaction(vec![], IgnoreErrors::None).unwrap();
        assert!(ctx.transaction(vec![], IgnoreErrors::None).is_err());
    }
}
