//! Registry - the full ordered collection of migrations
//!
//! Guarantees unique ids, ascending id order and at most one post-apply unit.
//! Reading the individual sources is left to a [`Loader`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::loader::{LoadContext, Loader};
use crate::migration::Migration;

/// Ordered migrations plus the optional post-apply unit
#[derive(Debug, Clone, Default)]
pub struct Registry {
    migrations: Vec<Migration>,
    post_apply: Option<Migration>,
}

impl Registry {
    /// Load all migrations in `dir` that `loader` accepts
    pub fn load(dir: impl AsRef<Path>, loader: &dyn Loader) -> MigrateResult<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| {
            MigrateError::Load(format!(
                "Failed to read migrations directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| MigrateError::Load(format!("Failed to read directory entry: {}", e)))?
                .path();
            if loader.accepts(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut migrations = Vec::with_capacity(paths.len());
        for path in paths {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    MigrateError::Load(format!("Invalid migration filename: {}", path.display()))
                })?
                .to_string();

            debug!("Loading migration {} from {}", id, path.display());
            let mut ctx = LoadContext::for_path(id, &path);
            loader.load(&path, &mut ctx)?;
            migrations.push(ctx.finish()?);
        }

        Self::from_migrations(migrations)
    }

    /// Build a registry from already constructed migrations
    pub fn from_migrations(migrations: impl IntoIterator<Item = Migration>) -> MigrateResult<Self> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut post_apply = None;

        for migration in migrations {
            if !seen.insert(migration.id().to_string()) {
                return Err(MigrateError::Load(format!(
                    "Duplicate migration id '{}'",
                    migration.id()
                )));
            }
            migration.validate()?;

            if migration.is_post_apply() {
                post_apply = Some(migration);
            } else {
                ordered.push(migration);
            }
        }

        ordered.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(Self {
            migrations: ordered,
            post_apply,
        })
    }

    /// Ordinary migrations, ascending by id
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn post_apply(&self) -> Option<&Migration> {
        self.post_apply.as_ref()
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.id()).collect()
    }

    /// Ids of ordinary migrations matching `pattern`
    pub fn matching(&self, pattern: &Regex) -> Vec<String> {
        self.migrations
            .iter()
            .filter(|m| pattern.is_match(m.id()))
            .map(|m| m.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
