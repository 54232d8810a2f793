//! Connection settings remembered between runs
//!
//! Stored as TOML next to the migrations so later runs can omit the database
//! argument. The file may hold a password, so it is only readable by its owner.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the cache file inside the migrations directory
pub const CACHE_FILE: &str = ".ratchet-migrate";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_table: Option<String>,
}

impl CachedSettings {
    pub fn path_in(migrations_dir: &Path) -> PathBuf {
        migrations_dir.join(CACHE_FILE)
    }

    /// Read the cache, or empty settings when there is none
    pub fn load(migrations_dir: &Path) -> Result<Self> {
        let path = Self::path_in(migrations_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Malformed settings in {}", path.display()))
    }

    pub fn save(&self, migrations_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(migrations_dir);
        let content = toml::to_string(self).context("Failed to serialize settings")?;

        let mut file = open_private(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.write_all(content.as_bytes())?;
        Ok(path)
    }

    pub fn is_empty(&self) -> bool {
        self.database_url.is_none() && self.migration_table.is_none()
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // An existing file keeps its old mode unless reset.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
