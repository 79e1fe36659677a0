//! Configuration for the migration engine
//!
//! Values are layered from lowest to highest precedence: built-in defaults,
//! a TOML file, environment variables, then explicit overrides from the
//! caller (usually command line flags).

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MigrateResult, MigrationError};

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "landfill.toml";

/// Migration engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Connection URL of the target database
    pub database_url: Option<String>,
    /// Directory holding `*.sql` migration files
    pub migrations_dir: PathBuf,
    /// Name of the state table recording applied migrations
    pub migrations_table: String,
    /// How long to wait for another invocation to release the lock
    pub lock_timeout_seconds: u64,
    /// Delay between lock attempts
    pub lock_poll_interval_millis: u64,
    /// Refuse units whose down operations disagree with the derived inverse
    pub strict_reversibility: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "landfill_migrations".to_string(),
            lock_timeout_seconds: 30,
            lock_poll_interval_millis: 250,
            strict_reversibility: false,
        }
    }
}

impl MigrationConfig {
    /// Parse a TOML document, filling missing keys with defaults
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a TOML configuration file
    pub fn from_file(path: &Path) -> MigrateResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrationError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load defaults, then the config file, then the environment.
    ///
    /// An explicit `path` must exist; the default `landfill.toml` is optional.
    pub fn load(path: Option<&Path>) -> MigrateResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from process environment variables
    pub fn apply_env(&mut self) -> MigrateResult<()> {
        self.apply_env_from(|key| env::var(key).ok())
    }

    /// Override fields from an environment lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> MigrateResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }

        if let Some(dir) = lookup("LANDFILL_MIGRATIONS_DIR") {
            self.migrations_dir = PathBuf::from(dir);
        }

        if let Some(table) = lookup("LANDFILL_MIGRATIONS_TABLE") {
            self.migrations_table = table;
        }

        if let Some(timeout) = lookup("LANDFILL_LOCK_TIMEOUT") {
            self.lock_timeout_seconds = timeout.parse().map_err(|_| {
                MigrationError::Configuration(format!(
                    "LANDFILL_LOCK_TIMEOUT must be a number of seconds, got '{}'",
                    timeout
                ))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> MigrateResult<()> {
        if !is_identifier(&self.migrations_table) {
            return Err(MigrationError::Configuration(format!(
                "Invalid migrations table name '{}': use letters, digits and underscores",
                self.migrations_table
            )));
        }

        if self.lock_poll_interval_millis == 0 {
            return Err(MigrationError::Configuration(
                "lock_poll_interval_millis must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured database URL, or an error naming how to set it
    pub fn require_database_url(&self) -> MigrateResult<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            MigrationError::Configuration(
                "No database URL configured: set DATABASE_URL or pass --database-url".to_string(),
            )
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_millis)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
