//! Database Backend Abstractions
//!
//! This module provides database backend abstractions to support multiple database types
//! (PostgreSQL, MySQL, SQLite) through common traits and interfaces.

pub mod core;
pub mod dialect;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::time::Duration;

pub use self::core::{DatabaseBackend, DatabaseRow, DatabaseTransaction, DatabaseValue, SqlExecutor};
pub use dialect::SqlDialect;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use crate::error::{MigrateResult, MigrationError};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect the backend from a connection URL's scheme
    pub fn from_url(url: &str) -> MigrateResult<Self> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| MigrationError::Configuration(format!("Invalid database URL: {}", redact_url(url))))?;
        scheme.parse().map_err(MigrationError::Configuration)
    }

    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::MySQL => SqlDialect::MySQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" => Ok(DatabaseBackendType::MySQL),
            "sqlite" | "sqlite3" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Open a dedicated connection to the database at `url`.
///
/// `busy_timeout` bounds how long SQLite waits on a locked database file.
pub async fn connect(url: &str, busy_timeout: Duration) -> MigrateResult<Box<dyn DatabaseBackend>> {
    let backend_type = DatabaseBackendType::from_url(url)?;
    tracing::debug!(backend = %backend_type, url = %redact_url(url), "Connecting to database");

    let backend: Box<dyn DatabaseBackend> = match backend_type {
        DatabaseBackendType::PostgreSQL => Box::new(PostgresBackend::connect(url).await?),
        DatabaseBackendType::MySQL => Box::new(MySqlBackend::connect(url).await?),
        DatabaseBackendType::SQLite => Box::new(SqliteBackend::connect(url, busy_timeout).await?),
    };

    Ok(backend)
}

/// Hide the password of a connection URL for display
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("***")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        }
        Ok(_) => url.to_string(),
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            DatabaseBackendType::from_url("postgres://localhost/app").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendType::from_url("postgresql://localhost/app").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendType::from_url("mysql://root@localhost/app").unwrap(),
            DatabaseBackendType::MySQL
        );
        assert_eq!(
            DatabaseBackendType::from_url("sqlite://app.db").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert_eq!(
            DatabaseBackendType::from_url("sqlite::memory:").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert!(matches!(
            DatabaseBackendType::from_url("oracle://db/app"),
            Err(MigrationError::Configuration(_))
        ));
        assert!(DatabaseBackendType::from_url("no-scheme").is_err());
    }

    #[test]
    fn test_backend_type_aliases() {
        assert_eq!(
            "sqlite3".parse::<DatabaseBackendType>().unwrap(),
            DatabaseBackendType::SQLite
        );
        assert_eq!(DatabaseBackendType::MySQL.to_string(), "mysql");
        assert_eq!(DatabaseBackendType::MySQL.dialect(), SqlDialect::MySQL);
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://app:secret@db:5432/app"),
            "postgres://app:***@db:5432/app"
        );
        assert_eq!(redact_url("sqlite::memory:"), "sqlite::memory:");
    }
}
