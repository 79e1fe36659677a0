//! SQLite Backend Implementation
//!
//! Runs on a single `SqliteConnection`. SQLite has no session locks, so the
//! migration lock is a lease row in a companion `<table>_lock` table. A holder
//! that crashes leaves its lease behind; `force_unlock` clears it.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor, Sqlite, SqliteConnection, Transaction};

use super::core::{bind_values, decode_row, DatabaseBackend, DatabaseRow, DatabaseTransaction, DatabaseValue, SqlExecutor};
use super::{DatabaseBackendType, SqlDialect};
use crate::error::{MigrateResult, MigrationError};

/// SQLite database backend implementation
pub struct SqliteBackend {
    conn: SqliteConnection,
    /// Identifies this connection as a lease holder
    holder: String,
}

impl SqliteBackend {
    /// Open a connection to `database_url`, creating the file if missing
    pub async fn connect(database_url: &str, busy_timeout: Duration) -> MigrateResult<Self> {
        let options = SqliteConnectOptions::from_str(&normalize_url(database_url))
            .map_err(|e| MigrationError::Configuration(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(busy_timeout);

        let conn = options
            .connect()
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to connect to SQLite: {}", e)))?;

        let holder = format!(
            "pid-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        Ok(Self { conn, holder })
    }

    fn lock_table(key: &str) -> String {
        SqlDialect::SQLite.quote(&format!("{}_lock", key))
    }

    async fn lock_table_exists(&mut self, key: &str) -> MigrateResult<bool> {
        let name = format!("{}_lock", key);
        let row = self
            .fetch_optional(SqlDialect::SQLite.table_exists_sql(), &[DatabaseValue::from(name)])
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SqlExecutor for SqliteBackend {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        let query = bind_values!(sqlx::query(sql), params);
        Ok(query.execute(&mut self.conn).await?.rows_affected())
    }

    async fn execute_unprepared(&mut self, sql: &str) -> MigrateResult<u64> {
        Ok(self.conn.execute(sql).await?.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>> {
        let query = bind_values!(sqlx::query(sql), params);
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter()
            .map(|row| -> MigrateResult<DatabaseRow> { Ok(decode_row!(row)) })
            .collect()
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn as_executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }

    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn DatabaseTransaction + 'a>> {
        let tx = self
            .conn
            .begin()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn try_lock(&mut self, key: &str) -> MigrateResult<bool> {
        let table = Self::lock_table(key);
        self.execute_unprepared(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY CHECK (id = 1),\n    holder TEXT NOT NULL,\n    acquired_at TEXT NOT NULL\n)",
            table
        ))
        .await?;

        let acquired_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let holder = self.holder.clone();
        let inserted = self
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (id, holder, acquired_at) VALUES (1, ?, ?)",
                    table
                ),
                &[DatabaseValue::from(holder), DatabaseValue::from(acquired_at)],
            )
            .await?;

        Ok(inserted == 1)
    }

    async fn unlock(&mut self, key: &str) -> MigrateResult<()> {
        let holder = self.holder.clone();
        let deleted = self
            .execute(
                &format!("DELETE FROM {} WHERE id = 1 AND holder = ?", Self::lock_table(key)),
                &[DatabaseValue::from(holder)],
            )
            .await?;
        if deleted == 0 {
            tracing::warn!(key, "Lock lease was not held by this connection");
        }
        Ok(())
    }

    async fn force_unlock(&mut self, key: &str) -> MigrateResult<bool> {
        if !self.lock_table_exists(key).await? {
            return Ok(false);
        }
        let deleted = self
            .execute(&format!("DELETE FROM {} WHERE id = 1", Self::lock_table(key)), &[])
            .await?;
        Ok(deleted > 0)
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
}

#[async_trait]
impl<'c> SqlExecutor for SqliteTransaction<'c> {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        let query = bind_values!(sqlx::query(sql), params);
        Ok(query.execute(&mut *self.tx).await?.rows_affected())
    }

    async fn execute_unprepared(&mut self, sql: &str) -> MigrateResult<u64> {
        Ok((&mut *self.tx).execute(sql).await?.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Vec<DatabaseRow>> {
        let query = bind_values!(sqlx::query(sql), params);
        let rows = query.fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| -> MigrateResult<DatabaseRow> { Ok(decode_row!(row)) })
            .collect()
    }
}

#[async_trait]
impl<'c> DatabaseTransaction for SqliteTransaction<'c> {
    fn as_executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Failed to rollback transaction: {}", e)))
    }
}

/// sqlx only understands the `sqlite:` scheme
fn normalize_url(database_url: &str) -> String {
    match database_url.strip_prefix("sqlite3:") {
        Some(rest) => format!("sqlite:{}", rest),
        None => database_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_backend() -> SqliteBackend {
        SqliteBackend::connect("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_fetch() {
        let mut db = memory_backend().await;
        db.execute_unprepared("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let inserted = db
            .execute("INSERT INTO t (name) VALUES (?)", &[DatabaseValue::from("alpha")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = db.fetch_all("SELECT id, name FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id").unwrap().as_i64(), Some(1));
        assert_eq!(rows[0].get_by_name("name").unwrap().as_str(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let mut db = memory_backend().await;
        db.execute_unprepared("CREATE TABLE t (id INTEGER)").await.unwrap();
        {
            let mut tx = db.begin().await.unwrap();
            tx.execute("INSERT INTO t (id) VALUES (?)", &[DatabaseValue::Int64(1)])
                .await
                .unwrap();
        }
        let rows = db.fetch_all("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_lease_lock() {
        let mut db = memory_backend().await;
        assert!(db.try_lock("landfill_migrations").await.unwrap());
        assert!(!db.try_lock("landfill_migrations").await.unwrap());
        db.unlock("landfill_migrations").await.unwrap();
        assert!(db.try_lock("landfill_migrations").await.unwrap());
        assert!(db.force_unlock("landfill_migrations").await.unwrap());
        assert!(!db.force_unlock("landfill_migrations").await.unwrap());
    }

    #[test]
    fn test_sqlite3_scheme_is_rewritten() {
        assert_eq!(normalize_url("sqlite3://app.db"), "sqlite://app.db");
        assert_eq!(normalize_url("sqlite3::memory:"), "sqlite::memory:");
        assert_eq!(normalize_url("sqlite://app.db"), "sqlite://app.db");
    }

    #[tokio::test]
    async fn test_connect_through_sqlite3_alias() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite3://{}", dir.path().join("alias.db").display());
        let mut db = SqliteBackend::connect(&url, Duration::from_secs(1)).await.unwrap();
        db.execute_unprepared("CREATE TABLE t (id INTEGER)").await.unwrap();
        assert!(dir.path().join("alias.db").exists());
    }

    #[tokio::test]
    async fn test_force_unlock_without_lock_table() {
        let mut db = memory_backend().await;
        assert!(!db.force_unlock("landfill_migrations").await.unwrap());
    }
}
