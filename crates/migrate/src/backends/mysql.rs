//! MySQL Backend Implementation
//!
//! Runs on a single `MySqlConnection`. The migration lock is a named lock from
//! `GET_LOCK`, which belongs to the session. MySQL commits implicitly around
//! DDL, so step transactions only protect data statements and bookkeeping.

use async_trait::async_trait;
use sqlx::{Connection, Executor, MySql, MySqlConnection, Transaction};

use super::core::{bind_values, decode_row, DatabaseBackend, DatabaseRow, DatabaseTransaction, DatabaseValue, SqlExecutor};
use super::{DatabaseBackendType, SqlDialect};
use crate::error::{MigrateResult, MigrationError};

const TRY_LOCK_SQL: &str = "SELECT GET_LOCK(?, 0) AS locked";
const UNLOCK_SQL: &str = "SELECT RELEASE_LOCK(?) AS released";

/// MySQL caps user lock names at 64 characters
const MAX_LOCK_NAME: usize = 64;

/// MySQL database backend implementation
pub struct MySqlBackend {
    conn: MySqlConnection,
}

impl MySqlBackend {
    /// Open a connection to `database_url`
    pub async fn connect(database_url: &str) -> MigrateResult<Self> {
        let conn = MySqlConnection::connect(database_url)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to connect to MySQL: {}", e)))?;
        Ok(Self { conn })
    }

    fn lock_name(key: &str) -> String {
        key.chars().take(MAX_LOCK_NAME).collect()
    }
}

#[async_trait]
impl SqlExecutor for MySqlBackend {
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
impl DatabaseBackend for MySqlBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
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
        Ok(Box::new(MySqlTransaction { tx }))
    }

    async fn try_lock(&mut self, key: &str) -> MigrateResult<bool> {
        let name = Self::lock_name(key);
        let row = self
            .fetch_optional(TRY_LOCK_SQL, &[DatabaseValue::from(name)])
            .await?
            .ok_or_else(|| MigrationError::Database("GET_LOCK returned no rows".into()))?;
        // NULL means an error occurred on the server side, treat as not acquired
        Ok(row.get_by_index(0)?.as_bool().unwrap_or(false))
    }

    async fn unlock(&mut self, key: &str) -> MigrateResult<()> {
        let name = Self::lock_name(key);
        let released = self
            .fetch_optional(UNLOCK_SQL, &[DatabaseValue::from(name)])
            .await?
            .and_then(|row| row.get_by_index(0).ok().and_then(DatabaseValue::as_bool))
            .unwrap_or(false);
        if !released {
            tracing::warn!(key, "Named lock was not held by this session");
        }
        Ok(())
    }

    async fn force_unlock(&mut self, _key: &str) -> MigrateResult<bool> {
        Ok(false)
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// MySQL transaction implementation
pub struct MySqlTransaction<'c> {
    tx: Transaction<'c, MySql>,
}

#[async_trait]
impl<'c> SqlExecutor for MySqlTransaction<'c> {
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
impl<'c> DatabaseTransaction for MySqlTransaction<'c> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name_is_truncated() {
        let key = "x".repeat(100);
        assert_eq!(MySqlBackend::lock_name(&key).len(), MAX_LOCK_NAME);
        assert_eq!(MySqlBackend::lock_name("landfill_migrations"), "landfill_migrations");
    }
}
