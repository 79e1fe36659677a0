//! PostgreSQL Backend Implementation
//!
//! Runs on a single `PgConnection`. The migration lock is a session-level
//! advisory lock, released explicitly or when the session ends.

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection, Postgres, Transaction};

use super::core::{bind_values, decode_row, DatabaseBackend, DatabaseRow, DatabaseTransaction, DatabaseValue, SqlExecutor};
use super::{DatabaseBackendType, SqlDialect};
use crate::error::{MigrateResult, MigrationError};

const TRY_LOCK_SQL: &str = "SELECT pg_try_advisory_lock(hashtext($1)) AS locked";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock(hashtext($1)) AS released";

/// PostgreSQL database backend implementation
pub struct PostgresBackend {
    conn: PgConnection,
}

impl PostgresBackend {
    /// Open a connection to `database_url`
    pub async fn connect(database_url: &str) -> MigrateResult<Self> {
        let conn = PgConnection::connect(database_url)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SqlExecutor for PostgresBackend {
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
impl DatabaseBackend for PostgresBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
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
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn try_lock(&mut self, key: &str) -> MigrateResult<bool> {
        let row = self
            .fetch_optional(TRY_LOCK_SQL, &[DatabaseValue::from(key)])
            .await?
            .ok_or_else(|| MigrationError::Database("Advisory lock query returned no rows".into()))?;
        Ok(row.get_by_index(0)?.as_bool().unwrap_or(false))
    }

    async fn unlock(&mut self, key: &str) -> MigrateResult<()> {
        let released = self
            .fetch_optional(UNLOCK_SQL, &[DatabaseValue::from(key)])
            .await?
            .and_then(|row| row.get_by_index(0).ok().and_then(DatabaseValue::as_bool))
            .unwrap_or(false);
        if !released {
            tracing::warn!(key, "Advisory lock was not held by this session");
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

/// PostgreSQL transaction implementation
pub struct PostgresTransaction<'c> {
    tx: Transaction<'c, Postgres>,
}

#[async_trait]
impl<'c> SqlExecutor for PostgresTransaction<'c> {
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
impl<'c> DatabaseTransaction for PostgresTransaction<'c> {
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
