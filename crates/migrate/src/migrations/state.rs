//! State Store - durable record of applied migrations
//!
//! One row per applied unit, keyed by name. Writes are issued on whatever
//! executor the caller hands in, which during a run is the step's own
//! transaction, so the schema change and its record commit together.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::definitions::AppliedRecord;
use crate::backends::{DatabaseValue, SqlDialect, SqlExecutor};
use crate::error::{MigrateResult, MigrationError};

/// Storage of applied-migration records
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Name of the backing table
    fn table(&self) -> &str;

    /// Create the backing table if it does not exist
    async fn ensure_table(&self, db: &mut dyn SqlExecutor) -> MigrateResult<()>;

    /// Whether the backing table exists
    async fn table_exists(&self, db: &mut dyn SqlExecutor) -> MigrateResult<bool>;

    /// Every applied record
    async fn current_applied(&self, db: &mut dyn SqlExecutor) -> MigrateResult<Vec<AppliedRecord>>;

    /// Record `name` as applied at `at`; fails if already recorded
    async fn record_applied(
        &self,
        db: &mut dyn SqlExecutor,
        name: &str,
        at: DateTime<Utc>,
    ) -> MigrateResult<()>;

    /// Remove the record for `name`; fails if not recorded
    async fn record_reverted(&self, db: &mut dyn SqlExecutor, name: &str) -> MigrateResult<()>;
}

/// State store backed by a table in the target database
#[derive(Debug, Clone)]
pub struct SqlStateStore {
    table: String,
    dialect: SqlDialect,
}

impl SqlStateStore {
    pub fn new(table: impl Into<String>, dialect: SqlDialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    fn timestamp_value(&self, at: DateTime<Utc>) -> DatabaseValue {
        match self.dialect {
            // stored as text; keep microseconds so ordering survives a round trip
            SqlDialect::SQLite => DatabaseValue::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            SqlDialect::PostgreSQL | SqlDialect::MySQL => DatabaseValue::DateTime(at),
        }
    }

    async fn is_recorded(&self, db: &mut dyn SqlExecutor, name: &str) -> MigrateResult<bool> {
        let row = db
            .fetch_optional(
                &self.dialect.select_one_applied_sql(&self.table),
                &[DatabaseValue::from(name)],
            )
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_table(&self, db: &mut dyn SqlExecutor) -> MigrateResult<()> {
        db.execute_unprepared(&self.dialect.create_state_table_sql(&self.table))
            .await?;
        Ok(())
    }

    async fn table_exists(&self, db: &mut dyn SqlExecutor) -> MigrateResult<bool> {
        let row = db
            .fetch_optional(
                self.dialect.table_exists_sql(),
                &[DatabaseValue::from(self.table.as_str())],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn current_applied(&self, db: &mut dyn SqlExecutor) -> MigrateResult<Vec<AppliedRecord>> {
        let rows = db
            .fetch_all(&self.dialect.select_applied_sql(&self.table), &[])
            .await?;

        rows.iter()
            .map(|row| -> MigrateResult<AppliedRecord> {
                let name = row
                    .get_by_name("name")?
                    .as_str()
                    .ok_or_else(|| MigrationError::Database("State row has a non-text name".into()))?
                    .to_string();
                let applied_at = row.get_by_name("applied_at")?.as_datetime().ok_or_else(|| {
                    MigrationError::Database(format!("State row for '{}' has an unreadable timestamp", name))
                })?;
                Ok(AppliedRecord { name, applied_at })
            })
            .collect()
    }

    async fn record_applied(
        &self,
        db: &mut dyn SqlExecutor,
        name: &str,
        at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        if self.is_recorded(db, name).await? {
            return Err(MigrationError::AlreadyApplied(name.to_string()));
        }

        db.execute(
            &self.dialect.insert_applied_sql(&self.table),
            &[DatabaseValue::from(name), self.timestamp_value(at)],
        )
        .await?;
        Ok(())
    }

    async fn record_reverted(&self, db: &mut dyn SqlExecutor, name: &str) -> MigrateResult<()> {
        let deleted = db
            .execute(
                &self.dialect.delete_applied_sql(&self.table),
                &[DatabaseValue::from(name)],
            )
            .await?;

        if deleted == 0 {
            return Err(MigrationError::NotApplied(name.to_string()));
        }
        Ok(())
    }
}
