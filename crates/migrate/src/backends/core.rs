//! Core Database Backend Traits
//!
//! This module defines the SQL execution capability the engine runs against.
//! Backends own a single dedicated connection for the whole invocation: the
//! cross-process migration lock is session scoped on PostgreSQL and MySQL, so
//! lock and steps must share one session.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use super::dialect::SqlDialect;
use crate::error::{MigrateResult, MigrationError};

/// Statement execution shared by connections and transactions
#[async_trait]
pub trait SqlExecutor: Send {
    /// Execute a parameterised statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64>;

    /// Execute a statement verbatim, without preparing it
    async fn execute_unprepared(&mut self, sql: &str) -> MigrateResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue])
        -> MigrateResult<Vec<DatabaseRow>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Option<DatabaseRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }
}

/// Abstract database transaction trait.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait DatabaseTransaction: SqlExecutor {
    /// View this transaction as a plain executor
    fn as_executor(&mut self) -> &mut dyn SqlExecutor;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// A live connection to one target database
#[async_trait]
pub trait DatabaseBackend: SqlExecutor {
    /// Get the SQL dialect used by this backend
    fn dialect(&self) -> SqlDialect;

    /// Get the backend type
    fn backend_type(&self) -> super::DatabaseBackendType;

    /// View this connection as a plain executor
    fn as_executor(&mut self) -> &mut dyn SqlExecutor;

    /// Begin a transaction on this connection
    async fn begin<'a>(&'a mut self) -> MigrateResult<Box<dyn DatabaseTransaction + 'a>>;

    /// Try once to take the migration lock identified by `key`
    async fn try_lock(&mut self, key: &str) -> MigrateResult<bool>;

    /// Release a lock taken with `try_lock`
    async fn unlock(&mut self, key: &str) -> MigrateResult<()>;

    /// Clear a lock left behind by a crashed holder.
    ///
    /// Returns whether anything was cleared. Session-scoped locks vanish with
    /// their session, so backends using them have nothing to clear.
    async fn force_unlock(&mut self, key: &str) -> MigrateResult<bool>;

    /// Close the connection
    async fn close(self: Box<Self>) -> MigrateResult<()>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Interpret the value as a boolean; integers are truthy when non-zero
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(b) => Some(*b),
            DatabaseValue::Int64(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Interpret the value as a UTC timestamp.
    ///
    /// SQLite hands timestamps back as text, so RFC 3339 and the common
    /// `YYYY-MM-DD HH:MM:SS[.f]` layout are both accepted.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DatabaseValue::DateTime(dt) => Some(*dt),
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            _ => None,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

/// A decoded result row
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> MigrateResult<&DatabaseValue> {
        self.values
            .get(index)
            .ok_or_else(|| MigrationError::Database(format!("Column index {} out of range", index)))
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> MigrateResult<&DatabaseValue> {
        let index = self
            .columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| MigrationError::Database(format!("Column '{}' not found", name)))?;
        self.get_by_index(index)
    }
}

/// Decode a sqlx row into a `DatabaseRow`.
///
/// Types are probed in a fixed order; sqlx rejects mismatched types before
/// decoding, so each probe is a cheap compatibility check.
macro_rules! decode_row {
    ($row:expr) => {{
        use sqlx::{Column, Row, ValueRef};
        use $crate::backends::core::{DatabaseRow, DatabaseValue};

        let row = $row;
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());

        for (index, column) in row.columns().iter().enumerate() {
            let is_null = row.try_get_raw(index)?.is_null();
            let value = if is_null {
                DatabaseValue::Null
            } else if let Ok(v) = row.try_get::<String, _>(index) {
                DatabaseValue::String(v)
            } else if let Ok(v) = row.try_get::<i64, _>(index) {
                DatabaseValue::Int64(v)
            } else if let Ok(v) = row.try_get::<i32, _>(index) {
                DatabaseValue::Int64(i64::from(v))
            } else if let Ok(v) = row.try_get::<bool, _>(index) {
                DatabaseValue::Bool(v)
            } else if let Ok(v) = row.try_get::<f64, _>(index) {
                DatabaseValue::Float64(v)
            } else if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
                DatabaseValue::DateTime(v)
            } else if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
                DatabaseValue::DateTime(v.and_utc())
            } else {
                return Err($crate::error::MigrationError::Database(format!(
                    "Unsupported type for column '{}'",
                    column.name()
                )));
            };
            columns.push(column.name().to_string());
            values.push(value);
        }

        DatabaseRow::new(columns, values)
    }};
}

pub(crate) use decode_row;

/// Bind a slice of `DatabaseValue`s onto a sqlx query
macro_rules! bind_values {
    ($query:expr, $params:expr) => {{
        use $crate::backends::core::DatabaseValue;

        let mut query = $query;
        for param in $params {
            query = match param {
                DatabaseValue::Null => query.bind(Option::<String>::None),
                DatabaseValue::Bool(b) => query.bind(*b),
                DatabaseValue::Int64(i) => query.bind(*i),
                DatabaseValue::Float64(f) => query.bind(*f),
                DatabaseValue::String(s) => query.bind(s.clone()),
                DatabaseValue::DateTime(dt) => query.bind(*dt),
            };
        }
        query
    }};
}

pub(crate) use bind_values;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_from_rfc3339_text() {
        let value = DatabaseValue::String("2024-03-01T10:20:30.000123+00:00".into());
        let dt = value.as_datetime().unwrap();
        assert_eq!(dt.timestamp_subsec_micros(), 123);
    }

    #[test]
    fn test_datetime_from_sqlite_text() {
        let value = DatabaseValue::String("2024-03-01 10:20:30".into());
        assert_eq!(
            value.as_datetime(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap())
        );
    }

    #[test]
    fn test_bool_from_integer() {
        assert_eq!(DatabaseValue::Int64(1).as_bool(), Some(true));
        assert_eq!(DatabaseValue::Int64(0).as_bool(), Some(false));
        assert_eq!(DatabaseValue::Null.as_bool(), None);
    }

    #[test]
    fn test_row_lookup_by_name() {
        let row = DatabaseRow::new(
            vec!["name".into(), "applied_at".into()],
            vec!["001_init".into(), DatabaseValue::Null],
        );
        assert_eq!(row.get_by_name("name").unwrap().as_str(), Some("001_init"));
        assert!(row.get_by_name("applied_at").unwrap().is_null());
        assert!(row.get_by_name("batch").is_err());
    }
}
