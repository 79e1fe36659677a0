//! SQL dialects
//!
//! Renders abstract schema operations and the state-table bookkeeping
//! statements for each supported database.

use std::fmt;

use crate::error::{MigrateResult, MigrationError};
use crate::migrations::operations::{
    ColumnDefinition, ColumnType, IndexDefinition, SchemaOperation, TableDefinition,
};

/// SQL dialect enumeration for different database backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
            SqlDialect::MySQL => write!(f, "mysql"),
            SqlDialect::SQLite => write!(f, "sqlite"),
        }
    }
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }

    /// Quote an identifier, doubling any embedded quote characters
    pub fn quote(&self, identifier: &str) -> String {
        let q = self.identifier_quote();
        let escaped = identifier.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }

    /// Whether DDL statements take part in transactions.
    ///
    /// MySQL commits implicitly around DDL, so a failed step can leave its
    /// earlier statements in place.
    pub fn supports_transactional_ddl(&self) -> bool {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => true,
            SqlDialect::MySQL => false,
        }
    }

    /// Render one schema operation into the statements that perform it
    pub fn render(&self, operation: &SchemaOperation) -> MigrateResult<Vec<String>> {
        let sql = match operation {
            SchemaOperation::CreateTable(table) => self.create_table(table),
            SchemaOperation::DropTable { table } => format!("DROP TABLE {}", self.quote(table)),
            SchemaOperation::RenameTable { from, to } => format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote(from),
                self.quote(to)
            ),
            SchemaOperation::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote(table),
                self.column_definition(column)
            ),
            SchemaOperation::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote(table),
                self.quote(column)
            ),
            SchemaOperation::RenameColumn { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote(table),
                self.quote(from),
                self.quote(to)
            ),
            SchemaOperation::SetNullable {
                table,
                column,
                nullable,
            } => match self {
                SqlDialect::PostgreSQL => format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                    self.quote(table),
                    self.quote(column),
                    if *nullable { "DROP" } else { "SET" }
                ),
                SqlDialect::MySQL | SqlDialect::SQLite => {
                    return Err(MigrationError::unsupported(
                        self,
                        format!(
                            "cannot change nullability of {}.{} without the full column definition; use a raw statement",
                            table, column
                        ),
                    ));
                }
            },
            SchemaOperation::AddIndex(index) => self.create_index(index),
            SchemaOperation::DropIndex { table, name } => match self {
                SqlDialect::MySQL => {
                    format!("DROP INDEX {} ON {}", self.quote(name), self.quote(table))
                }
                SqlDialect::PostgreSQL | SqlDialect::SQLite => {
                    format!("DROP INDEX {}", self.quote(name))
                }
            },
            SchemaOperation::Raw(sql) => sql.trim().to_string(),
        };

        Ok(vec![sql])
    }

    /// Render a sequence of operations, preserving order
    pub fn render_all(&self, operations: &[SchemaOperation]) -> MigrateResult<Vec<String>> {
        let mut statements = Vec::new();
        for operation in operations {
            statements.extend(self.render(operation)?);
        }
        Ok(statements)
    }

    fn create_table(&self, table: &TableDefinition) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|column| self.column_definition(column))
            .collect();

        if !table.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.column_list(&table.primary_key)));
        }

        for columns in &table.unique {
            parts.push(format!("UNIQUE ({})", self.column_list(columns)));
        }

        for fk in &table.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                self.quote(&fk.column),
                self.quote(&fk.references_table),
                self.quote(&fk.references_column)
            ));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote(&table.name),
            parts.join(",\n    ")
        )
    }

    fn create_index(&self, index: &IndexDefinition) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.quote(&index.table),
            self.column_list(&index.columns)
        )
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_definition(&self, column: &ColumnDefinition) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote(&column.name),
            self.column_type(&column.column_type)
        );

        if column.column_type == ColumnType::Serial {
            match self {
                SqlDialect::PostgreSQL => sql.push_str(" PRIMARY KEY"),
                SqlDialect::MySQL => sql.push_str(" AUTO_INCREMENT PRIMARY KEY"),
                SqlDialect::SQLite => sql.push_str(" PRIMARY KEY AUTOINCREMENT"),
            }
            return sql;
        }

        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            sql.push_str(" NOT NULL");
        }

        if column.unique && !column.primary_key {
            sql.push_str(" UNIQUE");
        }

        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }

        sql
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        use SqlDialect::*;

        match (column_type, self) {
            (ColumnType::Serial, PostgreSQL) => "SERIAL".into(),
            (ColumnType::Serial, MySQL) => "INT".into(),
            (ColumnType::Serial, SQLite) => "INTEGER".into(),
            (ColumnType::Integer, MySQL) => "INT".into(),
            (ColumnType::Integer, _) => "INTEGER".into(),
            (ColumnType::BigInteger, SQLite) => "INTEGER".into(),
            (ColumnType::BigInteger, _) => "BIGINT".into(),
            (ColumnType::Boolean, MySQL) => "TINYINT(1)".into(),
            (ColumnType::Boolean, _) => "BOOLEAN".into(),
            (ColumnType::Text, _) => "TEXT".into(),
            (ColumnType::Varchar(len), _) => format!("VARCHAR({})", len),
            (ColumnType::Float, MySQL) => "FLOAT".into(),
            (ColumnType::Float, _) => "REAL".into(),
            (ColumnType::Double, PostgreSQL) => "DOUBLE PRECISION".into(),
            (ColumnType::Double, MySQL) => "DOUBLE".into(),
            (ColumnType::Double, SQLite) => "REAL".into(),
            (ColumnType::Decimal { precision, scale }, _) => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            (ColumnType::Date, _) => "DATE".into(),
            (ColumnType::Timestamp, MySQL) => "DATETIME".into(),
            (ColumnType::Timestamp, _) => "TIMESTAMP".into(),
            (ColumnType::Uuid, PostgreSQL) => "UUID".into(),
            (ColumnType::Uuid, MySQL) => "CHAR(36)".into(),
            (ColumnType::Uuid, SQLite) => "TEXT".into(),
            (ColumnType::Json, PostgreSQL) => "JSONB".into(),
            (ColumnType::Json, MySQL) => "JSON".into(),
            (ColumnType::Json, SQLite) => "TEXT".into(),
            (ColumnType::Binary, PostgreSQL) => "BYTEA".into(),
            (ColumnType::Binary, _) => "BLOB".into(),
            (ColumnType::Custom(sql), _) => sql.clone(),
        }
    }

    /// DDL for the migration state table
    pub fn create_state_table_sql(&self, table: &str) -> String {
        let timestamp = match self {
            SqlDialect::PostgreSQL => "TIMESTAMPTZ",
            SqlDialect::MySQL => "DATETIME(6)",
            SqlDialect::SQLite => "TEXT",
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {} VARCHAR(255) PRIMARY KEY,\n    {} {} NOT NULL\n)",
            self.quote(table),
            self.quote("name"),
            self.quote("applied_at"),
            timestamp
        )
    }

    /// Query returning one row when `table` exists; binds the table name
    pub fn table_exists_sql(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => {
                "SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1"
            }
            SqlDialect::MySQL => {
                "SELECT 1 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?"
            }
            SqlDialect::SQLite => "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
        }
    }

    pub fn select_applied_sql(&self, table: &str) -> String {
        format!(
            "SELECT {}, {} FROM {} ORDER BY {}",
            self.quote("name"),
            self.quote("applied_at"),
            self.quote(table),
            self.quote("name")
        )
    }

    pub fn select_one_applied_sql(&self, table: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            self.quote("name"),
            self.quote(table),
            self.quote("name"),
            self.parameter_placeholder(0)
        )
    }

    pub fn insert_applied_sql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.quote(table),
            self.quote("name"),
            self.quote("applied_at"),
            self.parameter_placeholder(0),
            self.parameter_placeholder(1)
        )
    }

    pub fn delete_applied_sql(&self, table: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.quote(table),
            self.quote("name"),
            self.parameter_placeholder(0)
        )
    }
}
