//! Schema Operations - Abstract, dialect-free schema changes
//!
//! Migration units carry these instead of SQL text so that each backend can
//! render them in its own dialect, and so that reverses can be derived where
//! the operation holds enough information to do so.

use std::fmt;

/// Column data types understood by every dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key
    Serial,
    Integer,
    BigInteger,
    Boolean,
    Text,
    Varchar(u32),
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Date,
    Timestamp,
    Uuid,
    Json,
    Binary,
    /// Passed through to the dialect verbatim
    Custom(String),
}

/// Foreign key reference on a column or table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// A column in CREATE TABLE or ADD COLUMN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Default expression, rendered verbatim
    pub default: Option<String>,
    pub primary_key: bool,
    pub unique: bool,
}

impl ColumnDefinition {
    /// A nullable column with no default
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn default_value(&mut self, expression: impl Into<String>) -> &mut Self {
        self.default = Some(expression.into());
        self
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }
}

/// Full definition of a table to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Composite primary key; empty when a column carries `primary_key`
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }
}

/// Index on one or more columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    /// Index named `idx_<table>_<columns>` (`uniq_` prefix when unique)
    pub fn new(table: &str, columns: &[&str], unique: bool) -> Self {
        let prefix = if unique { "uniq" } else { "idx" };
        Self {
            name: format!("{}_{}_{}", prefix, table, columns.join("_")),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A single abstract schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOperation {
    CreateTable(TableDefinition),
    DropTable {
        table: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    SetNullable {
        table: String,
        column: String,
        nullable: bool,
    },
    AddIndex(IndexDefinition),
    DropIndex {
        table: String,
        name: String,
    },
    /// A statement passed to the database verbatim
    Raw(String),
}

impl SchemaOperation {
    /// The operation that undoes this one, when it can be derived.
    ///
    /// Drops lose the information needed to recreate what they removed, and
    /// raw statements are opaque, so both return `None`.
    pub fn inverse(&self) -> Option<SchemaOperation> {
        match self {
            SchemaOperation::CreateTable(table) => Some(SchemaOperation::DropTable {
                table: table.name.clone(),
            }),
            SchemaOperation::RenameTable { from, to } => Some(SchemaOperation::RenameTable {
                from: to.clone(),
                to: from.clone(),
            }),
            SchemaOperation::AddColumn { table, column } => Some(SchemaOperation::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            }),
            SchemaOperation::RenameColumn { table, from, to } => {
                Some(SchemaOperation::RenameColumn {
                    table: table.clone(),
                    from: to.clone(),
                    to: from.clone(),
                })
            }
            SchemaOperation::SetNullable {
                table,
                column,
                nullable,
            } => Some(SchemaOperation::SetNullable {
                table: table.clone(),
                column: column.clone(),
                nullable: !nullable,
            }),
            SchemaOperation::AddIndex(index) => Some(SchemaOperation::DropIndex {
                table: index.table.clone(),
                name: index.name.clone(),
            }),
            SchemaOperation::DropTable { .. }
            | SchemaOperation::DropColumn { .. }
            | SchemaOperation::DropIndex { .. }
            | SchemaOperation::Raw(_) => None,
        }
    }

    /// Derive the full backward sequence for `forward`, if every operation is invertible
    pub fn derive_backward(forward: &[SchemaOperation]) -> Option<Vec<SchemaOperation>> {
        forward.iter().rev().map(SchemaOperation::inverse).collect()
    }
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOperation::CreateTable(table) => write!(f, "create table {}", table.name),
            SchemaOperation::DropTable { table } => write!(f, "drop table {}", table),
            SchemaOperation::RenameTable { from, to } => {
                write!(f, "rename table {} to {}", from, to)
            }
            SchemaOperation::AddColumn { table, column } => {
                write!(f, "add column {}.{}", table, column.name)
            }
            SchemaOperation::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            SchemaOperation::RenameColumn { table, from, to } => {
                write!(f, "rename column {}.{} to {}", table, from, to)
            }
            SchemaOperation::SetNullable {
                table,
                column,
                nullable,
            } => {
                let action = if *nullable { "drop not null" } else { "set not null" };
                write!(f, "{} on {}.{}", action, table, column)
            }
            SchemaOperation::AddIndex(index) => {
                write!(f, "add index {} on {}", index.name, index.table)
            }
            SchemaOperation::DropIndex { table, name } => {
                write!(f, "drop index {} on {}", name, table)
            }
            SchemaOperation::Raw(sql) => write!(f, "raw: {}", sql),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_of_create_table_is_drop() {
        let op = SchemaOperation::CreateTable(TableDefinition::new("users"));
        assert_eq!(
            op.inverse(),
            Some(SchemaOperation::DropTable {
                table: "users".into()
            })
        );
    }

    #[test]
    fn test_inverse_of_rename_swaps() {
        let op = SchemaOperation::RenameColumn {
            table: "users".into(),
            from: "mail".into(),
            to: "email".into(),
        };
        let back = op.inverse().unwrap();
        assert_eq!(back.inverse().unwrap(), op);
    }

    #[test]
    fn test_drops_and_raw_are_not_invertible() {
        assert!(SchemaOperation::DropColumn {
            table: "users".into(),
            column: "email".into()
        }
        .inverse()
        .is_none());
        assert!(SchemaOperation::Raw("UPDATE users SET a = 1".into())
            .inverse()
            .is_none());
    }

    #[test]
    fn test_derive_backward_reverses_order() {
        let forward = vec![
            SchemaOperation::AddColumn {
                table: "users".into(),
                column: ColumnDefinition::new("email", ColumnType::Varchar(255)),
            },
            SchemaOperation::AddIndex(IndexDefinition::new("users", &["email"], true)),
        ];
        let backward = SchemaOperation::derive_backward(&forward).unwrap();
        assert_eq!(
            backward,
            vec![
                SchemaOperation::DropIndex {
                    table: "users".into(),
                    name: "uniq_users_email".into()
                },
                SchemaOperation::DropColumn {
                    table: "users".into(),
                    column: "email".into()
                },
            ]
        );
    }

    #[test]
    fn test_derive_backward_fails_with_raw() {
        let forward = vec![
            SchemaOperation::CreateTable(TableDefinition::new("tweet")),
            SchemaOperation::Raw("INSERT INTO tweet DEFAULT VALUES".into()),
        ];
        assert!(SchemaOperation::derive_backward(&forward).is_none());
    }
}
