//! Schema Builder - DSL for authoring migration operations
//!
//! Provides a fluent interface for building the abstract schema operations a
//! migration runs. Nothing here produces SQL; backends render the operations.

use super::operations::{
    ColumnDefinition, ColumnType, ForeignKey, IndexDefinition, SchemaOperation, TableDefinition,
};

/// Collects schema operations for one direction of a migration
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    operations: Vec<SchemaOperation>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);

        self.operations
            .push(SchemaOperation::CreateTable(table_builder.build()));
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropTable {
            table: table_name.to_string(),
        });
        self
    }

    /// Rename a table
    pub fn rename_table(&mut self, from: &str, to: &str) -> &mut Self {
        self.operations.push(SchemaOperation::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Add a column to existing table.
    ///
    /// Returns the new column so constraints can be chained onto it.
    pub fn add_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        column_type: ColumnType,
    ) -> &mut ColumnDefinition {
        self.operations.push(SchemaOperation::AddColumn {
            table: table_name.to_string(),
            column: ColumnDefinition::new(column_name, column_type),
        });
        match self.operations.last_mut() {
            Some(SchemaOperation::AddColumn { column, .. }) => column,
            _ => unreachable!("add column operation was just pushed"),
        }
    }

    /// Drop a column from existing table
    pub fn drop_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropColumn {
            table: table_name.to_string(),
            column: column_name.to_string(),
        });
        self
    }

    /// Rename a column
    pub fn rename_column(&mut self, table_name: &str, from: &str, to: &str) -> &mut Self {
        self.operations.push(SchemaOperation::RenameColumn {
            table: table_name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Add a NOT NULL constraint to a column
    pub fn add_not_null(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.set_nullable(table_name, column_name, false)
    }

    /// Remove a NOT NULL constraint from a column
    pub fn drop_not_null(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.set_nullable(table_name, column_name, true)
    }

    fn set_nullable(&mut self, table_name: &str, column_name: &str, nullable: bool) -> &mut Self {
        self.operations.push(SchemaOperation::SetNullable {
            table: table_name.to_string(),
            column: column_name.to_string(),
            nullable,
        });
        self
    }

    /// Create an index
    pub fn create_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        self.push_index(table_name, column_names, index_name, false)
    }

    /// Create a unique index
    pub fn create_unique_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        self.push_index(table_name, column_names, index_name, true)
    }

    fn push_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
        unique: bool,
    ) -> &mut Self {
        let mut index = IndexDefinition::new(table_name, column_names, unique);
        if let Some(name) = index_name {
            index = index.named(name);
        }
        self.operations.push(SchemaOperation::AddIndex(index));
        self
    }

    /// Drop an index
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropIndex {
            table: table_name.to_string(),
            name: index_name.to_string(),
        });
        self
    }

    /// Run a statement verbatim
    pub fn raw(&mut self, sql: &str) -> &mut Self {
        self.operations.push(SchemaOperation::Raw(sql.to_string()));
        self
    }

    /// Operations collected so far
    pub fn operations(&self) -> &[SchemaOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<SchemaOperation> {
        self.operations
    }
}

/// Table builder for CREATE TABLE operations
pub struct TableBuilder {
    table: TableDefinition,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table: TableDefinition::new(table_name),
        }
    }

    /// Add a column
    pub fn column(&mut self, name: &str, column_type: ColumnType) -> &mut ColumnDefinition {
        self.table
            .columns
            .push(ColumnDefinition::new(name, column_type));
        let last = self.table.columns.len() - 1;
        &mut self.table.columns[last]
    }

    /// Add an ID column (auto-increment primary key)
    pub fn id(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Serial).primary_key()
    }

    /// Add a UUID column
    pub fn uuid(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Uuid)
    }

    /// Add a string column
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut ColumnDefinition {
        let column_type = match length {
            Some(len) => ColumnType::Varchar(len),
            None => ColumnType::Text,
        };
        self.column(name, column_type)
    }

    /// Add an integer column
    pub fn integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::BigInteger)
    }

    /// Add a boolean column
    pub fn boolean(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Boolean)
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Timestamp)
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnDefinition {
        self.column(name, ColumnType::Json)
    }

    /// Add timestamp columns
    pub fn timestamps(&mut self) -> &mut Self {
        self.timestamp("created_at")
            .not_null()
            .default_value("CURRENT_TIMESTAMP");
        self.timestamp("updated_at")
            .not_null()
            .default_value("CURRENT_TIMESTAMP");
        self
    }

    /// Add a primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.table.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.table.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
        });
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.table
            .unique
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Finish the table definition
    pub fn build(self) -> TableDefinition {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder() {
        let mut builder = SchemaBuilder::new();
        builder.create_table("users", |table| {
            table.id("id");
            table.string("name", Some(255)).not_null();
            table.string("email", Some(255));
            table.timestamps();
            table.unique(&["email"]);
        });

        let ops = builder.into_operations();
        assert_eq!(ops.len(), 1);
        let SchemaOperation::CreateTable(table) = &ops[0] else {
            panic!("expected create table, got {:?}", ops[0]);
        };
        assert_eq!(table.name, "users");
        assert_eq!(table.columns.len(), 5);
        assert_eq!(table.columns[0].column_type, ColumnType::Serial);
        assert!(table.columns[0].primary_key);
        assert!(!table.columns[1].nullable);
        assert!(table.columns[2].nullable);
        assert_eq!(table.columns[3].name, "created_at");
        assert_eq!(table.unique, vec![vec!["email".to_string()]]);
    }

    #[test]
    fn test_table_builder() {
        let mut table = TableBuilder::new("posts");
        table.id("id");
        table.string("title", Some(255));
        table.string("content", None);
        table.integer("user_id");
        table.foreign_key("user_id", "users", "id");

        let table = table.build();
        assert_eq!(table.columns[2].column_type, ColumnType::Text);
        assert_eq!(table.foreign_keys[0].references_table, "users");
    }

    #[test]
    fn test_add_column_returns_column_for_chaining() {
        let mut builder = SchemaBuilder::new();
        builder
            .add_column("users", "email", ColumnType::Varchar(255))
            .not_null()
            .default_value("''");
        builder.create_unique_index("users", &["email"], None);

        let ops = builder.operations();
        let SchemaOperation::AddColumn { column, .. } = &ops[0] else {
            panic!("expected add column");
        };
        assert!(!column.nullable);
        assert_eq!(column.default.as_deref(), Some("''"));
        assert_eq!(
            ops[1],
            SchemaOperation::AddIndex(IndexDefinition::new("users", &["email"], true))
        );
    }
}
