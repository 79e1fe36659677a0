//! Migration Manager - File system operations for migrations
//!
//! Handles creating, loading, and parsing migration files from the filesystem.
//! A migration file is named `<sort key>_<label>.sql` and holds an up section
//! and a down section, each introduced by a marker comment:
//!
//! ```sql
//! -- Up migration
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- Down migration
//! DROP TABLE users;
//! ```

use chrono::Utc;
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::fs;
use std::path::{Path, PathBuf};

use super::definitions::MigrationDefinition;
use super::operations::SchemaOperation;
use super::source::MigrationSource;
use crate::config::MigrationConfig;
use crate::error::{MigrateResult, MigrationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Migration manager for creating and loading migration files
#[derive(Debug, Clone)]
pub struct MigrationManager {
    migrations_dir: PathBuf,
}

/// Directory-backed migration source
pub type DirectorySource = MigrationManager;

impl MigrationManager {
    /// Create a manager over `migrations_dir`
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Create a manager from configuration
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(&config.migrations_dir)
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Create a new migration file and return its path
    pub async fn create_migration(&self, label: &str) -> MigrateResult<PathBuf> {
        let label = sanitize_label(label);
        if label.is_empty() {
            return Err(MigrationError::Configuration(
                "Migration label must contain at least one letter or digit".to_string(),
            ));
        }

        fs::create_dir_all(&self.migrations_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let name = format!("{}_{}", timestamp, label);
        let filepath = self.migrations_dir.join(format!("{}.sql", name));

        if filepath.exists() {
            return Err(MigrationError::Configuration(format!(
                "Migration file already exists: {}",
                filepath.display()
            )));
        }

        fs::write(&filepath, migration_template(&name))?;
        tracing::info!(path = %filepath.display(), "Created migration file");

        Ok(filepath)
    }

    /// Load all migration files from the migrations directory
    pub fn load_migrations(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        if !self.migrations_dir.exists() {
            tracing::debug!(dir = %self.migrations_dir.display(), "Migrations directory does not exist");
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.migrations_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| self.parse_migration_file(path)).collect()
    }

    /// Parse a migration file into a definition
    fn parse_migration_file(&self, path: &Path) -> MigrateResult<MigrationDefinition> {
        let content = fs::read_to_string(path)?;

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrationError::Parse {
                file: path.display().to_string(),
                message: "Invalid migration filename".to_string(),
            })?;

        let (up_sql, down_sql) = parse_migration_content(&content);

        let mut definition = MigrationDefinition::new(name);
        if let Some(sql) = up_sql {
            definition = definition.with_forward(raw_operations(&sql));
        }
        if let Some(sql) = down_sql {
            definition = definition.with_backward(raw_operations(&sql));
        }

        Ok(definition)
    }
}

impl MigrationSource for MigrationManager {
    fn definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        self.load_migrations()
    }
}

fn section_marker(line: &str) -> Option<Section> {
    let comment = line.trim().strip_prefix("--")?.trim().to_lowercase();
    match comment.as_str() {
        "up" | "up migration" | "+up" => Some(Section::Up),
        "down" | "down migration" | "+down" => Some(Section::Down),
        _ => None,
    }
}

/// Split file content into up and down SQL.
///
/// A section whose marker never appears is `None`; a marker followed by no
/// statements yields an empty string.
fn parse_migration_content(content: &str) -> (Option<String>, Option<String>) {
    let mut up_sql: Option<Vec<&str>> = None;
    let mut down_sql: Option<Vec<&str>> = None;
    let mut current = Section::Preamble;

    for line in content.lines() {
        if let Some(section) = section_marker(line) {
            current = section;
            match section {
                Section::Up => {
                    up_sql.get_or_insert_with(Vec::new);
                }
                Section::Down => {
                    down_sql.get_or_insert_with(Vec::new);
                }
                Section::Preamble => {}
            }
            continue;
        }

        // Skip comment lines and empty lines
        if line.trim().is_empty() || line.trim().starts_with("--") {
            continue;
        }

        match current {
            Section::Up => up_sql.get_or_insert_with(Vec::new).push(line),
            Section::Down => down_sql.get_or_insert_with(Vec::new).push(line),
            Section::Preamble => {}
        }
    }

    let join = |lines: Vec<&str>| lines.join("\n").trim().to_string();
    (up_sql.map(join), down_sql.map(join))
}

fn raw_operations(sql: &str) -> Vec<SchemaOperation> {
    split_sql_statements(sql)
        .into_iter()
        .map(SchemaOperation::Raw)
        .collect()
}

/// Split SQL text into statements without rewriting them.
///
/// Statement boundaries come from the SQL tokenizer, so semicolons inside
/// string literals and quoted identifiers are not treated as separators.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    match tokenized_statements(sql) {
        Some(statements) => statements,
        None => {
            tracing::warn!("SQL tokenizing failed, using naive semicolon splitting");
            sql.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

fn tokenized_statements(sql: &str) -> Option<Vec<String>> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize_with_location().ok()?;

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;

    for token in tokens {
        match token.token {
            Token::SemiColon => {
                let line = usize::try_from(token.location.line).ok()?.checked_sub(1)?;
                let column = usize::try_from(token.location.column).ok()?.checked_sub(1)?;
                let line_start = *line_starts.get(line)?;
                let (offset, _) = sql[line_start..].char_indices().nth(column)?;
                let end = line_start + offset;
                if !sql[end..].starts_with(';') {
                    return None;
                }
                if has_content {
                    statements.push(sql[start..end].trim().to_string());
                }
                start = end + 1;
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_content = true,
        }
    }

    if has_content {
        statements.push(sql[start..].trim().to_string());
    }

    Some(statements)
}

fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if (c == '_' || c == '-' || c.is_whitespace()) && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn migration_template(name: &str) -> String {
    format!(
        "-- Migration: {}\n\
         -- Created: {}\n\n\
         -- Up migration\n\n\n\
         -- Down migration\n\n",
        name,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
