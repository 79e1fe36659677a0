//! # landfill: schema migrations for SQL databases
//!
//! Keeps a database schema in step with an ordered set of migration units.
//! Each unit carries forward and backward operations; the engine records
//! which units are applied in a state table, plans the steps needed to reach
//! a target, and runs each step atomically with its state record.
//!
//! PostgreSQL, MySQL and SQLite are supported through sqlx.

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

// Re-export core traits and types
pub use backends::{connect, DatabaseBackend, DatabaseBackendType, SqlDialect};
pub use config::MigrationConfig;
pub use error::*;
pub use migrations::*;
