//! Migration System
//!
//! Units, registry, state store, planner and executor, plus the migrator
//! facade that runs them together.

pub mod definitions;
pub mod executor;
pub mod lock;
pub mod manager;
pub mod migrator;
pub mod operations;
pub mod planner;
pub mod registry;
pub mod schema_builder;
pub mod source;
pub mod state;

pub use definitions::*;
pub use executor::{DatabaseSink, DryRunSink, EffectSink, Executor};
pub use lock::MigrationLock;
pub use manager::{split_sql_statements, DirectorySource, MigrationManager};
pub use migrator::Migrator;
pub use operations::*;
pub use planner::plan;
pub use registry::MigrationRegistry;
pub use schema_builder::{SchemaBuilder, TableBuilder};
pub use source::{MigrationSource, StaticSource};
pub use state::{SqlStateStore, StateStore};
