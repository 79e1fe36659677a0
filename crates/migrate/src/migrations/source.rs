//! Migration sources
//!
//! A source yields authored migration definitions. The registry validates
//! whatever a source returns, so sources do no checking of their own.

use super::definitions::MigrationDefinition;
use crate::error::MigrateResult;

/// Something that can list migration definitions
pub trait MigrationSource: Send + Sync {
    /// All definitions this source knows about, in any order
    fn definitions(&self) -> MigrateResult<Vec<MigrationDefinition>>;
}

/// Migrations defined in code
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    definitions: Vec<MigrationDefinition>,
}

impl StaticSource {
    pub fn new(definitions: Vec<MigrationDefinition>) -> Self {
        Self { definitions }
    }

    /// Add a definition
    pub fn with(mut self, definition: MigrationDefinition) -> Self {
        self.definitions.push(definition);
        self
    }
}

impl MigrationSource for StaticSource {
    fn definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        Ok(self.definitions.clone())
    }
}

impl<S: MigrationSource + ?Sized> MigrationSource for Box<S> {
    fn definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        (**self).definitions()
    }
}
