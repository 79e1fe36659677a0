//! Migrator - one invocation of the engine against one database
//!
//! Ties the registry, state store, lock, planner and executor together.
//! An apply run holds the migration lock from before history is read until
//! the last step finishes. A dry run takes no lock and writes nothing.

use std::collections::HashSet;

use super::definitions::{
    AppliedRecord, ExecutionMode, ExecutionReport, MigrationRequest, MigrationStatus,
    MigrationStatusEntry,
};
use super::executor::{DatabaseSink, DryRunSink, Executor};
use super::lock::MigrationLock;
use super::planner;
use super::registry::MigrationRegistry;
use super::source::MigrationSource;
use super::state::{SqlStateStore, StateStore};
use crate::backends::DatabaseBackend;
use crate::config::MigrationConfig;
use crate::error::MigrateResult;

/// Entry point for running migrations
pub struct Migrator {
    source: Box<dyn MigrationSource>,
    config: MigrationConfig,
}

impl Migrator {
    /// Create a migrator over `source`
    pub fn new(source: impl MigrationSource + 'static, config: MigrationConfig) -> Self {
        Self {
            source: Box::new(source),
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load and validate the registry from the source
    pub fn registry(&self) -> MigrateResult<MigrationRegistry> {
        MigrationRegistry::load(self.source.as_ref(), self.config.strict_reversibility)
    }

    fn state_store(&self, backend: &dyn DatabaseBackend) -> SqlStateStore {
        SqlStateStore::new(&self.config.migrations_table, backend.dialect())
    }

    /// Run `request` against `backend`.
    ///
    /// Registry, planning and locking problems are returned as errors before
    /// anything is executed. A failing step is reported in the returned
    /// report's `failure`, after the steps that completed before it.
    pub async fn run(
        &self,
        backend: &mut dyn DatabaseBackend,
        request: MigrationRequest,
    ) -> MigrateResult<ExecutionReport> {
        self.config.validate()?;
        let registry = self.registry()?;

        match request.mode {
            ExecutionMode::Apply => self.apply(backend, &registry, &request).await,
            ExecutionMode::DryRun => self.preview(backend, &registry, &request).await,
        }
    }

    async fn apply(
        &self,
        backend: &mut dyn DatabaseBackend,
        registry: &MigrationRegistry,
        request: &MigrationRequest,
    ) -> MigrateResult<ExecutionReport> {
        let lock = MigrationLock::acquire(
            &mut *backend,
            &self.config.migrations_table,
            self.config.lock_timeout(),
            self.config.lock_poll_interval(),
        )
        .await?;

        let outcome = self.apply_locked(&mut *backend, registry, request).await;

        if let Err(err) = lock.release(&mut *backend).await {
            tracing::warn!(error = %err, "Failed to release migration lock");
        }

        outcome
    }

    async fn apply_locked(
        &self,
        backend: &mut dyn DatabaseBackend,
        registry: &MigrationRegistry,
        request: &MigrationRequest,
    ) -> MigrateResult<ExecutionReport> {
        let store = self.state_store(backend);
        store.ensure_table(backend.as_executor()).await?;

        let applied = applied_names(store.current_applied(backend.as_executor()).await?);
        let plan = planner::plan(registry.migrations(), &applied, &request.target)?;

        let executor = Executor::new(backend.dialect());
        let mut sink = DatabaseSink::new(backend, &store);
        Ok(executor.execute(&plan, &mut sink).await)
    }

    async fn preview(
        &self,
        backend: &mut dyn DatabaseBackend,
        registry: &MigrationRegistry,
        request: &MigrationRequest,
    ) -> MigrateResult<ExecutionReport> {
        let store = self.state_store(backend);
        let applied = applied_names(self.read_applied(backend, &store).await?);
        let plan = planner::plan(registry.migrations(), &applied, &request.target)?;

        let mut sink = DryRunSink::new();
        Ok(Executor::new(backend.dialect()).execute(&plan, &mut sink).await)
    }

    /// Applied records, or none when the state table has not been created yet
    async fn read_applied(
        &self,
        backend: &mut dyn DatabaseBackend,
        store: &SqlStateStore,
    ) -> MigrateResult<Vec<AppliedRecord>> {
        if store.table_exists(backend.as_executor()).await? {
            store.current_applied(backend.as_executor()).await
        } else {
            Ok(Vec::new())
        }
    }

    /// Status of every known migration, followed by orphaned records
    pub async fn status(
        &self,
        backend: &mut dyn DatabaseBackend,
    ) -> MigrateResult<Vec<MigrationStatusEntry>> {
        self.config.validate()?;
        let registry = self.registry()?;
        let store = self.state_store(backend);
        let mut records = self.read_applied(backend, &store).await?;

        let mut entries = Vec::with_capacity(registry.len() + records.len());
        for migration in registry.migrations() {
            let status = match records.iter().position(|r| r.name == migration.name) {
                Some(index) => MigrationStatus::Applied {
                    applied_at: records.swap_remove(index).applied_at,
                },
                None => MigrationStatus::Pending,
            };
            entries.push(MigrationStatusEntry {
                name: migration.name.clone(),
                status,
            });
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(records.into_iter().map(|record| MigrationStatusEntry {
            name: record.name,
            status: MigrationStatus::Orphaned {
                applied_at: record.applied_at,
            },
        }));

        Ok(entries)
    }

    /// Clear a migration lock left behind by a crashed run
    pub async fn force_unlock(&self, backend: &mut dyn DatabaseBackend) -> MigrateResult<bool> {
        self.config.validate()?;
        let cleared = backend.force_unlock(&self.config.migrations_table).await?;
        if cleared {
            tracing::warn!(
                table = %self.config.migrations_table,
                "Cleared a stale migration lock"
            );
        }
        Ok(cleared)
    }
}

fn applied_names(records: Vec<AppliedRecord>) -> HashSet<String> {
    records.into_iter().map(|record| record.name).collect()
}
