//! Executor - runs a plan step by step
//!
//! Statements are rendered for the whole plan first, so an operation the
//! dialect cannot express stops the run before anything executes. Each step
//! is then handed to an [`EffectSink`]: the database sink executes it inside
//! its own transaction, the dry-run sink only collects it. Both modes go
//! through this one code path, so a preview shows exactly what a real run
//! would execute.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use std::time::Instant;

use super::definitions::{
    CompletedStep, Direction, ExecutionMode, ExecutionReport, Plan, PlanStep, RenderedStatement,
};
use super::state::StateStore;
use crate::backends::{DatabaseBackend, DatabaseTransaction, SqlDialect, SqlExecutor};
use crate::error::{MigrateResult, MigrationError};

/// Where the effects of a step go
#[async_trait]
pub trait EffectSink: Send {
    fn mode(&self) -> ExecutionMode;

    /// Apply one step. On error the step must have had no lasting effect.
    async fn apply_step(
        &mut self,
        step: &PlanStep<'_>,
        statements: &[String],
        at: DateTime<Utc>,
    ) -> MigrateResult<()>;
}

/// Executes steps against the database, one transaction per step
pub struct DatabaseSink<'a> {
    backend: &'a mut dyn DatabaseBackend,
    store: &'a dyn StateStore,
}

impl<'a> DatabaseSink<'a> {
    pub fn new(backend: &'a mut dyn DatabaseBackend, store: &'a dyn StateStore) -> Self {
        Self { backend, store }
    }
}

#[async_trait]
impl<'a> EffectSink for DatabaseSink<'a> {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Apply
    }

    async fn apply_step(
        &mut self,
        step: &PlanStep<'_>,
        statements: &[String],
        at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        let mut tx = self.backend.begin().await?;

        for statement in statements {
            tracing::debug!(migration = step.name(), sql = %statement, "Executing statement");
            if let Err(err) = tx.execute_unprepared(statement).await {
                rollback_quietly(tx, step).await;
                return Err(MigrationError::OperationExecution {
                    name: step.name().to_string(),
                    direction: step.direction,
                    statement: statement.clone(),
                    message: driver_message(err),
                });
            }
        }

        let recorded = match step.direction {
            Direction::Forward => {
                self.store
                    .record_applied(tx.as_executor(), step.name(), at)
                    .await
            }
            Direction::Backward => self.store.record_reverted(tx.as_executor(), step.name()).await,
        };

        if let Err(err) = recorded {
            rollback_quietly(tx, step).await;
            return Err(err);
        }

        tx.commit().await
    }
}

async fn rollback_quietly(tx: Box<dyn DatabaseTransaction + '_>, step: &PlanStep<'_>) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(
            migration = step.name(),
            error = %err,
            "Rollback failed; the connection will discard the transaction"
        );
    }
}

fn driver_message(err: MigrationError) -> String {
    match err {
        MigrationError::Database(message) => message,
        other => other.to_string(),
    }
}

/// Collects rendered statements without touching the database
#[derive(Debug, Default)]
pub struct DryRunSink {
    steps: usize,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps previewed so far
    pub fn steps(&self) -> usize {
        self.steps
    }
}

#[async_trait]
impl EffectSink for DryRunSink {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::DryRun
    }

    async fn apply_step(
        &mut self,
        step: &PlanStep<'_>,
        statements: &[String],
        _at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        tracing::debug!(
            migration = step.name(),
            direction = %step.direction,
            statements = statements.len(),
            "Previewed migration step"
        );
        self.steps += 1;
        Ok(())
    }
}

/// Runs plans through a sink
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    dialect: SqlDialect,
}

impl Executor {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Execute `plan`, stopping at the first failing step.
    ///
    /// Steps completed before the failure stay completed; the failure is
    /// returned inside the report.
    pub async fn execute(&self, plan: &Plan<'_>, sink: &mut dyn EffectSink) -> ExecutionReport {
        let start_time = Instant::now();
        let mode = sink.mode();

        let mut report = ExecutionReport {
            mode,
            completed: Vec::new(),
            statements: Vec::new(),
            failure: None,
            execution_time_ms: 0,
        };

        let rendered = match self.render(plan) {
            Ok(rendered) => rendered,
            Err(err) => {
                report.failure = Some(err);
                report.execution_time_ms = start_time.elapsed().as_millis();
                return report;
            }
        };

        if mode == ExecutionMode::Apply && !plan.is_empty() && !self.dialect.supports_transactional_ddl() {
            tracing::warn!(
                dialect = %self.dialect,
                "DDL is not transactional on this database; a failed step may leave partial changes"
            );
        }

        let mut last_at: Option<DateTime<Utc>> = None;

        for (step, statements) in plan.steps.iter().zip(rendered) {
            let at = next_timestamp(last_at);

            match sink.apply_step(step, &statements, at).await {
                Ok(()) => {
                    last_at = Some(at);
                    if mode == ExecutionMode::Apply {
                        let action = match step.direction {
                            Direction::Forward => "Applied",
                            Direction::Backward => "Reverted",
                        };
                        tracing::info!(migration = step.name(), "{} migration", action);
                    }
                    report.statements.extend(statements.into_iter().map(|sql| RenderedStatement {
                        migration: step.name().to_string(),
                        direction: step.direction,
                        sql,
                    }));
                    report.completed.push(CompletedStep {
                        name: step.name().to_string(),
                        direction: step.direction,
                    });
                }
                Err(err) => {
                    let err = err.in_step(step.name(), step.direction);
                    tracing::error!(
                        migration = step.name(),
                        direction = %step.direction,
                        error = %err,
                        "Migration step failed"
                    );
                    report.failure = Some(err);
                    break;
                }
            }
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        report
    }

    fn render(&self, plan: &Plan<'_>) -> MigrateResult<Vec<Vec<String>>> {
        plan.steps
            .iter()
            .map(|step| {
                self.dialect
                    .render_all(step.operations())
                    .map_err(|err| err.in_step(step.name(), step.direction))
            })
            .collect()
    }
}

/// Current time at the databases' microsecond precision, strictly after `previous`
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(prev) if now <= prev => prev + ChronoDuration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::definitions::{Migration, MigrationDefinition, Target};
    use crate::migrations::planner;
    use crate::migrations::registry::MigrationRegistry;
    use std::collections::HashSet;

    fn units() -> Vec<Migration> {
        let definitions = vec![
            MigrationDefinition::new("0001_users")
                .up(|s| {
                    s.create_table("users", |t| {
                        t.id("id");
                    });
                })
                .down(|s| {
                    s.drop_table("users");
                }),
            MigrationDefinition::new("0002_email")
                .up(|s| {
                    s.add_not_null("users", "email");
                })
                .down(|s| {
                    s.drop_not_null("users", "email");
                }),
        ];
        MigrationRegistry::from_definitions(definitions, false)
            .unwrap()
            .migrations()
            .to_vec()
    }

    /// Fails on the named step
    struct FailingSink {
        fail_on: &'static str,
        seen: Vec<String>,
    }

    #[async_trait]
    impl EffectSink for FailingSink {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Apply
        }

        async fn apply_step(
            &mut self,
            step: &PlanStep<'_>,
            _statements: &[String],
            _at: DateTime<Utc>,
        ) -> MigrateResult<()> {
            self.seen.push(step.name().to_string());
            if step.name() == self.fail_on {
                return Err(MigrationError::Database("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dry_run_collects_all_statements() {
        let units = units();
        let plan = planner::plan(&units, &HashSet::new(), &Target::Latest).unwrap();
        let mut sink = DryRunSink::new();
        let report = Executor::new(SqlDialect::PostgreSQL).execute(&plan, &mut sink).await;

        assert!(report.is_success());
        assert_eq!(report.mode, ExecutionMode::DryRun);
        assert_eq!(sink.steps(), 2);
        assert_eq!(report.completed_names(), vec!["0001_users", "0002_email"]);
        assert_eq!(report.statements.len(), 2);
        assert_eq!(
            report.statements[1].sql,
            "ALTER TABLE \"users\" ALTER COLUMN \"email\" SET NOT NULL"
        );
    }

    #[tokio::test]
    async fn test_render_failure_stops_before_any_step() {
        let units = units();
        let plan = planner::plan(&units, &HashSet::new(), &Target::Latest).unwrap();
        let mut sink = FailingSink {
            fail_on: "none",
            seen: Vec::new(),
        };
        let report = Executor::new(SqlDialect::SQLite).execute(&plan, &mut sink).await;

        match &report.failure {
            Some(MigrationError::Step { name, direction, source }) => {
                assert_eq!(name, "0002_email");
                assert_eq!(*direction, Direction::Forward);
                assert!(matches!(**source, MigrationError::UnsupportedOperation { .. }));
            }
            other => panic!("expected a step-scoped render error, got {:?}", other),
        }
        assert!(report.failure.as_ref().unwrap().aborted_before_mutation());
        assert!(sink.seen.is_empty());
        assert!(report.completed.is_empty());
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let units = units();
        let plan = planner::plan(&units, &HashSet::new(), &Target::Latest).unwrap();
        let mut sink = FailingSink {
            fail_on: "0001_users",
            seen: Vec::new(),
        };
        let report = Executor::new(SqlDialect::PostgreSQL).execute(&plan, &mut sink).await;

        assert_eq!(sink.seen, vec!["0001_users"]);
        assert!(report.completed.is_empty());
        assert!(report.statements.is_empty());
        assert!(matches!(
            report.failure,
            Some(MigrationError::Step { ref name, direction: Direction::Forward, .. }) if name == "0001_users"
        ));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let first = next_timestamp(None);
        let far_future = first + ChronoDuration::hours(1);
        let second = next_timestamp(Some(far_future));
        assert_eq!(second, far_future + ChronoDuration::microseconds(1));
        assert!(next_timestamp(Some(second)) > second);
        assert_eq!(first.timestamp_subsec_nanos() % 1_000, 0);
    }
}
