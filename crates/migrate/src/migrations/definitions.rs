//! Migration Definitions - Core types shared by the registry, planner and executor
//!
//! Defines authored and validated migration units, applied records, plan steps
//! and the reports produced by running a plan.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::operations::SchemaOperation;
use super::schema_builder::SchemaBuilder;

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run forward operations)
    Forward,
    /// Revert the migration (run backward operations)
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// Total-order key derived from the numeric prefix of a migration name.
///
/// `0003_add_index` sorts as `[3]`, `20240101_120000_add_index` as
/// `[20240101, 120000]`. Segments compare numerically, so `2_x` < `10_x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortKey(Vec<u64>);

impl SortKey {
    /// Split a name into its sort key and label.
    ///
    /// Returns `None` when the name has no numeric prefix or no label.
    pub fn parse(name: &str) -> Option<(SortKey, String)> {
        let mut segments = Vec::new();
        let mut rest = name;

        while let Some((segment, tail)) = rest.split_once('_') {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                break;
            }
            segments.push(segment.parse::<u64>().ok()?);
            rest = tail;
        }

        if segments.is_empty() || rest.is_empty() {
            return None;
        }

        Some((SortKey(segments), rest.to_string()))
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("_"))
    }
}

/// An authored migration unit, before registry validation.
///
/// Both operation sets are optional here so that omission can be reported;
/// the registry refuses a definition missing either one.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationDefinition {
    pub name: String,
    pub forward: Option<Vec<SchemaOperation>>,
    pub backward: Option<Vec<SchemaOperation>>,
}

impl MigrationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forward: None,
            backward: None,
        }
    }

    /// Define the forward operations with the schema builder
    pub fn up<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut schema = SchemaBuilder::new();
        build(&mut schema);
        self.forward = Some(schema.into_operations());
        self
    }

    /// Define the backward operations with the schema builder.
    ///
    /// An empty closure is an explicit no-op undo.
    pub fn down<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut schema = SchemaBuilder::new();
        build(&mut schema);
        self.backward = Some(schema.into_operations());
        self
    }

    pub fn with_forward(mut self, operations: Vec<SchemaOperation>) -> Self {
        self.forward = Some(operations);
        self
    }

    pub fn with_backward(mut self, operations: Vec<SchemaOperation>) -> Self {
        self.backward = Some(operations);
        self
    }
}

/// A validated migration unit. Read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Unique identifier, e.g. `0002_add_users`
    pub name: String,
    /// Order key parsed from the name's numeric prefix
    pub sort_key: SortKey,
    /// Human-readable part of the name
    pub label: String,
    /// Operations that move the schema ahead by this unit
    pub forward: Vec<SchemaOperation>,
    /// Operations that undo `forward`
    pub backward: Vec<SchemaOperation>,
}

impl Migration {
    /// Operations to run for the given direction
    pub fn operations(&self, direction: Direction) -> &[SchemaOperation] {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }
}

/// Migration status row in the state table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRecord {
    /// Name of the applied unit
    pub name: String,
    /// When the forward operations were committed
    pub applied_at: DateTime<Utc>,
}

/// What state a run should move the database to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Apply every unit not yet applied, in registry order
    Latest,
    /// Revert the applied unit with the greatest sort key
    RevertLast,
    /// Revert every applied unit, newest first
    RevertAll,
    /// Apply through the named unit, or revert back through it if applied
    To(String),
    /// Apply through the named unit; fails if it is already applied
    ApplyTo(String),
    /// Revert back through the named unit; fails if it is not applied
    RevertTo(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Latest => write!(f, "latest"),
            Target::RevertLast => write!(f, "revert last"),
            Target::RevertAll => write!(f, "revert all"),
            Target::To(name) => write!(f, "{}", name),
            Target::ApplyTo(name) => write!(f, "apply through {}", name),
            Target::RevertTo(name) => write!(f, "revert through {}", name),
        }
    }
}

/// Whether a run touches the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Execute statements and record state
    Apply,
    /// Render statements only
    DryRun,
}

/// A request against the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub target: Target,
    pub mode: ExecutionMode,
}

impl MigrationRequest {
    pub fn latest() -> Self {
        Self::new(Target::Latest)
    }

    pub fn revert_last() -> Self {
        Self::new(Target::RevertLast)
    }

    pub fn to(name: impl Into<String>) -> Self {
        Self::new(Target::To(name.into()))
    }

    pub fn new(target: Target) -> Self {
        Self {
            target,
            mode: ExecutionMode::Apply,
        }
    }

    /// Render without executing or recording anything
    pub fn dry_run(mut self) -> Self {
        self.mode = ExecutionMode::DryRun;
        self
    }
}

/// One unit of work in a plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanStep<'a> {
    pub migration: &'a Migration,
    pub direction: Direction,
}

impl<'a> PlanStep<'a> {
    pub fn forward(migration: &'a Migration) -> Self {
        Self {
            migration,
            direction: Direction::Forward,
        }
    }

    pub fn backward(migration: &'a Migration) -> Self {
        Self {
            migration,
            direction: Direction::Backward,
        }
    }

    pub fn name(&self) -> &'a str {
        &self.migration.name
    }

    pub fn operations(&self) -> &'a [SchemaOperation] {
        self.migration.operations(self.direction)
    }
}

/// Ordered steps that move the database to a target
#[derive(Debug, Clone, PartialEq)]
pub struct Plan<'a> {
    pub target: Target,
    pub steps: Vec<PlanStep<'a>>,
}

impl<'a> Plan<'a> {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `(name, direction)` pairs in execution order
    pub fn summary(&self) -> Vec<(&'a str, Direction)> {
        self.steps.iter().map(|s| (s.name(), s.direction)).collect()
    }
}

/// A step that finished successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStep {
    pub name: String,
    pub direction: Direction,
}

/// A statement rendered for a step, executed or previewed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedStatement {
    pub migration: String,
    pub direction: Direction,
    pub sql: String,
}

/// Result of executing a plan
#[derive(Debug)]
pub struct ExecutionReport {
    /// Whether statements were executed or only rendered
    pub mode: ExecutionMode,
    /// Steps that committed (apply) or were rendered in full (dry run)
    pub completed: Vec<CompletedStep>,
    /// Statements in the order they were handed to the database or the preview log
    pub statements: Vec<RenderedStatement>,
    /// The error that stopped the run, if any
    pub failure: Option<crate::error::MigrationError>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Names of completed steps, in order
    pub fn completed_names(&self) -> Vec<&str> {
        self.completed.iter().map(|s| s.name.as_str()).collect()
    }

    /// Turn a recorded failure into an error
    pub fn into_result(self) -> crate::error::MigrateResult<Self> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
    /// Recorded as applied but no longer defined
    Orphaned {
        applied_at: DateTime<Utc>,
    },
}

/// Status of one migration, as reported by `Migrator::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatusEntry {
    pub name: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_sequence_prefix() {
        let (key, label) = SortKey::parse("0003_add_index").unwrap();
        assert_eq!(key.segments(), &[3]);
        assert_eq!(label, "add_index");
    }

    #[test]
    fn test_sort_key_timestamp_prefix() {
        let (key, label) = SortKey::parse("20240101_120000_create_users").unwrap();
        assert_eq!(key.segments(), &[20240101, 120000]);
        assert_eq!(label, "create_users");
    }

    #[test]
    fn test_sort_key_orders_numerically() {
        let (two, _) = SortKey::parse("2_b").unwrap();
        let (ten, _) = SortKey::parse("10_a").unwrap();
        assert!(two < ten);

        let (same_day_early, _) = SortKey::parse("20240101_090000_a").unwrap();
        let (same_day_late, _) = SortKey::parse("20240101_120000_a").unwrap();
        assert!(same_day_early < same_day_late);
    }

    #[test]
    fn test_sort_key_rejects_bad_names() {
        assert!(SortKey::parse("init").is_none());
        assert!(SortKey::parse("001").is_none());
        assert!(SortKey::parse("001_").is_none());
        assert!(SortKey::parse("v1_init").is_none());
    }

    #[test]
    fn test_leading_zeros_collide() {
        let (a, _) = SortKey::parse("001_init").unwrap();
        let (b, _) = SortKey::parse("1_init").unwrap();
        assert_eq!(a, b);
    }
}
