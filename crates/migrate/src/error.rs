//! Error types for the migration engine
//!
//! Registry and planning errors are raised before any database mutation and
//! are always safe to retry once the cause is fixed. Execution errors stop the
//! run at the failing step; steps committed before it stay committed.

use std::time::Duration;
use thiserror::Error;

use crate::migrations::definitions::Direction;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two units share the same sort key
    #[error("Duplicate migration sort key: '{first}' and '{second}' collide")]
    DuplicateName { first: String, second: String },

    /// A unit is missing an operation set or has an unusable name
    #[error("Malformed migration '{name}': {reason}")]
    MalformedUnit { name: String, reason: String },

    /// The requested target is not a known unit
    #[error("Unknown migration '{0}'")]
    UnknownUnit(String),

    /// A revert was requested but nothing is applied
    #[error("Nothing to revert: no migrations are recorded as applied")]
    NothingToRevert,

    /// A directed target is already in the requested state
    #[error("Migration '{name}' is {state}")]
    AlreadyAtTarget { name: String, state: &'static str },

    /// The recorded history cannot be reconciled with the known units
    #[error("Inconsistent migration history at '{name}': {reason}")]
    InconsistentHistory { name: String, reason: String },

    /// A step's statement failed against the database
    #[error("Migration '{name}' ({direction}) failed executing `{statement}`: {message}")]
    OperationExecution {
        name: String,
        direction: Direction,
        statement: String,
        message: String,
    },

    /// Any other failure while rendering or running one step
    #[error("Migration '{name}' ({direction}): {source}")]
    Step {
        name: String,
        direction: Direction,
        source: Box<MigrationError>,
    },

    /// The state store already holds a record for this unit
    #[error("Migration '{0}' is already recorded as applied")]
    AlreadyApplied(String),

    /// The state store holds no record for this unit
    #[error("Migration '{0}' is not recorded as applied")]
    NotApplied(String),

    /// The dialect cannot express an operation
    #[error("Unsupported operation for {dialect}: {message}")]
    UnsupportedOperation { dialect: String, message: String },

    /// Another invocation holds the migration lock
    #[error("Timed out after {waited:?} waiting for migration lock '{key}'")]
    LockTimeout { key: String, waited: Duration },

    /// Connection or bookkeeping failure outside a step's own statements
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction control failure
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Migration file could not be parsed
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The engine phase an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    /// Loading and validating unit definitions
    Registry,
    /// Reconciling history, computing a plan and rendering it
    Planning,
    /// Acquiring or releasing cross-process exclusion
    Locking,
    /// Running steps or talking to the database
    Execution,
    /// Configuration and file handling
    Setup,
}

impl MigrationError {
    /// Create a malformed unit error
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUnit {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an inconsistent history error
    pub fn inconsistent(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentHistory {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(dialect: impl ToString, message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            dialect: dialect.to_string(),
            message: message.into(),
        }
    }

    /// Attach the failing step to this error, unless it already names it
    pub fn in_step(self, name: impl Into<String>, direction: Direction) -> Self {
        match self {
            Self::OperationExecution { .. } | Self::Step { .. } => self,
            other => Self::Step {
                name: name.into(),
                direction,
                source: Box::new(other),
            },
        }
    }

    /// Which phase of the engine produced this error
    pub fn phase(&self) -> ErrorPhase {
        match self {
            Self::DuplicateName { .. } | Self::MalformedUnit { .. } | Self::Parse { .. } => {
                ErrorPhase::Registry
            }
            Self::UnknownUnit(_)
            | Self::NothingToRevert
            | Self::InconsistentHistory { .. }
            | Self::AlreadyAtTarget { .. }
            | Self::UnsupportedOperation { .. } => ErrorPhase::Planning,
            Self::LockTimeout { .. } => ErrorPhase::Locking,
            Self::OperationExecution { .. }
            | Self::AlreadyApplied(_)
            | Self::NotApplied(_)
            | Self::Database(_)
            | Self::Transaction(_) => ErrorPhase::Execution,
            Self::Configuration(_) | Self::Io(_) => ErrorPhase::Setup,
            Self::Step { source, .. } => source.phase(),
        }
    }

    /// True when the error was raised before anything touched the database
    pub fn aborted_before_mutation(&self) -> bool {
        matches!(
            self.phase(),
            ErrorPhase::Registry | ErrorPhase::Planning | ErrorPhase::Locking | ErrorPhase::Setup
        )
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}

impl From<toml::de::Error> for MigrationError {
    fn from(err: toml::de::Error) -> Self {
        MigrationError::Configuration(err.to_string())
    }
}
