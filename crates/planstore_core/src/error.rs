//! Error types for planstore_core operations.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Flavour of a [`StoreError::Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A record with the same identity already exists.
    Duplicate,
    /// The persisted version moved past the version the caller read.
    VersionMismatch,
    /// A relational constraint would be violated.
    Constraint,
    /// The record is in a state that does not allow the operation.
    State,
}

/// Flavour of a [`StoreError::Lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockErrorKind {
    /// The lock could not be acquired (manager disposed, poisoned state).
    Acquire,
    /// The handle no longer owns the lock it tries to release.
    Release,
    /// The lock was not granted within the requested timeout.
    Timeout,
    /// The caller already holds the key it is waiting for.
    Deadlock,
}

/// Flavour of a [`StoreError::Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// Filter references a field the index does not carry.
    Filter,
    /// Sort references a field the index does not carry.
    Sort,
    /// Limit or offset out of range.
    Pagination,
    /// Malformed query input.
    Syntax,
}

/// Index operation that failed in a [`StoreError::Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOperation {
    /// Adding an entry.
    Create,
    /// Updating an entry.
    Update,
    /// Removing an entry.
    Delete,
    /// Rewriting the whole index.
    Rebuild,
}

/// Phase of a multi-step transaction in a [`StoreError::Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPhase {
    /// Preparing the batch.
    Begin,
    /// Applying operations.
    Commit,
    /// Undoing applied operations.
    Rollback,
}

/// One failed item inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    /// Position of the operation in the batch.
    pub index: usize,
    /// Machine-readable code of the underlying error.
    pub code: String,
    /// Human-readable message of the underlying error.
    pub message: String,
}

macro_rules! kind_names {
    ($ty:ty { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $ty {
            /// Snake-case name used in messages and details.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),*
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

kind_names!(ConflictKind {
    Duplicate => "duplicate",
    VersionMismatch => "version_mismatch",
    Constraint => "constraint",
    State => "state",
});
kind_names!(LockErrorKind {
    Acquire => "acquire",
    Release => "release",
    Timeout => "timeout",
    Deadlock => "deadlock",
});
kind_names!(QueryErrorKind {
    Filter => "filter",
    Sort => "sort",
    Pagination => "pagination",
    Syntax => "syntax",
});
kind_names!(IndexOperation {
    Create => "create",
    Update => "update",
    Delete => "delete",
    Rebuild => "rebuild",
});
kind_names!(TransactionPhase {
    Begin => "begin",
    Commit => "commit",
    Rollback => "rollback",
});

/// Core error type for planstore_core operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of record (plan, requirement, link, version...).
        resource: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// Input rejected before touching storage.
    #[error("validation failed{}: {message}", field.as_ref().map(|f| format!(" on '{f}'")).unwrap_or_default())]
    Validation {
        /// Offending field, when one can be named.
        field: Option<String>,
        /// What was wrong.
        message: String,
    },

    /// Write refused because it would clobber or contradict stored state.
    #[error("conflict ({kind}): {message}")]
    Conflict {
        /// Conflict flavour.
        kind: ConflictKind,
        /// Description of the conflict.
        message: String,
        /// Version the caller expected, for version mismatches.
        expected: Option<u64>,
        /// Version found on disk, for version mismatches.
        actual: Option<u64>,
    },

    /// Lock manager failure.
    #[error("lock error ({kind}) on '{key}': {message}")]
    Lock {
        /// Lock failure flavour.
        kind: LockErrorKind,
        /// Resource key involved.
        key: String,
        /// Description of the failure.
        message: String,
        /// Timeout that elapsed, for timeouts.
        timeout_ms: Option<u64>,
    },

    /// Underlying I/O failure or on-disk corruption.
    #[error("storage error{}: {message}", path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    Storage {
        /// File involved, when known.
        path: Option<PathBuf>,
        /// Description of the failure.
        message: String,
    },

    /// Listing input rejected.
    #[error("query error ({kind}): {message}")]
    Query {
        /// Query failure flavour.
        kind: QueryErrorKind,
        /// Description of the failure.
        message: String,
    },

    /// Metadata index failure.
    #[error("index {operation} failed for '{index_type}': {message}")]
    Index {
        /// Operation that failed.
        operation: IndexOperation,
        /// Entity type of the index.
        index_type: String,
        /// Description of the failure.
        message: String,
    },

    /// A batch failed part-way; applied operations were rolled back.
    #[error("batch failed: {succeeded} succeeded, {failed} failed (rolled back: {rolled_back})")]
    BulkOperation {
        /// Operations applied before the failure.
        succeeded: usize,
        /// Operations that failed.
        failed: usize,
        /// Per-item failures.
        failures: Vec<BulkFailure>,
        /// Whether every applied effect was undone.
        rolled_back: bool,
    },

    /// Transaction machinery failure.
    #[error("transaction {phase} failed: {message}")]
    Transaction {
        /// Phase that failed.
        phase: TransactionPhase,
        /// Description of the failure.
        message: String,
    },

    /// On-disk format written by an unsupported schema version.
    #[error("cannot migrate {} from schema {from_version} to {to_version}", path.display())]
    Migration {
        /// File with the unsupported schema.
        path: PathBuf,
        /// Schema version found.
        from_version: u32,
        /// Schema version this build understands.
        to_version: u32,
    },

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Shorthand for [`StoreError::Validation`] on a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::Storage`] tied to a file.
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: Some(path.into()),
            message: message.into(),
        }
    }

    /// Version mismatch conflict.
    pub fn version_mismatch(what: &str, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            kind: ConflictKind::VersionMismatch,
            message: format!("{what} is at version {actual}, update was based on {expected}"),
            expected: Some(expected),
            actual: Some(actual),
        }
    }

    /// Conflict without version information.
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Conflict { kind, .. } => match kind {
                ConflictKind::Duplicate => "CONFLICT_DUPLICATE",
                ConflictKind::VersionMismatch => "CONFLICT_VERSION_MISMATCH",
                ConflictKind::Constraint => "CONFLICT_CONSTRAINT",
                ConflictKind::State => "CONFLICT_STATE",
            },
            Self::Lock { kind, .. } => match kind {
                LockErrorKind::Acquire => "LOCK_ACQUIRE",
                LockErrorKind::Release => "LOCK_RELEASE",
                LockErrorKind::Timeout => "LOCK_TIMEOUT",
                LockErrorKind::Deadlock => "LOCK_DEADLOCK",
            },
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Query { kind, .. } => match kind {
                QueryErrorKind::Filter => "QUERY_FILTER",
                QueryErrorKind::Sort => "QUERY_SORT",
                QueryErrorKind::Pagination => "QUERY_PAGINATION",
                QueryErrorKind::Syntax => "QUERY_SYNTAX",
            },
            Self::Index { operation, .. } => match operation {
                IndexOperation::Create => "INDEX_CREATE",
                IndexOperation::Update => "INDEX_UPDATE",
                IndexOperation::Delete => "INDEX_DELETE",
                IndexOperation::Rebuild => "INDEX_REBUILD",
            },
            Self::BulkOperation { .. } => "BULK_OPERATION_FAILED",
            Self::Transaction { phase, .. } => match phase {
                TransactionPhase::Begin => "TRANSACTION_BEGIN",
                TransactionPhase::Commit => "TRANSACTION_COMMIT",
                TransactionPhase::Rollback => "TRANSACTION_ROLLBACK",
            },
            Self::Migration { .. } => "MIGRATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Structured details for adapters to forward verbatim.
    pub fn details(&self) -> Value {
        match self {
            Self::NotFound { resource, id } => json!({ "resource": resource, "id": id }),
            Self::Validation { field, message } => json!({ "field": field, "message": message }),
            Self::Conflict {
                kind,
                expected,
                actual,
                ..
            } => json!({ "kind": kind, "expectedVersion": expected, "actualVersion": actual }),
            Self::Lock {
                kind,
                key,
                timeout_ms,
                ..
            } => json!({ "kind": kind, "key": key, "timeoutMs": timeout_ms }),
            Self::Storage { path, .. } => {
                json!({ "path": path.as_ref().map(|p| p.display().to_string()) })
            }
            Self::Query { kind, .. } => json!({ "kind": kind }),
            Self::Index {
                operation,
                index_type,
                ..
            } => json!({ "operation": operation, "indexType": index_type }),
            Self::BulkOperation {
                succeeded,
                failed,
                failures,
                rolled_back,
            } => json!({
                "succeeded": succeeded,
                "failed": failed,
                "failures": failures,
                "rolledBack": rolled_back,
            }),
            Self::Transaction { phase, .. } => json!({ "phase": phase }),
            Self::Migration {
                path,
                from_version,
                to_version,
            } => json!({
                "path": path.display().to_string(),
                "fromVersion": from_version,
                "toVersion": to_version,
            }),
            Self::Config(_) => Value::Null,
        }
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Conflict {
                kind: ConflictKind::VersionMismatch,
                ..
            } => Some("Re-read the record and re-apply the change on top of the current version."),
            Self::Lock {
                kind: LockErrorKind::Timeout,
                ..
            } => Some("Another writer holds this record; retry or raise locks.timeout_ms."),
            Self::Lock {
                kind: LockErrorKind::Deadlock,
                ..
            } => Some("Locks are not re-entrant; release the held key before acquiring it again."),
            Self::Storage { .. } => {
                Some("Run 'planstore verify' to locate corrupted files.")
            }
            Self::Index { .. } => Some("Run 'planstore rebuild <plan>' to regenerate the index."),
            Self::Migration { .. } => Some("Upgrade planstore to a build that understands this schema."),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            path: None,
            message: err.to_string(),
        }
    }
}

/// Convenience Result type for planstore_core operations.
pub type Result<T> = std::result::Result<T, StoreError>;
