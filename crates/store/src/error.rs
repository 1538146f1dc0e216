use thiserror::Error;

/// Errors that can occur when talking to the relational store.
///
/// Transaction-control failures carry their own variants so that callers can
/// tell "the unit of work failed" apart from "the store failed to apply or
/// undo it" without inspecting messages.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A new transaction could not be started.
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// The transaction could not be committed; none of its writes are visible.
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// The transaction could not be rolled back.
    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    #[error("failed to create savepoint {name}: {source}")]
    Savepoint {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to roll back to savepoint {name}: {source}")]
    RollbackToSavepoint {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to release savepoint {name}: {source}")]
    ReleaseSavepoint {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// The named savepoint does not exist in the current transaction.
    #[error("unknown savepoint: {0}")]
    UnknownSavepoint(String),

    /// Savepoint names are interpolated into SQL and must be plain identifiers.
    #[error("invalid savepoint name: {0:?}")]
    InvalidSavepointName(String),

    /// Another transaction committed a change to data this one read or wrote;
    /// nothing was applied.
    #[error("transaction conflicts with a concurrent commit on {0}")]
    Conflict(String),

    /// A savepoint operation was issued on a handle outside a transaction.
    #[error("no active transaction on this handle")]
    NoActiveTransaction,

    /// A statement failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error came from transaction control rather than
    /// from a statement issued by the unit of work.
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            StoreError::Begin(_)
                | StoreError::Commit(_)
                | StoreError::Conflict(_)
                | StoreError::Rollback(_)
                | StoreError::Savepoint { .. }
                | StoreError::RollbackToSavepoint { .. }
                | StoreError::ReleaseSavepoint { .. }
                | StoreError::UnknownSavepoint(_)
                | StoreError::NoActiveTransaction
        )
    }

    /// Returns true if the transaction lost a race with a concurrent one and
    /// may succeed when retried: an optimistic conflict, or PostgreSQL's
    /// serialization failure and deadlock codes.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(err) | StoreError::Commit(err) => err
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| code == "40001" || code == "40P01"),
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
