use async_trait::async_trait;

use crate::{Result, StoreError};

/// The capability used to issue statements within the active unit of work.
///
/// A handle is either inside a transaction (obtained from
/// [`TransactionalStore::begin`]) or ambient (bound to the default pool,
/// auto-committing each statement). Handles are exclusive to one request and
/// must not be shared across concurrent requests.
#[async_trait]
pub trait StoreHandle: Send {
    /// Returns true if this handle has an open transaction.
    fn in_transaction(&self) -> bool;

    /// Creates a named savepoint inside the open transaction.
    async fn create_savepoint(&mut self, name: &str) -> Result<()>;

    /// Undoes everything since the named savepoint. The savepoint stays valid.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    /// Forgets the named savepoint, keeping its writes in the transaction.
    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    /// Commits the transaction. A no-op on an ambient handle.
    async fn commit(self) -> Result<()>;

    /// Rolls the transaction back. A no-op on an ambient handle.
    async fn rollback(self) -> Result<()>;
}

/// A relational store that can open transactions.
///
/// Implementations must be cheap to clone; clones share the same pool.
#[async_trait]
pub trait TransactionalStore: Clone + Send + Sync + 'static {
    type Handle: StoreHandle + 'static;

    /// Begins a new top-level transaction.
    async fn begin(&self) -> Result<Self::Handle>;

    /// Returns a handle bound to the default pool, outside any transaction.
    fn ambient(&self) -> Self::Handle;
}

/// Checks that a savepoint name is a plain SQL identifier.
pub fn validate_savepoint_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSavepointName(name.to_string()))
    }
}
