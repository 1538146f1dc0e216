//! Atomic, nestable units of work.

use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::{
    StoreError,
    store::{StoreHandle, TransactionalStore},
};

/// Runs caller-supplied units of work atomically against a store.
///
/// The carrier of the current unit of work is passed explicitly as
/// `scope: Option<&mut Handle>`. With no scope (or an ambient handle) a new
/// transaction is opened and committed or rolled back around the unit of
/// work. With a transactional scope the unit of work runs on the same handle
/// inside a fresh savepoint, so composed operations never open a second
/// top-level transaction.
///
/// No locking happens here: correctness rests on the store's transaction and
/// savepoint semantics.
pub struct TransactionManager<S: TransactionalStore> {
    store: S,
    savepoint_seq: Arc<AtomicU64>,
}

impl<S: TransactionalStore> Clone for TransactionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            savepoint_seq: self.savepoint_seq.clone(),
        }
    }
}

impl<S: TransactionalStore> TransactionManager<S> {
    /// Creates a transaction manager over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            savepoint_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Executes `work` atomically and returns its result.
    ///
    /// Top-level: commits on `Ok`; a commit failure is returned as
    /// [`StoreError::Commit`], or [`StoreError::Conflict`] when a concurrent
    /// transaction won the race, and the result is discarded. On `Err` or panic
    /// the transaction is rolled back and the error is returned, or the panic
    /// resumed, unchanged.
    ///
    /// Nested: releases the savepoint on `Ok`; on `Err` or panic rolls back to
    /// the savepoint only and propagates. The enclosing unit of work decides
    /// whether to fail as well.
    ///
    /// Rollback failures are logged and never replace the original error.
    pub async fn run_in_transaction<T, E, F>(
        &self,
        scope: Option<&mut S::Handle>,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'h> FnOnce(&'h mut S::Handle) -> BoxFuture<'h, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        match scope {
            Some(handle) if handle.in_transaction() => self.run_nested(handle, work).await,
            _ => self.run_top_level(work).await,
        }
    }

    /// Like [`run_in_transaction`](Self::run_in_transaction) for units of work
    /// that produce no value.
    pub async fn run_without_result<E, F>(
        &self,
        scope: Option<&mut S::Handle>,
        work: F,
    ) -> Result<(), E>
    where
        F: for<'h> FnOnce(&'h mut S::Handle) -> BoxFuture<'h, Result<(), E>> + Send,
        E: From<StoreError> + Send,
    {
        self.run_in_transaction(scope, work).await
    }

    /// Returns the handle statements should be issued against.
    ///
    /// This is the scope's handle when there is one, otherwise an ambient
    /// handle on the store's default pool. It is never absent.
    pub fn current_handle<'a>(
        &self,
        scope: Option<&'a mut S::Handle>,
    ) -> CurrentHandle<'a, S::Handle> {
        match scope {
            Some(handle) => CurrentHandle::Scoped(handle),
            None => CurrentHandle::Ambient(self.store.ambient()),
        }
    }

    async fn run_top_level<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'h> FnOnce(&'h mut S::Handle) -> BoxFuture<'h, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut handle = self.store.begin().await?;
        tracing::debug!("transaction started");

        let outcome = AssertUnwindSafe(work(&mut handle)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => match handle.commit().await {
                Ok(()) => {
                    metrics::counter!("transactions_committed_total").increment(1);
                    tracing::debug!("transaction committed");
                    Ok(value)
                }
                Err(err) if err.is_conflict() => {
                    metrics::counter!("transaction_conflicts_total").increment(1);
                    tracing::warn!(error = %err, "transaction lost a race with a concurrent commit");
                    Err(err.into())
                }
                Err(err) => {
                    metrics::counter!("transaction_commit_failures_total").increment(1);
                    tracing::error!(error = %err, "transaction commit failed");
                    Err(err.into())
                }
            },
            Ok(Err(err)) => {
                Self::rollback_quietly(handle).await;
                Err(err)
            }
            Err(panic) => {
                tracing::error!("unit of work panicked, rolling back");
                Self::rollback_quietly(handle).await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn run_nested<T, E, F>(&self, handle: &mut S::Handle, work: F) -> Result<T, E>
    where
        F: for<'h> FnOnce(&'h mut S::Handle) -> BoxFuture<'h, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let savepoint = self.next_savepoint_name();
        handle.create_savepoint(&savepoint).await?;
        tracing::debug!(%savepoint, "savepoint created");

        let outcome = AssertUnwindSafe(work(&mut *handle)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                handle.release_savepoint(&savepoint).await?;
                metrics::counter!("savepoints_released_total").increment(1);
                Ok(value)
            }
            Ok(Err(err)) => {
                Self::rollback_to_savepoint_quietly(handle, &savepoint).await;
                Err(err)
            }
            Err(panic) => {
                tracing::error!(%savepoint, "nested unit of work panicked, rolling back to savepoint");
                Self::rollback_to_savepoint_quietly(handle, &savepoint).await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn rollback_quietly(handle: S::Handle) {
        metrics::counter!("transactions_rolled_back_total").increment(1);
        match handle.rollback().await {
            Ok(()) => tracing::debug!("transaction rolled back"),
            Err(err) => tracing::warn!(error = %err, "transaction rollback failed"),
        }
    }

    async fn rollback_to_savepoint_quietly(handle: &mut S::Handle, savepoint: &str) {
        metrics::counter!("savepoints_rolled_back_total").increment(1);
        match handle.rollback_to_savepoint(savepoint).await {
            Ok(()) => tracing::debug!(%savepoint, "rolled back to savepoint"),
            Err(err) => tracing::warn!(%savepoint, error = %err, "rollback to savepoint failed"),
        }
    }

    /// Unique per manager via the counter, and across managers sharing a
    /// connection via the timestamp.
    fn next_savepoint_name(&self) -> String {
        let seq = self.savepoint_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("sp_{seq}_{nanos}")
    }
}

/// The handle returned by [`TransactionManager::current_handle`].
pub enum CurrentHandle<'a, H> {
    /// The caller's active handle.
    Scoped(&'a mut H),
    /// A fresh handle on the default pool.
    Ambient(H),
}

impl<H> CurrentHandle<'_, H> {
    pub fn is_ambient(&self) -> bool {
        matches!(self, CurrentHandle::Ambient(_))
    }
}

impl<H> Deref for CurrentHandle<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        match self {
            CurrentHandle::Scoped(handle) => handle,
            CurrentHandle::Ambient(handle) => handle,
        }
    }
}

impl<H> DerefMut for CurrentHandle<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        match self {
            CurrentHandle::Scoped(handle) => handle,
            CurrentHandle::Ambient(handle) => handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryHandle, MemoryStore};
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Business(&'static str),
        Store(String),
    }

    impl From<StoreError> for TestError {
        fn from(err: StoreError) -> Self {
            TestError::Store(err.to_string())
        }
    }

    fn manager() -> (MemoryStore, TransactionManager<MemoryStore>) {
        let store = MemoryStore::new();
        (store.clone(), TransactionManager::new(store))
    }

    async fn insert_note(handle: &mut MemoryHandle, text: &str) -> Result<i64, TestError> {
        Ok(handle.insert("notes", &json!({ "text": text })).await?)
    }

    #[tokio::test]
    async fn commits_on_success() {
        let (store, tm) = manager();

        let id = tm
            .run_in_transaction(None, |tx| {
                Box::pin(async move { insert_note(tx, "kept").await })
            })
            .await
            .unwrap();

        assert_eq!(id, 1);
        assert_eq!(store.row_count("notes").await, 1);
    }

    #[tokio::test]
    async fn error_rolls_back_and_is_returned_unchanged() {
        let (store, tm) = manager();

        let result: Result<(), TestError> = tm
            .run_in_transaction(None, |tx| {
                Box::pin(async move {
                    insert_note(tx, "discarded").await?;
                    Err(TestError::Business("boom"))
                })
            })
            .await;

        assert_eq!(result, Err(TestError::Business("boom")));
        assert_eq!(store.row_count("notes").await, 0);
    }

    #[tokio::test]
    async fn commit_failure_discards_result() {
        let (store, tm) = manager();
        store.fail_next_commit().await;

        let result = tm
            .run_in_transaction(None, |tx| {
                Box::pin(async move { insert_note(tx, "lost").await })
            })
            .await;

        match result {
            Err(TestError::Store(msg)) => assert!(msg.contains("failed to commit")),
            other => panic!("expected commit failure, got {other:?}"),
        }
        assert_eq!(store.row_count("notes").await, 0);
    }

    #[tokio::test]
    async fn rollback_failure_does_not_mask_original_error() {
        let (store, tm) = manager();
        store.fail_next_rollback().await;

        let result: Result<(), TestError> = tm
            .run_in_transaction(None, |_tx| {
                Box::pin(async move { Err(TestError::Business("original")) })
            })
            .await;

        assert_eq!(result, Err(TestError::Business("original")));
    }

    #[tokio::test]
    async fn nested_failure_rolls_back_to_savepoint_only() {
        let (store, tm) = manager();
        let inner_tm = tm.clone();

        tm.run_in_transaction(None, move |tx| {
            Box::pin(async move {
                insert_note(tx, "outer").await?;

                let nested: Result<(), TestError> = inner_tm
                    .run_in_transaction(Some(tx), |tx| {
                        Box::pin(async move {
                            insert_note(tx, "inner").await?;
                            Err(TestError::Business("inner failed"))
                        })
                    })
                    .await;
                assert_eq!(nested, Err(TestError::Business("inner failed")));
                Ok::<_, TestError>(())
            })
        })
        .await
        .unwrap();

        let rows: Vec<(i64, serde_json::Value)> = store.ambient().select("notes").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1["text"], "outer");
    }

    #[tokio::test]
    async fn nested_success_is_committed_with_the_enclosing_transaction() {
        let (store, tm) = manager();
        let inner_tm = tm.clone();

        tm.run_in_transaction(None, move |tx| {
            Box::pin(async move {
                insert_note(tx, "outer").await?;
                inner_tm
                    .run_in_transaction(Some(tx), |tx| {
                        Box::pin(async move { insert_note(tx, "inner").await })
                    })
                    .await?;
                Ok::<_, TestError>(())
            })
        })
        .await
        .unwrap();

        assert_eq!(store.row_count("notes").await, 2);
    }

    #[tokio::test]
    async fn nested_success_is_undone_when_enclosing_fails() {
        let (store, tm) = manager();
        let inner_tm = tm.clone();

        let result: Result<(), TestError> = tm
            .run_in_transaction(None, move |tx| {
                Box::pin(async move {
                    inner_tm
                        .run_in_transaction(Some(tx), |tx| {
                            Box::pin(async move { insert_note(tx, "inner").await })
                        })
                        .await?;
                    Err(TestError::Business("outer failed"))
                })
            })
            .await;

        assert_eq!(result, Err(TestError::Business("outer failed")));
        assert_eq!(store.row_count("notes").await, 0);
    }

    #[tokio::test]
    async fn ambient_scope_starts_a_new_transaction() {
        let (store, tm) = manager();
        let mut ambient = store.ambient();

        let result: Result<(), TestError> = tm
            .run_in_transaction(Some(&mut ambient), |tx| {
                Box::pin(async move {
                    assert!(tx.in_transaction());
                    insert_note(tx, "discarded").await?;
                    Err(TestError::Business("boom"))
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.row_count("notes").await, 0);
    }

    #[tokio::test]
    async fn panic_rolls_back_and_resumes() {
        let (store, tm) = manager();

        let task = tokio::spawn(async move {
            let _: Result<(), TestError> = tm
                .run_in_transaction(None, |tx| {
                    Box::pin(async move {
                        insert_note(tx, "discarded").await?;
                        panic!("unit of work exploded");
                    })
                })
                .await;
        });

        let err = task.await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(store.row_count("notes").await, 0);
    }

    #[tokio::test]
    async fn run_without_result_commits() {
        let (store, tm) = manager();

        tm.run_without_result(None, |tx| {
            Box::pin(async move {
                insert_note(tx, "kept").await?;
                Ok::<(), TestError>(())
            })
        })
        .await
        .unwrap();

        assert_eq!(store.row_count("notes").await, 1);
    }

    #[tokio::test]
    async fn current_handle_falls_back_to_ambient() {
        let (store, tm) = manager();

        let mut current = tm.current_handle(None);
        assert!(current.is_ambient());
        assert!(!current.in_transaction());
        current.insert("notes", &json!({})).await.unwrap();
        assert_eq!(store.row_count("notes").await, 1);

        let mut tx = store.begin().await.unwrap();
        let current = tm.current_handle(Some(&mut tx));
        assert!(!current.is_ambient());
        assert!(current.in_transaction());
    }

    #[test]
    fn savepoint_names_are_unique_identifiers() {
        let (_, tm) = manager();
        let a = tm.next_savepoint_name();
        let b = tm.next_savepoint_name();
        assert_ne!(a, b);
        assert!(crate::store::validate_savepoint_name(&a).is_ok());
    }
}
