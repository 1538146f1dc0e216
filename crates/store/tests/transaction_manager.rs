//! Transaction manager properties against the in-memory backend.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use store::{
    MemoryHandle, MemoryStore, StoreError, StoreHandle, TransactionManager, TransactionalStore,
};

#[derive(Debug)]
enum AppError {
    Rejected(String),
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

async fn write_scratch(tx: &mut MemoryHandle, label: &str) -> Result<i64, AppError> {
    Ok(tx.insert("scratch", &json!({ "label": label })).await?)
}

fn setup() -> (MemoryStore, TransactionManager<MemoryStore>) {
    let store = MemoryStore::new();
    let tm = TransactionManager::new(store.clone());
    (store, tm)
}

#[tokio::test]
async fn failed_unit_of_work_leaves_no_rows() {
    let (store, tm) = setup();

    tm.run_without_result(None, |tx| {
        Box::pin(async move {
            write_scratch(tx, "baseline").await?;
            Ok::<_, AppError>(())
        })
    })
    .await
    .unwrap();
    let before = store.row_count("scratch").await;

    let result: Result<(), AppError> = tm
        .run_in_transaction(None, |tx| {
            Box::pin(async move {
                for i in 0..5 {
                    write_scratch(tx, &format!("row {i}")).await?;
                }
                Err(AppError::Rejected("forced failure".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(AppError::Rejected(_))));
    assert_eq!(store.row_count("scratch").await, before);
}

#[tokio::test]
async fn failed_savepoint_keeps_enclosing_writes() {
    let (store, tm) = setup();
    let nested_tm = tm.clone();

    tm.run_in_transaction(None, move |tx| {
        Box::pin(async move {
            write_scratch(tx, "before nested").await?;

            let nested: Result<i64, AppError> = nested_tm
                .run_in_transaction(Some(&mut *tx), |tx| {
                    Box::pin(async move {
                        write_scratch(tx, "inside nested").await?;
                        Err(AppError::Rejected("nested failure".into()))
                    })
                })
                .await;
            assert!(nested.is_err());

            write_scratch(tx, "after nested").await?;
            Ok::<_, AppError>(())
        })
    })
    .await
    .unwrap();

    let rows: Vec<(i64, serde_json::Value)> = store.ambient().select("scratch").await.unwrap();
    let labels: Vec<_> = rows.iter().map(|(_, row)| row["label"].clone()).collect();
    assert_eq!(labels, vec![json!("before nested"), json!("after nested")]);
}

#[tokio::test]
async fn deep_nesting_unwinds_one_level_at_a_time() {
    let (store, tm) = setup();
    let level_two = tm.clone();
    let level_three = tm.clone();

    tm.run_in_transaction(None, move |tx| {
        Box::pin(async move {
            write_scratch(tx, "level 1").await?;

            level_two
                .run_in_transaction(Some(&mut *tx), move |tx| {
                    Box::pin(async move {
                        write_scratch(tx, "level 2").await?;

                        let innermost: Result<(), AppError> = level_three
                            .run_in_transaction(Some(&mut *tx), |tx| {
                                Box::pin(async move {
                                    write_scratch(tx, "level 3").await?;
                                    Err(AppError::Rejected("level 3 failed".into()))
                                })
                            })
                            .await;
                        assert!(innermost.is_err());
                        Ok::<_, AppError>(())
                    })
                })
                .await?;

            Ok::<_, AppError>(())
        })
    })
    .await
    .unwrap();

    assert_eq!(store.row_count("scratch").await, 2);
}

#[tokio::test]
async fn nested_call_reuses_the_enclosing_handle() {
    let (store, tm) = setup();
    let nested_tm = tm.clone();

    let result: Result<(), AppError> = tm
        .run_in_transaction(None, move |tx| {
            Box::pin(async move {
                nested_tm
                    .run_in_transaction(Some(&mut *tx), |tx| {
                        Box::pin(async move {
                            assert!(tx.in_transaction());
                            write_scratch(tx, "nested").await
                        })
                    })
                    .await?;
                // Outer failure discards the released savepoint's writes too.
                Err(AppError::Rejected("outer failed".into()))
            })
        })
        .await;

    assert!(result.is_err());
    assert_eq!(store.row_count("scratch").await, 0);
}

#[tokio::test]
async fn commit_failure_is_reported_as_store_error() {
    let (store, tm) = setup();
    store.fail_next_commit().await;

    let result = tm
        .run_in_transaction(None, |tx| {
            Box::pin(async move { write_scratch(tx, "lost").await })
        })
        .await;

    match result {
        Err(AppError::Store(err)) => {
            assert!(matches!(err, StoreError::Commit(_)));
            assert!(err.is_transaction_control());
        }
        other => panic!("expected commit failure, got {other:?}"),
    }
    assert_eq!(store.row_count("scratch").await, 0);
}

#[tokio::test]
async fn rollback_failure_keeps_the_business_error() {
    let (store, tm) = setup();
    store.fail_next_rollback().await;

    let result: Result<(), AppError> = tm
        .run_in_transaction(None, |tx| {
            Box::pin(async move {
                write_scratch(tx, "discarded").await?;
                Err(AppError::Rejected("the real cause".into()))
            })
        })
        .await;

    match result {
        Err(AppError::Rejected(msg)) => assert_eq!(msg, "the real cause"),
        other => panic!("expected the business error, got {other:?}"),
    }
}

#[tokio::test]
async fn panic_in_unit_of_work_rolls_back() {
    let (store, tm) = setup();

    let handle = tokio::spawn(async move {
        tm.run_without_result(None, |tx| {
            Box::pin(async move {
                write_scratch(tx, "discarded").await?;
                if tx.in_transaction() {
                    panic!("unit of work panicked");
                }
                Ok::<_, AppError>(())
            })
        })
        .await
    });

    let join_err = handle.await.unwrap_err();
    assert!(join_err.is_panic());
    assert_eq!(store.row_count("scratch").await, 0);
}

#[tokio::test]
async fn timed_out_unit_of_work_never_commits() {
    let (store, tm) = setup();

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        tm.run_without_result(None, |tx| {
            Box::pin(async move {
                write_scratch(tx, "abandoned").await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AppError>(())
            })
        }),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(store.row_count("scratch").await, 0);
}

#[tokio::test]
async fn concurrent_units_of_work_are_independent() {
    let (store, tm) = setup();

    let ok_tm = tm.clone();
    let succeeding = tokio::spawn(async move {
        ok_tm
            .run_in_transaction(None, |tx| {
                Box::pin(async move { write_scratch(tx, "committed").await })
            })
            .await
    });

    let failing = tokio::spawn(async move {
        tm.run_in_transaction(None, |tx| {
            Box::pin(async move {
                write_scratch(tx, "rolled back").await?;
                Err::<(), _>(AppError::Rejected("nope".into()))
            })
        })
        .await
    });

    assert!(succeeding.await.unwrap().is_ok());
    assert!(failing.await.unwrap().is_err());

    let rows: Vec<(i64, serde_json::Value)> = store.ambient().select("scratch").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1["label"], "committed");
}

#[tokio::test]
async fn many_nested_calls_use_distinct_savepoints() {
    let (store, tm) = setup();
    let nested_tm = tm.clone();

    let ids = tm
        .run_in_transaction(None, move |tx| {
            Box::pin(async move {
                let mut ids = HashSet::new();
                for i in 0..20 {
                    let id = nested_tm
                        .run_in_transaction(Some(&mut *tx), move |tx| {
                            Box::pin(async move { write_scratch(tx, &format!("nested {i}")).await })
                        })
                        .await?;
                    ids.insert(id);
                }
                Ok::<_, AppError>(ids)
            })
        })
        .await
        .unwrap();

    assert_eq!(ids.len(), 20);
    assert_eq!(store.row_count("scratch").await, 20);
}

#[tokio::test]
async fn current_handle_is_never_absent() {
    let (store, tm) = setup();

    {
        let mut handle = tm.current_handle(None);
        assert!(!handle.in_transaction());
        handle.insert("scratch", &json!({ "label": "ambient" })).await.unwrap();
    }
    assert_eq!(store.row_count("scratch").await, 1);

    let nested_tm = tm.clone();
    tm.run_without_result(None, move |tx| {
        Box::pin(async move {
            let handle = nested_tm.current_handle(Some(&mut *tx));
            assert!(handle.in_transaction());
            Ok::<_, AppError>(())
        })
    })
    .await
    .unwrap();
}
