//! Macro-generated contract suite for the Stock Ledger and the batch updater.
//!
//! `$factory` must evaluate to an `Arc<S>` where `S: Store`. It is
//! re-evaluated for each test to ensure isolation.
//!
//! # Generated Tests
//!
//! ## Locked decrease
//! - `test_decrease_commit_and_rollback`
//! - `test_decrease_insufficient_leaves_row`
//! - `test_decrease_missing_row`
//! - `test_row_lock_serializes_decrements`
//!
//! ## Unconditional set
//! - `test_set_quantity_is_idempotent`
//! - `test_set_quantity_missing_row`
//! - `test_create_duplicate_pair`
//! - `test_list_for_warehouse`
//! - `test_list_all_rows`
//!
//! ## Batch
//! - `test_batch_isolates_missing_row`
//! - `test_batch_many_rows`

#[macro_export]
macro_rules! ledger_contract_tests {
    ($factory:expr) => {
        mod ledger_contract_tests {
            use super::*;
            use stockpile::core::batch::{BatchUpdater, FailureKind};
            use stockpile::core::error::{NotFoundError, StockError, StoreError};
            use stockpile::core::ledger::{StockLedger, locked_decrease};
            use stockpile::core::model::{NewStock, StockKey, StockUpdate};
            use stockpile::core::store::{
                IsolationLevel, OrderTransaction, StockStore, TransactionProvider,
            };
            use tokio_util::sync::CancellationToken;

            // ==================================================================
            // Locked decrease
            // ==================================================================

            #[tokio::test]
            async fn test_decrease_commit_and_rollback() {
                let store = $factory;
                let key = seed_stock(&store, 1, 7, 10).await;

                let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
                assert_eq!(locked_decrease(&mut tx, key, 4).await.unwrap(), 6);
                tx.rollback().await.unwrap();
                assert_eq!(quantity_of(&store, key).await, 10);

                let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
                assert_eq!(locked_decrease(&mut tx, key, 4).await.unwrap(), 6);
                tx.commit().await.unwrap();
                assert_eq!(quantity_of(&store, key).await, 6);
            }

            #[tokio::test]
            async fn test_decrease_insufficient_leaves_row() {
                let store = $factory;
                let key = seed_stock(&store, 1, 7, 5).await;

                let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
                let err = locked_decrease(&mut tx, key, 6).await.unwrap_err();
                tx.rollback().await.unwrap();

                assert_eq!(
                    err,
                    StockError::Insufficient {
                        key,
                        requested: 6,
                        available: 5
                    }
                );
                assert_eq!(quantity_of(&store, key).await, 5);
            }

            #[tokio::test]
            async fn test_decrease_missing_row() {
                let store = $factory;
                let missing = StockKey::new(1, 999);

                let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
                let err = locked_decrease(&mut tx, missing, 1).await.unwrap_err();
                tx.rollback().await.unwrap();

                assert_eq!(err, StockError::NotFound(NotFoundError::stock(missing)));
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_row_lock_serializes_decrements() {
                let store = $factory;
                let key = seed_stock(&store, 1, 7, 10).await;

                let mut handles = Vec::new();
                for _ in 0..12 {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        // Read committed: the lock waiter re-reads the latest row
                        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
                        match locked_decrease(&mut tx, key, 1).await {
                            Ok(_) => {
                                tx.commit().await.unwrap();
                                true
                            }
                            Err(StockError::Insufficient { .. }) => {
                                tx.rollback().await.unwrap();
                                false
                            }
                            Err(other) => panic!("unexpected ledger error: {}", other),
                        }
                    }));
                }

                let mut succeeded = 0;
                for handle in handles {
                    if handle.await.unwrap() {
                        succeeded += 1;
                    }
                }

                assert_eq!(succeeded, 10, "exactly the available units are sold");
                assert_eq!(quantity_of(&store, key).await, 0);
            }

            // ==================================================================
            // Unconditional set
            // ==================================================================

            #[tokio::test]
            async fn test_set_quantity_is_idempotent() {
                let store = $factory;
                let key = seed_stock(&store, 1, 1, 3).await;
                let ledger = StockLedger::new(store.clone());

                ledger.set_quantity(key, 20).await.unwrap();
                let once = quantity_of(&store, key).await;
                ledger.set_quantity(key, 20).await.unwrap();
                let twice = quantity_of(&store, key).await;

                assert_eq!(once, 20);
                assert_eq!(twice, once);
            }

            #[tokio::test]
            async fn test_set_quantity_missing_row() {
                let store = $factory;
                let ledger = StockLedger::new(store.clone());

                let err = ledger
                    .set_quantity(StockKey::new(1, 999), 5)
                    .await
                    .unwrap_err();
                assert!(matches!(err, StockError::NotFound(_)));
            }

            #[tokio::test]
            async fn test_create_duplicate_pair() {
                let store = $factory;
                seed_stock(&store, 2, 5, 1).await;

                let err = store
                    .create_stock(NewStock {
                        warehouse_id: 2,
                        product_id: 5,
                        quantity: 9,
                    })
                    .await
                    .unwrap_err();
                assert!(matches!(err, StoreError::AlreadyExists { .. }));
            }

            #[tokio::test]
            async fn test_list_for_warehouse() {
                let store = $factory;
                seed_stock(&store, 1, 1, 1).await;
                seed_stock(&store, 1, 2, 2).await;
                seed_stock(&store, 2, 1, 3).await;
                let ledger = StockLedger::new(store.clone());

                let rows = ledger.list_for_warehouse(1).await.unwrap();
                assert_eq!(rows.len(), 2);
                assert!(rows.iter().all(|row| row.warehouse_id == 1));
                assert!(ledger.list_for_warehouse(3).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_list_all_rows() {
                let store = $factory;
                let ledger = StockLedger::new(store.clone());
                assert!(ledger.list().await.unwrap().is_empty());

                seed_stock(&store, 2, 1, 3).await;
                seed_stock(&store, 1, 2, 2).await;
                seed_stock(&store, 1, 1, 1).await;

                let keys: Vec<StockKey> = ledger
                    .list()
                    .await
                    .unwrap()
                    .iter()
                    .map(|row| row.key())
                    .collect();
                assert_eq!(
                    keys,
                    vec![StockKey::new(1, 1), StockKey::new(1, 2), StockKey::new(2, 1)]
                );
            }

            // ==================================================================
            // Batch
            // ==================================================================

            #[tokio::test]
            async fn test_batch_isolates_missing_row() {
                let store = $factory;
                let key = seed_stock(&store, 1, 1, 3).await;
                let ledger = StockLedger::new(store.clone());

                let report = BatchUpdater::new(4)
                    .batch_update_stock(
                        &ledger,
                        vec![
                            StockUpdate {
                                warehouse_id: 1,
                                product_id: 1,
                                quantity: 20,
                            },
                            StockUpdate {
                                warehouse_id: 1,
                                product_id: 999,
                                quantity: 5,
                            },
                        ],
                        &CancellationToken::new(),
                    )
                    .await
                    .unwrap();

                assert_eq!(report.attempted, 2);
                assert_eq!(report.failures.len(), 1);
                assert_eq!(report.failures[0].key, StockKey::new(1, 999));
                assert_eq!(report.failures[0].kind, FailureKind::Rejected);
                assert_eq!(quantity_of(&store, key).await, 20);
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_batch_many_rows() {
                let store = $factory;
                let mut updates = Vec::new();
                for product_id in 1..=20 {
                    seed_stock(&store, 3, product_id, 0).await;
                    updates.push(StockUpdate {
                        warehouse_id: 3,
                        product_id,
                        quantity: product_id as i32 * 10,
                    });
                }
                let ledger = StockLedger::new(store.clone());

                let report = BatchUpdater::new(3)
                    .batch_update_stock(&ledger, updates, &CancellationToken::new())
                    .await
                    .unwrap();

                assert_eq!(report.attempted, 20);
                assert_eq!(report.succeeded, 20);
                assert!(report.is_complete());
                for product_id in 1..=20 {
                    assert_eq!(
                        quantity_of(&store, StockKey::new(3, product_id)).await,
                        product_id as i32 * 10
                    );
                }
            }
        }
    };
}
