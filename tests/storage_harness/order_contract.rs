//! Macro-generated contract suite for the Order Transaction Coordinator.
//!
//! `$factory` must evaluate to an `Arc<S>` where `S: Store`.
//!
//! Under PostgreSQL's serializable isolation a losing concurrent order may
//! surface as a transaction conflict instead of insufficient stock. Both are
//! accepted wherever two orders race; the stock invariants are asserted
//! exactly.

#[macro_export]
macro_rules! order_contract_tests {
    ($factory:expr) => {
        mod order_contract_tests {
            use super::*;
            use stockpile::core::error::{OrderError, StoreError, TransactionError};
            use stockpile::core::model::OrderStatus;
            use stockpile::core::order::OrderService;
            use stockpile::core::store::{
                IsolationLevel, OrderReader, OrderTransaction, StockRowLock, TransactionProvider,
            };
            use std::time::{Duration, Instant};
            use tokio_util::sync::CancellationToken;

            fn is_lost_race(err: &OrderError) -> bool {
                matches!(
                    err,
                    OrderError::InsufficientStock { .. }
                        | OrderError::Transaction(TransactionError::Conflict { .. })
                )
            }

            // ==================================================================
            // Commit path
            // ==================================================================

            #[tokio::test]
            async fn test_create_order_persists_everything() {
                let store = $factory;
                let first = seed_stock(&store, 1, 7, 10).await;
                let second = seed_stock(&store, 1, 8, 3).await;
                let cart = seed_cart(&store, 1, 1, &[(7, 6, "59.94"), (8, 1, "4.50")]).await;
                let service = OrderService::new(store.clone());

                let placed = service.create_order(order_request(1, cart)).await.unwrap();

                assert_eq!(placed.order.user_id, 1);
                assert_eq!(placed.order.status, OrderStatus::Pending);
                assert_eq!(placed.order.total_price, money("64.44"));
                assert_eq!(placed.order.shipping_cost, money("5.00"));
                assert_eq!(placed.items.len(), 2);
                assert!(placed.items.iter().all(|i| i.order_id == placed.order.id));

                assert_eq!(quantity_of(&store, first).await, 4);
                assert_eq!(quantity_of(&store, second).await, 2);

                let stored = store.get_order(placed.order.id).await.unwrap();
                assert_eq!(stored.total_price, money("64.44"));
                let items = service.order_items(placed.order.id).await.unwrap();
                assert_eq!(items.len(), 2);
            }

            #[tokio::test]
            async fn test_total_price_is_exact() {
                let store = $factory;
                seed_stock(&store, 1, 1, 10).await;
                seed_stock(&store, 1, 2, 10).await;
                seed_stock(&store, 1, 3, 10).await;
                let cart = seed_cart(
                    &store,
                    4,
                    1,
                    &[(1, 1, "0.10"), (2, 1, "0.20"), (3, 1, "19.99")],
                )
                .await;
                let service = OrderService::new(store.clone());

                let placed = service.create_order(order_request(4, cart)).await.unwrap();
                assert_eq!(placed.order.total_price, money("20.29"));
            }

            // ==================================================================
            // Atomicity
            // ==================================================================

            #[tokio::test]
            async fn test_failed_line_rolls_back_whole_order() {
                let store = $factory;
                let plenty = seed_stock(&store, 1, 1, 10).await;
                let scarce = seed_stock(&store, 1, 2, 1).await;
                let cart = seed_cart(&store, 2, 1, &[(1, 3, "30.00"), (2, 2, "10.00")]).await;
                let service = OrderService::new(store.clone());

                let err = service.create_order(order_request(2, cart)).await.unwrap_err();

                assert_eq!(
                    err,
                    OrderError::InsufficientStock {
                        warehouse_id: 1,
                        product_id: 2,
                        requested: 2,
                        available: 1,
                    }
                );
                assert_eq!(quantity_of(&store, plenty).await, 10);
                assert_eq!(quantity_of(&store, scarce).await, 1);
                assert!(service.orders_for_user(2, None).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_missing_stock_row_rolls_back() {
                let store = $factory;
                let present = seed_stock(&store, 1, 1, 10).await;
                let cart = seed_cart(&store, 3, 1, &[(1, 2, "20.00"), (42, 1, "1.00")]).await;
                let service = OrderService::new(store.clone());

                let err = service.create_order(order_request(3, cart)).await.unwrap_err();

                assert!(matches!(err, OrderError::NotFound(_)));
                assert_eq!(quantity_of(&store, present).await, 10);
                assert!(service.orders_for_user(3, None).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_empty_cart_opens_nothing() {
                let store = $factory;
                let cart = seed_cart(&store, 5, 1, &[]).await;
                let service = OrderService::new(store.clone());

                let err = service.create_order(order_request(5, cart)).await.unwrap_err();

                assert_eq!(err, OrderError::EmptyCart { cart_id: cart });
                assert!(service.orders_for_user(5, None).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_unknown_cart() {
                let store = $factory;
                let service = OrderService::new(store.clone());

                let err = service
                    .create_order(order_request(1, 4242))
                    .await
                    .unwrap_err();
                assert!(matches!(err, OrderError::NotFound(_)));
            }

            // ==================================================================
            // Concurrency
            // ==================================================================

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_two_orders_race_for_one_row() {
                let store = $factory;
                let key = seed_stock(&store, 1, 7, 10).await;
                let cart_a = seed_cart(&store, 10, 1, &[(7, 6, "59.94")]).await;
                let cart_b = seed_cart(&store, 11, 1, &[(7, 6, "59.94")]).await;
                let service = OrderService::new(store.clone());

                let (a, b) = tokio::join!(
                    {
                        let service = service.clone();
                        tokio::spawn(async move {
                            service.create_order(order_request(10, cart_a)).await
                        })
                    },
                    {
                        let service = service.clone();
                        tokio::spawn(async move {
                            service.create_order(order_request(11, cart_b)).await
                        })
                    }
                );
                let results = [a.unwrap(), b.unwrap()];

                let winners = results.iter().filter(|r| r.is_ok()).count();
                assert_eq!(winners, 1, "exactly one order may win: {:?}", results);
                for result in &results {
                    if let Err(err) = result {
                        assert!(is_lost_race(err), "unexpected loser error: {}", err);
                    }
                }

                assert_eq!(quantity_of(&store, key).await, 4);
                let placed = service.orders_for_user(10, None).await.unwrap().len()
                    + service.orders_for_user(11, None).await.unwrap().len();
                assert_eq!(placed, 1, "the loser leaves no order behind");
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_no_oversell_under_contention() {
                let store = $factory;
                let key = seed_stock(&store, 1, 9, 5).await;
                let mut carts = Vec::new();
                for user in 100..108 {
                    carts.push((user, seed_cart(&store, user, 1, &[(9, 1, "2.00")]).await));
                }
                let service = OrderService::new(store.clone());

                let mut handles = Vec::new();
                for (user, cart) in carts {
                    let service = service.clone();
                    handles.push(tokio::spawn(async move {
                        service.create_order(order_request(user, cart)).await
                    }));
                }

                let mut succeeded = 0;
                for handle in handles {
                    match handle.await.unwrap() {
                        Ok(_) => succeeded += 1,
                        Err(err) => assert!(is_lost_race(&err), "unexpected error: {}", err),
                    }
                }

                let remaining = quantity_of(&store, key).await;
                assert!(succeeded <= 5);
                assert!(remaining >= 0);
                assert_eq!(remaining, 5 - succeeded);
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_cancel_during_lock_wait_releases_promptly() {
                let store = $factory;
                let free = seed_stock(&store, 1, 1, 10).await;
                let held = seed_stock(&store, 1, 2, 10).await;
                let cart = seed_cart(&store, 30, 1, &[(1, 1, "1.00"), (2, 1, "1.00")]).await;
                let service = OrderService::new(store.clone());

                let mut blocker = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
                blocker.lock_stock_row(held).await.unwrap();

                let cancel = CancellationToken::new();
                let order = {
                    let service = service.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        service
                            .create_order_with(order_request(30, cart), &cancel)
                            .await
                    })
                };
                // Let the order lock the first row and start waiting on the second
                tokio::time::sleep(Duration::from_millis(200)).await;

                let started = Instant::now();
                cancel.cancel();
                let err = order.await.unwrap().unwrap_err();
                assert_eq!(err, OrderError::Transaction(TransactionError::Cancelled));
                assert!(
                    started.elapsed() < Duration::from_secs(2),
                    "abort waited {:?}",
                    started.elapsed()
                );

                // The first line's row lock is already released
                let mut next = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
                let relocked = tokio::time::timeout(Duration::from_secs(1), next.lock_stock_row(free))
                    .await
                    .expect("row lock of the aborted order was not released");
                assert_eq!(relocked.unwrap(), Some(10));
                next.rollback().await.unwrap();
                blocker.rollback().await.unwrap();

                assert!(service.orders_for_user(30, None).await.unwrap().is_empty());
                assert_eq!(quantity_of(&store, held).await, 10);
            }

            // ==================================================================
            // Reads and status
            // ==================================================================

            #[tokio::test]
            async fn test_orders_for_user_newest_first_and_filtered() {
                let store = $factory;
                seed_stock(&store, 1, 1, 10).await;
                let service = OrderService::new(store.clone());

                let first_cart = seed_cart(&store, 20, 1, &[(1, 1, "1.00")]).await;
                let first = service
                    .create_order(order_request(20, first_cart))
                    .await
                    .unwrap();
                let second_cart = seed_cart(&store, 20, 1, &[(1, 1, "1.00")]).await;
                let second = service
                    .create_order(order_request(20, second_cart))
                    .await
                    .unwrap();

                let all = service.orders_for_user(20, None).await.unwrap();
                let ids: Vec<_> = all.iter().map(|o| o.id).collect();
                assert_eq!(ids, vec![second.order.id, first.order.id]);

                service
                    .update_status(first.order.id, OrderStatus::Processed)
                    .await
                    .unwrap();
                let processed = service
                    .orders_for_user(20, Some(OrderStatus::Processed))
                    .await
                    .unwrap();
                assert_eq!(processed.len(), 1);
                assert_eq!(processed[0].id, first.order.id);
                assert!(service.orders_for_user(21, None).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_update_status_unknown_order() {
                let store = $factory;
                let service = OrderService::new(store.clone());

                let err = service
                    .update_status(9999, OrderStatus::Shipped)
                    .await
                    .unwrap_err();
                assert!(matches!(err, StoreError::NotFound(_)));
                assert!(service.order_items(9999).await.is_err());
            }
        }
    };
}
