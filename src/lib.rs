//! # Stockpile
//!
//! Order placement and warehouse stock engine. Stock quantities per
//! (warehouse, product) are never oversold, however many orders and batch
//! corrections race against the same row.
//!
//! ## Features
//!
//! - **Stock Ledger**: locked read-modify-write decrement inside a transaction,
//!   unconditional overwrite outside of one
//! - **Order Transaction Coordinator**: cart → order → stock decrement as one
//!   all-or-nothing unit, with cancellation and an optional deadline
//! - **Concurrent Batch Updater**: bounded fan-out of independent corrections
//!   with per-item failure reports and contained panics
//! - **Pluggable storage**: in-memory backend for tests and development,
//!   PostgreSQL (`SELECT ... FOR UPDATE`) behind the `postgres` feature
//! - **HTTP delivery layer**: axum router with typed JSON errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stockpile::prelude::*;
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.create_stock(NewStock { warehouse_id: 1, product_id: 7, quantity: 10 }).await?;
//!
//! let cart = store.create_cart(1, 1).await?;
//! store.add_cart_item(cart.id, NewCartItem {
//!     product_id: 7,
//!     quantity: 6,
//!     sub_total: "59.94".parse()?,
//! }).await?;
//!
//! let orders = OrderService::new(store.clone());
//! let placed = orders.create_order(CreateOrderRequest {
//!     user_id: 1,
//!     cart_id: cart.id,
//!     status: OrderStatus::Pending,
//!     shipping_cost: Decimal::ZERO,
//! }).await?;
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        batch::{BatchReport, BatchUpdater, FailureKind},
        error::{BatchError, OrderError, StockError, StockpileError, StoreError, TransactionError},
        ledger::{StockLedger, locked_decrease},
        model::{
            Cart, CartItemUpdate, CartLineItem, NewCartItem, NewStock, Order, OrderItem,
            OrderStatus, PlacedOrder, StockKey, StockUpdate, WarehouseStock,
        },
        order::{CreateOrderRequest, OrderService},
        store::{
            CartStore, IsolationLevel, OrderReader, OrderTransaction, StockRowLock, StockStore,
            Store, TransactionProvider,
        },
    };

    // === Storage ===
    pub use crate::storage::InMemoryStore;
    #[cfg(feature = "postgres")]
    pub use crate::storage::{PostgresStore, ensure_schema};

    // === Config ===
    pub use crate::config::StockpileConfig;

    // === Server ===
    pub use crate::server::{AppState, build_router, serve};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use rust_decimal::Decimal;
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
