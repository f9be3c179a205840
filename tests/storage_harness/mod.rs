//! Shared test harness for storage backend testing
//!
//! Provides seeding helpers generic over any [`Store`] and the macro-generated
//! contract suites every backend must pass.
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! #[macro_use]
//! mod storage_harness;
//! use storage_harness::*;
//!
//! ledger_contract_tests!(Arc::new(InMemoryStore::new()));
//! order_contract_tests!(Arc::new(InMemoryStore::new()));
//! ```

#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;

use stockpile::core::model::{
    CartId, NewCartItem, NewStock, OrderStatus, ProductId, Quantity, StockKey, UserId,
    WarehouseId,
};
use stockpile::core::order::CreateOrderRequest;
use stockpile::core::store::{CartStore, StockStore, Store};

#[macro_use]
pub mod ledger_contract;
#[macro_use]
pub mod order_contract;

/// Parse a money literal such as `"59.94"`
pub fn money(value: &str) -> Decimal {
    value.parse().expect("valid decimal literal")
}

/// Create a stock row and return its key
pub async fn seed_stock<S: Store>(
    store: &Arc<S>,
    warehouse_id: WarehouseId,
    product_id: ProductId,
    quantity: Quantity,
) -> StockKey {
    store
        .create_stock(NewStock {
            warehouse_id,
            product_id,
            quantity,
        })
        .await
        .expect("seed stock row")
        .key()
}

/// Create a cart with the given `(product, quantity, sub_total)` lines
pub async fn seed_cart<S: Store>(
    store: &Arc<S>,
    user_id: UserId,
    warehouse_id: WarehouseId,
    lines: &[(ProductId, Quantity, &str)],
) -> CartId {
    let cart = store
        .create_cart(user_id, warehouse_id)
        .await
        .expect("seed cart");
    for (product_id, quantity, sub_total) in lines {
        store
            .add_cart_item(
                cart.id,
                NewCartItem {
                    product_id: *product_id,
                    quantity: *quantity,
                    sub_total: money(sub_total),
                },
            )
            .await
            .expect("seed cart item");
    }
    cart.id
}

pub fn order_request(user_id: UserId, cart_id: CartId) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        cart_id,
        status: OrderStatus::Pending,
        shipping_cost: money("5.00"),
    }
}

pub async fn quantity_of<S: Store>(store: &Arc<S>, key: StockKey) -> Quantity {
    store.get_stock(key).await.expect("stock row").quantity
}
