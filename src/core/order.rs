//! Order Transaction Coordinator
//!
//! Turns a cart into an order inside one serializable transaction:
//!
//! 1. validate the request (no transaction yet)
//! 2. load the cart and reject it when empty (no transaction yet)
//! 3. open the transaction, insert the order row
//! 4. for every line item in cart order: insert the order item, then take the
//!    stock row lock and decrement
//! 5. commit, or roll back everything on the first failure
//!
//! The cart itself is never modified. Callers that want it emptied after a
//! successful order call [`CartStore::clear_cart`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::core::error::{OrderError, StoreError, TransactionError, ValidationError};
use crate::core::ledger::locked_decrease;
use crate::core::model::{
    Cart, CartId, NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderStatus, PlacedOrder,
    MAX_AMOUNT, StockKey, UserId, money_amount,
};
use crate::core::store::{
    CartStore, IsolationLevel, OrderReader, OrderTransaction, Store, TransactionProvider,
};

/// Input of [`OrderService::create_order`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(range(min = 1, message = "user id is required"))]
    pub user_id: UserId,
    #[validate(range(min = 1, message = "cart id is required"))]
    pub cart_id: CartId,
    pub status: OrderStatus,
    #[validate(custom(
        function = "money_amount",
        message = "shipping cost must be between 0 and 9999999999.99"
    ))]
    pub shipping_cost: Decimal,
}

/// Creates orders and exposes the order read side
pub struct OrderService<S> {
    store: Arc<S>,
    timeout: Option<Duration>,
}

impl<S> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: Store> OrderService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Abort transactions that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PlacedOrder, OrderError> {
        self.create_order_with(request, &CancellationToken::new())
            .await
    }

    /// Like [`create_order`](Self::create_order), but aborts when `cancel`
    /// fires while the transaction is open
    ///
    /// An abort during a row lock wait drops the wait and rolls back at once;
    /// row locks taken for earlier lines are released by that rollback.
    pub async fn create_order_with(
        &self,
        request: CreateOrderRequest,
        cancel: &CancellationToken,
    ) -> Result<PlacedOrder, OrderError> {
        request.validate()?;

        let cart = self.store.cart(request.cart_id).await?;
        if cart.user_id != request.user_id {
            return Err(ValidationError::field("cart_id", "cart does not belong to this user").into());
        }
        if cart.items.is_empty() {
            return Err(OrderError::EmptyCart { cart_id: cart.id });
        }
        if let Some(item) = cart.items.iter().find(|item| item.quantity <= 0) {
            return Err(ValidationError::field(
                "quantity",
                format!("cart item {} has a non-positive quantity", item.id),
            )
            .into());
        }
        let total_price = cart
            .total()
            .filter(|total| *total <= MAX_AMOUNT)
            .ok_or_else(|| {
                ValidationError::field("total_price", "cart total exceeds the largest order amount")
            })?;

        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrderError::Transaction(TransactionError::Cancelled)),
            _ = deadline => Err(OrderError::Transaction(TransactionError::DeadlineExceeded)),
            written = write_order(&mut tx, &request, &cart, total_price) => written,
        };

        match outcome {
            Ok(placed) => {
                tx.commit().await?;
                tracing::info!(
                    order_id = placed.order.id,
                    user_id = placed.order.user_id,
                    warehouse_id = cart.warehouse_id,
                    items = placed.items.len(),
                    total_price = %placed.order.total_price,
                    "order created"
                );
                Ok(placed)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(cart_id = cart.id, error = %rollback, "rollback failed");
                }
                tracing::info!(cart_id = cart.id, error = %err, "order aborted");
                Err(err)
            }
        }
    }

    /// Orders of a user, newest first, optionally filtered by status
    pub async fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        self.store.orders_for_user(user_id, status).await
    }

    /// Items of an existing order
    pub async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        self.store.get_order(order_id).await?;
        self.store.order_items(order_id).await
    }

    pub async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let order = self.store.update_order_status(order_id, status).await?;
        tracing::info!(order_id, status = %status, "order status updated");
        Ok(order)
    }

    pub async fn clear_cart(&self, cart_id: CartId) -> Result<(), StoreError> {
        self.store.clear_cart(cart_id).await
    }
}

async fn write_order<T: OrderTransaction>(
    tx: &mut T,
    request: &CreateOrderRequest,
    cart: &Cart,
    total_price: Decimal,
) -> Result<PlacedOrder, OrderError> {
    let order = tx
        .insert_order(NewOrder {
            user_id: request.user_id,
            status: request.status,
            total_price,
            shipping_cost: request.shipping_cost,
        })
        .await?;

    let mut items = Vec::with_capacity(cart.items.len());
    for line in &cart.items {
        let item = tx
            .insert_order_item(NewOrderItem {
                order_id: order.id,
                product_id: line.product_id,
                quantity: line.quantity,
                sub_total: line.sub_total,
            })
            .await?;

        let key = StockKey::new(cart.warehouse_id, line.product_id);
        let remaining = locked_decrease(tx, key, line.quantity).await?;
        tracing::debug!(
            order_id = order.id,
            warehouse_id = key.warehouse_id,
            product_id = key.product_id,
            remaining,
            "stock reserved"
        );
        items.push(item);
    }

    Ok(PlacedOrder { order, items })
}
