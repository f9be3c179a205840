//! Storage capability traits
//!
//! The coordinator and the ledger only talk to storage through these traits.
//! A backend provides transactions with an exclusive, transaction-scoped row
//! lock keyed by [`StockKey`]; how that lock is realised (`SELECT ... FOR
//! UPDATE`, an in-process mutex, ...) is the backend's business.

use async_trait::async_trait;
use std::time::Duration;

use crate::core::error::{StoreError, TransactionError};
use crate::core::model::{
    Cart, CartId, CartItemUpdate, CartLineItem, NewCartItem, NewOrder, NewOrderItem, NewStock,
    Order, OrderId, OrderItem, OrderStatus, Quantity, StockKey, UserId, WarehouseId,
    WarehouseStock,
};

/// Wait for a stock row lock before giving up with a conflict
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Isolation level requested when opening a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    #[default]
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Exclusive row lock on stock rows, scoped to an open transaction
#[async_trait]
pub trait StockRowLock: Send {
    /// Lock the row and return its current quantity, or `None` when no such
    /// row exists.
    ///
    /// Blocks while another transaction holds the lock. The lock is held until
    /// this transaction commits, rolls back or is dropped.
    async fn lock_stock_row(&mut self, key: StockKey) -> Result<Option<Quantity>, StoreError>;

    /// Write a new quantity to a row previously locked by this transaction
    async fn write_stock_row(&mut self, key: StockKey, quantity: Quantity)
    -> Result<(), StoreError>;
}

/// The transaction handle used by order creation
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes and releases every lock it holds.
#[async_trait]
pub trait OrderTransaction: StockRowLock {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError>;

    async fn insert_order_item(&mut self, item: NewOrderItem) -> Result<OrderItem, StoreError>;

    async fn commit(self) -> Result<(), TransactionError>;

    async fn rollback(self) -> Result<(), TransactionError>;
}

#[async_trait]
pub trait TransactionProvider: Send + Sync {
    type Tx: OrderTransaction + 'static;

    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Tx, TransactionError>;
}

/// Stock rows outside of order transactions
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Fails with `AlreadyExists` when the (warehouse, product) pair exists
    async fn create_stock(&self, stock: NewStock) -> Result<WarehouseStock, StoreError>;

    async fn get_stock(&self, key: StockKey) -> Result<WarehouseStock, StoreError>;

    async fn list_stock(&self) -> Result<Vec<WarehouseStock>, StoreError>;

    async fn list_stock_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<WarehouseStock>, StoreError>;

    /// Unconditional single-statement overwrite
    ///
    /// Takes no lock beyond the statement itself. Fails with `NotFound` when
    /// no row was affected.
    async fn set_quantity(
        &self,
        key: StockKey,
        quantity: Quantity,
    ) -> Result<WarehouseStock, StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn create_cart(
        &self,
        user_id: UserId,
        warehouse_id: WarehouseId,
    ) -> Result<Cart, StoreError>;

    async fn add_cart_item(
        &self,
        cart_id: CartId,
        item: NewCartItem,
    ) -> Result<CartLineItem, StoreError>;

    /// The cart with its line items in insertion order
    async fn cart(&self, cart_id: CartId) -> Result<Cart, StoreError>;

    async fn update_cart_item(&self, update: &CartItemUpdate) -> Result<CartLineItem, StoreError>;

    /// Remove every line item of the cart
    async fn clear_cart(&self, cart_id: CartId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderReader: Send + Sync {
    async fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError>;

    /// Newest first
    async fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError>;

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError>;
}

/// Everything a full backend provides
pub trait Store:
    TransactionProvider + StockStore + CartStore + OrderReader + Send + Sync + 'static
{
}

impl<T> Store for T where
    T: TransactionProvider + StockStore + CartStore + OrderReader + Send + Sync + 'static
{
}
