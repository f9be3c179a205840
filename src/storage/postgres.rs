//! PostgreSQL storage backend using sqlx.
//!
//! The stock row lock is `SELECT ... FOR UPDATE` inside the order
//! transaction; `SET LOCAL lock_timeout` bounds how long a transaction waits
//! for it.
//!
//! # Feature flag
//!
//! This module is gated behind the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! stockpile-rs = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Errors
//!
//! SQLSTATE `40001` (serialization failure), `40P01` (deadlock) and `55P03`
//! (lock not available) surface as conflicts the caller may retry. `23505`
//! (unique violation) surfaces as `AlreadyExists`.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};
use std::time::Duration;

use crate::core::error::{NotFoundError, StoreError, TransactionError};
use crate::core::model::{
    Cart, CartId, CartItemUpdate, CartLineItem, NewCartItem, NewOrder, NewOrderItem, NewStock,
    Order, OrderId, OrderItem, OrderStatus, Quantity, StockKey, UserId, WarehouseId,
    WarehouseStock,
};
use crate::core::store::{
    CartStore, DEFAULT_LOCK_TIMEOUT, IsolationLevel, OrderReader, OrderTransaction, StockRowLock,
    StockStore, TransactionProvider,
};

const BACKEND: &str = "postgres";

const STOCK_COLUMNS: &str = "id, warehouse_id, product_id, quantity, created_at, updated_at";
const CART_ITEM_COLUMNS: &str = "id, product_id, quantity, sub_total";
const ORDER_COLUMNS: &str = "id, user_id, status, total_price, shipping_cost, created_at, updated_at";
const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, product_id, quantity, sub_total, created_at, updated_at";

// ---------------------------------------------------------------------------
// Schema management
// ---------------------------------------------------------------------------

const SCHEMA: &[(&str, &str)] = &[
    (
        "warehouse_stock",
        "CREATE TABLE IF NOT EXISTS warehouse_stock (
            id BIGSERIAL PRIMARY KEY,
            warehouse_id BIGINT NOT NULL,
            product_id BIGINT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (warehouse_id, product_id)
        )",
    ),
    (
        "carts",
        "CREATE TABLE IF NOT EXISTS carts (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            warehouse_id BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "cart_items",
        "CREATE TABLE IF NOT EXISTS cart_items (
            id BIGSERIAL PRIMARY KEY,
            cart_id BIGINT NOT NULL REFERENCES carts(id) ON DELETE CASCADE,
            product_id BIGINT NOT NULL,
            quantity INTEGER NOT NULL,
            sub_total NUMERIC(12, 2) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "orders",
        "CREATE TABLE IF NOT EXISTS orders (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            status VARCHAR(20) NOT NULL
                CHECK (status IN ('pending', 'processed', 'shipped', 'delivered', 'cancelled')),
            total_price NUMERIC(12, 2) NOT NULL,
            shipping_cost NUMERIC(12, 2) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "order_items",
        "CREATE TABLE IF NOT EXISTS order_items (
            id BIGSERIAL PRIMARY KEY,
            order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id BIGINT NOT NULL,
            quantity INTEGER NOT NULL,
            sub_total NUMERIC(12, 2) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "idx_cart_items_cart",
        "CREATE INDEX IF NOT EXISTS idx_cart_items_cart ON cart_items (cart_id)",
    ),
    (
        "idx_orders_user",
        "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id, created_at DESC)",
    ),
    (
        "idx_order_items_order",
        "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items (order_id)",
    ),
];

/// Apply the required tables and indexes (idempotent).
///
/// Safe to call on every startup.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for (name, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow!("Failed to create {}: {}", name, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("40001") | Some("40P01") | Some("55P03") => {
                return StoreError::Conflict(db.message().to_string());
            }
            Some("23505") => {
                return StoreError::AlreadyExists {
                    entity: "row",
                    message: db.message().to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Backend {
        backend: BACKEND,
        message: err.to_string(),
    }
}

fn transaction_error(err: sqlx::Error, wrap: fn(String) -> TransactionError) -> TransactionError {
    match store_error(err) {
        StoreError::Conflict(message) => TransactionError::Conflict { message },
        other => wrap(other.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    status: String,
    total_price: Decimal,
    shipping_cost: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, StoreError> {
        let status = row.status.parse().map_err(|_| StoreError::Backend {
            backend: BACKEND,
            message: format!("order {} has unknown status '{}'", row.id, row.status),
        })?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            status,
            total_price: row.total_price,
            shipping_cost: row.shipping_cost,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    user_id: UserId,
    warehouse_id: WarehouseId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartRow {
    fn with_items(self, items: Vec<CartLineItem>) -> Cart {
        Cart {
            id: self.id,
            user_id: self.user_id,
            warehouse_id: self.warehouse_id,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Storage backed by a `sqlx::PgPool`
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Create a new `PostgresStore` with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_lock_timeout(pool, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// An open PostgreSQL transaction
///
/// Dropping it without commit returns the connection to the pool with the
/// transaction rolled back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    pool: PgPool,
    backend_pid: i32,
    /// Set while a `FOR UPDATE` is outstanding. Still set at rollback when the
    /// caller dropped the lock wait (cancellation or deadline).
    lock_wait: bool,
}

impl PostgresTransaction {
    /// Cancel the statement still running on this transaction's backend so
    /// `ROLLBACK` does not queue behind a lock wait
    async fn cancel_lock_wait(&self) {
        let cancelled = sqlx::query("SELECT pg_cancel_backend($1)")
            .bind(self.backend_pid)
            .execute(&self.pool)
            .await;
        match cancelled {
            Ok(_) => tracing::debug!(backend_pid = self.backend_pid, "interrupted lock wait cancelled"),
            Err(e) => tracing::warn!(
                backend_pid = self.backend_pid,
                error = %e,
                "failed to cancel interrupted lock wait"
            ),
        }
    }
}

#[async_trait]
impl TransactionProvider for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self, isolation: IsolationLevel) -> Result<PostgresTransaction, TransactionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| transaction_error(e, |message| TransactionError::Begin { message }))?;

        // Must be the first statement of the transaction
        let isolation_sql = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&isolation_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| transaction_error(e, |message| TransactionError::Begin { message }))?;

        let timeout_sql = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&timeout_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| transaction_error(e, |message| TransactionError::Begin { message }))?;

        let (backend_pid,): (i32,) = sqlx::query_as("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| transaction_error(e, |message| TransactionError::Begin { message }))?;

        Ok(PostgresTransaction {
            tx,
            pool: self.pool.clone(),
            backend_pid,
            lock_wait: false,
        })
    }
}

#[async_trait]
impl StockRowLock for PostgresTransaction {
    async fn lock_stock_row(&mut self, key: StockKey) -> Result<Option<Quantity>, StoreError> {
        self.lock_wait = true;
        let row: Result<Option<(Quantity,)>, sqlx::Error> = sqlx::query_as(
            "SELECT quantity FROM warehouse_stock
             WHERE warehouse_id = $1 AND product_id = $2
             FOR UPDATE",
        )
        .bind(key.warehouse_id)
        .bind(key.product_id)
        .fetch_optional(&mut *self.tx)
        .await;
        self.lock_wait = false;

        Ok(row.map_err(store_error)?.map(|(quantity,)| quantity))
    }

    async fn write_stock_row(
        &mut self,
        key: StockKey,
        quantity: Quantity,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE warehouse_stock SET quantity = $3, updated_at = NOW()
             WHERE warehouse_id = $1 AND product_id = $2",
        )
        .bind(key.warehouse_id)
        .bind(key.product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(NotFoundError::stock(key).into());
        }
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let sql = format!(
            "INSERT INTO orders (user_id, status, total_price, shipping_cost)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            ORDER_COLUMNS
        );
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(order.user_id)
            .bind(order.status.as_str())
            .bind(order.total_price)
            .bind(order.shipping_cost)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_error)?;
        row.try_into()
    }

    async fn insert_order_item(&mut self, item: NewOrderItem) -> Result<OrderItem, StoreError> {
        let sql = format!(
            "INSERT INTO order_items (order_id, product_id, quantity, sub_total)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            ORDER_ITEM_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.sub_total)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_error)
    }

    async fn commit(self) -> Result<(), TransactionError> {
        self.tx
            .commit()
            .await
            .map_err(|e| transaction_error(e, |message| TransactionError::Commit { message }))
    }

    async fn rollback(self) -> Result<(), TransactionError> {
        if self.lock_wait {
            self.cancel_lock_wait().await;
        }
        self.tx
            .rollback()
            .await
            .map_err(|e| transaction_error(e, |message| TransactionError::Rollback { message }))
    }
}

#[async_trait]
impl StockStore for PostgresStore {
    async fn create_stock(&self, stock: NewStock) -> Result<WarehouseStock, StoreError> {
        let sql = format!(
            "INSERT INTO warehouse_stock (warehouse_id, product_id, quantity)
             VALUES ($1, $2, $3)
             RETURNING {}",
            STOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(stock.warehouse_id)
            .bind(stock.product_id)
            .bind(stock.quantity)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match store_error(e) {
                StoreError::AlreadyExists { .. } => StoreError::AlreadyExists {
                    entity: "warehouse stock",
                    message: StockKey::new(stock.warehouse_id, stock.product_id).to_string(),
                },
                other => other,
            })
    }

    async fn get_stock(&self, key: StockKey) -> Result<WarehouseStock, StoreError> {
        let sql = format!(
            "SELECT {} FROM warehouse_stock WHERE warehouse_id = $1 AND product_id = $2",
            STOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(key.warehouse_id)
            .bind(key.product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or_else(|| NotFoundError::stock(key).into())
    }

    async fn list_stock(&self) -> Result<Vec<WarehouseStock>, StoreError> {
        let sql = format!(
            "SELECT {} FROM warehouse_stock ORDER BY warehouse_id, product_id",
            STOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn list_stock_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<WarehouseStock>, StoreError> {
        let sql = format!(
            "SELECT {} FROM warehouse_stock WHERE warehouse_id = $1 ORDER BY product_id",
            STOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(warehouse_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn set_quantity(
        &self,
        key: StockKey,
        quantity: Quantity,
    ) -> Result<WarehouseStock, StoreError> {
        let sql = format!(
            "UPDATE warehouse_stock SET quantity = $3, updated_at = NOW()
             WHERE warehouse_id = $1 AND product_id = $2
             RETURNING {}",
            STOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(key.warehouse_id)
            .bind(key.product_id)
            .bind(quantity)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or_else(|| NotFoundError::stock(key).into())
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn create_cart(
        &self,
        user_id: UserId,
        warehouse_id: WarehouseId,
    ) -> Result<Cart, StoreError> {
        let row: CartRow = sqlx::query_as(
            "INSERT INTO carts (user_id, warehouse_id) VALUES ($1, $2)
             RETURNING id, user_id, warehouse_id, created_at, updated_at",
        )
        .bind(user_id)
        .bind(warehouse_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(row.with_items(Vec::new()))
    }

    async fn add_cart_item(
        &self,
        cart_id: CartId,
        item: NewCartItem,
    ) -> Result<CartLineItem, StoreError> {
        let sql = format!(
            "INSERT INTO cart_items (cart_id, product_id, quantity, sub_total)
             SELECT $1, $2, $3, $4 WHERE EXISTS (SELECT 1 FROM carts WHERE id = $1)
             RETURNING {}",
            CART_ITEM_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(cart_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.sub_total)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or(StoreError::NotFound(NotFoundError::Cart { cart_id }))
    }

    async fn cart(&self, cart_id: CartId) -> Result<Cart, StoreError> {
        let row: CartRow = sqlx::query_as(
            "SELECT id, user_id, warehouse_id, created_at, updated_at FROM carts WHERE id = $1",
        )
        .bind(cart_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?
        .ok_or(StoreError::NotFound(NotFoundError::Cart { cart_id }))?;

        let sql = format!(
            "SELECT {} FROM cart_items WHERE cart_id = $1 ORDER BY id",
            CART_ITEM_COLUMNS
        );
        let items = sqlx::query_as(&sql)
            .bind(cart_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(row.with_items(items))
    }

    async fn update_cart_item(&self, update: &CartItemUpdate) -> Result<CartLineItem, StoreError> {
        let sql = format!(
            "UPDATE cart_items SET quantity = $2, sub_total = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            CART_ITEM_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(update.id)
            .bind(update.quantity)
            .bind(update.sub_total)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or(StoreError::NotFound(NotFoundError::CartItem { item_id: update.id }))
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<(), StoreError> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM carts WHERE id = $1")
            .bind(cart_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        if exists.is_none() {
            return Err(NotFoundError::Cart { cart_id }.into());
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl OrderReader for PostgresStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or(StoreError::NotFound(NotFoundError::Order { order_id }))?;
        row.try_into()
    }

    async fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders
             WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY created_at DESC, id DESC",
            ORDER_COLUMNS
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let sql = format!(
            "SELECT {} FROM order_items WHERE order_id = $1 ORDER BY id",
            ORDER_ITEM_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let sql = format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ORDER_COLUMNS
        );
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(order_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .ok_or(StoreError::NotFound(NotFoundError::Order { order_id }))?;
        row.try_into()
    }
}
