//! In-memory storage backend for testing and development
//!
//! Tables live behind a `RwLock`. Row locks are per-key `tokio::sync::Mutex`es
//! whose owned guards travel with the transaction, so a second transaction
//! locking the same row waits until the first commits, rolls back or is
//! dropped. Transaction writes are buffered and applied at commit.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::core::error::{NotFoundError, StoreError, TransactionError};
use crate::core::model::{
    Cart, CartId, CartItemId, CartItemUpdate, CartLineItem, NewCartItem, NewOrder, NewOrderItem,
    NewStock, Order, OrderId, OrderItem, OrderStatus, Quantity, StockKey, UserId, WarehouseId,
    WarehouseStock,
};
use crate::core::store::{
    CartStore, DEFAULT_LOCK_TIMEOUT, IsolationLevel, OrderReader, OrderTransaction, StockRowLock,
    StockStore, TransactionProvider,
};

const BACKEND: &str = "in-memory";

#[derive(Debug, Clone)]
struct CartRow {
    user_id: UserId,
    warehouse_id: WarehouseId,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CartItemRow {
    cart_id: CartId,
    item: CartLineItem,
}

#[derive(Default)]
struct Tables {
    stock: BTreeMap<StockKey, WarehouseStock>,
    carts: HashMap<CartId, CartRow>,
    // Keyed by id, so iteration follows insertion order
    cart_items: BTreeMap<CartItemId, CartItemRow>,
    orders: BTreeMap<OrderId, Order>,
    order_items: BTreeMap<i64, OrderItem>,
}

#[derive(Default)]
struct Sequences {
    stock: AtomicI64,
    cart: AtomicI64,
    cart_item: AtomicI64,
    order: AtomicI64,
    order_item: AtomicI64,
}

fn next(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<StockKey, Arc<tokio::sync::Mutex<()>>>>,
    ids: Sequences,
    lock_timeout: Duration,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|e| StoreError::Backend {
            backend: BACKEND,
            message: format!("Failed to acquire read lock: {}", e),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|e| StoreError::Backend {
            backend: BACKEND,
            message: format!("Failed to acquire write lock: {}", e),
        })
    }

    /// Lock entry of an existing stock row
    ///
    /// Rows are never deleted, so the lock table is bounded by the number of
    /// stock rows. Missing keys get no entry.
    fn row_lock(&self, key: StockKey) -> Result<Option<Arc<tokio::sync::Mutex<()>>>, StoreError> {
        if !self.read()?.stock.contains_key(&key) {
            return Ok(None);
        }
        let mut locks = self.row_locks.lock().map_err(|e| StoreError::Backend {
            backend: BACKEND,
            message: format!("Failed to acquire row lock table: {}", e),
        })?;
        Ok(Some(locks.entry(key).or_default().clone()))
    }

    /// `None` when the row does not exist
    async fn lock_row(&self, key: StockKey) -> Result<Option<OwnedMutexGuard<()>>, StoreError> {
        let Some(mutex) = self.row_lock(key)? else {
            return Ok(None);
        };
        tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map(Some)
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "lock wait timeout after {}ms on stock row {}",
                    self.lock_timeout.as_millis(),
                    key
                ))
            })
    }
}

/// In-memory store implementing every storage capability
///
/// Cloning is cheap and clones share the same tables.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                ids: Sequences::default(),
                lock_timeout,
            }),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Buffered transaction holding row locks until it ends
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<StockKey, OwnedMutexGuard<()>>,
    stock_writes: HashMap<StockKey, Quantity>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
}

#[async_trait]
impl TransactionProvider for InMemoryStore {
    type Tx = InMemoryTransaction;

    /// Every level behaves as serializable here: stock rows are only read
    /// under their lock and nothing else is read inside the transaction.
    async fn begin(&self, _isolation: IsolationLevel) -> Result<InMemoryTransaction, TransactionError> {
        Ok(InMemoryTransaction {
            shared: self.shared.clone(),
            held: HashMap::new(),
            stock_writes: HashMap::new(),
            orders: Vec::new(),
            items: Vec::new(),
        })
    }
}

#[async_trait]
impl StockRowLock for InMemoryTransaction {
    async fn lock_stock_row(&mut self, key: StockKey) -> Result<Option<Quantity>, StoreError> {
        if let Some(pending) = self.stock_writes.get(&key) {
            return Ok(Some(*pending));
        }
        if !self.held.contains_key(&key) {
            match self.shared.lock_row(key).await? {
                Some(guard) => {
                    self.held.insert(key, guard);
                }
                None => return Ok(None),
            }
        }
        // Read after the lock is ours so a previous holder's commit is visible
        let tables = self.shared.read()?;
        Ok(tables.stock.get(&key).map(|row| row.quantity))
    }

    async fn write_stock_row(
        &mut self,
        key: StockKey,
        quantity: Quantity,
    ) -> Result<(), StoreError> {
        if !self.held.contains_key(&key) {
            return Err(StoreError::Backend {
                backend: BACKEND,
                message: format!("stock row {} is not locked by this transaction", key),
            });
        }
        self.stock_writes.insert(key, quantity);
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let now = Utc::now();
        let order = Order {
            id: next(&self.shared.ids.order),
            user_id: order.user_id,
            status: order.status,
            total_price: order.total_price,
            shipping_cost: order.shipping_cost,
            created_at: now,
            updated_at: now,
        };
        self.orders.push(order.clone());
        Ok(order)
    }

    async fn insert_order_item(&mut self, item: NewOrderItem) -> Result<OrderItem, StoreError> {
        if !self.orders.iter().any(|o| o.id == item.order_id) {
            return Err(NotFoundError::Order {
                order_id: item.order_id,
            }
            .into());
        }
        let now = Utc::now();
        let item = OrderItem {
            id: next(&self.shared.ids.order_item),
            order_id: item.order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            sub_total: item.sub_total,
            created_at: now,
            updated_at: now,
        };
        self.items.push(item.clone());
        Ok(item)
    }

    async fn commit(self) -> Result<(), TransactionError> {
        let mut tables = self
            .shared
            .write()
            .map_err(|e| TransactionError::Commit {
                message: e.to_string(),
            })?;

        // Check before mutating so a failed commit applies nothing
        if let Some(missing) = self
            .stock_writes
            .keys()
            .find(|key| !tables.stock.contains_key(key))
        {
            return Err(TransactionError::Commit {
                message: format!("stock row {} disappeared", missing),
            });
        }

        let now = Utc::now();
        for (key, quantity) in &self.stock_writes {
            if let Some(row) = tables.stock.get_mut(key) {
                row.quantity = *quantity;
                row.updated_at = now;
            }
        }
        for order in self.orders {
            tables.orders.insert(order.id, order);
        }
        for item in self.items {
            tables.order_items.insert(item.id, item);
        }
        Ok(())
        // row locks in `held` are released here
    }

    async fn rollback(self) -> Result<(), TransactionError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stock
// ---------------------------------------------------------------------------

#[async_trait]
impl StockStore for InMemoryStore {
    async fn create_stock(&self, stock: NewStock) -> Result<WarehouseStock, StoreError> {
        let key = StockKey::new(stock.warehouse_id, stock.product_id);
        let mut tables = self.shared.write()?;
        if tables.stock.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                entity: "warehouse stock",
                message: key.to_string(),
            });
        }
        let now = Utc::now();
        let row = WarehouseStock {
            id: next(&self.shared.ids.stock),
            warehouse_id: stock.warehouse_id,
            product_id: stock.product_id,
            quantity: stock.quantity,
            created_at: now,
            updated_at: now,
        };
        tables.stock.insert(key, row.clone());
        Ok(row)
    }

    async fn get_stock(&self, key: StockKey) -> Result<WarehouseStock, StoreError> {
        let tables = self.shared.read()?;
        tables
            .stock
            .get(&key)
            .cloned()
            .ok_or_else(|| NotFoundError::stock(key).into())
    }

    async fn list_stock(&self) -> Result<Vec<WarehouseStock>, StoreError> {
        let tables = self.shared.read()?;
        Ok(tables.stock.values().cloned().collect())
    }

    async fn list_stock_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<WarehouseStock>, StoreError> {
        let tables = self.shared.read()?;
        Ok(tables
            .stock
            .values()
            .filter(|row| row.warehouse_id == warehouse_id)
            .cloned()
            .collect())
    }

    async fn set_quantity(
        &self,
        key: StockKey,
        quantity: Quantity,
    ) -> Result<WarehouseStock, StoreError> {
        // A single-row UPDATE still waits for a transaction holding the row
        let _row = self
            .shared
            .lock_row(key)
            .await?
            .ok_or_else(|| StoreError::from(NotFoundError::stock(key)))?;
        let mut tables = self.shared.write()?;
        let row = tables
            .stock
            .get_mut(&key)
            .ok_or_else(|| StoreError::from(NotFoundError::stock(key)))?;
        row.quantity = quantity;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

// ---------------------------------------------------------------------------
// Carts
// ---------------------------------------------------------------------------

impl Tables {
    fn assemble_cart(&self, cart_id: CartId) -> Result<Cart, StoreError> {
        let row = self
            .carts
            .get(&cart_id)
            .ok_or(StoreError::NotFound(NotFoundError::Cart { cart_id }))?;
        Ok(Cart {
            id: cart_id,
            user_id: row.user_id,
            warehouse_id: row.warehouse_id,
            items: self
                .cart_items
                .values()
                .filter(|r| r.cart_id == cart_id)
                .map(|r| r.item.clone())
                .collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn create_cart(
        &self,
        user_id: UserId,
        warehouse_id: WarehouseId,
    ) -> Result<Cart, StoreError> {
        let now = Utc::now();
        let id = next(&self.shared.ids.cart);
        let mut tables = self.shared.write()?;
        tables.carts.insert(
            id,
            CartRow {
                user_id,
                warehouse_id,
                created_at: now,
                updated_at: now,
            },
        );
        tables.assemble_cart(id)
    }

    async fn add_cart_item(
        &self,
        cart_id: CartId,
        item: NewCartItem,
    ) -> Result<CartLineItem, StoreError> {
        let mut tables = self.shared.write()?;
        let cart = tables
            .carts
            .get_mut(&cart_id)
            .ok_or(StoreError::NotFound(NotFoundError::Cart { cart_id }))?;
        cart.updated_at = Utc::now();

        let line = CartLineItem {
            id: next(&self.shared.ids.cart_item),
            product_id: item.product_id,
            quantity: item.quantity,
            sub_total: item.sub_total,
        };
        tables.cart_items.insert(
            line.id,
            CartItemRow {
                cart_id,
                item: line.clone(),
            },
        );
        Ok(line)
    }

    async fn cart(&self, cart_id: CartId) -> Result<Cart, StoreError> {
        self.shared.read()?.assemble_cart(cart_id)
    }

    async fn update_cart_item(&self, update: &CartItemUpdate) -> Result<CartLineItem, StoreError> {
        let mut tables = self.shared.write()?;
        let row = tables
            .cart_items
            .get_mut(&update.id)
            .ok_or(StoreError::NotFound(NotFoundError::CartItem { item_id: update.id }))?;
        row.item.quantity = update.quantity;
        row.item.sub_total = update.sub_total;
        Ok(row.item.clone())
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<(), StoreError> {
        let mut tables = self.shared.write()?;
        if !tables.carts.contains_key(&cart_id) {
            return Err(NotFoundError::Cart { cart_id }.into());
        }
        tables.cart_items.retain(|_, row| row.cart_id != cart_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderReader for InMemoryStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError> {
        let tables = self.shared.read()?;
        tables
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| NotFoundError::Order { order_id }.into())
    }

    async fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        let tables = self.shared.read()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let tables = self.shared.read()?;
        Ok(tables
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut tables = self.shared.write()?;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound(NotFoundError::Order { order_id }))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}
