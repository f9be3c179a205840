//! Stock Ledger
//!
//! The only component that mutates stock rows. Two write paths exist:
//!
//! - [`locked_decrease`] runs inside a caller-supplied transaction, locks the
//!   row before reading it and never drives the quantity below zero.
//! - [`StockLedger::set_quantity`] is an unconditional overwrite without a
//!   row lock. Concurrent overwrites of the same row are last-write-wins.

use std::sync::Arc;

use crate::core::error::{NotFoundError, StockError, ValidationError};
use crate::core::model::{NewStock, Quantity, StockKey, WarehouseId, WarehouseStock};
use crate::core::store::{StockRowLock, StockStore};
use validator::Validate;

/// Decrease a stock row by `amount` under the transaction's row lock
///
/// Returns the remaining quantity. On `NotFound` or `Insufficient` the row is
/// left untouched, but its lock stays held until the transaction ends.
pub async fn locked_decrease<T>(
    tx: &mut T,
    key: StockKey,
    amount: Quantity,
) -> Result<Quantity, StockError>
where
    T: StockRowLock + ?Sized,
{
    if amount <= 0 {
        return Err(ValidationError::field("quantity", "quantity must be greater than zero").into());
    }

    let available = tx
        .lock_stock_row(key)
        .await?
        .ok_or_else(|| StockError::NotFound(NotFoundError::stock(key)))?;

    if available < amount {
        tracing::debug!(
            warehouse_id = key.warehouse_id,
            product_id = key.product_id,
            requested = amount,
            available,
            "insufficient stock"
        );
        return Err(StockError::Insufficient {
            key,
            requested: amount,
            available,
        });
    }

    let remaining = available - amount;
    tx.write_stock_row(key, remaining).await?;
    Ok(remaining)
}

/// Stock row operations that run outside of an order transaction
pub struct StockLedger<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for StockLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> StockLedger<S>
where
    S: StockStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create(&self, stock: NewStock) -> Result<WarehouseStock, StockError> {
        stock.validate().map_err(ValidationError::from)?;
        let created = self.store.create_stock(stock).await?;
        tracing::info!(
            warehouse_id = created.warehouse_id,
            product_id = created.product_id,
            quantity = created.quantity,
            "stock row created"
        );
        Ok(created)
    }

    /// Overwrite the quantity of an existing row
    ///
    /// Applying the same value twice leaves the same state as applying it once.
    pub async fn set_quantity(
        &self,
        key: StockKey,
        quantity: Quantity,
    ) -> Result<WarehouseStock, StockError> {
        if quantity < 0 {
            return Err(ValidationError::field("quantity", "quantity cannot be negative").into());
        }
        Ok(self.store.set_quantity(key, quantity).await?)
    }

    pub async fn get(&self, key: StockKey) -> Result<WarehouseStock, StockError> {
        Ok(self.store.get_stock(key).await?)
    }

    /// Every stock row, ordered by warehouse then product
    pub async fn list(&self) -> Result<Vec<WarehouseStock>, StockError> {
        Ok(self.store.list_stock().await?)
    }

    pub async fn list_for_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<WarehouseStock>, StockError> {
        Ok(self.store.list_stock_by_warehouse(warehouse_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::StoreError;
    use crate::core::store::{IsolationLevel, OrderTransaction, TransactionProvider};
    use crate::storage::InMemoryStore;

    async fn seeded(quantity: Quantity) -> (Arc<InMemoryStore>, StockKey) {
        let store = Arc::new(InMemoryStore::new());
        let stock = store
            .create_stock(NewStock {
                warehouse_id: 1,
                product_id: 7,
                quantity,
            })
            .await
            .unwrap();
        (store, stock.key())
    }

    #[tokio::test]
    async fn test_locked_decrease_returns_remaining() {
        let (store, key) = seeded(10).await;

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let remaining = locked_decrease(&mut tx, key, 6).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(remaining, 4);
        assert_eq!(store.get_stock(key).await.unwrap().quantity, 4);
    }

    #[tokio::test]
    async fn test_locked_decrease_to_exactly_zero() {
        let (store, key) = seeded(3).await;

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(locked_decrease(&mut tx, key, 3).await.unwrap(), 0);
        tx.commit().await.unwrap();

        assert_eq!(store.get_stock(key).await.unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn test_insufficient_leaves_row_untouched() {
        let (store, key) = seeded(5).await;

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
        assert_eq!(store.get_stock(key).await.unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let (store, _) = seeded(5).await;
        let missing = StockKey::new(1, 999);

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let err = locked_decrease(&mut tx, missing, 1).await.unwrap_err();

        assert_eq!(err, StockError::NotFound(NotFoundError::stock(missing)));
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_rejected_before_locking() {
        let (store, key) = seeded(5).await;

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        assert!(matches!(
            locked_decrease(&mut tx, key, 0).await,
            Err(StockError::Invalid(_))
        ));
        assert!(matches!(
            locked_decrease(&mut tx, key, -2).await,
            Err(StockError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_set_quantity_is_idempotent() {
        let (store, key) = seeded(5).await;
        let ledger = StockLedger::new(store.clone());

        let once = ledger.set_quantity(key, 42).await.unwrap();
        let twice = ledger.set_quantity(key, 42).await.unwrap();

        assert_eq!(once.quantity, 42);
        assert_eq!(twice.quantity, 42);
        assert_eq!(ledger.get(key).await.unwrap().quantity, 42);
    }

    #[tokio::test]
    async fn test_set_quantity_rejects_negative() {
        let (store, key) = seeded(5).await;
        let ledger = StockLedger::new(store);

        assert!(matches!(
            ledger.set_quantity(key, -1).await,
            Err(StockError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_pair() {
        let (store, key) = seeded(5).await;
        let ledger = StockLedger::new(store);

        let err = ledger
            .create(NewStock {
                warehouse_id: key.warehouse_id,
                product_id: key.product_id,
                quantity: 1,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StockError::Store(StoreError::AlreadyExists { .. })
        ));
    }
}
