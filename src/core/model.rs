//! Domain rows for stock, carts and orders
//!
//! These are plain data carriers. Invariants that involve more than one row
//! (non-negative stock, order totals) are enforced by the ledger and the order
//! coordinator, not by the types themselves.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::core::error::ValidationError;

pub type WarehouseId = i64;
pub type ProductId = i64;
pub type UserId = i64;
pub type CartId = i64;
pub type CartItemId = i64;
pub type OrderId = i64;
pub type OrderItemId = i64;

/// Stock quantities are whole units.
pub type Quantity = i32;

/// Largest money amount a row can hold (`NUMERIC(12, 2)`)
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

// =============================================================================
// Stock
// =============================================================================

/// Identity of a stock row: one (warehouse, product) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(warehouse_id: WarehouseId, product_id: ProductId) -> Self {
        Self {
            warehouse_id,
            product_id,
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "warehouse_id={} product_id={}",
            self.warehouse_id, self.product_id
        )
    }
}

/// Persisted quantity of one product in one warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct WarehouseStock {
    pub id: i64,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WarehouseStock {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id, self.product_id)
    }
}

/// Input for creating a stock row
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewStock {
    #[validate(range(min = 1, message = "warehouse id is required"))]
    pub warehouse_id: WarehouseId,
    #[validate(range(min = 1, message = "product id is required"))]
    pub product_id: ProductId,
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: Quantity,
}

/// One unconditional quantity correction for the batch updater
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub quantity: Quantity,
}

impl StockUpdate {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id, self.product_id)
    }
}

// =============================================================================
// Carts
// =============================================================================

/// A cart belongs to one (user, warehouse) pair.
///
/// `items` keeps insertion order; the order coordinator walks it in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub warehouse_id: WarehouseId,
    pub items: Vec<CartLineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Sum of the captured subtotals. Prices are not looked up again.
    ///
    /// `None` when the sum overflows `Decimal`.
    pub fn total(&self) -> Option<Decimal> {
        self.items
            .iter()
            .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.sub_total))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct CartLineItem {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub sub_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCartItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub sub_total: Decimal,
}

/// Correction of a single cart line, applied by the batch updater
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartItemUpdate {
    #[validate(range(min = 1, message = "invalid item id"))]
    pub id: CartItemId,
    #[validate(range(min = 1, message = "quantity must be greater than zero"))]
    pub quantity: Quantity,
    #[validate(custom(
        function = "money_amount",
        message = "subtotal must be between 0 and 9999999999.99"
    ))]
    pub sub_total: Decimal,
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processed => "processed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::field("status", "order status is required"));
        }
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                ValidationError::field(
                    "status",
                    "invalid status: must be 'pending', 'processed', 'shipped', 'delivered', or 'cancelled'",
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub shipping_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order row before the store assigns its identity
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub shipping_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub sub_total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub sub_total: Decimal,
}

/// A committed order together with the items written in the same transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

pub(crate) fn money_amount(value: &Decimal) -> Result<(), validator::ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(validator::ValidationError::new("negative_amount"));
    }
    if *value > MAX_AMOUNT {
        return Err(validator::ValidationError::new("amount_too_large"));
    }
    Ok(())
}
