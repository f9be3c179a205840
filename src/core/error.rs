//! Typed error handling for stockpile
//!
//! Every failure a caller can act on has its own variant carrying the identity
//! needed to act on it (cart, product, warehouse).
//!
//! # Error Categories
//!
//! - [`ValidationError`]: malformed input, rejected before any transaction opens
//! - [`NotFoundError`]: a cart, stock row, order or cart item does not exist
//! - [`TransactionError`]: begin/commit/rollback, lock conflicts, cancellation
//! - [`StoreError`]: what storage backends return
//! - [`StockError`]: Stock Ledger failures
//! - [`OrderError`]: everything `create_order` can fail with
//! - [`BatchError`]: the only way a batch call fails as a whole
//! - [`StockpileError`]: top-level error for the HTTP layer
//!
//! # Example
//!
//! ```rust,ignore
//! match orders.create_order(request).await {
//!     Ok(placed) => println!("order {}", placed.order.id),
//!     Err(OrderError::InsufficientStock { product_id, available, .. }) => {
//!         println!("only {} left of product {}", available, product_id);
//!     }
//!     Err(e) if e.is_retryable() => { /* try the whole call again */ }
//!     Err(e) => eprintln!("order rejected: {}", e),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

use crate::core::model::{CartId, CartItemId, OrderId, ProductId, Quantity, StockKey, WarehouseId};

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to input validation
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Single field validation error
    FieldError { field: String, message: String },

    /// Multiple field validation errors
    FieldErrors(Vec<FieldValidationError>),
}

/// A single field validation error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::FieldError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Flattened list of offending fields
    pub fn fields(&self) -> Vec<FieldValidationError> {
        match self {
            ValidationError::FieldError { field, message } => vec![FieldValidationError {
                field: field.clone(),
                message: message.clone(),
            }],
            ValidationError::FieldErrors(errors) => errors.clone(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::FieldError { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            ValidationError::FieldErrors(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect();
                write!(f, "Validation errors: {}", msgs.join(", "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldValidationError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldValidationError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        // HashMap order is not stable
        fields.sort_by(|a, b| a.field.cmp(&b.field));

        if fields.len() == 1 {
            let only = fields.remove(0);
            ValidationError::FieldError {
                field: only.field,
                message: only.message,
            }
        } else {
            ValidationError::FieldErrors(fields)
        }
    }
}

// =============================================================================
// Not Found Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum NotFoundError {
    Cart { cart_id: CartId },
    CartItem { item_id: CartItemId },
    StockRow { warehouse_id: WarehouseId, product_id: ProductId },
    Order { order_id: OrderId },
}

impl NotFoundError {
    pub fn stock(key: StockKey) -> Self {
        NotFoundError::StockRow {
            warehouse_id: key.warehouse_id,
            product_id: key.product_id,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NotFoundError::Cart { .. } => "CART_NOT_FOUND",
            NotFoundError::CartItem { .. } => "CART_ITEM_NOT_FOUND",
            NotFoundError::StockRow { .. } => "STOCK_NOT_FOUND",
            NotFoundError::Order { .. } => "ORDER_NOT_FOUND",
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            NotFoundError::Cart { cart_id } => serde_json::json!({ "cart_id": cart_id }),
            NotFoundError::CartItem { item_id } => serde_json::json!({ "item_id": item_id }),
            NotFoundError::StockRow {
                warehouse_id,
                product_id,
            } => serde_json::json!({
                "warehouse_id": warehouse_id,
                "product_id": product_id
            }),
            NotFoundError::Order { order_id } => serde_json::json!({ "order_id": order_id }),
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundError::Cart { cart_id } => write!(f, "cart {} not found", cart_id),
            NotFoundError::CartItem { item_id } => write!(f, "cart item {} not found", item_id),
            NotFoundError::StockRow {
                warehouse_id,
                product_id,
            } => write!(
                f,
                "no stock found for warehouse_id={} and product_id={}",
                warehouse_id, product_id
            ),
            NotFoundError::Order { order_id } => write!(f, "order {} not found", order_id),
        }
    }
}

impl std::error::Error for NotFoundError {}

// =============================================================================
// Transaction Errors
// =============================================================================

/// Failures of the transaction machinery itself.
///
/// Nothing from the failed attempt is persisted, so the whole operation can be
/// retried by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// Could not open a transaction
    Begin { message: String },

    /// Commit failed; the transaction is rolled back
    Commit { message: String },

    /// Rollback failed; the store releases locks when the session ends
    Rollback { message: String },

    /// Lock wait timed out, serialization failure or deadlock
    Conflict { message: String },

    /// Any other backend failure inside the transaction
    Backend { message: String },

    /// Caller cancelled the operation
    Cancelled,

    /// Configured deadline elapsed
    DeadlineExceeded,
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Begin { message } => {
                write!(f, "failed to start transaction: {}", message)
            }
            TransactionError::Commit { message } => {
                write!(f, "failed to commit transaction: {}", message)
            }
            TransactionError::Rollback { message } => {
                write!(f, "failed to roll back transaction: {}", message)
            }
            TransactionError::Conflict { message } => {
                write!(f, "transaction conflict: {}", message)
            }
            TransactionError::Backend { message } => {
                write!(f, "transaction failed: {}", message)
            }
            TransactionError::Cancelled => write!(f, "transaction cancelled"),
            TransactionError::DeadlineExceeded => write!(f, "transaction deadline exceeded"),
        }
    }
}

impl std::error::Error for TransactionError {}

impl TransactionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransactionError::Conflict { .. } => StatusCode::CONFLICT,
            TransactionError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            TransactionError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            TransactionError::Conflict { .. } => "TRANSACTION_CONFLICT",
            TransactionError::Cancelled => "TRANSACTION_CANCELLED",
            TransactionError::DeadlineExceeded => "TRANSACTION_TIMEOUT",
            _ => "TRANSACTION_FAILED",
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors returned by storage backends
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(NotFoundError),

    #[error("{entity} already exists: {message}")]
    AlreadyExists {
        entity: &'static str,
        message: String,
    },

    /// Lock timeout, serialization failure or deadlock
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{backend} error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

impl From<NotFoundError> for StoreError {
    fn from(err: NotFoundError) -> Self {
        StoreError::NotFound(err)
    }
}

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::AlreadyExists { .. } | StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::NotFound(e) => e.error_code(),
            StoreError::AlreadyExists { .. } => "ALREADY_EXISTS",
            StoreError::Conflict(_) => "STORAGE_CONFLICT",
            StoreError::Backend { .. } => "STORAGE_ERROR",
        }
    }

    /// View of this error from inside an open transaction
    pub fn into_transaction_error(self) -> TransactionError {
        match self {
            StoreError::Conflict(message) => TransactionError::Conflict { message },
            other => TransactionError::Backend {
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Stock Errors
// =============================================================================

/// Errors of the Stock Ledger
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StockError {
    #[error("{0}")]
    NotFound(NotFoundError),

    /// The row is left untouched
    #[error(
        "not enough stock for product_id={} in warehouse_id={}: requested {requested}, available {available}",
        key.product_id,
        key.warehouse_id
    )]
    Insufficient {
        key: StockKey,
        requested: Quantity,
        available: Quantity,
    },

    #[error("{0}")]
    Invalid(ValidationError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for StockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(e) => StockError::NotFound(e),
            other => StockError::Store(other),
        }
    }
}

impl From<ValidationError> for StockError {
    fn from(err: ValidationError) -> Self {
        StockError::Invalid(err)
    }
}

impl StockError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StockError::NotFound(_) => StatusCode::NOT_FOUND,
            StockError::Insufficient { .. } => StatusCode::CONFLICT,
            StockError::Invalid(_) => StatusCode::BAD_REQUEST,
            StockError::Store(e) => e.status_code(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StockError::NotFound(e) => e.error_code(),
            StockError::Insufficient { .. } => "INSUFFICIENT_STOCK",
            StockError::Invalid(_) => "VALIDATION_ERROR",
            StockError::Store(e) => e.error_code(),
        }
    }
}

// =============================================================================
// Order Errors
// =============================================================================

/// Everything order creation can fail with
///
/// All variants are returned only after the transaction (if one was opened)
/// has been rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderError {
    Validation(ValidationError),

    EmptyCart {
        cart_id: CartId,
    },

    InsufficientStock {
        warehouse_id: WarehouseId,
        product_id: ProductId,
        requested: Quantity,
        available: Quantity,
    },

    NotFound(NotFoundError),

    Transaction(TransactionError),
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::Validation(e) => write!(f, "{}", e),
            OrderError::EmptyCart { cart_id } => write!(f, "cart {} is empty", cart_id),
            OrderError::InsufficientStock {
                warehouse_id,
                product_id,
                requested,
                available,
            } => write!(
                f,
                "not enough stock for product_id={} in warehouse_id={}: requested {}, available {}",
                product_id, warehouse_id, requested, available
            ),
            OrderError::NotFound(e) => write!(f, "{}", e),
            OrderError::Transaction(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for OrderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrderError::Validation(e) => Some(e),
            OrderError::NotFound(e) => Some(e),
            OrderError::Transaction(e) => Some(e),
            OrderError::EmptyCart { .. } | OrderError::InsufficientStock { .. } => None,
        }
    }
}

impl OrderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::Validation(_) => StatusCode::BAD_REQUEST,
            OrderError::EmptyCart { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OrderError::InsufficientStock { .. } => StatusCode::CONFLICT,
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::Transaction(e) => e.status_code(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "VALIDATION_ERROR",
            OrderError::EmptyCart { .. } => "EMPTY_CART",
            OrderError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            OrderError::NotFound(e) => e.error_code(),
            OrderError::Transaction(e) => e.error_code(),
        }
    }

    /// Only transaction failures leave nothing behind that a plain retry
    /// would trip over; the rest need a corrected request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::Transaction(
                TransactionError::Conflict { .. }
                    | TransactionError::Commit { .. }
                    | TransactionError::Begin { .. }
            )
        )
    }
}

impl From<ValidationError> for OrderError {
    fn from(err: ValidationError) -> Self {
        OrderError::Validation(err)
    }
}

impl From<validator::ValidationErrors> for OrderError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrderError::Validation(err.into())
    }
}

impl From<TransactionError> for OrderError {
    fn from(err: TransactionError) -> Self {
        OrderError::Transaction(err)
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(e) => OrderError::NotFound(e),
            other => OrderError::Transaction(other.into_transaction_error()),
        }
    }
}

impl From<StockError> for OrderError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::NotFound(e) => OrderError::NotFound(e),
            StockError::Insufficient {
                key,
                requested,
                available,
            } => OrderError::InsufficientStock {
                warehouse_id: key.warehouse_id,
                product_id: key.product_id,
                requested,
                available,
            },
            StockError::Invalid(e) => OrderError::Validation(e),
            StockError::Store(e) => e.into(),
        }
    }
}

// =============================================================================
// Batch Errors
// =============================================================================

/// A batch call only fails as a whole for caller errors. Per-item failures
/// are reported inside the batch report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("no items to update")]
    Empty,
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for field '{field}': {message}")]
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },
}

// =============================================================================
// Top-level error
// =============================================================================

/// The error type returned by HTTP handlers
#[derive(Debug)]
pub enum StockpileError {
    Order(OrderError),
    Stock(StockError),
    Store(StoreError),
    Validation(ValidationError),
    Batch(BatchError),
}

impl fmt::Display for StockpileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockpileError::Order(e) => write!(f, "{}", e),
            StockpileError::Stock(e) => write!(f, "{}", e),
            StockpileError::Store(e) => write!(f, "{}", e),
            StockpileError::Validation(e) => write!(f, "{}", e),
            StockpileError::Batch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StockpileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StockpileError::Order(e) => Some(e),
            StockpileError::Stock(e) => Some(e),
            StockpileError::Store(e) => Some(e),
            StockpileError::Validation(e) => Some(e),
            StockpileError::Batch(e) => Some(e),
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StockpileError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            StockpileError::Order(e) => e.status_code(),
            StockpileError::Stock(e) => e.status_code(),
            StockpileError::Store(e) => e.status_code(),
            StockpileError::Validation(_) => StatusCode::BAD_REQUEST,
            StockpileError::Batch(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            StockpileError::Order(e) => e.error_code(),
            StockpileError::Stock(e) => e.error_code(),
            StockpileError::Store(e) => e.error_code(),
            StockpileError::Validation(_) => "VALIDATION_ERROR",
            StockpileError::Batch(_) => "EMPTY_BATCH",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            StockpileError::Order(OrderError::InsufficientStock {
                warehouse_id,
                product_id,
                requested,
                available,
            }) => Some(serde_json::json!({
                "warehouse_id": warehouse_id,
                "product_id": product_id,
                "requested": requested,
                "available": available
            })),
            StockpileError::Stock(StockError::Insufficient {
                key,
                requested,
                available,
            }) => Some(serde_json::json!({
                "warehouse_id": key.warehouse_id,
                "product_id": key.product_id,
                "requested": requested,
                "available": available
            })),
            StockpileError::Order(OrderError::EmptyCart { cart_id }) => {
                Some(serde_json::json!({ "cart_id": cart_id }))
            }
            StockpileError::Order(OrderError::NotFound(e))
            | StockpileError::Stock(StockError::NotFound(e))
            | StockpileError::Store(StoreError::NotFound(e)) => Some(e.details()),
            StockpileError::Order(OrderError::Validation(e))
            | StockpileError::Stock(StockError::Invalid(e))
            | StockpileError::Validation(e) => {
                Some(serde_json::json!({ "fields": e.fields() }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for StockpileError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

impl From<OrderError> for StockpileError {
    fn from(err: OrderError) -> Self {
        StockpileError::Order(err)
    }
}

impl From<StockError> for StockpileError {
    fn from(err: StockError) -> Self {
        StockpileError::Stock(err)
    }
}

impl From<StoreError> for StockpileError {
    fn from(err: StoreError) -> Self {
        StockpileError::Store(err)
    }
}

impl From<ValidationError> for StockpileError {
    fn from(err: ValidationError) -> Self {
        StockpileError::Validation(err)
    }
}

impl From<BatchError> for StockpileError {
    fn from(err: BatchError) -> Self {
        StockpileError::Batch(err)
    }
}
