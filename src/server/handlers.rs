//! HTTP handlers
//!
//! Handlers only translate between JSON and the core services. Every error
//! goes through [`StockpileError`] so the status code mapping lives in one
//! place.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::batch::{BatchReport, CartItemKey};
use crate::core::error::{StockpileError, ValidationError};
use crate::core::model::{
    CartId, CartItemUpdate, NewStock, Order, OrderId, OrderItem, OrderStatus, StockKey,
    StockUpdate, UserId, WarehouseId, WarehouseStock,
};
use crate::core::order::CreateOrderRequest;
use crate::core::store::Store;
use crate::server::AppState;

/// Body of `POST /orders`
///
/// `status` is parsed by hand so an unknown value gets the same validation
/// error as every other field.
#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub user_id: UserId,
    pub cart_id: CartId,
    pub status: String,
    #[serde(default)]
    pub shipping_cost: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub user_id: UserId,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

pub async fn create_order<S: Store>(
    State(state): State<AppState<S>>,
    Json(body): Json<CreateOrderBody>,
) -> Result<impl IntoResponse, StockpileError> {
    let request = CreateOrderRequest {
        user_id: body.user_id,
        cart_id: body.cart_id,
        status: body.status.parse()?,
        shipping_cost: body.shipping_cost,
    };
    let placed = state
        .orders
        .create_order_with(request, &state.shutdown)
        .await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

pub async fn list_orders<S: Store>(
    State(state): State<AppState<S>>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>, StockpileError> {
    if query.user_id < 1 {
        return Err(ValidationError::field("user_id", "user id is required").into());
    }
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<OrderStatus>()?),
    };
    let orders = state.orders.orders_for_user(query.user_id, status).await?;
    Ok(Json(orders))
}

pub async fn order_items<S: Store>(
    State(state): State<AppState<S>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<OrderItem>>, StockpileError> {
    Ok(Json(state.orders.order_items(order_id).await?))
}

pub async fn update_order_status<S: Store>(
    State(state): State<AppState<S>>,
    Path(order_id): Path<OrderId>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Order>, StockpileError> {
    let status: OrderStatus = body.status.parse()?;
    Ok(Json(state.orders.update_status(order_id, status).await?))
}

pub async fn batch_update_stock<S: Store>(
    State(state): State<AppState<S>>,
    Json(updates): Json<Vec<StockUpdate>>,
) -> Result<Json<BatchReport<StockKey>>, StockpileError> {
    let report = state
        .batch
        .batch_update_stock(&state.ledger, updates, &state.shutdown)
        .await?;
    Ok(Json(report))
}

pub async fn batch_update_cart_items<S: Store>(
    State(state): State<AppState<S>>,
    Json(updates): Json<Vec<CartItemUpdate>>,
) -> Result<Json<BatchReport<CartItemKey>>, StockpileError> {
    let report = state
        .batch
        .batch_update_cart_items(state.store.clone(), updates, &state.shutdown)
        .await?;
    Ok(Json(report))
}

pub async fn list_stock<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<WarehouseStock>>, StockpileError> {
    Ok(Json(state.ledger.list().await?))
}

pub async fn list_warehouse_stock<S: Store>(
    State(state): State<AppState<S>>,
    Path(warehouse_id): Path<WarehouseId>,
) -> Result<Json<Vec<WarehouseStock>>, StockpileError> {
    Ok(Json(state.ledger.list_for_warehouse(warehouse_id).await?))
}

pub async fn create_stock<S: Store>(
    State(state): State<AppState<S>>,
    Json(stock): Json<NewStock>,
) -> Result<impl IntoResponse, StockpileError> {
    let created = state.ledger.create(stock).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
