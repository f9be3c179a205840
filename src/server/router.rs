//! Router and server lifecycle

use anyhow::Result;
use axum::{
    Router,
    routing::{get, patch, post, put},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::core::store::Store;
use crate::server::AppState;
use crate::server::handlers::{
    batch_update_cart_items, batch_update_stock, create_order, create_stock, list_orders,
    list_stock, list_warehouse_stock, order_items, update_order_status,
};

/// Build all routes
///
/// - POST  /orders                    - Create an order from a cart
/// - GET   /orders?user_id=&status=   - Orders of a user, newest first
/// - GET   /orders/{id}/items         - Items of one order
/// - PATCH /orders/{id}/status        - Change the status of an order
/// - POST  /warehouse-stocks          - Create a stock row
/// - GET   /warehouse-stocks          - Every stock row
/// - PUT   /warehouse-stocks/batch    - Overwrite many stock quantities
/// - PUT   /cart-items/batch          - Correct many cart lines
/// - GET   /warehouses/{id}/stocks    - Stock rows of one warehouse
pub fn build_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/orders", post(create_order::<S>).get(list_orders::<S>))
        .route("/orders/{id}/items", get(order_items::<S>))
        .route("/orders/{id}/status", patch(update_order_status::<S>))
        .route(
            "/warehouse-stocks",
            post(create_stock::<S>).get(list_stock::<S>),
        )
        .route("/warehouse-stocks/batch", put(batch_update_stock::<S>))
        .route("/cart-items/batch", put(batch_update_cart_items::<S>))
        .route("/warehouses/{id}/stocks", get(list_warehouse_stock::<S>))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the application with graceful shutdown
///
/// On Ctrl+C or SIGTERM the state's shutdown token fires, so open order
/// transactions roll back instead of holding the shutdown.
pub async fn serve<S: Store>(state: AppState<S>, addr: &str) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
