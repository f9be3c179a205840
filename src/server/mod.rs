//! HTTP delivery layer
//!
//! A thin axum adapter over the order coordinator, the stock ledger and the
//! batch updater. Authentication is not handled here, so the acting user id
//! travels in the request.

pub mod handlers;
pub mod router;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::StockpileConfig;
use crate::core::batch::BatchUpdater;
use crate::core::ledger::StockLedger;
use crate::core::order::OrderService;
use crate::core::store::Store;

pub use router::{build_router, serve};

/// State shared by every handler
pub struct AppState<S> {
    pub orders: OrderService<S>,
    pub ledger: StockLedger<S>,
    pub batch: BatchUpdater,
    pub store: Arc<S>,
    /// Fired on shutdown; open order transactions and unstarted batch items
    /// are aborted
    pub shutdown: CancellationToken,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            ledger: self.ledger.clone(),
            batch: self.batch.clone(),
            store: self.store.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::from_config(store, &StockpileConfig::default())
    }

    pub fn from_config(store: Arc<S>, config: &StockpileConfig) -> Self {
        Self {
            orders: OrderService::new(store.clone()).with_timeout(config.order.timeout()),
            ledger: StockLedger::new(store.clone()),
            batch: BatchUpdater::new(config.batch.max_concurrency),
            store,
            shutdown: CancellationToken::new(),
        }
    }
}
