//! Concurrent Batch Updater
//!
//! Applies independent corrections in parallel. Every item runs in its own
//! task with its own implicit transaction; at most `max_concurrency` tasks
//! exist at once, the rest of the input waits in the queue. A failing or panicking item only affects its own entry in
//! the [`BatchReport`].
//!
//! The batch is **not** atomic. Updates apply in any interleaving, and two
//! updates of the same row are last-write-wins. Callers that need an
//! all-or-nothing bulk change must not use this path.

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::core::error::{BatchError, ValidationError};
use crate::core::ledger::StockLedger;
use crate::core::model::{CartItemId, CartItemUpdate, StockKey, StockUpdate};
use crate::core::store::{CartStore, StockStore};

/// Default number of items applied at the same time
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// An update request that can be identified in a report
pub trait BatchItem: Send + 'static {
    type Key: Clone + fmt::Display + Serialize + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

impl BatchItem for StockUpdate {
    type Key = StockKey;

    fn key(&self) -> StockKey {
        StockUpdate::key(self)
    }
}

/// Identity of a cart item in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CartItemKey {
    pub item_id: CartItemId,
}

impl fmt::Display for CartItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item_id={}", self.item_id)
    }
}

impl BatchItem for CartItemUpdate {
    type Key = CartItemKey;

    fn key(&self) -> CartItemKey {
        CartItemKey { item_id: self.id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The store or validation rejected the update
    Rejected,
    /// The task panicked; the panic was contained
    Panicked,
    /// Cancelled before the write started
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure<K> {
    #[serde(flatten)]
    pub key: K,
    pub message: String,
    pub kind: FailureKind,
}

/// What a single worker task produced
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<K> {
    Applied(K),
    Failed(BatchFailure<K>),
}

impl<K> ItemOutcome<K> {
    fn failed(key: K, kind: FailureKind, message: impl Into<String>) -> Self {
        ItemOutcome::Failed(BatchFailure {
            key,
            message: message.into(),
            kind,
        })
    }
}

/// Aggregate result of one batch call
///
/// `failures` is in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport<K> {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<BatchFailure<K>>,
}

impl<K> BatchReport<K> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Bounded fan-out of independent updates
#[derive(Debug, Clone)]
pub struct BatchUpdater {
    max_concurrency: usize,
}

impl Default for BatchUpdater {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl BatchUpdater {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Overwrite stock quantities, one task per update
    pub async fn batch_update_stock<S>(
        &self,
        ledger: &StockLedger<S>,
        updates: Vec<StockUpdate>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport<StockKey>, BatchError>
    where
        S: StockStore + ?Sized + 'static,
    {
        let report = self
            .run(updates, cancel, |update: StockUpdate| {
                let ledger = ledger.clone();
                async move {
                    ledger
                        .set_quantity(update.key(), update.quantity)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            })
            .await?;
        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "stock batch applied"
        );
        Ok(report)
    }

    /// Correct cart line quantities and subtotals, one task per update
    ///
    /// Each update is validated on its own: `id` set, `quantity > 0`,
    /// `sub_total >= 0`.
    pub async fn batch_update_cart_items<S>(
        &self,
        store: Arc<S>,
        updates: Vec<CartItemUpdate>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport<CartItemKey>, BatchError>
    where
        S: CartStore + ?Sized + 'static,
    {
        let report = self
            .run(updates, cancel, |update: CartItemUpdate| {
                let store = store.clone();
                async move {
                    update
                        .validate()
                        .map_err(|e| ValidationError::from(e).to_string())?;
                    store
                        .update_cart_item(&update)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            })
            .await?;
        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "cart item batch applied"
        );
        Ok(report)
    }

    /// Sliding window over the input: at most `max_concurrency` items have a
    /// task (and a built future) at any time. The next item is spawned as
    /// soon as one finishes, so memory stays bounded for large batches.
    async fn run<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        apply: F,
    ) -> Result<BatchReport<T::Key>, BatchError>
    where
        T: BatchItem,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        if items.is_empty() {
            return Err(BatchError::Empty);
        }

        let attempted = items.len();
        let mut queue = items.into_iter().enumerate();
        let mut tasks = JoinSet::new();
        let mut in_flight: Vec<Option<T::Key>> = vec![None; attempted];
        let mut outcomes = Vec::with_capacity(attempted);

        loop {
            while tasks.len() < self.max_concurrency {
                let Some((index, item)) = queue.next() else {
                    break;
                };
                let key = item.key();
                if cancel.is_cancelled() {
                    outcomes.push((
                        index,
                        ItemOutcome::failed(
                            key,
                            FailureKind::Cancelled,
                            "cancelled before the write started",
                        ),
                    ));
                    continue;
                }
                in_flight[index] = Some(key.clone());
                let work = apply(item);
                tasks.spawn(async move { (index, apply_one(key, work).await) });
            }

            match tasks.join_next().await {
                Some(Ok((index, outcome))) => {
                    in_flight[index] = None;
                    outcomes.push((index, outcome));
                }
                Some(Err(err)) => tracing::error!(error = %err, "batch task did not finish"),
                None => break,
            }
        }
        // Only reachable if the runtime aborted a task
        for (index, key) in in_flight.into_iter().enumerate() {
            if let Some(key) = key {
                outcomes.push((
                    index,
                    ItemOutcome::failed(key, FailureKind::Panicked, "task did not finish"),
                ));
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut report = BatchReport {
            attempted,
            succeeded: 0,
            failures: Vec::new(),
        };
        for (_, outcome) in outcomes {
            match outcome {
                ItemOutcome::Applied(_) => report.succeeded += 1,
                ItemOutcome::Failed(failure) => report.failures.push(failure),
            }
        }
        Ok(report)
    }
}

async fn apply_one<K, Fut>(key: K, work: Fut) -> ItemOutcome<K>
where
    K: fmt::Display,
    Fut: Future<Output = Result<(), String>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(())) => ItemOutcome::Applied(key),
        Ok(Err(message)) => {
            tracing::warn!(item = %key, error = %message, "batch item rejected");
            ItemOutcome::failed(key, FailureKind::Rejected, message)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(item = %key, panic = %message, "batch task panicked");
            ItemOutcome::failed(key, FailureKind::Panicked, format!("task panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
