//! Core module containing the domain types, the storage capability traits and
//! the three consistency components: ledger, order coordinator and batch
//! updater

pub mod batch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod order;
pub mod store;

pub use batch::{BatchFailure, BatchReport, BatchUpdater, CartItemKey, FailureKind, ItemOutcome};
pub use error::{
    BatchError, NotFoundError, OrderError, StockError, StockpileError, StoreError,
    TransactionError, ValidationError,
};
pub use ledger::{StockLedger, locked_decrease};
pub use order::{CreateOrderRequest, OrderService};
pub use store::{
    CartStore, IsolationLevel, OrderReader, OrderTransaction, StockRowLock, StockStore, Store,
    TransactionProvider,
};
