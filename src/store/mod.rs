//! Document store boundary
//!
//! Tier processors never touch a database client directly; they go through
//! the `DocStore` trait, which exposes find/insert/upsert by the identity
//! keys of the document model. Two implementations ship with the crate: an
//! embedded sled store for real runs and an in-memory store for tests. A
//! server-backed document database can be added behind the same trait.
//!
//! Store failures are infrastructure errors: fatal to the run, propagated
//! with `?` all the way up.

mod memory;
mod sled_store;

pub use memory::MemStore;
pub use sled_store::SledStore;

use crate::types::{
    DataPoint, LogDocument, StateDocument, StateLink, StockDocument, StockId, T2Document, T2Key,
    T2Link,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// The narrow interface every tier processor writes through.
pub trait DocStore: Send + Sync {
    // --- stocks ---

    fn get_stock(&self, id: StockId) -> Result<Option<StockDocument>, StoreError>;

    /// Insert or replace the stock document (single writer per stock is the
    /// caller's responsibility; see the concurrency model).
    fn upsert_stock(&self, doc: &StockDocument) -> Result<(), StoreError>;

    fn stock_ids(&self) -> Result<Vec<StockId>, StoreError>;

    // --- datapoints ---

    fn upsert_datapoint(&self, dp: &DataPoint) -> Result<(), StoreError>;

    fn datapoints_for(&self, stock: StockId) -> Result<Vec<DataPoint>, StoreError>;

    // --- states ---

    /// Insert a compiled state. Returns `false` when a state with the same
    /// link already existed (idempotent recompilation).
    fn insert_state(&self, state: &StateDocument) -> Result<bool, StoreError>;

    fn get_state(&self, stock: StockId, link: &StateLink) -> Result<Option<StateDocument>, StoreError>;

    fn states_for(&self, stock: StockId) -> Result<Vec<StateDocument>, StoreError>;

    // --- t2 documents ---

    /// Insert or update by identity key `(stock, unit, config, link)`.
    fn upsert_t2(&self, doc: &T2Document) -> Result<(), StoreError>;

    fn get_t2(&self, key: &T2Key) -> Result<Option<T2Document>, StoreError>;

    fn t2_docs_for(&self, stock: StockId) -> Result<Vec<T2Document>, StoreError>;

    /// All T2 documents of one unit bound to a given link, any config.
    fn find_t2(&self, stock: StockId, unit: &str, link: &T2Link)
        -> Result<Vec<T2Document>, StoreError>;

    /// Documents awaiting (re)computation, across all stocks.
    fn pending_t2(&self) -> Result<Vec<T2Document>, StoreError>;

    // --- logs ---

    fn insert_log(&self, doc: &LogDocument) -> Result<(), StoreError>;

    fn logs_for_run(&self, run: i64) -> Result<Vec<LogDocument>, StoreError>;

    fn logs_for_stock(&self, stock: StockId) -> Result<Vec<LogDocument>, StoreError>;

    // --- lifecycle ---

    fn flush(&self) -> Result<(), StoreError>;
}
