//! In-memory document store for tests and dry runs

use super::{DocStore, StoreError};
use crate::types::{
    DataPoint, LogDocument, StateDocument, StateLink, StockDocument, StockId, T2Document, T2Key,
    T2Link,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    stocks: BTreeMap<StockId, StockDocument>,
    dps: BTreeMap<(StockId, i64), DataPoint>,
    states: BTreeMap<(StockId, StateLink), StateDocument>,
    t2: BTreeMap<Vec<u8>, T2Document>,
    logs: Vec<LogDocument>,
}

/// Mutex-guarded maps mirroring the sled tree layout.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store poisoned".to_owned()))
    }
}

impl DocStore for MemStore {
    fn get_stock(&self, id: StockId) -> Result<Option<StockDocument>, StoreError> {
        Ok(self.lock()?.stocks.get(&id).cloned())
    }

    fn upsert_stock(&self, doc: &StockDocument) -> Result<(), StoreError> {
        self.lock()?.stocks.insert(doc.stock, doc.clone());
        Ok(())
    }

    fn stock_ids(&self) -> Result<Vec<StockId>, StoreError> {
        Ok(self.lock()?.stocks.keys().copied().collect())
    }

    fn upsert_datapoint(&self, dp: &DataPoint) -> Result<(), StoreError> {
        self.lock()?.dps.insert((dp.stock, dp.id), dp.clone());
        Ok(())
    }

    fn datapoints_for(&self, stock: StockId) -> Result<Vec<DataPoint>, StoreError> {
        Ok(self
            .lock()?
            .dps
            .range((stock, i64::MIN)..=(stock, i64::MAX))
            .map(|(_, dp)| dp.clone())
            .collect())
    }

    fn insert_state(&self, state: &StateDocument) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let key = (state.stock, state.link);
        if inner.states.contains_key(&key) {
            return Ok(false);
        }
        inner.states.insert(key, state.clone());
        Ok(true)
    }

    fn get_state(
        &self,
        stock: StockId,
        link: &StateLink,
    ) -> Result<Option<StateDocument>, StoreError> {
        Ok(self.lock()?.states.get(&(stock, *link)).cloned())
    }

    fn states_for(&self, stock: StockId) -> Result<Vec<StateDocument>, StoreError> {
        Ok(self
            .lock()?
            .states
            .iter()
            .filter(|((s, _), _)| *s == stock)
            .map(|(_, st)| st.clone())
            .collect())
    }

    fn upsert_t2(&self, doc: &T2Document) -> Result<(), StoreError> {
        self.lock()?
            .t2
            .insert(doc.key().canonical_bytes(), doc.clone());
        Ok(())
    }

    fn get_t2(&self, key: &T2Key) -> Result<Option<T2Document>, StoreError> {
        Ok(self.lock()?.t2.get(&key.canonical_bytes()).cloned())
    }

    fn t2_docs_for(&self, stock: StockId) -> Result<Vec<T2Document>, StoreError> {
        Ok(self
            .lock()?
            .t2
            .values()
            .filter(|d| d.stock == stock)
            .cloned()
            .collect())
    }

    fn find_t2(
        &self,
        stock: StockId,
        unit: &str,
        link: &T2Link,
    ) -> Result<Vec<T2Document>, StoreError> {
        Ok(self
            .lock()?
            .t2
            .values()
            .filter(|d| d.stock == stock && d.unit == unit && &d.link == link)
            .cloned()
            .collect())
    }

    fn pending_t2(&self) -> Result<Vec<T2Document>, StoreError> {
        Ok(self
            .lock()?
            .t2
            .values()
            .filter(|d| d.code.is_pending())
            .cloned()
            .collect())
    }

    fn insert_log(&self, doc: &LogDocument) -> Result<(), StoreError> {
        self.lock()?.logs.push(doc.clone());
        Ok(())
    }

    fn logs_for_run(&self, run: i64) -> Result<Vec<LogDocument>, StoreError> {
        Ok(self
            .lock()?
            .logs
            .iter()
            .filter(|l| l.run == run)
            .cloned()
            .collect())
    }

    fn logs_for_stock(&self, stock: StockId) -> Result<Vec<LogDocument>, StoreError> {
        Ok(self
            .lock()?
            .logs
            .iter()
            .filter(|l| l.stock == Some(stock))
            .cloned()
            .collect())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
