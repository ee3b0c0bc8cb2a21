//! Embedded sled-backed document store
//!
//! One tree per document kind. Keys are big-endian encoded so range scans
//! come back in id/epoch order; values are JSON. Writes rely on sled's
//! background flushing: on crash, at most the last few writes are lost,
//! which a re-run of the affected tier repairs (scheduling is idempotent).

use super::{DocStore, StoreError};
use crate::types::{
    DataPoint, LogDocument, StateDocument, StateLink, StockDocument, StockId, T2Document, T2Key,
    T2Link,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const TREE_STOCK: &str = "stock";
const TREE_DP: &str = "dp";
const TREE_STATE: &str = "state";
const TREE_T2: &str = "t2";
const TREE_LOG: &str = "log";

#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    stocks: sled::Tree,
    dps: sled::Tree,
    states: sled::Tree,
    t2: sled::Tree,
    logs: sled::Tree,
    /// Per-process log sequence, disambiguates same-run log keys.
    log_seq: Arc<AtomicU64>,
}

impl SledStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            stocks: db.open_tree(TREE_STOCK)?,
            dps: db.open_tree(TREE_DP)?,
            states: db.open_tree(TREE_STATE)?,
            t2: db.open_tree(TREE_T2)?,
            logs: db.open_tree(TREE_LOG)?,
            db: Arc::new(db),
            log_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    fn dp_key(stock: StockId, id: i64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&stock.to_be_bytes());
        key[8..].copy_from_slice(&id.to_be_bytes());
        key
    }

    fn state_key(stock: StockId, link: &StateLink) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..8].copy_from_slice(&stock.to_be_bytes());
        key[8..].copy_from_slice(link.as_bytes());
        key
    }

    fn t2_key(key: &T2Key) -> [u8; 24] {
        // stock prefix keeps per-stock scans a range query; the digest
        // carries the full identity
        let digest = md5::compute(key.canonical_bytes()).0;
        let mut k = [0u8; 24];
        k[..8].copy_from_slice(&key.stock.to_be_bytes());
        k[8..].copy_from_slice(&digest);
        k
    }

    fn log_key(&self, run: i64) -> [u8; 16] {
        let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&run.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }

    fn scan_prefix<T: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
        prefix: &[u8],
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}

impl DocStore for SledStore {
    fn get_stock(&self, id: StockId) -> Result<Option<StockDocument>, StoreError> {
        match self.stocks.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn upsert_stock(&self, doc: &StockDocument) -> Result<(), StoreError> {
        let value = serde_json::to_vec(doc)?;
        self.stocks.insert(doc.stock.to_be_bytes(), value)?;
        Ok(())
    }

    fn stock_ids(&self) -> Result<Vec<StockId>, StoreError> {
        let mut ids = Vec::new();
        for item in self.stocks.iter() {
            let (key, _) = item?;
            if key.len() == 8 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key);
                ids.push(StockId::from_be_bytes(buf));
            }
        }
        Ok(ids)
    }

    fn upsert_datapoint(&self, dp: &DataPoint) -> Result<(), StoreError> {
        let value = serde_json::to_vec(dp)?;
        self.dps.insert(Self::dp_key(dp.stock, dp.id), value)?;
        Ok(())
    }

    fn datapoints_for(&self, stock: StockId) -> Result<Vec<DataPoint>, StoreError> {
        Self::scan_prefix(&self.dps, &stock.to_be_bytes())
    }

    fn insert_state(&self, state: &StateDocument) -> Result<bool, StoreError> {
        let key = Self::state_key(state.stock, &state.link);
        if self.states.contains_key(key)? {
            return Ok(false);
        }
        self.states.insert(key, serde_json::to_vec(state)?)?;
        Ok(true)
    }

    fn get_state(
        &self,
        stock: StockId,
        link: &StateLink,
    ) -> Result<Option<StateDocument>, StoreError> {
        match self.states.get(Self::state_key(stock, link))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn states_for(&self, stock: StockId) -> Result<Vec<StateDocument>, StoreError> {
        Self::scan_prefix(&self.states, &stock.to_be_bytes())
    }

    fn upsert_t2(&self, doc: &T2Document) -> Result<(), StoreError> {
        let key = Self::t2_key(&doc.key());
        self.t2.insert(key, serde_json::to_vec(doc)?)?;
        Ok(())
    }

    fn get_t2(&self, key: &T2Key) -> Result<Option<T2Document>, StoreError> {
        match self.t2.get(Self::t2_key(key))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn t2_docs_for(&self, stock: StockId) -> Result<Vec<T2Document>, StoreError> {
        Self::scan_prefix(&self.t2, &stock.to_be_bytes())
    }

    fn find_t2(
        &self,
        stock: StockId,
        unit: &str,
        link: &T2Link,
    ) -> Result<Vec<T2Document>, StoreError> {
        Ok(self
            .t2_docs_for(stock)?
            .into_iter()
            .filter(|d| d.unit == unit && &d.link == link)
            .collect())
    }

    fn pending_t2(&self) -> Result<Vec<T2Document>, StoreError> {
        let mut out = Vec::new();
        for item in self.t2.iter() {
            let (_, value) = item?;
            let doc: T2Document = serde_json::from_slice(&value)?;
            if doc.code.is_pending() {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn insert_log(&self, doc: &LogDocument) -> Result<(), StoreError> {
        let key = self.log_key(doc.run);
        self.logs.insert(key, serde_json::to_vec(doc)?)?;
        Ok(())
    }

    fn logs_for_run(&self, run: i64) -> Result<Vec<LogDocument>, StoreError> {
        Self::scan_prefix(&self.logs, &run.to_be_bytes())
    }

    fn logs_for_stock(&self, stock: StockId) -> Result<Vec<LogDocument>, StoreError> {
        let mut out = Vec::new();
        for item in self.logs.iter() {
            let (_, value) = item?;
            let doc: LogDocument = serde_json::from_slice(&value)?;
            if doc.stock == Some(stock) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentCode;
    use serde_json::json;

    fn open_temp() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SledStore::open(dir.path().join("db")).expect("open");
        (dir, store)
    }

    fn t2key(stock: StockId) -> T2Key {
        T2Key {
            stock,
            unit: "MeanFlux".into(),
            config: None,
            link: T2Link::State(StateLink::from_datapoint_ids(&[1, 2])),
        }
    }

    #[test]
    fn stock_round_trip() {
        let (_dir, store) = open_temp();
        let mut doc = StockDocument::new(42);
        doc.touch_channel("SNE");
        store.upsert_stock(&doc).unwrap();

        let loaded = store.get_stock(42).unwrap().unwrap();
        assert_eq!(loaded.stock, 42);
        assert_eq!(loaded.channel, vec!["SNE".to_string()]);
        assert_eq!(store.stock_ids().unwrap(), vec![42]);
    }

    #[test]
    fn t2_upsert_updates_in_place() {
        let (_dir, store) = open_temp();
        let mut doc = T2Document::schedule(t2key(7), vec![], 1, 0);
        store.upsert_t2(&doc).unwrap();

        doc.record_attempt(1, 0.1, DocumentCode::Ok, Some(json!({"mean": 3.0})));
        store.upsert_t2(&doc).unwrap();

        let all = store.t2_docs_for(7).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].code, DocumentCode::Ok);
        assert_eq!(all[0].trials, 1);
    }

    #[test]
    fn state_insert_is_idempotent() {
        let (_dir, store) = open_temp();
        let state = StateDocument::compile(3, vec![1, 2, 3], vec!["SNE".into()], 1);
        assert!(store.insert_state(&state).unwrap());
        assert!(!store.insert_state(&state).unwrap());
        assert_eq!(store.states_for(3).unwrap().len(), 1);
        assert!(store.get_state(3, &state.link).unwrap().is_some());
    }

    #[test]
    fn pending_t2_filters_by_code() {
        let (_dir, store) = open_temp();
        let mut done = T2Document::schedule(t2key(1), vec![], 1, 0);
        done.record_attempt(1, 0.1, DocumentCode::Ok, None);
        store.upsert_t2(&done).unwrap();

        let fresh = T2Document::schedule(t2key(2), vec![], 1, 0);
        store.upsert_t2(&fresh).unwrap();

        let pending = store.pending_t2().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].stock, 2);
    }

    #[test]
    fn datapoints_scan_by_stock_prefix() {
        let (_dir, store) = open_temp();
        for (stock, id) in [(1, 10), (1, 11), (2, 12)] {
            let dp = DataPoint {
                id,
                stock,
                ts: 0.0,
                channel: vec![],
                tag: vec![],
                body: serde_json::Map::new(),
            };
            store.upsert_datapoint(&dp).unwrap();
        }
        assert_eq!(store.datapoints_for(1).unwrap().len(), 2);
        assert_eq!(store.datapoints_for(2).unwrap().len(), 1);
    }

    #[test]
    fn logs_keyed_by_run() {
        let (_dir, store) = open_temp();
        for (run, msg) in [(5, "a"), (5, "b"), (6, "c")] {
            store
                .insert_log(&LogDocument {
                    run,
                    severity: crate::types::LogSeverity::Info,
                    msg: msg.into(),
                    flag: None,
                    stock: Some(9),
                    channel: vec![],
                    extra: None,
                })
                .unwrap();
        }
        assert_eq!(store.logs_for_run(5).unwrap().len(), 2);
        assert_eq!(store.logs_for_run(6).unwrap().len(), 1);
        assert_eq!(store.logs_for_stock(9).unwrap().len(), 3);
    }

    #[test]
    fn reopen_preserves_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        {
            let store = SledStore::open(&path).expect("open");
            store.upsert_stock(&StockDocument::new(1)).unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path).expect("reopen");
        assert!(store.get_stock(1).unwrap().is_some());
    }
}
