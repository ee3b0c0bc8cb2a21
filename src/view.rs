//! Read-only composite views handed to T3 reactor units
//!
//! A `SnapView` aggregates everything known about one stock — the stock
//! record, its datapoints, compiled states, T2 results, and log documents —
//! into a single immutable value. Reactors never receive store handles;
//! whatever they need must be in the view.

use crate::types::{
    DataPoint, DocumentCode, JournalRecord, LogDocument, StateDocument, StockDocument, StockId,
    T2Document, T2Link,
};

/// View of a given object (unique stock id) spanning all tiers.
#[derive(Debug, Clone)]
pub struct SnapView {
    pub id: StockId,
    pub stock: Option<StockDocument>,
    pub t0: Vec<DataPoint>,
    pub t1: Vec<StateDocument>,
    pub t2: Vec<T2Document>,
    pub logs: Vec<LogDocument>,
}

impl SnapView {
    /// T2 documents filtered by unit name and/or link.
    pub fn t2_docs(&self, unit: Option<&str>, link: Option<&T2Link>) -> Vec<&T2Document> {
        self.t2
            .iter()
            .filter(|d| unit.map_or(true, |u| d.unit == u))
            .filter(|d| link.map_or(true, |l| &d.link == l))
            .collect()
    }

    /// Latest successful result of a given unit, if any document completed.
    pub fn t2_result(&self, unit: &str) -> Option<&serde_json::Value> {
        self.t2
            .iter()
            .filter(|d| d.unit == unit && d.code == DocumentCode::Ok)
            .filter_map(T2Document::latest_result)
            .next_back()
    }

    /// Journal entries, optionally restricted to a tier and/or process.
    pub fn journal_entries(&self, tier: Option<i8>, process: Option<&str>) -> Vec<&JournalRecord> {
        self.stock
            .as_ref()
            .map(|s| s.journal_entries(tier, process))
            .unwrap_or_default()
    }

    /// Epoch of the first journal entry (object creation from the pipeline's
    /// point of view).
    pub fn time_created(&self) -> Option<f64> {
        self.stock
            .as_ref()
            .and_then(|s| s.journal.first())
            .map(|j| j.ts)
    }

    /// Epoch of the most recent journal entry.
    pub fn time_modified(&self) -> Option<f64> {
        self.stock
            .as_ref()
            .and_then(|s| s.journal.last())
            .map(|j| j.ts)
    }

    /// One-line content summary, used in reactor logs.
    pub fn content_summary(&self) -> String {
        format!(
            "DP: {}, ST: {}, T2: {}",
            self.t0.len(),
            self.t1.len(),
            self.t2.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StateLink, T2Key};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn journal(tier: i8, process: &str, ts: f64) -> JournalRecord {
        JournalRecord {
            tier,
            ts,
            process: process.into(),
            run: 1,
            code: 0,
            channel: vec![],
            tag: vec![],
            duration: None,
            unit: None,
            traceid: BTreeMap::new(),
            extra: None,
        }
    }

    fn view_with_t2() -> SnapView {
        let link = T2Link::State(StateLink::from_datapoint_ids(&[1]));
        let mut done = T2Document::schedule(
            T2Key {
                stock: 3,
                unit: "MeanFlux".into(),
                config: None,
                link: link.clone(),
            },
            vec![],
            1,
            0,
        );
        done.record_attempt(1, 0.1, DocumentCode::Ok, Some(json!({"mean": 2.0})));

        let pending = T2Document::schedule(
            T2Key {
                stock: 3,
                unit: "Trend".into(),
                config: None,
                link,
            },
            vec![],
            1,
            1,
        );

        let mut stock = StockDocument::new(3);
        stock.append_journal(journal(0, "ingest", 1.0));
        stock.append_journal(journal(2, "SNE", 2.0));

        SnapView {
            id: 3,
            stock: Some(stock),
            t0: vec![],
            t1: vec![],
            t2: vec![done, pending],
            logs: vec![],
        }
    }

    #[test]
    fn t2_result_only_returns_completed() {
        let view = view_with_t2();
        assert_eq!(view.t2_result("MeanFlux"), Some(&json!({"mean": 2.0})));
        assert_eq!(view.t2_result("Trend"), None);
        assert_eq!(view.t2_result("Nope"), None);
    }

    #[test]
    fn t2_docs_filters_by_unit() {
        let view = view_with_t2();
        assert_eq!(view.t2_docs(Some("MeanFlux"), None).len(), 1);
        assert_eq!(view.t2_docs(None, None).len(), 2);
    }

    #[test]
    fn journal_times_bracket_activity() {
        let view = view_with_t2();
        assert_eq!(view.time_created(), Some(1.0));
        assert_eq!(view.time_modified(), Some(2.0));
        assert_eq!(view.journal_entries(Some(2), None).len(), 1);
    }

    #[test]
    fn content_summary_counts() {
        let view = view_with_t2();
        assert_eq!(view.content_summary(), "DP: 0, ST: 0, T2: 2");
    }
}
