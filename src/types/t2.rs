//! T2 documents: scheduled and computed unit results
//!
//! A T2 document is uniquely identified by (stock, unit, config hash, link).
//! Scheduling creates it with a pending code; every (re)computation appends
//! a `T2Record` to the body and updates the code. Re-running an identical
//! identity always updates the same document.

use super::{ChannelId, DocumentCode, StockId, T2Link, Tag, unix_now};
use serde::{Deserialize, Serialize};

/// The identity key of a T2 document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct T2Key {
    pub stock: StockId,
    pub unit: String,
    /// Hash of the resolved unit config; `None` when defaults were untouched.
    pub config: Option<u64>,
    pub link: T2Link,
}

impl T2Key {
    /// Stable byte encoding used as the storage key.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.stock.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(self.unit.as_bytes());
        buf.push(0);
        match self.config {
            Some(h) => {
                buf.push(1);
                buf.extend_from_slice(&h.to_be_bytes());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.link.canonical_bytes());
        buf
    }
}

/// One computation attempt stored in a T2 document's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct T2Record {
    /// Completion epoch.
    pub ts: f64,
    /// Run that produced this record.
    pub run: i64,
    /// Wall-clock duration of the unit invocation, seconds.
    pub duration: f64,
    /// Outcome code of this specific attempt.
    pub code: i32,
    /// Unit output; absent for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct T2Document {
    pub stock: StockId,

    /// Name of the unit to run.
    pub unit: String,

    /// Resolved-config hash (see `T2Key::config`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<u64>,

    /// Reference to the input data.
    pub link: T2Link,

    /// Current status.
    pub code: DocumentCode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<ChannelId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,

    /// Runs that touched this document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<i64>,

    /// Links of tied-dependency documents, resolved at execution time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<T2Link>,

    /// Number of computation attempts so far.
    #[serde(default)]
    pub trials: u32,

    /// Position in the channel's T2 declaration list, used as the stable
    /// tie-break when ordering units with no dependency constraint.
    #[serde(default)]
    pub seq: u32,

    /// One record per (re)computation, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<T2Record>,

    /// Scheduling epoch.
    pub added: f64,
}

impl T2Document {
    /// Create a freshly scheduled document.
    pub fn schedule(key: T2Key, channel: Vec<ChannelId>, run: i64, seq: u32) -> Self {
        Self {
            stock: key.stock,
            unit: key.unit,
            config: key.config,
            link: key.link,
            code: DocumentCode::New,
            channel,
            tag: Vec::new(),
            run: vec![run],
            deps: Vec::new(),
            trials: 0,
            seq,
            body: Vec::new(),
            added: unix_now(),
        }
    }

    pub fn key(&self) -> T2Key {
        T2Key {
            stock: self.stock,
            unit: self.unit.clone(),
            config: self.config,
            link: self.link.clone(),
        }
    }

    /// Record a computation attempt and transition the document code.
    pub fn record_attempt(
        &mut self,
        run: i64,
        duration: f64,
        code: DocumentCode,
        result: Option<serde_json::Value>,
    ) {
        self.trials += 1;
        if !self.run.contains(&run) {
            self.run.push(run);
        }
        self.body.push(T2Record {
            ts: unix_now(),
            run,
            duration,
            code: i32::from(code),
            result,
        });
        self.code = code;
    }

    /// Latest successful result, if any.
    pub fn latest_result(&self) -> Option<&serde_json::Value> {
        self.body
            .iter()
            .rev()
            .find(|r| r.code >= 0)
            .and_then(|r| r.result.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateLink;
    use serde_json::json;

    fn key() -> T2Key {
        T2Key {
            stock: 9,
            unit: "MeanFlux".into(),
            config: Some(42),
            link: T2Link::State(StateLink::from_datapoint_ids(&[1, 2])),
        }
    }

    #[test]
    fn canonical_bytes_distinguish_config_presence() {
        let with = key().canonical_bytes();
        let without = T2Key {
            config: None,
            ..key()
        }
        .canonical_bytes();
        assert_ne!(with, without);
    }

    #[test]
    fn schedule_starts_pending() {
        let doc = T2Document::schedule(key(), vec!["SNE".into()], 1, 0);
        assert!(doc.code.is_pending());
        assert_eq!(doc.trials, 0);
        assert!(doc.body.is_empty());
    }

    #[test]
    fn record_attempt_appends_and_transitions() {
        let mut doc = T2Document::schedule(key(), vec![], 1, 0);
        doc.record_attempt(2, 0.5, DocumentCode::Exception, None);
        doc.record_attempt(3, 0.2, DocumentCode::Ok, Some(json!({"mean": 1.5})));

        assert_eq!(doc.trials, 2);
        assert_eq!(doc.code, DocumentCode::Ok);
        assert_eq!(doc.run, vec![1, 2, 3]);
        assert_eq!(doc.latest_result(), Some(&json!({"mean": 1.5})));
    }

    #[test]
    fn latest_result_skips_failed_attempts() {
        let mut doc = T2Document::schedule(key(), vec![], 1, 0);
        doc.record_attempt(2, 0.1, DocumentCode::Ok, Some(json!(1)));
        doc.record_attempt(3, 0.1, DocumentCode::Exception, None);
        // Latest attempt failed, but the last good result is still exposed
        assert_eq!(doc.latest_result(), Some(&json!(1)));
    }

    #[test]
    fn key_round_trips_through_document() {
        let doc = T2Document::schedule(key(), vec![], 1, 0);
        assert_eq!(doc.key(), key());
    }
}
