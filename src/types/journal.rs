//! Journal records: the per-stock audit trail
//!
//! Every tier appends one `JournalRecord` per activity on a stock. Records
//! are write-once; together they form the provenance trail from which any
//! object's outcome can be reconstructed after a run.

use super::{ChannelId, Tag, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record of activity on a stock document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Tier of the associated process.
    pub tier: Tier,

    /// UNIX epoch of the activity.
    pub ts: f64,

    /// Name of the associated process (e.g. the channel or session name).
    pub process: String,

    /// Run id of the session that wrote this record.
    pub run: i64,

    /// Status code of the associated process.
    pub code: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<ChannelId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,

    /// Duration of the activity in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Unit associated with this record, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Trace ids identifying the exact code/config that ran.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub traceid: BTreeMap<String, i64>,

    /// Free-form information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Transient builder returned by units (or assembled by processors) to
/// customize the journal entry committed to the stock document.
#[derive(Debug, Clone, Default)]
pub struct JournalAttributes {
    pub code: Option<i32>,
    pub tag: Vec<Tag>,
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl JournalAttributes {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag.push(tag.into());
        self
    }

    pub fn extra_entry(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_owned(), value);
        self
    }

    /// Merge these attributes into a journal record template.
    pub fn apply(self, mut record: JournalRecord) -> JournalRecord {
        if let Some(code) = self.code {
            record.code = code;
        }
        record.tag.extend(self.tag);
        match (&mut record.extra, self.extra) {
            (Some(dst), Some(src)) => dst.extend(src),
            (dst @ None, Some(src)) => *dst = Some(src),
            _ => {}
        }
        record
    }
}
