//! Stock documents: one per tracked object
//!
//! The stock record ties together data from various sources, selected by
//! various channels, but all related to the same underlying object. It is
//! mutated by every tier on activity for that object — appended to and
//! merged, never deleted.

use super::{ChannelId, JournalRecord, StockId, Tag, unix_now};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-channel creation/update epochs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelTimestamps {
    /// First activity in this channel.
    pub tied: f64,
    /// Latest activity in this channel.
    pub upd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockDocument {
    pub stock: StockId,

    /// Channels that have selected this object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<ChannelId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,

    /// External survey name(s) associated with the object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,

    /// Ordered record of activity, appended by every tier.
    #[serde(default)]
    pub journal: Vec<JournalRecord>,

    /// Creation/update epochs per channel.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ts: BTreeMap<ChannelId, ChannelTimestamps>,

    /// Last update epoch across all channels.
    pub updated: f64,
}

impl StockDocument {
    pub fn new(stock: StockId) -> Self {
        Self {
            stock,
            channel: Vec::new(),
            tag: Vec::new(),
            name: Vec::new(),
            journal: Vec::new(),
            ts: BTreeMap::new(),
            updated: unix_now(),
        }
    }

    /// Register channel membership and bump the channel's timestamps.
    pub fn touch_channel(&mut self, channel: &str) {
        let now = unix_now();
        if !self.channel.iter().any(|c| c == channel) {
            self.channel.push(channel.to_owned());
        }
        let entry = self
            .ts
            .entry(channel.to_owned())
            .or_insert(ChannelTimestamps { tied: now, upd: now });
        entry.upd = now;
        self.updated = now;
    }

    /// Merge external names, keeping insertion order, skipping duplicates.
    pub fn add_names(&mut self, names: &[String]) {
        for n in names {
            if !self.name.iter().any(|existing| existing == n) {
                self.name.push(n.clone());
            }
        }
    }

    pub fn add_tags(&mut self, tags: &[Tag]) {
        for t in tags {
            if !self.tag.iter().any(|existing| existing == t) {
                self.tag.push(t.clone());
            }
        }
    }

    /// Append a journal record and bump the update epoch.
    pub fn append_journal(&mut self, record: JournalRecord) {
        self.updated = record.ts.max(self.updated);
        self.journal.push(record);
    }

    /// Journal entries filtered by tier and/or process name.
    pub fn journal_entries(&self, tier: Option<i8>, process: Option<&str>) -> Vec<&JournalRecord> {
        self.journal
            .iter()
            .filter(|j| tier.map_or(true, |t| j.tier == t))
            .filter(|j| process.map_or(true, |p| j.process == p))
            .collect()
    }
}
