//! Ingested measurement documents (T0 output)

use super::{ChannelId, DataPointId, StockId, Tag};
use serde::{Deserialize, Serialize};

/// A single ingested measurement, written once by T0 and referenced by T1
/// states through its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: DataPointId,

    pub stock: StockId,

    /// Observation epoch (UNIX seconds).
    pub ts: f64,

    /// Channels whose filter accepted the alert carrying this datapoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<ChannelId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,

    /// Measurement content, stored as-is.
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl DataPoint {
    /// Numeric field accessor used by computation units.
    pub fn value(&self, field: &str) -> Option<f64> {
        self.body.get(field).and_then(serde_json::Value::as_f64)
    }

    /// Record membership of an additional channel (idempotent).
    pub fn add_channel(&mut self, channel: &str) {
        if !self.channel.iter().any(|c| c == channel) {
            self.channel.push(channel.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_reads_numeric_fields_only() {
        let mut body = serde_json::Map::new();
        body.insert("flux".into(), json!(12.5));
        body.insert("band".into(), json!("g"));
        let dp = DataPoint {
            id: 1,
            stock: 7,
            ts: 0.0,
            channel: vec![],
            tag: vec![],
            body,
        };
        assert_eq!(dp.value("flux"), Some(12.5));
        assert_eq!(dp.value("band"), None);
        assert_eq!(dp.value("missing"), None);
    }

    #[test]
    fn add_channel_is_idempotent() {
        let mut dp = DataPoint {
            id: 1,
            stock: 7,
            ts: 0.0,
            channel: vec![],
            tag: vec![],
            body: serde_json::Map::new(),
        };
        dp.add_channel("SNE");
        dp.add_channel("SNE");
        assert_eq!(dp.channel, vec!["SNE".to_string()]);
    }
}
