//! Raw alert payload as received from a stream

use super::{DataPointId, StockId, Tag};
use serde::{Deserialize, Serialize};

/// One alert from the upstream stream: a new measurement for a stock plus
/// whatever prior history the stream chose to attach.
///
/// T0 is the only tier that ever sees this type; everything downstream works
/// on the datapoints it emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPacket {
    /// Stream-assigned alert id.
    pub id: i64,

    /// The object this alert belongs to.
    pub stock: StockId,

    /// External survey name(s) for the object, if known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,

    /// Measurements carried by the alert. The first entry is the triggering
    /// observation; the rest is attached history.
    pub datapoints: Vec<AlertDataPoint>,

    /// Free-form labels set by the stream.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,
}

/// A single measurement inside an alert, before ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDataPoint {
    pub id: DataPointId,
    /// Observation epoch (UNIX seconds).
    pub ts: f64,
    /// Measurement content (flux, magnitude, coordinates, ...).
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl AlertPacket {
    /// Convenience accessor for the triggering observation.
    pub fn latest(&self) -> Option<&AlertDataPoint> {
        self.datapoints
            .iter()
            .max_by(|a, b| a.ts.total_cmp(&b.ts))
    }
}
