//! Core identifier and document types shared across all tiers
//!
//! Every document persisted by the framework lives here: datapoints (T0),
//! states (T1), computation results (T2), stock records with their journal,
//! and compact log documents. Tier processors only ever exchange these types
//! plus the views built from them.

pub mod alert;
pub mod codes;
pub mod datapoint;
pub mod journal;
pub mod link;
pub mod log;
pub mod state;
pub mod stock;
pub mod t2;

pub use alert::AlertPacket;
pub use codes::DocumentCode;
pub use datapoint::DataPoint;
pub use journal::{JournalAttributes, JournalRecord};
pub use link::{StateLink, T2Link};
pub use log::{LogDocument, LogSeverity};
pub use state::StateDocument;
pub use stock::StockDocument;
pub use t2::{T2Document, T2Key, T2Record};

/// Unique id of a tracked astrophysical object.
pub type StockId = i64;

/// Unique id of a single measurement.
pub type DataPointId = i64;

/// Channel name (a configured selection/science case).
pub type ChannelId = String;

/// Free-form label attachable to documents.
pub type Tag = String;

/// Pipeline tier (0: ingest, 1: state compilation, 2: computation, 3: reaction).
pub type Tier = i8;

/// Current UNIX epoch as a float, the timestamp representation used in
/// persisted documents.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_now_is_recent() {
        let ts = unix_now();
        // after 2020-01-01, before 2100
        assert!(ts > 1_577_836_800.0);
        assert!(ts < 4_102_444_800.0);
    }
}
