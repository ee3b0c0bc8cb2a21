//! Compact structured log documents
//!
//! Log documents are keyed by run and stored with single-letter field names
//! purely for storage efficiency; logical meaning is unaffected. The
//! `RunLogger` (see `crate::logging`) is the only writer.

use super::{ChannelId, StockId};
use serde::{Deserialize, Serialize};

/// Severity of a log document, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogSeverity> for u8 {
    fn from(s: LogSeverity) -> Self {
        match s {
            LogSeverity::Debug => 0,
            LogSeverity::Info => 1,
            LogSeverity::Warn => 2,
            LogSeverity::Error => 3,
        }
    }
}

impl TryFrom<u8> for LogSeverity {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, String> {
        Ok(match v {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            3 => Self::Error,
            other => return Err(format!("unknown log severity: {other}")),
        })
    }
}

/// A message produced during processing, persisted for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDocument {
    /// Run id.
    #[serde(rename = "r")]
    pub run: i64,

    /// Severity.
    #[serde(rename = "s")]
    pub severity: LogSeverity,

    /// Message text.
    #[serde(rename = "m")]
    pub msg: String,

    /// Context flag: the tier that emitted the message, if any.
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<i8>,

    /// Associated stock, if the message concerns a single object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<StockId>,

    /// Associated channel(s).
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<ChannelId>,

    /// Free-form extra information.
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}
