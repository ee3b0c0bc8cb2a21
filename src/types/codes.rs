//! Status codes shared by tier documents
//!
//! Negative codes are reserved for the framework (set by processors and
//! ingesters) and mark documents that are erroneous or not yet processed.
//! Zero and positive codes mean valid processed data, so store queries can
//! filter on `code >= 0` to retrieve completed results only. Codes are not
//! combinable flags.

use serde::{Deserialize, Serialize};

/// Potential status of a T1/T2 document and of journal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum DocumentCode {
    /// Processing completed, body holds a valid result.
    Ok,
    /// Freshly scheduled, not yet picked up.
    New,
    /// Generic error state.
    Error,
    /// Framework-level failure (not the unit's fault).
    InternalError,
    /// The unit raised during `process`.
    Exception,
    /// Currently being processed.
    Running,
    /// A rerun was requested for this document.
    RerunRequested,
    /// Gave up after the configured number of trials.
    TooManyTrials,
    /// The unit had no input to work with.
    NoData,
    /// Queued behind other work in the current pass.
    T2Queued,
    /// Waiting for a tied dependency to complete (deferred to a later pass).
    T2PendingDependency,
    /// The document's link matches no known state.
    T2UnknownLink,
    /// A tied dependency's document does not exist (misconfiguration).
    T2MissingDependency,
}

impl From<DocumentCode> for i32 {
    fn from(code: DocumentCode) -> Self {
        match code {
            DocumentCode::Ok => 0,
            DocumentCode::New => -1,
            DocumentCode::Error => -2,
            DocumentCode::InternalError => -3,
            DocumentCode::Exception => -4,
            DocumentCode::Running => -5,
            DocumentCode::RerunRequested => -6,
            DocumentCode::TooManyTrials => -7,
            DocumentCode::NoData => -8,
            DocumentCode::T2Queued => -2002,
            DocumentCode::T2PendingDependency => -2001,
            DocumentCode::T2UnknownLink => -2004,
            DocumentCode::T2MissingDependency => -2006,
        }
    }
}

impl TryFrom<i32> for DocumentCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, String> {
        Ok(match value {
            0 => Self::Ok,
            -1 => Self::New,
            -2 => Self::Error,
            -3 => Self::InternalError,
            -4 => Self::Exception,
            -5 => Self::Running,
            -6 => Self::RerunRequested,
            -7 => Self::TooManyTrials,
            -8 => Self::NoData,
            -2002 => Self::T2Queued,
            -2001 => Self::T2PendingDependency,
            -2004 => Self::T2UnknownLink,
            -2006 => Self::T2MissingDependency,
            other => return Err(format!("unknown document code: {other}")),
        })
    }
}

impl DocumentCode {
    /// Whether this code marks a document still awaiting (re)computation.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::New | Self::T2Queued | Self::T2PendingDependency | Self::RerunRequested
        )
    }

    /// Whether this code marks a successfully computed document.
    pub fn is_complete(self) -> bool {
        i32::from(self) >= 0
    }
}

impl std::fmt::Display for DocumentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}({})", i32::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_codes() {
        let codes = [
            DocumentCode::Ok,
            DocumentCode::New,
            DocumentCode::Error,
            DocumentCode::InternalError,
            DocumentCode::Exception,
            DocumentCode::Running,
            DocumentCode::RerunRequested,
            DocumentCode::TooManyTrials,
            DocumentCode::NoData,
            DocumentCode::T2Queued,
            DocumentCode::T2PendingDependency,
            DocumentCode::T2UnknownLink,
            DocumentCode::T2MissingDependency,
        ];
        for code in codes {
            let raw = i32::from(code);
            assert_eq!(DocumentCode::try_from(raw), Ok(code));
        }
    }

    #[test]
    fn pending_and_complete_are_disjoint() {
        assert!(DocumentCode::New.is_pending());
        assert!(DocumentCode::T2PendingDependency.is_pending());
        assert!(!DocumentCode::Ok.is_pending());
        assert!(DocumentCode::Ok.is_complete());
        assert!(!DocumentCode::Exception.is_complete());
        assert!(!DocumentCode::T2MissingDependency.is_complete());
    }

    #[test]
    fn serializes_as_integer() {
        let json = serde_json::to_string(&DocumentCode::T2PendingDependency).unwrap();
        assert_eq!(json, "-2001");
    }
}
