//! Content-addressed links between tier documents
//!
//! A `StateLink` is the identity of a T1 state: the md5 digest of the sorted,
//! deduplicated ids of its constituent datapoints. Recompiling a state from
//! the same datapoint set therefore yields the same link, which is what makes
//! T2 scheduling idempotent.

use super::{DataPointId, StockId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identity of a compiled T1 state (md5 over its datapoint ids).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateLink([u8; 16]);

impl StateLink {
    /// Compute the link for a set of datapoint ids.
    ///
    /// Ids are sorted and deduplicated before hashing, so insertion order
    /// never affects the resulting link.
    pub fn from_datapoint_ids(ids: &[DataPointId]) -> Self {
        let mut sorted: Vec<DataPointId> = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut buf = Vec::with_capacity(sorted.len() * 8);
        for id in &sorted {
            buf.extend_from_slice(&id.to_be_bytes());
        }
        Self(md5::compute(&buf).0)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 32-character lowercase hex string back into a link.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for StateLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StateLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateLink({})", self.to_hex())
    }
}

impl Serialize for StateLink {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StateLink {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| D::Error::custom(format!("invalid state link: {s}")))
    }
}

/// Input reference of a T2 document.
///
/// Most T2 units are bound to a T1 state, but stock-bound and point-bound
/// computations reference the stock or a single datapoint instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum T2Link {
    /// A compiled T1 state (the common case).
    State(StateLink),
    /// A single datapoint.
    DataPoint(DataPointId),
    /// The stock record itself.
    Stock(StockId),
}

impl T2Link {
    /// Canonical byte encoding used when hashing T2 identity keys.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Self::State(link) => {
                let mut v = vec![b's'];
                v.extend_from_slice(link.as_bytes());
                v
            }
            Self::DataPoint(id) => {
                let mut v = vec![b'd'];
                v.extend_from_slice(&id.to_be_bytes());
                v
            }
            Self::Stock(id) => {
                let mut v = vec![b'k'];
                v.extend_from_slice(&id.to_be_bytes());
                v
            }
        }
    }
}

impl fmt::Display for T2Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(link) => write!(f, "state:{link}"),
            Self::DataPoint(id) => write!(f, "dp:{id}"),
            Self::Stock(id) => write!(f, "stock:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_ignores_order_and_duplicates() {
        let a = StateLink::from_datapoint_ids(&[3, 1, 2]);
        let b = StateLink::from_datapoint_ids(&[1, 2, 3]);
        let c = StateLink::from_datapoint_ids(&[1, 1, 2, 3, 3]);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn link_differs_for_different_sets() {
        let a = StateLink::from_datapoint_ids(&[1, 2, 3]);
        let b = StateLink::from_datapoint_ids(&[1, 2, 4]);
        assert_ne!(a, b);
    }

    #[test]
    fn hex_round_trip() {
        let link = StateLink::from_datapoint_ids(&[42, 7]);
        let hex = link.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(StateLink::from_hex(&hex), Some(link));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(StateLink::from_hex("zz").is_none());
        assert!(StateLink::from_hex(&"g".repeat(32)).is_none());
    }

    #[test]
    fn canonical_bytes_are_distinct_across_variants() {
        // Stock and datapoint links with the same numeric id must not collide
        let dp = T2Link::DataPoint(5).canonical_bytes();
        let st = T2Link::Stock(5).canonical_bytes();
        assert_ne!(dp, st);
    }
}
