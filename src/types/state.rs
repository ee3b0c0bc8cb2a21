//! T1 state documents (compiled datapoint groups)

use super::{ChannelId, DataPointId, StateLink, StockId, Tag, unix_now};
use serde::{Deserialize, Serialize};

/// A content-addressed group of datapoints belonging to one stock.
///
/// The `link` is derived from the constituent datapoint ids, so compiling
/// the same set twice produces the same document. Other tiers reference the
/// state exclusively through this link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub link: StateLink,

    pub stock: StockId,

    /// Ids of the constituent datapoints, sorted ascending.
    pub dps: Vec<DataPointId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel: Vec<ChannelId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,

    /// Run that compiled this state.
    pub run: i64,

    /// Compilation epoch.
    pub added: f64,
}

impl StateDocument {
    /// Compile a state from a datapoint set. Ids are sorted and deduplicated;
    /// the link is computed from the normalized set.
    pub fn compile(
        stock: StockId,
        mut dps: Vec<DataPointId>,
        channel: Vec<ChannelId>,
        run: i64,
    ) -> Self {
        dps.sort_unstable();
        dps.dedup();
        let link = StateLink::from_datapoint_ids(&dps);
        Self {
            link,
            stock,
            dps,
            channel,
            tag: Vec::new(),
            run,
            added: unix_now(),
        }
    }

    pub fn len(&self) -> usize {
        self.dps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_is_idempotent() {
        let a = StateDocument::compile(1, vec![3, 1, 2], vec![], 10);
        let b = StateDocument::compile(1, vec![2, 3, 1, 1], vec![], 11);
        assert_eq!(a.link, b.link);
        assert_eq!(a.dps, vec![1, 2, 3]);
    }

    #[test]
    fn different_sets_produce_different_links() {
        let a = StateDocument::compile(1, vec![1, 2], vec![], 10);
        let b = StateDocument::compile(1, vec![1, 2, 3], vec![], 10);
        assert_ne!(a.link, b.link);
    }
}
