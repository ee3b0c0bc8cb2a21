//! Synthetic alert generator
//!
//! Produces a configurable number of alerts over a small population of
//! objects, each with a brightening flux curve plus noise. Used by the
//! `alert-replay` binary and the integration tests.

use super::{AlertSource, IngestError};
use crate::types::alert::AlertDataPoint;
use crate::types::AlertPacket;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticSource {
    rng: StdRng,
    stocks: i64,
    total: usize,
    emitted: usize,
    next_dp_id: i64,
}

impl SyntheticSource {
    /// `stocks` objects, `total` alerts, deterministic for a given seed.
    pub fn new(stocks: i64, total: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            stocks: stocks.max(1),
            total,
            emitted: 0,
            next_dp_id: 1,
        }
    }
}

#[async_trait]
impl AlertSource for SyntheticSource {
    async fn next_alert(&mut self) -> Result<Option<AlertPacket>, IngestError> {
        if self.emitted >= self.total {
            return Ok(None);
        }
        self.emitted += 1;

        let stock = 1 + (self.emitted as i64 - 1) % self.stocks;
        let epoch = self.emitted as f64;
        // Brightening trend with per-alert jitter
        let flux = 10.0 + epoch * 0.5 + self.rng.gen_range(-1.0..1.0);
        let mag = 20.0 - (flux / 10.0);

        let id = self.next_dp_id;
        self.next_dp_id += 1;

        let mut body = serde_json::Map::new();
        body.insert("flux".into(), serde_json::json!(flux));
        body.insert("mag".into(), serde_json::json!(mag));

        Ok(Some(AlertPacket {
            id,
            stock,
            names: vec![format!("SYN{stock:04}")],
            datapoints: vec![AlertDataPoint {
                id,
                ts: epoch,
                body,
            }],
            tag: vec!["synthetic".to_owned()],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_requested_count_across_stocks() {
        let mut source = SyntheticSource::new(3, 10, 7);
        let batch = source.collect_batch(100).await.unwrap();
        assert_eq!(batch.len(), 10);
        let stocks: std::collections::BTreeSet<i64> =
            batch.iter().map(|a| a.stock).collect();
        assert_eq!(stocks, [1, 2, 3].into_iter().collect());
        assert!(source.next_alert().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_seed_is_deterministic() {
        let a = SyntheticSource::new(2, 5, 42).collect_batch(10).await.unwrap();
        let b = SyntheticSource::new(2, 5, 42).collect_batch(10).await.unwrap();
        let flux = |batch: &[AlertPacket]| -> Vec<f64> {
            batch
                .iter()
                .map(|al| al.datapoints[0].body["flux"].as_f64().unwrap())
                .collect()
        };
        assert_eq!(flux(&a), flux(&b));
    }
}
