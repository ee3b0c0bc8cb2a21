//! Alert stream sources
//!
//! The pipeline consumes `AlertPacket`s; where they come from is behind the
//! `AlertSource` seam. Two sources ship with the crate: a JSON-lines file
//! reader for replaying captured streams, and a synthetic generator for
//! exercising the pipeline without data.

mod jsonl;
mod synthetic;

pub use jsonl::JsonLinesSource;
pub use synthetic::SyntheticSource;

use crate::types::AlertPacket;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed alert at line {line}: {problem}")]
    Malformed { line: usize, problem: String },
}

/// A pull-based stream of alerts.
#[async_trait]
pub trait AlertSource: Send {
    /// Next alert, or `None` when the stream is exhausted.
    async fn next_alert(&mut self) -> Result<Option<AlertPacket>, IngestError>;

    /// Drain the source into a batch, bounded by `max`.
    async fn collect_batch(&mut self, max: usize) -> Result<Vec<AlertPacket>, IngestError> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.next_alert().await? {
                Some(alert) => batch.push(alert),
                None => break,
            }
        }
        Ok(batch)
    }
}
