//! JSON-lines alert replay source

use super::{AlertSource, IngestError};
use crate::types::AlertPacket;
use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Reads one `AlertPacket` per line from a captured stream file.
pub struct JsonLinesSource {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl JsonLinesSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

#[async_trait]
impl AlertSource for JsonLinesSource {
    async fn next_alert(&mut self) -> Result<Option<AlertPacket>, IngestError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| IngestError::Malformed {
                    line: self.line_no,
                    problem: e.to_string(),
                });
        }
    }
}
