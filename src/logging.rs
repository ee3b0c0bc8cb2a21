//! Run-scoped persistent logging
//!
//! Tracing handles operator-facing output; the `RunLogger` additionally
//! persists compact `LogDocument` entries through the store so a run's
//! messages can be audited from the database alone. Persistence is
//! best-effort: a failed log write is reported via tracing and never aborts
//! processing.

use crate::store::DocStore;
use crate::types::{ChannelId, LogDocument, LogSeverity, StockId, Tier};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct RunLogger {
    store: Arc<dyn DocStore>,
    run: i64,
}

impl RunLogger {
    pub fn new(store: Arc<dyn DocStore>, run: i64) -> Self {
        Self { store, run }
    }

    pub fn run(&self) -> i64 {
        self.run
    }

    pub fn info(&self, msg: impl Into<String>) -> LogEntry<'_> {
        self.entry(LogSeverity::Info, msg)
    }

    pub fn warn(&self, msg: impl Into<String>) -> LogEntry<'_> {
        self.entry(LogSeverity::Warn, msg)
    }

    pub fn error(&self, msg: impl Into<String>) -> LogEntry<'_> {
        self.entry(LogSeverity::Error, msg)
    }

    fn entry(&self, severity: LogSeverity, msg: impl Into<String>) -> LogEntry<'_> {
        LogEntry {
            logger: self,
            doc: LogDocument {
                run: self.run,
                severity,
                msg: msg.into(),
                flag: None,
                stock: None,
                channel: Vec::new(),
                extra: None,
            },
        }
    }
}

/// Builder for one log document; `commit` writes it.
pub struct LogEntry<'a> {
    logger: &'a RunLogger,
    doc: LogDocument,
}

impl LogEntry<'_> {
    pub fn tier(mut self, tier: Tier) -> Self {
        self.doc.flag = Some(tier);
        self
    }

    pub fn stock(mut self, stock: StockId) -> Self {
        self.doc.stock = Some(stock);
        self
    }

    pub fn channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.doc.channel.push(channel.into());
        self
    }

    pub fn extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.doc
            .extra
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_owned(), value);
        self
    }

    pub fn commit(self) {
        match self.doc.severity {
            LogSeverity::Warn => warn!(
                run = self.doc.run,
                stock = ?self.doc.stock,
                "{}",
                self.doc.msg
            ),
            LogSeverity::Error => error!(
                run = self.doc.run,
                stock = ?self.doc.stock,
                "{}",
                self.doc.msg
            ),
            _ => tracing::info!(
                run = self.doc.run,
                stock = ?self.doc.stock,
                "{}",
                self.doc.msg
            ),
        }
        if let Err(e) = self.logger.store.insert_log(&self.doc) {
            error!(error = %e, "failed to persist log document");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use serde_json::json;

    #[test]
    fn entries_are_persisted_with_context() {
        let store = Arc::new(MemStore::new());
        let logger = RunLogger::new(store.clone(), 11);

        logger
            .warn("dependency missing")
            .tier(2)
            .stock(5)
            .channel("SNE")
            .extra("unit", json!("FluxTrend"))
            .commit();

        let logs = store.logs_for_run(11).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].severity, LogSeverity::Warn);
        assert_eq!(logs[0].flag, Some(2));
        assert_eq!(logs[0].stock, Some(5));
        assert_eq!(logs[0].channel, vec!["SNE".to_string()]);
        assert_eq!(logs[0].extra.as_ref().unwrap()["unit"], json!("FluxTrend"));
    }

    #[test]
    fn logs_are_scoped_to_their_run() {
        let store = Arc::new(MemStore::new());
        RunLogger::new(store.clone(), 1).info("a").commit();
        RunLogger::new(store.clone(), 2).info("b").commit();
        assert_eq!(store.logs_for_run(1).unwrap().len(), 1);
        assert_eq!(store.logs_for_run(2).unwrap().len(), 1);
    }
}
