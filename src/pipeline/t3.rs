//! T3: reactor units over aggregated views
//!
//! Reactors receive read-only `SnapView`s spanning everything the store
//! knows per object. Their side effects (notifications, re-triggering) are
//! external to this crate; the framework's part is building the views,
//! catching failures, and journaling that each object was reviewed.

use super::PipelineError;
use crate::context::Context;
use crate::logging::RunLogger;
use crate::store::DocStore;
use crate::types::{DocumentCode, JournalRecord, StockId, unix_now};
use crate::view::SnapView;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct T3Stats {
    pub stocks: u64,
    pub reactors: u64,
    pub failed: u64,
}

pub struct ReactorProcessor<'a> {
    ctx: &'a Context,
    logger: RunLogger,
}

impl<'a> ReactorProcessor<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            logger: ctx.logger(),
        }
    }

    /// Run every configured reactor over views of all stocks.
    pub fn run(&self) -> Result<T3Stats, PipelineError> {
        let mut stats = T3Stats::default();
        let stock_ids = self.ctx.store().stock_ids()?;
        let mut views = Vec::with_capacity(stock_ids.len());
        for id in stock_ids {
            views.push(self.snap_view(id)?);
        }
        stats.stocks = views.len() as u64;

        for model in self.ctx.config().t3_units() {
            if self.ctx.cancel_token().is_cancelled() {
                info!("T3 cancelled; stopping pass");
                break;
            }
            let reactor = match self
                .ctx
                .loader()
                .load_reactor(self.ctx.config(), self.ctx.secrets(), model)
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(unit = %model.unit, error = %e, "reactor failed to load");
                    self.logger
                        .error(format!("reactor load failed: {e}"))
                        .tier(3)
                        .commit();
                    stats.failed += 1;
                    continue;
                }
            };

            match reactor.process(&views) {
                Ok(output) => {
                    stats.reactors += 1;
                    self.journal_review(&views, &model.unit)?;
                    if let Some(value) = output {
                        self.logger
                            .info(format!("reactor '{}' completed", model.unit))
                            .tier(3)
                            .extra("result", value)
                            .commit();
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    self.logger
                        .error(format!("reactor '{}' raised: {e}", model.unit))
                        .tier(3)
                        .commit();
                }
            }
        }

        info!(
            stocks = stats.stocks,
            reactors = stats.reactors,
            failed = stats.failed,
            "T3 pass complete"
        );
        Ok(stats)
    }

    /// Aggregate everything known about one stock.
    pub fn snap_view(&self, id: StockId) -> Result<SnapView, PipelineError> {
        Ok(SnapView {
            id,
            stock: self.ctx.store().get_stock(id)?,
            t0: self.ctx.store().datapoints_for(id)?,
            t1: self.ctx.store().states_for(id)?,
            t2: self.ctx.store().t2_docs_for(id)?,
            logs: self.ctx.store().logs_for_stock(id)?,
        })
    }

    /// Journal that the reactor reviewed each viewed object.
    fn journal_review(&self, views: &[SnapView], unit: &str) -> Result<(), PipelineError> {
        for view in views {
            let Some(mut stock) = self.ctx.store().get_stock(view.id)? else {
                continue;
            };
            stock.append_journal(JournalRecord {
                tier: 3,
                ts: unix_now(),
                process: unit.to_owned(),
                run: self.ctx.run_id(),
                code: i32::from(DocumentCode::Ok),
                channel: stock.channel.clone(),
                tag: Vec::new(),
                duration: None,
                unit: Some(unit.to_owned()),
                traceid: BTreeMap::new(),
                extra: None,
            });
            self.ctx.store().upsert_stock(&stock)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::secret::StaticVault;
    use crate::store::{DocStore, MemStore};
    use crate::types::StockDocument;
    use crate::units::UnitLoader;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(config: serde_json::Value) -> Context {
        Context::new(
            GlobalConfig::from_value(config).expect("config"),
            Arc::new(MemStore::new()),
            Arc::new(StaticVault::default()),
            UnitLoader::with_builtins(),
            13,
        )
    }

    #[test]
    fn reactor_runs_and_journals_review() {
        let ctx = ctx(json!({"t3": [{"unit": "ChannelDigest"}]}));
        let mut stock = StockDocument::new(1);
        stock.touch_channel("SNE");
        ctx.store().upsert_stock(&stock).unwrap();

        let stats = ReactorProcessor::new(&ctx).run().unwrap();
        assert_eq!(stats.stocks, 1);
        assert_eq!(stats.reactors, 1);

        let stock = ctx.store().get_stock(1).unwrap().unwrap();
        let t3 = stock.journal_entries(Some(3), None);
        assert_eq!(t3.len(), 1);
        assert_eq!(t3[0].unit.as_deref(), Some("ChannelDigest"));

        // Reactor output lands in the run's logs
        let logs = ctx.store().logs_for_run(13).unwrap();
        assert!(logs.iter().any(|l| l.msg.contains("ChannelDigest")));
    }

    #[test]
    fn unknown_reactor_is_recorded_not_fatal() {
        let ctx = ctx(json!({"t3": [{"unit": "NoSuchReactor"}, {"unit": "ChannelDigest"}]}));
        ctx.store().upsert_stock(&StockDocument::new(1)).unwrap();

        let stats = ReactorProcessor::new(&ctx).run().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reactors, 1);
    }

    #[test]
    fn snap_view_spans_all_tiers() {
        let ctx = ctx(json!({}));
        ctx.store().upsert_stock(&StockDocument::new(5)).unwrap();
        let view = ReactorProcessor::new(&ctx).snap_view(5).unwrap();
        assert_eq!(view.id, 5);
        assert!(view.stock.is_some());
        assert!(view.t0.is_empty());
        assert!(view.t2.is_empty());
    }
}
