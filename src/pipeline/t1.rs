//! T1: state compilation and T2 scheduling
//!
//! For every stock with ingested datapoints, each member channel's
//! datapoints are grouped into a content-addressed state. Compiling an
//! identical datapoint set yields an identical link, so repeated passes
//! never duplicate states — and the T2 documents scheduled off a state
//! inherit that idempotence through their identity keys.

use super::PipelineError;
use crate::context::Context;
use crate::logging::RunLogger;
use crate::store::DocStore;
use crate::types::{
    DocumentCode, JournalRecord, StateDocument, StockId, T2Document, T2Key, T2Link, unix_now,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct T1Stats {
    pub stocks: u64,
    pub states_created: u64,
    pub states_existing: u64,
    pub t2_scheduled: u64,
}

pub struct StateCompiler<'a> {
    ctx: &'a Context,
    logger: RunLogger,
}

impl<'a> StateCompiler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            logger: ctx.logger(),
        }
    }

    /// Compile states for every stock in the store and schedule the
    /// channels' T2 units.
    pub fn run(&self) -> Result<T1Stats, PipelineError> {
        let mut stats = T1Stats::default();
        for stock in self.ctx.store().stock_ids()? {
            if self.ctx.cancel_token().is_cancelled() {
                info!(processed = stats.stocks, "T1 cancelled; stopping pass");
                break;
            }
            stats.stocks += 1;
            self.compile_stock(stock, &mut stats)?;
        }
        info!(
            stocks = stats.stocks,
            created = stats.states_created,
            existing = stats.states_existing,
            t2_scheduled = stats.t2_scheduled,
            "T1 pass complete"
        );
        Ok(stats)
    }

    fn compile_stock(&self, stock: StockId, stats: &mut T1Stats) -> Result<(), PipelineError> {
        let Some(mut stock_doc) = self.ctx.store().get_stock(stock)? else {
            return Ok(());
        };
        let dps = self.ctx.store().datapoints_for(stock)?;

        for channel in stock_doc.channel.clone() {
            let member_ids: Vec<i64> = dps
                .iter()
                .filter(|dp| dp.channel.iter().any(|c| c == &channel))
                .map(|dp| dp.id)
                .collect();
            if member_ids.is_empty() {
                continue;
            }

            let state = StateDocument::compile(
                stock,
                member_ids,
                vec![channel.clone()],
                self.ctx.run_id(),
            );
            let link = state.link;
            let created = self.ctx.store().insert_state(&state)?;
            if created {
                stats.states_created += 1;
                debug!(stock, channel = %channel, link = %link, n = state.len(), "state compiled");
                stock_doc.append_journal(JournalRecord {
                    tier: 1,
                    ts: unix_now(),
                    process: channel.clone(),
                    run: self.ctx.run_id(),
                    code: i32::from(DocumentCode::Ok),
                    channel: vec![channel.clone()],
                    tag: Vec::new(),
                    duration: None,
                    unit: None,
                    traceid: BTreeMap::new(),
                    extra: Some(
                        [("link".to_owned(), serde_json::Value::String(link.to_hex()))]
                            .into_iter()
                            .collect(),
                    ),
                });
            } else {
                stats.states_existing += 1;
            }

            stats.t2_scheduled += self.schedule_t2(stock, &channel, &link)?;
        }

        self.ctx.store().upsert_stock(&stock_doc)?;
        Ok(())
    }

    /// Create pending T2 documents for a channel's unit directives.
    /// Scheduling is idempotent: an existing identity is left untouched.
    fn schedule_t2(
        &self,
        stock: StockId,
        channel: &str,
        link: &crate::types::StateLink,
    ) -> Result<u64, PipelineError> {
        let Some(channel_model) = self.ctx.config().channel(channel) else {
            return Ok(0);
        };

        let mut scheduled = 0;
        for (seq, model) in channel_model.t2.iter().enumerate() {
            let Some(variant) = self.ctx.loader().variant(&model.unit) else {
                warn!(unit = %model.unit, channel, "unknown T2 unit in channel config");
                self.logger
                    .error(format!("unknown T2 unit '{}'", model.unit))
                    .tier(1)
                    .stock(stock)
                    .channel(channel.to_owned())
                    .commit();
                continue;
            };
            if !variant.is_t2() {
                warn!(unit = %model.unit, %variant, "channel t2 directive names a non-T2 unit");
                continue;
            }

            // Resolution failure disables this unit only
            let resolved = match self.ctx.loader().resolve_config(self.ctx.config(), model) {
                Ok(r) => r,
                Err(e) => {
                    self.logger
                        .error(format!("T2 config resolution failed: {e}"))
                        .tier(1)
                        .stock(stock)
                        .channel(channel.to_owned())
                        .extra("unit", serde_json::Value::String(model.unit.clone()))
                        .commit();
                    continue;
                }
            };

            let t2_link = match variant {
                crate::units::UnitVariant::Stock => T2Link::Stock(stock),
                _ => T2Link::State(*link),
            };
            let key = T2Key {
                stock,
                unit: model.unit.clone(),
                config: resolved.hash(),
                link: t2_link,
            };
            if self.ctx.store().get_t2(&key)?.is_none() {
                let doc = T2Document::schedule(
                    key,
                    vec![channel.to_owned()],
                    self.ctx.run_id(),
                    seq as u32,
                );
                self.ctx.store().upsert_t2(&doc)?;
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }
}
