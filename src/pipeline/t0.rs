//! T0: alert ingestion and filtering
//!
//! Every alert is judged by each channel's filter unit. Accepting channels
//! get the alert's datapoints ingested under their membership; a rejection
//! is journaled with its reason and processing for that (alert, channel)
//! pair stops there. Either way the object's outcome is discoverable from
//! its journal afterwards.

use super::PipelineError;
use crate::context::Context;
use crate::logging::RunLogger;
use crate::store::DocStore;
use crate::types::{
    AlertPacket, ChannelId, DataPoint, DocumentCode, JournalRecord, StockDocument, unix_now,
};
use crate::units::{FilterUnit, FilterVerdict};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Journal code for an alert filtered out by a channel (positive: a valid,
/// processed outcome, not an error).
pub const JOURNAL_CODE_REJECTED: i32 = 1;

#[derive(Debug, Default, Clone)]
pub struct T0Stats {
    pub alerts: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub datapoints: u64,
}

/// One channel's loaded filter. `None` filter means the channel accepts
/// every alert.
struct ChannelFilter {
    channel: ChannelId,
    filter: Option<Box<dyn FilterUnit>>,
}

pub struct AlertProcessor<'a> {
    ctx: &'a Context,
    channels: Vec<ChannelFilter>,
    logger: RunLogger,
}

impl<'a> AlertProcessor<'a> {
    /// Load every channel's filter unit up front. A filter that fails to
    /// load disables its channel for this run (logged); sibling channels
    /// are unaffected.
    pub fn new(ctx: &'a Context) -> Self {
        let logger = ctx.logger();
        let mut channels = Vec::new();
        for model in ctx.config().channels() {
            let filter = match &model.filter {
                None => None,
                Some(unit_model) => {
                    match ctx
                        .loader()
                        .load_filter(ctx.config(), ctx.secrets(), unit_model)
                    {
                        Ok(f) => Some(f),
                        Err(e) => {
                            warn!(channel = %model.name, error = %e, "filter failed to load; channel disabled for this run");
                            logger
                                .error(format!("filter load failed: {e}"))
                                .tier(0)
                                .channel(model.name.clone())
                                .commit();
                            continue;
                        }
                    }
                }
            };
            channels.push(ChannelFilter {
                channel: model.name.clone(),
                filter,
            });
        }
        Self {
            ctx,
            channels,
            logger,
        }
    }

    /// Ingest a batch of alerts. Returns per-batch counters; store failures
    /// abort the run.
    pub fn process_batch(&self, alerts: &[AlertPacket]) -> Result<T0Stats, PipelineError> {
        let mut stats = T0Stats::default();
        for alert in alerts {
            if self.ctx.cancel_token().is_cancelled() {
                info!(processed = stats.alerts, "T0 cancelled; stopping batch");
                break;
            }
            stats.alerts += 1;
            self.process_alert(alert, &mut stats)?;
        }
        info!(
            alerts = stats.alerts,
            accepted = stats.accepted,
            rejected = stats.rejected,
            datapoints = stats.datapoints,
            "T0 batch complete"
        );
        Ok(stats)
    }

    fn process_alert(&self, alert: &AlertPacket, stats: &mut T0Stats) -> Result<(), PipelineError> {
        let started = Instant::now();
        let mut stock = self
            .ctx
            .store()
            .get_stock(alert.stock)?
            .unwrap_or_else(|| StockDocument::new(alert.stock));
        stock.add_names(&alert.names);

        // Judge the alert per channel; collect accepting channels first so
        // datapoints are written once with full membership
        let mut accepted: Vec<(ChannelId, Option<String>)> = Vec::new();
        for cf in &self.channels {
            let verdict = match &cf.filter {
                None => FilterVerdict::accept(),
                Some(filter) => match filter.filter(alert) {
                    Ok(v) => v,
                    Err(e) => {
                        // A filter raising is a unit failure for this channel
                        // only; journal it and move on
                        self.logger
                            .error(format!("filter error: {e}"))
                            .tier(0)
                            .stock(alert.stock)
                            .channel(cf.channel.clone())
                            .commit();
                        stock.append_journal(self.journal(alert, &cf.channel, i32::from(DocumentCode::Exception), started));
                        continue;
                    }
                },
            };
            match verdict {
                FilterVerdict::Accept { tag } => {
                    debug!(stock = alert.stock, channel = %cf.channel, "alert accepted");
                    accepted.push((cf.channel.clone(), tag));
                }
                FilterVerdict::Reject { reason } => {
                    debug!(stock = alert.stock, channel = %cf.channel, %reason, "alert rejected");
                    stats.rejected += 1;
                    let mut record =
                        self.journal(alert, &cf.channel, JOURNAL_CODE_REJECTED, started);
                    record.tag.push("rejected".to_owned());
                    record
                        .extra
                        .get_or_insert_with(serde_json::Map::new)
                        .insert("reason".to_owned(), serde_json::Value::String(reason));
                    stock.append_journal(record);
                }
            }
        }

        if !accepted.is_empty() {
            stats.accepted += 1;
            let channel_names: Vec<ChannelId> =
                accepted.iter().map(|(c, _)| c.clone()).collect();

            for adp in &alert.datapoints {
                // Merge membership with whatever earlier alerts recorded
                let mut dp = match self
                    .ctx
                    .store()
                    .datapoints_for(alert.stock)?
                    .into_iter()
                    .find(|d| d.id == adp.id)
                {
                    Some(existing) => existing,
                    None => {
                        stats.datapoints += 1;
                        DataPoint {
                            id: adp.id,
                            stock: alert.stock,
                            ts: adp.ts,
                            channel: Vec::new(),
                            tag: alert.tag.clone(),
                            body: adp.body.clone(),
                        }
                    }
                };
                for channel in &channel_names {
                    dp.add_channel(channel);
                }
                self.ctx.store().upsert_datapoint(&dp)?;
            }

            for (channel, tag) in &accepted {
                stock.touch_channel(channel);
                let mut record = self.journal(alert, channel, i32::from(DocumentCode::Ok), started);
                if let Some(tag) = tag {
                    record.tag.push(tag.clone());
                    stock.add_tags(std::slice::from_ref(tag));
                }
                stock.append_journal(record);
            }
        }

        self.ctx.store().upsert_stock(&stock)?;
        Ok(())
    }

    fn journal(
        &self,
        alert: &AlertPacket,
        channel: &str,
        code: i32,
        started: Instant,
    ) -> JournalRecord {
        JournalRecord {
            tier: 0,
            ts: unix_now(),
            process: channel.to_owned(),
            run: self.ctx.run_id(),
            code,
            channel: vec![channel.to_owned()],
            tag: Vec::new(),
            duration: Some(started.elapsed().as_secs_f64()),
            unit: None,
            traceid: BTreeMap::from([("alert".to_owned(), alert.id)]),
            extra: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::secret::StaticVault;
    use crate::store::{DocStore, MemStore};
    use crate::units::UnitLoader;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx_with_channels(config: serde_json::Value) -> Context {
        Context::new(
            GlobalConfig::from_value(config).expect("config"),
            Arc::new(MemStore::new()),
            Arc::new(StaticVault::default()),
            UnitLoader::with_builtins(),
            99,
        )
    }

    fn alert(stock: i64, id: i64, mag: f64) -> AlertPacket {
        let mut body = serde_json::Map::new();
        body.insert("mag".into(), json!(mag));
        AlertPacket {
            id,
            stock,
            names: vec![format!("OBJ{stock}")],
            datapoints: vec![crate::types::alert::AlertDataPoint {
                id,
                ts: id as f64,
                body,
            }],
            tag: vec![],
        }
    }

    #[test]
    fn accepted_alert_ingests_datapoints_and_journals() {
        let ctx = ctx_with_channels(json!({
            "channel": [{
                "name": "SNE",
                "filter": {"unit": "MagnitudeFilter", "config": {"max": 19.0}}
            }]
        }));
        let t0 = AlertProcessor::new(&ctx);
        let stats = t0.process_batch(&[alert(1, 100, 18.0)]).unwrap();

        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.datapoints, 1);

        let stock = ctx.store().get_stock(1).unwrap().unwrap();
        assert_eq!(stock.channel, vec!["SNE".to_string()]);
        assert_eq!(stock.name, vec!["OBJ1".to_string()]);
        assert_eq!(stock.journal.len(), 1);
        assert_eq!(stock.journal[0].tier, 0);
        assert_eq!(stock.journal[0].code, 0);

        let dps = ctx.store().datapoints_for(1).unwrap();
        assert_eq!(dps.len(), 1);
        assert_eq!(dps[0].channel, vec!["SNE".to_string()]);
    }

    #[test]
    fn rejected_alert_journals_reason_and_stops() {
        let ctx = ctx_with_channels(json!({
            "channel": [{
                "name": "SNE",
                "filter": {"unit": "MagnitudeFilter", "config": {"max": 19.0}}
            }]
        }));
        let t0 = AlertProcessor::new(&ctx);
        let stats = t0.process_batch(&[alert(2, 200, 21.5)]).unwrap();

        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.rejected, 1);

        let stock = ctx.store().get_stock(2).unwrap().unwrap();
        // No channel membership, but the rejection is on the record
        assert!(stock.channel.is_empty());
        assert_eq!(stock.journal.len(), 1);
        assert_eq!(stock.journal[0].code, JOURNAL_CODE_REJECTED);
        assert!(stock.journal[0].tag.contains(&"rejected".to_owned()));
        let reason = stock.journal[0].extra.as_ref().unwrap()["reason"]
            .as_str()
            .unwrap()
            .to_owned();
        assert!(reason.contains("fainter"));
        // And nothing was ingested
        assert!(ctx.store().datapoints_for(2).unwrap().is_empty());
    }

    #[test]
    fn filterless_channel_accepts_everything() {
        let ctx = ctx_with_channels(json!({"channel": [{"name": "ALL"}]}));
        let t0 = AlertProcessor::new(&ctx);
        let stats = t0.process_batch(&[alert(3, 300, 25.0)]).unwrap();
        assert_eq!(stats.accepted, 1);
    }

    #[test]
    fn membership_merges_across_channels() {
        let ctx = ctx_with_channels(json!({
            "channel": [
                {"name": "ALL"},
                {"name": "BRIGHT", "filter": {"unit": "MagnitudeFilter", "config": {"max": 15.0}}}
            ]
        }));
        let t0 = AlertProcessor::new(&ctx);
        t0.process_batch(&[alert(4, 400, 14.0)]).unwrap();

        let dps = ctx.store().datapoints_for(4).unwrap();
        assert_eq!(dps[0].channel, vec!["ALL".to_string(), "BRIGHT".to_string()]);

        let stock = ctx.store().get_stock(4).unwrap().unwrap();
        assert_eq!(stock.journal.len(), 2);
    }

    #[test]
    fn cancellation_stops_scheduling() {
        let ctx = ctx_with_channels(json!({"channel": [{"name": "ALL"}]}));
        ctx.cancel_token().cancel();
        let t0 = AlertProcessor::new(&ctx);
        let stats = t0
            .process_batch(&[alert(5, 500, 10.0), alert(6, 600, 10.0)])
            .unwrap();
        assert_eq!(stats.alerts, 0);
    }
}
