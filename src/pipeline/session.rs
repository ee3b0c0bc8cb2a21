//! Run session: one tier-ordered pass over a batch of alerts
//!
//! Tiers can be scheduled independently (a T2-only pass over yesterday's
//! pending documents is a normal deployment), but the common case is a
//! full session: ingest, compile, compute, react. The session owns nothing
//! but the context reference; all state lives in the store.

use super::t0::{AlertProcessor, T0Stats};
use super::t1::{StateCompiler, T1Stats};
use super::t2::{T2Processor, T2Stats};
use super::t3::{ReactorProcessor, T3Stats};
use super::PipelineError;
use crate::context::Context;
use crate::types::AlertPacket;
use std::sync::Arc;
use tracing::info;

/// Which tiers a session executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSelection {
    pub t0: bool,
    pub t1: bool,
    pub t2: bool,
    pub t3: bool,
}

impl Default for TierSelection {
    fn default() -> Self {
        Self {
            t0: true,
            t1: true,
            t2: true,
            t3: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub t0: T0Stats,
    pub t1: T1Stats,
    pub t2: T2Stats,
    pub t3: T3Stats,
}

pub struct RunSession {
    ctx: Arc<Context>,
    tiers: TierSelection,
}

impl RunSession {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            tiers: TierSelection::default(),
        }
    }

    pub fn with_tiers(mut self, tiers: TierSelection) -> Self {
        self.tiers = tiers;
        self
    }

    /// Execute the selected tiers in order over the given alerts.
    ///
    /// Unit-level failures are persisted and do not surface here; an error
    /// return means an infrastructure failure or a dependency cycle, both
    /// fatal to the run.
    pub async fn execute(&self, alerts: &[AlertPacket]) -> Result<RunStats, PipelineError> {
        let run = self.ctx.run_id();
        info!(run, alerts = alerts.len(), "run session starting");
        let mut stats = RunStats::default();

        if self.tiers.t0 {
            stats.t0 = AlertProcessor::new(&self.ctx).process_batch(alerts)?;
        }
        if self.tiers.t1 {
            stats.t1 = StateCompiler::new(&self.ctx).run()?;
        }
        if self.tiers.t2 {
            stats.t2 = T2Processor::new(self.ctx.clone()).run().await?;
        }
        if self.tiers.t3 {
            stats.t3 = ReactorProcessor::new(&self.ctx).run()?;
        }

        info!(run, "run session complete");
        Ok(stats)
    }
}
