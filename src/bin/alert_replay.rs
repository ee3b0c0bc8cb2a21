//! Synthetic alert replay
//!
//! Drives a full pipeline session with generated alerts, for demos and
//! smoke-testing a deployment without a captured stream:
//!
//! ```bash
//! alert-replay --stocks 5 --alerts 200 --db /tmp/borealis-replay
//! ```

use anyhow::{Context as _, Result};
use borealis::ingest::{AlertSource, SyntheticSource};
use borealis::pipeline::RunSession;
use borealis::{Context, GlobalConfig};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "alert-replay", about = "Replay synthetic alerts through the pipeline")]
struct Args {
    /// Number of distinct objects in the synthetic population
    #[arg(long, default_value_t = 5)]
    stocks: i64,

    /// Total alerts to generate
    #[arg(long, default_value_t = 100)]
    alerts: usize,

    /// RNG seed (same seed, same stream)
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Store path
    #[arg(long, default_value = "borealis-replay-db")]
    db: String,
}

/// Channel layout used when no config file is involved: one channel taking
/// everything, computing stats plus a tied trend per state.
fn replay_config(db: &str) -> Result<GlobalConfig> {
    let value = serde_json::json!({
        "resource": {"db": db},
        "channel": [{
            "name": "REPLAY",
            "filter": {"unit": "MagnitudeFilter", "config": {"max": 21.0}},
            "t2": [
                {"unit": "MeanFlux"},
                {"unit": "FluxTrend"},
                {"unit": "ChannelCensus"}
            ]
        }],
        "t3": [{"unit": "ChannelDigest"}]
    });
    Ok(GlobalConfig::from_value(value)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = replay_config(&args.db)?;
    let ctx = Arc::new(Context::build(config).context("initializing context")?);

    let alerts = SyntheticSource::new(args.stocks, args.alerts, args.seed)
        .collect_batch(args.alerts)
        .await
        .context("generating alerts")?;
    info!(alerts = alerts.len(), stocks = args.stocks, "replaying synthetic stream");

    let stats = RunSession::new(ctx.clone())
        .execute(&alerts)
        .await
        .context("run failed")?;
    ctx.close().context("closing store")?;

    info!(
        accepted = stats.t0.accepted,
        states = stats.t1.states_created,
        completed = stats.t2.completed,
        failed = stats.t2.failed,
        "replay complete"
    );
    Ok(())
}
