//! Borealis - tiered alert processing
//!
//! Runs a full pipeline session over a captured alert stream:
//!
//! ```bash
//! borealis --config borealis.json --alerts alerts.jsonl
//!
//! # T2-only pass over whatever is pending in the store
//! borealis --config borealis.json --tiers t2
//! ```
//!
//! `RUST_LOG` controls log verbosity (default: info).

use anyhow::{Context as _, Result};
use borealis::ingest::{AlertSource, JsonLinesSource};
use borealis::pipeline::{RunSession, TierSelection};
use borealis::{Context, GlobalConfig};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "borealis", about = "Tiered alert processing framework")]
struct Args {
    /// Path to the global config (JSON mapping)
    #[arg(long, env = "BOREALIS_CONFIG", default_value = "borealis.json")]
    config: String,

    /// Alert stream to ingest (JSON lines); omit for store-only passes
    #[arg(long)]
    alerts: Option<String>,

    /// Comma-separated tiers to run (default: all), e.g. "t0,t1,t2"
    #[arg(long)]
    tiers: Option<String>,

    /// Maximum number of alerts to ingest from the stream
    #[arg(long, default_value_t = 100_000)]
    max_alerts: usize,
}

fn parse_tiers(spec: &str) -> TierSelection {
    let mut tiers = TierSelection {
        t0: false,
        t1: false,
        t2: false,
        t3: false,
    };
    for part in spec.split(',') {
        match part.trim().to_ascii_lowercase().as_str() {
            "t0" => tiers.t0 = true,
            "t1" => tiers.t1 = true,
            "t2" => tiers.t2 = true,
            "t3" => tiers.t3 = true,
            other => error!(tier = other, "unknown tier in --tiers, ignoring"),
        }
    }
    tiers
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

    let config = GlobalConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;
    let ctx = Arc::new(Context::build(config).context("initializing run context")?);

    // Ctrl-C stops scheduling new work; in-flight units finish
    let cancel = ctx.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; aborting run");
            cancel.cancel();
        }
    });

    let alerts = match &args.alerts {
        Some(path) => {
            let mut source = JsonLinesSource::open(path)
                .await
                .with_context(|| format!("opening alert stream {path}"))?;
            source
                .collect_batch(args.max_alerts)
                .await
                .context("reading alert stream")?
        }
        None => Vec::new(),
    };

    let tiers = args
        .tiers
        .as_deref()
        .map_or_else(TierSelection::default, parse_tiers);

    let session = RunSession::new(ctx.clone()).with_tiers(tiers);
    let result = session.execute(&alerts).await;

    // Teardown happens on both paths; the store handle is released here
    let close_result = ctx.close();

    let stats = result.context("run failed")?;
    close_result.context("closing store")?;

    info!(
        run = ctx.run_id(),
        accepted = stats.t0.accepted,
        rejected = stats.t0.rejected,
        states = stats.t1.states_created,
        t2_completed = stats.t2.completed,
        t2_failed = stats.t2.failed,
        reactors = stats.t3.reactors,
        "done"
    );
    Ok(())
}
