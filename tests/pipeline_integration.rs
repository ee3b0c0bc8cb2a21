//! End-to-end pipeline integration tests
//!
//! Exercises the full tier chain (T0 filter -> T1 state -> T2 units with a
//! tied dependency -> T3 view) over the in-memory store, plus persistence
//! and idempotence checks against a real sled store.

use borealis::config::GlobalConfig;
use borealis::pipeline::{ReactorProcessor, RunSession};
use borealis::secret::StaticVault;
use borealis::store::{DocStore, MemStore, SledStore};
use borealis::types::alert::AlertDataPoint;
use borealis::types::{AlertPacket, DocumentCode};
use borealis::units::UnitLoader;
use borealis::Context;
use serde_json::json;
use std::sync::Arc;

fn alert(stock: i64, ids_flux: &[(i64, f64)]) -> AlertPacket {
    AlertPacket {
        id: ids_flux[0].0,
        stock,
        names: vec![format!("OBJ{stock}")],
        datapoints: ids_flux
            .iter()
            .map(|&(id, flux)| {
                let mut body = serde_json::Map::new();
                body.insert("flux".into(), json!(flux));
                body.insert("mag".into(), json!(18.0));
                AlertDataPoint {
                    id,
                    ts: id as f64,
                    body,
                }
            })
            .collect(),
        tag: vec![],
    }
}

fn scenario_config() -> serde_json::Value {
    json!({
        "channel": [{
            "name": "SNE",
            "filter": {"unit": "MagnitudeFilter", "config": {"max": 19.0}},
            "t2": [
                {"unit": "MeanFlux"},
                {"unit": "FluxTrend"}
            ]
        }],
        "t3": [{"unit": "ChannelDigest"}]
    })
}

fn mem_context(config: serde_json::Value, run: i64) -> Arc<Context> {
    Arc::new(Context::new(
        GlobalConfig::from_value(config).expect("config"),
        Arc::new(MemStore::new()),
        Arc::new(StaticVault::default()),
        UnitLoader::with_builtins(),
        run,
    ))
}

/// The reference scenario: one object, 3 datapoints, filter accepts, unit
/// "A" (MeanFlux, no deps) completes, tied unit "B" (FluxTrend, depends on
/// A at the same link) runs only after A; the final view exposes both
/// results and per-unit journal records with complete codes.
#[tokio::test]
async fn three_datapoint_scenario() {
    let ctx = mem_context(scenario_config(), 1);
    let stats = RunSession::new(ctx.clone())
        .execute(&[alert(1, &[(1, 10.0), (2, 20.0), (3, 30.0)])])
        .await
        .expect("run");

    assert_eq!(stats.t0.accepted, 1);
    assert_eq!(stats.t1.states_created, 1);
    assert_eq!(stats.t2.docs, 2);
    assert_eq!(stats.t2.completed, 2);

    // Both T2 documents complete, B consumed A's mean
    let docs = ctx.store().t2_docs_for(1).expect("t2 docs");
    let mean = docs.iter().find(|d| d.unit == "MeanFlux").expect("A");
    let trend = docs.iter().find(|d| d.unit == "FluxTrend").expect("B");
    assert_eq!(mean.code, DocumentCode::Ok);
    assert_eq!(trend.code, DocumentCode::Ok);
    assert_eq!(mean.link, trend.link);
    let trend_result = trend.latest_result().expect("B result");
    assert!((trend_result["normalized_slope"].as_f64().expect("slope") - 0.5).abs() < 1e-9);

    // B executed after A: its attempt is not older than A's
    let a_ts = mean.body.last().expect("A attempt").ts;
    let b_ts = trend.body.last().expect("B attempt").ts;
    assert!(b_ts >= a_ts);

    // The SnapView exposes both results and the journal trail
    let view = ReactorProcessor::new(&ctx).snap_view(1).expect("view");
    assert!(view.t2_result("MeanFlux").is_some());
    assert!(view.t2_result("FluxTrend").is_some());
    let t2_journal = view.journal_entries(Some(2), None);
    assert_eq!(t2_journal.len(), 2);
    assert!(t2_journal.iter().all(|j| j.code == 0));

    // T3 reviewed the object
    assert_eq!(stats.t3.reactors, 1);
    let t3_journal = ctx
        .store()
        .get_stock(1)
        .expect("stock")
        .expect("stock doc")
        .journal_entries(Some(3), None)
        .len();
    assert_eq!(t3_journal, 1);
}

/// Re-running an identical session against a persistent store updates the
/// same documents instead of duplicating them.
#[tokio::test]
async fn rerun_over_sled_store_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("db");
    let alerts = [alert(1, &[(1, 10.0), (2, 20.0), (3, 30.0)])];

    let mut first_link = None;
    for run in 1..=2 {
        let store = Arc::new(SledStore::open(&db_path).expect("open sled"));
        let ctx = Arc::new(Context::new(
            GlobalConfig::from_value(scenario_config()).expect("config"),
            store,
            Arc::new(StaticVault::default()),
            UnitLoader::with_builtins(),
            run,
        ));
        RunSession::new(ctx.clone()).execute(&alerts).await.expect("run");

        let states = ctx.store().states_for(1).expect("states");
        assert_eq!(states.len(), 1, "run {run} duplicated states");
        match first_link {
            None => first_link = Some(states[0].link),
            // T1 idempotence: identical datapoint set, identical link
            Some(link) => assert_eq!(states[0].link, link),
        }

        let docs = ctx.store().t2_docs_for(1).expect("t2");
        assert_eq!(docs.len(), 2, "run {run} duplicated T2 documents");
        ctx.close().expect("close");
    }
}

/// Resolved configs shown to logs never carry raw secret values.
#[test]
fn resolved_config_redacts_secrets() {
    let global = GlobalConfig::from_value(json!({
        "secret": {"digest_token": "vault/digest"}
    }))
    .expect("config");
    let loader = UnitLoader::with_builtins();
    let model = borealis::UnitModel::with_config(
        "ChannelDigest",
        json!({"auth_token": "digest_token"}),
    );
    let resolved = loader.resolve_config(&global, &model).expect("resolve");

    let rendered = format!("{resolved:?}");
    assert!(rendered.contains("vault/digest"));
    assert!(!rendered.contains("tok-123"));

    // The raw value is only reachable through the provider
    let vault = StaticVault::from_pairs([("vault/digest", json!("tok-123"))]);
    let secret = resolved.secret("auth_token").expect("handle");
    assert_eq!(secret.get(&vault).expect("value"), json!("tok-123"));
}

/// A filter rejection is journaled with its reason; nothing downstream runs
/// for that object, and the run carries on.
#[tokio::test]
async fn rejection_is_journaled_and_run_continues() {
    let config = json!({
        "channel": [{
            "name": "SNE",
            "filter": {"unit": "MagnitudeFilter", "config": {"field_name": "flux", "max": 15.0}},
            "t2": [{"unit": "MeanFlux"}]
        }]
    });
    let ctx = mem_context(config, 2);
    // stock 1 passes (flux 10 <= 15), stock 2 fails (flux 50)
    let stats = RunSession::new(ctx.clone())
        .execute(&[alert(1, &[(1, 10.0)]), alert(2, &[(2, 50.0)])])
        .await
        .expect("run");

    assert_eq!(stats.t0.accepted, 1);
    assert_eq!(stats.t0.rejected, 1);

    let rejected = ctx.store().get_stock(2).expect("get").expect("doc");
    let entry = rejected.journal_entries(Some(0), None)[0];
    assert!(entry.tag.contains(&"rejected".to_owned()));
    assert!(rejected.channel.is_empty());
    assert!(ctx.store().t2_docs_for(2).expect("t2").is_empty());

    // The accepted sibling is unaffected
    let docs = ctx.store().t2_docs_for(1).expect("t2");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].code, DocumentCode::Ok);
}

/// Log documents for the run are retrievable and compactly keyed.
#[tokio::test]
async fn run_logs_are_persisted() {
    let config = json!({
        "channel": [{
            "name": "SNE",
            "t2": [{"unit": "UnknownUnitName"}]
        }]
    });
    let ctx = mem_context(config, 3);
    RunSession::new(ctx.clone())
        .execute(&[alert(1, &[(1, 10.0)])])
        .await
        .expect("run");

    let logs = ctx.store().logs_for_run(3).expect("logs");
    assert!(logs.iter().any(|l| l.msg.contains("UnknownUnitName")));
    let raw = serde_json::to_value(&logs[0]).expect("json");
    // Abbreviated storage keys
    assert!(raw.get("m").is_some());
    assert!(raw.get("r").is_some());
    assert!(raw.get("msg").is_none());
}
