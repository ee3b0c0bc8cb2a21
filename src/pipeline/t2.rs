//! T2: unit execution over scheduled documents
//!
//! The processor drains pending T2 documents in one pass:
//!
//! 1. every document's unit is instantiated (a load failure marks that
//!    document failed and skips it — siblings proceed);
//! 2. documents are grouped per stock and, within a stock, per link;
//!    tied-unit dependencies order each group topologically, and a cycle
//!    aborts the batch before any unit executes;
//! 3. stocks are processed concurrently on tokio tasks, bounded by the
//!    configured worker count — but all documents of one stock stay on one
//!    task, which is what serializes journal appends and T2 upserts per
//!    stock.
//!
//! Dependencies that are not co-scheduled resolve against the store. A
//! missing dependency document marks the dependent `T2MissingDependency`;
//! an incomplete one is handled per the configured policy: deferred to a
//! later pass, or waited for with a bounded timeout.

use super::deps::{self, DepNode, DependencyError};
use super::PipelineError;
use crate::config::{DependencyPolicy, T2Settings, UnitModel};
use crate::context::Context;
use crate::store::DocStore;
use crate::types::{
    DataPoint, DocumentCode, JournalAttributes, JournalRecord, StateDocument, StockId, T2Document,
    T2Key, T2Link, unix_now,
};
use crate::units::{T2DocView, T2Unit, UnitError, UnitOutput, UnitResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct T2Stats {
    pub docs: u64,
    pub completed: u64,
    pub no_data: u64,
    pub failed: u64,
    pub deferred: u64,
    pub missing_dependency: u64,
    pub timeouts: u64,
}

impl T2Stats {
    fn merge(&mut self, other: &Self) {
        self.docs += other.docs;
        self.completed += other.completed;
        self.no_data += other.no_data;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.missing_dependency += other.missing_dependency;
        self.timeouts += other.timeouts;
    }
}

/// A document paired with its loaded unit, in execution order.
struct PlannedDoc {
    doc: T2Document,
    unit: T2Unit,
}

pub struct T2Processor {
    ctx: Arc<Context>,
}

impl T2Processor {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// One full pass over all pending documents.
    pub async fn run(&self) -> Result<T2Stats, PipelineError> {
        let pending = self.ctx.store().pending_t2()?;
        if pending.is_empty() {
            return Ok(T2Stats::default());
        }

        // Plan first: instantiate units and order every group. Cycles are
        // configuration bugs and abort before anything executes.
        let mut stats = T2Stats::default();
        let plans = self.plan(pending, &mut stats)?;

        let settings = self.ctx.config().t2_settings().clone();
        let semaphore = Arc::new(Semaphore::new(settings.workers.max(1)));
        let mut handles = Vec::with_capacity(plans.len());

        for (stock, planned) in plans {
            let ctx = self.ctx.clone();
            let settings = settings.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| crate::store::StoreError::Database("semaphore closed".into()))?;
                process_stock(&ctx, stock, planned, &settings).await
            }));
        }

        for joined in futures::future::join_all(handles).await {
            let task_stats = joined
                .map_err(|e| crate::store::StoreError::Database(format!("worker panicked: {e}")))??;
            stats.merge(&task_stats);
        }

        info!(
            docs = stats.docs,
            completed = stats.completed,
            no_data = stats.no_data,
            failed = stats.failed,
            deferred = stats.deferred,
            missing = stats.missing_dependency,
            timeouts = stats.timeouts,
            "T2 pass complete"
        );
        Ok(stats)
    }

    /// Instantiate units and compute the execution order per stock.
    fn plan(
        &self,
        pending: Vec<T2Document>,
        stats: &mut T2Stats,
    ) -> Result<Vec<(StockId, Vec<PlannedDoc>)>, PipelineError> {
        let mut by_stock: BTreeMap<StockId, Vec<(T2Document, T2Unit)>> = BTreeMap::new();

        for doc in pending {
            let model = self.unit_model_for(&doc);
            match self
                .ctx
                .loader()
                .load_t2(self.ctx.config(), self.ctx.secrets(), &model)
            {
                Ok(unit) => by_stock.entry(doc.stock).or_default().push((doc, unit)),
                Err(e) => {
                    // Instantiation failure: fatal for this document only
                    warn!(unit = %doc.unit, stock = doc.stock, error = %e, "T2 unit failed to load");
                    stats.docs += 1;
                    stats.failed += 1;
                    let mut failed = doc;
                    failed.record_attempt(
                        self.ctx.run_id(),
                        0.0,
                        DocumentCode::InternalError,
                        None,
                    );
                    self.ctx.store().upsert_t2(&failed)?;
                    self.ctx
                        .logger()
                        .error(format!("unit load failed: {e}"))
                        .tier(2)
                        .stock(failed.stock)
                        .commit();
                }
            }
        }

        let mut plans = Vec::with_capacity(by_stock.len());
        for (stock, docs) in by_stock {
            // Group by link so dependency ordering stays state-local
            let mut groups: BTreeMap<Vec<u8>, Vec<(T2Document, T2Unit)>> = BTreeMap::new();
            for (doc, unit) in docs {
                groups
                    .entry(doc.link.canonical_bytes())
                    .or_default()
                    .push((doc, unit));
            }

            let mut planned = Vec::new();
            for (_, group) in groups {
                let nodes: Vec<DepNode> = group
                    .iter()
                    .map(|(doc, unit)| DepNode {
                        unit: doc.unit.clone(),
                        seq: doc.seq,
                        deps: unit.dependencies().into_iter().map(|d| d.unit).collect(),
                    })
                    .collect();
                let order = deps::execution_order(&nodes)?;

                let mut slots: Vec<Option<(T2Document, T2Unit)>> =
                    group.into_iter().map(Some).collect();
                for idx in order {
                    if let Some((doc, unit)) = slots[idx].take() {
                        planned.push(PlannedDoc { doc, unit });
                    }
                }
            }
            plans.push((stock, planned));
        }
        Ok(plans)
    }

    /// Recover the unit model that scheduled a document, via its channel's
    /// T2 directives (matched on unit name + config hash).
    fn unit_model_for(&self, doc: &T2Document) -> UnitModel {
        for channel in &doc.channel {
            if let Some(ch) = self.ctx.config().channel(channel) {
                for model in &ch.t2 {
                    if model.unit != doc.unit {
                        continue;
                    }
                    let hash = self
                        .ctx
                        .loader()
                        .resolve_config(self.ctx.config(), model)
                        .ok()
                        .and_then(|c| c.hash());
                    if hash == doc.config {
                        return model.clone();
                    }
                }
            }
        }
        UnitModel::bare(doc.unit.clone())
    }
}

/// Execute one stock's documents in planned order. Single writer: every
/// journal append and T2 upsert for this stock happens here.
async fn process_stock(
    ctx: &Context,
    stock: StockId,
    planned: Vec<PlannedDoc>,
    settings: &T2Settings,
) -> Result<T2Stats, crate::store::StoreError> {
    let mut stats = T2Stats::default();
    let mut stock_doc = ctx.store().get_stock(stock)?;

    for PlannedDoc { mut doc, unit } in planned {
        if ctx.cancel_token().is_cancelled() {
            info!(stock, "T2 cancelled; leaving remaining documents pending");
            break;
        }
        stats.docs += 1;

        if doc.trials >= settings.max_trials {
            doc.code = DocumentCode::TooManyTrials;
            ctx.store().upsert_t2(&doc)?;
            stats.failed += 1;
            journal_outcome(ctx, &mut stock_doc, &doc, None, None);
            continue;
        }

        // Mark running so concurrent blocking waiters see progress
        doc.code = DocumentCode::Running;
        ctx.store().upsert_t2(&doc)?;

        let outcome = execute_doc(ctx, &mut doc, &unit, settings).await?;
        match outcome.code {
            DocumentCode::Ok => stats.completed += 1,
            DocumentCode::NoData => stats.no_data += 1,
            DocumentCode::T2PendingDependency => stats.deferred += 1,
            DocumentCode::T2MissingDependency => stats.missing_dependency += 1,
            _ => stats.failed += 1,
        }
        if outcome.timed_out {
            stats.timeouts += 1;
        }

        ctx.store().upsert_t2(&doc)?;
        journal_outcome(ctx, &mut stock_doc, &doc, outcome.duration, outcome.journal);
    }

    if let Some(doc) = stock_doc {
        ctx.store().upsert_stock(&doc)?;
    }
    Ok(stats)
}

struct Outcome {
    code: DocumentCode,
    duration: Option<f64>,
    journal: Option<JournalAttributes>,
    timed_out: bool,
}

impl Outcome {
    fn plain(code: DocumentCode) -> Self {
        Self {
            code,
            duration: None,
            journal: None,
            timed_out: false,
        }
    }
}

/// Run one document's unit, updating the document in place. Store failures
/// propagate; unit failures are converted into codes.
async fn execute_doc(
    ctx: &Context,
    doc: &mut T2Document,
    unit: &T2Unit,
    settings: &T2Settings,
) -> Result<Outcome, crate::store::StoreError> {
    // Fetch the input the link points at
    let (state, dps) = match &doc.link {
        T2Link::State(link) => match ctx.store().get_state(doc.stock, link)? {
            Some(state) => {
                let all = ctx.store().datapoints_for(doc.stock)?;
                let dps: Vec<DataPoint> = all
                    .into_iter()
                    .filter(|dp| state.dps.contains(&dp.id))
                    .collect();
                (Some(state), dps)
            }
            None => {
                doc.record_attempt(ctx.run_id(), 0.0, DocumentCode::T2UnknownLink, None);
                return Ok(Outcome::plain(DocumentCode::T2UnknownLink));
            }
        },
        T2Link::Stock(_) | T2Link::DataPoint(_) => (None, Vec::new()),
    };

    // Resolve tied dependencies before invoking the unit
    let mut views: Vec<T2DocView> = Vec::new();
    let dependencies = unit.dependencies();
    doc.deps.clear();
    for dep in &dependencies {
        let dep_link = dep
            .link_override
            .as_ref()
            .and_then(|lo| {
                let empty_state = || StateDocument::compile(doc.stock, vec![], vec![], 0);
                let state_ref = state.clone().unwrap_or_else(empty_state);
                unit.get_link(lo, &state_ref, &dps)
            })
            .unwrap_or_else(|| doc.link.clone());
        doc.deps.push(dep_link.clone());

        match wait_for_dependency(ctx, doc, dep, &dep_link, settings).await? {
            DepLookup::Complete(view) => views.push(view),
            DepLookup::Missing => {
                doc.record_attempt(ctx.run_id(), 0.0, DocumentCode::T2MissingDependency, None);
                ctx.logger()
                    .warn(format!(
                        "dependency '{}' at {dep_link} has no document",
                        dep.unit
                    ))
                    .tier(2)
                    .stock(doc.stock)
                    .extra("unit", serde_json::Value::String(doc.unit.clone()))
                    .commit();
                return Ok(Outcome::plain(DocumentCode::T2MissingDependency));
            }
            DepLookup::Incomplete => match &settings.policy {
                DependencyPolicy::Defer => {
                    // No attempt recorded: the document goes back to pending
                    doc.code = DocumentCode::T2PendingDependency;
                    return Ok(Outcome::plain(DocumentCode::T2PendingDependency));
                }
                DependencyPolicy::Block { timeout_sec, .. } => {
                    let err = DependencyError::Timeout {
                        unit: doc.unit.clone(),
                        dependency: dep.unit.clone(),
                        waited_sec: *timeout_sec,
                    };
                    doc.record_attempt(ctx.run_id(), *timeout_sec, DocumentCode::Error, None);
                    ctx.logger()
                        .error(err.to_string())
                        .tier(2)
                        .stock(doc.stock)
                        .commit();
                    return Ok(Outcome {
                        code: DocumentCode::Error,
                        duration: Some(*timeout_sec),
                        journal: None,
                        timed_out: true,
                    });
                }
            },
        }
    }

    // Invoke
    let started = Instant::now();
    let result = invoke(unit, ctx, doc, state.as_ref(), &dps, &views)?;
    let duration = started.elapsed().as_secs_f64();

    let outcome = match result {
        Ok(UnitOutput::Value(value)) => {
            doc.record_attempt(ctx.run_id(), duration, DocumentCode::Ok, Some(value));
            Outcome {
                code: DocumentCode::Ok,
                duration: Some(duration),
                journal: None,
                timed_out: false,
            }
        }
        Ok(UnitOutput::Full(UnitResult {
            body,
            tag,
            code,
            journal,
        })) => {
            let code = code.unwrap_or(DocumentCode::Ok);
            doc.tag.extend(tag);
            doc.record_attempt(ctx.run_id(), duration, code, body);
            Outcome {
                code,
                duration: Some(duration),
                journal,
                timed_out: false,
            }
        }
        Ok(UnitOutput::NoData) => {
            doc.record_attempt(ctx.run_id(), duration, DocumentCode::NoData, None);
            Outcome {
                code: DocumentCode::NoData,
                duration: Some(duration),
                journal: None,
                timed_out: false,
            }
        }
        Err(e) => {
            debug!(unit = %doc.unit, stock = doc.stock, error = %e, "unit raised");
            doc.record_attempt(ctx.run_id(), duration, DocumentCode::Exception, None);
            ctx.logger()
                .error(format!("unit '{}' raised: {e}", doc.unit))
                .tier(2)
                .stock(doc.stock)
                .commit();
            Outcome {
                code: DocumentCode::Exception,
                duration: Some(duration),
                journal: None,
                timed_out: false,
            }
        }
    };
    Ok(outcome)
}

/// Dispatch to the unit's capability contract.
fn invoke(
    unit: &T2Unit,
    ctx: &Context,
    doc: &T2Document,
    state: Option<&StateDocument>,
    dps: &[DataPoint],
    views: &[T2DocView],
) -> Result<Result<UnitOutput, UnitError>, crate::store::StoreError> {
    let missing_state = || {
        Err(UnitError::Runtime(
            "document link carries no state".to_owned(),
        ))
    };
    Ok(match unit {
        T2Unit::State(u) => match state {
            Some(st) => u.process(st, dps),
            None => missing_state(),
        },
        T2Unit::TiedState(u) => match state {
            Some(st) => u.process(st, dps, views),
            None => missing_state(),
        },
        T2Unit::CustomState(u) => match state {
            Some(st) => u.build(st, dps).and_then(|input| u.process(&input)),
            None => missing_state(),
        },
        T2Unit::TiedCustomState(u) => match state {
            Some(st) => u
                .build(st, dps)
                .and_then(|input| u.process(&input, views)),
            None => missing_state(),
        },
        T2Unit::Stock(u) => match ctx.store().get_stock(doc.stock)? {
            Some(stock) => u.process(&stock),
            None => Err(UnitError::Runtime("stock document missing".to_owned())),
        },
    })
}

enum DepLookup {
    Complete(T2DocView),
    Incomplete,
    Missing,
}

/// Locate a dependency's document, waiting per the blocking policy when it
/// exists but is not yet complete.
async fn wait_for_dependency(
    ctx: &Context,
    doc: &T2Document,
    dep: &crate::units::T2Dependency,
    dep_link: &T2Link,
    settings: &T2Settings,
) -> Result<DepLookup, crate::store::StoreError> {
    let deadline = match &settings.policy {
        DependencyPolicy::Block { timeout_sec, .. } => {
            Some(Instant::now() + std::time::Duration::from_secs_f64(*timeout_sec))
        }
        DependencyPolicy::Defer => None,
    };
    let poll = match &settings.policy {
        DependencyPolicy::Block { poll_ms, .. } => std::time::Duration::from_millis(*poll_ms),
        DependencyPolicy::Defer => std::time::Duration::ZERO,
    };

    loop {
        let found = lookup_dependency(ctx, doc, dep, dep_link)?;
        match found {
            DepLookup::Incomplete => {
                if let Some(deadline) = deadline {
                    if Instant::now() < deadline && !ctx.cancel_token().is_cancelled() {
                        tokio::time::sleep(poll).await;
                        continue;
                    }
                }
                return Ok(DepLookup::Incomplete);
            }
            other => return Ok(other),
        }
    }
}

fn lookup_dependency(
    ctx: &Context,
    doc: &T2Document,
    dep: &crate::units::T2Dependency,
    dep_link: &T2Link,
) -> Result<DepLookup, crate::store::StoreError> {
    let candidates = match &dep.config {
        Some(map) => {
            // Config override pins the exact identity
            let model = UnitModel {
                unit: dep.unit.clone(),
                config: Some(serde_json::Value::Object(map.clone())),
                r#override: None,
            };
            let hash = ctx
                .loader()
                .resolve_config(ctx.config(), &model)
                .ok()
                .and_then(|c| c.hash());
            let key = T2Key {
                stock: doc.stock,
                unit: dep.unit.clone(),
                config: hash,
                link: dep_link.clone(),
            };
            ctx.store().get_t2(&key)?.into_iter().collect()
        }
        None => ctx.store().find_t2(doc.stock, &dep.unit, dep_link)?,
    };

    if candidates.is_empty() {
        return Ok(DepLookup::Missing);
    }
    match candidates.iter().find(|d| d.code == DocumentCode::Ok) {
        Some(done) => Ok(DepLookup::Complete(T2DocView::of(done))),
        None => Ok(DepLookup::Incomplete),
    }
}

/// Append the tier-2 journal record for one executed document.
fn journal_outcome(
    ctx: &Context,
    stock_doc: &mut Option<crate::types::StockDocument>,
    doc: &T2Document,
    duration: Option<f64>,
    attrs: Option<JournalAttributes>,
) {
    let Some(stock) = stock_doc.as_mut() else {
        return;
    };
    let record = JournalRecord {
        tier: 2,
        ts: unix_now(),
        process: doc
            .channel
            .first()
            .cloned()
            .unwrap_or_else(|| "t2".to_owned()),
        run: ctx.run_id(),
        code: i32::from(doc.code),
        channel: doc.channel.clone(),
        tag: Vec::new(),
        duration,
        unit: Some(doc.unit.clone()),
        traceid: BTreeMap::new(),
        extra: Some(
            [(
                "link".to_owned(),
                serde_json::Value::String(doc.link.to_string()),
            )]
            .into_iter()
            .collect(),
        ),
    };
    let record = match attrs {
        Some(attrs) => attrs.apply(record),
        None => record,
    };
    stock.append_journal(record);
}
