//! Builtin processing units
//!
//! A small set of concrete units, one per capability variant. They keep the
//! pipeline exercisable end to end (and serve as reference implementations
//! for plugin authors) without pretending to be real light-curve science.

use super::{
    CustomStateT2Unit, FilterUnit, FilterVerdict, ReactorUnit, StateT2Unit, StockT2Unit,
    T2Dependency, T2DocView, TiedCustomStateT2Unit, TiedStateT2Unit, UnitError, UnitOutput,
    UnitSpec, UnitVariant,
};
use crate::config::resolver::ResolvedConfig;
use crate::config::{ConfigSchema, FieldSpec, FieldType};
use crate::types::{DataPoint, StateDocument, StateLink, StockDocument, T2Link};
use crate::view::SnapView;
use serde_json::{Value, json};
use tracing::debug;

/// Register every builtin unit into a loader.
pub fn register_all(loader: &mut super::UnitLoader) {
    loader.register(
        "MagnitudeFilter",
        UnitSpec::filter(MagnitudeFilter::schema(), |cfg, _| {
            Ok(Box::new(MagnitudeFilter::from_config(cfg)))
        }),
    );
    loader.register(
        "MeanFlux",
        UnitSpec::t2(UnitVariant::State, MeanFlux::schema(), |cfg, _| {
            Ok(super::T2Unit::State(Box::new(MeanFlux::from_config(cfg))))
        }),
    );
    loader.register(
        "ChannelCensus",
        UnitSpec::t2(UnitVariant::Stock, ConfigSchema::default(), |_, _| {
            Ok(super::T2Unit::Stock(Box::new(ChannelCensus)))
        }),
    );
    loader.register(
        "PeakPoint",
        UnitSpec::t2(UnitVariant::CustomState, PeakPoint::schema(), |cfg, _| {
            Ok(super::T2Unit::CustomState(Box::new(PeakPoint::from_config(
                cfg,
            ))))
        }),
    );
    loader.register(
        "FluxTrend",
        UnitSpec::t2(UnitVariant::TiedState, FluxTrend::schema(), |cfg, _| {
            Ok(super::T2Unit::TiedState(Box::new(FluxTrend::from_config(
                cfg,
            ))))
        }),
    );
    loader.register(
        "NormalizedPeak",
        UnitSpec::t2(
            UnitVariant::TiedCustomState,
            NormalizedPeak::schema(),
            |cfg, _| {
                Ok(super::T2Unit::TiedCustomState(Box::new(
                    NormalizedPeak::from_config(cfg),
                )))
            },
        ),
    );
    loader.register(
        "ChannelDigest",
        UnitSpec::reactor(ChannelDigest::schema(), |cfg, secrets| {
            ChannelDigest::build(cfg, secrets).map(|u| Box::new(u) as Box<dyn ReactorUnit>)
        }),
    );
}

/// Parse a link-override mapping shared by the tied builtins.
///
/// Accepted forms: `{"state": "<hex>"}`, `{"dp": <id>}`, `{"stock": <id>}`.
fn parse_link_override(value: &Value) -> Option<T2Link> {
    let map = value.as_object()?;
    if let Some(hex) = map.get("state").and_then(Value::as_str) {
        return StateLink::from_hex(hex).map(T2Link::State);
    }
    if let Some(id) = map.get("dp").and_then(Value::as_i64) {
        return Some(T2Link::DataPoint(id));
    }
    if let Some(id) = map.get("stock").and_then(Value::as_i64) {
        return Some(T2Link::Stock(id));
    }
    None
}

// ============================================================================
// T0: MagnitudeFilter
// ============================================================================

/// Accepts alerts whose latest measurement is at least as bright as the
/// configured magnitude cut (smaller magnitude = brighter).
#[derive(Debug)]
pub struct MagnitudeFilter {
    field: String,
    max: f64,
    accept_tag: Option<String>,
}

impl MagnitudeFilter {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::with_default("field_name", FieldType::Str, json!("mag")),
            FieldSpec::with_default("max", FieldType::Float, json!(20.0)),
            FieldSpec::optional("accept_tag", FieldType::Str),
        ])
    }

    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self {
            field: cfg.get_str("field_name").unwrap_or("mag").to_owned(),
            max: cfg.get_f64("max").unwrap_or(20.0),
            accept_tag: cfg.get_str("accept_tag").map(str::to_owned),
        }
    }
}

impl FilterUnit for MagnitudeFilter {
    fn filter(&self, alert: &crate::types::AlertPacket) -> Result<FilterVerdict, UnitError> {
        let Some(latest) = alert.latest() else {
            return Ok(FilterVerdict::reject("empty alert"));
        };
        let Some(mag) = latest.body.get(&self.field).and_then(Value::as_f64) else {
            return Ok(FilterVerdict::reject(format!(
                "no '{}' in latest datapoint",
                self.field
            )));
        };
        if mag <= self.max {
            Ok(match &self.accept_tag {
                Some(tag) => FilterVerdict::accept_with_tag(tag.clone()),
                None => FilterVerdict::accept(),
            })
        } else {
            Ok(FilterVerdict::reject(format!(
                "{} {mag:.2} fainter than cut {:.2}",
                self.field, self.max
            )))
        }
    }
}

// ============================================================================
// T2 (state): MeanFlux
// ============================================================================

/// Summary statistics of one numeric field over a state's datapoints.
pub struct MeanFlux {
    field: String,
    min_points: usize,
}

impl MeanFlux {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::with_default("field_name", FieldType::Str, json!("flux")),
            FieldSpec::with_default("min_points", FieldType::Int, json!(1)),
        ])
    }

    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self {
            field: cfg.get_str("field_name").unwrap_or("flux").to_owned(),
            min_points: cfg.get_i64("min_points").unwrap_or(1).max(0) as usize,
        }
    }
}

impl StateT2Unit for MeanFlux {
    fn process(&self, _state: &StateDocument, dps: &[DataPoint]) -> Result<UnitOutput, UnitError> {
        let values: Vec<f64> = dps.iter().filter_map(|dp| dp.value(&self.field)).collect();
        if values.len() < self.min_points || values.is_empty() {
            return Ok(UnitOutput::NoData);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(UnitOutput::Value(json!({
            "field": self.field,
            "n": values.len(),
            "mean": mean,
            "std": var.sqrt(),
            "min": min,
            "max": max,
        })))
    }
}

// ============================================================================
// T2 (stock): ChannelCensus
// ============================================================================

/// Counts of channel memberships, names and journal entries on the stock.
pub struct ChannelCensus;

impl StockT2Unit for ChannelCensus {
    fn process(&self, stock: &StockDocument) -> Result<UnitOutput, UnitError> {
        Ok(UnitOutput::Value(json!({
            "channels": stock.channel.len(),
            "names": stock.name.len(),
            "journal_entries": stock.journal.len(),
        })))
    }
}

// ============================================================================
// T2 (custom state): PeakPoint
// ============================================================================

/// Custom-state unit: the build step extracts the datapoint with the peak
/// field value; process republishes it as the result.
pub struct PeakPoint {
    field: String,
}

impl PeakPoint {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![FieldSpec::with_default(
            "field_name",
            FieldType::Str,
            json!("flux"),
        )])
    }

    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self {
            field: cfg.get_str("field_name").unwrap_or("flux").to_owned(),
        }
    }

    fn peak<'a>(&self, dps: &'a [DataPoint]) -> Option<&'a DataPoint> {
        dps.iter()
            .filter(|dp| dp.value(&self.field).is_some())
            .max_by(|a, b| {
                let av = a.value(&self.field).unwrap_or(f64::NEG_INFINITY);
                let bv = b.value(&self.field).unwrap_or(f64::NEG_INFINITY);
                av.total_cmp(&bv)
            })
    }
}

impl CustomStateT2Unit for PeakPoint {
    fn build(
        &self,
        _state: &StateDocument,
        dps: &[DataPoint],
    ) -> Result<Value, UnitError> {
        Ok(match self.peak(dps) {
            Some(dp) => json!({"id": dp.id, "ts": dp.ts, "body": dp.body}),
            None => Value::Null,
        })
    }

    fn process(&self, input: &Value) -> Result<UnitOutput, UnitError> {
        if input.is_null() {
            return Ok(UnitOutput::NoData);
        }
        Ok(UnitOutput::Value(input.clone()))
    }
}

// ============================================================================
// T2 (tied state): FluxTrend
// ============================================================================

/// Linear trend of a numeric field over time, normalized by the mean
/// computed by its dependency (`MeanFlux` by default).
pub struct FluxTrend {
    field: String,
    dep_unit: String,
    dep_link: Option<Value>,
}

impl FluxTrend {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::with_default("field_name", FieldType::Str, json!("flux")),
            FieldSpec::with_default("dep_unit", FieldType::Str, json!("MeanFlux")),
            FieldSpec::optional("dep_link", FieldType::Map),
        ])
    }

    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self {
            field: cfg.get_str("field_name").unwrap_or("flux").to_owned(),
            dep_unit: cfg.get_str("dep_unit").unwrap_or("MeanFlux").to_owned(),
            dep_link: cfg.get("dep_link").cloned(),
        }
    }

    /// Least-squares slope of (ts, value) pairs.
    fn slope(points: &[(f64, f64)]) -> f64 {
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let num: f64 = points
            .iter()
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let den: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            num / den
        }
    }
}

impl TiedStateT2Unit for FluxTrend {
    fn dependencies(&self) -> Vec<T2Dependency> {
        vec![T2Dependency {
            unit: self.dep_unit.clone(),
            config: None,
            link_override: self.dep_link.clone(),
        }]
    }

    fn get_link(
        &self,
        link_override: &Value,
        _state: &StateDocument,
        _dps: &[DataPoint],
    ) -> Option<T2Link> {
        parse_link_override(link_override)
    }

    fn process(
        &self,
        _state: &StateDocument,
        dps: &[DataPoint],
        t2_views: &[T2DocView],
    ) -> Result<UnitOutput, UnitError> {
        let points: Vec<(f64, f64)> = dps
            .iter()
            .filter_map(|dp| dp.value(&self.field).map(|v| (dp.ts, v)))
            .collect();
        if points.len() < 2 {
            return Ok(UnitOutput::NoData);
        }

        let dep = t2_views
            .iter()
            .find(|v| v.unit == self.dep_unit)
            .ok_or_else(|| {
                UnitError::Runtime(format!("dependency view '{}' not provided", self.dep_unit))
            })?;
        let mean = dep
            .result
            .as_ref()
            .and_then(|r| r.get("mean"))
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                UnitError::Runtime(format!("dependency '{}' has no mean", self.dep_unit))
            })?;

        let slope = Self::slope(&points);
        let normalized = if mean.abs() < f64::EPSILON {
            slope
        } else {
            slope / mean
        };
        Ok(UnitOutput::Value(json!({
            "field": self.field,
            "slope": slope,
            "normalized_slope": normalized,
            "rising": slope > 0.0,
        })))
    }
}

// ============================================================================
// T2 (tied custom state): NormalizedPeak
// ============================================================================

/// Peak field value divided by the dependency's mean.
pub struct NormalizedPeak {
    field: String,
    dep_unit: String,
}

impl NormalizedPeak {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::with_default("field_name", FieldType::Str, json!("flux")),
            FieldSpec::with_default("dep_unit", FieldType::Str, json!("MeanFlux")),
        ])
    }

    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self {
            field: cfg.get_str("field_name").unwrap_or("flux").to_owned(),
            dep_unit: cfg.get_str("dep_unit").unwrap_or("MeanFlux").to_owned(),
        }
    }
}

impl TiedCustomStateT2Unit for NormalizedPeak {
    fn dependencies(&self) -> Vec<T2Dependency> {
        vec![T2Dependency::on(self.dep_unit.clone())]
    }

    fn build(
        &self,
        _state: &StateDocument,
        dps: &[DataPoint],
    ) -> Result<Value, UnitError> {
        let peak = dps
            .iter()
            .filter_map(|dp| dp.value(&self.field))
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(if peak.is_finite() {
            json!({"peak": peak})
        } else {
            Value::Null
        })
    }

    fn process(
        &self,
        input: &Value,
        t2_views: &[T2DocView],
    ) -> Result<UnitOutput, UnitError> {
        let Some(peak) = input.get("peak").and_then(Value::as_f64) else {
            return Ok(UnitOutput::NoData);
        };
        let mean = t2_views
            .iter()
            .find(|v| v.unit == self.dep_unit)
            .and_then(|v| v.result.as_ref())
            .and_then(|r| r.get("mean"))
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                UnitError::Runtime(format!("dependency '{}' has no mean", self.dep_unit))
            })?;
        if mean.abs() < f64::EPSILON {
            return Ok(UnitOutput::NoData);
        }
        Ok(UnitOutput::Value(json!({
            "peak": peak,
            "normalized": peak / mean,
        })))
    }
}

// ============================================================================
// T3: ChannelDigest
// ============================================================================

/// Reactor summarizing per-channel object counts across the viewed stocks.
///
/// An optional secret-typed `auth_token` demonstrates late secret binding:
/// the raw value is fetched once at construction and lives only inside the
/// unit instance.
pub struct ChannelDigest {
    auth_token: Option<String>,
}

impl ChannelDigest {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![FieldSpec::optional("auth_token", FieldType::Secret)])
    }

    pub fn build(
        cfg: &ResolvedConfig,
        secrets: &dyn crate::secret::SecretProvider,
    ) -> Result<Self, UnitError> {
        let auth_token = match cfg.secret("auth_token") {
            Some(handle) => Some(
                handle
                    .get_str(secrets)
                    .map_err(|e| UnitError::Construction(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self { auth_token })
    }
}

impl ReactorUnit for ChannelDigest {
    fn process(&self, views: &[SnapView]) -> Result<Option<Value>, UnitError> {
        let mut per_channel: std::collections::BTreeMap<String, u64> =
            std::collections::BTreeMap::new();
        for view in views {
            if let Some(stock) = &view.stock {
                for channel in &stock.channel {
                    *per_channel.entry(channel.clone()).or_insert(0) += 1;
                }
            }
            debug!(stock = view.id, summary = %view.content_summary(), "digest view");
        }
        Ok(Some(json!({
            "stocks": views.len(),
            "per_channel": per_channel,
            "authenticated": self.auth_token.is_some(),
        })))
    }
}
