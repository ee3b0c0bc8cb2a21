//! Global configuration
//!
//! The config file itself is loaded by an external collaborator (any
//! YAML-to-JSON or JSON loader); this module only ever consumes the nested
//! mapping. `GlobalConfig` freezes that mapping behind read-only accessors —
//! there is no mutation and no hot reload; a run sees one config from start
//! to finish.
//!
//! Recognized top-level sections:
//!
//! - `resource`:      external endpoints (database path/connection string)
//! - `secret`:        secret aliases — logical name → vault label
//! - `alias`:         named unit config blocks referencable from `UnitModel`
//! - `unit_defaults`: per-unit config defaults merged below everything else
//! - `channel`:       channel definitions (filter + T2 directives)
//! - `t2`:            T2 processor tuning (dependency policy, trials, workers)

pub mod resolver;
pub mod validation;

pub use resolver::{ConfigResolver, ResolvedConfig};
pub use validation::{ConfigSchema, FieldIssue, FieldSpec, FieldType, ValidationError};

use crate::types::ChannelId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Resolution-time configuration failure. Fatal to the scheduling of the
/// affected unit only, unless raised while parsing the global sections.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unit '{unit}': missing required field(s): {}", .fields.join(", "))]
    MissingFields { unit: String, fields: Vec<String> },

    #[error("unit '{unit}': config alias '{alias}' is not declared")]
    UnknownAlias { unit: String, alias: String },

    #[error("unit '{unit}': field '{field}' references undeclared secret '{alias}'")]
    UndeclaredSecret {
        unit: String,
        field: String,
        alias: String,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("config section '{section}': {problem}")]
    BadSection { section: String, problem: String },

    #[error("config file {path}: {problem}")]
    Unreadable { path: String, problem: String },
}

/// Specification of a processing unit: what to run and how configured.
/// Immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitModel {
    /// Registered unit name.
    pub unit: String,

    /// - absent: unit defaults only
    /// - string: a named alias from the `alias` section
    /// - mapping: inline config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// Values overriding whatever `config` resolved to. Override wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#override: Option<serde_json::Map<String, Value>>,
}

impl UnitModel {
    pub fn bare(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            config: None,
            r#override: None,
        }
    }

    pub fn with_config(unit: impl Into<String>, config: Value) -> Self {
        Self {
            unit: unit.into(),
            config: Some(config),
            r#override: None,
        }
    }
}

/// A channel definition: a science case with its T0 filter and the T2 units
/// scheduled for every state compiled in this channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelModel {
    pub name: ChannelId,

    /// Filter applied at T0. Absent means the channel accepts everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<UnitModel>,

    /// T2 units scheduled per compiled state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub t2: Vec<UnitModel>,
}

/// Policy for T2 documents whose tied dependency is not yet complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Mark the dependent pending and retry it on a later pass.
    Defer,
    /// Wait for the dependency within the same pass, bounded.
    Block {
        /// Total wait budget per dependency, seconds.
        timeout_sec: f64,
        /// Poll interval while waiting, milliseconds.
        #[serde(default = "default_poll_ms")]
        poll_ms: u64,
    },
}

fn default_poll_ms() -> u64 {
    50
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self::Defer
    }
}

/// T2 processor tuning, from the `t2` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct T2Settings {
    #[serde(default)]
    pub policy: DependencyPolicy,

    /// Attempts before a document is marked `TooManyTrials`.
    #[serde(default = "default_max_trials")]
    pub max_trials: u32,

    /// Concurrent per-stock workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_max_trials() -> u32 {
    3
}

fn default_workers() -> usize {
    4
}

impl Default for T2Settings {
    fn default() -> Self {
        Self {
            policy: DependencyPolicy::default(),
            max_trials: default_max_trials(),
            workers: default_workers(),
        }
    }
}

/// The frozen global configuration handed to `Context::build`.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    raw: serde_json::Map<String, Value>,
    channels: Vec<ChannelModel>,
    t2: T2Settings,
    t3: Vec<UnitModel>,
}

impl GlobalConfig {
    /// Freeze a nested mapping into a validated global config.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw = match value {
            Value::Object(map) => map,
            _ => {
                return Err(ConfigError::BadSection {
                    section: "<root>".to_owned(),
                    problem: "expected a mapping".to_owned(),
                })
            }
        };

        let channels = match raw.get("channel") {
            None => Vec::new(),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| ConfigError::BadSection {
                section: "channel".to_owned(),
                problem: e.to_string(),
            })?,
        };

        let t2 = match raw.get("t2") {
            None => T2Settings::default(),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| ConfigError::BadSection {
                section: "t2".to_owned(),
                problem: e.to_string(),
            })?,
        };

        let t3 = match raw.get("t3") {
            None => Vec::new(),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| ConfigError::BadSection {
                section: "t3".to_owned(),
                problem: e.to_string(),
            })?,
        };

        Ok(Self {
            raw,
            channels,
            t2,
            t3,
        })
    }

    /// Convenience loader for JSON config files. The file format boundary
    /// stays narrow: anything able to produce a `serde_json::Value` works.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            problem: e.to_string(),
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            problem: e.to_string(),
        })?;
        Self::from_value(value)
    }

    pub fn empty() -> Self {
        Self {
            raw: serde_json::Map::new(),
            channels: Vec::new(),
            t2: T2Settings::default(),
            t3: Vec::new(),
        }
    }

    pub fn channels(&self) -> &[ChannelModel] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelModel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn t2_settings(&self) -> &T2Settings {
        &self.t2
    }

    /// Reactor units run by the T3 processor, from the `t3` section.
    pub fn t3_units(&self) -> &[UnitModel] {
        &self.t3
    }

    /// A resource endpoint (e.g. the database path).
    pub fn resource(&self, name: &str) -> Option<&Value> {
        self.raw.get("resource")?.get(name)
    }

    /// Vault label behind a secret alias.
    pub fn secret_alias(&self, alias: &str) -> Option<&str> {
        self.raw.get("secret")?.get(alias)?.as_str()
    }

    /// Named config block from the `alias` section.
    pub fn config_alias(&self, name: &str) -> Option<&serde_json::Map<String, Value>> {
        self.raw.get("alias")?.get(name)?.as_object()
    }

    /// Per-unit defaults from the `unit_defaults` section.
    pub fn unit_defaults(&self, unit: &str) -> Option<&serde_json::Map<String, Value>> {
        self.raw.get("unit_defaults")?.get(unit)?.as_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> GlobalConfig {
        GlobalConfig::from_value(json!({
            "resource": {"db": "/tmp/borealis-db"},
            "secret": {"api_token": "prod/broker/token"},
            "alias": {"strict": {"min_points": 5}},
            "unit_defaults": {"MeanFlux": {"field_name": "flux"}},
            "channel": [
                {"name": "SNE", "t2": [{"unit": "MeanFlux"}]},
                {"name": "GRB", "filter": {"unit": "MagnitudeFilter"}}
            ],
            "t2": {"policy": {"block": {"timeout_sec": 2.0}}, "max_trials": 5}
        }))
        .unwrap()
    }

    #[test]
    fn sections_are_accessible() {
        let cfg = sample();
        assert_eq!(cfg.resource("db"), Some(&json!("/tmp/borealis-db")));
        assert_eq!(cfg.secret_alias("api_token"), Some("prod/broker/token"));
        assert_eq!(cfg.config_alias("strict").unwrap()["min_points"], json!(5));
        assert_eq!(
            cfg.unit_defaults("MeanFlux").unwrap()["field_name"],
            json!("flux")
        );
        assert_eq!(cfg.channels().len(), 2);
        assert!(cfg.channel("SNE").is_some());
        assert!(cfg.channel("XXX").is_none());
    }

    #[test]
    fn t2_settings_parse_block_policy() {
        let cfg = sample();
        assert_eq!(cfg.t2_settings().max_trials, 5);
        match &cfg.t2_settings().policy {
            DependencyPolicy::Block { timeout_sec, poll_ms } => {
                assert!((timeout_sec - 2.0).abs() < f64::EPSILON);
                assert_eq!(*poll_ms, 50);
            }
            DependencyPolicy::Defer => panic!("expected block policy"),
        }
    }

    #[test]
    fn missing_sections_default() {
        let cfg = GlobalConfig::from_value(json!({})).unwrap();
        assert!(cfg.channels().is_empty());
        assert_eq!(cfg.t2_settings().policy, DependencyPolicy::Defer);
        assert!(cfg.resource("db").is_none());
    }

    #[test]
    fn non_mapping_root_is_rejected() {
        assert!(GlobalConfig::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn malformed_channel_section_is_rejected() {
        let res = GlobalConfig::from_value(json!({"channel": [{"no_name": true}]}));
        assert!(matches!(res, Err(ConfigError::BadSection { .. })));
    }
}
