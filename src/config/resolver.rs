//! Unit config resolution
//!
//! `ConfigResolver::resolve` turns a `UnitModel` plus the unit's declared
//! schema into a frozen `ResolvedConfig`. Merge order, lowest precedence
//! first: schema defaults, global `unit_defaults`, named alias or inline
//! config, caller override. Secret-typed fields are late-bound: the resolved
//! config stores a `NamedSecret` handle, and the raw value is only fetched
//! from the provider at unit construction time.

use super::validation::{ConfigSchema, FieldType};
use super::{ConfigError, GlobalConfig, UnitModel};
use crate::secret::NamedSecret;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Immutable resolved unit configuration.
///
/// Plain fields and secret handles are kept apart; raw secret values never
/// enter this structure, so serializing or logging it cannot leak them.
#[derive(Clone)]
pub struct ResolvedConfig {
    unit: String,
    fields: BTreeMap<String, Value>,
    secrets: BTreeMap<String, NamedSecret>,
    /// Identity hash; `None` when the merged config equals the schema
    /// defaults untouched (matches the T2 document identity convention).
    hash: Option<u64>,
}

impl ResolvedConfig {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Lazy handle of a secret-typed field.
    pub fn secret(&self, field: &str) -> Option<&NamedSecret> {
        self.secrets.get(field)
    }

    pub fn hash(&self) -> Option<u64> {
        self.hash
    }

    /// Copy-on-override: a new config with the given plain-field overrides
    /// applied and the identity hash recomputed. `self` is untouched.
    pub fn with_override(&self, overrides: &serde_json::Map<String, Value>) -> Self {
        let mut fields = self.fields.clone();
        for (k, v) in overrides {
            fields.insert(k.clone(), v.clone());
        }
        let hash = Some(identity_hash(&fields, &self.secrets));
        Self {
            unit: self.unit.clone(),
            fields,
            secrets: self.secrets.clone(),
            hash,
        }
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("unit", &self.unit)
            .field("fields", &self.fields)
            .field("secrets", &self.secrets)
            .field("hash", &self.hash)
            .finish()
    }
}

/// Stable hash over the canonical form of a resolved config.
fn identity_hash(fields: &BTreeMap<String, Value>, secrets: &BTreeMap<String, NamedSecret>) -> u64 {
    let mut buf = Vec::new();
    for (k, v) in fields {
        buf.extend_from_slice(k.as_bytes());
        buf.push(0x1e);
        buf.extend_from_slice(v.to_string().as_bytes());
        buf.push(0x1f);
    }
    for (k, s) in secrets {
        buf.extend_from_slice(k.as_bytes());
        buf.push(0x1e);
        buf.extend_from_slice(s.label().as_bytes());
        buf.push(0x1f);
    }
    let digest = md5::compute(&buf).0;
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Resolves unit names plus overrides into validated configs.
pub struct ConfigResolver<'a> {
    global: &'a GlobalConfig,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(global: &'a GlobalConfig) -> Self {
        Self { global }
    }

    /// Resolve a unit model against the unit's declared schema.
    pub fn resolve(
        &self,
        model: &UnitModel,
        schema: &ConfigSchema,
    ) -> Result<ResolvedConfig, ConfigError> {
        let unit = &model.unit;
        let mut merged = schema.defaults();

        if let Some(defaults) = self.global.unit_defaults(unit) {
            merge_into(&mut merged, defaults);
        }

        match &model.config {
            None => {}
            Some(Value::String(alias)) => {
                let block =
                    self.global
                        .config_alias(alias)
                        .ok_or_else(|| ConfigError::UnknownAlias {
                            unit: unit.clone(),
                            alias: alias.clone(),
                        })?;
                merge_into(&mut merged, block);
            }
            Some(Value::Object(inline)) => merge_into(&mut merged, inline),
            Some(other) => {
                return Err(ConfigError::BadSection {
                    section: format!("unit '{unit}' config"),
                    problem: format!("expected alias name or mapping, got {other}"),
                })
            }
        }

        if let Some(overrides) = &model.r#override {
            merge_into(&mut merged, overrides);
        }

        schema.validate(unit, &merged)?;

        // Required-field check runs on the merged result, so a field may come
        // from any layer
        let missing: Vec<String> = schema
            .fields
            .iter()
            .filter(|f| f.required && !merged.contains_key(f.name))
            .map(|f| f.name.to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields {
                unit: unit.clone(),
                fields: missing,
            });
        }

        // Late-bind secrets: swap alias strings for handles
        let mut fields = BTreeMap::new();
        let mut secrets = BTreeMap::new();
        for (key, value) in merged {
            let is_secret = schema
                .field(&key)
                .map_or(false, |spec| spec.ty == FieldType::Secret);
            if is_secret {
                let alias = value.as_str().unwrap_or_default().to_owned();
                let label = self.global.secret_alias(&alias).ok_or_else(|| {
                    ConfigError::UndeclaredSecret {
                        unit: unit.clone(),
                        field: key.clone(),
                        alias: alias.clone(),
                    }
                })?;
                secrets.insert(key, NamedSecret::new(label));
            } else {
                fields.insert(key, value);
            }
        }

        let untouched = model.config.is_none()
            && model.r#override.is_none()
            && self.global.unit_defaults(unit).is_none();
        let hash = if untouched {
            None
        } else {
            Some(identity_hash(&fields, &secrets))
        };

        Ok(ResolvedConfig {
            unit: unit.clone(),
            fields,
            secrets,
            hash,
        })
    }
}

fn merge_into(
    dst: &mut serde_json::Map<String, Value>,
    src: &serde_json::Map<String, Value>,
) {
    for (k, v) in src {
        dst.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validation::FieldSpec;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::required("field_name", FieldType::Str),
            FieldSpec::with_default("min_points", FieldType::Int, json!(2)),
            FieldSpec::optional("token", FieldType::Secret),
        ])
    }

    fn global() -> GlobalConfig {
        GlobalConfig::from_value(json!({
            "secret": {"api_token": "prod/token"},
            "alias": {"strict": {"min_points": 9}},
            "unit_defaults": {"MeanFlux": {"field_name": "flux"}}
        }))
        .unwrap()
    }

    #[test]
    fn merge_order_override_wins() {
        let g = global();
        let resolver = ConfigResolver::new(&g);
        let model = UnitModel {
            unit: "MeanFlux".into(),
            config: Some(json!("strict")),
            r#override: Some(
                json!({"min_points": 1}).as_object().cloned().unwrap_or_default(),
            ),
        };
        let cfg = resolver.resolve(&model, &schema()).unwrap();
        // defaults(2) < alias(9) < override(1)
        assert_eq!(cfg.get_i64("min_points"), Some(1));
        assert_eq!(cfg.get_str("field_name"), Some("flux"));
    }

    #[test]
    fn missing_required_field_lists_it() {
        let g = GlobalConfig::empty();
        let resolver = ConfigResolver::new(&g);
        let model = UnitModel::bare("MeanFlux");
        match resolver.resolve(&model, &schema()) {
            Err(ConfigError::MissingFields { fields, .. }) => {
                assert_eq!(fields, vec!["field_name".to_string()]);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn unknown_alias_fails() {
        let g = GlobalConfig::empty();
        let resolver = ConfigResolver::new(&g);
        let model = UnitModel::with_config("MeanFlux", json!("nope"));
        assert!(matches!(
            resolver.resolve(&model, &schema()),
            Err(ConfigError::UnknownAlias { .. })
        ));
    }

    #[test]
    fn secret_fields_become_handles() {
        let g = global();
        let resolver = ConfigResolver::new(&g);
        let model = UnitModel::with_config("MeanFlux", json!({"token": "api_token"}));
        let cfg = resolver.resolve(&model, &schema()).unwrap();

        // The vault label is bound, the raw value absent everywhere
        assert_eq!(cfg.secret("token").map(NamedSecret::label), Some("prod/token"));
        assert!(cfg.get("token").is_none());
        let debug = format!("{cfg:?}");
        assert!(debug.contains("<NamedSecret:prod/token>"));
    }

    #[test]
    fn undeclared_secret_alias_fails() {
        let g = GlobalConfig::from_value(json!({})).unwrap();
        let resolver = ConfigResolver::new(&g);
        let model = UnitModel::with_config(
            "MeanFlux",
            json!({"field_name": "flux", "token": "api_token"}),
        );
        assert!(matches!(
            resolver.resolve(&model, &schema()),
            Err(ConfigError::UndeclaredSecret { .. })
        ));
    }

    #[test]
    fn untouched_defaults_have_no_hash() {
        let g = GlobalConfig::empty();
        let resolver = ConfigResolver::new(&g);
        let s = ConfigSchema::new(vec![FieldSpec::with_default(
            "min_points",
            FieldType::Int,
            json!(2),
        )]);
        let cfg = resolver.resolve(&UnitModel::bare("X"), &s).unwrap();
        assert!(cfg.hash().is_none());

        let explicit = UnitModel::with_config("X", json!({"min_points": 2}));
        let cfg = resolver.resolve(&explicit, &s).unwrap();
        assert!(cfg.hash().is_some());
    }

    #[test]
    fn identical_configs_hash_identically() {
        let g = global();
        let resolver = ConfigResolver::new(&g);
        let model = UnitModel::with_config("MeanFlux", json!({"min_points": 4}));
        let a = resolver.resolve(&model, &schema()).unwrap();
        let b = resolver.resolve(&model, &schema()).unwrap();
        assert_eq!(a.hash(), b.hash());

        let other = UnitModel::with_config("MeanFlux", json!({"min_points": 5}));
        let c = resolver.resolve(&other, &schema()).unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn with_override_is_copy_on_write() {
        let g = global();
        let resolver = ConfigResolver::new(&g);
        let base = resolver
            .resolve(&UnitModel::bare("MeanFlux"), &schema())
            .unwrap();
        let overrides = json!({"min_points": 7});
        let patched = base.with_override(overrides.as_object().unwrap());
        assert_eq!(patched.get_i64("min_points"), Some(7));
        assert_eq!(base.get_i64("min_points"), Some(2));
        assert_ne!(base.hash(), patched.hash());
    }
}
