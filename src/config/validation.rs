//! Unit config schema validation
//!
//! Every registered unit declares a `ConfigSchema`: the fields it accepts,
//! their types, whether they are required, and their defaults. The merged
//! config is checked against the schema before construction; all offending
//! fields are collected into a single `ValidationError`, not just the first.

use serde_json::Value;
use thiserror::Error;

/// Accepted type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    /// A reference to a declared secret alias; resolved lazily, never stored
    /// as a raw value.
    Secret,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            // Secret references are written as the alias name
            Self::Str | Self::Secret => value.is_string(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Map => "map",
            Self::Secret => "secret",
        };
        write!(f, "{name}")
    }
}

/// One declared config field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, ty: FieldType, default: Value) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: Some(default),
        }
    }
}

/// The full declared schema of a unit's config.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    pub fields: Vec<FieldSpec>,
}

impl ConfigSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Defaults declared by the schema, as a config mapping.
    pub fn defaults(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.to_owned(), d)))
            .collect()
    }

    /// Type-check a merged config against this schema.
    ///
    /// Collects every offending field: unknown keys, type mismatches.
    /// Missing required fields are reported separately by the resolver
    /// (they are a resolution failure, not a shape failure).
    pub fn validate(&self, unit: &str, config: &serde_json::Map<String, Value>) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (key, value) in config {
            match self.field(key) {
                None => issues.push(FieldIssue {
                    field: key.clone(),
                    problem: "unknown field".to_owned(),
                }),
                Some(spec) if !spec.ty.matches(value) => issues.push(FieldIssue {
                    field: key.clone(),
                    problem: format!("expected {}, got {}", spec.ty, type_name(value)),
                }),
                Some(_) => {}
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            issues.sort_by(|a, b| a.field.cmp(&b.field));
            Err(ValidationError {
                unit: unit.to_owned(),
                issues,
            })
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// A single offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub problem: String,
}

/// Schema mismatch between a merged config and the unit's declaration.
/// Fatal to that unit's scheduled run; sibling units are unaffected.
#[derive(Debug, Clone, Error)]
#[error("invalid config for unit '{unit}': {}", format_issues(.issues))]
pub struct ValidationError {
    pub unit: String,
    pub issues: Vec<FieldIssue>,
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} ({})", i.field, i.problem))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::required("field_name", FieldType::Str),
            FieldSpec::with_default("min_points", FieldType::Int, json!(2)),
            FieldSpec::optional("threshold", FieldType::Float),
            FieldSpec::optional("token", FieldType::Secret),
        ])
    }

    fn map(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_config_passes() {
        let cfg = map(&[
            ("field_name", json!("flux")),
            ("min_points", json!(3)),
            ("threshold", json!(0.5)),
        ]);
        assert!(schema().validate("U", &cfg).is_ok());
    }

    #[test]
    fn int_is_accepted_where_float_expected() {
        let cfg = map(&[("field_name", json!("flux")), ("threshold", json!(2))]);
        assert!(schema().validate("U", &cfg).is_ok());
    }

    #[test]
    fn all_offending_fields_are_listed() {
        let cfg = map(&[
            ("field_name", json!(5)),     // wrong type
            ("min_points", json!("two")), // wrong type
            ("bogus", json!(true)),       // unknown
        ]);
        let err = schema().validate("U", &cfg).unwrap_err();
        assert_eq!(err.unit, "U");
        let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["bogus", "field_name", "min_points"]);
    }

    #[test]
    fn secret_fields_take_alias_strings() {
        let cfg = map(&[("field_name", json!("flux")), ("token", json!("api_token"))]);
        assert!(schema().validate("U", &cfg).is_ok());

        let bad = map(&[("field_name", json!("flux")), ("token", json!(42))]);
        assert!(schema().validate("U", &bad).is_err());
    }

    #[test]
    fn defaults_only_include_declared_defaults() {
        let d = schema().defaults();
        assert_eq!(d.len(), 1);
        assert_eq!(d["min_points"], json!(2));
    }
}
