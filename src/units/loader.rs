//! Unit registry and loader
//!
//! The loader owns the dispatch table from unit name to (variant, schema,
//! factory). Loading resolves the unit's config through the
//! `ConfigResolver` (which type-checks against the declared schema), then
//! hands the frozen config plus the secret provider to the factory. A
//! factory failure is fatal for that unit's scheduled run only — callers
//! must keep processing sibling units.

use super::builtin;
use super::{FilterUnit, ReactorUnit, T2Unit, UnitError, UnitVariant};
use crate::config::{ConfigError, ConfigResolver, ConfigSchema, GlobalConfig, UnitModel};
use crate::config::resolver::ResolvedConfig;
use crate::secret::{SecretError, SecretProvider};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unit '{unit}' is a {actual} unit, expected {expected}")]
    WrongVariant {
        unit: String,
        expected: &'static str,
        actual: UnitVariant,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("unit '{unit}': {source}")]
    Construction {
        unit: String,
        #[source]
        source: UnitError,
    },
}

type FilterFactory =
    Box<dyn Fn(&ResolvedConfig, &dyn SecretProvider) -> Result<Box<dyn FilterUnit>, UnitError> + Send + Sync>;
type T2Factory =
    Box<dyn Fn(&ResolvedConfig, &dyn SecretProvider) -> Result<T2Unit, UnitError> + Send + Sync>;
type ReactorFactory =
    Box<dyn Fn(&ResolvedConfig, &dyn SecretProvider) -> Result<Box<dyn ReactorUnit>, UnitError> + Send + Sync>;

enum Factory {
    Filter(FilterFactory),
    T2(T2Factory),
    Reactor(ReactorFactory),
}

/// Registry entry for one unit.
pub struct UnitSpec {
    pub variant: UnitVariant,
    pub schema: ConfigSchema,
    factory: Factory,
}

impl UnitSpec {
    pub fn filter(
        schema: ConfigSchema,
        factory: impl Fn(&ResolvedConfig, &dyn SecretProvider) -> Result<Box<dyn FilterUnit>, UnitError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            variant: UnitVariant::Filter,
            schema,
            factory: Factory::Filter(Box::new(factory)),
        }
    }

    pub fn t2(
        variant: UnitVariant,
        schema: ConfigSchema,
        factory: impl Fn(&ResolvedConfig, &dyn SecretProvider) -> Result<T2Unit, UnitError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        debug_assert!(variant.is_t2());
        Self {
            variant,
            schema,
            factory: Factory::T2(Box::new(factory)),
        }
    }

    pub fn reactor(
        schema: ConfigSchema,
        factory: impl Fn(&ResolvedConfig, &dyn SecretProvider) -> Result<Box<dyn ReactorUnit>, UnitError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            variant: UnitVariant::Reactor,
            schema,
            factory: Factory::Reactor(Box::new(factory)),
        }
    }
}

/// Maps unit names to specs and constructs instances.
pub struct UnitLoader {
    registry: HashMap<String, UnitSpec>,
}

impl UnitLoader {
    /// Empty loader; register units explicitly.
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
        }
    }

    /// Loader with all builtin units registered.
    pub fn with_builtins() -> Self {
        let mut loader = Self::new();
        builtin::register_all(&mut loader);
        loader
    }

    pub fn register(&mut self, name: impl Into<String>, spec: UnitSpec) {
        self.registry.insert(name.into(), spec);
    }

    pub fn spec(&self, name: &str) -> Option<&UnitSpec> {
        self.registry.get(name)
    }

    pub fn variant(&self, name: &str) -> Option<UnitVariant> {
        self.spec(name).map(|s| s.variant)
    }

    /// Resolve a unit's config without constructing it. Used by schedulers
    /// to compute T2 identity hashes.
    pub fn resolve_config(
        &self,
        global: &GlobalConfig,
        model: &UnitModel,
    ) -> Result<ResolvedConfig, LoadError> {
        let spec = self
            .spec(&model.unit)
            .ok_or_else(|| LoadError::UnknownUnit(model.unit.clone()))?;
        Ok(ConfigResolver::new(global).resolve(model, &spec.schema)?)
    }

    pub fn load_filter(
        &self,
        global: &GlobalConfig,
        secrets: &dyn SecretProvider,
        model: &UnitModel,
    ) -> Result<Box<dyn FilterUnit>, LoadError> {
        let (spec, config) = self.prepare(global, model)?;
        match &spec.factory {
            Factory::Filter(f) => f(&config, secrets).map_err(|source| LoadError::Construction {
                unit: model.unit.clone(),
                source,
            }),
            _ => Err(LoadError::WrongVariant {
                unit: model.unit.clone(),
                expected: "filter",
                actual: spec.variant,
            }),
        }
    }

    pub fn load_t2(
        &self,
        global: &GlobalConfig,
        secrets: &dyn SecretProvider,
        model: &UnitModel,
    ) -> Result<T2Unit, LoadError> {
        let (spec, config) = self.prepare(global, model)?;
        match &spec.factory {
            Factory::T2(f) => f(&config, secrets).map_err(|source| LoadError::Construction {
                unit: model.unit.clone(),
                source,
            }),
            _ => Err(LoadError::WrongVariant {
                unit: model.unit.clone(),
                expected: "t2",
                actual: spec.variant,
            }),
        }
    }

    pub fn load_reactor(
        &self,
        global: &GlobalConfig,
        secrets: &dyn SecretProvider,
        model: &UnitModel,
    ) -> Result<Box<dyn ReactorUnit>, LoadError> {
        let (spec, config) = self.prepare(global, model)?;
        match &spec.factory {
            Factory::Reactor(f) => f(&config, secrets).map_err(|source| LoadError::Construction {
                unit: model.unit.clone(),
                source,
            }),
            _ => Err(LoadError::WrongVariant {
                unit: model.unit.clone(),
                expected: "reactor",
                actual: spec.variant,
            }),
        }
    }

    fn prepare(
        &self,
        global: &GlobalConfig,
        model: &UnitModel,
    ) -> Result<(&UnitSpec, ResolvedConfig), LoadError> {
        let spec = self
            .spec(&model.unit)
            .ok_or_else(|| LoadError::UnknownUnit(model.unit.clone()))?;
        let config = ConfigResolver::new(global).resolve(model, &spec.schema)?;
        Ok((spec, config))
    }
}

impl Default for UnitLoader {
    fn default() -> Self {
        Self::with_builtins()
    }
}
