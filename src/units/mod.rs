//! Processing unit contracts
//!
//! Units are the pluggable computation plugins of the pipeline. Each tier
//! expects a specific capability: T0 filters judge alerts, T2 units compute
//! derived results over states/stocks/custom inputs, T3 reactors run over
//! aggregated views. Tied T2 variants additionally declare dependencies on
//! other T2 units' results.
//!
//! Variants are tagged trait objects selected by (tier, tied?, custom?) —
//! a flat dispatch table, not an inheritance tree. The `UnitLoader` is the
//! only component that constructs units.

pub mod builtin;
pub mod loader;

pub use loader::{LoadError, UnitLoader, UnitSpec};

use crate::types::{
    AlertPacket, DataPoint, DocumentCode, JournalAttributes, StateDocument, StockDocument, T2Link,
    Tag,
};
use crate::view::SnapView;
use thiserror::Error;

/// Failure raised inside a unit. Always caught at the tier-processor
/// boundary and converted into a document code plus journal record.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("unit runtime error: {0}")]
    Runtime(String),

    #[error("unit construction failed: {0}")]
    Construction(String),
}

/// The capability variant a unit was registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitVariant {
    /// T0 alert filter.
    Filter,
    /// T2 over a compiled state.
    State,
    /// T2 over the stock record.
    Stock,
    /// T2 over a custom-built input.
    CustomState,
    /// State T2 with tied dependencies.
    TiedState,
    /// Custom-state T2 with tied dependencies.
    TiedCustomState,
    /// T3 reactor.
    Reactor,
}

impl UnitVariant {
    pub fn is_t2(self) -> bool {
        !matches!(self, Self::Filter | Self::Reactor)
    }

    pub fn is_tied(self) -> bool {
        matches!(self, Self::TiedState | Self::TiedCustomState)
    }
}

impl std::fmt::Display for UnitVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Filter => "filter",
            Self::State => "state",
            Self::Stock => "stock",
            Self::CustomState => "custom-state",
            Self::TiedState => "tied-state",
            Self::TiedCustomState => "tied-custom-state",
            Self::Reactor => "reactor",
        };
        write!(f, "{name}")
    }
}

/// Output of a T2 unit invocation: either a bare result value, a full
/// customization of the written document, or an explicit no-data signal.
#[derive(Debug)]
pub enum UnitOutput {
    Value(serde_json::Value),
    Full(UnitResult),
    NoData,
}

impl From<serde_json::Value> for UnitOutput {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v)
    }
}

/// Structure returned by units to customize the written document body,
/// code, tags, or the stock journal entry.
#[derive(Debug, Default)]
pub struct UnitResult {
    pub body: Option<serde_json::Value>,
    pub tag: Vec<Tag>,
    pub code: Option<DocumentCode>,
    pub journal: Option<JournalAttributes>,
}

/// Verdict of a T0 filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept { tag: Option<Tag> },
    Reject { reason: String },
}

impl FilterVerdict {
    pub fn accept() -> Self {
        Self::Accept { tag: None }
    }

    pub fn accept_with_tag(tag: impl Into<Tag>) -> Self {
        Self::Accept {
            tag: Some(tag.into()),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }
}

/// Dependency descriptor declared by a tied unit.
#[derive(Debug, Clone)]
pub struct T2Dependency {
    /// Unit whose T2 document must be complete first.
    pub unit: String,

    /// Config override identifying the exact dependency document. Absent
    /// means: match whatever config the dependency was scheduled with.
    pub config: Option<serde_json::Map<String, serde_json::Value>>,

    /// Passed to `get_link` to bind the dependency to a link other than the
    /// current state's.
    pub link_override: Option<serde_json::Value>,
}

impl T2Dependency {
    pub fn on(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            config: None,
            link_override: None,
        }
    }
}

/// Read-only view of a dependency's T2 document, handed to tied units.
#[derive(Debug, Clone)]
pub struct T2DocView {
    pub unit: String,
    pub config: Option<u64>,
    pub link: T2Link,
    pub code: DocumentCode,
    pub result: Option<serde_json::Value>,
}

impl T2DocView {
    /// View of the unit's latest good result.
    pub fn of(doc: &crate::types::T2Document) -> Self {
        Self {
            unit: doc.unit.clone(),
            config: doc.config,
            link: doc.link.clone(),
            code: doc.code,
            result: doc.latest_result().cloned(),
        }
    }
}

// ============================================================================
// Capability traits, one per variant
// ============================================================================

/// T0 capability: judge a raw alert.
pub trait FilterUnit: Send + Sync + std::fmt::Debug {
    fn filter(&self, alert: &AlertPacket) -> Result<FilterVerdict, UnitError>;
}

/// T2 over a compiled state and its datapoints.
pub trait StateT2Unit: Send + Sync {
    fn process(&self, state: &StateDocument, dps: &[DataPoint]) -> Result<UnitOutput, UnitError>;
}

/// T2 over the stock record itself.
pub trait StockT2Unit: Send + Sync {
    fn process(&self, stock: &StockDocument) -> Result<UnitOutput, UnitError>;
}

/// T2 over a custom input built from the state.
pub trait CustomStateT2Unit: Send + Sync {
    /// Build the custom input. Runs before `process`; a build failure is a
    /// unit failure.
    fn build(&self, state: &StateDocument, dps: &[DataPoint])
        -> Result<serde_json::Value, UnitError>;

    fn process(&self, input: &serde_json::Value) -> Result<UnitOutput, UnitError>;
}

/// State T2 additionally bound to other T2 units' results.
pub trait TiedStateT2Unit: Send + Sync {
    /// Dependency descriptors, in declaration order.
    fn dependencies(&self) -> Vec<T2Dependency>;

    /// Map a dependency's `link_override` to the concrete link of the
    /// document to match. `None` falls back to the current state's link.
    fn get_link(
        &self,
        _link_override: &serde_json::Value,
        _state: &StateDocument,
        _dps: &[DataPoint],
    ) -> Option<T2Link> {
        None
    }

    fn process(
        &self,
        state: &StateDocument,
        dps: &[DataPoint],
        t2_views: &[T2DocView],
    ) -> Result<UnitOutput, UnitError>;
}

/// Custom-state T2 with tied dependencies.
pub trait TiedCustomStateT2Unit: Send + Sync {
    fn dependencies(&self) -> Vec<T2Dependency>;

    fn get_link(
        &self,
        _link_override: &serde_json::Value,
        _state: &StateDocument,
        _dps: &[DataPoint],
    ) -> Option<T2Link> {
        None
    }

    fn build(&self, state: &StateDocument, dps: &[DataPoint])
        -> Result<serde_json::Value, UnitError>;

    fn process(
        &self,
        input: &serde_json::Value,
        t2_views: &[T2DocView],
    ) -> Result<UnitOutput, UnitError>;
}

/// T3 capability: react over aggregated views. Side effects are external;
/// the returned value is only journaled.
pub trait ReactorUnit: Send + Sync {
    fn process(&self, views: &[SnapView]) -> Result<Option<serde_json::Value>, UnitError>;
}

/// A loaded T2 unit, tagged by capability.
pub enum T2Unit {
    State(Box<dyn StateT2Unit>),
    Stock(Box<dyn StockT2Unit>),
    CustomState(Box<dyn CustomStateT2Unit>),
    TiedState(Box<dyn TiedStateT2Unit>),
    TiedCustomState(Box<dyn TiedCustomStateT2Unit>),
}

impl std::fmt::Debug for T2Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T2Unit({})", self.variant())
    }
}

impl T2Unit {
    pub fn variant(&self) -> UnitVariant {
        match self {
            Self::State(_) => UnitVariant::State,
            Self::Stock(_) => UnitVariant::Stock,
            Self::CustomState(_) => UnitVariant::CustomState,
            Self::TiedState(_) => UnitVariant::TiedState,
            Self::TiedCustomState(_) => UnitVariant::TiedCustomState,
        }
    }

    /// Declared dependencies; empty for untied variants.
    pub fn dependencies(&self) -> Vec<T2Dependency> {
        match self {
            Self::TiedState(u) => u.dependencies(),
            Self::TiedCustomState(u) => u.dependencies(),
            _ => Vec::new(),
        }
    }

    /// Resolve a dependency link override (tied variants only).
    pub fn get_link(
        &self,
        link_override: &serde_json::Value,
        state: &StateDocument,
        dps: &[DataPoint],
    ) -> Option<T2Link> {
        match self {
            Self::TiedState(u) => u.get_link(link_override, state, dps),
            Self::TiedCustomState(u) => u.get_link(link_override, state, dps),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_classification() {
        assert!(UnitVariant::TiedState.is_t2());
        assert!(UnitVariant::TiedState.is_tied());
        assert!(UnitVariant::State.is_t2());
        assert!(!UnitVariant::State.is_tied());
        assert!(!UnitVariant::Filter.is_t2());
        assert!(!UnitVariant::Reactor.is_t2());
    }

    #[test]
    fn untied_units_declare_no_dependencies() {
        struct Nop;
        impl StateT2Unit for Nop {
            fn process(
                &self,
                _: &StateDocument,
                _: &[DataPoint],
            ) -> Result<UnitOutput, UnitError> {
                Ok(UnitOutput::NoData)
            }
        }
        let unit = T2Unit::State(Box::new(Nop));
        assert!(unit.dependencies().is_empty());
        assert_eq!(unit.variant(), UnitVariant::State);
    }
}
