//! Secret resolution
//!
//! Config fields marked as secrets resolve to a `NamedSecret` handle, not a
//! value. The raw value is only fetched from a `SecretProvider` backend at
//! unit construction time and must not be cached beyond that scope, so
//! resolved configs and logs never carry sensitive payloads.

mod provider;

pub use provider::{DirVault, SecretProvider, StaticVault};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    /// Unknown secret name. Fatal to the requesting unit only; siblings
    /// continue.
    #[error("unknown secret: {0}")]
    NotFound(String),

    #[error("vault unreadable: {0}")]
    Backend(String),

    #[error("secret {name} is not a {expected}")]
    WrongType { name: String, expected: &'static str },
}

/// A lazy handle to a secret value.
///
/// Only the label is stored; `Display`/`Debug`/serde all emit the label, so
/// a `NamedSecret` can safely appear in logs and persisted configs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSecret {
    label: String,
}

impl NamedSecret {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fetch the raw value. Called at unit construction only.
    pub fn get(&self, provider: &dyn SecretProvider) -> Result<serde_json::Value, SecretError> {
        provider.tell(&self.label)
    }

    /// Fetch and coerce to a string value.
    pub fn get_str(&self, provider: &dyn SecretProvider) -> Result<String, SecretError> {
        match self.get(provider)? {
            serde_json::Value::String(s) => Ok(s),
            _ => Err(SecretError::WrongType {
                name: self.label.clone(),
                expected: "string",
            }),
        }
    }
}

impl fmt::Debug for NamedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<NamedSecret:{}>", self.label)
    }
}

impl fmt::Display for NamedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<NamedSecret:{}>", self.label)
    }
}
