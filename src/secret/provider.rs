//! Secret provider backends

use super::SecretError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Capability interface: given a logical secret name, return its value.
///
/// Implementations must treat every call as a fresh lookup; callers are
/// expected to discard returned values after unit construction.
pub trait SecretProvider: Send + Sync {
    fn tell(&self, name: &str) -> Result<serde_json::Value, SecretError>;
}

/// In-memory mapping backend, used in tests and for secrets passed inline.
#[derive(Debug, Default, Clone)]
pub struct StaticVault {
    entries: BTreeMap<String, serde_json::Value>,
}

impl StaticVault {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(name.into(), value);
    }
}

impl SecretProvider for StaticVault {
    fn tell(&self, name: &str) -> Result<serde_json::Value, SecretError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_owned()))
    }
}

/// File-backed vault: one JSON object per environment tag, named
/// `<tag>.json` inside the vault directory. The file is re-read on every
/// lookup so rotated secrets are picked up without a restart.
#[derive(Debug, Clone)]
pub struct DirVault {
    dir: PathBuf,
    tag: String,
}

impl DirVault {
    pub fn new(dir: impl AsRef<Path>, tag: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            tag: tag.into(),
        }
    }

    fn load(&self) -> Result<serde_json::Map<String, serde_json::Value>, SecretError> {
        let path = self.dir.join(format!("{}.json", self.tag));
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| SecretError::Backend(format!("{}: {e}", path.display())))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| SecretError::Backend(format!("{}: {e}", path.display())))?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(SecretError::Backend(format!(
                "{}: expected a JSON object",
                path.display()
            ))),
        }
    }
}

impl SecretProvider for DirVault {
    fn tell(&self, name: &str) -> Result<serde_json::Value, SecretError> {
        self.load()?
            .remove(name)
            .ok_or_else(|| SecretError::NotFound(name.to_owned()))
    }
}
