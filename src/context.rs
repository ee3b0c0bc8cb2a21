//! Per-run process context
//!
//! The context is the one aggregate wiring together the frozen global
//! config, the secret provider, the unit loader, and the store handle. It
//! is constructed once per run and passed by reference into every tier
//! processor — there is no ambient singleton anywhere in the crate.

use crate::config::{ConfigError, GlobalConfig};
use crate::logging::RunLogger;
use crate::secret::{DirVault, SecretProvider, StaticVault};
use crate::store::{DocStore, SledStore, StoreError};
use crate::units::UnitLoader;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Context {
    config: GlobalConfig,
    secrets: Arc<dyn SecretProvider>,
    loader: UnitLoader,
    store: Arc<dyn DocStore>,
    run_id: i64,
    cancel: CancellationToken,
}

impl Context {
    /// Wire a context from explicit parts. Used directly by tests; real
    /// runs usually go through [`Context::build`].
    pub fn new(
        config: GlobalConfig,
        store: Arc<dyn DocStore>,
        secrets: Arc<dyn SecretProvider>,
        loader: UnitLoader,
        run_id: i64,
    ) -> Self {
        Self {
            config,
            secrets,
            loader,
            store,
            run_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Construct a context from the global config's `resource` section:
    /// opens the sled store at `resource.db` and, when `resource.vault_dir`
    /// is set, a file vault for `resource.vault_env` (default "default").
    /// The run id is the current epoch in milliseconds.
    pub fn build(config: GlobalConfig) -> Result<Self, ContextError> {
        let db_path = config
            .resource("db")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("borealis-db")
            .to_owned();
        let store: Arc<dyn DocStore> = Arc::new(SledStore::open(&db_path)?);

        let secrets: Arc<dyn SecretProvider> = match config
            .resource("vault_dir")
            .and_then(serde_json::Value::as_str)
        {
            Some(dir) => {
                let env = config
                    .resource("vault_env")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("default");
                Arc::new(DirVault::new(dir, env))
            }
            None => Arc::new(StaticVault::default()),
        };

        let run_id = chrono::Utc::now().timestamp_millis();
        info!(run = run_id, db = %db_path, "context initialized");

        Ok(Self::new(
            config,
            store,
            secrets,
            UnitLoader::with_builtins(),
            run_id,
        ))
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn secrets(&self) -> &dyn SecretProvider {
        self.secrets.as_ref()
    }

    pub fn loader(&self) -> &UnitLoader {
        &self.loader
    }

    pub fn store(&self) -> &Arc<dyn DocStore> {
        &self.store
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Run-level abort signal. Cancelling stops the scheduling of new tier
    /// work; in-flight unit invocations finish on their own.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn logger(&self) -> RunLogger {
        RunLogger::new(self.store.clone(), self.run_id)
    }

    /// Flush and release the store. Called after the run completes or on
    /// fatal error.
    pub fn close(&self) -> Result<(), StoreError> {
        self.store.flush()?;
        info!(run = self.run_id, "context closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    pub(crate) fn memory_context() -> Context {
        Context::new(
            GlobalConfig::empty(),
            Arc::new(MemStore::new()),
            Arc::new(StaticVault::default()),
            UnitLoader::with_builtins(),
            1,
        )
    }

    #[test]
    fn cancel_token_starts_live() {
        let ctx = memory_context();
        assert!(!ctx.cancel_token().is_cancelled());
        ctx.cancel_token().cancel();
        assert!(ctx.cancel_token().is_cancelled());
    }

    #[test]
    fn build_opens_sled_from_resource_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GlobalConfig::from_value(serde_json::json!({
            "resource": {"db": dir.path().join("db").to_string_lossy()}
        }))
        .expect("config");
        let ctx = Context::build(config).expect("context");
        assert!(ctx.run_id() > 0);
        ctx.close().expect("close");
    }
}
