//! Resolves and caches the active [`KanbanAdapter`] (spec §4.3).

use std::sync::Arc;

use openfleet_core::status::{Backend, StatusTable};
use openfleet_core::{AdapterError, KanbanAdapter};
use openfleet_store::key_provider::KeyProvider;
use openfleet_store::secure_file_store::EncryptedFileStore;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::adapters::github::{GitHubAdapter, GitHubConfig};
use crate::adapters::internal::InternalAdapter;
use crate::adapters::jira::{JiraAdapter, JiraConfig};
use crate::adapters::vk::{VkAdapter, VkConfig};

/// Resolution order from spec §4.3: runtime override → `KANBAN_BACKEND`
/// env → config-supplied default → `internal`.
pub struct AdapterRegistry {
    runtime_override: RwLock<Option<String>>,
    config_default: Option<String>,
    store_root: std::path::PathBuf,
    scope_label: String,
    key_provider: Arc<dyn KeyProvider>,
    cache: RwLock<Option<(String, Arc<dyn KanbanAdapter>)>>,
}

impl AdapterRegistry {
    /// `key_provider` backs the encryption key for the `internal`
    /// backend's on-disk store — production callers should pass a
    /// [`openfleet_store::key_provider::KeyringProvider`] scoped to the
    /// active project (via `KeyringProvider::for_project`) so the key
    /// survives process restarts; tests pass an in-memory provider.
    pub fn new(
        config_default: Option<String>,
        store_root: std::path::PathBuf,
        scope_label: String,
        key_provider: Arc<dyn KeyProvider>,
    ) -> Self {
        Self {
            runtime_override: RwLock::new(None),
            config_default,
            store_root,
            scope_label,
            key_provider,
            cache: RwLock::new(None),
        }
    }

    pub async fn set_runtime_override(&self, backend: Option<String>) {
        *self.runtime_override.write().await = backend;
    }

    fn resolve_name(&self, runtime_override: &Option<String>) -> String {
        runtime_override
            .clone()
            .or_else(|| openfleet_core::config::env_str(openfleet_core::config::kanban::BACKEND))
            .or_else(|| self.config_default.clone())
            .unwrap_or_else(|| "internal".to_string())
    }

    /// Return the currently active adapter, constructing (or
    /// reconstructing, if the resolved name changed) it as needed.
    #[instrument(skip(self))]
    pub async fn active(&self) -> Result<Arc<dyn KanbanAdapter>, AdapterError> {
        let name = self.resolve_name(&self.runtime_override.read().await.clone());

        {
            let cache = self.cache.read().await;
            if let Some((cached_name, adapter)) = cache.as_ref() {
                if cached_name == &name {
                    return Ok(adapter.clone());
                }
            }
        }

        let adapter = self.build(&name).await?;
        let mut cache = self.cache.write().await;
        *cache = Some((name, adapter.clone()));
        Ok(adapter)
    }

    async fn build(&self, name: &str) -> Result<Arc<dyn KanbanAdapter>, AdapterError> {
        match name {
            "internal" => {
                let store = EncryptedFileStore::new(self.store_root.clone(), self.key_provider.clone());
                Ok(Arc::new(InternalAdapter::new(store)))
            }
            "vk" | "vibe-kanban" | "vibekanban" => {
                let cfg = VkConfig::from_env()
                    .ok_or_else(|| AdapterError::Fatal("VK_BASE_URL is required for the vk backend".into()))?;
                Ok(Arc::new(VkAdapter::new(cfg)?))
            }
            "github" => {
                let cfg = GitHubConfig::from_env()?;
                let statuses = Arc::new(StatusTable::defaults().with_env_overrides());
                Ok(Arc::new(GitHubAdapter::new(cfg, statuses, self.scope_label.clone())))
            }
            "jira" => {
                let cfg = JiraConfig::from_env()?;
                Ok(Arc::new(JiraAdapter::new(cfg, self.scope_label.clone())?))
            }
            other => Err(AdapterError::Fatal(format!("unknown kanban backend: {other}"))),
        }
    }

    /// Best-effort hint for logging: the backend tag of the currently
    /// cached adapter, if one has been built yet.
    pub async fn cached_backend(&self) -> Option<Backend> {
        self.cache.read().await.as_ref().map(|(_, a)| a.backend())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use openfleet_store::key_provider::InMemoryKeyProvider;

    // KANBAN_BACKEND is process-global; serialize tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn test_key_provider() -> Arc<dyn KeyProvider> {
        Arc::new(InMemoryKeyProvider::default())
    }

    #[tokio::test]
    async fn defaults_to_internal_backend() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(openfleet_core::config::kanban::BACKEND);
        let dir = tempfile::tempdir().unwrap();
        let registry = AdapterRegistry::new(None, dir.path().to_path_buf(), "openfleet".into(), test_key_provider());
        let adapter = registry.active().await.unwrap();
        assert_eq!(adapter.backend(), Backend::Internal);
    }

    #[tokio::test]
    async fn runtime_override_wins_over_env_and_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(openfleet_core::config::kanban::BACKEND, "jira");
        let dir = tempfile::tempdir().unwrap();
        let registry = AdapterRegistry::new(
            Some("jira".into()),
            dir.path().to_path_buf(),
            "openfleet".into(),
            test_key_provider(),
        );
        registry.set_runtime_override(Some("internal".into())).await;
        let adapter = registry.active().await.unwrap();
        assert_eq!(adapter.backend(), Backend::Internal);
        std::env::remove_var(openfleet_core::config::kanban::BACKEND);
    }

    #[tokio::test]
    async fn unknown_backend_name_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(openfleet_core::config::kanban::BACKEND);
        let dir = tempfile::tempdir().unwrap();
        let registry = AdapterRegistry::new(
            Some("carrier-pigeon".into()),
            dir.path().to_path_buf(),
            "openfleet".into(),
            test_key_provider(),
        );
        let err = registry.active().await.unwrap_err();
        assert!(matches!(err, AdapterError::Fatal(_)));
    }

    #[tokio::test]
    async fn switching_backend_discards_the_cached_adapter() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(openfleet_core::config::kanban::BACKEND);
        let dir = tempfile::tempdir().unwrap();
        let registry = AdapterRegistry::new(None, dir.path().to_path_buf(), "openfleet".into(), test_key_provider());
        registry.active().await.unwrap();
        assert_eq!(registry.cached_backend().await, Some(Backend::Internal));

        registry.set_runtime_override(Some("carrier-pigeon".into())).await;
        assert!(registry.active().await.is_err());
    }
}
