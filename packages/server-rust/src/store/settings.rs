//! In-memory repository settings persistence.

use async_trait::async_trait;
use dashmap::DashMap;
use entityvc_core::{RepositorySettings, TenantId};

use crate::traits::RepositorySettingsStore;

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: DashMap<TenantId, RepositorySettings>,
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositorySettingsStore for MemorySettingsStore {
    async fn get(&self, tenant_id: TenantId) -> anyhow::Result<Option<RepositorySettings>> {
        Ok(self.settings.get(&tenant_id).map(|s| s.clone()))
    }

    async fn save(&self, tenant_id: TenantId, settings: RepositorySettings) -> anyhow::Result<()> {
        self.settings.insert(tenant_id, settings);
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId) -> anyhow::Result<bool> {
        Ok(self.settings.remove(&tenant_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_delete() {
        let store = MemorySettingsStore::new();
        let tenant = TenantId::new();
        assert!(store.get(tenant).await.unwrap().is_none());

        let settings = RepositorySettings::new("mem://repo", "main");
        store.save(tenant, settings.clone()).await.unwrap();
        assert_eq!(store.get(tenant).await.unwrap(), Some(settings));

        assert!(store.delete(tenant).await.unwrap());
        assert!(!store.delete(tenant).await.unwrap());
    }
}
