//! In-memory entity store with staged transactions.
//!
//! Writes made under a transaction are buffered per transaction and become
//! visible to other readers only on commit. Reads under a transaction see
//! its own buffered writes.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use entityvc_core::{EntityId, EntityRelation, EntityType, PageData, PageLink, TenantId};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::traits::{EntityActionListener, EntityService, LocalEntity, TransactionManager, TxId};

/// A local entity as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: EntityId,
    pub external_id: Option<EntityId>,
    pub name: String,
    pub body: Value,
    pub relations: Vec<EntityRelation>,
    pub attributes: BTreeMap<String, Value>,
    pub credentials: Option<Value>,
}

impl StoredEntity {
    #[must_use]
    pub fn new(id: EntityId, name: impl Into<String>, body: Value) -> Self {
        Self {
            id,
            external_id: None,
            name: name.into(),
            body,
            relations: Vec::new(),
            attributes: BTreeMap::new(),
            credentials: None,
        }
    }

    fn to_local(&self) -> LocalEntity {
        LocalEntity {
            id: self.id,
            external_id: self.external_id,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug)]
struct Transaction {
    tenant_id: TenantId,
    /// `None` marks a deletion.
    writes: HashMap<EntityId, Option<StoredEntity>>,
}

#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: DashMap<(TenantId, EntityId), StoredEntity>,
    transactions: DashMap<TxId, Transaction>,
}

impl MemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a committed entity.
    pub fn insert(&self, tenant_id: TenantId, entity: StoredEntity) {
        self.entities.insert((tenant_id, entity.id), entity);
    }

    #[must_use]
    pub fn get(&self, tenant_id: TenantId, id: EntityId, tx: Option<TxId>) -> Option<StoredEntity> {
        if let Some(tx) = tx.and_then(|tx| self.transactions.get(&tx)) {
            if let Some(write) = tx.writes.get(&id) {
                return write.clone();
            }
        }
        self.entities.get(&(tenant_id, id)).map(|e| e.clone())
    }

    /// Write `entity`, staged under `tx` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if `tx` is unknown or belongs to another tenant.
    pub fn put(&self, tenant_id: TenantId, entity: StoredEntity, tx: Option<TxId>) -> anyhow::Result<()> {
        match tx {
            Some(tx) => {
                let mut staged = self.transaction(tenant_id, tx)?;
                staged.writes.insert(entity.id, Some(entity));
            }
            None => self.insert(tenant_id, entity),
        }
        Ok(())
    }

    /// Delete `id`, staged under `tx` when given. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if `tx` is unknown or belongs to another tenant.
    pub fn remove(&self, tenant_id: TenantId, id: EntityId, tx: Option<TxId>) -> anyhow::Result<bool> {
        let existed = self.get(tenant_id, id, tx).is_some();
        match tx {
            Some(tx) => {
                let mut staged = self.transaction(tenant_id, tx)?;
                staged.writes.insert(id, None);
            }
            None => {
                self.entities.remove(&(tenant_id, id));
            }
        }
        Ok(existed)
    }

    /// Entities of `entity_type` visible under `tx`, ordered by id.
    #[must_use]
    pub fn list(&self, tenant_id: TenantId, entity_type: EntityType, tx: Option<TxId>) -> Vec<StoredEntity> {
        let mut visible: BTreeMap<EntityId, StoredEntity> = self
            .entities
            .iter()
            .filter(|e| e.key().0 == tenant_id && e.key().1.entity_type == entity_type)
            .map(|e| (e.key().1, e.value().clone()))
            .collect();

        if let Some(tx) = tx.and_then(|tx| self.transactions.get(&tx)) {
            for (id, write) in tx.writes.iter().filter(|(id, _)| id.entity_type == entity_type) {
                match write {
                    Some(entity) => {
                        visible.insert(*id, entity.clone());
                    }
                    None => {
                        visible.remove(id);
                    }
                }
            }
        }
        visible.into_values().collect()
    }

    /// The entity imported from `external_id`, or the entity whose own id is
    /// `external_id` (same-tenant round trip).
    #[must_use]
    pub fn find_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: EntityId,
        tx: Option<TxId>,
    ) -> Option<StoredEntity> {
        let candidates = self.list(tenant_id, external_id.entity_type, tx);
        let by_external = candidates
            .iter()
            .find(|e| e.external_id == Some(external_id))
            .cloned();
        by_external.or_else(|| candidates.into_iter().find(|e| e.id == external_id))
    }

    #[must_use]
    pub fn find_by_name(
        &self,
        tenant_id: TenantId,
        entity_type: EntityType,
        name: &str,
        tx: Option<TxId>,
    ) -> Option<StoredEntity> {
        self.list(tenant_id, entity_type, tx)
            .into_iter()
            .find(|e| e.name == name)
    }

    /// Committed entities of `entity_type`.
    #[must_use]
    pub fn count(&self, tenant_id: TenantId, entity_type: EntityType) -> usize {
        self.list(tenant_id, entity_type, None).len()
    }

    fn transaction(
        &self,
        tenant_id: TenantId,
        tx: TxId,
    ) -> anyhow::Result<dashmap::mapref::one::RefMut<'_, TxId, Transaction>> {
        let staged = self
            .transactions
            .get_mut(&tx)
            .with_context(|| format!("unknown transaction {tx}"))?;
        if staged.tenant_id != tenant_id {
            bail!("transaction {tx} belongs to another tenant");
        }
        Ok(staged)
    }
}

#[async_trait]
impl EntityService for MemoryEntityStore {
    async fn find_entities_by_type(
        &self,
        tenant_id: TenantId,
        entity_type: EntityType,
        page_link: &PageLink,
        transaction: Option<TxId>,
    ) -> anyhow::Result<PageData<LocalEntity>> {
        let all = self
            .list(tenant_id, entity_type, transaction)
            .iter()
            .map(StoredEntity::to_local)
            .collect();
        Ok(PageData::from_slice(all, page_link))
    }

    async fn find_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        transaction: Option<TxId>,
    ) -> anyhow::Result<Option<LocalEntity>> {
        Ok(self
            .get(tenant_id, entity_id, transaction)
            .map(|e| e.to_local()))
    }

    async fn delete_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        transaction: Option<TxId>,
    ) -> anyhow::Result<()> {
        self.remove(tenant_id, entity_id, transaction)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for MemoryEntityStore {
    async fn begin(&self, tenant_id: TenantId) -> anyhow::Result<TxId> {
        let tx = Uuid::new_v4();
        self.transactions.insert(
            tx,
            Transaction {
                tenant_id,
                writes: HashMap::new(),
            },
        );
        debug!(%tx, %tenant_id, "transaction started");
        Ok(tx)
    }

    async fn commit(&self, transaction: TxId) -> anyhow::Result<()> {
        let Some((_, staged)) = self.transactions.remove(&transaction) else {
            bail!("unknown transaction {transaction}");
        };
        let writes = staged.writes.len();
        for (id, write) in staged.writes {
            match write {
                Some(entity) => self.insert(staged.tenant_id, entity),
                None => {
                    self.entities.remove(&(staged.tenant_id, id));
                }
            }
        }
        debug!(tx = %transaction, writes, "transaction committed");
        Ok(())
    }

    async fn rollback(&self, transaction: TxId) -> anyhow::Result<()> {
        let Some((_, staged)) = self.transactions.remove(&transaction) else {
            bail!("unknown transaction {transaction}");
        };
        debug!(tx = %transaction, writes = staged.writes.len(), "transaction rolled back");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Records entity lifecycle events in memory.
#[derive(Debug, Default)]
pub struct AuditLog {
    deleted: Mutex<Vec<(TenantId, EntityId)>>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn deleted(&self) -> Vec<(TenantId, EntityId)> {
        self.deleted.lock().clone()
    }
}

impl EntityActionListener for AuditLog {
    fn on_entity_deleted(&self, tenant_id: TenantId, entity_id: EntityId) {
        self.deleted.lock().push((tenant_id, entity_id));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
