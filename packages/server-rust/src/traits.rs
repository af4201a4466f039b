//! Collaborators the relay consumes but does not implement: entity codec,
//! entity enumeration, transactions, repository settings persistence and audit.
//!
//! In-memory implementations live in [`crate::store`].

use async_trait::async_trait;
use entityvc_core::{
    EntityExportData, EntityId, EntityType, EntityTypeVersionLoadConfig, PageData, PageLink,
    RepositorySettings, RequestContext, TenantId, VersionCreateConfig,
};
use uuid::Uuid;

/// Identifier of an open database transaction.
pub type TxId = Uuid;

// ---------------------------------------------------------------------------
// Errors with a fixed meaning for import classification
// ---------------------------------------------------------------------------

/// Raised by an [`EntityCodec`] when device credentials in a document fail validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("credentials validation failed: {message}")]
pub struct CredentialsValidationError {
    pub message: String,
}

/// Raised by an [`EntityCodec`] when a referenced entity does not exist locally
/// on the final import attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("referenced entity {missing} not found")]
pub struct MissingReferenceError {
    pub missing: EntityId,
}

// ---------------------------------------------------------------------------
// EntityCodec
// ---------------------------------------------------------------------------

/// Where an import writes: the tenant and, when rolling back on error, the
/// transaction every write must join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportScope {
    pub tenant_id: TenantId,
    pub transaction: Option<TxId>,
}

/// Outcome of importing one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityImportResult {
    /// Local id of the saved entity.
    pub local_id: EntityId,
    pub created: bool,
    pub updated: bool,
    /// `false` when some referenced external id had no local counterpart yet.
    pub all_external_ids_resolved: bool,
}

/// Converts between local entities and portable documents.
///
/// What counts as "all external ids resolved" is this collaborator's contract.
#[async_trait]
pub trait EntityCodec: Send + Sync {
    /// Export a local entity as a portable document.
    async fn export_entity(
        &self,
        ctx: &RequestContext,
        entity_id: EntityId,
        config: &VersionCreateConfig,
    ) -> anyhow::Result<EntityExportData>;

    /// Create or update the local entity described by `data`.
    ///
    /// With `final_attempt` unset, unresolvable references are reported through
    /// `all_external_ids_resolved`; with it set they must fail with
    /// [`MissingReferenceError`].
    async fn import_entity(
        &self,
        scope: &ImportScope,
        data: &EntityExportData,
        config: &EntityTypeVersionLoadConfig,
        final_attempt: bool,
    ) -> anyhow::Result<EntityImportResult>;

    /// Save relations and other cross-entity references of an imported entity.
    /// Called after every entity of the import exists locally.
    async fn save_references(
        &self,
        scope: &ImportScope,
        local_id: EntityId,
        data: &EntityExportData,
        config: &EntityTypeVersionLoadConfig,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// EntityService
// ---------------------------------------------------------------------------

/// A local entity as seen by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntity {
    pub id: EntityId,
    pub external_id: Option<EntityId>,
    pub name: String,
}

/// Paged enumeration and deletion of local entities.
#[async_trait]
pub trait EntityService: Send + Sync {
    /// One page of the tenant's entities of `entity_type`, in a stable order.
    async fn find_entities_by_type(
        &self,
        tenant_id: TenantId,
        entity_type: EntityType,
        page_link: &PageLink,
        transaction: Option<TxId>,
    ) -> anyhow::Result<PageData<LocalEntity>>;

    async fn find_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        transaction: Option<TxId>,
    ) -> anyhow::Result<Option<LocalEntity>>;

    async fn delete_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        transaction: Option<TxId>,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// TransactionManager
// ---------------------------------------------------------------------------

/// Database transactions for rollback-on-error imports.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, tenant_id: TenantId) -> anyhow::Result<TxId>;

    /// Make every write of `transaction` visible.
    async fn commit(&self, transaction: TxId) -> anyhow::Result<()>;

    /// Discard every write of `transaction`.
    async fn rollback(&self, transaction: TxId) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// RepositorySettingsStore
// ---------------------------------------------------------------------------

/// Persistence of per-tenant repository settings.
#[async_trait]
pub trait RepositorySettingsStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId) -> anyhow::Result<Option<RepositorySettings>>;

    async fn save(&self, tenant_id: TenantId, settings: RepositorySettings) -> anyhow::Result<()>;

    /// Returns `true` if settings existed.
    async fn delete(&self, tenant_id: TenantId) -> anyhow::Result<bool>;
}

// ---------------------------------------------------------------------------
// EntityActionListener
// ---------------------------------------------------------------------------

/// Audit sink for entity lifecycle events emitted by imports.
pub trait EntityActionListener: Send + Sync {
    fn on_entity_deleted(&self, tenant_id: TenantId, entity_id: EntityId);
}
