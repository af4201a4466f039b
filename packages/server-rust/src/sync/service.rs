//! Public facade of the relay: version create/load tasks, repository queries
//! and repository settings administration.

use std::sync::Arc;

use entityvc_core::messages::{
    ListEntitiesAtVersionPayload, ListVersionsPayload, EntityContentPayload, RepositoryRequest,
    VersionsDiffPayload,
};
use entityvc_core::{
    BranchInfo, EntityExportData, EntityId, EntityType, EntityVersion, EntityVersionsDiff,
    PageData, PageLink, RepositorySettings, RequestContext, TenantId, VersionCreateRequest,
    VersionCreationResult, VersionLoadRequest, VersionLoadResult, VersionedEntityInfo,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::export::ExportPipeline;
use super::import::{ImportContext, ImportPipeline};
use super::session::CommitSession;
use super::status::TaskStatusStore;
use crate::config::VersionControlConfig;
use crate::error::VcError;
use crate::rpc::{CorrelationRegistry, MessageDispatcher, PendingRequest, Reply};
use crate::traits::{
    EntityActionListener, EntityCodec, EntityService, RepositorySettingsStore, TransactionManager,
};
use crate::transport::ClusterTransport;

/// Local collaborators the relay reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn RepositorySettingsStore>,
    pub codec: Arc<dyn EntityCodec>,
    pub entities: Arc<dyn EntityService>,
    pub transactions: Arc<dyn TransactionManager>,
    pub listener: Arc<dyn EntityActionListener>,
}

pub struct VersionControlService {
    config: VersionControlConfig,
    dispatcher: Arc<MessageDispatcher>,
    settings: Arc<dyn RepositorySettingsStore>,
    statuses: Arc<TaskStatusStore>,
    export: ExportPipeline,
    import: ImportPipeline,
}

impl VersionControlService {
    /// `registry` must be the one the transport's response handler completes.
    #[must_use]
    pub fn new(
        config: VersionControlConfig,
        registry: Arc<CorrelationRegistry>,
        transport: Arc<dyn ClusterTransport>,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            settings,
            codec,
            entities,
            transactions,
            listener,
        } = collaborators;
        let dispatcher = Arc::new(MessageDispatcher::new(
            &config,
            registry,
            transport,
            Arc::clone(&settings),
        ));
        let statuses = Arc::new(TaskStatusStore::new(config.task_status_capacity));
        let export = ExportPipeline::new(
            Arc::clone(&dispatcher),
            Arc::clone(&codec),
            Arc::clone(&entities),
            Arc::clone(&statuses),
            config.chunk_size_chars,
            config.export_page_size,
        );
        let import = ImportPipeline::new(
            Arc::clone(&dispatcher),
            codec,
            entities,
            transactions,
            listener,
            Arc::clone(&statuses),
            config.import_page_size,
        );
        Self {
            config,
            dispatcher,
            settings,
            statuses,
            export,
            import,
        }
    }

    /// Override the order entity types are imported in.
    #[must_use]
    pub fn with_type_order(mut self, order: &[EntityType]) -> Self {
        self.import = self.import.with_type_order(order);
        self
    }

    #[must_use]
    pub fn config(&self) -> &VersionControlConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    async fn stored_settings(&self, tenant_id: TenantId) -> Result<RepositorySettings, VcError> {
        self.settings
            .get(tenant_id)
            .await?
            .ok_or(VcError::SettingsNotConfigured(tenant_id))
    }

    // -- Version tasks ------------------------------------------------------

    /// Start exporting `request` as a new version. Returns the id to poll
    /// with [`VersionControlService::get_version_create_status`].
    ///
    /// # Errors
    ///
    /// Returns [`VcError::SettingsNotConfigured`] if the tenant has no
    /// repository.
    pub async fn save_entities_version(
        &self,
        ctx: &RequestContext,
        request: VersionCreateRequest,
    ) -> Result<Uuid, VcError> {
        let settings = self.stored_settings(ctx.tenant_id).await?;
        let session = CommitSession::new(ctx, request.branch.clone(), request.version_name.clone(), settings);
        let request_id = session.request_id();
        self.statuses
            .put_export(request_id, VersionCreationResult::in_progress());
        debug!(%request_id, tenant_id = %ctx.tenant_id, "version export submitted");
        tokio::spawn(self.export.clone().run(ctx.clone(), session, request));
        Ok(request_id)
    }

    /// Start loading `request` into the tenant's entities. Returns the id to
    /// poll with [`VersionControlService::get_version_load_status`].
    ///
    /// # Errors
    ///
    /// Returns [`VcError::SettingsNotConfigured`] if the tenant has no
    /// repository.
    pub async fn load_entities_version(
        &self,
        ctx: &RequestContext,
        request: VersionLoadRequest,
    ) -> Result<Uuid, VcError> {
        let settings = self.stored_settings(ctx.tenant_id).await?;
        let request_id = Uuid::new_v4();
        let import_ctx = ImportContext::new(request_id, ctx.tenant_id, &request, settings);
        self.statuses
            .put_import(request_id, VersionLoadResult::in_progress());
        debug!(%request_id, tenant_id = %ctx.tenant_id, "version import submitted");
        tokio::spawn(self.import.clone().run(import_ctx, request));
        Ok(request_id)
    }

    #[must_use]
    pub fn get_version_create_status(&self, request_id: Uuid) -> Option<VersionCreationResult> {
        self.statuses.export_status(request_id)
    }

    #[must_use]
    pub fn get_version_load_status(&self, request_id: Uuid) -> Option<VersionLoadResult> {
        self.statuses.import_status(request_id)
    }

    // -- Queries ------------------------------------------------------------

    async fn query(&self, tenant_id: TenantId, request: RepositoryRequest) -> Result<Reply, VcError> {
        self.dispatcher
            .request(PendingRequest::new(tenant_id, true), request)
            .await
    }

    async fn versions(
        &self,
        tenant_id: TenantId,
        payload: ListVersionsPayload,
    ) -> Result<PageData<EntityVersion>, VcError> {
        self.query(tenant_id, RepositoryRequest::ListVersions(payload))
            .await?
            .into_versions()
    }

    /// Commits on `branch`, newest first unless `page_link` sorts ascending.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn list_versions(
        &self,
        tenant_id: TenantId,
        branch: &str,
        page_link: PageLink,
    ) -> Result<PageData<EntityVersion>, VcError> {
        self.versions(
            tenant_id,
            ListVersionsPayload {
                branch: branch.to_string(),
                entity_type: None,
                entity_id: None,
                page_link,
            },
        )
        .await
    }

    /// Commits on `branch` that touched `external_id`.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn list_entity_versions(
        &self,
        tenant_id: TenantId,
        branch: &str,
        external_id: EntityId,
        page_link: PageLink,
    ) -> Result<PageData<EntityVersion>, VcError> {
        self.versions(
            tenant_id,
            ListVersionsPayload {
                branch: branch.to_string(),
                entity_type: Some(external_id.entity_type),
                entity_id: Some(external_id),
                page_link,
            },
        )
        .await
    }

    /// Commits on `branch` that touched any entity of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn list_entity_type_versions(
        &self,
        tenant_id: TenantId,
        branch: &str,
        entity_type: EntityType,
        page_link: PageLink,
    ) -> Result<PageData<EntityVersion>, VcError> {
        self.versions(
            tenant_id,
            ListVersionsPayload {
                branch: branch.to_string(),
                entity_type: Some(entity_type),
                entity_id: None,
                page_link,
            },
        )
        .await
    }

    /// Entities of `entity_type` stored in `version_id`.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn list_entities_at_version(
        &self,
        tenant_id: TenantId,
        version_id: &str,
        entity_type: EntityType,
    ) -> Result<Vec<VersionedEntityInfo>, VcError> {
        self.query(
            tenant_id,
            RepositoryRequest::ListEntitiesAtVersion(ListEntitiesAtVersionPayload {
                version_id: version_id.to_string(),
                entity_type: Some(entity_type),
            }),
        )
        .await?
        .into_entities()
    }

    /// Every entity stored in `version_id`.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn list_all_entities_at_version(
        &self,
        tenant_id: TenantId,
        version_id: &str,
    ) -> Result<Vec<VersionedEntityInfo>, VcError> {
        self.query(
            tenant_id,
            RepositoryRequest::ListEntitiesAtVersion(ListEntitiesAtVersionPayload {
                version_id: version_id.to_string(),
                entity_type: None,
            }),
        )
        .await?
        .into_entities()
    }

    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn list_branches(&self, tenant_id: TenantId) -> Result<Vec<BranchInfo>, VcError> {
        self.query(tenant_id, RepositoryRequest::ListBranches)
            .await?
            .into_branches()
    }

    /// The document of `external_id` as stored in `version_id`.
    ///
    /// # Errors
    ///
    /// Returns any relay error, the worker's error verbatim, or
    /// [`VcError::Decode`] if the stored document is malformed.
    pub async fn get_entity_at_version(
        &self,
        tenant_id: TenantId,
        version_id: &str,
        external_id: EntityId,
    ) -> Result<EntityExportData, VcError> {
        self.query(
            tenant_id,
            RepositoryRequest::GetEntityContent(EntityContentPayload {
                version_id: version_id.to_string(),
                external_id,
            }),
        )
        .await?
        .into_entity_content()
    }

    /// Per-document differences under `path` between two versions.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn compare_versions(
        &self,
        tenant_id: TenantId,
        path: &str,
        version_id1: &str,
        version_id2: &str,
    ) -> Result<Vec<EntityVersionsDiff>, VcError> {
        self.query(
            tenant_id,
            RepositoryRequest::VersionsDiff(VersionsDiffPayload {
                path: path.to_string(),
                version_id1: version_id1.to_string(),
                version_id2: version_id2.to_string(),
            }),
        )
        .await?
        .into_versions_diff()
    }

    // -- Repository administration -----------------------------------------

    /// Initialize the tenant's repository from `settings` and persist them
    /// once the worker has accepted them.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim; settings are
    /// not saved in that case.
    pub async fn init_repository(
        &self,
        tenant_id: TenantId,
        settings: RepositorySettings,
    ) -> Result<(), VcError> {
        self.dispatcher
            .request_with_settings(
                PendingRequest::new(tenant_id, true),
                RepositoryRequest::InitRepository,
                settings.clone(),
            )
            .await?
            .into_ack()?;
        self.settings.save(tenant_id, settings).await?;
        info!(%tenant_id, "repository initialized");
        Ok(())
    }

    /// Check that `settings` reach a usable repository without saving them.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn test_repository(
        &self,
        tenant_id: TenantId,
        settings: RepositorySettings,
    ) -> Result<(), VcError> {
        self.dispatcher
            .request_with_settings(
                PendingRequest::new(tenant_id, true),
                RepositoryRequest::TestRepository,
                settings,
            )
            .await?
            .into_ack()
    }

    /// Detach the tenant's repository and forget its settings. Returns
    /// `true` if settings existed.
    ///
    /// # Errors
    ///
    /// Returns any relay error, or the worker's error verbatim.
    pub async fn delete_repository_settings(&self, tenant_id: TenantId) -> Result<bool, VcError> {
        self.dispatcher
            .request(
                PendingRequest::new(tenant_id, false),
                RepositoryRequest::ClearRepository,
            )
            .await?
            .into_ack()?;
        let existed = self.settings.delete(tenant_id).await?;
        info!(%tenant_id, existed, "repository settings deleted");
        Ok(existed)
    }

    /// Stored settings with every secret removed.
    ///
    /// # Errors
    ///
    /// Returns [`VcError::Internal`] if the settings store fails.
    pub async fn get_repository_settings(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<RepositorySettings>, VcError> {
        Ok(self
            .settings
            .get(tenant_id)
            .await?
            .map(|s| s.without_secrets()))
    }

    /// Save `settings`, keeping stored secrets the caller left out, and
    /// re-initialize the repository with the result.
    ///
    /// # Errors
    ///
    /// Returns any error of [`VersionControlService::init_repository`].
    pub async fn save_repository_settings(
        &self,
        tenant_id: TenantId,
        mut settings: RepositorySettings,
    ) -> Result<RepositorySettings, VcError> {
        if let Some(stored) = self.settings.get(tenant_id).await? {
            settings.restore_secrets_from(&stored);
        }
        self.init_repository(tenant_id, settings.clone()).await?;
        Ok(settings.without_secrets())
    }
}
