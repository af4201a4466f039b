//! Import pipeline: restores local entities from a repository version.
//!
//! Entity types are imported in dependency order. Documents that failed or
//! left references unresolved on the first pass are imported again, with
//! `final_attempt` set, once every type has been processed. Orphan cleanup
//! and reference saving run last. With rollback-on-error the whole run is one
//! transaction and audit side effects are held back until it commits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use entityvc_core::messages::{EntitiesContentPayload, EntityContentPayload, RepositoryRequest};
use entityvc_core::{
    EntityExportData, EntityId, EntityLoadError, EntityType, EntityTypeLoadResult,
    EntityTypeVersionLoadConfig, PageLink, RepositorySettings, TenantId, VersionLoadRequest,
    VersionLoadResult,
};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::classify::classify;
use super::status::TaskStatusStore;
use crate::error::VcError;
use crate::rpc::{MessageDispatcher, PendingRequest, Reply};
use crate::traits::{
    EntityActionListener, EntityCodec, EntityImportResult, EntityService, ImportScope,
    TransactionManager, TxId,
};

// ---------------------------------------------------------------------------
// ImportContext
// ---------------------------------------------------------------------------

/// Document whose first import failed or left references unresolved.
#[derive(Debug, Clone)]
struct Reimport {
    data: EntityExportData,
    config: EntityTypeVersionLoadConfig,
    created: bool,
}

/// Document whose references and relations are saved after every entity
/// exists.
#[derive(Debug, Clone)]
struct ReferenceTask {
    local_id: EntityId,
    data: EntityExportData,
    config: EntityTypeVersionLoadConfig,
}

/// Effect that must not be rolled back with the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideEffect {
    EntityDeleted(EntityId),
}

/// Mutable state of one import run.
#[derive(Debug)]
pub struct ImportContext {
    request_id: Uuid,
    tenant_id: TenantId,
    version_id: String,
    rollback_on_error: bool,
    settings: RepositorySettings,
    transaction: Option<TxId>,
    results: Vec<EntityTypeLoadResult>,
    imported: HashMap<EntityType, HashSet<EntityId>>,
    to_reimport: Vec<(EntityId, Reimport)>,
    references: Vec<ReferenceTask>,
    deferred: Vec<SideEffect>,
}

impl ImportContext {
    #[must_use]
    pub fn new(
        request_id: Uuid,
        tenant_id: TenantId,
        request: &VersionLoadRequest,
        settings: RepositorySettings,
    ) -> Self {
        Self {
            request_id,
            tenant_id,
            version_id: request.version_id().to_string(),
            rollback_on_error: request.rollback_on_error(),
            settings,
            transaction: None,
            results: Vec::new(),
            imported: HashMap::new(),
            to_reimport: Vec::new(),
            references: Vec::new(),
            deferred: Vec::new(),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    fn scope(&self) -> ImportScope {
        ImportScope {
            tenant_id: self.tenant_id,
            transaction: self.transaction,
        }
    }

    fn result_mut(&mut self, entity_type: EntityType) -> &mut EntityTypeLoadResult {
        let index = match self.results.iter().position(|r| r.entity_type == entity_type) {
            Some(index) => index,
            None => {
                self.results.push(EntityTypeLoadResult::new(entity_type));
                self.results.len() - 1
            }
        };
        &mut self.results[index]
    }

    fn queue_reimport(&mut self, reimport: Reimport) {
        let external_id = reimport.data.external_id;
        self.to_reimport.retain(|(id, _)| *id != external_id);
        self.to_reimport.push((external_id, reimport));
    }

    fn record(
        &mut self,
        data: EntityExportData,
        config: EntityTypeVersionLoadConfig,
        result: &EntityImportResult,
        created_earlier: bool,
    ) {
        let entity_type = data.entity_type;
        let counts = self.result_mut(entity_type);
        if result.created || created_earlier {
            counts.created += 1;
        } else if result.updated {
            counts.updated += 1;
        }
        self.imported
            .entry(entity_type)
            .or_default()
            .insert(result.local_id);
        self.references.push(ReferenceTask {
            local_id: result.local_id,
            data,
            config,
        });
    }

    fn snapshot(&self, done: bool, error: Option<EntityLoadError>) -> VersionLoadResult {
        VersionLoadResult {
            result: self.results.clone(),
            error,
            done,
        }
    }
}

// ---------------------------------------------------------------------------
// LoadFailure
// ---------------------------------------------------------------------------

/// Error that stopped an import, with the external id being processed.
#[derive(Debug)]
pub struct LoadFailure {
    pub source: Option<EntityId>,
    pub error: anyhow::Error,
}

impl LoadFailure {
    fn entity(source: EntityId, error: anyhow::Error) -> Self {
        Self {
            source: Some(source),
            error,
        }
    }

    #[must_use]
    pub fn classify(&self) -> EntityLoadError {
        classify(&self.error, self.source)
    }
}

impl From<anyhow::Error> for LoadFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            source: None,
            error,
        }
    }
}

impl From<VcError> for LoadFailure {
    fn from(error: VcError) -> Self {
        anyhow::Error::new(error).into()
    }
}

// ---------------------------------------------------------------------------
// ImportPipeline
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ImportPipeline {
    dispatcher: Arc<MessageDispatcher>,
    codec: Arc<dyn EntityCodec>,
    entities: Arc<dyn EntityService>,
    transactions: Arc<dyn TransactionManager>,
    listener: Arc<dyn EntityActionListener>,
    statuses: Arc<TaskStatusStore>,
    page_size: u32,
    type_order: Arc<[EntityType]>,
}

impl ImportPipeline {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<MessageDispatcher>,
        codec: Arc<dyn EntityCodec>,
        entities: Arc<dyn EntityService>,
        transactions: Arc<dyn TransactionManager>,
        listener: Arc<dyn EntityActionListener>,
        statuses: Arc<TaskStatusStore>,
        page_size: u32,
    ) -> Self {
        Self {
            dispatcher,
            codec,
            entities,
            transactions,
            listener,
            statuses,
            page_size: page_size.max(1),
            type_order: Arc::from(EntityType::ALL.as_slice()),
        }
    }

    /// Import entity types in the order given; unlisted types go last.
    #[must_use]
    pub fn with_type_order(mut self, order: &[EntityType]) -> Self {
        self.type_order = Arc::from(order);
        self
    }

    fn rank(&self, entity_type: EntityType) -> usize {
        self.type_order
            .iter()
            .position(|t| *t == entity_type)
            .unwrap_or(self.type_order.len())
    }

    /// Run `request` to completion, recording progress and the outcome under
    /// the context's request id.
    pub async fn run(self, mut ctx: ImportContext, request: VersionLoadRequest) -> VersionLoadResult {
        let span = info_span!(
            "version_import",
            request_id = %ctx.request_id,
            tenant_id = %ctx.tenant_id,
            version_id = %ctx.version_id,
        );

        async move {
            let start = Instant::now();
            self.persist(&ctx);
            let result = match self.load(&mut ctx, &request).await {
                Ok(()) => {
                    info!(
                        types = ctx.results.len(),
                        duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "version import complete"
                    );
                    ctx.snapshot(true, None)
                }
                Err(failure) => {
                    let error = failure.classify();
                    warn!(%error, "version import failed");
                    ctx.snapshot(true, Some(error))
                }
            };
            self.statuses.put_import(ctx.request_id, result.clone());
            result
        }
        .instrument(span)
        .await
    }

    async fn load(&self, ctx: &mut ImportContext, request: &VersionLoadRequest) -> Result<(), LoadFailure> {
        if !ctx.rollback_on_error {
            return self.load_body(ctx, request).await;
        }

        let transaction = self.transactions.begin(ctx.tenant_id).await?;
        ctx.transaction = Some(transaction);
        let outcome = self.load_body(ctx, request).await;
        ctx.transaction = None;
        match outcome {
            Ok(()) => {
                self.transactions.commit(transaction).await?;
                for effect in std::mem::take(&mut ctx.deferred) {
                    self.apply(ctx.tenant_id, effect);
                }
                Ok(())
            }
            Err(failure) => {
                if let Err(error) = self.transactions.rollback(transaction).await {
                    warn!(%error, "failed to roll back import transaction");
                }
                ctx.deferred.clear();
                ctx.results.clear();
                Err(failure)
            }
        }
    }

    async fn load_body(&self, ctx: &mut ImportContext, request: &VersionLoadRequest) -> Result<(), LoadFailure> {
        match request {
            VersionLoadRequest::SingleEntity {
                external_entity_id,
                config,
                ..
            } => {
                let config = EntityTypeVersionLoadConfig {
                    config: *config,
                    ..EntityTypeVersionLoadConfig::default()
                };
                let pending = PendingRequest::new(ctx.tenant_id, true);
                let data = self
                    .dispatcher
                    .request_with_settings(
                        pending,
                        RepositoryRequest::GetEntityContent(EntityContentPayload {
                            version_id: ctx.version_id.clone(),
                            external_id: *external_entity_id,
                        }),
                        ctx.settings.clone(),
                    )
                    .await
                    .and_then(Reply::into_entity_content)?;
                self.import_one(ctx, data, config, true).await?;
                self.persist(ctx);
            }
            VersionLoadRequest::EntityType { entity_types, .. } => {
                let mut types: Vec<(EntityType, EntityTypeVersionLoadConfig)> =
                    entity_types.iter().map(|(t, c)| (*t, *c)).collect();
                types.sort_by_key(|(t, _)| self.rank(*t));

                for (entity_type, config) in &types {
                    self.import_type(ctx, *entity_type, *config).await?;
                }
                self.reimport(ctx).await?;
                for (entity_type, config) in &types {
                    if config.remove_other_entities {
                        self.remove_others(ctx, *entity_type).await?;
                    }
                }
            }
        }
        self.save_references(ctx).await
    }

    async fn import_type(
        &self,
        ctx: &mut ImportContext,
        entity_type: EntityType,
        config: EntityTypeVersionLoadConfig,
    ) -> Result<(), LoadFailure> {
        ctx.result_mut(entity_type);
        let mut offset = 0u32;
        loop {
            let pending = PendingRequest::new(ctx.tenant_id, true);
            let page = self
                .dispatcher
                .request_with_settings(
                    pending,
                    RepositoryRequest::GetEntitiesContent(EntitiesContentPayload {
                        version_id: ctx.version_id.clone(),
                        entity_type,
                        offset,
                        limit: self.page_size,
                    }),
                    ctx.settings.clone(),
                )
                .await
                .and_then(Reply::into_entities_content)?;
            let count = page.len();
            debug!(%entity_type, offset, count, "importing page");

            for data in page {
                self.import_one(ctx, data, config, false).await?;
            }
            self.persist(ctx);

            if count < self.page_size as usize {
                return Ok(());
            }
            offset += self.page_size;
        }
    }

    async fn import_one(
        &self,
        ctx: &mut ImportContext,
        data: EntityExportData,
        config: EntityTypeVersionLoadConfig,
        final_attempt: bool,
    ) -> Result<(), LoadFailure> {
        let result = match self
            .codec
            .import_entity(&ctx.scope(), &data, &config, final_attempt)
            .await
        {
            Ok(result) => result,
            Err(error) if !final_attempt => {
                debug!(external_id = %data.external_id, %error, "deferring failed import to the final pass");
                ctx.queue_reimport(Reimport {
                    data,
                    config,
                    created: false,
                });
                return Ok(());
            }
            Err(error) => return Err(LoadFailure::entity(data.external_id, error)),
        };

        if !final_attempt && !result.all_external_ids_resolved {
            debug!(external_id = %data.external_id, "deferring import until references exist");
            ctx.imported
                .entry(data.entity_type)
                .or_default()
                .insert(result.local_id);
            ctx.queue_reimport(Reimport {
                data,
                config,
                created: result.created,
            });
            return Ok(());
        }
        ctx.record(data, config, &result, false);
        Ok(())
    }

    async fn reimport(&self, ctx: &mut ImportContext) -> Result<(), LoadFailure> {
        let queue = std::mem::take(&mut ctx.to_reimport);
        if queue.is_empty() {
            return Ok(());
        }
        debug!(count = queue.len(), "reimporting deferred entities");
        for (external_id, entry) in queue {
            let result = self
                .codec
                .import_entity(&ctx.scope(), &entry.data, &entry.config, true)
                .await
                .map_err(|error| LoadFailure::entity(external_id, error))?;
            ctx.record(entry.data, entry.config, &result, entry.created);
        }
        self.persist(ctx);
        Ok(())
    }

    async fn remove_others(&self, ctx: &mut ImportContext, entity_type: EntityType) -> Result<(), LoadFailure> {
        let imported = ctx.imported.get(&entity_type).cloned().unwrap_or_default();
        let mut stale = Vec::new();
        let mut page_link = PageLink::new(0, self.page_size);
        loop {
            let page = self
                .entities
                .find_entities_by_type(ctx.tenant_id, entity_type, &page_link, ctx.transaction)
                .await?;
            stale.extend(
                page.data
                    .iter()
                    .filter(|e| !imported.contains(&e.id))
                    .map(|e| e.id),
            );
            if !page.has_next {
                break;
            }
            page_link = page_link.next_page();
        }

        for entity_id in stale {
            self.entities
                .delete_entity(ctx.tenant_id, entity_id, ctx.transaction)
                .await
                .map_err(|error| LoadFailure::entity(entity_id, error))?;
            ctx.result_mut(entity_type).deleted += 1;
            self.emit(ctx, SideEffect::EntityDeleted(entity_id));
        }
        self.persist(ctx);
        Ok(())
    }

    async fn save_references(&self, ctx: &mut ImportContext) -> Result<(), LoadFailure> {
        let scope = ctx.scope();
        for task in std::mem::take(&mut ctx.references) {
            self.codec
                .save_references(&scope, task.local_id, &task.data, &task.config)
                .await
                .map_err(|error| LoadFailure::entity(task.data.external_id, error))?;
        }
        self.persist(ctx);
        Ok(())
    }

    fn emit(&self, ctx: &mut ImportContext, effect: SideEffect) {
        if ctx.transaction.is_some() {
            ctx.deferred.push(effect);
        } else {
            self.apply(ctx.tenant_id, effect);
        }
    }

    fn apply(&self, tenant_id: TenantId, effect: SideEffect) {
        match effect {
            SideEffect::EntityDeleted(entity_id) => self.listener.on_entity_deleted(tenant_id, entity_id),
        }
    }

    fn persist(&self, ctx: &ImportContext) {
        self.statuses.put_import(ctx.request_id, ctx.snapshot(false, None));
    }
}
