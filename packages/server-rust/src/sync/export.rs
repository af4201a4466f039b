//! Export pipeline: turns a [`VersionCreateRequest`] into one commit session.

use std::sync::Arc;
use std::time::Instant;

use entityvc_core::messages::CommitResponsePayload;
use entityvc_core::types::type_path;
use entityvc_core::{
    EntityId, EntityType, EntityTypeVersionCreateConfig, PageLink, RequestContext, SyncStrategy,
    VersionCreateConfig, VersionCreateRequest, VersionCreateSelection, VersionCreationResult,
};
use tracing::{debug, info, info_span, warn, Instrument};

use super::session::CommitSession;
use super::status::TaskStatusStore;
use crate::error::VcError;
use crate::rpc::MessageDispatcher;
use crate::traits::{EntityCodec, EntityService};

#[derive(Clone)]
pub struct ExportPipeline {
    dispatcher: Arc<MessageDispatcher>,
    codec: Arc<dyn EntityCodec>,
    entities: Arc<dyn EntityService>,
    statuses: Arc<TaskStatusStore>,
    chunk_size: usize,
    page_size: u32,
}

impl ExportPipeline {
    #[must_use]
    pub fn new(
        dispatcher: Arc<MessageDispatcher>,
        codec: Arc<dyn EntityCodec>,
        entities: Arc<dyn EntityService>,
        statuses: Arc<TaskStatusStore>,
        chunk_size: usize,
        page_size: u32,
    ) -> Self {
        Self {
            dispatcher,
            codec,
            entities,
            statuses,
            chunk_size,
            page_size,
        }
    }

    /// Run `request` through `session` to completion and record the outcome
    /// under the session's request id. A failed step aborts the session.
    pub async fn run(
        self,
        ctx: RequestContext,
        mut session: CommitSession,
        request: VersionCreateRequest,
    ) -> VersionCreationResult {
        let request_id = session.request_id();
        let span = info_span!(
            "version_export",
            %request_id,
            tenant_id = %ctx.tenant_id,
            branch = %request.branch,
        );

        async move {
            let start = Instant::now();
            let result = match self.export(&ctx, &mut session, &request).await {
                Ok(commit) => {
                    info!(
                        added = commit.added,
                        modified = commit.modified,
                        removed = commit.removed,
                        duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "version export complete"
                    );
                    VersionCreationResult {
                        version: commit.version,
                        added: commit.added,
                        modified: commit.modified,
                        removed: commit.removed,
                        error: None,
                        done: true,
                    }
                }
                Err(error) => {
                    warn!(%error, "version export failed");
                    session.abort(&self.dispatcher).await;
                    VersionCreationResult::failed(error.to_string())
                }
            };
            self.statuses.put_export(request_id, result.clone());
            result
        }
        .instrument(span)
        .await
    }

    async fn export(
        &self,
        ctx: &RequestContext,
        session: &mut CommitSession,
        request: &VersionCreateRequest,
    ) -> Result<CommitResponsePayload, VcError> {
        session.prepare(&self.dispatcher).await?;

        match &request.selection {
            VersionCreateSelection::SingleEntity { entity_id, config } => {
                self.add_entity(ctx, session, *entity_id, config).await?;
            }
            VersionCreateSelection::Complex {
                sync_strategy,
                entity_types,
            } => {
                let mut types: Vec<_> = entity_types.iter().collect();
                types.sort_by_key(|(entity_type, _)| entity_type.import_rank());
                for (entity_type, type_config) in types {
                    let strategy = type_config.sync_strategy.unwrap_or(*sync_strategy);
                    self.export_type(ctx, session, *entity_type, type_config, strategy)
                        .await?;
                }
            }
        }

        session.push(&self.dispatcher).await
    }

    async fn export_type(
        &self,
        ctx: &RequestContext,
        session: &mut CommitSession,
        entity_type: EntityType,
        type_config: &EntityTypeVersionCreateConfig,
        strategy: SyncStrategy,
    ) -> Result<(), VcError> {
        if strategy == SyncStrategy::Overwrite {
            session.delete_all(&self.dispatcher, type_path(entity_type)).await?;
        }

        if !type_config.all_entities {
            for id in &type_config.entity_ids {
                let entity_id = EntityId::new(entity_type, *id);
                self.add_entity(ctx, session, entity_id, &type_config.config).await?;
            }
            return Ok(());
        }

        let mut page_link = PageLink::new(0, self.page_size);
        loop {
            let page = self
                .entities
                .find_entities_by_type(ctx.tenant_id, entity_type, &page_link, None)
                .await?;
            debug!(%entity_type, page = page_link.page, count = page.data.len(), "exporting page");
            for entity in page.data {
                self.add_entity(ctx, session, entity.id, &type_config.config).await?;
            }
            if !page.has_next {
                return Ok(());
            }
            page_link = page_link.next_page();
        }
    }

    async fn add_entity(
        &self,
        ctx: &RequestContext,
        session: &mut CommitSession,
        entity_id: EntityId,
        config: &VersionCreateConfig,
    ) -> Result<(), VcError> {
        let data = self.codec.export_entity(ctx, entity_id, config).await?;
        session.add(&self.dispatcher, &data, self.chunk_size).await
    }
}
