//! Inbound half of the relay: matches response envelopes to pending requests.

use std::sync::Arc;

use entityvc_core::messages::{EntityContentChunk, RepositoryResponse, ResponseEnvelope};
use entityvc_core::EntityExportData;
use tracing::debug;
use uuid::Uuid;

use super::chunks::ChunkPosition;
use super::registry::{CorrelationRegistry, RequestResult};
use super::reply::Reply;
use crate::error::VcError;
use crate::transport::ResponseHandler;

/// Completes pending requests from inbound responses.
///
/// Responses for unknown request ids (late, duplicate, or for another node)
/// are dropped silently.
pub struct ResponseRouter {
    registry: Arc<CorrelationRegistry>,
}

impl ResponseRouter {
    #[must_use]
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }

    pub fn route(&self, envelope: ResponseEnvelope) {
        let request_id = envelope.request_id;
        if !self.registry.contains(request_id) {
            debug!(%request_id, "dropping response for unknown request");
            metrics::counter!("vc_responses_dropped_total").increment(1);
            return;
        }

        if let Some(message) = envelope.error {
            debug!(%request_id, %message, "repository request failed remotely");
            self.registry.complete(request_id, Err(VcError::Remote(message)));
            return;
        }

        let reply = match envelope.response {
            None | Some(RepositoryResponse::Generic) => Reply::Ack,
            Some(RepositoryResponse::Commit(commit)) => Reply::Commit(commit),
            Some(RepositoryResponse::ListBranches(payload)) => Reply::Branches(payload.branches),
            Some(RepositoryResponse::ListEntities(payload)) => Reply::Entities(payload.entities),
            Some(RepositoryResponse::ListVersions(page)) => Reply::Versions(page),
            Some(RepositoryResponse::VersionsDiff(payload)) => Reply::VersionsDiff(payload.diffs),
            Some(RepositoryResponse::EntityContent(chunk)) => {
                self.on_chunk(request_id, chunk, false);
                return;
            }
            Some(RepositoryResponse::EntitiesContent(chunk)) => {
                if chunk.items_count == 0 {
                    Reply::EntitiesContent(Vec::new())
                } else {
                    self.on_chunk(request_id, chunk, true);
                    return;
                }
            }
        };
        self.registry.complete(request_id, Ok(reply));
    }

    fn on_chunk(&self, request_id: Uuid, chunk: EntityContentChunk, multiple: bool) {
        let position = ChunkPosition {
            item_index: chunk.item_index,
            items_count: chunk.items_count,
            chunk_index: chunk.chunk_index,
            chunks_count: chunk.chunks_count,
        };
        let result = match self.registry.chunks().feed(request_id, position, chunk.data) {
            Ok(None) => {
                // Evicted while this chunk was being stored.
                if !self.registry.contains(request_id) {
                    self.registry.chunks().discard(request_id);
                }
                return;
            }
            Ok(Some(items)) => decode_items(items, multiple),
            Err(error) => Err(error.into()),
        };
        if !self.registry.complete(request_id, result) {
            // Timed out between the lookup in `route` and the feed above.
            self.registry.chunks().discard(request_id);
        }
    }
}

fn decode_items(items: Vec<String>, multiple: bool) -> RequestResult {
    let documents = items
        .iter()
        .map(|json| EntityExportData::from_json(json))
        .collect::<Result<Vec<_>, _>>()?;
    if multiple {
        return Ok(Reply::EntitiesContent(documents));
    }
    documents
        .into_iter()
        .next()
        .map(Reply::EntityContent)
        .ok_or_else(|| VcError::Internal(anyhow::anyhow!("entity content reply carried no document")))
}

impl ResponseHandler for ResponseRouter {
    fn on_response(&self, envelope: ResponseEnvelope) {
        self.route(envelope);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
