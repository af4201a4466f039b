//! Replies sent from the repository worker back to the requesting node.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{BranchInfo, EntityVersion, EntityVersionsDiff, PageData, VersionedEntityInfo};

/// Inbound protocol envelope.
///
/// Exactly one of `error` and `response` is expected; an envelope carrying an
/// error fails the pending request regardless of `response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<RepositoryResponse>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: Uuid, response: RepositoryResponse) -> Self {
        Self {
            request_id,
            error: None,
            response: Some(response),
        }
    }

    #[must_use]
    pub fn error(request_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            request_id,
            error: Some(message.into()),
            response: None,
        }
    }
}

/// Top-level repository reply, internally tagged on `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryResponse {
    /// Acknowledges an operation without a result.
    Generic,
    Commit(CommitResponsePayload),
    ListBranches(ListBranchesResponsePayload),
    ListEntities(ListEntitiesResponsePayload),
    ListVersions(PageData<EntityVersion>),
    /// One chunk of a single document.
    EntityContent(EntityContentChunk),
    /// One chunk of one of several documents.
    EntitiesContent(EntityContentChunk),
    VersionsDiff(VersionsDiffResponsePayload),
}

impl RepositoryResponse {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryResponse::Generic => "generic",
            RepositoryResponse::Commit(_) => "commit",
            RepositoryResponse::ListBranches(_) => "list_branches",
            RepositoryResponse::ListEntities(_) => "list_entities",
            RepositoryResponse::ListVersions(_) => "list_versions",
            RepositoryResponse::EntityContent(_) => "entity_content",
            RepositoryResponse::EntitiesContent(_) => "entities_content",
            RepositoryResponse::VersionsDiff(_) => "versions_diff",
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponsePayload {
    /// `None` when the session had nothing to commit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<EntityVersion>,
    pub added: u32,
    pub modified: u32,
    pub removed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBranchesResponsePayload {
    pub branches: Vec<BranchInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntitiesResponsePayload {
    pub entities: Vec<VersionedEntityInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsDiffResponsePayload {
    pub diffs: Vec<EntityVersionsDiff>,
}

/// Positional fragment of a (possibly multi-document) content reply.
///
/// `items_count == 0` marks an empty reply; such a chunk carries no data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContentChunk {
    pub chunked_group_id: Uuid,
    pub item_index: u32,
    pub items_count: u32,
    pub chunk_index: u32,
    pub chunks_count: u32,
    pub data: String,
}

impl EntityContentChunk {
    /// The single chunk of an empty multi-document reply.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            chunked_group_id: Uuid::new_v4(),
            item_index: 0,
            items_count: 0,
            chunk_index: 0,
            chunks_count: 0,
            data: String::new(),
        }
    }
}
