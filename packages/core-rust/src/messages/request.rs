//! Requests sent from any node to the repository worker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::RepositorySettings;
use crate::types::{EntityId, EntityType, PageLink, TenantId};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Outbound protocol envelope.
///
/// `request_id` is the correlation key: the worker copies it into every
/// [`super::ResponseEnvelope`] it produces for this request. All messages of
/// one commit session share a request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryEnvelope {
    pub sender_node_id: String,
    pub tenant_id: TenantId,
    pub request_id: Uuid,
    pub request: RepositoryRequest,
    /// Present when the operation needs the tenant's repository settings.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub settings: Option<RepositorySettings>,
}

// ---------------------------------------------------------------------------
// RepositoryRequest
// ---------------------------------------------------------------------------

/// Top-level repository request.
///
/// Internally tagged on `"type"` with `SCREAMING_SNAKE_CASE` variant names.
/// Covers commit sessions (5), queries (6) and repository administration (3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryRequest {
    // -- Commit session (5) -------------------------------------------------
    PrepareCommit(PrepareCommitPayload),
    AddChunk(AddChunkPayload),
    DeleteAll(DeleteAllPayload),
    Push(CommitTxPayload),
    AbortCommit(CommitTxPayload),

    // -- Queries (6) --------------------------------------------------------
    ListVersions(ListVersionsPayload),
    ListEntitiesAtVersion(ListEntitiesAtVersionPayload),
    ListBranches,
    GetEntityContent(EntityContentPayload),
    GetEntitiesContent(EntitiesContentPayload),
    VersionsDiff(VersionsDiffPayload),

    // -- Administration (3) -------------------------------------------------
    InitRepository,
    TestRepository,
    ClearRepository,
}

impl RepositoryRequest {
    /// Short name for logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryRequest::PrepareCommit(_) => "prepare_commit",
            RepositoryRequest::AddChunk(_) => "add_chunk",
            RepositoryRequest::DeleteAll(_) => "delete_all",
            RepositoryRequest::Push(_) => "push",
            RepositoryRequest::AbortCommit(_) => "abort_commit",
            RepositoryRequest::ListVersions(_) => "list_versions",
            RepositoryRequest::ListEntitiesAtVersion(_) => "list_entities_at_version",
            RepositoryRequest::ListBranches => "list_branches",
            RepositoryRequest::GetEntityContent(_) => "get_entity_content",
            RepositoryRequest::GetEntitiesContent(_) => "get_entities_content",
            RepositoryRequest::VersionsDiff(_) => "versions_diff",
            RepositoryRequest::InitRepository => "init_repository",
            RepositoryRequest::TestRepository => "test_repository",
            RepositoryRequest::ClearRepository => "clear_repository",
        }
    }
}

// ---------------------------------------------------------------------------
// Commit session payloads
// ---------------------------------------------------------------------------

/// Opens commit session `tx_id` on `branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareCommitPayload {
    pub tx_id: Uuid,
    pub branch: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
}

/// One chunk of a document added to the commit at `relative_path`.
///
/// Chunks of one document share `chunked_group_id`; the worker writes the
/// document once all `chunks_count` chunks have arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChunkPayload {
    pub tx_id: Uuid,
    pub relative_path: String,
    pub chunked_group_id: Uuid,
    pub chunk_index: u32,
    pub chunks_count: u32,
    pub json_chunk: String,
}

/// Removes every document under `relative_path` from the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllPayload {
    pub tx_id: Uuid,
    pub relative_path: String,
}

/// Push or abort of commit session `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitTxPayload {
    pub tx_id: Uuid,
}

// ---------------------------------------------------------------------------
// Query payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVersionsPayload {
    pub branch: String,
    /// Restricts the listing to commits touching this type (or entity).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_type: Option<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_id: Option<EntityId>,
    pub page_link: PageLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntitiesAtVersionPayload {
    pub version_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_type: Option<EntityType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContentPayload {
    pub version_id: String,
    pub external_id: EntityId,
}

/// Documents `offset..offset + limit` of `entity_type` at `version_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesContentPayload {
    pub version_id: String,
    pub entity_type: EntityType,
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsDiffPayload {
    pub path: String,
    pub version_id1: String,
    pub version_id2: String,
}
