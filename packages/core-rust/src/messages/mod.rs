//! Wire protocol between requesting nodes and the repository worker.
//!
//! All types use named `MsgPack` serialization (`rmp_serde::to_vec_named()`)
//! with camelCase field names; enums are internally tagged on `"type"`.

pub mod request;
pub mod response;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use request::{
    AddChunkPayload, CommitTxPayload, DeleteAllPayload, EntitiesContentPayload,
    EntityContentPayload, ListEntitiesAtVersionPayload, ListVersionsPayload, PrepareCommitPayload,
    RepositoryEnvelope, RepositoryRequest, VersionsDiffPayload,
};
pub use response::{
    CommitResponsePayload, EntityContentChunk, ListBranchesResponsePayload,
    ListEntitiesResponsePayload, RepositoryResponse, ResponseEnvelope,
    VersionsDiffResponsePayload,
};

/// Errors from encoding or decoding wire envelopes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Serializes a wire message to named `MsgPack`.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the message cannot be serialized.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Deserializes a wire message from `MsgPack`.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if `bytes` is not a valid message of type `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::settings::RepositorySettings;
    use crate::types::{EntityId, EntityType, EntityVersion, PageData, PageLink, TenantId};

    fn envelope(request: RepositoryRequest) -> RepositoryEnvelope {
        RepositoryEnvelope {
            sender_node_id: "node-1".to_string(),
            tenant_id: TenantId::new(),
            request_id: Uuid::new_v4(),
            request,
            settings: None,
        }
    }

    #[test]
    fn add_chunk_survives_the_wire() {
        let msg = envelope(RepositoryRequest::AddChunk(AddChunkPayload {
            tx_id: Uuid::new_v4(),
            relative_path: EntityId::random(EntityType::Device).relative_path(),
            chunked_group_id: Uuid::new_v4(),
            chunk_index: 2,
            chunks_count: 3,
            json_chunk: "{\"name\":".to_string(),
        }));
        let decoded: RepositoryEnvelope = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unit_request_with_settings_survives_the_wire() {
        let mut msg = envelope(RepositoryRequest::TestRepository);
        msg.settings = Some(RepositorySettings::new("ssh://git@example.com/repo.git", "main"));
        let decoded: RepositoryEnvelope = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn list_versions_request_keeps_optional_filters() {
        let msg = envelope(RepositoryRequest::ListVersions(ListVersionsPayload {
            branch: "main".to_string(),
            entity_type: Some(EntityType::Dashboard),
            entity_id: None,
            page_link: PageLink::new(1, 20),
        }));
        let decoded: RepositoryEnvelope = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn version_page_response_survives_the_wire() {
        let msg = ResponseEnvelope::ok(
            Uuid::new_v4(),
            RepositoryResponse::ListVersions(PageData {
                data: vec![EntityVersion {
                    timestamp: 1_700_000_000_000,
                    id: "c0ffee".to_string(),
                    name: "snap1".to_string(),
                    author: "Jane <jane@example.com>".to_string(),
                }],
                total_pages: 1,
                total_elements: 1,
                has_next: false,
            }),
        );
        let decoded: ResponseEnvelope = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn error_response_has_no_payload() {
        let msg = ResponseEnvelope::error(Uuid::new_v4(), "Branch not found");
        let decoded: ResponseEnvelope = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.error.as_deref(), Some("Branch not found"));
        assert!(decoded.response.is_none());
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result: Result<ResponseEnvelope, _> = decode(&[0xc1, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn request_kind_names() {
        assert_eq!(RepositoryRequest::ListBranches.kind(), "list_branches");
        assert_eq!(
            RepositoryRequest::Push(CommitTxPayload { tx_id: Uuid::nil() }).kind(),
            "push"
        );
    }
}
