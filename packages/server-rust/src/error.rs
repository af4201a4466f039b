//! Errors surfaced by the relay to its callers.

use entityvc_core::TenantId;
use uuid::Uuid;

use crate::rpc::chunks::ChunkError;
use crate::sync::session::SessionState;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum VcError {
    /// The local transport could not enqueue the envelope.
    #[error("failed to submit request {request_id}: {source}")]
    Submission {
        request_id: Uuid,
        #[source]
        source: TransportError,
    },
    /// No response arrived within the configured window.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: Uuid, timeout_ms: u64 },
    /// The repository worker replied with an error; message passed verbatim.
    #[error("{0}")]
    Remote(String),
    #[error("request {0} has already completed")]
    AlreadyCompleted(Uuid),
    /// The commit session was abandoned before its push resolved.
    #[error("commit session {0} was aborted")]
    Aborted(Uuid),
    #[error("repository settings are not configured for tenant {0}")]
    SettingsNotConfigured(TenantId),
    #[error("expected {expected} response, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("commit session cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("failed to decode entity document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VcError {
    /// Short name for metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            VcError::Submission { .. } => "submission",
            VcError::Timeout { .. } => "timeout",
            VcError::Remote(_) => "remote",
            VcError::AlreadyCompleted(_) => "already_completed",
            VcError::Aborted(_) => "aborted",
            VcError::SettingsNotConfigured(_) => "settings_not_configured",
            VcError::UnexpectedResponse { .. } => "unexpected_response",
            VcError::InvalidTransition { .. } => "invalid_transition",
            VcError::Chunk(_) => "chunk",
            VcError::Decode(_) => "decode",
            VcError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_are_stable_label_values() {
        let id = Uuid::nil();
        assert_eq!(VcError::Aborted(id).kind(), "aborted");
        assert_eq!(
            VcError::Timeout {
                request_id: id,
                timeout_ms: 100
            }
            .kind(),
            "timeout"
        );
        assert_eq!(VcError::Remote("no such branch".to_string()).kind(), "remote");
        assert_eq!(VcError::Internal(anyhow::anyhow!("boom")).kind(), "internal");
    }
}
