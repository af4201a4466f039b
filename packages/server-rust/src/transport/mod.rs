//! Cluster bus seam: fire-and-forget submission of request envelopes and
//! delivery of response envelopes back to the relay.

pub mod local;

use async_trait::async_trait;
use entityvc_core::messages::{RepositoryEnvelope, ResponseEnvelope};

pub use local::LocalTransport;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport partition {0} is closed")]
    Closed(u32),
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Sends envelopes to the repository worker.
///
/// `send` resolves once the envelope is accepted for delivery, not when the
/// worker replies. Envelopes of one tenant are delivered in submission order.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TransportError`] if the envelope could not be enqueued.
    async fn send(&self, envelope: RepositoryEnvelope) -> Result<(), TransportError>;
}

/// Receives response envelopes arriving from the repository worker.
pub trait ResponseHandler: Send + Sync {
    fn on_response(&self, envelope: ResponseEnvelope);
}
