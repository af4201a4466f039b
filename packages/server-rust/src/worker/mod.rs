//! Repository worker: the remote end of the cluster bus that owns the
//! tenants' repositories and answers repository requests.

pub mod memory;

use async_trait::async_trait;
use entityvc_core::messages::{RepositoryEnvelope, ResponseEnvelope};

pub use memory::MemoryRepositoryWorker;

/// Handles one request envelope and returns the replies to route back.
///
/// Commit session steps other than push produce no reply unless they fail.
/// Content requests may produce one reply per chunk.
#[async_trait]
pub trait RepositoryWorker: Send + Sync {
    async fn handle(&self, envelope: RepositoryEnvelope) -> Vec<ResponseEnvelope>;
}
