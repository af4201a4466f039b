//! Request/response correlation over the cluster bus.
//!
//! - [`dispatcher`] registers pending requests and submits envelopes.
//! - [`router`] completes them from inbound responses.
//! - [`registry`] owns pending requests, their timeouts and chunk buffers.

pub mod chunks;
pub mod dispatcher;
pub mod registry;
pub mod reply;
pub mod router;

pub use chunks::{split_chunks, ChunkError, ChunkPosition, ChunkReassembler};
pub use dispatcher::MessageDispatcher;
pub use registry::{CorrelationRegistry, PendingRequest, RequestResult};
pub use reply::Reply;
pub use router::ResponseRouter;
