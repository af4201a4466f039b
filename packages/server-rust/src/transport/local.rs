//! In-process cluster transport.
//!
//! Envelopes are `MsgPack`-encoded and routed to one of N FIFO partitions by
//! tenant hash. Each partition is drained by its own tokio task that hands
//! envelopes to a [`RepositoryWorker`] and forwards every reply to a
//! [`ResponseHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use entityvc_core::hash::tenant_partition;
use entityvc_core::messages::{self, RepositoryEnvelope, ResponseEnvelope};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ClusterTransport, ResponseHandler, TransportError};
use crate::config::VersionControlConfig;
use crate::worker::RepositoryWorker;

/// Partitioned in-process transport between the relay and a repository worker.
pub struct LocalTransport {
    senders: RwLock<Vec<mpsc::Sender<Vec<u8>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalTransport {
    /// Spawn one consumer task per partition.
    #[must_use]
    pub fn start(
        config: &VersionControlConfig,
        worker: Arc<dyn RepositoryWorker>,
        responses: Arc<dyn ResponseHandler>,
    ) -> Self {
        let count = config.transport_partitions.max(1);
        let capacity = config.transport_channel_capacity.max(1);
        let mut senders = Vec::with_capacity(count as usize);
        let mut handles = Vec::with_capacity(count as usize);

        for partition in 0..count {
            let (tx, rx) = mpsc::channel::<Vec<u8>>(capacity);
            senders.push(tx);
            handles.push(tokio::spawn(run_partition(
                partition,
                rx,
                Arc::clone(&worker),
                Arc::clone(&responses),
            )));
        }

        Self {
            senders: RwLock::new(senders),
            handles: Mutex::new(handles),
        }
    }

    /// Close every partition and wait for queued envelopes to drain.
    pub async fn stop(&self) {
        self.senders.write().clear();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl ClusterTransport for LocalTransport {
    async fn send(&self, envelope: RepositoryEnvelope) -> Result<(), TransportError> {
        let bytes =
            messages::encode(&envelope).map_err(|e| TransportError::Encode(e.to_string()))?;

        let (partition, sender) = {
            let senders = self.senders.read();
            #[allow(clippy::cast_possible_truncation)]
            let count = senders.len() as u32;
            if count == 0 {
                return Err(TransportError::Closed(0));
            }
            let partition = tenant_partition(&envelope.tenant_id, count);
            (partition, senders[partition as usize].clone())
        };

        sender
            .send(bytes)
            .await
            .map_err(|_| TransportError::Closed(partition))
    }
}

async fn run_partition(
    partition: u32,
    mut rx: mpsc::Receiver<Vec<u8>>,
    worker: Arc<dyn RepositoryWorker>,
    responses: Arc<dyn ResponseHandler>,
) {
    while let Some(bytes) = rx.recv().await {
        let envelope: RepositoryEnvelope = match messages::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(partition, %error, "dropping undecodable request envelope");
                continue;
            }
        };

        for reply in worker.handle(envelope).await {
            // Replies cross the same wire format as requests.
            let decoded = messages::encode(&reply)
                .and_then(|bytes| messages::decode::<ResponseEnvelope>(&bytes));
            match decoded {
                Ok(reply) => responses.on_response(reply),
                Err(error) => warn!(partition, %error, "dropping unencodable response envelope"),
            }
        }
    }
    debug!(partition, "transport partition stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
