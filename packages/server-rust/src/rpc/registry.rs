//! Correlation of outbound requests with inbound responses.
//!
//! The caller owns a [`PendingRequest`]; the registry holds a handle to the
//! same completion slot keyed by request id. Whoever removes the registry
//! entry (the response router or the timeout timer) completes the request,
//! so each request resolves exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use entityvc_core::TenantId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::chunks::ChunkReassembler;
use super::reply::Reply;
use crate::config::VersionControlConfig;
use crate::error::VcError;

/// Outcome delivered to the owner of a pending request.
pub type RequestResult = Result<Reply, VcError>;

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// One-shot completion slot shared by a [`PendingRequest`] and its registry entry.
#[derive(Debug)]
pub(crate) struct Completion {
    sender: Mutex<Option<oneshot::Sender<RequestResult>>>,
    done: AtomicBool,
}

impl Completion {
    fn new(sender: oneshot::Sender<RequestResult>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            done: AtomicBool::new(false),
        }
    }

    /// Deliver `result`. Returns `false` if the slot was already completed.
    pub(crate) fn complete(&self, result: RequestResult) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            return false;
        };
        self.done.store(true, Ordering::Release);
        // The owner may have dropped its handle; nothing left to notify.
        let _ = sender.send(result);
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// PendingRequest
// ---------------------------------------------------------------------------

/// Caller-side handle of an in-flight request.
///
/// One handle may back several dispatched messages (a commit session); every
/// message carries the same request id and the handle resolves once.
#[derive(Debug)]
pub struct PendingRequest {
    request_id: Uuid,
    tenant_id: TenantId,
    requires_settings: bool,
    completion: Arc<Completion>,
    receiver: oneshot::Receiver<RequestResult>,
}

impl PendingRequest {
    #[must_use]
    pub fn new(tenant_id: TenantId, requires_settings: bool) -> Self {
        Self::with_id(Uuid::new_v4(), tenant_id, requires_settings)
    }

    #[must_use]
    pub fn with_id(request_id: Uuid, tenant_id: TenantId, requires_settings: bool) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            request_id,
            tenant_id,
            requires_settings,
            completion: Arc::new(Completion::new(sender)),
            receiver,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Whether dispatch must attach the tenant's repository settings.
    #[must_use]
    pub fn requires_settings(&self) -> bool {
        self.requires_settings
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completion.is_done()
    }

    pub(crate) fn completion(&self) -> Arc<Completion> {
        Arc::clone(&self.completion)
    }

    /// Wait for the request to resolve.
    ///
    /// # Errors
    ///
    /// Returns the error the request was completed with, or
    /// [`VcError::Internal`] if it was never registered and can no longer
    /// complete.
    pub async fn result(self) -> RequestResult {
        let Self {
            request_id,
            completion,
            receiver,
            ..
        } = self;
        // Only the registry entry may still hold the sender from here on.
        drop(completion);
        receiver.await.unwrap_or_else(|_| {
            Err(VcError::Internal(anyhow::anyhow!(
                "request {request_id} was dropped without completing"
            )))
        })
    }
}

// ---------------------------------------------------------------------------
// CorrelationRegistry
// ---------------------------------------------------------------------------

struct PendingEntry {
    tenant_id: TenantId,
    completion: Arc<Completion>,
    timer: Option<JoinHandle<()>>,
}

/// Registry of in-flight requests keyed by request id.
pub struct CorrelationRegistry {
    pending: DashMap<Uuid, PendingEntry>,
    chunks: ChunkReassembler,
    timeout: Duration,
}

impl CorrelationRegistry {
    #[must_use]
    pub fn new(config: &VersionControlConfig) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            chunks: ChunkReassembler::new(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Register `pending` unless its id is already registered.
    ///
    /// The timeout timer is armed only on first registration, so messages
    /// sharing a request id never reset it. Returns `true` if inserted.
    pub fn register(self: &Arc<Self>, pending: &PendingRequest) -> bool {
        let request_id = pending.request_id();
        match self.pending.entry(request_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    tenant_id: pending.tenant_id(),
                    completion: pending.completion(),
                    timer: None,
                });
            }
        }

        let timer = self.arm_timeout(request_id);
        match self.pending.get_mut(&request_id) {
            Some(mut entry) => entry.timer = Some(timer),
            // Completed between insert and arming.
            None => timer.abort(),
        }
        self.record_pending();
        true
    }

    fn arm_timeout(self: &Arc<Self>, request_id: Uuid) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(request_id);
            }
        })
    }

    fn expire(&self, request_id: Uuid) {
        // The timer task is the caller; do not abort it.
        let Some(entry) = self.evict(request_id) else {
            return;
        };
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.timeout.as_millis() as u64;
        warn!(%request_id, tenant_id = %entry.tenant_id, timeout_ms, "repository request timed out");
        metrics::counter!("vc_requests_timed_out_total").increment(1);
        entry.completion.complete(Err(VcError::Timeout {
            request_id,
            timeout_ms,
        }));
    }

    /// Remove the entry of `request_id` and its chunk buffer.
    fn evict(&self, request_id: Uuid) -> Option<PendingEntry> {
        let (_, entry) = self.pending.remove(&request_id)?;
        self.chunks.discard(request_id);
        self.record_pending();
        Some(entry)
    }

    /// Evict `request_id` and resolve it with `result`.
    ///
    /// Returns `false` if the request was unknown or already evicted.
    pub fn complete(&self, request_id: Uuid, result: RequestResult) -> bool {
        let Some(entry) = self.evict(request_id) else {
            debug!(%request_id, "completion for request that is no longer pending");
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        if let Err(error) = &result {
            metrics::counter!("vc_requests_failed_total", "reason" => error.kind()).increment(1);
        }
        entry.completion.complete(result)
    }

    #[must_use]
    pub fn contains(&self, request_id: Uuid) -> bool {
        self.pending.contains_key(&request_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Chunk buffers of in-flight content requests.
    #[must_use]
    pub fn chunks(&self) -> &ChunkReassembler {
        &self.chunks
    }

    fn record_pending(&self) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("vc_pending_requests").set(self.pending.len() as f64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
