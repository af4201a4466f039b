//! Outbound half of the relay: registers a pending request and enqueues its
//! envelope on the cluster transport.

use std::sync::Arc;

use entityvc_core::messages::{RepositoryEnvelope, RepositoryRequest};
use entityvc_core::{RepositorySettings, TenantId};
use tracing::{debug, warn};
use uuid::Uuid;

use super::registry::{CorrelationRegistry, PendingRequest, RequestResult};
use crate::config::VersionControlConfig;
use crate::error::VcError;
use crate::traits::RepositorySettingsStore;
use crate::transport::ClusterTransport;

pub struct MessageDispatcher {
    node_id: String,
    registry: Arc<CorrelationRegistry>,
    transport: Arc<dyn ClusterTransport>,
    settings: Arc<dyn RepositorySettingsStore>,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(
        config: &VersionControlConfig,
        registry: Arc<CorrelationRegistry>,
        transport: Arc<dyn ClusterTransport>,
        settings: Arc<dyn RepositorySettingsStore>,
    ) -> Self {
        Self {
            node_id: config.node_id.clone(),
            registry,
            transport,
            settings,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Register `pending` (if not yet registered) and enqueue `request`.
    ///
    /// Resolves once the envelope is accepted by the transport; the response
    /// is observed through [`PendingRequest::result`]. When `settings` is
    /// `None` and the request requires settings, the tenant's stored settings
    /// are attached.
    ///
    /// # Errors
    ///
    /// - [`VcError::AlreadyCompleted`] if `pending` has already resolved.
    /// - [`VcError::SettingsNotConfigured`] if required settings are absent.
    /// - [`VcError::Submission`] if the transport rejected the envelope; the
    ///   pending request is evicted and resolves with the same error.
    pub async fn dispatch(
        &self,
        pending: &PendingRequest,
        request: RepositoryRequest,
        settings: Option<RepositorySettings>,
    ) -> Result<(), VcError> {
        let request_id = pending.request_id();
        let tenant_id = pending.tenant_id();
        if pending.is_completed() {
            return Err(VcError::AlreadyCompleted(request_id));
        }

        let settings = match settings {
            Some(settings) => Some(settings),
            None if pending.requires_settings() => Some(
                self.settings
                    .get(tenant_id)
                    .await?
                    .ok_or(VcError::SettingsNotConfigured(tenant_id))?,
            ),
            None => None,
        };

        self.registry.register(pending);

        let kind = request.kind();
        let envelope = RepositoryEnvelope {
            sender_node_id: self.node_id.clone(),
            tenant_id,
            request_id,
            request,
            settings,
        };

        debug!(%request_id, %tenant_id, kind, "dispatching repository request");
        match self.transport.send(envelope).await {
            Ok(()) => {
                metrics::counter!("vc_requests_dispatched_total", "kind" => kind).increment(1);
                Ok(())
            }
            Err(source) => {
                warn!(%request_id, %tenant_id, kind, error = %source, "failed to submit repository request");
                self.registry.complete(
                    request_id,
                    Err(VcError::Submission {
                        request_id,
                        source: source.clone(),
                    }),
                );
                Err(VcError::Submission { request_id, source })
            }
        }
    }

    /// Enqueue `request` without a pending request. Any reply is dropped by
    /// the router as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`VcError::Submission`] if the transport rejected the envelope.
    pub async fn notify(
        &self,
        tenant_id: TenantId,
        request: RepositoryRequest,
        settings: Option<RepositorySettings>,
    ) -> Result<(), VcError> {
        let request_id = Uuid::new_v4();
        let envelope = RepositoryEnvelope {
            sender_node_id: self.node_id.clone(),
            tenant_id,
            request_id,
            request,
            settings,
        };
        self.transport
            .send(envelope)
            .await
            .map_err(|source| VcError::Submission { request_id, source })
    }

    /// Dispatch a single-message request and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns any dispatch error, or the error the request resolved with.
    pub async fn request(&self, pending: PendingRequest, request: RepositoryRequest) -> RequestResult {
        self.dispatch(&pending, request, None).await?;
        pending.result().await
    }

    /// Like [`MessageDispatcher::request`] with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns any dispatch error, or the error the request resolved with.
    pub async fn request_with_settings(
        &self,
        pending: PendingRequest,
        request: RepositoryRequest,
        settings: RepositorySettings,
    ) -> RequestResult {
        self.dispatch(&pending, request, Some(settings)).await?;
        pending.result().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use entityvc_core::messages::CommitTxPayload;
    use parking_lot::Mutex;

    use super::*;
    use crate::rpc::reply::Reply;
    use crate::store::MemorySettingsStore;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<RepositoryEnvelope>>,
        fail: bool,
    }

    #[async_trait]
    impl ClusterTransport for RecordingTransport {
        async fn send(&self, envelope: RepositoryEnvelope) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Closed(0));
            }
            self.sent.lock().push(envelope);
            Ok(())
        }
    }

    fn push() -> RepositoryRequest {
        RepositoryRequest::Push(CommitTxPayload {
            tx_id: Uuid::new_v4(),
        })
    }

    fn dispatcher(
        transport: Arc<RecordingTransport>,
        settings: Arc<MemorySettingsStore>,
    ) -> MessageDispatcher {
        let config = VersionControlConfig {
            node_id: "node-a".to_string(),
            ..VersionControlConfig::default()
        };
        MessageDispatcher::new(&config, CorrelationRegistry::new(&config), transport, settings)
    }

    #[tokio::test]
    async fn attaches_stored_settings_when_required() {
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(MemorySettingsStore::new());
        let tenant = TenantId::new();
        let settings = RepositorySettings::new("mem://repo", "main");
        store.save(tenant, settings.clone()).await.unwrap();
        let dispatcher = dispatcher(transport.clone(), store);

        let pending = PendingRequest::new(tenant, true);
        dispatcher.dispatch(&pending, push(), None).await.unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent[0].settings, Some(settings));
        assert_eq!(sent[0].sender_node_id, "node-a");
        assert_eq!(sent[0].request_id, pending.request_id());
    }

    #[tokio::test]
    async fn missing_settings_fail_before_registration() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(transport.clone(), Arc::new(MemorySettingsStore::new()));
        let tenant = TenantId::new();

        let pending = PendingRequest::new(tenant, true);
        let err = dispatcher.dispatch(&pending, push(), None).await.unwrap_err();
        assert!(matches!(err, VcError::SettingsNotConfigured(t) if t == tenant));
        assert!(dispatcher.registry().is_empty());
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn session_messages_share_one_registration() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(transport.clone(), Arc::new(MemorySettingsStore::new()));
        let pending = PendingRequest::new(TenantId::new(), false);

        dispatcher.dispatch(&pending, push(), None).await.unwrap();
        dispatcher.dispatch(&pending, push(), None).await.unwrap();
        assert_eq!(dispatcher.registry().len(), 1);
        assert_eq!(transport.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn submission_failure_evicts_and_fails_pending() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let dispatcher = dispatcher(transport, Arc::new(MemorySettingsStore::new()));
        let pending = PendingRequest::new(TenantId::new(), false);
        let id = pending.request_id();

        let err = dispatcher.dispatch(&pending, push(), None).await.unwrap_err();
        assert!(matches!(err, VcError::Submission { request_id, .. } if request_id == id));
        assert!(!dispatcher.registry().contains(id));
        assert!(matches!(pending.result().await, Err(VcError::Submission { .. })));
    }

    #[tokio::test]
    async fn completed_request_rejects_further_dispatch() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(transport.clone(), Arc::new(MemorySettingsStore::new()));
        let pending = PendingRequest::new(TenantId::new(), false);
        let id = pending.request_id();

        dispatcher.dispatch(&pending, push(), None).await.unwrap();
        dispatcher.registry().complete(id, Ok(Reply::Ack));

        let err = dispatcher.dispatch(&pending, push(), None).await.unwrap_err();
        assert!(matches!(err, VcError::AlreadyCompleted(r) if r == id));
        assert_eq!(transport.sent.lock().len(), 1);
    }
}
