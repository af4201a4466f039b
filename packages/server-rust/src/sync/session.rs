//! Commit session: a multi-message exchange that builds one repository commit.
//!
//! Every message of a session carries the same request id. Steps are
//! submitted strictly in call order; only `push` waits for a reply.

use entityvc_core::messages::{
    AddChunkPayload, CommitResponsePayload, CommitTxPayload, DeleteAllPayload,
    PrepareCommitPayload, RepositoryRequest,
};
use entityvc_core::{EntityExportData, RepositorySettings, RequestContext, TenantId};
use futures_util::future::try_join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::VcError;
use crate::rpc::chunks::split_chunks;
use crate::rpc::dispatcher::MessageDispatcher;
use crate::rpc::registry::PendingRequest;
use crate::rpc::reply::Reply;

/// Lifecycle of a [`CommitSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Prepared,
    Adding,
    Deleting,
    Pushing,
    Done,
    Failed,
}

impl SessionState {
    fn can_move_to(self, to: SessionState) -> bool {
        use SessionState::{Adding, Created, Deleting, Done, Failed, Prepared, Pushing};
        matches!(
            (self, to),
            (Created, Prepared)
                | (Prepared | Adding | Deleting, Adding | Deleting | Pushing)
                | (Pushing, Done)
                | (Created | Prepared | Adding | Deleting | Pushing, Failed)
        )
    }
}

/// One commit in progress for one tenant.
#[derive(Debug)]
pub struct CommitSession {
    request_id: Uuid,
    tx_id: Uuid,
    tenant_id: TenantId,
    branch: String,
    version_name: String,
    author_name: String,
    author_email: String,
    settings: RepositorySettings,
    state: SessionState,
    pending: Option<PendingRequest>,
}

impl CommitSession {
    #[must_use]
    pub fn new(
        ctx: &RequestContext,
        branch: impl Into<String>,
        version_name: impl Into<String>,
        settings: RepositorySettings,
    ) -> Self {
        let pending = PendingRequest::new(ctx.tenant_id, true);
        Self {
            request_id: pending.request_id(),
            tx_id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            branch: branch.into(),
            version_name: version_name.into(),
            author_name: ctx.author_name.clone(),
            author_email: ctx.author_email.clone(),
            settings,
            state: SessionState::Created,
            pending: Some(pending),
        }
    }

    /// Request id shared by every message of this session.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn tx_id(&self) -> Uuid {
        self.tx_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, to: SessionState) -> Result<(), VcError> {
        if !self.state.can_move_to(to) {
            return Err(VcError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Fail the session. When a dispatch found the request already resolved,
    /// the error it resolved with is reported instead.
    async fn fail<T>(&mut self, error: VcError) -> Result<T, VcError> {
        self.state = SessionState::Failed;
        if let VcError::AlreadyCompleted(_) = error {
            if let Some(pending) = self.pending.take() {
                if let Err(cause) = pending.result().await {
                    return Err(cause);
                }
            }
        }
        Err(error)
    }

    fn pending(&self) -> Result<&PendingRequest, VcError> {
        self.pending
            .as_ref()
            .ok_or(VcError::AlreadyCompleted(self.request_id))
    }

    async fn submit(&mut self, dispatcher: &MessageDispatcher, request: RepositoryRequest) -> Result<(), VcError> {
        let result = match self.pending() {
            Ok(pending) => {
                dispatcher
                    .dispatch(pending, request, Some(self.settings.clone()))
                    .await
            }
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => Ok(()),
            Err(error) => self.fail(error).await,
        }
    }

    /// Open the commit on the worker.
    ///
    /// # Errors
    ///
    /// Returns [`VcError::InvalidTransition`] unless the session is new, or
    /// any dispatch error.
    pub async fn prepare(&mut self, dispatcher: &MessageDispatcher) -> Result<(), VcError> {
        self.transition(SessionState::Prepared)?;
        let request = RepositoryRequest::PrepareCommit(PrepareCommitPayload {
            tx_id: self.tx_id,
            branch: self.branch.clone(),
            message: self.version_name.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        });
        self.submit(dispatcher, request).await
    }

    /// Stage `data` at its relative path, split into chunks of at most
    /// `chunk_size` characters. Resolves once every chunk is enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`VcError::InvalidTransition`] before `prepare` or after
    /// `push`, [`VcError::Decode`] if the document cannot be serialized, or
    /// any dispatch error.
    pub async fn add(
        &mut self,
        dispatcher: &MessageDispatcher,
        data: &EntityExportData,
        chunk_size: usize,
    ) -> Result<(), VcError> {
        self.transition(SessionState::Adding)?;
        let json = match data.to_json_pretty() {
            Ok(json) => json,
            Err(error) => return self.fail(error.into()).await,
        };
        let relative_path = data.relative_path();
        let chunks = split_chunks(&json, chunk_size);
        #[allow(clippy::cast_possible_truncation)]
        let chunks_count = chunks.len() as u32;
        let chunked_group_id = Uuid::new_v4();

        let result = match self.pending() {
            Ok(pending) => {
                let sends = (0u32..).zip(chunks).map(|(chunk_index, json_chunk)| {
                    let request = RepositoryRequest::AddChunk(AddChunkPayload {
                        tx_id: self.tx_id,
                        relative_path: relative_path.clone(),
                        chunked_group_id,
                        chunk_index,
                        chunks_count,
                        json_chunk,
                    });
                    dispatcher.dispatch(pending, request, Some(self.settings.clone()))
                });
                try_join_all(sends).await.map(|_| ())
            }
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => Ok(()),
            Err(error) => self.fail(error).await,
        }
    }

    /// Remove every document under `relative_path` from the commit.
    ///
    /// # Errors
    ///
    /// Returns [`VcError::InvalidTransition`] before `prepare` or after
    /// `push`, or any dispatch error.
    pub async fn delete_all(
        &mut self,
        dispatcher: &MessageDispatcher,
        relative_path: impl Into<String>,
    ) -> Result<(), VcError> {
        self.transition(SessionState::Deleting)?;
        let request = RepositoryRequest::DeleteAll(DeleteAllPayload {
            tx_id: self.tx_id,
            relative_path: relative_path.into(),
        });
        self.submit(dispatcher, request).await
    }

    /// Commit and push, waiting for the worker's commit result.
    ///
    /// # Errors
    ///
    /// Returns [`VcError::InvalidTransition`] before `prepare`, any dispatch
    /// error, or the error the session resolved with (including a failure
    /// reported for an earlier step).
    pub async fn push(&mut self, dispatcher: &MessageDispatcher) -> Result<CommitResponsePayload, VcError> {
        self.transition(SessionState::Pushing)?;
        let request = RepositoryRequest::Push(CommitTxPayload { tx_id: self.tx_id });
        self.submit(dispatcher, request).await?;

        let Some(pending) = self.pending.take() else {
            return self.fail(VcError::AlreadyCompleted(self.request_id)).await;
        };
        let request_id = pending.request_id();
        match pending.result().await.and_then(Reply::into_commit) {
            Ok(commit) => {
                self.transition(SessionState::Done)?;
                debug!(%request_id, tx_id = %self.tx_id, "commit session pushed");
                Ok(commit)
            }
            Err(error) => self.fail(error).await,
        }
    }

    /// Ask the worker to discard the commit. Best effort: the session is
    /// failed locally whatever the outcome.
    ///
    /// The session's own request is evicted from the registry, which aborts
    /// its timer and drops any chunk buffer.
    pub async fn abort(&mut self, dispatcher: &MessageDispatcher) {
        if matches!(self.state, SessionState::Done) {
            return;
        }
        self.state = SessionState::Failed;
        if self.pending.take().is_some() {
            dispatcher
                .registry()
                .complete(self.request_id, Err(VcError::Aborted(self.request_id)));
        }
        let request = RepositoryRequest::AbortCommit(CommitTxPayload { tx_id: self.tx_id });
        if let Err(error) = dispatcher
            .notify(self.tenant_id, request, Some(self.settings.clone()))
            .await
        {
            warn!(tx_id = %self.tx_id, %error, "failed to abort commit session");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use entityvc_core::messages::{RepositoryEnvelope, RepositoryResponse, ResponseEnvelope};
    use entityvc_core::{EntityId, EntityType};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::config::VersionControlConfig;
    use crate::rpc::{CorrelationRegistry, ResponseRouter};
    use crate::store::MemorySettingsStore;
    use crate::transport::{ClusterTransport, TransportError};

    /// Records envelopes and answers pushes with a fixed commit result.
    struct ScriptedTransport {
        sent: Mutex<Vec<RepositoryEnvelope>>,
        router: Arc<ResponseRouter>,
        reject_kind: Option<&'static str>,
    }

    #[async_trait]
    impl ClusterTransport for ScriptedTransport {
        async fn send(&self, envelope: RepositoryEnvelope) -> Result<(), TransportError> {
            let kind = envelope.request.kind();
            let reply = match &envelope.request {
                _ if self.reject_kind == Some(kind) => Some(ResponseEnvelope::error(
                    envelope.request_id,
                    format!("{kind} rejected"),
                )),
                RepositoryRequest::Push(_) => Some(ResponseEnvelope::ok(
                    envelope.request_id,
                    RepositoryResponse::Commit(CommitResponsePayload {
                        version: None,
                        added: 1,
                        modified: 0,
                        removed: 0,
                    }),
                )),
                _ => None,
            };
            self.sent.lock().push(envelope);
            if let Some(reply) = reply {
                self.router.route(reply);
            }
            Ok(())
        }
    }

    fn setup(reject_kind: Option<&'static str>) -> (Arc<ScriptedTransport>, MessageDispatcher, RequestContext) {
        let config = VersionControlConfig::default();
        let registry = CorrelationRegistry::new(&config);
        let transport = Arc::new(ScriptedTransport {
            sent: Mutex::new(Vec::new()),
            router: Arc::new(ResponseRouter::new(Arc::clone(&registry))),
            reject_kind,
        });
        let dispatcher = MessageDispatcher::new(
            &config,
            registry,
            transport.clone(),
            Arc::new(MemorySettingsStore::new()),
        );
        let ctx = RequestContext::new(TenantId::new(), "tester", "tester@example.com");
        (transport, dispatcher, ctx)
    }

    fn session(ctx: &RequestContext) -> CommitSession {
        CommitSession::new(ctx, "main", "snap1", RepositorySettings::new("mem://repo", "main"))
    }

    fn document() -> EntityExportData {
        EntityExportData {
            entity_type: EntityType::Device,
            external_id: EntityId::random(EntityType::Device),
            name: "d1".to_string(),
            entity: json!({ "label": "a".repeat(100) }),
            relations: Vec::new(),
            attributes: Default::default(),
            credentials: None,
        }
    }

    #[tokio::test]
    async fn steps_are_enqueued_in_call_order_under_one_request_id() {
        let (transport, dispatcher, ctx) = setup(None);
        let mut session = session(&ctx);
        let request_id = session.request_id();

        session.prepare(&dispatcher).await.unwrap();
        session.delete_all(&dispatcher, "device").await.unwrap();
        session.add(&dispatcher, &document(), 40).await.unwrap();
        let commit = session.push(&dispatcher).await.unwrap();

        assert_eq!(commit.added, 1);
        assert_eq!(session.state(), SessionState::Done);

        let sent = transport.sent.lock();
        assert!(sent.iter().all(|e| e.request_id == request_id));
        assert!(matches!(sent[0].request, RepositoryRequest::PrepareCommit(_)));
        assert!(matches!(sent[1].request, RepositoryRequest::DeleteAll(_)));
        assert!(matches!(sent.last().unwrap().request, RepositoryRequest::Push(_)));
        let chunks = sent
            .iter()
            .filter(|e| matches!(e.request, RepositoryRequest::AddChunk(_)))
            .count();
        assert!(chunks > 1);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn add_before_prepare_is_rejected() {
        let (transport, dispatcher, ctx) = setup(None);
        let mut session = session(&ctx);
        let err = session.add(&dispatcher, &document(), 40).await.unwrap_err();
        assert!(matches!(
            err,
            VcError::InvalidTransition {
                from: SessionState::Created,
                to: SessionState::Adding
            }
        ));
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_push_fails_session() {
        let (_, dispatcher, ctx) = setup(Some("push"));
        let mut session = session(&ctx);
        session.prepare(&dispatcher).await.unwrap();
        let err = session.push(&dispatcher).await.unwrap_err();
        assert!(matches!(err, VcError::Remote(ref m) if m == "push rejected"));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.prepare(&dispatcher).await.is_err());
    }

    #[tokio::test]
    async fn earlier_step_failure_is_reported_by_next_step() {
        let (transport, dispatcher, ctx) = setup(Some("delete_all"));
        let mut session = session(&ctx);
        session.prepare(&dispatcher).await.unwrap();
        session.delete_all(&dispatcher, "device").await.unwrap();

        let err = session.add(&dispatcher, &document(), 40).await.unwrap_err();
        assert!(matches!(err, VcError::Remote(ref m) if m == "delete_all rejected"));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!transport
            .sent
            .lock()
            .iter()
            .any(|e| matches!(e.request, RepositoryRequest::AddChunk(_))));
    }

    #[tokio::test]
    async fn abort_sends_unregistered_message() {
        let (transport, dispatcher, ctx) = setup(None);
        let mut session = session(&ctx);
        session.prepare(&dispatcher).await.unwrap();
        session.abort(&dispatcher).await;

        assert_eq!(session.state(), SessionState::Failed);
        let sent = transport.sent.lock();
        let abort = sent.last().unwrap();
        assert!(matches!(abort.request, RepositoryRequest::AbortCommit(_)));
        assert_ne!(abort.request_id, session.request_id());
    }

    #[tokio::test]
    async fn abort_evicts_the_session_request() {
        let (_, dispatcher, ctx) = setup(None);
        let mut session = session(&ctx);
        session.prepare(&dispatcher).await.unwrap();
        session.add(&dispatcher, &document(), 40).await.unwrap();
        assert!(dispatcher.registry().contains(session.request_id()));

        session.abort(&dispatcher).await;

        assert!(dispatcher.registry().is_empty());
        assert!(dispatcher.registry().chunks().is_empty());
    }

    #[test]
    fn done_and_failed_are_terminal() {
        for terminal in [SessionState::Done, SessionState::Failed] {
            for to in [
                SessionState::Prepared,
                SessionState::Adding,
                SessionState::Deleting,
                SessionState::Pushing,
                SessionState::Done,
                SessionState::Failed,
            ] {
                assert!(!terminal.can_move_to(to));
            }
        }
    }
}
