//! In-memory repository worker.
//!
//! Models a per-tenant repository as branches of commits, each commit holding
//! a full snapshot of `relative path -> document`. At most one commit session
//! is pending per tenant; preparing a new one aborts the previous.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use entityvc_core::messages::{
    AddChunkPayload, CommitResponsePayload, EntitiesContentPayload, EntityContentChunk,
    EntityContentPayload, ListBranchesResponsePayload, ListEntitiesAtVersionPayload,
    ListEntitiesResponsePayload, ListVersionsPayload, PrepareCommitPayload, RepositoryEnvelope,
    RepositoryRequest, RepositoryResponse, ResponseEnvelope, VersionsDiffPayload,
    VersionsDiffResponsePayload,
};
use entityvc_core::types::type_path;
use entityvc_core::{
    BranchInfo, EntityId, EntityVersion, EntityVersionsDiff, PageData, RepositoryAuthMethod,
    RepositorySettings, SortDirection, TenantId, VersionedEntityInfo,
};
use tracing::{debug, trace};
use uuid::Uuid;

use super::RepositoryWorker;
use crate::config::VersionControlConfig;
use crate::rpc::chunks::split_chunks;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("repository settings are missing")]
    SettingsMissing,
    #[error("repository URI is empty")]
    EmptyUri,
    #[error("private key is required for key authentication")]
    MissingPrivateKey,
    #[error("repository is read-only")]
    ReadOnly,
    #[error("version {0} not found")]
    VersionNotFound(String),
    #[error("file {0} not found")]
    FileNotFound(String),
    #[error("chunk {chunk_index} out of range for {chunks_count} chunks")]
    ChunkOutOfRange { chunk_index: u32, chunks_count: u32 },
}

// ---------------------------------------------------------------------------
// Repository model
// ---------------------------------------------------------------------------

type Snapshot = Arc<BTreeMap<String, String>>;

#[derive(Debug, Clone)]
struct Commit {
    version: EntityVersion,
    files: Snapshot,
    changed: BTreeSet<String>,
}

#[derive(Debug)]
struct PendingCommit {
    tx_id: Uuid,
    branch: String,
    message: String,
    author: String,
    base: Snapshot,
    files: BTreeMap<String, String>,
    /// Paths written by this commit; `DeleteAll` never removes them, so
    /// steps of one session may arrive in any order.
    staged: BTreeSet<String>,
    chunks: HashMap<Uuid, Vec<Option<String>>>,
}

#[derive(Debug, Default)]
struct TenantRepository {
    /// `None` until initialised and after the local copy is cleared.
    settings: Option<RepositorySettings>,
    /// Commits per branch, oldest first.
    branches: BTreeMap<String, Vec<Commit>>,
    pending: Option<PendingCommit>,
}

impl TenantRepository {
    fn head(&self, branch: &str) -> Option<&Commit> {
        self.branches.get(branch).and_then(|commits| commits.last())
    }

    fn find_commit(&self, version_id: &str) -> Result<&Commit, WorkerError> {
        self.branches
            .values()
            .flatten()
            .find(|commit| commit.version.id == version_id)
            .ok_or_else(|| WorkerError::VersionNotFound(version_id.to_string()))
    }

    fn default_branch(&self) -> Option<&str> {
        self.settings.as_ref().map(|s| s.default_branch.as_str())
    }
}

// ---------------------------------------------------------------------------
// MemoryRepositoryWorker
// ---------------------------------------------------------------------------

pub struct MemoryRepositoryWorker {
    chunk_size: usize,
    repositories: DashMap<TenantId, TenantRepository>,
}

impl MemoryRepositoryWorker {
    #[must_use]
    pub fn new(config: &VersionControlConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_chars,
            repositories: DashMap::new(),
        }
    }

    /// Number of versions committed to `branch` of `tenant_id`.
    #[must_use]
    pub fn version_count(&self, tenant_id: TenantId, branch: &str) -> usize {
        self.repositories
            .get(&tenant_id)
            .and_then(|repo| repo.branches.get(branch).map(Vec::len))
            .unwrap_or(0)
    }

    /// Whether `tenant_id` has an open commit session.
    #[must_use]
    pub fn has_pending_commit(&self, tenant_id: TenantId) -> bool {
        self.repositories
            .get(&tenant_id)
            .is_some_and(|repo| repo.pending.is_some())
    }

    fn process(&self, envelope: RepositoryEnvelope) -> Result<Vec<ResponseEnvelope>, WorkerError> {
        let RepositoryEnvelope {
            tenant_id,
            request_id,
            request,
            settings,
            ..
        } = envelope;
        let ok = |response: RepositoryResponse| -> Result<Vec<ResponseEnvelope>, WorkerError> {
            Ok(vec![ResponseEnvelope::ok(request_id, response)])
        };

        match request {
            RepositoryRequest::ClearRepository => {
                if let Some(mut repo) = self.repositories.get_mut(&tenant_id) {
                    repo.settings = None;
                    repo.pending = None;
                }
                return ok(RepositoryResponse::Generic);
            }
            RepositoryRequest::TestRepository => {
                validate(settings.as_ref().ok_or(WorkerError::SettingsMissing)?)?;
                return ok(RepositoryResponse::Generic);
            }
            RepositoryRequest::InitRepository => {
                let settings = settings.ok_or(WorkerError::SettingsMissing)?;
                validate(&settings)?;
                let mut repo = self.repositories.entry(tenant_id).or_default();
                repo.branches.entry(settings.default_branch.clone()).or_default();
                repo.settings = Some(settings);
                return ok(RepositoryResponse::Generic);
            }
            _ => {}
        }

        let settings = settings.ok_or(WorkerError::SettingsMissing)?;
        let mut repo = self.repositories.entry(tenant_id).or_default();
        if repo.settings.as_ref() != Some(&settings) {
            validate(&settings)?;
            debug!(%tenant_id, "re-initialising repository with new settings");
            repo.branches.entry(settings.default_branch.clone()).or_default();
            repo.settings = Some(settings);
        }

        match request {
            RepositoryRequest::PrepareCommit(payload) => {
                prepare_commit(&mut repo, payload);
                Ok(Vec::new())
            }
            RepositoryRequest::AddChunk(payload) => {
                add_chunk(&mut repo, payload)?;
                Ok(Vec::new())
            }
            RepositoryRequest::DeleteAll(payload) => {
                if let Some(pending) = repo.pending.as_mut().filter(|p| p.tx_id == payload.tx_id) {
                    let prefix = format!("{}/", payload.relative_path);
                    let staged = &pending.staged;
                    pending
                        .files
                        .retain(|path, _| !path.starts_with(&prefix) || staged.contains(path));
                } else {
                    trace!(tx_id = %payload.tx_id, "ignoring delete for stale commit");
                }
                Ok(Vec::new())
            }
            RepositoryRequest::Push(payload) => match push(&mut repo, payload.tx_id)? {
                Some(commit) => ok(RepositoryResponse::Commit(commit)),
                None => {
                    trace!(tx_id = %payload.tx_id, "ignoring push for stale commit");
                    Ok(Vec::new())
                }
            },
            RepositoryRequest::AbortCommit(payload) => {
                if repo.pending.as_ref().is_some_and(|p| p.tx_id == payload.tx_id) {
                    repo.pending = None;
                }
                Ok(Vec::new())
            }
            RepositoryRequest::ListBranches => {
                let default = repo.default_branch().unwrap_or_default().to_string();
                let branches = repo
                    .branches
                    .keys()
                    .map(|name| BranchInfo {
                        name: name.clone(),
                        is_default: *name == default,
                    })
                    .collect();
                ok(RepositoryResponse::ListBranches(ListBranchesResponsePayload { branches }))
            }
            RepositoryRequest::ListVersions(payload) => {
                ok(RepositoryResponse::ListVersions(list_versions(&repo, &payload)))
            }
            RepositoryRequest::ListEntitiesAtVersion(payload) => {
                let entities = list_entities(&repo, &payload)?;
                ok(RepositoryResponse::ListEntities(ListEntitiesResponsePayload { entities }))
            }
            RepositoryRequest::GetEntityContent(payload) => {
                Ok(self.entity_content(&repo, request_id, &payload)?)
            }
            RepositoryRequest::GetEntitiesContent(payload) => {
                Ok(self.entities_content(&repo, request_id, &payload)?)
            }
            RepositoryRequest::VersionsDiff(payload) => {
                let diffs = versions_diff(&repo, &payload)?;
                ok(RepositoryResponse::VersionsDiff(VersionsDiffResponsePayload { diffs }))
            }
            RepositoryRequest::ClearRepository
            | RepositoryRequest::TestRepository
            | RepositoryRequest::InitRepository => Ok(Vec::new()),
        }
    }

    fn entity_content(
        &self,
        repo: &TenantRepository,
        request_id: Uuid,
        payload: &EntityContentPayload,
    ) -> Result<Vec<ResponseEnvelope>, WorkerError> {
        let commit = repo.find_commit(&payload.version_id)?;
        let path = payload.external_id.relative_path();
        let data = commit
            .files
            .get(&path)
            .ok_or(WorkerError::FileNotFound(path))?;
        Ok(self
            .chunk_item(data, 0, 1)
            .into_iter()
            .map(|chunk| ResponseEnvelope::ok(request_id, RepositoryResponse::EntityContent(chunk)))
            .collect())
    }

    fn entities_content(
        &self,
        repo: &TenantRepository,
        request_id: Uuid,
        payload: &EntitiesContentPayload,
    ) -> Result<Vec<ResponseEnvelope>, WorkerError> {
        let commit = repo.find_commit(&payload.version_id)?;
        let prefix = format!("{}/", type_path(payload.entity_type));
        let items: Vec<&String> = commit
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .skip(payload.offset as usize)
            .take(payload.limit as usize)
            .map(|(_, data)| data)
            .collect();

        if items.is_empty() {
            return Ok(vec![ResponseEnvelope::ok(
                request_id,
                RepositoryResponse::EntitiesContent(EntityContentChunk::empty()),
            )]);
        }

        #[allow(clippy::cast_possible_truncation)]
        let items_count = items.len() as u32;
        let mut replies = Vec::new();
        for (item_index, data) in (0u32..).zip(items) {
            replies.extend(self.chunk_item(data, item_index, items_count).into_iter().map(
                |chunk| ResponseEnvelope::ok(request_id, RepositoryResponse::EntitiesContent(chunk)),
            ));
        }
        Ok(replies)
    }

    fn chunk_item(&self, data: &str, item_index: u32, items_count: u32) -> Vec<EntityContentChunk> {
        let chunked_group_id = Uuid::new_v4();
        let parts = split_chunks(data, self.chunk_size);
        #[allow(clippy::cast_possible_truncation)]
        let chunks_count = parts.len() as u32;
        (0u32..)
            .zip(parts)
            .map(|(chunk_index, data)| EntityContentChunk {
                chunked_group_id,
                item_index,
                items_count,
                chunk_index,
                chunks_count,
                data,
            })
            .collect()
    }
}

#[async_trait]
impl RepositoryWorker for MemoryRepositoryWorker {
    async fn handle(&self, envelope: RepositoryEnvelope) -> Vec<ResponseEnvelope> {
        let request_id = envelope.request_id;
        let kind = envelope.request.kind();
        trace!(%request_id, tenant_id = %envelope.tenant_id, kind, "handling repository request");
        self.process(envelope).unwrap_or_else(|error| {
            debug!(%request_id, kind, %error, "repository request failed");
            vec![ResponseEnvelope::error(request_id, error.to_string())]
        })
    }
}

// ---------------------------------------------------------------------------
// Request handlers
// ---------------------------------------------------------------------------

fn validate(settings: &RepositorySettings) -> Result<(), WorkerError> {
    if settings.repository_uri.trim().is_empty() {
        return Err(WorkerError::EmptyUri);
    }
    if settings.auth_method == RepositoryAuthMethod::PrivateKey && settings.private_key.is_none() {
        return Err(WorkerError::MissingPrivateKey);
    }
    Ok(())
}

fn prepare_commit(repo: &mut TenantRepository, payload: PrepareCommitPayload) {
    if let Some(old) = repo.pending.take() {
        debug!(tx_id = %old.tx_id, "aborting previous pending commit");
    }
    let base = repo
        .head(&payload.branch)
        .or_else(|| repo.default_branch().and_then(|default| repo.head(default)))
        .map(|commit| Arc::clone(&commit.files))
        .unwrap_or_default();
    repo.pending = Some(PendingCommit {
        tx_id: payload.tx_id,
        branch: payload.branch,
        message: payload.message,
        author: payload.author_name,
        files: (*base).clone(),
        base,
        staged: BTreeSet::new(),
        chunks: HashMap::new(),
    });
}

fn add_chunk(repo: &mut TenantRepository, payload: AddChunkPayload) -> Result<(), WorkerError> {
    let Some(pending) = repo.pending.as_mut().filter(|p| p.tx_id == payload.tx_id) else {
        trace!(tx_id = %payload.tx_id, "ignoring chunk for stale commit");
        return Ok(());
    };
    if payload.chunk_index >= payload.chunks_count {
        repo.pending = None;
        return Err(WorkerError::ChunkOutOfRange {
            chunk_index: payload.chunk_index,
            chunks_count: payload.chunks_count,
        });
    }

    let slots = pending
        .chunks
        .entry(payload.chunked_group_id)
        .or_insert_with(|| vec![None; payload.chunks_count as usize]);
    if let Some(slot) = slots.get_mut(payload.chunk_index as usize) {
        *slot = Some(payload.json_chunk);
    }
    if slots.iter().all(Option::is_some) {
        let document: String = slots.iter().flatten().map(String::as_str).collect();
        pending.chunks.remove(&payload.chunked_group_id);
        pending.staged.insert(payload.relative_path.clone());
        pending.files.insert(payload.relative_path, document);
    }
    Ok(())
}

fn push(repo: &mut TenantRepository, tx_id: Uuid) -> Result<Option<CommitResponsePayload>, WorkerError> {
    if !repo.pending.as_ref().is_some_and(|p| p.tx_id == tx_id) {
        return Ok(None);
    }
    if repo.settings.as_ref().is_some_and(|s| s.read_only) {
        repo.pending = None;
        return Err(WorkerError::ReadOnly);
    }
    let Some(pending) = repo.pending.take() else {
        return Ok(None);
    };

    let mut changed = BTreeSet::new();
    let (mut added, mut modified, mut removed) = (0u32, 0u32, 0u32);
    for (path, data) in &pending.files {
        match pending.base.get(path) {
            None => added += 1,
            Some(old) if old != data => modified += 1,
            Some(_) => continue,
        }
        changed.insert(path.clone());
    }
    for path in pending.base.keys() {
        if !pending.files.contains_key(path) {
            removed += 1;
            changed.insert(path.clone());
        }
    }

    let branch = repo.branches.entry(pending.branch).or_default();
    let version = if changed.is_empty() {
        None
    } else {
        let version = EntityVersion {
            timestamp: now_millis(),
            id: Uuid::new_v4().simple().to_string(),
            name: pending.message,
            author: pending.author,
        };
        branch.push(Commit {
            version: version.clone(),
            files: Arc::new(pending.files),
            changed,
        });
        Some(version)
    };

    Ok(Some(CommitResponsePayload {
        version,
        added,
        modified,
        removed,
    }))
}

fn list_versions(repo: &TenantRepository, payload: &ListVersionsPayload) -> PageData<EntityVersion> {
    let Some(commits) = repo.branches.get(&payload.branch) else {
        return PageData::empty();
    };
    let prefix = match (payload.entity_id, payload.entity_type) {
        (Some(entity_id), _) => Some(entity_id.relative_path()),
        (None, Some(entity_type)) => Some(format!("{}/", type_path(entity_type))),
        (None, None) => None,
    };
    let search = payload
        .page_link
        .text_search
        .as_deref()
        .map(str::to_lowercase)
        .filter(|s| !s.is_empty());

    let mut versions: Vec<EntityVersion> = commits
        .iter()
        .filter(|commit| {
            prefix
                .as_deref()
                .is_none_or(|prefix| commit.changed.iter().any(|path| path.starts_with(prefix)))
        })
        .filter(|commit| {
            search
                .as_deref()
                .is_none_or(|search| commit.version.name.to_lowercase().contains(search))
        })
        .map(|commit| commit.version.clone())
        .collect();

    let ascending = payload
        .page_link
        .sort
        .as_ref()
        .is_some_and(|sort| sort.direction == SortDirection::Asc);
    if !ascending {
        versions.reverse();
    }
    PageData::from_slice(versions, &payload.page_link)
}

fn list_entities(
    repo: &TenantRepository,
    payload: &ListEntitiesAtVersionPayload,
) -> Result<Vec<VersionedEntityInfo>, WorkerError> {
    let commit = repo.find_commit(&payload.version_id)?;
    let prefix = payload
        .entity_type
        .map(|entity_type| format!("{}/", type_path(entity_type)))
        .unwrap_or_default();
    Ok(commit
        .files
        .keys()
        .filter(|path| path.starts_with(&prefix))
        .filter_map(|path| EntityId::from_relative_path(path))
        .map(|external_id| VersionedEntityInfo { external_id })
        .collect())
}

fn versions_diff(
    repo: &TenantRepository,
    payload: &VersionsDiffPayload,
) -> Result<Vec<EntityVersionsDiff>, WorkerError> {
    let first = repo.find_commit(&payload.version_id1)?;
    let second = repo.find_commit(&payload.version_id2)?;
    let paths: BTreeSet<&String> = first
        .files
        .keys()
        .chain(second.files.keys())
        .filter(|path| path.starts_with(&payload.path))
        .collect();

    Ok(paths
        .into_iter()
        .filter_map(|path| {
            let before = first.files.get(path).map_or("", String::as_str);
            let after = second.files.get(path).map_or("", String::as_str);
            if before == after {
                return None;
            }
            Some(EntityVersionsDiff {
                external_id: EntityId::from_relative_path(path)?,
                entity_data_at_version1: before.to_string(),
                entity_data_at_version2: after.to_string(),
                raw_diff: raw_diff(path, before, after),
            })
        })
        .collect())
}

/// Whole-file diff in unified style.
fn raw_diff(path: &str, before: &str, after: &str) -> String {
    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    for line in before.lines() {
        out.push('-');
        out.push_str(line);
        out.push('\n');
    }
    for line in after.lines() {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use entityvc_core::messages::{CommitTxPayload, DeleteAllPayload};
    use entityvc_core::{EntityType, PageLink};

    use super::*;

    struct Harness {
        worker: MemoryRepositoryWorker,
        tenant: TenantId,
        settings: RepositorySettings,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                worker: MemoryRepositoryWorker::new(&VersionControlConfig {
                    chunk_size_chars: 8,
                    ..VersionControlConfig::default()
                }),
                tenant: TenantId::new(),
                settings: RepositorySettings::new("mem://repo", "main"),
            }
        }

        async fn send(&self, request_id: Uuid, request: RepositoryRequest) -> Vec<ResponseEnvelope> {
            self.worker
                .handle(RepositoryEnvelope {
                    sender_node_id: "node".to_string(),
                    tenant_id: self.tenant,
                    request_id,
                    request,
                    settings: Some(self.settings.clone()),
                })
                .await
        }

        /// Commits `files` as a full session and returns the push reply.
        async fn commit(&self, files: &[(&String, &str)], delete: Option<&str>) -> CommitResponsePayload {
            let request_id = Uuid::new_v4();
            let tx_id = Uuid::new_v4();
            let prepare = RepositoryRequest::PrepareCommit(PrepareCommitPayload {
                tx_id,
                branch: "main".to_string(),
                message: format!("commit {}", files.len()),
                author_name: "tester".to_string(),
                author_email: "tester@example.com".to_string(),
            });
            assert!(self.send(request_id, prepare).await.is_empty());
            if let Some(path) = delete {
                let delete = RepositoryRequest::DeleteAll(DeleteAllPayload {
                    tx_id,
                    relative_path: path.to_string(),
                });
                assert!(self.send(request_id, delete).await.is_empty());
            }
            for (path, data) in files {
                let chunks = split_chunks(data, 4);
                let chunks_count = u32::try_from(chunks.len()).unwrap();
                let chunked_group_id = Uuid::new_v4();
                let indexed: Vec<(u32, String)> = (0u32..).zip(chunks).collect();
                for (chunk_index, json_chunk) in indexed.into_iter().rev() {
                    let add = RepositoryRequest::AddChunk(AddChunkPayload {
                        tx_id,
                        relative_path: (*path).clone(),
                        chunked_group_id,
                        chunk_index,
                        chunks_count,
                        json_chunk,
                    });
                    assert!(self.send(request_id, add).await.is_empty());
                }
            }
            let replies = self
                .send(request_id, RepositoryRequest::Push(CommitTxPayload { tx_id }))
                .await;
            match &replies[..] {
                [ResponseEnvelope {
                    response: Some(RepositoryResponse::Commit(commit)),
                    ..
                }] => commit.clone(),
                other => panic!("unexpected push replies {other:?}"),
            }
        }
    }

    impl MemoryRepositoryWorker {
        fn head_files(&self, tenant_id: TenantId, branch: &str) -> BTreeMap<String, String> {
            self.repositories
                .get(&tenant_id)
                .and_then(|repo| repo.head(branch).map(|commit| (*commit.files).clone()))
                .unwrap_or_default()
        }
    }

    fn add_steps(tx_id: Uuid, path: &str, data: &str) -> Vec<RepositoryRequest> {
        let chunks = split_chunks(data, 4);
        let chunks_count = u32::try_from(chunks.len()).unwrap();
        let chunked_group_id = Uuid::new_v4();
        (0u32..)
            .zip(chunks)
            .map(|(chunk_index, json_chunk)| {
                RepositoryRequest::AddChunk(AddChunkPayload {
                    tx_id,
                    relative_path: path.to_string(),
                    chunked_group_id,
                    chunk_index,
                    chunks_count,
                    json_chunk,
                })
            })
            .collect()
    }

    /// Replays one session's steps in `order` between prepare and push.
    async fn commit_in_order(
        h: &Harness,
        tx_id: Uuid,
        steps: &[RepositoryRequest],
        order: &[usize],
    ) -> CommitResponsePayload {
        let request_id = Uuid::new_v4();
        h.send(
            request_id,
            RepositoryRequest::PrepareCommit(PrepareCommitPayload {
                tx_id,
                branch: "main".to_string(),
                message: "reordered".to_string(),
                author_name: "tester".to_string(),
                author_email: "tester@example.com".to_string(),
            }),
        )
        .await;
        for index in order {
            assert!(h.send(request_id, steps[*index].clone()).await.is_empty());
        }
        match &h
            .send(request_id, RepositoryRequest::Push(CommitTxPayload { tx_id }))
            .await[..]
        {
            [ResponseEnvelope {
                response: Some(RepositoryResponse::Commit(commit)),
                ..
            }] => commit.clone(),
            other => panic!("unexpected push replies {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_steps_commit_the_same_content_in_any_arrival_order() {
        let (kept, dropped, fresh) = (device_path(), device_path(), device_path());
        let tag = EntityId::random(EntityType::Tag).relative_path();
        let tx_id = Uuid::new_v4();

        let mut steps = vec![RepositoryRequest::DeleteAll(DeleteAllPayload {
            tx_id,
            relative_path: "device".to_string(),
        })];
        steps.extend(add_steps(tx_id, &kept, "{\"v\":2,\"name\":\"kept\"}"));
        steps.extend(add_steps(tx_id, &fresh, "{\"name\":\"fresh\"}"));
        steps.extend(add_steps(tx_id, &tag, "{\"name\":\"tag\"}"));

        let forward: Vec<usize> = (0..steps.len()).collect();
        let reversed: Vec<usize> = forward.iter().rev().copied().collect();
        let delete_in_middle: Vec<usize> = (1..steps.len())
            .take(steps.len() / 2)
            .chain([0])
            .chain((1..steps.len()).skip(steps.len() / 2))
            .collect();

        let mut outcomes = Vec::new();
        for order in [forward, reversed, delete_in_middle] {
            let h = Harness::new();
            h.commit(&[(&kept, "{\"v\":1}"), (&dropped, "{\"v\":1}")], None)
                .await;
            let commit = commit_in_order(&h, tx_id, &steps, &order).await;
            outcomes.push((
                (commit.added, commit.modified, commit.removed),
                h.worker.head_files(h.tenant, "main"),
            ));
        }

        let (counts, files) = &outcomes[0];
        assert_eq!(*counts, (2, 1, 1));
        assert_eq!(
            files.keys().collect::<BTreeSet<_>>(),
            [&kept, &fresh, &tag].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(outcomes.iter().all(|outcome| outcome == &outcomes[0]));
    }

    fn device_path() -> String {
        EntityId::random(EntityType::Device).relative_path()
    }

    #[tokio::test]
    async fn push_counts_added_modified_removed() {
        let h = Harness::new();
        let (a, b) = (device_path(), device_path());

        let first = h.commit(&[(&a, "{\"v\":1}"), (&b, "{\"v\":1}")], None).await;
        assert_eq!((first.added, first.modified, first.removed), (2, 0, 0));
        assert!(first.version.is_some());

        let second = h.commit(&[(&a, "{\"v\":2}")], Some("device")).await;
        assert_eq!((second.added, second.modified, second.removed), (0, 1, 1));
        assert_eq!(h.worker.version_count(h.tenant, "main"), 2);
    }

    #[tokio::test]
    async fn unchanged_commit_has_no_version() {
        let h = Harness::new();
        let a = device_path();
        h.commit(&[(&a, "same")], None).await;
        let again = h.commit(&[(&a, "same")], None).await;
        assert_eq!(again.version, None);
        assert_eq!((again.added, again.modified, again.removed), (0, 0, 0));
        assert_eq!(h.worker.version_count(h.tenant, "main"), 1);
    }

    #[tokio::test]
    async fn new_prepare_aborts_previous_session() {
        let h = Harness::new();
        let request_id = Uuid::new_v4();
        let stale = Uuid::new_v4();
        for tx_id in [stale, Uuid::new_v4()] {
            h.send(
                request_id,
                RepositoryRequest::PrepareCommit(PrepareCommitPayload {
                    tx_id,
                    branch: "main".to_string(),
                    message: "m".to_string(),
                    author_name: "a".to_string(),
                    author_email: "a@example.com".to_string(),
                }),
            )
            .await;
        }
        let replies = h
            .send(request_id, RepositoryRequest::Push(CommitTxPayload { tx_id: stale }))
            .await;
        assert!(replies.is_empty());
        assert!(h.worker.has_pending_commit(h.tenant));
    }

    #[tokio::test]
    async fn missing_settings_reply_with_error() {
        let h = Harness::new();
        let request_id = Uuid::new_v4();
        let replies = h
            .worker
            .handle(RepositoryEnvelope {
                sender_node_id: "node".to_string(),
                tenant_id: h.tenant,
                request_id,
                request: RepositoryRequest::ListBranches,
                settings: None,
            })
            .await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].error.as_deref(), Some("repository settings are missing"));
    }

    #[tokio::test]
    async fn entities_content_is_chunked_per_item() {
        let h = Harness::new();
        let (a, b) = (device_path(), device_path());
        let commit = h
            .commit(&[(&a, "0123456789abcdef"), (&b, "xyz")], None)
            .await;
        let version_id = commit.version.unwrap().id;

        let replies = h
            .send(
                Uuid::new_v4(),
                RepositoryRequest::GetEntitiesContent(EntitiesContentPayload {
                    version_id: version_id.clone(),
                    entity_type: EntityType::Device,
                    offset: 0,
                    limit: 10,
                }),
            )
            .await;
        let chunks: Vec<EntityContentChunk> = replies
            .into_iter()
            .filter_map(|r| match r.response {
                Some(RepositoryResponse::EntitiesContent(chunk)) => Some(chunk),
                _ => None,
            })
            .collect();
        // chunk size 8: 16 chars -> 2 chunks, 3 chars -> 1 chunk
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.items_count == 2));

        let empty = h
            .send(
                Uuid::new_v4(),
                RepositoryRequest::GetEntitiesContent(EntitiesContentPayload {
                    version_id,
                    entity_type: EntityType::Asset,
                    offset: 0,
                    limit: 10,
                }),
            )
            .await;
        match &empty[..] {
            [ResponseEnvelope {
                response: Some(RepositoryResponse::EntitiesContent(chunk)),
                ..
            }] => assert_eq!(chunk.items_count, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_versions_filters_and_pages_newest_first() {
        let h = Harness::new();
        let a = device_path();
        let asset = EntityId::random(EntityType::Asset).relative_path();
        h.commit(&[(&a, "1")], None).await;
        h.commit(&[(&a, "1"), (&asset, "1")], None).await;
        h.commit(&[(&a, "2"), (&asset, "1")], None).await;

        let list = |entity_type: Option<EntityType>| {
            RepositoryRequest::ListVersions(ListVersionsPayload {
                branch: "main".to_string(),
                entity_type,
                entity_id: None,
                page_link: PageLink::new(0, 10),
            })
        };
        let all = h.send(Uuid::new_v4(), list(None)).await;
        let Some(RepositoryResponse::ListVersions(page)) = &all[0].response else {
            panic!("unexpected {all:?}");
        };
        assert_eq!(page.total_elements, 3);
        assert!(page.data[0].timestamp >= page.data[2].timestamp);

        let assets = h.send(Uuid::new_v4(), list(Some(EntityType::Asset))).await;
        let Some(RepositoryResponse::ListVersions(page)) = &assets[0].response else {
            panic!("unexpected {assets:?}");
        };
        assert_eq!(page.total_elements, 1);
    }

    #[tokio::test]
    async fn unknown_version_is_an_error() {
        let h = Harness::new();
        let replies = h
            .send(
                Uuid::new_v4(),
                RepositoryRequest::ListEntitiesAtVersion(ListEntitiesAtVersionPayload {
                    version_id: "nope".to_string(),
                    entity_type: None,
                }),
            )
            .await;
        assert_eq!(replies[0].error.as_deref(), Some("version nope not found"));
    }

    #[tokio::test]
    async fn diff_reports_changed_entities_only() {
        let h = Harness::new();
        let (a, b) = (device_path(), device_path());
        let v1 = h.commit(&[(&a, "1"), (&b, "1")], None).await.version.unwrap();
        let v2 = h.commit(&[(&a, "2"), (&b, "1")], None).await.version.unwrap();

        let replies = h
            .send(
                Uuid::new_v4(),
                RepositoryRequest::VersionsDiff(VersionsDiffPayload {
                    path: String::new(),
                    version_id1: v1.id,
                    version_id2: v2.id,
                }),
            )
            .await;
        let Some(RepositoryResponse::VersionsDiff(payload)) = &replies[0].response else {
            panic!("unexpected {replies:?}");
        };
        assert_eq!(payload.diffs.len(), 1);
        assert_eq!(payload.diffs[0].external_id.relative_path(), a);
        assert!(payload.diffs[0].raw_diff.contains("-1\n+2"));
    }
}
