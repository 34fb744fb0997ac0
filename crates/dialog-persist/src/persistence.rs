// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Directory layout, metadata, and the auxiliary-artifact protocols:
//! dialog metadata, the response-queue take/commit/rollback protocol,
//! status transitions, and enumeration.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dialog_model::{
    DialogId, HumanQuestion, Latest, PendingSubdialog, SpawnInfo, SubdialogResponse,
};
use dialog_sync::FifoMutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::atomic_file;
use crate::writeback::{StageDecision, WriteBackBuffer, WriteBackSink};

pub const DIALOG_META_FILE: &str = "dialog.yaml";
pub const LATEST_FILE: &str = "latest.yaml";
pub const REMINDERS_FILE: &str = "reminders.json";
pub const Q4H_FILE: &str = "q4h.yaml";
pub const REGISTRY_FILE: &str = "registry.yaml";
pub const PENDING_SUBDIALOGS_FILE: &str = "pending-subdialogs.json";
pub const RESPONSES_FILE: &str = "subdialog-responses.json";
pub const RESPONSES_INFLIGHT_FILE: &str = "subdialog-responses.processing.json";
pub const SUBDIALOGS_DIR: &str = "subdialogs";

#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("duplicate q4h id: {0}")]
    DuplicateQ4hId(String),
    #[error("duplicate q4h callId: {0}")]
    DuplicateQ4hCallId(String),
    #[error("dialog already has a pending human question")]
    MultiplePendingQuestions,
    #[error("registry entry mismatch for agent {agent_id} slug {slug}")]
    RegistryMismatch { agent_id: String, slug: String },
    #[error("non-root dialog id passed to a root-only operation: {0}")]
    NotRoot(DialogId),
}

/// Root (or subdialog) metadata, `dialog.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogMetadata {
    pub id: DialogId,
    pub agent_id: String,
    pub task_document_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    /// Only meaningful on the root: if true, diligence auto-continue never
    /// fires for this tree.
    #[serde(default)]
    pub disable_diligence_push: bool,
    /// A transient override that suppresses diligence for the current
    /// course without permanently disabling it.
    #[serde(default)]
    pub suppress_diligence_push: bool,
    /// `None` for a root dialog; `Some(parent_self_id)` for a subdialog.
    pub parent_self_id: Option<String>,
    /// `None` for a root dialog; `Some(spawn)` for a subdialog, recording
    /// the call that created it so `tellaskBack` can reply without the
    /// parent's transcript.
    #[serde(default)]
    pub spawn: Option<SpawnInfo>,
}

/// The `(agentId, sessionSlug) -> subdialogId` registry for type-B calls,
/// `registry.yaml`, held at the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubdialogRegistry {
    entries: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub agent_id: String,
    pub session_slug: String,
    pub subdialog_id: String,
}

impl SubdialogRegistry {
    pub fn lookup(&self, agent_id: &str, session_slug: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.agent_id == agent_id && e.session_slug == session_slug)
            .map(|e| e.subdialog_id.as_str())
    }

    pub fn insert(&mut self, agent_id: String, session_slug: String, subdialog_id: String) {
        self.entries.retain(|e| !(e.agent_id == agent_id && e.session_slug == session_slug));
        self.entries.push(RegistryEntry {
            agent_id,
            session_slug,
            subdialog_id,
        });
    }

    pub fn remove(&mut self, agent_id: &str, session_slug: &str) {
        self.entries
            .retain(|e| !(e.agent_id == agent_id && e.session_slug == session_slug));
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }
}

struct YamlSink<V>(PhantomData<V>);

impl<V> YamlSink<V> {
    fn new() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<V> WriteBackSink<V> for YamlSink<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Option<V>> {
        match tokio::fs::read(key).await {
            Ok(bytes) => Ok(Some(serde_yaml::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, value: &V) -> anyhow::Result<()> {
        let text = serde_yaml::to_string(value)?;
        atomic_file::write(Path::new(key), text.as_bytes()).await?;
        Ok(())
    }
}

struct JsonSink<V>(PhantomData<V>);

impl<V> JsonSink<V> {
    fn new() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<V> WriteBackSink<V> for JsonSink<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Option<V>> {
        match tokio::fs::read(key).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, value: &V) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(value)?;
        atomic_file::write(Path::new(key), text.as_bytes()).await?;
        Ok(())
    }
}

async fn read_json_list<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_json_list<T: Serialize>(path: &Path, list: &[T]) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(list)?;
    atomic_file::write(path, text.as_bytes()).await?;
    Ok(())
}

/// Directory layout and auxiliary-artifact protocols for dialog state.
pub struct DialogPersistence {
    latest: Arc<WriteBackBuffer<Latest, YamlSink<Latest>>>,
    q4h: Arc<WriteBackBuffer<Vec<HumanQuestion>, YamlSink<Vec<HumanQuestion>>>>,
    pending: Arc<WriteBackBuffer<Vec<PendingSubdialog>, JsonSink<Vec<PendingSubdialog>>>>,
    file_locks: FifoMutex<String>,
}

impl Default for DialogPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogPersistence {
    pub fn new() -> Self {
        Self {
            latest: WriteBackBuffer::new(Arc::new(YamlSink::new())),
            q4h: WriteBackBuffer::new(Arc::new(YamlSink::new())),
            pending: WriteBackBuffer::new(Arc::new(JsonSink::new())),
            file_locks: FifoMutex::new(),
        }
    }

    // ── paths ────────────────────────────────────────────────────────────

    pub fn metadata_path(dir: &Path) -> PathBuf {
        dir.join(DIALOG_META_FILE)
    }

    pub fn latest_path(dir: &Path) -> PathBuf {
        dir.join(LATEST_FILE)
    }

    pub fn reminders_path(dir: &Path) -> PathBuf {
        dir.join(REMINDERS_FILE)
    }

    pub fn q4h_path(dir: &Path) -> PathBuf {
        dir.join(Q4H_FILE)
    }

    pub fn registry_path(root_dir: &Path) -> PathBuf {
        root_dir.join(REGISTRY_FILE)
    }

    pub fn pending_path(dir: &Path) -> PathBuf {
        dir.join(PENDING_SUBDIALOGS_FILE)
    }

    pub fn responses_path(dir: &Path) -> PathBuf {
        dir.join(RESPONSES_FILE)
    }

    pub fn responses_inflight_path(dir: &Path) -> PathBuf {
        dir.join(RESPONSES_INFLIGHT_FILE)
    }

    pub fn subdialog_dir(parent_dir: &Path, child_self_id: &str) -> PathBuf {
        parent_dir.join(SUBDIALOGS_DIR).join(child_self_id)
    }

    // ── metadata ─────────────────────────────────────────────────────────

    pub async fn write_metadata(&self, dir: &Path, meta: &DialogMetadata) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let text = serde_yaml::to_string(meta)?;
        atomic_file::write(&Self::metadata_path(dir), text.as_bytes()).await?;
        Ok(())
    }

    pub async fn read_metadata(&self, dir: &Path) -> anyhow::Result<Option<DialogMetadata>> {
        match tokio::fs::read(Self::metadata_path(dir)).await {
            Ok(bytes) => Ok(Some(serde_yaml::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── Latest (coalesced write-back) ───────────────────────────────────

    pub async fn read_latest(&self, dir: &Path) -> anyhow::Result<Option<Latest>> {
        let key = Self::latest_path(dir);
        self.latest.current(&key.to_string_lossy()).await
    }

    /// Apply a `Latest` write. Invariant 6 (course never regresses, always
    /// refreshes `last_modified`) is enforced in [`Latest::apply`].
    pub async fn write_latest(&self, dir: &Path, new_value: Latest) -> anyhow::Result<()> {
        let key = Self::latest_path(dir).to_string_lossy().into_owned();
        self.latest
            .mutate(key, move |current| {
                let merged = match current {
                    Some(mut existing) => {
                        existing.apply(new_value);
                        existing
                    }
                    None => new_value,
                };
                Ok(StageDecision::Replace(merged))
            })
            .await
    }

    pub async fn drain_latest(&self) {
        self.latest.drain().await
    }

    // ── Q4H (coalesced write-back, duplicate-checked) ───────────────────

    pub async fn load_q4h(&self, dir: &Path) -> anyhow::Result<Vec<HumanQuestion>> {
        let key = Self::q4h_path(dir);
        Ok(self.q4h.current(&key.to_string_lossy()).await?.unwrap_or_default())
    }

    pub async fn append_human_question(
        &self,
        dir: &Path,
        question: HumanQuestion,
    ) -> anyhow::Result<()> {
        let key = Self::q4h_path(dir).to_string_lossy().into_owned();
        self.q4h
            .mutate(key, move |current| {
                let mut list = current.unwrap_or_default();
                if list.iter().any(|q| q.id == question.id) {
                    return Err(InvariantViolation::DuplicateQ4hId(question.id).into());
                }
                if let Some(call_id) = &question.call_id {
                    if !call_id.is_empty()
                        && list.iter().any(|q| q.call_id.as_deref() == Some(call_id.as_str()))
                    {
                        return Err(InvariantViolation::DuplicateQ4hCallId(call_id.clone()).into());
                    }
                }
                if !list.is_empty() {
                    return Err(InvariantViolation::MultiplePendingQuestions.into());
                }
                list.push(question);
                Ok(StageDecision::Replace(list))
            })
            .await
    }

    pub async fn remove_human_question(&self, dir: &Path, id: &str) -> anyhow::Result<()> {
        let key = Self::q4h_path(dir).to_string_lossy().into_owned();
        let id = id.to_string();
        self.q4h
            .mutate(key, move |current| {
                let mut list = current.unwrap_or_default();
                list.retain(|q| q.id != id);
                Ok(StageDecision::Replace(list))
            })
            .await
    }

    pub async fn drain_q4h(&self) {
        self.q4h.drain().await
    }

    // ── PendingSubdialogs (coalesced write-back) ────────────────────────

    pub async fn load_pending_subdialogs(&self, dir: &Path) -> anyhow::Result<Vec<PendingSubdialog>> {
        let key = Self::pending_path(dir);
        Ok(self.pending.current(&key.to_string_lossy()).await?.unwrap_or_default())
    }

    pub async fn add_pending_subdialog(&self, dir: &Path, pending: PendingSubdialog) -> anyhow::Result<()> {
        let key = Self::pending_path(dir).to_string_lossy().into_owned();
        self.pending
            .mutate(key, move |current| {
                let mut list = current.unwrap_or_default();
                list.push(pending);
                Ok(StageDecision::Replace(list))
            })
            .await
    }

    pub async fn remove_pending_subdialog(&self, dir: &Path, subdialog_id: &str) -> anyhow::Result<()> {
        let key = Self::pending_path(dir).to_string_lossy().into_owned();
        let subdialog_id = subdialog_id.to_string();
        self.pending
            .mutate(key, move |current| {
                let mut list = current.unwrap_or_default();
                list.retain(|p| p.subdialog_id != subdialog_id);
                Ok(StageDecision::Replace(list))
            })
            .await
    }

    pub async fn drain_pending(&self) {
        self.pending.drain().await
    }

    // ── reminders (plain JSON, no coalescing specified) ─────────────────

    pub async fn load_reminders(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        read_json_list(&Self::reminders_path(dir)).await
    }

    pub async fn write_reminders(&self, dir: &Path, reminders: &[String]) -> anyhow::Result<()> {
        write_json_list(&Self::reminders_path(dir), reminders).await
    }

    // ── registry.yaml (root only) ────────────────────────────────────────

    pub async fn load_registry(&self, root_dir: &Path) -> anyhow::Result<SubdialogRegistry> {
        match tokio::fs::read(Self::registry_path(root_dir)).await {
            Ok(bytes) => Ok(serde_yaml::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SubdialogRegistry::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_registry(&self, root_dir: &Path, registry: &SubdialogRegistry) -> anyhow::Result<()> {
        let text = serde_yaml::to_string(registry)?;
        atomic_file::write(&Self::registry_path(root_dir), text.as_bytes()).await?;
        Ok(())
    }

    // ── subdialog response queue: take / commit / rollback ──────────────

    fn responses_lock_key(dir: &Path) -> String {
        format!("{}::responses", dir.display())
    }

    async fn rollback_locked(&self, dir: &Path) -> anyhow::Result<()> {
        let inflight_path = Self::responses_inflight_path(dir);
        let inflight: Vec<SubdialogResponse> = read_json_list(&inflight_path).await?;
        if inflight.is_empty() {
            let _ = tokio::fs::remove_file(&inflight_path).await;
            return Ok(());
        }
        let primary_path = Self::responses_path(dir);
        let mut primary: Vec<SubdialogResponse> = read_json_list(&primary_path).await?;
        let existing: HashSet<String> = primary.iter().map(|r| r.response_id.clone()).collect();
        for r in inflight {
            if !existing.contains(&r.response_id) {
                primary.push(r);
            }
        }
        write_json_list(&primary_path, &primary).await?;
        tokio::fs::remove_file(&inflight_path).await.ok();
        Ok(())
    }

    /// Step 1 of the response-queue protocol: claim the primary queue for
    /// processing. Rolls back a stale in-flight file first if one exists.
    pub async fn take_subdialog_responses(&self, dir: &Path) -> anyhow::Result<Vec<SubdialogResponse>> {
        let _guard = self.file_locks.acquire(Self::responses_lock_key(dir)).await;
        let inflight_path = Self::responses_inflight_path(dir);
        if tokio::fs::try_exists(&inflight_path).await? {
            self.rollback_locked(dir).await?;
        }
        let primary_path = Self::responses_path(dir);
        match tokio::fs::rename(&primary_path, &inflight_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        read_json_list(&inflight_path).await
    }

    /// Step 2: the parent has durably mirrored the taken responses. Drop
    /// the in-flight file.
    pub async fn commit_subdialog_responses(&self, dir: &Path) -> anyhow::Result<()> {
        let _guard = self.file_locks.acquire(Self::responses_lock_key(dir)).await;
        match tokio::fs::remove_file(Self::responses_inflight_path(dir)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Step 3: processing failed; merge in-flight responses back into the
    /// primary queue so nothing is lost.
    pub async fn rollback_subdialog_responses(&self, dir: &Path) -> anyhow::Result<()> {
        let _guard = self.file_locks.acquire(Self::responses_lock_key(dir)).await;
        self.rollback_locked(dir).await
    }

    /// Fused read of primary + in-flight, deduplicated by `responseId`, for
    /// consumers that only need a consistent snapshot (not the protocol).
    pub async fn load_subdialog_responses(&self, dir: &Path) -> anyhow::Result<Vec<SubdialogResponse>> {
        let primary = read_json_list(&Self::responses_path(dir)).await?;
        let inflight = read_json_list(&Self::responses_inflight_path(dir)).await?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for r in primary.into_iter().chain(inflight.into_iter()) {
            if seen.insert(r.response_id.clone()) {
                out.push(r);
            }
        }
        Ok(out)
    }

    pub async fn append_subdialog_response(&self, dir: &Path, response: SubdialogResponse) -> anyhow::Result<()> {
        let _guard = self.file_locks.acquire(Self::responses_lock_key(dir)).await;
        let primary_path = Self::responses_path(dir);
        let mut list: Vec<SubdialogResponse> = read_json_list(&primary_path).await?;
        list.push(response);
        write_json_list(&primary_path, &list).await
    }

    // ── status transitions & enumeration ────────────────────────────────

    /// Move every entry of a dialog's directory to `to_dir`, then remove
    /// the now-empty source. `to_dir`'s parent must already exist.
    pub async fn move_dialog_status(&self, from_dir: &Path, to_dir: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(to_dir).await?;
        let mut entries = tokio::fs::read_dir(from_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest = to_dir.join(entry.file_name());
            tokio::fs::rename(entry.path(), dest).await?;
        }
        tokio::fs::remove_dir(from_dir).await?;
        Ok(())
    }

    /// Recursively find every directory under `status_dir` that contains a
    /// `dialog.yaml`.
    pub async fn enumerate_dialogs(&self, status_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut stack = vec![status_dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            let mut has_meta = false;
            let mut subdirs = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    subdirs.push(entry.path());
                } else if entry.file_name() == DIALOG_META_FILE {
                    has_meta = true;
                }
            }
            if has_meta {
                out.push(dir);
            }
            stack.extend(subdirs);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dialog_model::CallSiteRef;
    use tempfile::tempdir;

    fn meta(id: DialogId) -> DialogMetadata {
        DialogMetadata {
            id,
            agent_id: "pangu".into(),
            task_document_path: None,
            created_at: Utc::now(),
            disable_diligence_push: false,
            suppress_diligence_push: false,
            parent_self_id: None,
            spawn: None,
        }
    }

    fn question(id: &str) -> HumanQuestion {
        HumanQuestion {
            id: id.into(),
            mention_list: vec![],
            tellask_content: "what now?".into(),
            asked_at: Utc::now(),
            call_id: None,
            call_site_ref: CallSiteRef {
                course: dialog_model::Course::FIRST,
                message_index: 0,
            },
        }
    }

    #[tokio::test]
    async fn writes_and_reads_metadata() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        let id = DialogId::root("r1");
        persist.write_metadata(dir.path(), &meta(id.clone())).await.unwrap();
        let loaded = persist.read_metadata(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
    }

    #[tokio::test]
    async fn reading_missing_metadata_is_none() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        assert!(persist.read_metadata(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_round_trips_through_writeback() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        let latest = Latest::new_idle(Utc::now(), 3);
        persist.write_latest(dir.path(), latest.clone()).await.unwrap();
        let loaded = persist.read_latest(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.current_course, latest.current_course);
        persist.drain_latest().await;
        assert!(DialogPersistence::latest_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn rejects_duplicate_q4h_id() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        persist.append_human_question(dir.path(), question("q1")).await.unwrap();
        let result = persist.append_human_question(dir.path(), question("q1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_second_pending_question() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        persist.append_human_question(dir.path(), question("q1")).await.unwrap();
        let result = persist.append_human_question(dir.path(), question("q2")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn registry_insert_and_lookup() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        let mut registry = SubdialogRegistry::default();
        registry.insert("pangu".into(), "research".into(), "d2".into());
        persist.write_registry(dir.path(), &registry).await.unwrap();
        let loaded = persist.load_registry(dir.path()).await.unwrap();
        assert_eq!(loaded.lookup("pangu", "research"), Some("d2"));
    }

    #[tokio::test]
    async fn response_queue_take_commit_cycle() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        let resp = SubdialogResponse {
            response_id: "r1".into(),
            subdialog_id: "d2".into(),
            response: "done".into(),
            completed_at: Utc::now(),
            status: dialog_model::SubdialogResponseStatus::Completed,
            call_type: dialog_model::CallType::B,
            call_name: dialog_model::CallName::Tellask,
            mention_list: None,
            tellask_content: "research".into(),
            responder_id: "pangu".into(),
            origin_member_id: "user".into(),
            call_id: "c1".into(),
        };
        persist.append_subdialog_response(dir.path(), resp.clone()).await.unwrap();

        let taken = persist.take_subdialog_responses(dir.path()).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert!(DialogPersistence::responses_inflight_path(dir.path()).exists());

        persist.commit_subdialog_responses(dir.path()).await.unwrap();
        assert!(!DialogPersistence::responses_inflight_path(dir.path()).exists());

        let remaining = persist.load_subdialog_responses(dir.path()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn response_queue_rollback_restores_primary() {
        let dir = tempdir().unwrap();
        let persist = DialogPersistence::new();
        let resp = SubdialogResponse {
            response_id: "r1".into(),
            subdialog_id: "d2".into(),
            response: "done".into(),
            completed_at: Utc::now(),
            status: dialog_model::SubdialogResponseStatus::Completed,
            call_type: dialog_model::CallType::A,
            call_name: dialog_model::CallName::TellaskSessionless,
            mention_list: None,
            tellask_content: "research".into(),
            responder_id: "pangu".into(),
            origin_member_id: "user".into(),
            call_id: "c1".into(),
        };
        persist.append_subdialog_response(dir.path(), resp).await.unwrap();
        persist.take_subdialog_responses(dir.path()).await.unwrap();
        persist.rollback_subdialog_responses(dir.path()).await.unwrap();

        let restored = persist.load_subdialog_responses(dir.path()).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert!(!DialogPersistence::responses_inflight_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn move_dialog_status_relocates_all_entries() {
        let workspace = tempdir().unwrap();
        let from = workspace.path().join("running").join("r1");
        let to = workspace.path().join("done").join("r1");
        tokio::fs::create_dir_all(&from).await.unwrap();
        tokio::fs::write(from.join("dialog.yaml"), b"id: x").await.unwrap();
        tokio::fs::write(from.join("latest.yaml"), b"status: completed").await.unwrap();

        let persist = DialogPersistence::new();
        persist.move_dialog_status(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert!(to.join("dialog.yaml").exists());
        assert!(to.join("latest.yaml").exists());
    }

    #[tokio::test]
    async fn enumerate_dialogs_finds_nested_subdialogs() {
        let workspace = tempdir().unwrap();
        let root_dir = workspace.path().join("running").join("r1");
        let child_dir = DialogPersistence::subdialog_dir(&root_dir, "c1");
        tokio::fs::create_dir_all(&child_dir).await.unwrap();
        tokio::fs::write(root_dir.join("dialog.yaml"), b"id: x").await.unwrap();
        tokio::fs::write(child_dir.join("dialog.yaml"), b"id: y").await.unwrap();

        let persist = DialogPersistence::new();
        let found = persist
            .enumerate_dialogs(&workspace.path().join("running"))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
