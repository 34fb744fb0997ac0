// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Subdialog coordinator: call-type classification and dispatch,
//! idempotent-modulo-dead type-B creation, and the response queue
//! delivery protocol with its ordering invariant.

use std::path::Path;

use chrono::Utc;
use dialog_core::{Dialog, DriveOutcome, TeammateCallName, TeammateCallRequest};
use dialog_model::{
    BlockedReason, CallName, CallType, ChatMessage, DialogId, HumanQuestion, Latest,
    PendingSubdialog, PersistedRecord, RunState, SpawnInfo, SubdialogResponse,
    SubdialogResponseStatus,
};
use dialog_persist::{DialogPersistence, LogStore};
use serde::Deserialize;
use tracing::info;

use crate::registry::DialogRegistry;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("malformed {call} arguments: {source}")]
    BadArguments {
        call: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("tellaskBack call carried no callId")]
    MissingCallId,
}

#[derive(Debug, Deserialize)]
struct TellaskArgs {
    #[serde(rename = "agentId")]
    agent_id: String,
    #[serde(rename = "tellaskContent")]
    tellask_content: String,
    #[serde(rename = "sessionSlug", default)]
    session_slug: Option<String>,
    #[serde(rename = "mentionList", default)]
    mention_list: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AskHumanArgs {
    question: String,
    #[serde(rename = "mentionList", default)]
    mention_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TellaskBackArgs {
    content: String,
}

/// What a dispatched call produced: either a freshly created (or reused)
/// subdialog, or an in-place effect on the calling dialog (`askHuman`,
/// `tellaskBack`).
#[derive(Debug)]
pub enum DispatchOutcome {
    SubdialogSpawned {
        child_id: DialogId,
        reused: bool,
    },
    HumanQuestionRaised {
        question_id: String,
    },
    BackResponseQueued,
}

/// Routes teammate-shaped calls surfaced by a suspended [`Dialog`] drive to
/// subdialog creation, the q4h queue, or the parent response queue.
pub struct Coordinator {
    registry: std::sync::Arc<DialogRegistry>,
    persistence: std::sync::Arc<DialogPersistence>,
    log_store: std::sync::Arc<LogStore>,
    diligence_push_budget: u32,
}

impl Coordinator {
    pub fn new(
        registry: std::sync::Arc<DialogRegistry>,
        persistence: std::sync::Arc<DialogPersistence>,
        log_store: std::sync::Arc<LogStore>,
        diligence_push_budget: u32,
    ) -> Self {
        Self {
            registry,
            persistence,
            log_store,
            diligence_push_budget,
        }
    }

    /// Dispatch one teammate call surfaced by `caller`'s drive
    /// (`DriveOutcome::Suspended`). `caller` is the dialog the call came
    /// from, which is the *parent* for `tellask`/`tellaskSessionless`/
    /// `freshBootsReasoning`/`askHuman` but the *child* for `tellaskBack`.
    /// `caller_dir`/`child_dir_for` are caller-supplied since directory
    /// placement is a [`crate::layout::WorkspaceLayout`] concern, not this
    /// crate's.
    pub async fn dispatch(
        &self,
        caller: &Dialog,
        caller_dir: &Path,
        child_dir_for: impl Fn(&str) -> std::path::PathBuf,
        call: &TeammateCallRequest,
    ) -> anyhow::Result<DispatchOutcome> {
        match call.call_name {
            TeammateCallName::Tellask => self.create_type_b(caller, caller_dir, child_dir_for, call).await,
            TeammateCallName::TellaskSessionless => {
                self.create_fresh(caller, caller_dir, child_dir_for, call, false).await
            }
            TeammateCallName::FreshBootsReasoning => {
                self.create_fresh(caller, caller_dir, child_dir_for, call, true).await
            }
            TeammateCallName::AskHuman => self.ask_human(caller, caller_dir, call).await,
            TeammateCallName::TellaskBack => self.tellask_back(caller, caller_dir, call).await,
        }
    }

    async fn create_fresh(
        &self,
        parent: &Dialog,
        parent_dir: &Path,
        child_dir_for: impl Fn(&str) -> std::path::PathBuf,
        call: &TeammateCallRequest,
        fresh_boots: bool,
    ) -> anyhow::Result<DispatchOutcome> {
        let args: TellaskArgs = serde_json::from_str(&call.raw_arguments).map_err(|source| {
            CoordinatorError::BadArguments {
                call: if fresh_boots {
                    "freshBootsReasoning"
                } else {
                    "tellaskSessionless"
                },
                source,
            }
        })?;
        let child_self_id = uuid::Uuid::new_v4().to_string();
        let child_id = DialogId::child(child_self_id.clone(), parent.id.self_id.clone());
        let child_dir = child_dir_for(&child_self_id);
        let call_type = if fresh_boots { CallType::C } else { CallType::A };
        let call_name = if fresh_boots {
            CallName::FreshBootsReasoning
        } else {
            CallName::TellaskSessionless
        };
        self.materialize_subdialog(
            parent, parent_dir, &child_id, &child_dir, &args, call, call_type, call_name,
        )
        .await?;
        Ok(DispatchOutcome::SubdialogSpawned {
            child_id,
            reused: false,
        })
    }

    async fn create_type_b(
        &self,
        parent: &Dialog,
        parent_dir: &Path,
        child_dir_for: impl Fn(&str) -> std::path::PathBuf,
        call: &TeammateCallRequest,
    ) -> anyhow::Result<DispatchOutcome> {
        let args: TellaskArgs = serde_json::from_str(&call.raw_arguments)
            .map_err(|source| CoordinatorError::BadArguments { call: "tellask", source })?;
        let slug = args
            .session_slug
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let root_dir = self.root_dir_of(parent_dir);
        let mut registry = self.persistence.load_registry(&root_dir).await?;

        if let Some(existing_self_id) = registry.lookup(&args.agent_id, &slug).map(str::to_string) {
            let existing_dir = child_dir_for(&existing_self_id);
            let latest = self.persistence.read_latest(&existing_dir).await?;
            let is_dead = latest.map(|l| l.run_state.is_dead()).unwrap_or(false);
            if !is_dead {
                let existing_id = DialogId::child(existing_self_id, parent.id.self_id.clone());
                return Ok(DispatchOutcome::SubdialogSpawned {
                    child_id: existing_id,
                    reused: true,
                });
            }
            info!(agent = %args.agent_id, slug, "dead subdialog slug reused, spawning fresh instance");
        }

        let child_self_id = uuid::Uuid::new_v4().to_string();
        let child_id = DialogId::child(child_self_id.clone(), parent.id.self_id.clone());
        let child_dir = child_dir_for(&child_self_id);
        self.materialize_subdialog(
            parent, parent_dir, &child_id, &child_dir, &args, call, CallType::B, CallName::Tellask,
        )
        .await?;

        registry.insert(args.agent_id, slug, child_self_id);
        self.persistence.write_registry(&root_dir, &registry).await?;

        Ok(DispatchOutcome::SubdialogSpawned {
            child_id,
            reused: false,
        })
    }

    async fn materialize_subdialog(
        &self,
        parent: &Dialog,
        parent_dir: &Path,
        child_id: &DialogId,
        child_dir: &Path,
        args: &TellaskArgs,
        call: &TeammateCallRequest,
        call_type: CallType,
        call_name: CallName,
    ) -> anyhow::Result<()> {
        let meta = dialog_persist::DialogMetadata {
            id: child_id.clone(),
            agent_id: args.agent_id.clone(),
            task_document_path: None,
            created_at: Utc::now(),
            disable_diligence_push: false,
            suppress_diligence_push: false,
            parent_self_id: Some(parent.id.self_id.clone()),
            spawn: Some(SpawnInfo {
                call_id: call.call_id.clone(),
                call_type,
                call_name,
                tellask_content: args.tellask_content.clone(),
                origin_member_id: parent.agent_id.clone(),
                mention_list: args.mention_list.clone(),
            }),
        };
        self.persistence.write_metadata(child_dir, &meta).await?;
        self.persistence
            .write_latest(child_dir, Latest::new_idle(Utc::now(), self.diligence_push_budget))
            .await?;

        let child = std::sync::Arc::new(Dialog::new(
            child_id.clone(),
            args.agent_id.clone(),
            self.diligence_push_budget,
        ));
        self.registry.insert(child);

        self.log_store
            .append(
                &parent.id,
                parent_dir,
                { let s = parent.acquire().await; s.current_course },
                &PersistedRecord::TeammateCallAnchor {
                    call_id: call.call_id.clone(),
                    callee_agent_id: args.agent_id.clone(),
                    session_slug: args.session_slug.clone().unwrap_or_default(),
                    at: Utc::now(),
                },
            )
            .await?;
        parent.publish(dialog_core::DialogEvent::SubdialogCreated {
            subdialog_id: child_id.self_id.clone(),
            target_agent_id: args.agent_id.clone(),
        });
        Ok(())
    }

    async fn ask_human(
        &self,
        parent: &Dialog,
        parent_dir: &Path,
        call: &TeammateCallRequest,
    ) -> anyhow::Result<DispatchOutcome> {
        let args: AskHumanArgs = serde_json::from_str(&call.raw_arguments)
            .map_err(|source| CoordinatorError::BadArguments { call: "askHuman", source })?;
        let question_id = uuid::Uuid::new_v4().to_string();
        let mut state = parent.acquire().await;
        let question = HumanQuestion {
            id: question_id.clone(),
            mention_list: args.mention_list,
            tellask_content: args.question.clone(),
            asked_at: Utc::now(),
            call_id: Some(call.call_id.clone()),
            call_site_ref: dialog_model::CallSiteRef {
                course: state.current_course,
                message_index: state.transcript.len(),
            },
        };
        self.persistence.append_human_question(parent_dir, question).await?;
        self.log_store
            .append(
                &parent.id,
                parent_dir,
                state.current_course,
                &PersistedRecord::QuestForSup {
                    question: args.question,
                    call_id: call.call_id.clone(),
                    at: Utc::now(),
                },
            )
            .await?;
        state.run_state = RunState::Blocked(BlockedReason::NeedsHumanInput);
        Ok(DispatchOutcome::HumanQuestionRaised { question_id })
    }

    /// Replies into the call that created `child`, read back from the
    /// `spawn` info recorded on its own metadata at creation time. The
    /// parent directory is derived structurally (`<parent>/subdialogs/<id>`)
    /// rather than passed in, since `dispatch`'s `child_dir_for` only maps
    /// parent → child.
    async fn tellask_back(
        &self,
        child: &Dialog,
        child_dir: &Path,
        call: &TeammateCallRequest,
    ) -> anyhow::Result<DispatchOutcome> {
        if call.call_id.is_empty() {
            return Err(CoordinatorError::MissingCallId.into());
        }
        let args: TellaskBackArgs = serde_json::from_str(&call.raw_arguments)
            .map_err(|source| CoordinatorError::BadArguments { call: "tellaskBack", source })?;

        let meta = self
            .persistence
            .read_metadata(child_dir)
            .await?
            .ok_or_else(|| anyhow::anyhow!("tellaskBack: no metadata for child {}", child.id))?;
        let spawn = meta
            .spawn
            .ok_or_else(|| anyhow::anyhow!("tellaskBack: {} was not spawned by a teammate call", child.id))?;

        let parent_dir = Self::parent_dir_of(child_dir)
            .ok_or_else(|| anyhow::anyhow!("tellaskBack: {} has no parent directory", child.id))?;
        let parent_meta = self
            .persistence
            .read_metadata(&parent_dir)
            .await?
            .ok_or_else(|| anyhow::anyhow!("tellaskBack: no metadata at parent dir of {}", child.id))?;
        let parent = self
            .registry
            .get(&parent_meta.id)
            .ok_or_else(|| anyhow::anyhow!("tellaskBack: parent {} is not resident", parent_meta.id))?;

        let response = SubdialogResponse {
            response_id: uuid::Uuid::new_v4().to_string(),
            subdialog_id: child.id.self_id.clone(),
            response: args.content,
            completed_at: Utc::now(),
            status: SubdialogResponseStatus::Completed,
            call_type: spawn.call_type,
            call_name: spawn.call_name,
            mention_list: spawn.mention_list.clone(),
            tellask_content: spawn.tellask_content.clone(),
            responder_id: child.agent_id.clone(),
            origin_member_id: spawn.origin_member_id.clone(),
            call_id: spawn.call_id.clone(),
        };

        let course = { let state = child.acquire().await; state.current_course };
        self.log_store
            .append(
                &child.id,
                child_dir,
                course,
                &PersistedRecord::TeammateResponse {
                    response_id: response.response_id.clone(),
                    call_id: spawn.call_id.clone(),
                    content: response.response.clone(),
                    at: response.completed_at,
                },
            )
            .await?;

        self.deliver_response(&parent, &parent_dir, response).await?;
        Ok(DispatchOutcome::BackResponseQueued)
    }

    /// `<root>/subdialogs/<selfId>` -> `<root>`. `None` if `dialog_dir`
    /// is not nested under a `subdialogs` directory (i.e. it is a root).
    fn parent_dir_of(dialog_dir: &Path) -> Option<std::path::PathBuf> {
        let subdialogs_dir = dialog_dir.parent()?;
        if subdialogs_dir.file_name().map(|n| n == "subdialogs").unwrap_or(false) {
            subdialogs_dir.parent().map(Path::to_path_buf)
        } else {
            None
        }
    }

    fn root_dir_of<'a>(&self, dialog_dir: &'a Path) -> std::path::PathBuf {
        // The registry always lives at the root; walk up past any
        // `subdialogs/<id>` segments.
        let mut dir = dialog_dir.to_path_buf();
        loop {
            if dir.file_name().map(|n| n == "subdialogs").unwrap_or(false) {
                dir.pop();
                continue;
            }
            if let Some(parent) = dir.parent() {
                if parent.file_name().map(|n| n == "subdialogs").unwrap_or(false) {
                    dir = parent.parent().unwrap_or(parent).to_path_buf();
                    continue;
                }
            }
            break;
        }
        dir
    }

    /// Enqueue a finished subdialog's reply onto its parent, and if the
    /// parent is currently suspended waiting on it, mirror it into the
    /// parent's transcript (ordering invariant: the mirror must land
    /// before the next assistant generation reads it).
    pub async fn deliver_response(
        &self,
        parent: &Dialog,
        parent_dir: &Path,
        response: SubdialogResponse,
    ) -> anyhow::Result<()> {
        self.persistence
            .append_subdialog_response(parent_dir, response)
            .await?;

        let is_waiting = {
            let state = parent.acquire().await;
            matches!(
                state.run_state,
                RunState::Blocked(BlockedReason::WaitingForSubdialogs)
                    | RunState::Blocked(BlockedReason::NeedsHumanInputAndSubdialogs)
            )
        };
        if is_waiting {
            self.mirror_responses(parent, parent_dir).await?;
        }
        Ok(())
    }

    /// Drain the parent's response queue and mirror every entry into its
    /// transcript as a `tellask_result_msg`, in queue order, committing
    /// once the mirror is durably appended. On any failure after `take`,
    /// the caller should invoke `rollback_subdialog_responses` so nothing
    /// is lost.
    pub async fn mirror_responses(
        &self,
        parent: &Dialog,
        parent_dir: &Path,
    ) -> anyhow::Result<Vec<SubdialogResponse>> {
        let responses = self.persistence.take_subdialog_responses(parent_dir).await?;
        if responses.is_empty() {
            self.persistence.commit_subdialog_responses(parent_dir).await?;
            return Ok(responses);
        }

        let mirror_result: anyhow::Result<()> = async {
            let mut state = parent.acquire().await;
            let course = state.current_course;
            for response in &responses {
                state.push_message(ChatMessage::TellaskResult {
                    responder_id: response.responder_id.clone(),
                    tellask_content: response.tellask_content.clone(),
                    content: response.response.clone(),
                    call_id: response.call_id.clone(),
                    at: response.completed_at,
                });
                self.log_store
                    .append(
                        &parent.id,
                        parent_dir,
                        course,
                        &PersistedRecord::TeammateCallResult {
                            call_id: response.call_id.clone(),
                            responder_id: response.responder_id.clone(),
                            content: response.response.clone(),
                            at: response.completed_at,
                        },
                    )
                    .await?;
                parent.publish(dialog_core::DialogEvent::TeammateResponse {
                    call_id: response.call_id.clone(),
                    subdialog_id: response.subdialog_id.clone(),
                    content: response.response.clone(),
                });
            }
            Ok(())
        }
        .await;

        match mirror_result {
            Ok(()) => {
                self.persistence.commit_subdialog_responses(parent_dir).await?;
                Ok(responses)
            }
            Err(e) => {
                self.persistence.rollback_subdialog_responses(parent_dir).await?;
                Err(e)
            }
        }
    }

    /// Marks a finished child subdialog dead-or-complete and clears its
    /// registry slot if it was a type-B session. Called once the child's
    /// final drive settles (`DriveOutcome` other than `Suspended`).
    pub async fn settle_child(
        &self,
        child_id: &DialogId,
        child_dir: &Path,
        root_dir: &Path,
        status: SubdialogResponseStatus,
    ) -> anyhow::Result<()> {
        if status == SubdialogResponseStatus::Dead {
            if let Some(meta) = self.persistence.read_metadata(child_dir).await? {
                let mut registry = self.persistence.load_registry(root_dir).await?;
                registry.remove(&meta.agent_id, &child_id.self_id);
                self.persistence.write_registry(root_dir, &registry).await?;
            }
        }
        Ok(())
    }

    /// Pushes a pending-subdialog marker onto the parent so restore can
    /// recognize it is still waiting on a child.
    pub async fn mark_pending(
        &self,
        parent_dir: &Path,
        pending: PendingSubdialog,
    ) -> anyhow::Result<()> {
        self.persistence.add_pending_subdialog(parent_dir, pending).await
    }

    pub async fn clear_pending(&self, parent_dir: &Path, child_self_id: &str) -> anyhow::Result<()> {
        self.persistence
            .remove_pending_subdialog(parent_dir, child_self_id)
            .await
    }
}

/// Whether `outcome` leaves the driving dialog still waiting on something
/// (used by the caller's scheduling loop to decide whether to re-drive).
pub fn still_waiting(outcome: &DriveOutcome) -> bool {
    matches!(outcome, DriveOutcome::Suspended(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialog_core::TeammateCallName;
    use tempfile::TempDir;

    fn coordinator() -> (Coordinator, std::sync::Arc<DialogRegistry>, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = std::sync::Arc::new(DialogRegistry::new());
        let persistence = std::sync::Arc::new(DialogPersistence::new());
        let log_store = std::sync::Arc::new(LogStore::new(dir.path()));
        (
            Coordinator::new(registry.clone(), persistence, log_store, 3),
            registry,
            dir,
        )
    }

    #[tokio::test]
    async fn tellask_sessionless_spawns_a_fresh_subdialog_every_time() {
        let (coordinator, registry, tmp) = coordinator();
        let parent = Dialog::new(DialogId::root("root1"), "pangu", 3);
        let parent_dir = tmp.path().join("root1");
        tokio::fs::create_dir_all(&parent_dir).await.unwrap();

        let call = TeammateCallRequest {
            call_id: "c1".into(),
            call_name: TeammateCallName::TellaskSessionless,
            raw_arguments: r#"{"agentId":"fengshen","tellaskContent":"please compute 1+1"}"#.into(),
        };
        let outcome = coordinator
            .dispatch(
                &parent,
                &parent_dir,
                |id| tmp.path().join("root1").join("subdialogs").join(id),
                &call,
            )
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::SubdialogSpawned { child_id, reused } => {
                assert!(!reused);
                assert!(registry.contains(&child_id));
            }
            other => panic!("expected SubdialogSpawned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tellask_with_slug_reuses_a_live_subdialog() {
        let (coordinator, _registry, tmp) = coordinator();
        let parent = Dialog::new(DialogId::root("root2"), "pangu", 3);
        let parent_dir = tmp.path().join("root2");
        tokio::fs::create_dir_all(&parent_dir).await.unwrap();
        let child_dir_for = |id: &str| tmp.path().join("root2").join("subdialogs").join(id);

        let call = TeammateCallRequest {
            call_id: "c1".into(),
            call_name: TeammateCallName::Tellask,
            raw_arguments: r#"{"agentId":"fengshen","tellaskContent":"start research","sessionSlug":"research"}"#.into(),
        };
        let first = coordinator
            .dispatch(&parent, &parent_dir, child_dir_for, &call)
            .await
            .unwrap();
        let first_id = match first {
            DispatchOutcome::SubdialogSpawned { child_id, .. } => child_id,
            other => panic!("expected SubdialogSpawned, got {other:?}"),
        };

        let second = coordinator
            .dispatch(&parent, &parent_dir, child_dir_for, &call)
            .await
            .unwrap();
        match second {
            DispatchOutcome::SubdialogSpawned { child_id, reused } => {
                assert!(reused);
                assert_eq!(child_id, first_id);
            }
            other => panic!("expected SubdialogSpawned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ask_human_blocks_the_dialog_and_raises_a_question() {
        let (coordinator, _registry, tmp) = coordinator();
        let parent = Dialog::new(DialogId::root("root3"), "pangu", 3);
        let parent_dir = tmp.path().join("root3");
        tokio::fs::create_dir_all(&parent_dir).await.unwrap();

        let call = TeammateCallRequest {
            call_id: "c1".into(),
            call_name: TeammateCallName::AskHuman,
            raw_arguments: r#"{"question":"which branch should I target?"}"#.into(),
        };
        let outcome = coordinator.dispatch(&parent, &parent_dir, |_| tmp.path().to_path_buf(), &call).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::HumanQuestionRaised { .. }));

        let state = parent.acquire().await;
        assert!(matches!(
            state.run_state,
            RunState::Blocked(BlockedReason::NeedsHumanInput)
        ));
        let pending = coordinator.persistence.load_q4h(&parent_dir).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn tellask_back_delivers_into_the_parent_that_spawned_it() {
        let (coordinator, registry, tmp) = coordinator();
        let parent_id = DialogId::root("root5");
        let parent = Dialog::new(parent_id.clone(), "pangu", 3);
        let parent_dir = tmp.path().join("root5");
        tokio::fs::create_dir_all(&parent_dir).await.unwrap();
        coordinator
            .persistence
            .write_metadata(
                &parent_dir,
                &dialog_persist::DialogMetadata {
                    id: parent_id.clone(),
                    agent_id: "pangu".into(),
                    task_document_path: None,
                    created_at: Utc::now(),
                    disable_diligence_push: false,
                    suppress_diligence_push: false,
                    parent_self_id: None,
                    spawn: None,
                },
            )
            .await
            .unwrap();
        registry.insert(std::sync::Arc::new(parent));
        let parent = registry.get(&parent_id).unwrap();
        {
            let mut state = parent.acquire().await;
            state.run_state = RunState::Blocked(BlockedReason::WaitingForSubdialogs);
        }

        let call = TeammateCallRequest {
            call_id: "c1".into(),
            call_name: TeammateCallName::TellaskSessionless,
            raw_arguments: r#"{"agentId":"fengshen","tellaskContent":"compute 1+1"}"#.into(),
        };
        let child_dir_for = |id: &str| parent_dir.join("subdialogs").join(id);
        let outcome = coordinator
            .dispatch(&parent, &parent_dir, child_dir_for, &call)
            .await
            .unwrap();
        let child_id = match outcome {
            DispatchOutcome::SubdialogSpawned { child_id, .. } => child_id,
            other => panic!("expected SubdialogSpawned, got {other:?}"),
        };
        let child = registry.get(&child_id).unwrap();
        let child_dir = child_dir_for(&child_id.self_id);

        let back_call = TeammateCallRequest {
            call_id: "cb1".into(),
            call_name: TeammateCallName::TellaskBack,
            raw_arguments: r#"{"content":"2"}"#.into(),
        };
        let outcome = coordinator
            .dispatch(&child, &child_dir, |_| unreachable!(), &back_call)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::BackResponseQueued));

        let state = parent.acquire().await;
        let mirrored = state.transcript.iter().find_map(|m| match m {
            ChatMessage::TellaskResult { content, call_id, .. } => Some((content.clone(), call_id.clone())),
            _ => None,
        });
        assert_eq!(mirrored, Some(("2".to_string(), "c1".to_string())));
    }

    #[tokio::test]
    async fn mirror_responses_appends_tellask_result_and_commits() {
        let (coordinator, _registry, tmp) = coordinator();
        let parent = Dialog::new(DialogId::root("root4"), "pangu", 3);
        {
            let mut state = parent.acquire().await;
            state.run_state = RunState::Blocked(BlockedReason::WaitingForSubdialogs);
        }
        let parent_dir = tmp.path().join("root4");
        tokio::fs::create_dir_all(&parent_dir).await.unwrap();

        let response = SubdialogResponse {
            response_id: "r1".into(),
            subdialog_id: "child1".into(),
            response: "2".into(),
            completed_at: Utc::now(),
            status: SubdialogResponseStatus::Completed,
            call_type: dialog_model::CallType::A,
            call_name: dialog_model::CallName::TellaskSessionless,
            mention_list: None,
            tellask_content: "compute 1+1".into(),
            responder_id: "fengshen".into(),
            origin_member_id: "pangu".into(),
            call_id: "c1".into(),
        };
        coordinator
            .deliver_response(&parent, &parent_dir, response)
            .await
            .unwrap();

        let state = parent.acquire().await;
        assert!(state.transcript.iter().any(|m| matches!(
            m,
            ChatMessage::TellaskResult { content, .. } if content == "2"
        )));
        let remaining = coordinator.persistence.load_subdialog_responses(&parent_dir).await.unwrap();
        assert!(remaining.is_empty());
    }
}
